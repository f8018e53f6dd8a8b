pub mod config;
pub mod db;
pub mod document;
pub mod environment;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod reprint;
pub mod store;
pub mod trends;
pub mod vector;

pub const TARGET_LOADER: &str = "loader";
pub const TARGET_INDEX: &str = "similarity_index";
pub const TARGET_REPRINT: &str = "reprint";
pub const TARGET_TRENDS: &str = "trends";
pub const TARGET_DB: &str = "db_query";

pub use config::PipelineConfig;
pub use document::{Document, LoadedDocuments};
pub use pipeline::{run_pipeline, RunSummary};
