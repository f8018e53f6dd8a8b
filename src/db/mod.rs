// SQLite store: the source articles plus every derived collection.
pub mod core;
mod documents;
mod results;
mod schema;

pub use self::core::Database;
