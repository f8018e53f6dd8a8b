//! Narrow read/write seams between the pipeline and whatever holds the data.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::document::RawDocument;
use crate::reprint::ReprintSnapshot;
use crate::trends::{BurstKeyword, DailyPoint, WeeklyReport};

mod memory;

pub use memory::MemoryStore;

/// Read side: the source collection of preprocessed articles.
#[async_trait::async_trait]
pub trait DocumentSource: Send + Sync {
    /// Returns every row published within `[since, until]`, plus rows whose
    /// timestamp is missing or unreadable (so the loader can count them).
    async fn fetch_documents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawDocument>>;
}

/// Write side: derived collections, all upserted on their natural key.
///
/// Implementations must be last-write-wins and never hold two rows for the
/// same key.
#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Keyed on `run_id`.
    async fn upsert_reprint_snapshot(&self, snapshot: &ReprintSnapshot) -> Result<()>;

    /// Keyed on `(group_key, date)`. Returns the number of rows written.
    async fn upsert_daily_points(&self, points: &[DailyPoint]) -> Result<usize>;

    /// Keyed on `(keyword, date)`. Returns the number of rows written.
    async fn upsert_burst_keywords(&self, records: &[BurstKeyword]) -> Result<usize>;

    /// Keyed on `week_start`.
    async fn upsert_weekly_report(&self, report: &WeeklyReport) -> Result<()>;
}
