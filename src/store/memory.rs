use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DocumentSource, ResultSink};
use crate::document::RawDocument;
use crate::reprint::ReprintSnapshot;
use crate::trends::{BurstKeyword, DailyPoint, WeeklyReport};

/// In-process store backed by ordered maps.
///
/// Useful for callers that already hold their documents in memory, and for
/// exercising the pipeline without a database.
#[derive(Default)]
pub struct MemoryStore {
    documents: Vec<RawDocument>,
    reprints: Mutex<BTreeMap<String, ReprintSnapshot>>,
    daily: Mutex<BTreeMap<(String, NaiveDate), DailyPoint>>,
    bursts: Mutex<BTreeMap<(String, NaiveDate), BurstKeyword>>,
    weekly: Mutex<BTreeMap<NaiveDate, WeeklyReport>>,
}

impl MemoryStore {
    pub fn new(documents: Vec<RawDocument>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    pub fn reprint_snapshots(&self) -> Vec<ReprintSnapshot> {
        lock(&self.reprints).values().cloned().collect()
    }

    pub fn daily_points(&self) -> Vec<DailyPoint> {
        lock(&self.daily).values().cloned().collect()
    }

    pub fn burst_keywords(&self) -> Vec<BurstKeyword> {
        lock(&self.bursts).values().cloned().collect()
    }

    pub fn weekly_reports(&self) -> Vec<WeeklyReport> {
        lock(&self.weekly).values().cloned().collect()
    }
}

// A poisoned map still holds consistent rows: every write is a single insert.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait::async_trait]
impl DocumentSource for MemoryStore {
    async fn fetch_documents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawDocument>> {
        if since > until {
            return Err(anyhow!("empty fetch window: {} > {}", since, until));
        }
        Ok(self
            .documents
            .iter()
            .filter(|d| match d.published_at {
                Some(t) => t >= since && t <= until,
                None => true,
            })
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ResultSink for MemoryStore {
    async fn upsert_reprint_snapshot(&self, snapshot: &ReprintSnapshot) -> Result<()> {
        lock(&self.reprints).insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn upsert_daily_points(&self, points: &[DailyPoint]) -> Result<usize> {
        let mut daily = lock(&self.daily);
        for p in points {
            daily.insert((p.group_key.clone(), p.date), p.clone());
        }
        Ok(points.len())
    }

    async fn upsert_burst_keywords(&self, records: &[BurstKeyword]) -> Result<usize> {
        let mut bursts = lock(&self.bursts);
        for r in records {
            bursts.insert((r.keyword.clone(), r.date), r.clone());
        }
        Ok(records.len())
    }

    async fn upsert_weekly_report(&self, report: &WeeklyReport) -> Result<()> {
        lock(&self.weekly).insert(report.week_start, report.clone());
        Ok(())
    }
}
