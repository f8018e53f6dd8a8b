//! One batch run: load a snapshot, detect reprints and trends, upsert results.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::document::SkipCounts;
use crate::loader::load_documents;
use crate::reprint::{detect_reprints, run_id};
use crate::store::{DocumentSource, ResultSink};
use crate::trends::detect_trends;

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stages {
    All,
    Reprints,
    Trends,
}

impl Stages {
    fn reprints(self) -> bool {
        matches!(self, Stages::All | Stages::Reprints)
    }

    fn trends(self) -> bool {
        matches!(self, Stages::All | Stages::Trends)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReprintSummary {
    pub events: usize,
    pub reprint_rate: f64,
    pub near_threshold_pairs: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub groups: usize,
    pub daily_rows: usize,
    pub spike_days: usize,
    pub burst_keywords: usize,
    pub week_start: NaiveDate,
    pub spikes_this_week: usize,
}

/// What a run did, in a form suitable for printing as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub as_of: DateTime<Utc>,
    pub lookback_days: i64,
    /// Documents that went into clustering.
    pub documents: usize,
    /// Dated documents that went into the trend stages.
    pub dated_documents: usize,
    pub skipped: SkipCounts,
    pub reprints: Option<ReprintSummary>,
    pub trends: Option<TrendSummary>,
}

/// Runs the selected stages over the snapshot ending at `as_of`.
///
/// Every derived record is stamped with `as_of` rather than the wall clock,
/// so repeating a run over the same snapshot rewrites identical rows.
pub async fn run_pipeline<S, K>(
    source: &S,
    sink: &K,
    config: &PipelineConfig,
    as_of: DateTime<Utc>,
    stages: Stages,
) -> Result<RunSummary>
where
    S: DocumentSource + ?Sized,
    K: ResultSink + ?Sized,
{
    config.validate()?;
    let run_id = run_id(as_of, config.lookback_days);
    info!("Starting run {} ({:?})", run_id, stages);

    let loaded = load_documents(source, config.lookback_days, as_of).await?;

    let reprints = if stages.reprints() {
        let snapshot = detect_reprints(&loaded.documents, &config.reprint, run_id.clone(), as_of)?;
        sink.upsert_reprint_snapshot(&snapshot).await?;
        Some(ReprintSummary {
            events: snapshot.event_count,
            reprint_rate: snapshot.global.reprint_rate,
            near_threshold_pairs: snapshot.near_threshold_pairs.len(),
            threshold: snapshot.threshold,
        })
    } else {
        None
    };

    let trends = if stages.trends() {
        let output = detect_trends(&loaded.dated, config, as_of, as_of)
            .context("trend detection failed")?;
        let daily_rows = sink.upsert_daily_points(&output.daily).await?;
        let burst_keywords = sink.upsert_burst_keywords(&output.bursts).await?;
        sink.upsert_weekly_report(&output.weekly).await?;
        Some(TrendSummary {
            groups: output.group_count(),
            daily_rows,
            spike_days: output.daily.iter().filter(|p| p.is_spike).count(),
            burst_keywords,
            week_start: output.weekly.week_start,
            spikes_this_week: output.weekly.spikes.len(),
        })
    } else {
        None
    };

    info!("Finished run {}", run_id);
    Ok(RunSummary {
        run_id,
        as_of,
        lookback_days: config.lookback_days,
        documents: loaded.len(),
        dated_documents: loaded.dated.len(),
        skipped: loaded.skipped,
        reprints,
        trends,
    })
}
