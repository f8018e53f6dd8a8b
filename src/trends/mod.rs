//! Trend and burst detection over a document snapshot.
//!
//! Three outputs come out of one pass: per-group daily series with spike
//! flags, per-day keyword bursts, and a report for the week containing the
//! run's `as_of` instant.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::document::Document;
use crate::TARGET_TRENDS;

pub mod burst;
pub mod series;
pub mod stl;
pub mod weekly;

pub use burst::{detect_bursts, tokenize, BurstKeyword};
pub use series::{build_daily_series, daily_counts, local_date, DailyPoint, DateRange};
pub use weekly::{
    weekly_report, GroupWeekSummary, ReportContext, RepresentativeArticle, SpikeExplanation,
    WeeklyCategories, WeeklyParams, WeeklyReport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendOutput {
    pub daily: Vec<DailyPoint>,
    pub bursts: Vec<BurstKeyword>,
    pub weekly: WeeklyReport,
}

impl TrendOutput {
    pub fn group_count(&self) -> usize {
        let mut keys: Vec<&str> = self.daily.iter().map(|p| p.group_key.as_str()).collect();
        keys.dedup();
        keys.len()
    }
}

/// Runs every trend stage over `documents`.
///
/// An empty snapshot yields empty series, no bursts and a report with empty
/// categories.
pub fn detect_trends(
    documents: &[Document],
    config: &PipelineConfig,
    as_of: DateTime<Utc>,
    generated_at: DateTime<Utc>,
) -> Result<TrendOutput> {
    let offset = config.offset()?;

    let counts = daily_counts(documents, config.trends.group_by, &offset);
    let mut range = DateRange::for_window(as_of, config.lookback_days, &offset);
    for per_day in counts.values() {
        if let (Some((&first, _)), Some((&last, _))) =
            (per_day.first_key_value(), per_day.last_key_value())
        {
            range.include(first);
            range.include(last);
        }
    }

    let daily = if documents.is_empty() {
        info!(target: TARGET_TRENDS, "No documents in snapshot, daily series left empty");
        Vec::new()
    } else {
        build_daily_series(&counts, &range, &config.trends)
    };
    let spike_days = daily.iter().filter(|p| p.is_spike).count();

    let bursts = detect_bursts(documents, &config.burst, &offset);

    let ctx = ReportContext {
        as_of,
        generated_at,
        offset: &offset,
        lookback_days: config.lookback_days,
        config: &config.trends,
    };
    let weekly = weekly_report(documents, &daily, &ctx);

    info!(
        target: TARGET_TRENDS,
        "groups={} daily_rows={} spike_days={} burst_keywords={} week_start={} new={} surging={} fading={} spikes_this_week={}",
        counts.len(),
        daily.len(),
        spike_days,
        bursts.len(),
        weekly.week_start,
        weekly.categories.new.len(),
        weekly.categories.surging.len(),
        weekly.categories.fading.len(),
        weekly.spikes.len()
    );

    Ok(TrendOutput {
        daily,
        bursts,
        weekly,
    })
}
