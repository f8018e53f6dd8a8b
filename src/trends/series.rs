use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::stl::{decompose, StlParams};
use crate::config::{GroupBy, TrendConfig};
use crate::document::Document;
use crate::TARGET_TRENDS;

/// Period of the weekly seasonality.
const WEEK: usize = 7;

/// One zero-filled day of one group's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub group_key: String,
    pub date: NaiveDate,
    pub count: usize,
    pub ma: f64,
    pub adj_count: f64,
    /// `None` when the residual is not finite.
    pub resid: Option<f64>,
    pub is_spike: bool,
}

/// Calendar date of an instant at a fixed offset.
pub fn local_date(ts: DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    ts.with_timezone(offset).date_naive()
}

/// Inclusive range of calendar dates shared by every group's series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `lookback_days` calendar dates ending on the date of `as_of`.
    pub fn for_window(as_of: DateTime<Utc>, lookback_days: i64, offset: &FixedOffset) -> Self {
        let end = local_date(as_of, offset);
        let start = end - Duration::days((lookback_days - 1).max(0));
        Self { start, end }
    }

    /// Widens the range so it covers `date`.
    pub fn include(&mut self, date: NaiveDate) {
        self.start = self.start.min(date);
        self.end = self.end.max(date);
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }
}

/// Per-group document counts keyed by local date.
pub fn daily_counts(
    documents: &[Document],
    group_by: GroupBy,
    offset: &FixedOffset,
) -> BTreeMap<String, BTreeMap<NaiveDate, usize>> {
    let mut counts: BTreeMap<String, BTreeMap<NaiveDate, usize>> = BTreeMap::new();
    for d in documents {
        *counts
            .entry(d.group_key(group_by).to_string())
            .or_default()
            .entry(local_date(d.published_at, offset))
            .or_insert(0) += 1;
    }
    counts
}

/// Builds the zero-filled daily series of every group over `range` and flags
/// each group's spike days against that group's own threshold.
pub fn build_daily_series(
    counts: &BTreeMap<String, BTreeMap<NaiveDate, usize>>,
    range: &DateRange,
    config: &TrendConfig,
) -> Vec<DailyPoint> {
    let dates = range.dates();
    let mut points = Vec::with_capacity(counts.len() * dates.len());
    for (group_key, per_day) in counts {
        let series: Vec<usize> = dates
            .iter()
            .map(|d| per_day.get(d).copied().unwrap_or(0))
            .collect();
        points.extend(analyze_series(group_key, &dates, &series, config));
    }
    points
}

/// Moving average, weekday adjustment, residual and spike flag for one group.
pub fn analyze_series(
    group_key: &str,
    dates: &[NaiveDate],
    counts: &[usize],
    config: &TrendConfig,
) -> Vec<DailyPoint> {
    let raw: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    let ma = trailing_mean(&raw, config.ma_window);

    let adj = match weekday_effect(dates, &raw) {
        Ok(effect) => raw.iter().zip(&effect).map(|(c, e)| c - e).collect(),
        Err(e) => {
            warn!(
                target: TARGET_TRENDS,
                "Weekday adjustment failed for group {}: {}; using raw counts",
                group_key,
                e
            );
            raw.clone()
        }
    };

    let resid = if adj.len() >= config.min_series_len {
        match decompose(&adj, &StlParams::robust(WEEK)) {
            Ok(d) => d.resid,
            Err(e) => {
                warn!(
                    target: TARGET_TRENDS,
                    "STL failed for group {}: {}; using moving-average residual",
                    group_key,
                    e
                );
                fallback_residual(&adj, config.ma_window)
            }
        }
    } else {
        debug!(
            target: TARGET_TRENDS,
            "Group {} has {} points, below {} needed for STL",
            group_key,
            adj.len(),
            config.min_series_len
        );
        fallback_residual(&adj, config.ma_window)
    };

    let finite: Vec<f64> = resid.iter().copied().filter(|r| r.is_finite()).collect();
    let threshold = quantile(&finite, config.spike_quantile);

    dates
        .iter()
        .enumerate()
        .map(|(i, &date)| {
            let r = Some(resid[i]).filter(|r| r.is_finite());
            DailyPoint {
                group_key: group_key.to_string(),
                date,
                count: counts[i],
                ma: ma[i],
                adj_count: adj[i],
                resid: r,
                is_spike: matches!((r, threshold), (Some(r), Some(t)) if r >= t),
            }
        })
        .collect()
}

/// Trailing mean over up to `window` values, so the first points average
/// whatever history exists.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= window {
            sum -= values[i - window];
        }
        out.push(sum / (i + 1).min(window) as f64);
    }
    out
}

/// Day-of-week effect of `values`, centered to zero mean.
///
/// The least-squares fit of a value on one indicator per weekday is the mean of
/// that weekday's values, so no matrix solve is needed.
pub fn weekday_effect(dates: &[NaiveDate], values: &[f64]) -> Result<Vec<f64>> {
    if dates.len() != values.len() {
        bail!("{} dates for {} values", dates.len(), values.len());
    }
    let mut sums = [0.0_f64; 7];
    let mut counts = [0_usize; 7];
    for (d, v) in dates.iter().zip(values) {
        let wd = d.weekday().num_days_from_monday() as usize;
        sums[wd] += v;
        counts[wd] += 1;
    }
    let fitted: Vec<f64> = dates
        .iter()
        .map(|d| {
            let wd = d.weekday().num_days_from_monday() as usize;
            sums[wd] / counts[wd] as f64
        })
        .collect();
    if fitted.is_empty() {
        return Ok(fitted);
    }
    let mean = fitted.iter().sum::<f64>() / fitted.len() as f64;
    let effect: Vec<f64> = fitted.iter().map(|f| f - mean).collect();
    if effect.iter().any(|e| !e.is_finite()) {
        bail!("weekday fit is not finite");
    }
    Ok(effect)
}

/// `values` minus their own trailing mean.
pub fn fallback_residual(values: &[f64], window: usize) -> Vec<f64> {
    trailing_mean(values, window)
        .iter()
        .zip(values)
        .map(|(m, v)| v - m)
        .collect()
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo]))
}
