use anyhow::{anyhow, bail, Result};
use chrono::{FixedOffset, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::environment::{get_env_flag, get_env_var_or};

/// Auto-merge threshold in normal mode.
pub const DEFAULT_THRESHOLD: f32 = 0.88;
/// Auto-merge threshold in strict mode.
pub const STRICT_THRESHOLD: f32 = 0.90;
/// Lower bound of the near-threshold gray zone.
pub const DEFAULT_LOWER_BOUND: f32 = 0.86;
pub const DEFAULT_WINDOW_HOURS: i64 = 72;
pub const DEFAULT_NEIGHBORS: usize = 50;
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 50;
/// Calendar days are cut in KST unless configured otherwise.
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 9;

/// Which similarity index implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Brute-force inner product over normalized vectors
    Exact,
    /// Random-projection tree forest over angular distance
    Forest,
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBackend::Exact => write!(f, "exact"),
            IndexBackend::Forest => write!(f, "forest"),
        }
    }
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" | "flat" | "brute" => Ok(IndexBackend::Exact),
            "forest" | "annoy" | "approximate" => Ok(IndexBackend::Forest),
            other => Err(format!("unknown index backend '{}'", other)),
        }
    }
}

/// Which pre-existing assignment a document's trend group comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    /// Prefer `cluster_id`, then `topic_key`
    Cluster,
    /// Prefer `topic_key`, then `cluster_id`
    Topic,
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Cluster => write!(f, "cluster"),
            GroupBy::Topic => write!(f, "topic"),
        }
    }
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" => Ok(GroupBy::Cluster),
            "topic" => Ok(GroupBy::Topic),
            other => Err(format!("unknown group-by '{}'", other)),
        }
    }
}

/// Parameters of the similarity index and the event grouper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReprintConfig {
    pub threshold: f32,
    pub lower_bound: f32,
    pub window_hours: i64,
    pub neighbors: usize,
    pub top_n: usize,
    pub backend: IndexBackend,
    pub forest_trees: usize,
    pub forest_seed: u64,
}

impl ReprintConfig {
    pub fn new(strict: bool) -> Self {
        Self {
            threshold: if strict {
                STRICT_THRESHOLD
            } else {
                DEFAULT_THRESHOLD
            },
            ..Self::default()
        }
    }
}

impl Default for ReprintConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            lower_bound: DEFAULT_LOWER_BOUND,
            window_hours: DEFAULT_WINDOW_HOURS,
            neighbors: DEFAULT_NEIGHBORS,
            top_n: DEFAULT_TOP_N,
            backend: IndexBackend::Exact,
            forest_trees: 50,
            forest_seed: 42,
        }
    }
}

/// Parameters of the daily series, spike detection and weekly report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    pub group_by: GroupBy,
    pub ma_window: usize,
    pub min_series_len: usize,
    pub spike_quantile: f64,
    pub week_start: Weekday,
    pub top_articles_per_spike: usize,
    pub surge_ratio: f64,
    /// Surging also needs a spike day this week. Kept as a switch because the
    /// conjunction is a policy choice, not a statistical necessity.
    pub surge_requires_spike: bool,
    /// Days before the week that must be quiet for a group to count as new.
    pub new_lookback_days: i64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            group_by: GroupBy::Cluster,
            ma_window: 7,
            min_series_len: 21,
            spike_quantile: 0.95,
            week_start: Weekday::Mon,
            top_articles_per_spike: 3,
            surge_ratio: 2.0,
            surge_requires_spike: true,
            new_lookback_days: 30,
        }
    }
}

/// Maps an ISO weekday number (1 = Monday .. 7 = Sunday) to a `Weekday`.
pub fn weekday_from_iso(number: u32) -> Result<Weekday> {
    const WEEK: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    match number {
        1..=7 => Ok(WEEK[number as usize - 1]),
        other => bail!("ISO weekday must be between 1 and 7, got {}", other),
    }
}

/// Parameters of keyword burst detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    pub baseline_days: i64,
    pub smoothing: f64,
    pub top_n: usize,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            baseline_days: 7,
            smoothing: 0.5,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// Every tunable of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub lookback_days: i64,
    pub utc_offset_hours: i32,
    pub reprint: ReprintConfig,
    pub trends: TrendConfig,
    pub burst: BurstConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            reprint: ReprintConfig::default(),
            trends: TrendConfig::default(),
            burst: BurstConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Builds a configuration from the environment, using the defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let mut reprint = ReprintConfig::new(get_env_flag("REPRINT_STRICT"));
        reprint.window_hours = get_env_var_or("REPRINT_WINDOW_H", reprint.window_hours)?;
        reprint.top_n = get_env_var_or("REPRINT_TOP_N", reprint.top_n)?;
        reprint.neighbors = get_env_var_or("REPRINT_K", reprint.neighbors)?;
        reprint.lower_bound = get_env_var_or("REPRINT_LOWER_BOUND", reprint.lower_bound)?;
        reprint.backend = get_env_var_or("REPRINT_BACKEND", reprint.backend)?;

        let mut trends = TrendConfig::default();
        trends.group_by = get_env_var_or("TRENDS_GROUP_BY", trends.group_by)?;
        trends.ma_window = get_env_var_or("TRENDS_MA_WINDOW", trends.ma_window)?;
        trends.min_series_len = get_env_var_or("TRENDS_MIN_SERIES_LEN", trends.min_series_len)?;
        trends.spike_quantile = get_env_var_or("TRENDS_SPIKE_UPPER_Q", trends.spike_quantile)?;
        trends.top_articles_per_spike =
            get_env_var_or("TRENDS_TOP_ARTS", trends.top_articles_per_spike)?;
        trends.new_lookback_days =
            get_env_var_or("TRENDS_NEW_LOOKBACK_DAYS", trends.new_lookback_days)?;
        trends.week_start = weekday_from_iso(get_env_var_or(
            "TRENDS_WEEK_START_ISO",
            trends.week_start.number_from_monday(),
        )?)?;

        let mut burst = BurstConfig::default();
        burst.smoothing = get_env_var_or("BURST_SMOOTHING", burst.smoothing)?;
        burst.top_n = get_env_var_or("BURST_TOP_N", burst.top_n)?;

        let config = Self {
            lookback_days: get_env_var_or("TRENDS_LOOKBACK_DAYS", defaults.lookback_days)?,
            utc_offset_hours: get_env_var_or(
                "PIPELINE_UTC_OFFSET_HOURS",
                defaults.utc_offset_hours,
            )?,
            reprint,
            trends,
            burst,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations no run could sensibly use.
    pub fn validate(&self) -> Result<()> {
        let r = &self.reprint;
        if !(-1.0..=1.0).contains(&r.threshold) || !(-1.0..=1.0).contains(&r.lower_bound) {
            bail!(
                "similarity thresholds must lie in [-1, 1] (threshold={}, lower_bound={})",
                r.threshold,
                r.lower_bound
            );
        }
        if r.lower_bound > r.threshold {
            bail!(
                "lower bound {} is above the merge threshold {}",
                r.lower_bound,
                r.threshold
            );
        }
        if r.window_hours <= 0 {
            bail!("reprint window must be positive, got {}h", r.window_hours);
        }
        if r.neighbors == 0 {
            bail!("neighbor count k must be at least 1");
        }
        if r.backend == IndexBackend::Forest && r.forest_trees == 0 {
            bail!("forest backend needs at least one tree");
        }
        if self.lookback_days <= 0 {
            bail!("lookback window must be positive, got {} days", self.lookback_days);
        }
        let t = &self.trends;
        if !(0.0..=1.0).contains(&t.spike_quantile) {
            bail!("spike quantile must lie in [0, 1], got {}", t.spike_quantile);
        }
        if t.ma_window == 0 {
            bail!("moving-average window must be at least 1");
        }
        if t.new_lookback_days <= 0 {
            bail!("new-group lookback must be positive, got {} days", t.new_lookback_days);
        }
        if t.surge_ratio <= 0.0 {
            bail!("surge ratio must be positive, got {}", t.surge_ratio);
        }
        if self.burst.smoothing <= 0.0 || !self.burst.smoothing.is_finite() {
            bail!("burst smoothing must be positive, got {}", self.burst.smoothing);
        }
        if self.burst.baseline_days <= 0 {
            bail!("burst baseline must cover at least one day");
        }
        self.offset()?;
        Ok(())
    }

    /// The fixed offset used to cut timestamps into calendar days.
    pub fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .ok_or_else(|| anyhow!("invalid UTC offset {}h", self.utc_offset_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reprint.threshold, 0.88);
        assert_eq!(config.reprint.lower_bound, 0.86);
        assert_eq!(config.reprint.window_hours, 72);
        assert_eq!(config.reprint.neighbors, 50);
        assert_eq!(config.trends.spike_quantile, 0.95);
        assert_eq!(config.burst.smoothing, 0.5);
    }

    #[test]
    fn test_strict_mode_raises_threshold() {
        assert_eq!(ReprintConfig::new(true).threshold, 0.90);
        assert_eq!(ReprintConfig::new(false).threshold, 0.88);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = PipelineConfig::default();
        config.reprint.lower_bound = 0.95;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.utc_offset_hours = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("annoy".parse::<IndexBackend>(), Ok(IndexBackend::Forest));
        assert_eq!("Exact".parse::<IndexBackend>(), Ok(IndexBackend::Exact));
        assert!("faiss-gpu".parse::<IndexBackend>().is_err());
        assert_eq!("topic".parse::<GroupBy>(), Ok(GroupBy::Topic));
    }

    #[test]
    fn test_weekday_from_iso() {
        assert_eq!(weekday_from_iso(1).unwrap(), Weekday::Mon);
        assert_eq!(weekday_from_iso(4).unwrap(), Weekday::Thu);
        assert_eq!(weekday_from_iso(7).unwrap(), Weekday::Sun);
        assert!(weekday_from_iso(0).is_err());
        assert!(weekday_from_iso(8).is_err());
        assert_eq!(
            weekday_from_iso(TrendConfig::default().week_start.number_from_monday()).unwrap(),
            Weekday::Mon
        );
    }

    #[test]
    fn test_week_start_and_new_lookback_from_env() {
        std::env::set_var("TRENDS_WEEK_START_ISO", "7");
        std::env::set_var("TRENDS_NEW_LOOKBACK_DAYS", "14");
        let config = PipelineConfig::from_env();
        std::env::remove_var("TRENDS_WEEK_START_ISO");
        std::env::remove_var("TRENDS_NEW_LOOKBACK_DAYS");

        let config = config.unwrap();
        assert_eq!(config.trends.week_start, Weekday::Sun);
        assert_eq!(config.trends.new_lookback_days, 14);

        let mut config = PipelineConfig::default();
        config.trends.new_lookback_days = 0;
        assert!(config.validate().is_err());
    }
}
