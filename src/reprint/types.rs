use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::IndexBackend;

/// A reprint group: two or more documents judged to carry the same story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprintEvent {
    pub size: usize,
    pub first_article_id: String,
    pub first_outlet: String,
    pub first_published_at: DateTime<Utc>,
    /// Mean hours from the first article to each follower.
    pub avg_delay_hours: f64,
    /// Distinct outlets among all members, the first included.
    pub outlet_diversity: usize,
    pub outlet_counts: BTreeMap<String, usize>,
    /// Ascending by publication time.
    pub member_ids: Vec<String>,
    pub titles_sample: Vec<String>,
}

/// A pair in the gray zone `[lower_bound, threshold)`: not merged, kept for
/// secondary review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearThresholdPair {
    pub a_id: String,
    pub b_id: String,
    pub similarity: f32,
    pub a_title: String,
    pub b_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutletCount {
    pub outlet: String,
    pub count: usize,
}

/// Run-wide reprint statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Followers over all documents considered.
    pub reprint_rate: f64,
    pub events: usize,
    pub first_outlet_top: Vec<OutletCount>,
    pub follower_outlet_top: Vec<OutletCount>,
}

/// Everything one grouping run persists, keyed by `run_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprintSnapshot {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub backend: IndexBackend,
    pub threshold: f32,
    pub lower_bound: f32,
    pub window_hours: i64,
    pub documents_considered: usize,
    pub event_count: usize,
    pub global: GlobalStats,
    pub top_events: Vec<ReprintEvent>,
    pub near_threshold_pairs: Vec<NearThresholdPair>,
}
