//! Reprint detection: near-duplicate articles merged into events.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::info;

use crate::config::ReprintConfig;
use crate::document::Document;
use crate::vector::{build_index, search_all};
use crate::TARGET_REPRINT;

pub mod grouping;
pub mod stats;
#[cfg(test)]
mod tests;
pub mod types;
pub mod union_find;

pub use grouping::{group_events, Grouping};
pub use stats::{event_stats, global_stats};
pub use types::*;
pub use union_find::UnionFind;

/// Stable key of a run: the snapshot's end instant plus its window length.
pub fn run_id(as_of: DateTime<Utc>, lookback_days: i64) -> String {
    format!(
        "{}/{}d",
        as_of.to_rfc3339_opts(SecondsFormat::Secs, true),
        lookback_days
    )
}

/// Runs index, grouping and statistics over one snapshot.
///
/// `documents` must be sorted by publication time. An empty slice is not an
/// error; it produces a snapshot with no events.
pub fn detect_reprints(
    documents: &[Document],
    config: &ReprintConfig,
    run_id: String,
    created_at: DateTime<Utc>,
) -> Result<ReprintSnapshot> {
    let grouping = if documents.is_empty() {
        info!(target: TARGET_REPRINT, "No embeddings in snapshot, nothing to cluster");
        Grouping::default()
    } else {
        let embeddings: Vec<Vec<f32>> = documents.iter().map(|d| d.embedding.clone()).collect();
        let index = build_index(&embeddings, config)?;
        let neighbors = search_all(index.as_ref(), config.neighbors);
        group_events(documents, &neighbors, config)
    };

    let events: Vec<ReprintEvent> = grouping
        .events
        .iter()
        .map(|members| event_stats(members, documents))
        .collect();
    let global = global_stats(&grouping.events, documents.len(), documents);

    let near_threshold_pairs: Vec<NearThresholdPair> = grouping
        .near_pairs
        .iter()
        .map(|&(a, b, s)| NearThresholdPair {
            a_id: documents[a].id.clone(),
            b_id: documents[b].id.clone(),
            similarity: (s * 10_000.0).round() / 10_000.0,
            a_title: documents[a].title.clone(),
            b_title: documents[b].title.clone(),
        })
        .collect();

    info!(
        target: TARGET_REPRINT,
        "events={} reprint_rate={:.3} near_threshold_pairs={}",
        events.len(),
        global.reprint_rate,
        near_threshold_pairs.len()
    );
    for e in events.iter().take(config.top_n) {
        info!(
            target: TARGET_REPRINT,
            "  size={:>2} avg_delay_h={:.1} outlet_div={} first={} {}",
            e.size,
            e.avg_delay_hours,
            e.outlet_diversity,
            e.first_outlet,
            e.first_published_at.to_rfc3339()
        );
    }

    Ok(ReprintSnapshot {
        run_id,
        created_at,
        backend: config.backend,
        threshold: config.threshold,
        lower_bound: config.lower_bound,
        window_hours: config.window_hours,
        documents_considered: documents.len(),
        event_count: events.len(),
        global,
        top_events: events.into_iter().take(config.top_n).collect(),
        near_threshold_pairs,
    })
}
