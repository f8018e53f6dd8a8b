use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::types::{GlobalStats, OutletCount, ReprintEvent};
use crate::document::Document;

/// How many titles an event carries for quick inspection.
const TITLES_SAMPLE: usize = 3;
/// Length of the first-reporter and follower outlet rankings.
const TOP_OUTLETS: usize = 10;

/// Summarizes one component. `members` must be non-empty and ordered by
/// publication time.
pub fn event_stats(members: &[usize], documents: &[Document]) -> ReprintEvent {
    let first = &documents[members[0]];

    let delays: Vec<f64> = members[1..]
        .iter()
        .map(|&i| {
            (documents[i].published_at - first.published_at).num_milliseconds() as f64
                / 3_600_000.0
        })
        .collect();
    let avg_delay_hours = if delays.is_empty() {
        0.0
    } else {
        delays.iter().sum::<f64>() / delays.len() as f64
    };

    let mut outlet_counts: BTreeMap<String, usize> = BTreeMap::new();
    for &i in members {
        *outlet_counts.entry(documents[i].outlet.clone()).or_insert(0) += 1;
    }
    let outlet_diversity = members
        .iter()
        .map(|&i| documents[i].outlet.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    ReprintEvent {
        size: members.len(),
        first_article_id: first.id.clone(),
        first_outlet: first.outlet.clone(),
        first_published_at: first.published_at,
        avg_delay_hours,
        outlet_diversity,
        outlet_counts,
        member_ids: members.iter().map(|&i| documents[i].id.clone()).collect(),
        titles_sample: members
            .iter()
            .take(TITLES_SAMPLE)
            .map(|&i| documents[i].title.clone())
            .collect(),
    }
}

/// Run-wide statistics over every event, not just the persisted top-N.
pub fn global_stats(
    events: &[Vec<usize>],
    total_documents: usize,
    documents: &[Document],
) -> GlobalStats {
    let reprinted: usize = events.iter().map(|e| e.len().saturating_sub(1)).sum();

    let mut first_outlets: HashMap<&str, usize> = HashMap::new();
    let mut follower_outlets: HashMap<&str, usize> = HashMap::new();
    for event in events {
        let Some((&first, followers)) = event.split_first() else {
            continue;
        };
        *first_outlets.entry(documents[first].outlet.as_str()).or_insert(0) += 1;
        for &i in followers {
            *follower_outlets.entry(documents[i].outlet.as_str()).or_insert(0) += 1;
        }
    }

    GlobalStats {
        reprint_rate: reprinted as f64 / total_documents.max(1) as f64,
        events: events.len(),
        first_outlet_top: most_common(first_outlets, TOP_OUTLETS),
        follower_outlet_top: most_common(follower_outlets, TOP_OUTLETS),
    }
}

/// Count descending, outlet name ascending on ties.
fn most_common(counts: HashMap<&str, usize>, n: usize) -> Vec<OutletCount> {
    let mut ranked: Vec<OutletCount> = counts
        .into_iter()
        .map(|(outlet, count)| OutletCount {
            outlet: outlet.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.outlet.cmp(&b.outlet)));
    ranked.truncate(n);
    ranked
}
