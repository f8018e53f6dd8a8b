use chrono::Duration;
use std::collections::BTreeMap;
use tracing::debug;

use super::union_find::UnionFind;
use crate::config::ReprintConfig;
use crate::document::Document;
use crate::vector::Neighbor;
use crate::TARGET_REPRINT;

/// Raw grouper output, in document indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    /// Components of size >= 2, members ascending by publication time,
    /// largest component first.
    pub events: Vec<Vec<usize>>,
    /// `(a, b, similarity)` with `a < b`, each unordered pair once.
    pub near_pairs: Vec<(usize, usize, f32)>,
}

/// Partitions documents into reprint groups.
///
/// A neighbour pair is only considered when both documents fall within
/// `window_hours` of each other. Inside the window, pairs at or above
/// `threshold` are merged and pairs in `[lower_bound, threshold)` are set
/// aside for review.
pub fn group_events(
    documents: &[Document],
    neighbors: &[Vec<Neighbor>],
    config: &ReprintConfig,
) -> Grouping {
    let n = documents.len();
    let window = Duration::hours(config.window_hours);
    let mut uf = UnionFind::new(n);
    let mut near: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    let mut out_of_window = 0usize;

    for (i, hits) in neighbors.iter().enumerate().take(n) {
        let ti = documents[i].published_at;
        for hit in hits {
            let j = hit.index;
            if j >= n || j == i {
                continue;
            }
            let tj = documents[j].published_at;
            let t0 = ti.min(tj);
            if ti.max(tj) - t0 > window {
                out_of_window += 1;
                continue;
            }

            let s = hit.similarity;
            if s >= config.threshold {
                uf.union(i, j);
            } else if s >= config.lower_bound {
                near.entry((i.min(j), i.max(j)))
                    .and_modify(|best| *best = best.max(s))
                    .or_insert(s);
            }
        }
    }
    debug!(
        target: TARGET_REPRINT,
        "Discarded {} neighbour pairs outside the {}h window", out_of_window, config.window_hours
    );

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let root = uf.find(i);
        components.entry(root).or_default().push(i);
    }

    let mut events: Vec<Vec<usize>> = components
        .into_values()
        .filter(|members| members.len() > 1)
        .map(|mut members| {
            members.sort_by(|&a, &b| {
                documents[a]
                    .published_at
                    .cmp(&documents[b].published_at)
                    .then_with(|| a.cmp(&b))
            });
            members
        })
        .collect();
    events.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    Grouping {
        events,
        near_pairs: near.into_iter().map(|((a, b), s)| (a, b, s)).collect(),
    }
}
