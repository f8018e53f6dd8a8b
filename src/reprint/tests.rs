use chrono::{DateTime, Duration, TimeZone, Utc};

use super::*;
use crate::config::{IndexBackend, ReprintConfig};
use crate::document::Document;
use crate::vector::Neighbor;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 6, 0, 0, 0).unwrap()
}

fn doc(id: &str, hours: i64, outlet: &str, embedding: Vec<f32>) -> Document {
    Document {
        id: id.to_string(),
        url: format!("https://news.example/{}", id),
        title: format!("title {}", id),
        outlet: outlet.to_string(),
        published_at: t0() + Duration::hours(hours),
        embedding,
        cluster_id: None,
        cluster_label: None,
        topic_key: None,
        content_len: 0,
    }
}

/// Unit vector with cosine `cos` to `e0`, the remainder on axis `axis`.
fn at_cos(cos: f32, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; 6];
    v[0] = cos;
    v[axis] = (1.0 - cos * cos).sqrt();
    v
}

fn hit(index: usize, similarity: f32) -> Neighbor {
    Neighbor { index, similarity }
}

/// A, B, C, D, E sorted by time: A 0h, D 1h, B 2h, C 80h, E 500h.
fn scenario_documents() -> Vec<Document> {
    let mut e = vec![0.0; 6];
    e[5] = 1.0;
    let mut a = vec![0.0; 6];
    a[0] = 1.0;
    vec![
        doc("A", 0, "X", a),
        doc("D", 1, "W", at_cos(0.87, 3)),
        doc("B", 2, "Y", at_cos(0.95, 1)),
        doc("C", 80, "Z", at_cos(0.95, 2)),
        doc("E", 500, "V", e),
    ]
}

#[test]
fn test_end_to_end_scenario() {
    let docs = scenario_documents();
    let config = ReprintConfig::default();
    let snapshot = detect_reprints(&docs, &config, run_id(t0(), 30), t0()).unwrap();

    assert_eq!(snapshot.event_count, 1);
    let event = &snapshot.top_events[0];
    assert_eq!(event.member_ids, vec!["A", "B"]);
    assert_eq!(event.first_article_id, "A");
    assert_eq!(event.first_outlet, "X");
    assert!((event.avg_delay_hours - 2.0).abs() < 1e-9);
    assert_eq!(event.outlet_diversity, 2);

    assert_eq!(snapshot.near_threshold_pairs.len(), 1);
    let pair = &snapshot.near_threshold_pairs[0];
    assert_eq!((pair.a_id.as_str(), pair.b_id.as_str()), ("A", "D"));
    assert!((pair.similarity - 0.87).abs() < 1e-4);

    assert_eq!(snapshot.documents_considered, 5);
    assert!((snapshot.global.reprint_rate - 0.2).abs() < 1e-9);
    assert_eq!(snapshot.global.first_outlet_top[0].outlet, "X");
    assert_eq!(snapshot.global.follower_outlet_top[0].outlet, "Y");
}

#[test]
fn test_forest_backend_matches_scenario() {
    let docs = scenario_documents();
    let config = ReprintConfig {
        backend: IndexBackend::Forest,
        ..ReprintConfig::default()
    };
    let snapshot = detect_reprints(&docs, &config, run_id(t0(), 30), t0()).unwrap();
    assert_eq!(snapshot.backend, IndexBackend::Forest);
    assert_eq!(snapshot.event_count, 1);
    assert_eq!(snapshot.top_events[0].member_ids, vec!["A", "B"]);
    assert_eq!(snapshot.near_threshold_pairs.len(), 1);
}

#[test]
fn test_transitivity_regardless_of_order() {
    // sim(A,B) and sim(B,C) above threshold, A and C never compared.
    let docs = vec![
        doc("A", 0, "X", vec![1.0]),
        doc("B", 1, "Y", vec![1.0]),
        doc("C", 2, "Z", vec![1.0]),
    ];
    let config = ReprintConfig::default();

    let forward = vec![vec![hit(1, 0.9)], vec![hit(2, 0.9)], vec![]];
    let backward = vec![vec![], vec![hit(0, 0.9)], vec![hit(1, 0.9)]];
    for neighbors in [forward, backward] {
        let grouping = group_events(&docs, &neighbors, &config);
        assert_eq!(grouping.events, vec![vec![0, 1, 2]]);
    }
}

#[test]
fn test_time_window_beats_identical_embeddings() {
    let docs = vec![
        doc("A", 0, "X", vec![1.0, 0.0]),
        doc("B", 73, "Y", vec![1.0, 0.0]),
    ];
    let snapshot =
        detect_reprints(&docs, &ReprintConfig::default(), run_id(t0(), 7), t0()).unwrap();
    assert_eq!(snapshot.event_count, 0);
    assert!(snapshot.near_threshold_pairs.is_empty());

    // Exactly on the window edge is still inside.
    let docs = vec![
        doc("A", 0, "X", vec![1.0, 0.0]),
        doc("B", 72, "Y", vec![1.0, 0.0]),
    ];
    let snapshot =
        detect_reprints(&docs, &ReprintConfig::default(), run_id(t0(), 7), t0()).unwrap();
    assert_eq!(snapshot.event_count, 1);
}

#[test]
fn test_singletons_discarded() {
    let docs = vec![
        doc("A", 0, "X", vec![1.0, 0.0, 0.0]),
        doc("B", 1, "Y", vec![0.0, 1.0, 0.0]),
        doc("C", 2, "Z", vec![0.0, 0.0, 1.0]),
    ];
    let snapshot =
        detect_reprints(&docs, &ReprintConfig::default(), run_id(t0(), 7), t0()).unwrap();
    assert_eq!(snapshot.event_count, 0);
    assert!(snapshot.top_events.is_empty());
    assert_eq!(snapshot.global.reprint_rate, 0.0);
}

#[test]
fn test_gray_zone_pairs_reported_once_and_not_merged() {
    let docs = vec![doc("A", 0, "X", vec![1.0]), doc("B", 1, "Y", vec![1.0])];
    let neighbors = vec![vec![hit(1, 0.87)], vec![hit(0, 0.87)]];
    let grouping = group_events(&docs, &neighbors, &ReprintConfig::default());
    assert!(grouping.events.is_empty());
    assert_eq!(grouping.near_pairs, vec![(0, 1, 0.87)]);

    // Below the lower bound: ignored altogether.
    let neighbors = vec![vec![hit(1, 0.85)], vec![]];
    let grouping = group_events(&docs, &neighbors, &ReprintConfig::default());
    assert!(grouping.near_pairs.is_empty());
}

#[test]
fn test_strict_mode_leaves_089_in_gray_zone() {
    let docs = vec![doc("A", 0, "X", vec![1.0]), doc("B", 1, "Y", vec![1.0])];
    let neighbors = vec![vec![hit(1, 0.89)], vec![]];
    let normal = group_events(&docs, &neighbors, &ReprintConfig::new(false));
    let strict = group_events(&docs, &neighbors, &ReprintConfig::new(true));
    assert_eq!(normal.events.len(), 1);
    assert!(strict.events.is_empty());
    assert_eq!(strict.near_pairs.len(), 1);
}

#[test]
fn test_events_sorted_by_size_and_top_n_applied() {
    let docs: Vec<Document> = (0..7)
        .map(|i| doc(&format!("d{}", i), i, &format!("o{}", i % 2), vec![1.0]))
        .collect();
    // {0,1}, {2,3,4}, {5,6}
    let neighbors = vec![
        vec![hit(1, 0.99)],
        vec![],
        vec![hit(3, 0.99), hit(4, 0.99)],
        vec![],
        vec![],
        vec![hit(6, 0.99)],
        vec![],
    ];
    let grouping = group_events(&docs, &neighbors, &ReprintConfig::default());
    assert_eq!(grouping.events, vec![vec![2, 3, 4], vec![0, 1], vec![5, 6]]);

    let global = global_stats(&grouping.events, docs.len(), &docs);
    assert_eq!(global.events, 3);
    assert!((global.reprint_rate - 4.0 / 7.0).abs() < 1e-9);

    let event = event_stats(&grouping.events[0], &docs);
    assert_eq!(event.size, 3);
    assert!((event.avg_delay_hours - 1.5).abs() < 1e-9);
    assert_eq!(event.outlet_counts.get("o0"), Some(&2));
    assert_eq!(event.titles_sample.len(), 3);
}

#[test]
fn test_empty_snapshot_is_not_an_error() {
    let snapshot = detect_reprints(&[], &ReprintConfig::default(), run_id(t0(), 7), t0()).unwrap();
    assert_eq!(snapshot.event_count, 0);
    assert_eq!(snapshot.documents_considered, 0);
    assert_eq!(snapshot.global.reprint_rate, 0.0);
}

#[test]
fn test_run_id_is_stable() {
    assert_eq!(run_id(t0(), 50), "2025-10-06T00:00:00Z/50d");
}
