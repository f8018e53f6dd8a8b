use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::document::{Document, LoadedDocuments, RawDocument, SkipCounts, UNKNOWN_OUTLET};
use crate::store::DocumentSource;
use crate::TARGET_LOADER;

/// Loads the snapshot for `[as_of - window_days, as_of]`.
///
/// Rows without a timestamp are dropped and counted. Rows without a usable
/// embedding stay in the dated list for the trend stages but are kept out of
/// clustering. A store failure aborts the run: every later stage needs the
/// same consistent snapshot, so there is no partial mode.
pub async fn load_documents<S>(
    source: &S,
    window_days: i64,
    as_of: DateTime<Utc>,
) -> Result<LoadedDocuments>
where
    S: DocumentSource + ?Sized,
{
    let since = as_of - Duration::days(window_days);
    info!(target: TARGET_LOADER, "Loading documents published between {} and {}", since, as_of);

    let rows = source
        .fetch_documents(since, as_of)
        .await
        .context("document store unreachable")?;

    let loaded = prepare_documents(rows, since, as_of);
    info!(
        target: TARGET_LOADER,
        "Loaded {} dated documents, {} clusterable (skipped: {} without embedding, {} without timestamp, {} with mismatched dimension)",
        loaded.dated.len(),
        loaded.len(),
        loaded.skipped.missing_embedding,
        loaded.skipped.missing_published_at,
        loaded.skipped.dimension_mismatch
    );
    Ok(loaded)
}

/// Validates raw rows into a sorted snapshot.
pub fn prepare_documents(
    rows: Vec<RawDocument>,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> LoadedDocuments {
    let mut skipped = SkipCounts::default();
    let mut all = Vec::with_capacity(rows.len());

    for raw in rows {
        let Some(published_at) = raw.published_at else {
            skipped.missing_published_at += 1;
            continue;
        };
        if published_at < since || published_at > until {
            continue;
        }
        let embedding = match raw.embedding {
            Some(v) if !v.is_empty() && v.iter().all(|x| x.is_finite()) => v,
            _ => {
                skipped.missing_embedding += 1;
                Vec::new()
            }
        };

        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .or(raw.title_clean)
            .unwrap_or_default();
        let outlet = raw
            .outlet
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| UNKNOWN_OUTLET.to_string());

        all.push(Document {
            id: raw.id,
            url: raw.url.unwrap_or_default(),
            title,
            outlet,
            published_at,
            embedding,
            cluster_id: raw.cluster_id,
            cluster_label: raw.cluster_label.filter(|l| !l.trim().is_empty()),
            topic_key: raw.topic_key,
            content_len: raw.content_len.unwrap_or(0).max(0) as usize,
        });
    }

    all.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let dimension = reference_dimension(&all);
    let mut documents = Vec::new();
    let mut dated = Vec::with_capacity(all.len());
    for mut doc in all {
        let embedding = std::mem::take(&mut doc.embedding);
        if embedding.is_empty() {
            dated.push(doc);
            continue;
        }
        if Some(embedding.len()) != dimension {
            debug!(
                target: TARGET_LOADER,
                "Excluding document {} from clustering: embedding has {} dimensions, expected {:?}",
                doc.id,
                embedding.len(),
                dimension
            );
            skipped.dimension_mismatch += 1;
            dated.push(doc);
            continue;
        }
        dated.push(doc.clone());
        doc.embedding = embedding;
        documents.push(doc);
    }

    if skipped.dimension_mismatch > 0 {
        warn!(
            target: TARGET_LOADER,
            "{} documents excluded from clustering for embedding dimensionality other than {:?}",
            skipped.dimension_mismatch,
            dimension
        );
    }

    LoadedDocuments {
        documents,
        dated,
        skipped,
        dimension,
    }
}

/// The most common embedding length; ties go to the earliest document's length.
fn reference_dimension(documents: &[Document]) -> Option<usize> {
    let mut counts: HashMap<usize, (usize, usize)> = HashMap::new();
    for (pos, d) in documents.iter().enumerate() {
        if d.embedding.is_empty() {
            continue;
        }
        let entry = counts.entry(d.embedding.len()).or_insert((0, pos));
        entry.0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (ca, pa)), (_, (cb, pb))| ca.cmp(cb).then_with(|| pb.cmp(pa)))
        .map(|(dim, _)| dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn raw(id: &str, hour: u32, embedding: Option<Vec<f32>>) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2025, 10, 1, hour, 0, 0).unwrap()),
            embedding,
            ..RawDocument::default()
        }
    }

    #[test]
    fn test_missing_fields_are_counted_not_fatal() {
        let since = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let mut no_time = raw("t", 0, Some(vec![1.0, 0.0]));
        no_time.published_at = None;
        let rows = vec![
            raw("b", 5, Some(vec![1.0, 0.0])),
            raw("a", 3, Some(vec![0.0, 1.0])),
            raw("e", 4, None),
            raw("n", 6, Some(vec![f32::NAN, 1.0])),
            no_time,
        ];

        let loaded = prepare_documents(rows, since, until);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.skipped.missing_embedding, 2);
        assert_eq!(loaded.skipped.missing_published_at, 1);
        // Articles without a usable embedding still count as dated.
        let dated: Vec<&str> = loaded.dated.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(dated, vec!["a", "e", "b", "n"]);
        assert!(loaded.dated.iter().all(|d| d.embedding.is_empty()));
        // Ascending by publication time.
        assert_eq!(loaded.documents[0].id, "a");
        assert_eq!(loaded.documents[1].id, "b");
        assert_eq!(loaded.documents[0].outlet, UNKNOWN_OUTLET);
    }

    #[test]
    fn test_dimension_mismatch_excluded() {
        let since = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let rows = vec![
            raw("a", 1, Some(vec![1.0, 0.0, 0.0])),
            raw("b", 2, Some(vec![1.0, 0.0])),
            raw("c", 3, Some(vec![0.0, 1.0])),
        ];
        let loaded = prepare_documents(rows, since, until);
        assert_eq!(loaded.dimension, Some(2));
        assert_eq!(loaded.skipped.dimension_mismatch, 1);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dated.len(), 3);
    }

    #[test]
    fn test_title_falls_back_to_clean_title() {
        let since = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap();
        let mut r = raw("a", 1, Some(vec![1.0]));
        r.title = Some("  ".into());
        r.title_clean = Some("Rates held".into());
        r.outlet = Some(" Yonhap ".into());
        let loaded = prepare_documents(vec![r], since, until);
        assert_eq!(loaded.documents[0].title, "Rates held");
        assert_eq!(loaded.documents[0].outlet, "Yonhap");
    }

    #[tokio::test]
    async fn test_load_respects_window() {
        let store = MemoryStore::new(vec![
            raw("old", 0, Some(vec![1.0])),
            RawDocument {
                id: "new".into(),
                published_at: Some(Utc.with_ymd_and_hms(2025, 10, 20, 0, 0, 0).unwrap()),
                embedding: Some(vec![1.0]),
                ..RawDocument::default()
            },
        ]);
        let as_of = Utc.with_ymd_and_hms(2025, 10, 21, 0, 0, 0).unwrap();
        let loaded = load_documents(&store, 7, as_of).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.documents[0].id, "new");
    }
}
