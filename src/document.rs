use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GroupBy;

/// Outlet name used when a row carries none.
pub const UNKNOWN_OUTLET: &str = "unknown";
/// Trend group for documents without any prior assignment.
pub const CATCH_ALL_GROUP: &str = "_all";

/// A row as it comes out of a document store, before any validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub title_clean: Option<String>,
    pub outlet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub cluster_id: Option<String>,
    pub cluster_label: Option<String>,
    pub topic_key: Option<String>,
    pub content_len: Option<i64>,
}

/// One preprocessed news article inside the run window.
///
/// `embedding` is empty for articles that only feed the trend stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    pub outlet: String,
    pub published_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
    pub cluster_id: Option<String>,
    /// Human-readable name of `cluster_id`, when one was assigned.
    pub cluster_label: Option<String>,
    pub topic_key: Option<String>,
    pub content_len: usize,
}

impl Document {
    /// Key of the trend group this document counts towards.
    pub fn group_key(&self, group_by: GroupBy) -> &str {
        let (first, second) = match group_by {
            GroupBy::Cluster => (&self.cluster_id, &self.topic_key),
            GroupBy::Topic => (&self.topic_key, &self.cluster_id),
        };
        let present = |k: &&str| !k.trim().is_empty();
        first
            .as_deref()
            .filter(present)
            .or_else(|| second.as_deref().filter(present))
            .unwrap_or(CATCH_ALL_GROUP)
    }
}

/// Why a raw row was left out of clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub missing_embedding: usize,
    pub missing_published_at: usize,
    pub dimension_mismatch: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.missing_embedding + self.missing_published_at + self.dimension_mismatch
    }
}

/// A consistent snapshot of documents for one run.
///
/// Both lists are sorted ascending by `published_at`, ties by `id`.
#[derive(Debug, Clone, Default)]
pub struct LoadedDocuments {
    /// Articles with a usable embedding of the reference dimension.
    pub documents: Vec<Document>,
    /// Every dated article in the window, with embeddings stripped.
    pub dated: Vec<Document>,
    pub skipped: SkipCounts,
    pub dimension: Option<usize>,
}

impl LoadedDocuments {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(cluster_id: Option<&str>, topic_key: Option<&str>) -> Document {
        Document {
            id: "a".into(),
            url: String::new(),
            title: String::new(),
            outlet: UNKNOWN_OUTLET.into(),
            published_at: Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
            embedding: vec![1.0],
            cluster_id: cluster_id.map(String::from),
            cluster_label: None,
            topic_key: topic_key.map(String::from),
            content_len: 0,
        }
    }

    #[test]
    fn test_group_key_preference() {
        let d = doc(Some("c7"), Some("rates"));
        assert_eq!(d.group_key(GroupBy::Cluster), "c7");
        assert_eq!(d.group_key(GroupBy::Topic), "rates");

        let d = doc(None, Some("rates"));
        assert_eq!(d.group_key(GroupBy::Cluster), "rates");

        let d = doc(None, None);
        assert_eq!(d.group_key(GroupBy::Cluster), CATCH_ALL_GROUP);
    }
}
