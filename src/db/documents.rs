use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use sqlx::Row;
use tracing::{debug, info};

use super::core::Database;
use crate::document::RawDocument;
use crate::store::DocumentSource;
use crate::TARGET_DB;

/// Reads a stored timestamp: RFC 3339, or SQLite's `YYYY-MM-DD HH:MM:SS`
/// taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Form `published_at` is written in.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Text bounds `[lower, upper)` on `published_at` that keep every row whose
/// instant may fall in `[since, until]`.
///
/// Stored timestamps start with their local date, and no UTC offset exceeds
/// a day, so bare dates one day outside the range bracket them all whatever
/// separator or offset a writer used. The exact cut happens after parsing.
fn published_at_bounds(since: DateTime<Utc>, until: DateTime<Utc>) -> (String, String) {
    let lower = (since - Duration::days(1)).date_naive();
    let upper = (until + Duration::days(2)).date_naive();
    (lower.to_string(), upper.to_string())
}

impl Database {
    /// Every preprocessed article whose timestamp falls in `[since, until]`,
    /// plus rows whose timestamp is missing or unreadable.
    ///
    /// A row without its own cluster id picks one up, with its label, from
    /// `article_clusters`.
    pub async fn fetch_preprocessed_articles(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawDocument>, sqlx::Error> {
        let (lower, upper) = published_at_bounds(since, until);
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.url, a.title, a.title_clean, a.outlet, a.published_at,
                   a.embedding, a.topic_key, a.content_len,
                   COALESCE(NULLIF(TRIM(a.cluster_id), ''), m.cluster_id) AS cluster_id,
                   CASE WHEN NULLIF(TRIM(a.cluster_id), '') IS NOT NULL
                        THEN a.cluster_label
                        ELSE m.label
                   END AS cluster_label
            FROM articles_preprocessed a
            LEFT JOIN article_clusters m ON m.ref_id = a.id
            WHERE a.published_at IS NULL
               OR (a.published_at >= ?1 AND a.published_at < ?2)
            "#,
        )
        .bind(&lower)
        .bind(&upper)
        .fetch_all(self.pool())
        .await?;
        debug!(
            target: TARGET_DB,
            "{} article rows with published_at in [{}, {}) or unset",
            rows.len(),
            lower,
            upper
        );

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let published_raw: Option<String> = row.get("published_at");
            let published_at = published_raw.as_deref().and_then(parse_timestamp);
            if let Some(ts) = published_at {
                if ts < since || ts > until {
                    continue;
                }
            } else if published_raw.is_some() {
                debug!(target: TARGET_DB, "Article {} has an unreadable timestamp", id);
            }

            let embedding_raw: Option<String> = row.get("embedding");
            let embedding = embedding_raw.and_then(|raw| {
                serde_json::from_str::<Vec<f32>>(&raw)
                    .map_err(|e| {
                        debug!(target: TARGET_DB, "Article {} has a malformed embedding: {}", id, e)
                    })
                    .ok()
            });

            documents.push(RawDocument {
                id,
                url: row.get("url"),
                title: row.get("title"),
                title_clean: row.get("title_clean"),
                outlet: row.get("outlet"),
                published_at,
                embedding,
                cluster_id: row.get("cluster_id"),
                cluster_label: row.get("cluster_label"),
                topic_key: row.get("topic_key"),
                content_len: row.get("content_len"),
            });
        }

        info!(target: TARGET_DB, "Fetched {} candidate articles", documents.len());
        Ok(documents)
    }

    /// Inserts or replaces one preprocessed article.
    pub async fn upsert_preprocessed_article(&self, doc: &RawDocument) -> Result<(), sqlx::Error> {
        let embedding = doc
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO articles_preprocessed
                (id, url, title, title_clean, outlet, published_at, embedding,
                 cluster_id, cluster_label, topic_key, content_len)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                title = excluded.title,
                title_clean = excluded.title_clean,
                outlet = excluded.outlet,
                published_at = excluded.published_at,
                embedding = excluded.embedding,
                cluster_id = excluded.cluster_id,
                cluster_label = excluded.cluster_label,
                topic_key = excluded.topic_key,
                content_len = excluded.content_len
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.url)
        .bind(&doc.title)
        .bind(&doc.title_clean)
        .bind(&doc.outlet)
        .bind(doc.published_at.map(format_timestamp))
        .bind(embedding)
        .bind(&doc.cluster_id)
        .bind(&doc.cluster_label)
        .bind(&doc.topic_key)
        .bind(doc.content_len)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Records an external cluster assignment for an article.
    pub async fn upsert_cluster_mapping(
        &self,
        ref_id: &str,
        cluster_id: &str,
        label: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO article_clusters (ref_id, cluster_id, label)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(ref_id) DO UPDATE SET
                cluster_id = excluded.cluster_id,
                label = excluded.label
            "#,
        )
        .bind(ref_id)
        .bind(cluster_id)
        .bind(label)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentSource for Database {
    async fn fetch_documents(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawDocument>> {
        self.fetch_preprocessed_articles(since, until)
            .await
            .context("failed to read articles_preprocessed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 10, 1, 3, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-10-01T12:00:00+09:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-10-01 03:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[tokio::test]
    async fn test_fetch_joins_cluster_mapping_and_keeps_bad_rows() {
        let db = Database::in_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2025, 10, 1, 3, 0, 0).unwrap();
        db.upsert_preprocessed_article(&RawDocument {
            id: "a1".into(),
            title: Some("Rates held".into()),
            published_at: Some(at),
            embedding: Some(vec![0.5, 0.5]),
            content_len: Some(1200),
            ..RawDocument::default()
        })
        .await
        .unwrap();
        db.upsert_cluster_mapping("a1", "c42", Some("monetary policy"))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO articles_preprocessed (id, published_at, embedding) VALUES ('bad', '2025-09-30 around noon', '[1.0,')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let rows = db
            .fetch_documents(at - chrono::Duration::days(1), at)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let a1 = rows.iter().find(|r| r.id == "a1").unwrap();
        assert_eq!(a1.cluster_id.as_deref(), Some("c42"));
        assert_eq!(a1.cluster_label.as_deref(), Some("monetary policy"));
        assert_eq!(a1.embedding.as_deref(), Some(&[0.5_f32, 0.5][..]));
        assert_eq!(a1.content_len, Some(1200));
        let bad = rows.iter().find(|r| r.id == "bad").unwrap();
        assert!(bad.published_at.is_none());
        assert!(bad.embedding.is_none());
    }

    #[test]
    fn test_published_at_bounds_bracket_any_offset() {
        let since = Utc.with_ymd_and_hms(2025, 9, 30, 3, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 10, 1, 23, 0, 0).unwrap();
        let (lower, upper) = published_at_bounds(since, until);
        assert_eq!((lower.as_str(), upper.as_str()), ("2025-09-29", "2025-10-03"));
        // Local renderings of instants at both ends stay inside.
        assert!("2025-09-29T17:00:00-10:00".to_string() >= lower);
        assert!("2025-10-02T08:00:00+09:00".to_string() < upper);
        assert!(format_timestamp(until) < upper);
    }

    #[tokio::test]
    async fn test_fetch_filters_timestamps_in_query() {
        let db = Database::in_memory().await.unwrap();
        let until = Utc.with_ymd_and_hms(2025, 10, 1, 3, 0, 0).unwrap();
        let since = until - chrono::Duration::days(1);
        for (id, published_at) in [
            ("old", Some("2024-01-01T00:00:00Z")),
            ("garbage", Some("soon")),
            ("kst", Some("2025-10-01T12:00:00+09:00")),
            ("naive", Some("2025-09-30 12:00:00")),
            ("late", Some("2025-10-01T03:00:01Z")),
            ("undated", None),
        ] {
            sqlx::query("INSERT INTO articles_preprocessed (id, published_at) VALUES (?1, ?2)")
                .bind(id)
                .bind(published_at)
                .execute(db.pool())
                .await
                .unwrap();
        }

        let mut ids: Vec<String> = db
            .fetch_preprocessed_articles(since, until)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["kst", "naive", "undated"]);
    }

    #[tokio::test]
    async fn test_own_cluster_label_wins_over_mapping() {
        let db = Database::in_memory().await.unwrap();
        let at = Utc.with_ymd_and_hms(2025, 10, 1, 3, 0, 0).unwrap();
        db.upsert_preprocessed_article(&RawDocument {
            id: "a1".into(),
            published_at: Some(at),
            cluster_id: Some("c7".into()),
            cluster_label: Some("Typhoon season".into()),
            ..RawDocument::default()
        })
        .await
        .unwrap();
        db.upsert_cluster_mapping("a1", "c42", Some("monetary policy"))
            .await
            .unwrap();

        let rows = db.fetch_preprocessed_articles(at, at).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cluster_id.as_deref(), Some("c7"));
        assert_eq!(rows[0].cluster_label.as_deref(), Some("Typhoon season"));
        assert_eq!(rows[0].published_at, Some(at));
    }
}
