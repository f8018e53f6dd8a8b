use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            -- Source collection, written by the preprocessing job. Read-only here.
            CREATE TABLE IF NOT EXISTS articles_preprocessed (
                id TEXT PRIMARY KEY,
                url TEXT,
                title TEXT,
                title_clean TEXT,
                outlet TEXT,
                published_at TEXT, -- RFC 3339; filtered as text by date prefix
                embedding TEXT, -- JSON array of floats
                cluster_id TEXT,
                cluster_label TEXT,
                topic_key TEXT,
                content_len INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_articles_preprocessed_published_at ON articles_preprocessed (published_at);

            -- Cluster assignments made outside the article rows
            CREATE TABLE IF NOT EXISTS article_clusters (
                ref_id TEXT PRIMARY KEY,
                cluster_id TEXT NOT NULL,
                label TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_article_clusters_cluster_id ON article_clusters (cluster_id);

            CREATE TABLE IF NOT EXISTS reprint_snapshots (
                run_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                threshold REAL NOT NULL,
                window_hours INTEGER NOT NULL,
                event_count INTEGER NOT NULL,
                payload TEXT NOT NULL -- full snapshot as JSON
            );
            CREATE INDEX IF NOT EXISTS idx_reprint_snapshots_created_at ON reprint_snapshots (created_at);

            CREATE TABLE IF NOT EXISTS trends_daily (
                group_key TEXT NOT NULL,
                date TEXT NOT NULL,
                count INTEGER NOT NULL,
                ma REAL NOT NULL,
                adj_count REAL NOT NULL,
                resid REAL,
                is_spike INTEGER NOT NULL,
                PRIMARY KEY (group_key, date)
            );
            CREATE INDEX IF NOT EXISTS idx_trends_daily_date_spike ON trends_daily (date, is_spike);

            CREATE TABLE IF NOT EXISTS burst_keywords (
                keyword TEXT NOT NULL,
                date TEXT NOT NULL,
                count INTEGER NOT NULL,
                baseline REAL NOT NULL,
                ratio REAL NOT NULL,
                PRIMARY KEY (keyword, date)
            );
            CREATE INDEX IF NOT EXISTS idx_burst_keywords_date_ratio ON burst_keywords (date, ratio DESC);

            CREATE TABLE IF NOT EXISTS trends_weekly_reports (
                week_start TEXT PRIMARY KEY,
                generated_at TEXT NOT NULL,
                payload TEXT NOT NULL -- full report as JSON
            );
            "#,
        )
        .execute(&mut *conn)
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
