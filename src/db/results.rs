use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat};
use sqlx::Row;
use tracing::debug;

use super::core::Database;
use crate::reprint::ReprintSnapshot;
use crate::store::ResultSink;
use crate::trends::{BurstKeyword, DailyPoint, WeeklyReport};
use crate::TARGET_DB;

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, sqlx::Error> {
    serde_json::to_string(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

impl Database {
    pub async fn save_reprint_snapshot(
        &self,
        snapshot: &ReprintSnapshot,
    ) -> Result<(), sqlx::Error> {
        let payload = to_json(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO reprint_snapshots (run_id, created_at, threshold, window_hours, event_count, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id) DO UPDATE SET
                created_at = excluded.created_at,
                threshold = excluded.threshold,
                window_hours = excluded.window_hours,
                event_count = excluded.event_count,
                payload = excluded.payload
            "#,
        )
        .bind(&snapshot.run_id)
        .bind(snapshot.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .bind(snapshot.threshold as f64)
        .bind(snapshot.window_hours)
        .bind(snapshot.event_count as i64)
        .bind(payload)
        .execute(self.pool())
        .await?;
        debug!(target: TARGET_DB, "Saved reprint snapshot {}", snapshot.run_id);
        Ok(())
    }

    pub async fn save_daily_points(&self, points: &[DailyPoint]) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        for p in points {
            sqlx::query(
                r#"
                INSERT INTO trends_daily (group_key, date, count, ma, adj_count, resid, is_spike)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(group_key, date) DO UPDATE SET
                    count = excluded.count,
                    ma = excluded.ma,
                    adj_count = excluded.adj_count,
                    resid = excluded.resid,
                    is_spike = excluded.is_spike
                "#,
            )
            .bind(&p.group_key)
            .bind(p.date.to_string())
            .bind(p.count as i64)
            .bind(p.ma)
            .bind(p.adj_count)
            .bind(p.resid)
            .bind(p.is_spike)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(target: TARGET_DB, "Upserted {} daily points", points.len());
        Ok(points.len())
    }

    pub async fn save_burst_keywords(
        &self,
        records: &[BurstKeyword],
    ) -> Result<usize, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        for r in records {
            sqlx::query(
                r#"
                INSERT INTO burst_keywords (keyword, date, count, baseline, ratio)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(keyword, date) DO UPDATE SET
                    count = excluded.count,
                    baseline = excluded.baseline,
                    ratio = excluded.ratio
                "#,
            )
            .bind(&r.keyword)
            .bind(r.date.to_string())
            .bind(r.count as i64)
            .bind(r.baseline)
            .bind(r.ratio)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(target: TARGET_DB, "Upserted {} burst keywords", records.len());
        Ok(records.len())
    }

    pub async fn save_weekly_report(&self, report: &WeeklyReport) -> Result<(), sqlx::Error> {
        let payload = to_json(report)?;
        sqlx::query(
            r#"
            INSERT INTO trends_weekly_reports (week_start, generated_at, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(week_start) DO UPDATE SET
                generated_at = excluded.generated_at,
                payload = excluded.payload
            "#,
        )
        .bind(report.week_start.to_string())
        .bind(report.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .bind(payload)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The most recently created reprint snapshot, if any.
    pub async fn latest_reprint_snapshot(&self) -> Result<Option<ReprintSnapshot>, sqlx::Error> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM reprint_snapshots ORDER BY created_at DESC, run_id DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        payload.as_deref().map(from_json::<ReprintSnapshot>).transpose()
    }

    /// The report of the latest week on record, if any.
    pub async fn latest_weekly_report(&self) -> Result<Option<WeeklyReport>, sqlx::Error> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM trends_weekly_reports ORDER BY week_start DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        payload.as_deref().map(from_json::<WeeklyReport>).transpose()
    }

    /// Strongest bursts of the latest day that has any.
    pub async fn latest_bursts(&self, limit: i64) -> Result<Vec<BurstKeyword>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT keyword, date, count, baseline, ratio
            FROM burst_keywords
            WHERE date = (SELECT MAX(date) FROM burst_keywords)
            ORDER BY ratio DESC, count DESC, keyword ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let date: String = row.get("date");
                let date = date
                    .parse::<NaiveDate>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok::<_, sqlx::Error>(BurstKeyword {
                    keyword: row.get("keyword"),
                    date,
                    count: row.get::<i64, _>("count").max(0) as usize,
                    baseline: row.get("baseline"),
                    ratio: row.get("ratio"),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ResultSink for Database {
    async fn upsert_reprint_snapshot(&self, snapshot: &ReprintSnapshot) -> Result<()> {
        self.save_reprint_snapshot(snapshot)
            .await
            .with_context(|| format!("failed to save reprint snapshot {}", snapshot.run_id))
    }

    async fn upsert_daily_points(&self, points: &[DailyPoint]) -> Result<usize> {
        self.save_daily_points(points)
            .await
            .context("failed to save daily trend points")
    }

    async fn upsert_burst_keywords(&self, records: &[BurstKeyword]) -> Result<usize> {
        self.save_burst_keywords(records)
            .await
            .context("failed to save burst keywords")
    }

    async fn upsert_weekly_report(&self, report: &WeeklyReport) -> Result<()> {
        self.save_weekly_report(report)
            .await
            .with_context(|| format!("failed to save weekly report {}", report.week_start))
    }
}
