use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::series::{local_date, DailyPoint};
use crate::config::{GroupBy, TrendConfig};
use crate::document::Document;

/// One group's counts around the reported week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWeekSummary {
    pub group_key: String,
    /// Cluster label of the group, when its articles carry one.
    pub label: Option<String>,
    pub this_week: usize,
    pub prev_week: usize,
    pub prev2_week: usize,
    /// Activity over the `new` lookback before the week, 30 days by default.
    pub past30: usize,
    pub this_week_spikes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCategories {
    pub new: Vec<GroupWeekSummary>,
    pub surging: Vec<GroupWeekSummary>,
    pub fading: Vec<GroupWeekSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeArticle {
    pub id: String,
    pub title: String,
    pub url: String,
    pub outlet: String,
    pub content_len: usize,
}

/// A spike day of the reported week with the articles behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeExplanation {
    pub group_key: String,
    pub date: NaiveDate,
    pub count: usize,
    pub ma: f64,
    pub adj_count: f64,
    pub resid: Option<f64>,
    pub articles: Vec<RepresentativeArticle>,
}

/// Parameters the report was produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyParams {
    pub group_by: GroupBy,
    pub lookback_days: i64,
    pub ma_window: usize,
    pub spike_quantile: f64,
    pub surge_ratio: f64,
    pub surge_requires_spike: bool,
    pub new_lookback_days: i64,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub week_start: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub params: WeeklyParams,
    pub categories: WeeklyCategories,
    pub spikes: Vec<SpikeExplanation>,
}

/// First day of the week containing `date`.
pub fn week_start(date: NaiveDate, first_day: Weekday) -> NaiveDate {
    let back = (date.weekday().num_days_from_monday() + 7 - first_day.num_days_from_monday()) % 7;
    date - Duration::days(back as i64)
}

/// Sums each group's counts over the week starting `ws` and the windows
/// before it. `new_lookback_days` sets how far back `past30` reaches.
pub fn summarize_weeks(
    points: &[DailyPoint],
    ws: NaiveDate,
    new_lookback_days: i64,
) -> Vec<GroupWeekSummary> {
    let we = ws + Duration::days(7);
    let prev = ws - Duration::days(7);
    let prev2 = ws - Duration::days(14);
    let past30 = ws - Duration::days(new_lookback_days);

    let mut by_group: BTreeMap<&str, GroupWeekSummary> = BTreeMap::new();
    for p in points {
        let s = by_group
            .entry(p.group_key.as_str())
            .or_insert_with(|| GroupWeekSummary {
                group_key: p.group_key.clone(),
                label: None,
                this_week: 0,
                prev_week: 0,
                prev2_week: 0,
                past30: 0,
                this_week_spikes: 0,
            });
        let d = p.date;
        if d >= ws && d < we {
            s.this_week += p.count;
            s.this_week_spikes += usize::from(p.is_spike);
        }
        if d >= prev && d < ws {
            s.prev_week += p.count;
        }
        if d >= prev2 && d < prev {
            s.prev2_week += p.count;
        }
        if d >= past30 && d < ws {
            s.past30 += p.count;
        }
    }
    by_group.into_values().collect()
}

/// Sorts groups into new, surging and fading. The three conditions are
/// mutually exclusive, so a group lands in at most one list.
pub fn categorize(summaries: &[GroupWeekSummary], config: &TrendConfig) -> WeeklyCategories {
    let mut cats = WeeklyCategories::default();
    for s in summaries {
        if s.past30 == 0 && s.this_week > 0 {
            cats.new.push(s.clone());
        } else if s.prev_week > 0
            && s.this_week as f64 / s.prev_week as f64 >= config.surge_ratio
            && (!config.surge_requires_spike || s.this_week_spikes >= 1)
        {
            cats.surging.push(s.clone());
        } else if s.prev_week + s.prev2_week > 0 && s.this_week == 0 {
            cats.fading.push(s.clone());
        }
    }
    cats.new.sort_by(|a, b| {
        b.this_week
            .cmp(&a.this_week)
            .then_with(|| a.group_key.cmp(&b.group_key))
    });
    cats.surging.sort_by(|a, b| {
        b.this_week
            .cmp(&a.this_week)
            .then_with(|| a.group_key.cmp(&b.group_key))
    });
    cats.fading.sort_by(|a, b| {
        (b.prev_week, b.prev2_week)
            .cmp(&(a.prev_week, a.prev2_week))
            .then_with(|| a.group_key.cmp(&b.group_key))
    });
    cats
}

/// Most common cluster label per group, ties to the smaller label.
///
/// Only documents whose group key is their cluster id contribute, so a
/// topic-keyed group never borrows a cluster's name.
pub fn group_labels(documents: &[Document], group_by: GroupBy) -> BTreeMap<String, String> {
    let mut counts: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for d in documents {
        let (Some(cluster_id), Some(label)) = (d.cluster_id.as_deref(), d.cluster_label.as_deref())
        else {
            continue;
        };
        let key = d.group_key(group_by);
        if key != cluster_id {
            continue;
        }
        *counts.entry(key).or_default().entry(label).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter_map(|(key, labels)| {
            labels
                .into_iter()
                .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then_with(|| lb.cmp(la)))
                .map(|(label, _)| (key.to_string(), label.to_string()))
        })
        .collect()
}

/// Up to `k` articles of a group on a day, longest body first.
pub fn representative_articles(
    documents: &[Document],
    group_key: &str,
    date: NaiveDate,
    group_by: GroupBy,
    offset: &FixedOffset,
    k: usize,
) -> Vec<RepresentativeArticle> {
    let mut matching: Vec<&Document> = documents
        .iter()
        .filter(|d| {
            d.group_key(group_by) == group_key && local_date(d.published_at, offset) == date
        })
        .collect();
    matching.sort_by(|a, b| {
        b.content_len
            .cmp(&a.content_len)
            .then_with(|| a.published_at.cmp(&b.published_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    matching
        .into_iter()
        .take(k)
        .map(|d| RepresentativeArticle {
            id: d.id.clone(),
            title: d.title.clone(),
            url: d.url.clone(),
            outlet: d.outlet.clone(),
            content_len: d.content_len,
        })
        .collect()
}

/// Everything the report needs besides the data itself.
pub struct ReportContext<'a> {
    pub as_of: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub offset: &'a FixedOffset,
    pub lookback_days: i64,
    pub config: &'a TrendConfig,
}

/// Builds the report for the week containing `as_of`.
pub fn weekly_report(
    documents: &[Document],
    points: &[DailyPoint],
    ctx: &ReportContext<'_>,
) -> WeeklyReport {
    let config = ctx.config;
    let ws = week_start(local_date(ctx.as_of, ctx.offset), config.week_start);
    let we = ws + Duration::days(7);

    let labels = group_labels(documents, config.group_by);
    let mut summaries = summarize_weeks(points, ws, config.new_lookback_days);
    for s in &mut summaries {
        s.label = labels.get(&s.group_key).cloned();
    }
    let categories = categorize(&summaries, config);

    let spikes = points
        .iter()
        .filter(|p| p.is_spike && p.date >= ws && p.date < we)
        .map(|p| SpikeExplanation {
            group_key: p.group_key.clone(),
            date: p.date,
            count: p.count,
            ma: p.ma,
            adj_count: p.adj_count,
            resid: p.resid,
            articles: representative_articles(
                documents,
                &p.group_key,
                p.date,
                config.group_by,
                ctx.offset,
                config.top_articles_per_spike,
            ),
        })
        .collect();

    WeeklyReport {
        week_start: ws,
        generated_at: ctx.generated_at,
        params: WeeklyParams {
            group_by: config.group_by,
            lookback_days: ctx.lookback_days,
            ma_window: config.ma_window,
            spike_quantile: config.spike_quantile,
            surge_ratio: config.surge_ratio,
            surge_requires_spike: config.surge_requires_spike,
            new_lookback_days: config.new_lookback_days,
            utc_offset_hours: ctx.offset.local_minus_utc() / 3600,
        },
        categories,
        spikes,
    }
}
