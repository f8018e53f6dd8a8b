use chrono::{Duration, FixedOffset, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

use super::series::local_date;
use crate::config::BurstConfig;
use crate::document::Document;

/// Runs of two or more letters or digits in any script.
static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]{2,}").expect("token pattern is valid"));

/// A title keyword whose frequency on `date` jumped against the days before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstKeyword {
    pub keyword: String,
    pub date: NaiveDate,
    pub count: usize,
    /// Mean daily frequency over the baseline days, or the smoothing constant
    /// when the keyword did not occur there.
    pub baseline: f64,
    pub ratio: f64,
}

/// NFC-normalized, lowercased tokens of a title.
pub fn tokenize(title: &str) -> Vec<String> {
    let normalized: String = title.nfc().collect::<String>().to_lowercase();
    TOKEN
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Top keywords per local day, ranked by burst ratio.
///
/// Days without any tokens produce nothing. Results are ordered by date, then
/// by rank within the day.
pub fn detect_bursts(
    documents: &[Document],
    config: &BurstConfig,
    offset: &FixedOffset,
) -> Vec<BurstKeyword> {
    let mut per_day: BTreeMap<NaiveDate, BTreeMap<String, usize>> = BTreeMap::new();
    for d in documents {
        let day = per_day.entry(local_date(d.published_at, offset)).or_default();
        for token in tokenize(&d.title) {
            *day.entry(token).or_insert(0) += 1;
        }
    }

    let mut out = Vec::new();
    for (&date, counts) in &per_day {
        if counts.is_empty() {
            continue;
        }
        let since = date - Duration::days(config.baseline_days);
        let history: Vec<&BTreeMap<String, usize>> =
            per_day.range(since..date).map(|(_, c)| c).collect();

        let mut rows: Vec<BurstKeyword> = counts
            .iter()
            .map(|(keyword, &count)| {
                let seen: usize = history.iter().filter_map(|c| c.get(keyword)).sum();
                let mean = seen as f64 / config.baseline_days as f64;
                let baseline = if mean > 0.0 { mean } else { config.smoothing };
                BurstKeyword {
                    keyword: keyword.clone(),
                    date,
                    count,
                    baseline,
                    ratio: count as f64 / baseline,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.ratio
                .total_cmp(&a.ratio)
                .then_with(|| b.count.cmp(&a.count))
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        rows.truncate(config.top_n);
        out.extend(rows);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, day: u32, title: &str) -> Document {
        Document {
            id: id.into(),
            url: String::new(),
            title: title.into(),
            outlet: "unknown".into(),
            published_at: Utc.with_ymd_and_hms(2025, 10, day, 3, 0, 0).unwrap(),
            embedding: vec![1.0],
            cluster_id: None,
            cluster_label: None,
            topic_key: None,
            content_len: 0,
        }
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_tokenizer_keeps_hangul_and_latin() {
        assert_eq!(
            tokenize("한국은행 기준금리 동결, BOK holds rates at 3.5% - a"),
            vec!["한국은행", "기준금리", "동결", "bok", "holds", "rates", "at"]
        );
        // Decomposed jamo compose to the same syllables.
        let decomposed = "\u{1112}\u{1161}\u{11AB}\u{1100}\u{116E}\u{11A8}";
        assert_eq!(tokenize(decomposed), vec!["한국"]);
    }

    #[test]
    fn test_unseen_keyword_uses_smoothing() {
        let docs: Vec<Document> = (0..4)
            .map(|i| doc(&i.to_string(), 10, "Typhoon nears"))
            .collect();
        let bursts = detect_bursts(&docs, &BurstConfig::default(), &utc());
        let typhoon = bursts.iter().find(|b| b.keyword == "typhoon").unwrap();
        assert_eq!(typhoon.count, 4);
        assert_eq!(typhoon.baseline, 0.5);
        assert_eq!(typhoon.ratio, 8.0);
    }

    #[test]
    fn test_baseline_is_mean_over_previous_week() {
        let mut docs = vec![
            doc("a", 3, "budget talks"),
            doc("b", 6, "budget vote"),
            doc("c", 9, "budget passes"),
        ];
        // Outside the seven days before the 10th.
        docs.push(doc("old", 2, "budget draft"));
        docs.push(doc("d", 10, "budget signed"));
        let bursts = detect_bursts(&docs, &BurstConfig::default(), &utc());
        let tenth = NaiveDate::from_ymd_opt(2025, 10, 10).unwrap();
        let budget = bursts
            .iter()
            .find(|b| b.keyword == "budget" && b.date == tenth)
            .unwrap();
        assert!((budget.baseline - 3.0 / 7.0).abs() < 1e-12);
        assert!((budget.ratio - 7.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ranking_and_top_n() {
        let docs = vec![
            doc("a", 10, "alpha beta"),
            doc("b", 10, "alpha gamma"),
            doc("c", 10, "alpha delta"),
        ];
        let config = BurstConfig {
            top_n: 2,
            ..BurstConfig::default()
        };
        let bursts = detect_bursts(&docs, &config, &utc());
        let keywords: Vec<&str> = bursts.iter().map(|b| b.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["alpha", "beta"]);
    }
}
