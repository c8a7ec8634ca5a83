use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{CustomerRecord, CustomerTimeline, HealthLabel, MetricValues};
use crate::scoring::ScoringEngine;

/// Calendar month used as the bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Chart label, e.g. `3/1/2024`.
    pub fn display_label(&self) -> String {
        format!("{}/1/{}", self.month, self.year)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Cohort predicates; `None` matches everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortFilter {
    pub owner: Option<String>,
    pub segment: Option<String>,
}

impl CohortFilter {
    pub fn matches(&self, customer: &CustomerRecord) -> bool {
        let owner_ok = self
            .owner
            .as_deref()
            .map_or(true, |owner| customer.owner == owner);
        let segment_ok = self
            .segment
            .as_deref()
            .map_or(true, |segment| customer.segment == segment);
        owner_ok && segment_ok
    }

    pub fn title(&self) -> String {
        let mut parts = Vec::new();
        if let Some(owner) = &self.owner {
            parts.push(owner.clone());
        }
        if let Some(segment) = &self.segment {
            parts.push(format!("Segment {segment}"));
        }

        if parts.is_empty() {
            "OVERALL".to_string()
        } else {
            parts.join(" / ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthBucket {
    pub month: YearMonth,
    pub label: String,
    pub high_pct: f64,
    pub medium_pct: f64,
    pub low_pct: f64,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    /// Scored snapshots only; incomplete ones are excluded.
    pub total_count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct LabelTally {
    high: usize,
    medium: usize,
    low: usize,
}

impl LabelTally {
    fn add(&mut self, label: HealthLabel) {
        match label {
            HealthLabel::High => self.high += 1,
            HealthLabel::Medium => self.medium += 1,
            HealthLabel::Low => self.low += 1,
            HealthLabel::Incomplete => {}
        }
    }

    fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    fn into_bucket(self, month: YearMonth) -> Option<MonthBucket> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        Some(MonthBucket {
            month,
            label: month.display_label(),
            high_pct: percentage(self.high, total),
            medium_pct: percentage(self.medium, total),
            low_pct: percentage(self.low, total),
            high_count: self.high,
            medium_count: self.medium,
            low_count: self.low,
            total_count: total,
        })
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    let raw = count as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Builds the monthly label distribution for the cohort selected by `filter`.
///
/// Each customer contributes at most one snapshot per month: the newest one.
/// History is re-sorted newest-first here, so callers need not guarantee the
/// order. Months where every snapshot is incomplete are omitted.
pub fn aggregate_monthly(
    engine: &ScoringEngine,
    timelines: &[CustomerTimeline],
    filter: &CohortFilter,
) -> Vec<MonthBucket> {
    let mut months: BTreeMap<YearMonth, Vec<&MetricValues>> = BTreeMap::new();

    for timeline in timelines.iter().filter(|t| filter.matches(&t.customer)) {
        let mut history: Vec<_> = timeline.history.iter().collect();
        history.sort_by(|a, b| b.snapshot_date.cmp(&a.snapshot_date));

        let mut seen = HashSet::new();
        for entry in history {
            let key = YearMonth::of(entry.snapshot_date);
            if seen.insert(key) {
                months.entry(key).or_default().push(&entry.metrics);
            }
        }
    }

    months
        .into_iter()
        .filter_map(|(month, snapshots)| {
            let mut tally = LabelTally::default();
            for metrics in snapshots {
                tally.add(engine.weighted_risk_score(metrics).label);
            }
            tally.into_bucket(month)
        })
        .collect()
}

/// Distinct owners and segments, sorted, for building filter choices.
pub fn cohort_options(customers: &[CustomerRecord]) -> (Vec<String>, Vec<String>) {
    let owners: BTreeSet<&str> = customers
        .iter()
        .map(|c| c.owner.as_str())
        .filter(|o| !o.is_empty())
        .collect();
    let segments: BTreeSet<&str> = customers
        .iter()
        .map(|c| c.segment.as_str())
        .filter(|s| !s.is_empty())
        .collect();

    (
        owners.into_iter().map(str::to_string).collect(),
        segments.into_iter().map(str::to_string).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryEntry, MetricRating, MetricSlot};
    use uuid::Uuid;

    fn customer(owner: &str, segment: &str) -> CustomerRecord {
        CustomerRecord {
            id: Uuid::new_v4(),
            name: format!("{owner}-{segment}"),
            segment: segment.to_string(),
            owner: owner.to_string(),
            metrics: MetricValues::default(),
            notes: String::new(),
            is_active: true,
        }
    }

    fn entry(year: i32, month: u32, day: u32, rating: MetricRating) -> HistoryEntry {
        HistoryEntry {
            snapshot_date: NaiveDate::from_ymd_opt(year, month, day).unwrap(),
            metrics: MetricValues::uniform(rating),
        }
    }

    fn timeline(owner: &str, segment: &str, history: Vec<HistoryEntry>) -> CustomerTimeline {
        CustomerTimeline {
            customer: customer(owner, segment),
            history,
        }
    }

    #[test]
    fn newest_snapshot_wins_within_a_month() {
        let engine = ScoringEngine::default();
        let timelines = vec![timeline(
            "Brooke",
            "1",
            vec![
                entry(2024, 3, 20, MetricRating::High),
                entry(2024, 3, 2, MetricRating::Low),
            ],
        )];

        let series = aggregate_monthly(&engine, &timelines, &CohortFilter::default());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].month.to_string(), "2024-03");
        assert_eq!(series[0].high_count, 1);
        assert_eq!(series[0].low_count, 0);
        assert_eq!(series[0].total_count, 1);
    }

    #[test]
    fn unsorted_history_is_reordered_first() {
        let engine = ScoringEngine::default();
        let timelines = vec![timeline(
            "Brooke",
            "1",
            vec![
                entry(2024, 3, 2, MetricRating::Low),
                entry(2024, 3, 20, MetricRating::High),
            ],
        )];

        let series = aggregate_monthly(&engine, &timelines, &CohortFilter::default());
        assert_eq!(series[0].high_count, 1);
        assert_eq!(series[0].low_count, 0);
    }

    #[test]
    fn percentages_round_to_two_places_in_month_order() {
        let engine = ScoringEngine::default();
        let timelines = vec![
            timeline("A", "1", vec![entry(2024, 2, 1, MetricRating::High), entry(2024, 1, 1, MetricRating::Low)]),
            timeline("B", "1", vec![entry(2024, 2, 1, MetricRating::Medium)]),
            timeline("C", "2", vec![entry(2024, 2, 9, MetricRating::Low)]),
        ];

        let series = aggregate_monthly(&engine, &timelines, &CohortFilter::default());
        let keys: Vec<String> = series.iter().map(|b| b.month.to_string()).collect();
        assert_eq!(keys, vec!["2024-01", "2024-02"]);

        let feb = &series[1];
        assert_eq!(feb.label, "2/1/2024");
        assert_eq!(feb.total_count, 3);
        assert_eq!(feb.high_pct, 33.33);
        assert_eq!(feb.medium_pct, 33.33);
        assert_eq!(feb.low_pct, 33.33);
    }

    #[test]
    fn incomplete_snapshots_are_excluded() {
        let engine = ScoringEngine::default();
        let incomplete = HistoryEntry {
            snapshot_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            metrics: MetricValues::uniform(MetricRating::High)
                .with(MetricSlot::RoiEstablished, MetricRating::Unrated),
        };
        let timelines = vec![
            timeline("A", "1", vec![incomplete, entry(2024, 4, 1, MetricRating::Low)]),
            timeline("B", "1", vec![entry(2024, 6, 1, MetricRating::High)]),
        ];

        let series = aggregate_monthly(&engine, &timelines, &CohortFilter::default());
        let keys: Vec<String> = series.iter().map(|b| b.month.to_string()).collect();
        assert_eq!(keys, vec!["2024-04", "2024-06"]);
        assert!(series.iter().all(|b| b.total_count > 0));
    }

    #[test]
    fn filters_by_owner_and_segment() {
        let engine = ScoringEngine::default();
        let timelines = vec![
            timeline("Brooke", "1", vec![entry(2024, 1, 1, MetricRating::High)]),
            timeline("Ryan", "1", vec![entry(2024, 1, 1, MetricRating::Low)]),
            timeline("Ryan", "2", vec![entry(2024, 1, 1, MetricRating::Low)]),
        ];

        let filter = CohortFilter {
            owner: Some("Ryan".to_string()),
            segment: Some("1".to_string()),
        };
        let series = aggregate_monthly(&engine, &timelines, &filter);
        assert_eq!(series[0].total_count, 1);
        assert_eq!(series[0].low_pct, 100.0);
        assert_eq!(filter.title(), "Ryan / Segment 1");
        assert_eq!(CohortFilter::default().title(), "OVERALL");
    }

    #[test]
    fn empty_cohort_gives_empty_series() {
        let engine = ScoringEngine::default();
        let timelines = vec![timeline("Brooke", "1", Vec::new())];
        assert!(aggregate_monthly(&engine, &timelines, &CohortFilter::default()).is_empty());

        let nobody = CohortFilter {
            owner: Some("Nobody".to_string()),
            segment: None,
        };
        let with_history = vec![timeline("Brooke", "1", vec![entry(2024, 1, 1, MetricRating::High)])];
        assert!(aggregate_monthly(&engine, &with_history, &nobody).is_empty());
    }

    #[test]
    fn cohort_options_are_sorted_and_distinct() {
        let customers = vec![customer("Ryan", "2"), customer("Brooke", "1"), customer("Ryan", ""), customer("", "1")];
        let (owners, segments) = cohort_options(&customers);
        assert_eq!(owners, vec!["Brooke", "Ryan"]);
        assert_eq!(segments, vec!["1", "2"]);
    }
}
