use std::fmt::Write;

use serde::Serialize;

use crate::models::{CustomerTimeline, HealthLabel, HistoryEntry, MetricSlot};
use crate::scoring::ScoringEngine;
use crate::trend::{aggregate_monthly, CohortFilter, MonthBucket};

/// A current record together with its live score.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerScore {
    pub name: String,
    pub owner: String,
    pub segment: String,
    pub score: Option<i64>,
    pub label: HealthLabel,
    pub missing: Vec<MetricSlot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelMix {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub incomplete: usize,
}

/// Scores the current record of every active customer in the cohort, lowest
/// health first; incomplete records sort last.
pub fn score_customers(
    engine: &ScoringEngine,
    timelines: &[CustomerTimeline],
    filter: &CohortFilter,
) -> Vec<CustomerScore> {
    let mut scores: Vec<CustomerScore> = timelines
        .iter()
        .map(|t| &t.customer)
        .filter(|c| c.is_active && filter.matches(c))
        .map(|customer| {
            let result = engine.weighted_risk_score(&customer.metrics);
            CustomerScore {
                name: customer.name.clone(),
                owner: customer.owner.clone(),
                segment: customer.segment.clone(),
                score: result.score,
                label: result.label,
                missing: engine.missing_required(&customer.metrics),
            }
        })
        .collect();

    scores.sort_by(|a, b| match (a.score, b.score) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
    scores
}

pub fn label_mix(scores: &[CustomerScore]) -> LabelMix {
    let mut mix = LabelMix::default();
    for score in scores {
        match score.label {
            HealthLabel::High => mix.high += 1,
            HealthLabel::Medium => mix.medium += 1,
            HealthLabel::Low => mix.low += 1,
            HealthLabel::Incomplete => mix.incomplete += 1,
        }
    }
    mix
}

pub fn render_trend_table(series: &[MonthBucket]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<10} {:>8} {:>8} {:>8} {:>6}",
        "Month", "High%", "Medium%", "Low%", "Total"
    );
    for bucket in series {
        let _ = writeln!(
            output,
            "{:<10} {:>8.2} {:>8.2} {:>8.2} {:>6}",
            bucket.label, bucket.high_pct, bucket.medium_pct, bucket.low_pct, bucket.total_count
        );
    }
    output
}

pub fn render_trend_csv(series: &[MonthBucket]) -> anyhow::Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "month",
        "label",
        "high_pct",
        "medium_pct",
        "low_pct",
        "high_count",
        "medium_count",
        "low_count",
        "total_count",
    ])?;
    for bucket in series {
        writer.write_record([
            bucket.month.to_string(),
            bucket.label.clone(),
            format!("{:.2}", bucket.high_pct),
            format!("{:.2}", bucket.medium_pct),
            format!("{:.2}", bucket.low_pct),
            bucket.high_count.to_string(),
            bucket.medium_count.to_string(),
            bucket.low_count.to_string(),
            bucket.total_count.to_string(),
        ])?;
    }
    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// One customer's snapshots as a grid: a column per snapshot, oldest first,
/// a row per metric, then the weighted score and label of each snapshot.
pub fn render_history(engine: &ScoringEngine, timeline: &CustomerTimeline) -> String {
    let customer = &timeline.customer;
    let mut history: Vec<&HistoryEntry> = timeline.history.iter().collect();
    history.sort_by_key(|entry| entry.snapshot_date);

    let mut output = String::new();
    let _ = writeln!(
        output,
        "{} ({}, segment {})",
        customer.name, customer.owner, customer.segment
    );
    if history.is_empty() {
        let _ = writeln!(output, "No history recorded for this customer.");
        return output;
    }

    let width = MetricSlot::ALL
        .iter()
        .map(|slot| slot.label().len())
        .max()
        .unwrap_or_default();
    let results: Vec<_> = history
        .iter()
        .map(|entry| engine.weighted_risk_score(&entry.metrics))
        .collect();

    let _ = write!(output, "{:<width$}", "Metric");
    for entry in &history {
        let _ = write!(output, " {:>12}", entry.snapshot_date.format("%Y-%m-%d").to_string());
    }
    let _ = writeln!(output);

    for slot in MetricSlot::ALL {
        let _ = write!(output, "{:<width$}", slot.label());
        for entry in &history {
            let rating = entry.metrics.get(slot);
            let cell = if rating.is_rated() { rating.as_str() } else { "-" };
            let _ = write!(output, " {cell:>12}");
        }
        let _ = writeln!(output);
    }

    let _ = write!(output, "{:<width$}", "Health Score");
    for result in &results {
        let cell = result
            .score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = write!(output, " {cell:>12}");
    }
    let _ = writeln!(output);

    let _ = write!(output, "{:<width$}", "Label");
    for result in &results {
        let _ = write!(output, " {:>12}", result.label.as_str());
    }
    let _ = writeln!(output);

    output
}

pub fn build_report(
    engine: &ScoringEngine,
    timelines: &[CustomerTimeline],
    filter: &CohortFilter,
) -> String {
    let scores = score_customers(engine, timelines, filter);
    let mix = label_mix(&scores);
    let series = aggregate_monthly(engine, timelines, filter);

    let mut output = String::new();
    let _ = writeln!(output, "# Customer Health Report");
    let _ = writeln!(output, "Cohort: {}", filter.title());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Current Label Mix");

    if scores.is_empty() {
        let _ = writeln!(output, "No active customers match this cohort.");
    } else {
        let _ = writeln!(output, "- High: {}", mix.high);
        let _ = writeln!(output, "- Medium: {}", mix.medium);
        let _ = writeln!(output, "- Low: {}", mix.low);
        let _ = writeln!(output, "- Incomplete: {}", mix.incomplete);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lowest Health Customers");

    let scored: Vec<_> = scores.iter().filter(|s| s.score.is_some()).collect();
    if scored.is_empty() {
        let _ = writeln!(output, "No scored customers in this cohort.");
    } else {
        for score in scored.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, segment {}) score {} [{}]",
                score.name,
                score.owner,
                score.segment,
                score.score.unwrap_or_default(),
                score.label
            );
        }
    }

    let incomplete: Vec<_> = scores.iter().filter(|s| s.score.is_none()).collect();
    if !incomplete.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Incomplete Surveys");
        for score in incomplete {
            let missing = score
                .missing
                .iter()
                .map(|slot| slot.label())
                .collect::<Vec<_>>()
                .join(", ");
            let missing = if missing.is_empty() {
                "optional metrics outweigh the base".to_string()
            } else {
                missing
            };
            let _ = writeln!(output, "- {} ({}): missing {}", score.name, score.owner, missing);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Monthly Trend");
    if series.is_empty() {
        let _ = writeln!(output, "No historical data available for this cohort.");
    } else {
        let _ = writeln!(output, "| Month | High | Medium | Low | Customers |");
        let _ = writeln!(output, "|---|---|---|---|---|");
        for bucket in &series {
            let _ = writeln!(
                output,
                "| {} | {:.2}% ({}) | {:.2}% ({}) | {:.2}% ({}) | {} |",
                bucket.label,
                bucket.high_pct,
                bucket.high_count,
                bucket.medium_pct,
                bucket.medium_count,
                bucket.low_pct,
                bucket.low_count,
                bucket.total_count
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerRecord, HistoryEntry, MetricRating, MetricValues};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn timeline(name: &str, current: MetricValues, history: Vec<HistoryEntry>) -> CustomerTimeline {
        CustomerTimeline {
            customer: CustomerRecord {
                id: Uuid::new_v4(),
                name: name.to_string(),
                segment: "1".to_string(),
                owner: "Brooke".to_string(),
                metrics: current,
                notes: String::new(),
                is_active: true,
            },
            history,
        }
    }

    #[test]
    fn scores_sort_lowest_first_with_incomplete_last() {
        let engine = ScoringEngine::default();
        let timelines = vec![
            timeline("Gap", MetricValues::default(), Vec::new()),
            timeline("Strong", MetricValues::uniform(MetricRating::High), Vec::new()),
            timeline("Weak", MetricValues::uniform(MetricRating::Low), Vec::new()),
        ];

        let scores = score_customers(&engine, &timelines, &CohortFilter::default());
        let names: Vec<_> = scores.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Weak", "Strong", "Gap"]);
        assert_eq!(scores[2].missing.len(), 6);
        assert_eq!(
            label_mix(&scores),
            LabelMix {
                high: 1,
                medium: 0,
                low: 1,
                incomplete: 1
            }
        );
    }

    #[test]
    fn report_includes_trend_and_incomplete_sections() {
        let engine = ScoringEngine::default();
        let history = vec![HistoryEntry {
            snapshot_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            metrics: MetricValues::uniform(MetricRating::Medium),
        }];
        let timelines = vec![
            timeline("Acme", MetricValues::uniform(MetricRating::Medium), history),
            timeline("Gap", MetricValues::default(), Vec::new()),
        ];

        let report = build_report(&engine, &timelines, &CohortFilter::default());
        assert!(report.contains("Cohort: OVERALL"));
        assert!(report.contains("- Acme (Brooke, segment 1) score 90 [Medium]"));
        assert!(report.contains("## Incomplete Surveys"));
        assert!(report.contains("| 3/1/2024 | 0.00% (0) | 100.00% (1) | 0.00% (0) | 1 |"));
    }

    #[test]
    fn empty_cohort_reports_empty_state() {
        let engine = ScoringEngine::default();
        let report = build_report(&engine, &[], &CohortFilter::default());
        assert!(report.contains("No active customers match this cohort."));
        assert!(report.contains("No historical data available for this cohort."));
    }

    fn cells<'a>(grid: &'a str, row: &str) -> Vec<&'a str> {
        let line = grid
            .lines()
            .find(|line| line.starts_with(row))
            .unwrap_or_else(|| panic!("missing row {row}"));
        line[row.len()..].split_whitespace().collect()
    }

    #[test]
    fn history_grid_runs_oldest_to_newest() {
        let engine = ScoringEngine::default();
        let required_high = MetricValues::from_fn(|slot| {
            if slot.is_optional() {
                MetricRating::Unrated
            } else {
                MetricRating::High
            }
        });
        let history = vec![
            HistoryEntry {
                snapshot_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                metrics: MetricValues::default().with(MetricSlot::ChampionNps, MetricRating::Low),
            },
            HistoryEntry {
                snapshot_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
                metrics: MetricValues::uniform(MetricRating::Low),
            },
            HistoryEntry {
                snapshot_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                metrics: required_high,
            },
        ];
        let grid = render_history(&engine, &timeline("Acme", MetricValues::default(), history));

        assert!(grid.starts_with("Acme (Brooke, segment 1)\n"));
        assert_eq!(cells(&grid, "Metric"), vec!["2024-01-15", "2024-03-02", "2024-05-02"]);
        assert_eq!(cells(&grid, "Champion/Decision Maker NPS"), vec!["-", "Low", "Low"]);
        assert_eq!(cells(&grid, "Tools Deployed"), vec!["High", "Low", "-"]);
        assert_eq!(cells(&grid, "Health Score"), vec!["144", "30", "-"]);
        assert_eq!(cells(&grid, "Label"), vec!["High", "Low", "Incomplete"]);
    }

    #[test]
    fn history_grid_without_snapshots() {
        let engine = ScoringEngine::default();
        let grid = render_history(&engine, &timeline("Gap", MetricValues::default(), Vec::new()));
        assert!(grid.contains("No history recorded for this customer."));
    }

    #[test]
    fn trend_csv_has_header_and_rows() {
        let engine = ScoringEngine::default();
        let history = vec![HistoryEntry {
            snapshot_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            metrics: MetricValues::uniform(MetricRating::High),
        }];
        let timelines = vec![timeline("Acme", MetricValues::default(), history)];
        let series = aggregate_monthly(&engine, &timelines, &CohortFilter::default());

        let csv = render_trend_csv(&series).expect("csv");
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("month,label,high_pct"));
        assert_eq!(lines.next().unwrap(), "2024-03,3/1/2024,100.00,0.00,0.00,1,0,0,1");
    }
}
