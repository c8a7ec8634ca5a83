//! Tolerant parsing of historical spreadsheet exports.
//!
//! The tokenizer is deliberately simple: quotes only protect newlines, and
//! fields are split on every comma, including commas inside quoted values.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    CustomerCreate, CustomerRecord, CustomerTimeline, HistoryEntry, HistoryInsert, MetricRating,
    MetricValues,
};

pub const CUSTOMER_COLUMN: &str = "Customer";
pub const DATE_COLUMN: &str = "Date";
pub const OWNER_COLUMN: &str = "Owner";
pub const SEGMENT_COLUMN: &str = "Segment/Industry";
pub const SEGMENT_FALLBACK_COLUMN: &str = "Segment";

/// Marks an unknown date in exported sheets (e.g. `###`).
const DATE_PLACEHOLDER: char = '#';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("the file contains no header row")]
    MissingHeader,
    #[error("no valid data found in CSV file ({skipped} rows skipped)")]
    NoUsableRows { skipped: usize },
}

/// One data row keyed by header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvRecord {
    fields: HashMap<String, String>,
}

impl CsvRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    fn get_or_empty(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    pub fn customer(&self) -> &str {
        self.get_or_empty(CUSTOMER_COLUMN)
    }

    pub fn date(&self) -> &str {
        self.get_or_empty(DATE_COLUMN)
    }

    pub fn owner(&self) -> &str {
        self.get_or_empty(OWNER_COLUMN)
    }

    pub fn segment(&self) -> &str {
        match self.get(SEGMENT_COLUMN) {
            Some(value) if !value.is_empty() => value,
            _ => self.get_or_empty(SEGMENT_FALLBACK_COLUMN),
        }
    }

    /// Ratings for every slot, looked up by export column then display label.
    pub fn metrics(&self) -> MetricValues {
        MetricValues::from_fn(|slot| {
            let raw = self
                .get(slot.csv_column())
                .or_else(|| self.get(slot.label()))
                .unwrap_or("");
            MetricRating::parse(raw)
        })
    }

    /// Snapshot date, or `None` when empty, a placeholder, or unparseable.
    pub fn snapshot_date(&self) -> Option<NaiveDate> {
        let raw = self.date().trim();
        if raw.is_empty() || raw.contains(DATE_PLACEHOLDER) {
            return None;
        }
        parse_date(raw)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CsvRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub records: Vec<CsvRecord>,
    pub short_rows: usize,
    pub nameless_rows: usize,
}

impl ParsedCsv {
    pub fn skipped(&self) -> usize {
        self.short_rows + self.nameless_rows
    }
}

/// One customer to create plus every dated snapshot for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedCustomer {
    pub customer: CustomerCreate,
    pub history: Vec<HistoryInsert>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    pub customers: Vec<ImportedCustomer>,
    pub rows_skipped: usize,
}

impl ImportBatch {
    pub fn customers_created(&self) -> usize {
        self.customers.len()
    }

    pub fn history_created(&self) -> usize {
        self.customers.iter().map(|c| c.history.len()).sum()
    }

    /// In-memory timelines with fresh ids, for previewing a file without
    /// writing it anywhere.
    pub fn into_timelines(self) -> Vec<CustomerTimeline> {
        self.customers
            .into_iter()
            .map(|imported| {
                let customer = imported.customer;
                let mut timeline = CustomerTimeline {
                    customer: CustomerRecord {
                        id: Uuid::new_v4(),
                        name: customer.name,
                        segment: customer.segment,
                        owner: customer.owner,
                        metrics: customer.metrics,
                        notes: customer.notes,
                        is_active: customer.is_active,
                    },
                    history: imported
                        .history
                        .into_iter()
                        .map(|h| HistoryEntry {
                            snapshot_date: h.snapshot_date,
                            metrics: h.metrics,
                        })
                        .collect(),
                };
                timeline.sort_newest_first();
                timeline
            })
            .collect()
    }
}

/// Splits text into non-blank logical lines. Newlines inside double quotes
/// stay in the line; carriage returns are always dropped.
pub fn split_logical_lines(text: &str) -> Vec<String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in text.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        }

        match ch {
            '\n' if !in_quotes => {
                if !current.trim().is_empty() {
                    lines.push(std::mem::take(&mut current));
                } else {
                    current.clear();
                }
            }
            '\r' => {}
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        lines.push(current);
    }

    lines
}

fn clean_value(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

fn clean_header(raw: &str) -> String {
    clean_value(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_rows(text: &str) -> Result<ParsedCsv, ImportError> {
    let lines = split_logical_lines(text);
    let (header_line, data_lines) = lines.split_first().ok_or(ImportError::MissingHeader)?;

    let headers: Vec<String> = header_line.split(',').map(clean_header).collect();
    let mut parsed = ParsedCsv {
        headers,
        ..ParsedCsv::default()
    };

    for line in data_lines {
        let values: Vec<String> = line.split(',').map(clean_value).collect();
        if values.len() < parsed.headers.len() {
            parsed.short_rows += 1;
            continue;
        }

        let record: CsvRecord = parsed
            .headers
            .iter()
            .cloned()
            .zip(values)
            .collect();

        if record.customer().is_empty() {
            parsed.nameless_rows += 1;
            continue;
        }

        parsed.records.push(record);
    }

    debug!(
        headers = parsed.headers.len(),
        records = parsed.records.len(),
        short_rows = parsed.short_rows,
        nameless_rows = parsed.nameless_rows,
        "parsed csv rows"
    );

    Ok(parsed)
}

/// Groups records per customer: the newest row becomes the live record and
/// every row with a usable date becomes a history snapshot.
pub fn build_import(parsed: ParsedCsv) -> Result<ImportBatch, ImportError> {
    if parsed.records.is_empty() {
        return Err(ImportError::NoUsableRows {
            skipped: parsed.skipped(),
        });
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<CsvRecord>> = HashMap::new();
    for record in parsed.records {
        let name = record.customer().to_string();
        groups
            .entry(name.clone())
            .or_insert_with(|| {
                order.push(name);
                Vec::new()
            })
            .push(record);
    }

    let mut customers = Vec::with_capacity(order.len());
    let mut rows_skipped = parsed.short_rows + parsed.nameless_rows;

    for name in order {
        let Some(mut rows) = groups.remove(&name) else {
            continue;
        };

        // Stable sort: undated rows keep file order after every dated row.
        rows.sort_by_cached_key(|row| std::cmp::Reverse(parse_date(row.date().trim())));

        let latest = &rows[0];
        let customer = CustomerCreate {
            name: name.clone(),
            segment: latest.segment().to_string(),
            owner: latest.owner().to_string(),
            metrics: latest.metrics(),
            notes: String::new(),
            is_active: true,
        };

        let history: Vec<HistoryInsert> = rows
            .iter()
            .filter_map(|row| {
                row.snapshot_date().map(|snapshot_date| HistoryInsert {
                    snapshot_date,
                    metrics: row.metrics(),
                })
            })
            .collect();

        let undated = rows.len() - history.len();
        if undated > 0 {
            debug!(customer = %name, undated, "rows without a usable date kept out of history");
        }
        rows_skipped += undated;

        customers.push(ImportedCustomer { customer, history });
    }

    let batch = ImportBatch {
        customers,
        rows_skipped,
    };
    info!(
        customers = batch.customers_created(),
        history = batch.history_created(),
        skipped = batch.rows_skipped,
        "prepared import batch"
    );
    Ok(batch)
}

pub fn parse_import(text: &str) -> Result<ImportBatch, ImportError> {
    build_import(parse_rows(text)?)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }

    // Two-digit years first: `%Y` would read "24" as year 24.
    const FORMATS: [&str; 6] = [
        "%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d", "%b %d, %Y", "%B %d, %Y",
    ];

    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricSlot;

    const HEADER: &str = "Customer,Date,Owner,Segment/Industry,Tools Deployed,Interaction with Champion,Interaction with Decision Maker,Days Active (30 Days),ROI Established,Champion/Decision Maker NPS,End User NPS,End User Support Survey Score,Leadership Change,Applicant CES Score";

    fn row(customer: &str, date: &str, rating: &str) -> String {
        format!(
            "{customer},{date},Brooke,2,{rating},{rating},{rating},{rating},{rating},,,,{rating},"
        )
    }

    #[test]
    fn quoted_newlines_stay_in_one_line() {
        let lines = split_logical_lines("a,\"b\nc\"\r\n\r\n\nd,e\n");
        assert_eq!(lines, vec!["a,\"b\nc\"".to_string(), "d,e".to_string()]);
    }

    #[test]
    fn strips_byte_order_mark() {
        let lines = split_logical_lines("\u{feff}Customer,Date\nAcme,2024-01-01");
        assert_eq!(lines[0], "Customer,Date");
    }

    #[test]
    fn headers_are_unquoted_and_collapsed() {
        let parsed = parse_rows("\"Customer\",  Days   Active (30  Days) \nAcme,High").expect("parse");
        assert_eq!(parsed.headers, vec!["Customer", "Days Active (30 Days)"]);
        assert_eq!(parsed.records[0].get("Days Active (30 Days)"), Some("High"));
    }

    #[test]
    fn short_and_nameless_rows_are_skipped() {
        let text = format!("{HEADER}\nAcme,2024-01-01\n{}\n{}", row("", "2024-01-01", "High"), row("Acme", "2024-01-01", "High"));
        let parsed = parse_rows(&text).expect("parse");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.short_rows, 1);
        assert_eq!(parsed.nameless_rows, 1);
    }

    #[test]
    fn two_dates_give_one_customer_and_two_snapshots() {
        let text = format!(
            "{HEADER}\n{}\n{}\n",
            row("Acme", "1/15/2024", "Low"),
            row("Acme", "2/15/2024", "High")
        );
        let batch = parse_import(&text).expect("import");

        assert_eq!(batch.customers_created(), 1);
        assert_eq!(batch.history_created(), 2);

        let acme = &batch.customers[0];
        assert_eq!(acme.customer.owner, "Brooke");
        assert_eq!(acme.customer.segment, "2");
        assert_eq!(
            acme.customer.metrics.get(MetricSlot::Leadership),
            MetricRating::High
        );
        assert_eq!(
            acme.customer.metrics.get(MetricSlot::ChampionNps),
            MetricRating::Unrated
        );
        assert_eq!(
            acme.history[0].snapshot_date,
            NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()
        );
    }

    #[test]
    fn placeholder_date_skips_history_only() {
        let text = format!(
            "{HEADER}\n{}\n{}\n",
            row("Acme", "###", "Medium"),
            row("Acme", "2024-03-01", "High")
        );
        let batch = parse_import(&text).expect("import");

        assert_eq!(batch.customers_created(), 1);
        assert_eq!(batch.history_created(), 1);
        assert_eq!(batch.rows_skipped, 1);
        assert_eq!(
            batch.customers[0].customer.metrics.get(MetricSlot::ToolsDeployed),
            MetricRating::High
        );
    }

    #[test]
    fn undated_group_still_creates_customer() {
        let text = format!("{HEADER}\n{}\n", row("Acme", "###", "Low"));
        let batch = parse_import(&text).expect("import");
        assert_eq!(batch.customers_created(), 1);
        assert_eq!(batch.history_created(), 0);
    }

    #[test]
    fn customers_keep_first_seen_order() {
        let text = format!(
            "{HEADER}\n{}\n{}\n{}\n",
            row("Zeta", "2024-01-01", "Low"),
            row("Acme", "2024-01-01", "Low"),
            row("Zeta", "2024-02-01", "Low")
        );
        let batch = parse_import(&text).expect("import");
        let names: Vec<_> = batch.customers.iter().map(|c| c.customer.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Acme"]);
    }

    #[test]
    fn segment_falls_back_to_plain_column() {
        let parsed = parse_rows("Customer,Segment\nAcme,3").expect("parse");
        assert_eq!(parsed.records[0].segment(), "3");
    }

    #[test]
    fn header_only_file_has_no_usable_rows() {
        let err = parse_import(HEADER).unwrap_err();
        assert_eq!(err, ImportError::NoUsableRows { skipped: 0 });
    }

    #[test]
    fn blank_file_has_no_header() {
        assert_eq!(parse_import("\u{feff}\r\n\n").unwrap_err(), ImportError::MissingHeader);
    }

    #[test]
    fn parses_common_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date("2024-03-05"), expected);
        assert_eq!(parse_date("3/5/2024"), expected);
        assert_eq!(parse_date("2024/03/05"), expected);
        assert_eq!(parse_date("Mar 5, 2024"), expected);
        assert_eq!(parse_date("3/5/24"), expected);
        assert_eq!(parse_date("2024-03-05T10:00:00Z"), expected);
        assert_eq!(parse_date("soon"), None);
    }
}
