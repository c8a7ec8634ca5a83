use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::CustomerRecord;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Active customers per owner, sorted by owner. Customers without an owner
/// are left out.
pub fn owner_counts(customers: &[CustomerRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for customer in customers.iter().filter(|c| c.is_active) {
        if customer.owner.trim().is_empty() {
            continue;
        }
        *counts.entry(customer.owner.clone()).or_insert(0) += 1;
    }
    counts
}

/// Survey link for one owner's batch. The owner is percent-encoded as UTF-8.
pub fn survey_url(base_url: &str, owner: &str) -> String {
    let encoded: String = owner
        .bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect();
    format!("{}?survey&csm={encoded}", base_url.trim_end_matches('/'))
}

/// Monthly reminder text, or `None` when no owner has active customers.
pub fn build_reminder(
    counts: &BTreeMap<String, usize>,
    base_url: &str,
    month_label: &str,
) -> Option<String> {
    if counts.is_empty() {
        return None;
    }

    let mut output = String::new();
    let _ = writeln!(output, "*Customer Health Survey - {month_label}*");
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "It's time for the monthly customer health survey. Please complete yours by the end of the week."
    );
    let _ = writeln!(output);

    for (owner, count) in counts {
        let noun = if *count == 1 { "customer" } else { "customers" };
        let _ = writeln!(
            output,
            "- *{owner}* ({count} {noun}): <{}|Start Survey>",
            survey_url(base_url, owner)
        );
    }

    let _ = writeln!(output);
    let _ = write!(output, "_Use your personalized link above to begin._");
    Some(output)
}

pub async fn send_reminder(webhook_url: &str, text: &str) -> Result<(), NotifyError> {
    let response = reqwest::Client::new()
        .post(webhook_url)
        .json(&json!({ "text": text }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "webhook rejected reminder");
        return Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    info!("survey reminder delivered");
    Ok(())
}
