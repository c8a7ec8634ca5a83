use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CustomerUpdate, HistoryInsert, MetricRating, MetricSlot, MetricValues};
use crate::scoring::ScoringEngine;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SurveyError {
    #[error("customer {customer_id} is missing required ratings: {}", format_slots(.missing))]
    MissingRequired {
        customer_id: Uuid,
        missing: Vec<MetricSlot>,
    },
    #[error("expected SLOT=VALUE, got '{0}'")]
    MalformedRating(String),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("no survey responses to submit")]
    Empty,
}

fn format_slots(slots: &[MetricSlot]) -> String {
    slots
        .iter()
        .map(|slot| slot.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ratings a customer owner entered for one customer.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyResponse {
    pub customer_id: Uuid,
    pub metrics: MetricValues,
    pub notes: String,
}

/// Writes produced by submitting one survey response.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPlan {
    pub update: CustomerUpdate,
    pub history: HistoryInsert,
}

impl SubmissionPlan {
    pub fn customer_id(&self) -> Uuid {
        self.update.customer_id
    }
}

/// Parses `slot=value` pairs such as `roi_established=High`.
pub fn parse_ratings<S: AsRef<str>>(pairs: &[S]) -> Result<MetricValues, SurveyError> {
    let mut metrics = MetricValues::default();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| SurveyError::MalformedRating(pair.to_string()))?;
        let slot =
            MetricSlot::from_key(key).ok_or_else(|| SurveyError::UnknownMetric(key.to_string()))?;
        metrics.set(slot, MetricRating::parse(value));
    }
    Ok(metrics)
}

/// Validates every response and plans one live-record update plus one
/// history snapshot dated `today` per customer. Nothing is planned if any
/// response is missing a required rating.
pub fn plan_submission(
    engine: &ScoringEngine,
    responses: &[SurveyResponse],
    today: NaiveDate,
) -> Result<Vec<SubmissionPlan>, SurveyError> {
    if responses.is_empty() {
        return Err(SurveyError::Empty);
    }

    responses
        .iter()
        .map(|response| {
            let missing = engine.missing_required(&response.metrics);
            if !missing.is_empty() {
                return Err(SurveyError::MissingRequired {
                    customer_id: response.customer_id,
                    missing,
                });
            }

            Ok(SubmissionPlan {
                update: CustomerUpdate {
                    customer_id: response.customer_id,
                    metrics: response.metrics,
                    notes: response.notes.clone(),
                },
                history: HistoryInsert {
                    snapshot_date: today,
                    metrics: response.metrics,
                },
            })
        })
        .collect()
}
