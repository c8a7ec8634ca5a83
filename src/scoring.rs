use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{HealthLabel, MetricRating, MetricSlot, MetricValues, ScoreResult};

const MAX_WEIGHT: u32 = 5;

/// Points awarded per rating before the slot weight is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointTable {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl PointTable {
    pub fn points(&self, rating: MetricRating) -> u32 {
        match rating {
            MetricRating::High => self.high,
            MetricRating::Medium => self.medium,
            MetricRating::Low => self.low,
            MetricRating::Unrecognized | MetricRating::Unrated => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub high: f64,
    pub low: f64,
}

/// Weight and optionality of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWeight {
    pub weight: u32,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub base: f64,
    pub penalty_multiplier: u32,
    pub thresholds: Thresholds,
    pub points: PointTable,
    #[serde(with = "slot_table")]
    pub slots: [SlotWeight; MetricSlot::COUNT],
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let weight = |slot: MetricSlot| match slot {
            MetricSlot::ToolsDeployed => 1,
            MetricSlot::InteractionChampion => 3,
            MetricSlot::InteractionDecisionMaker => 4,
            MetricSlot::DaysActive => 3,
            MetricSlot::RoiEstablished => 5,
            MetricSlot::Leadership => 5,
            MetricSlot::ChampionNps => 5,
            MetricSlot::EndUserNps => 2,
            MetricSlot::SupportSurvey => 1,
            MetricSlot::ApplicantCes => 1,
        };

        Self {
            base: 165.0,
            penalty_multiplier: 5,
            thresholds: Thresholds {
                high: 130.0,
                low: 60.0,
            },
            points: PointTable {
                high: 5,
                medium: 3,
                low: 1,
            },
            slots: MetricSlot::ALL.map(|slot| SlotWeight {
                weight: weight(slot),
                optional: slot.is_optional(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScoringConfigError {
    #[error("weight {weight} for {slot} is outside 1..=5")]
    WeightOutOfRange { slot: MetricSlot, weight: u32 },
    #[error("base must be positive, got {0}")]
    NonPositiveBase(f64),
    #[error("high threshold {high} must exceed low threshold {low}")]
    InvertedThresholds { high: f64, low: f64 },
    #[error("{field} value {value} is too large to score ten slots")]
    ValueTooLarge { field: &'static str, value: u32 },
    #[error("failed to parse scoring config: {0}")]
    Parse(String),
}

impl ScoringConfig {
    pub fn weight(&self, slot: MetricSlot) -> u32 {
        self.slots[slot.index()].weight
    }

    pub fn is_optional(&self, slot: MetricSlot) -> bool {
        self.slots[slot.index()].optional
    }

    pub fn from_json(raw: &str) -> Result<Self, ScoringConfigError> {
        let config: ScoringConfig =
            serde_json::from_str(raw).map_err(|err| ScoringConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        if self.base.is_nan() || self.base <= 0.0 {
            return Err(ScoringConfigError::NonPositiveBase(self.base));
        }
        if self.thresholds.high <= self.thresholds.low {
            return Err(ScoringConfigError::InvertedThresholds {
                high: self.thresholds.high,
                low: self.thresholds.low,
            });
        }
        for slot in MetricSlot::ALL {
            let weight = self.weight(slot);
            if !(1..=MAX_WEIGHT).contains(&weight) {
                return Err(ScoringConfigError::WeightOutOfRange { slot, weight });
            }
        }

        // Every slot at the heaviest weight must still fit in a u32 sum.
        let fields = [
            ("points.high", self.points.high),
            ("points.medium", self.points.medium),
            ("points.low", self.points.low),
            ("penalty_multiplier", self.penalty_multiplier),
        ];
        for (field, value) in fields {
            let worst_case = value
                .checked_mul(MAX_WEIGHT)
                .and_then(|per_slot| per_slot.checked_mul(MetricSlot::COUNT as u32));
            if worst_case.is_none() {
                return Err(ScoringConfigError::ValueTooLarge { field, value });
            }
        }
        Ok(())
    }
}

/// Pure scoring over a fixed, validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Every required slot that has no rating, in slot order.
    pub fn missing_required(&self, metrics: &MetricValues) -> Vec<MetricSlot> {
        metrics
            .iter()
            .filter(|(slot, rating)| !self.config.is_optional(*slot) && !rating.is_rated())
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Sum of `points * weight`, or `None` when a required slot is unrated.
    pub fn raw_score(&self, metrics: &MetricValues) -> Option<u32> {
        let mut total = 0;
        let mut missing_required = false;

        for (slot, rating) in metrics.iter() {
            if !rating.is_rated() {
                if !self.config.is_optional(slot) {
                    missing_required = true;
                }
                continue;
            }
            total += self.config.points.points(rating) * self.config.weight(slot);
        }

        if missing_required {
            None
        } else {
            Some(total)
        }
    }

    /// Penalty accrued by unrated optional slots.
    pub fn penalty(&self, metrics: &MetricValues) -> u32 {
        metrics
            .iter()
            .filter(|(slot, rating)| self.config.is_optional(*slot) && !rating.is_rated())
            .map(|(slot, _)| self.config.weight(slot) * self.config.penalty_multiplier)
            .sum()
    }

    pub fn weighted_risk_score(&self, metrics: &MetricValues) -> ScoreResult {
        let Some(raw) = self.raw_score(metrics) else {
            return ScoreResult::incomplete();
        };

        let base = self.config.base;
        let penalty = f64::from(self.penalty(metrics));
        if penalty >= base {
            // Denominator would be zero or negative.
            return ScoreResult::incomplete();
        }

        let weighted = base / (base - penalty) * f64::from(raw);
        ScoreResult {
            score: Some(weighted.round() as i64),
            label: self.health_label(weighted),
        }
    }

    /// Label for an unrounded weighted score.
    pub fn health_label(&self, weighted: f64) -> HealthLabel {
        let thresholds = &self.config.thresholds;
        if weighted > thresholds.high {
            HealthLabel::High
        } else if weighted > thresholds.low {
            HealthLabel::Medium
        } else {
            HealthLabel::Low
        }
    }
}

mod slot_table {
    use std::collections::BTreeMap;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::SlotWeight;
    use crate::models::MetricSlot;

    pub fn serialize<S: Serializer>(
        slots: &[SlotWeight; MetricSlot::COUNT],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<MetricSlot, SlotWeight> = MetricSlot::ALL
            .into_iter()
            .map(|slot| (slot, slots[slot.index()]))
            .collect();
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[SlotWeight; MetricSlot::COUNT], D::Error> {
        let map = BTreeMap::<MetricSlot, SlotWeight>::deserialize(deserializer)?;
        let mut slots = [SlotWeight {
            weight: 0,
            optional: false,
        }; MetricSlot::COUNT];
        for slot in MetricSlot::ALL {
            let entry = map
                .get(&slot)
                .ok_or_else(|| D::Error::custom(format!("missing weight for {}", slot.key())))?;
            slots[slot.index()] = *entry;
        }
        Ok(slots)
    }
}
