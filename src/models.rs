use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// One of the ten rated health categories collected per snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSlot {
    ToolsDeployed,
    InteractionChampion,
    InteractionDecisionMaker,
    DaysActive,
    RoiEstablished,
    Leadership,
    ChampionNps,
    EndUserNps,
    SupportSurvey,
    ApplicantCes,
}

impl MetricSlot {
    pub const COUNT: usize = 10;

    pub const ALL: [MetricSlot; MetricSlot::COUNT] = [
        MetricSlot::ToolsDeployed,
        MetricSlot::InteractionChampion,
        MetricSlot::InteractionDecisionMaker,
        MetricSlot::DaysActive,
        MetricSlot::RoiEstablished,
        MetricSlot::Leadership,
        MetricSlot::ChampionNps,
        MetricSlot::EndUserNps,
        MetricSlot::SupportSurvey,
        MetricSlot::ApplicantCes,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier, also used as the database column name.
    pub fn key(self) -> &'static str {
        match self {
            MetricSlot::ToolsDeployed => "tools_deployed",
            MetricSlot::InteractionChampion => "interaction_champion",
            MetricSlot::InteractionDecisionMaker => "interaction_decision_maker",
            MetricSlot::DaysActive => "days_active",
            MetricSlot::RoiEstablished => "roi_established",
            MetricSlot::Leadership => "leadership",
            MetricSlot::ChampionNps => "champion_nps",
            MetricSlot::EndUserNps => "end_user_nps",
            MetricSlot::SupportSurvey => "support_survey",
            MetricSlot::ApplicantCes => "applicant_ces",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricSlot::ToolsDeployed => "Tools Deployed",
            MetricSlot::InteractionChampion => "Engagement with Champion",
            MetricSlot::InteractionDecisionMaker => "Engagement with Decision Maker",
            MetricSlot::DaysActive => "Days Active (30 Days)",
            MetricSlot::RoiEstablished => "ROI",
            MetricSlot::Leadership => "Leadership Change",
            MetricSlot::ChampionNps => "Champion/Decision Maker NPS",
            MetricSlot::EndUserNps => "End User NPS",
            MetricSlot::SupportSurvey => "End User Support Survey Score",
            MetricSlot::ApplicantCes => "Applicant CES Score",
        }
    }

    /// Column header used by historical spreadsheet exports.
    pub fn csv_column(self) -> &'static str {
        match self {
            MetricSlot::InteractionChampion => "Interaction with Champion",
            MetricSlot::InteractionDecisionMaker => "Interaction with Decision Maker",
            MetricSlot::RoiEstablished => "ROI Established",
            other => other.label(),
        }
    }

    /// Whether the slot is optional in the stock scoring table.
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            MetricSlot::ChampionNps
                | MetricSlot::EndUserNps
                | MetricSlot::SupportSurvey
                | MetricSlot::ApplicantCes
        )
    }

    /// Accepts the snake_case key, with `-` allowed in place of `_`.
    pub fn from_key(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|slot| slot.key() == normalized)
    }
}

impl fmt::Display for MetricSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single qualitative rating. `Unrated` means the value was not collected;
/// `Unrecognized` is non-empty text that matched none of the known ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricRating {
    High,
    Medium,
    Low,
    Unrecognized,
    #[default]
    Unrated,
}

impl MetricRating {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return MetricRating::Unrated;
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "high" => MetricRating::High,
            "medium" => MetricRating::Medium,
            "low" => MetricRating::Low,
            _ => MetricRating::Unrecognized,
        }
    }

    pub fn is_rated(self) -> bool {
        !matches!(self, MetricRating::Unrated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricRating::High => "High",
            MetricRating::Medium => "Medium",
            MetricRating::Low => "Low",
            MetricRating::Unrecognized => "Unknown",
            MetricRating::Unrated => "",
        }
    }
}

impl Serialize for MetricRating {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricRating {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(MetricRating::parse).unwrap_or_default())
    }
}

/// The ten ratings of one snapshot, indexed by [`MetricSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<MetricSlot, MetricRating>",
    into = "BTreeMap<MetricSlot, MetricRating>"
)]
pub struct MetricValues {
    ratings: [MetricRating; MetricSlot::COUNT],
}

impl MetricValues {
    pub fn from_fn(mut rating: impl FnMut(MetricSlot) -> MetricRating) -> Self {
        let mut values = Self::default();
        for slot in MetricSlot::ALL {
            values.ratings[slot.index()] = rating(slot);
        }
        values
    }

    pub fn uniform(rating: MetricRating) -> Self {
        Self::from_fn(|_| rating)
    }

    pub fn get(&self, slot: MetricSlot) -> MetricRating {
        self.ratings[slot.index()]
    }

    pub fn set(&mut self, slot: MetricSlot, rating: MetricRating) {
        self.ratings[slot.index()] = rating;
    }

    pub fn with(mut self, slot: MetricSlot, rating: MetricRating) -> Self {
        self.set(slot, rating);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricSlot, MetricRating)> + '_ {
        MetricSlot::ALL
            .into_iter()
            .map(move |slot| (slot, self.ratings[slot.index()]))
    }
}

impl From<BTreeMap<MetricSlot, MetricRating>> for MetricValues {
    fn from(map: BTreeMap<MetricSlot, MetricRating>) -> Self {
        Self::from_fn(|slot| map.get(&slot).copied().unwrap_or_default())
    }
}

impl From<MetricValues> for BTreeMap<MetricSlot, MetricRating> {
    fn from(values: MetricValues) -> Self {
        values.iter().collect()
    }
}

/// Coarse health bucket. `High` is the healthiest bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthLabel {
    Incomplete,
    High,
    Medium,
    Low,
}

impl HealthLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthLabel::Incomplete => "Incomplete",
            HealthLabel::High => "High",
            HealthLabel::Medium => "Medium",
            HealthLabel::Low => "Low",
        }
    }
}

impl fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `score` is `None` exactly when `label` is [`HealthLabel::Incomplete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub score: Option<i64>,
    pub label: HealthLabel,
}

impl ScoreResult {
    pub fn incomplete() -> Self {
        Self {
            score: None,
            label: HealthLabel::Incomplete,
        }
    }
}

/// Live record for one customer as stored by the persistence layer.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerRecord {
    pub id: Uuid,
    pub name: String,
    pub segment: String,
    pub owner: String,
    pub metrics: MetricValues,
    pub notes: String,
    pub is_active: bool,
}

/// One dated, immutable history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub snapshot_date: NaiveDate,
    pub metrics: MetricValues,
}

/// A customer with its history. History is expected newest-first.
#[derive(Debug, Clone, Serialize)]
pub struct CustomerTimeline {
    pub customer: CustomerRecord,
    pub history: Vec<HistoryEntry>,
}

impl CustomerTimeline {
    pub fn sort_newest_first(&mut self) {
        self.history
            .sort_by(|a, b| b.snapshot_date.cmp(&a.snapshot_date));
    }
}

/// Instruction to create a customer from an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerCreate {
    pub name: String,
    pub segment: String,
    pub owner: String,
    pub metrics: MetricValues,
    pub notes: String,
    pub is_active: bool,
}

/// Instruction to append a history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryInsert {
    pub snapshot_date: NaiveDate,
    pub metrics: MetricValues,
}

/// Instruction to overwrite a customer's live ratings after a survey.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerUpdate {
    pub customer_id: Uuid,
    pub metrics: MetricValues,
    pub notes: String,
}
