use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fiscal::{self, FiscalQuarter};

/// Sales stages in pipeline order. The last two are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Prospecting,
    Discovery,
    Demo,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
}

impl Stage {
    pub const PIPELINE: [Self; 7] = [
        Self::Prospecting,
        Self::Discovery,
        Self::Demo,
        Self::Proposal,
        Self::Negotiation,
        Self::ClosedWon,
        Self::ClosedLost,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Prospecting => "prospecting",
            Self::Discovery => "discovery",
            Self::Demo => "demo",
            Self::Proposal => "proposal",
            Self::Negotiation => "negotiation",
            Self::ClosedWon => "closedWon",
            Self::ClosedLost => "closedLost",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Prospecting => "Prospecting",
            Self::Discovery => "Discovery",
            Self::Demo => "Demo",
            Self::Proposal => "Proposal",
            Self::Negotiation => "Negotiation",
            Self::ClosedWon => "Closed Won",
            Self::ClosedLost => "Closed Lost",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let wanted = normalize_key(key);
        Self::PIPELINE
            .into_iter()
            .find(|stage| normalize_key(stage.key()) == wanted)
    }

    pub fn default_confidence(self) -> u8 {
        match self {
            Self::Prospecting => 10,
            Self::Discovery => 20,
            Self::Demo => 40,
            Self::Proposal => 60,
            Self::Negotiation => 80,
            Self::ClosedWon => 100,
            Self::ClosedLost => 0,
        }
    }

    pub fn default_forecast_category(self) -> ForecastCategory {
        match self {
            Self::Prospecting | Self::Discovery | Self::Demo => ForecastCategory::Pipeline,
            Self::Proposal => ForecastCategory::BestCase,
            Self::Negotiation => ForecastCategory::Commit,
            Self::ClosedWon => ForecastCategory::ClosedWon,
            Self::ClosedLost => ForecastCategory::ClosedLost,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::ClosedWon | Self::ClosedLost)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum ForecastCategory {
    Pipeline,
    BestCase,
    Commit,
    ClosedWon,
    ClosedLost,
}

impl ForecastCategory {
    pub const ALL: [Self; 5] = [
        Self::Pipeline,
        Self::BestCase,
        Self::Commit,
        Self::ClosedWon,
        Self::ClosedLost,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::BestCase => "bestCase",
            Self::Commit => "commit",
            Self::ClosedWon => "closedWon",
            Self::ClosedLost => "closedLost",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Pipeline => "Pipeline",
            Self::BestCase => "Best Case",
            Self::Commit => "Commit",
            Self::ClosedWon => "Closed Won",
            Self::ClosedLost => "Closed Lost",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let wanted = normalize_key(key);
        Self::ALL
            .into_iter()
            .find(|category| normalize_key(category.key()) == wanted)
    }
}

// "closedWon", "closed-won" and "closed_won" all name the same value.
fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: Uuid,

    #[serde(default)]
    pub name: String,

    pub stage: Stage,

    #[serde(default)]
    pub forecast_category: Option<ForecastCategory>,

    #[serde(default)]
    pub confidence: Option<u8>,

    #[serde(default)]
    pub amount_arr: u64,

    #[serde(default)]
    pub close_date: Option<NaiveDate>,

    #[serde(default)]
    pub lost_date: Option<NaiveDate>,

    /// Cached fiscal quarter label of `close_date`.
    #[serde(default)]
    pub quarter: Option<String>,

    /// Only meaningful under custom views.
    #[serde(default)]
    pub column_id: Option<String>,
}

impl Opportunity {
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            stage,
            forecast_category: Some(stage.default_forecast_category()),
            confidence: Some(stage.default_confidence()),
            amount_arr: 0,
            close_date: None,
            lost_date: None,
            quarter: None,
            column_id: None,
        }
    }

    pub fn fiscal_quarter(&self, fiscal_year_start_month: u32) -> Option<FiscalQuarter> {
        self.close_date
            .map(|date| fiscal::quarter_of(date, fiscal_year_start_month))
    }

    pub fn refresh_quarter(&mut self, fiscal_year_start_month: u32) {
        self.quarter = self
            .fiscal_quarter(fiscal_year_start_month)
            .map(FiscalQuarter::label);
    }

    /// Applies every field present in `patch`. Stage changes do not pull
    /// in stage defaults here; callers put them in the patch explicitly.
    pub fn apply_patch(&mut self, patch: &OpportunityPatch, fiscal_year_start_month: u32) {
        if let Some(stage) = patch.stage {
            self.stage = stage;
        }
        if let Some(category) = patch.forecast_category {
            self.forecast_category = category;
        }
        if let Some(confidence) = patch.confidence {
            self.confidence = confidence;
        }
        if let Some(close_date) = patch.close_date {
            self.close_date = close_date;
            self.refresh_quarter(fiscal_year_start_month);
        }
        if let Some(lost_date) = patch.lost_date {
            self.lost_date = lost_date;
        }
        if let Some(column_id) = patch.column_id.as_ref() {
            self.column_id = column_id.clone();
        }
    }
}

/// Partial field update sent to the opportunity store. The outer `Option`
/// means "leave alone"; `Some(None)` clears the field.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_category: Option<Option<ForecastCategory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Option<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<Option<String>>,
}

impl OpportunityPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
