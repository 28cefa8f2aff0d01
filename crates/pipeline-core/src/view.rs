use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Views whose columns are computed from opportunity data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltInView {
    Quarterly,
    Stage,
    Forecast,
    ClosedLost,
    CustomerValue,
}

impl BuiltInView {
    pub const ALL: [Self; 5] = [
        Self::Quarterly,
        Self::Stage,
        Self::Forecast,
        Self::ClosedLost,
        Self::CustomerValue,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Quarterly => "quarterly",
            Self::Stage => "stage",
            Self::Forecast => "forecast",
            Self::ClosedLost => "closed-lost",
            Self::CustomerValue => "customer-value",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Quarterly => "Quarterly",
            Self::Stage => "Sales Stage",
            Self::Forecast => "Forecast",
            Self::ClosedLost => "Closed Lost",
            Self::CustomerValue => "Customer Value",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let wanted = key.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|view| view.key() == wanted)
    }

    pub fn kind(self) -> ViewKind {
        match self {
            Self::Quarterly => ViewKind::Quarterly,
            Self::Stage => ViewKind::Stage,
            Self::Forecast => ViewKind::Forecast,
            Self::ClosedLost => ViewKind::ClosedLost,
            Self::CustomerValue => ViewKind::CustomerValue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    Quarterly,
    Stage,
    Forecast,
    ClosedLost,
    CustomerValue,
    Custom,
}

impl ViewKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::Quarterly => "quarterly",
            Self::Stage => "stage",
            Self::Forecast => "forecast",
            Self::ClosedLost => "closed-lost",
            Self::CustomerValue => "customer-value",
            Self::Custom => "custom",
        }
    }

    pub fn is_virtual(self) -> bool {
        !matches!(self, Self::Custom)
    }

    /// Closed-lost and customer-value are read-only groupings.
    pub fn is_draggable(self) -> bool {
        !matches!(self, Self::ClosedLost | Self::CustomerValue)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuarterStatus {
    Past,
    Current,
    Future,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter_status: Option<QuarterStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub title: String,
    pub order: i32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub metadata: ColumnMetadata,
}

impl Column {
    pub fn new(id: impl Into<String>, title: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            order,
            color: None,
            metadata: ColumnMetadata::default(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }
}

/// A user-defined view with persisted columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CustomView {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_active: bool,
}

impl CustomView {
    pub fn sorted_columns(&self) -> Vec<Column> {
        let mut columns = self.columns.clone();
        columns.sort_by_key(|column| column.order);
        columns
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomView {
    pub name: String,
    pub column_titles: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    BuiltIn(BuiltInView),
    Custom(CustomView),
}

impl View {
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::BuiltIn(view) => view.kind(),
            Self::Custom(_) => ViewKind::Custom,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::BuiltIn(view) => view.title(),
            Self::Custom(view) => view.name.as_str(),
        }
    }

    pub fn is_built_in(&self) -> bool {
        matches!(self, Self::BuiltIn(_))
    }

    pub fn selection(&self) -> ViewSelection {
        match self {
            Self::BuiltIn(view) => ViewSelection::BuiltIn(*view),
            Self::Custom(view) => ViewSelection::Custom(view.id),
        }
    }
}

/// Every built-in view followed by the user's custom views.
pub fn catalog(custom: Vec<CustomView>) -> Vec<View> {
    BuiltInView::ALL
        .into_iter()
        .map(View::BuiltIn)
        .chain(custom.into_iter().map(View::Custom))
        .collect()
}

/// Identifies one view without carrying its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewSelection {
    BuiltIn(BuiltInView),
    Custom(Uuid),
}

impl fmt::Display for ViewSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(view) => f.write_str(view.key()),
            Self::Custom(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for ViewSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(view) = BuiltInView::from_key(s) {
            return Ok(Self::BuiltIn(view));
        }
        Uuid::parse_str(s.trim())
            .map(Self::Custom)
            .map_err(|_| anyhow!("unknown view: {s}"))
    }
}
