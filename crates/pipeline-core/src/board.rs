use std::sync::Arc;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activation::{ActivationError, ViewActivation};
use crate::coordinator::{Coordinator, ReassignError, ReassignOutcome};
use crate::grouping::GroupingParams;
use crate::opportunity::Opportunity;
use crate::resolver::{self, ResolvedView};
use crate::settings::BoardSettings;
use crate::store::{
    BUILT_IN_VIEW_KEY, OpportunityStore, PreferenceStore, SHOW_ALL_QUARTERS_KEY, ViewStore,
};
use crate::view::{BuiltInView, Column, CustomView, NewCustomView, ViewSelection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedColumn {
    pub column: Column,
    pub opportunities: Vec<Opportunity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBoard {
    pub view: ResolvedView,
    pub columns: Vec<RenderedColumn>,
}

impl RenderedBoard {
    pub fn column(&self, column_id: &str) -> Option<&RenderedColumn> {
        self.columns.iter().find(|rendered| rendered.column.id == column_id)
    }
}

pub struct Board<S, P> {
    settings: BoardSettings,
    today: NaiveDate,
    prefs: Arc<P>,
    coordinator: Coordinator<S>,
    activation: ViewActivation<S, P>,
}

impl<S, P> Board<S, P>
where
    S: OpportunityStore + ViewStore + 'static,
    P: PreferenceStore,
{
    #[tracing::instrument(skip_all, fields(today = %today))]
    pub async fn open(
        store: Arc<S>,
        prefs: Arc<P>,
        settings: BoardSettings,
        today: NaiveDate,
    ) -> anyhow::Result<Self> {
        let coordinator = Coordinator::load(Arc::clone(&store), settings.fiscal_year_start_month).await?;
        let activation = ViewActivation::load(store, Arc::clone(&prefs)).await?;
        Ok(Self {
            settings,
            today,
            prefs,
            coordinator,
            activation,
        })
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    pub fn coordinator(&self) -> &Coordinator<S> {
        &self.coordinator
    }

    pub fn activation(&self) -> &ViewActivation<S, P> {
        &self.activation
    }

    /// Grouping inputs; the local show-all toggle beats the config value.
    pub fn params(&self) -> GroupingParams {
        let mut params = self.settings.grouping_params(self.today);
        if let Some(raw) = self.prefs.get(SHOW_ALL_QUARTERS_KEY) {
            match raw.as_str() {
                "true" => params.quarterly.rolling_window = false,
                "false" => params.quarterly.rolling_window = true,
                other => warn!(value = other, "ignoring invalid show-all preference"),
            }
        }
        params
    }

    pub fn set_show_all_quarters(&self, show_all: bool) -> anyhow::Result<()> {
        self.prefs
            .set(SHOW_ALL_QUARTERS_KEY, if show_all { "true" } else { "false" })
    }

    pub fn resolve(&self) -> ResolvedView {
        self.resolve_with(&self.params())
    }

    pub fn resolve_with(&self, params: &GroupingParams) -> ResolvedView {
        let views = self.activation.catalog();
        let local = self
            .prefs
            .get(BUILT_IN_VIEW_KEY)
            .and_then(|raw| BuiltInView::from_key(&raw));
        let default = resolver::default_selection(&views, self.settings.default_view);
        resolver::resolve(
            &views,
            resolver::persisted_active_custom_id(&views),
            local,
            default,
            &self.coordinator.snapshot(),
            params,
        )
    }

    /// Resolves the active view and groups the local opportunities into it.
    pub fn render(&self) -> RenderedBoard {
        self.render_with(&self.params())
    }

    pub fn render_with(&self, params: &GroupingParams) -> RenderedBoard {
        let view = self.resolve_with(params);
        let opportunities = self.coordinator.snapshot();
        let mut buckets = view.group(&opportunities, params);

        let columns = view
            .columns
            .iter()
            .map(|column| RenderedColumn {
                column: column.clone(),
                opportunities: buckets
                    .remove(&column.id)
                    .unwrap_or_default()
                    .into_iter()
                    .cloned()
                    .collect(),
            })
            .collect();

        debug!(view = %view.selection, hidden = view.hidden_count, "rendered board");
        RenderedBoard { view, columns }
    }

    /// Handles one card drop against the view currently on screen.
    pub async fn on_reassign(
        &self,
        opportunity_id: Uuid,
        source_column_id: &str,
        target_column_id: &str,
    ) -> Result<ReassignOutcome, ReassignError> {
        let view = self.resolve();
        self.coordinator
            .reassign(opportunity_id, &view, source_column_id, target_column_id)
            .await
    }

    pub async fn select(&mut self, selection: ViewSelection) -> Result<(), ActivationError> {
        self.activation.select(selection).await
    }

    pub async fn create_view(&mut self, spec: NewCustomView) -> anyhow::Result<CustomView> {
        let created = self.store().create_custom(spec).await?;
        self.activation.reload().await?;
        Ok(created)
    }

    /// Waits for background reconciliation to land.
    pub async fn settle(&self) {
        self.coordinator.settle().await;
    }

    /// Finds an opportunity by id or by case-insensitive name.
    pub fn lookup(&self, query: &str) -> anyhow::Result<Uuid> {
        if let Ok(id) = Uuid::parse_str(query.trim()) {
            return Ok(id);
        }

        let wanted = query.trim().to_lowercase();
        let matches: Vec<Uuid> = self
            .coordinator
            .snapshot()
            .into_iter()
            .filter(|opp| opp.name.to_lowercase() == wanted)
            .map(|opp| opp.id)
            .collect();

        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(anyhow!("no opportunity named {query:?}")),
            _ => Err(anyhow!(
                "{} opportunities are named {query:?}; use the id",
                matches.len()
            )),
        }
    }

    fn store(&self) -> &Arc<S> {
        self.coordinator.store()
    }
}
