use tracing::{debug, warn};
use uuid::Uuid;

use crate::grouping::{self, Buckets, GroupingParams};
use crate::opportunity::Opportunity;
use crate::view::{BuiltInView, Column, CustomView, View, ViewKind, ViewSelection};

/// Which precedence rule picked the active view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    PersistedCustom,
    LocalPreference,
    Default,
}

/// The active view with its columns materialized for one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedView {
    pub selection: ViewSelection,
    pub name: String,
    pub kind: ViewKind,
    pub columns: Vec<Column>,
    pub hidden_count: usize,
    pub source: ResolutionSource,
}

impl ResolvedView {
    pub fn has_column(&self, column_id: &str) -> bool {
        self.column(column_id).is_some()
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == column_id)
    }

    pub fn group<'a>(
        &self,
        opportunities: &'a [Opportunity],
        params: &GroupingParams,
    ) -> Buckets<'a> {
        grouping::group(self.kind, opportunities, &self.columns, params)
    }
}

/// Picks the active view: a custom view flagged active wins, then a local
/// built-in preference naming a known built-in, then `default_view`.
#[tracing::instrument(skip(views, opportunities, params))]
pub fn resolve(
    views: &[View],
    persisted_active_custom_id: Option<Uuid>,
    local_built_in_preference: Option<BuiltInView>,
    default_view: ViewSelection,
    opportunities: &[Opportunity],
    params: &GroupingParams,
) -> ResolvedView {
    if let Some(id) = persisted_active_custom_id {
        if let Some(custom) = find_custom(views, id) {
            if local_built_in_preference.is_some() {
                debug!(%id, "custom view active; ignoring local built-in preference");
            }
            return materialize_custom(custom, ResolutionSource::PersistedCustom);
        }
        warn!(%id, "active custom view is not in the view list");
    }

    if let Some(preference) = local_built_in_preference {
        if views.contains(&View::BuiltIn(preference)) {
            return materialize_built_in(
                preference,
                opportunities,
                params,
                ResolutionSource::LocalPreference,
            );
        }
        warn!(view = preference.key(), "local preference names an unknown view");
    }

    match default_view {
        ViewSelection::BuiltIn(view) => {
            materialize_built_in(view, opportunities, params, ResolutionSource::Default)
        }
        ViewSelection::Custom(id) => match find_custom(views, id) {
            Some(custom) => materialize_custom(custom, ResolutionSource::Default),
            None => {
                warn!(%id, "default custom view missing; using quarterly");
                materialize_built_in(
                    BuiltInView::Quarterly,
                    opportunities,
                    params,
                    ResolutionSource::Default,
                )
            }
        },
    }
}

/// The id of the custom view flagged active, if any. Several flagged
/// views can only come from a corrupt store; the first one wins.
pub fn persisted_active_custom_id(views: &[View]) -> Option<Uuid> {
    let mut active = views.iter().filter_map(|view| match view {
        View::Custom(custom) if custom.is_active => Some(custom.id),
        _ => None,
    });
    let first = active.next()?;
    let extra = active.count();
    if extra > 0 {
        warn!(%first, extra, "multiple custom views flagged active; using the first");
    }
    Some(first)
}

/// A custom view flagged default, else the configured built-in.
pub fn default_selection(views: &[View], configured: BuiltInView) -> ViewSelection {
    views
        .iter()
        .find_map(|view| match view {
            View::Custom(custom) if custom.is_default => Some(ViewSelection::Custom(custom.id)),
            _ => None,
        })
        .unwrap_or(ViewSelection::BuiltIn(configured))
}

fn find_custom(views: &[View], id: Uuid) -> Option<&CustomView> {
    views.iter().find_map(|view| match view {
        View::Custom(custom) if custom.id == id => Some(custom),
        _ => None,
    })
}

fn materialize_custom(custom: &CustomView, source: ResolutionSource) -> ResolvedView {
    ResolvedView {
        selection: ViewSelection::Custom(custom.id),
        name: custom.name.clone(),
        kind: ViewKind::Custom,
        columns: custom.sorted_columns(),
        hidden_count: 0,
        source,
    }
}

// Virtual columns are regenerated on every resolution, never read back.
fn materialize_built_in(
    view: BuiltInView,
    opportunities: &[Opportunity],
    params: &GroupingParams,
    source: ResolutionSource,
) -> ResolvedView {
    let computed = grouping::virtual_columns(view, opportunities, params);
    ResolvedView {
        selection: ViewSelection::BuiltIn(view),
        name: view.title().to_string(),
        kind: view.kind(),
        columns: computed.columns,
        hidden_count: computed.hidden_count,
        source,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{ResolutionSource, default_selection, persisted_active_custom_id, resolve};
    use crate::grouping::GroupingParams;
    use crate::opportunity::{Opportunity, Stage};
    use crate::view::{BuiltInView, Column, CustomView, ViewKind, ViewSelection, catalog};

    fn params() -> GroupingParams {
        GroupingParams::new(NaiveDate::from_ymd_opt(2025, 2, 10).expect("date"))
    }

    fn custom(name: &str, active: bool, default: bool) -> CustomView {
        CustomView {
            id: Uuid::new_v4(),
            name: name.to_string(),
            columns: vec![Column::new("late", "Late", 2), Column::new("early", "Early", 1)],
            is_default: default,
            is_active: active,
        }
    }

    #[test]
    fn active_custom_view_beats_local_preference() {
        let renewals = custom("Renewals", true, false);
        let id = renewals.id;
        let views = catalog(vec![renewals]);

        let resolved = resolve(
            &views,
            persisted_active_custom_id(&views),
            Some(BuiltInView::Stage),
            ViewSelection::BuiltIn(BuiltInView::Quarterly),
            &[],
            &params(),
        );
        assert_eq!(resolved.selection, ViewSelection::Custom(id));
        assert_eq!(resolved.kind, ViewKind::Custom);
        assert_eq!(resolved.source, ResolutionSource::PersistedCustom);
        let ids: Vec<_> = resolved.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn local_preference_used_when_no_custom_active() {
        let views = catalog(vec![custom("Renewals", false, false)]);
        let resolved = resolve(
            &views,
            persisted_active_custom_id(&views),
            Some(BuiltInView::Forecast),
            ViewSelection::BuiltIn(BuiltInView::Quarterly),
            &[],
            &params(),
        );
        assert_eq!(resolved.kind, ViewKind::Forecast);
        assert_eq!(resolved.source, ResolutionSource::LocalPreference);
        assert_eq!(resolved.columns.len(), 5);
    }

    #[test]
    fn falls_back_to_default_view() {
        let fallback = custom("Team board", false, true);
        let id = fallback.id;
        let views = catalog(vec![fallback]);
        let default = default_selection(&views, BuiltInView::Stage);
        assert_eq!(default, ViewSelection::Custom(id));

        let resolved = resolve(&views, None, None, default, &[], &params());
        assert_eq!(resolved.selection, ViewSelection::Custom(id));
        assert_eq!(resolved.source, ResolutionSource::Default);
    }

    #[test]
    fn stale_active_id_falls_through() {
        let views = catalog(vec![]);
        let resolved = resolve(
            &views,
            Some(Uuid::new_v4()),
            None,
            ViewSelection::BuiltIn(BuiltInView::Stage),
            &[],
            &params(),
        );
        assert_eq!(resolved.kind, ViewKind::Stage);
        assert_eq!(resolved.source, ResolutionSource::Default);
    }

    #[test]
    fn virtual_columns_regenerate_from_data() {
        let views = catalog(vec![]);
        let mut far = Opportunity::new("far", Stage::Demo);
        far.close_date = NaiveDate::from_ymd_opt(2030, 1, 1);
        let opps = vec![far];

        let resolved = resolve(
            &views,
            None,
            Some(BuiltInView::Quarterly),
            ViewSelection::BuiltIn(BuiltInView::Stage),
            &opps,
            &params(),
        );
        assert_eq!(resolved.hidden_count, 1);
        assert!(resolved.has_column("2025-Q1"));
        assert!(!resolved.has_column("2030-Q1"));
        assert!(resolved.group(&opps, &params()).values().all(Vec::is_empty));
    }

    #[test]
    fn first_of_several_active_flags_wins() {
        let a = custom("A", true, false);
        let b = custom("B", true, false);
        let first = a.id;
        let views = catalog(vec![a, b]);
        assert_eq!(persisted_active_custom_id(&views), Some(first));
    }
}
