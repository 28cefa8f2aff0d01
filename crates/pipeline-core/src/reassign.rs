//! Turns a card drop into the field change it means for the active view.

use chrono::NaiveDate;
use tracing::debug;

use crate::fiscal::{self, FiscalQuarter};
use crate::opportunity::{ForecastCategory, Opportunity, OpportunityPatch, Stage};
use crate::resolver::ResolvedView;
use crate::view::ViewKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    SetColumnId(String),
    SetCloseDate(NaiveDate),
    SetForecastCategory(ForecastCategory),
    /// A stage move also resets confidence and forecast category to the
    /// new stage's defaults in the same update.
    SetStage {
        stage: Stage,
        confidence: u8,
        forecast_category: ForecastCategory,
    },
}

impl Mutation {
    pub fn for_stage(stage: Stage) -> Self {
        Self::SetStage {
            stage,
            confidence: stage.default_confidence(),
            forecast_category: stage.default_forecast_category(),
        }
    }

    pub fn to_patch(&self) -> OpportunityPatch {
        match self {
            Self::SetColumnId(column_id) => OpportunityPatch {
                column_id: Some(Some(column_id.clone())),
                ..OpportunityPatch::default()
            },
            Self::SetCloseDate(date) => OpportunityPatch {
                close_date: Some(Some(*date)),
                ..OpportunityPatch::default()
            },
            Self::SetForecastCategory(category) => OpportunityPatch {
                forecast_category: Some(Some(*category)),
                ..OpportunityPatch::default()
            },
            Self::SetStage {
                stage,
                confidence,
                forecast_category,
            } => OpportunityPatch {
                stage: Some(*stage),
                confidence: Some(Some(*confidence)),
                forecast_category: Some(Some(*forecast_category)),
                ..OpportunityPatch::default()
            },
        }
    }

    /// Applies the same change the store receives through `to_patch`.
    pub fn apply(&self, opportunity: &mut Opportunity, fiscal_year_start_month: u32) {
        opportunity.apply_patch(&self.to_patch(), fiscal_year_start_month);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The target is not a column of the resolved view.
    InvalidDropTarget,
    /// Closed-lost and customer-value boards cannot be rearranged.
    ReadOnlyView,
    /// The card already belongs to the target column.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassignment {
    Apply(Mutation),
    NoOp(NoOpReason),
}

impl Reassignment {
    pub fn mutation(&self) -> Option<&Mutation> {
        match self {
            Self::Apply(mutation) => Some(mutation),
            Self::NoOp(_) => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp(_))
    }
}

/// Never fails: anything that cannot be translated degrades to a no-op.
pub fn translate(
    opportunity: &Opportunity,
    view: &ResolvedView,
    source_column_id: &str,
    target_column_id: &str,
    fiscal_year_start_month: u32,
) -> Reassignment {
    let outcome = translate_inner(opportunity, view, target_column_id, fiscal_year_start_month);
    debug!(
        id = %opportunity.id,
        view = view.kind.key(),
        source = source_column_id,
        target = target_column_id,
        ?outcome,
        "translated drop"
    );
    outcome
}

fn translate_inner(
    opportunity: &Opportunity,
    view: &ResolvedView,
    target: &str,
    fiscal_year_start_month: u32,
) -> Reassignment {
    if !view.kind.is_draggable() {
        return Reassignment::NoOp(NoOpReason::ReadOnlyView);
    }
    if !view.has_column(target) {
        return Reassignment::NoOp(NoOpReason::InvalidDropTarget);
    }

    match view.kind {
        ViewKind::Custom => {
            if opportunity.column_id.as_deref() == Some(target) {
                Reassignment::NoOp(NoOpReason::Unchanged)
            } else {
                Reassignment::Apply(Mutation::SetColumnId(target.to_string()))
            }
        }
        ViewKind::Quarterly => {
            let Ok(quarter) = target.parse::<FiscalQuarter>() else {
                return Reassignment::NoOp(NoOpReason::InvalidDropTarget);
            };
            if opportunity.fiscal_quarter(fiscal_year_start_month) == Some(quarter) {
                return Reassignment::NoOp(NoOpReason::Unchanged);
            }
            Reassignment::Apply(Mutation::SetCloseDate(fiscal::close_date_for(
                quarter,
                fiscal_year_start_month,
            )))
        }
        ViewKind::Forecast => {
            let Some(category) = ForecastCategory::from_key(target) else {
                return Reassignment::NoOp(NoOpReason::InvalidDropTarget);
            };
            if opportunity.forecast_category == Some(category) {
                Reassignment::NoOp(NoOpReason::Unchanged)
            } else {
                Reassignment::Apply(Mutation::SetForecastCategory(category))
            }
        }
        ViewKind::Stage => {
            let Some(stage) = Stage::from_key(target) else {
                return Reassignment::NoOp(NoOpReason::InvalidDropTarget);
            };
            if opportunity.stage == stage {
                Reassignment::NoOp(NoOpReason::Unchanged)
            } else {
                Reassignment::Apply(Mutation::for_stage(stage))
            }
        }
        ViewKind::ClosedLost | ViewKind::CustomerValue => {
            Reassignment::NoOp(NoOpReason::ReadOnlyView)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{Mutation, NoOpReason, Reassignment, translate};
    use crate::fiscal;
    use crate::grouping::GroupingParams;
    use crate::opportunity::{ForecastCategory, Opportunity, Stage};
    use crate::resolver::{ResolvedView, resolve};
    use crate::view::{BuiltInView, Column, CustomView, ViewSelection, catalog};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 10).expect("date")
    }

    fn built_in(view: BuiltInView, opps: &[Opportunity]) -> ResolvedView {
        let views = catalog(vec![]);
        resolve(
            &views,
            None,
            Some(view),
            ViewSelection::BuiltIn(view),
            opps,
            &GroupingParams::new(today()),
        )
    }

    fn dated(close: NaiveDate) -> Opportunity {
        let mut opp = Opportunity::new("B", Stage::Discovery);
        opp.close_date = Some(close);
        opp.refresh_quarter(1);
        opp
    }

    #[test]
    fn quarterly_drop_rewrites_close_date() {
        let opp = dated(today());
        let view = built_in(BuiltInView::Quarterly, std::slice::from_ref(&opp));

        let same = translate(&opp, &view, "2025-Q1", "2025-Q1", 1);
        assert_eq!(same, Reassignment::NoOp(NoOpReason::Unchanged));

        let moved = translate(&opp, &view, "2025-Q1", "2025-Q2", 1);
        let expected = NaiveDate::from_ymd_opt(2025, 4, 1).expect("date");
        assert_eq!(moved, Reassignment::Apply(Mutation::SetCloseDate(expected)));

        let mut after = opp.clone();
        if let Some(mutation) = moved.mutation() {
            mutation.apply(&mut after, 1);
        }
        assert_eq!(fiscal::quarter_label(expected, 1), "Q2 2025");
        assert_eq!(after.quarter.as_deref(), Some("Q2 2025"));
    }

    #[test]
    fn unknown_target_is_invalid_drop() {
        let opp = dated(today());
        let view = built_in(BuiltInView::Quarterly, std::slice::from_ref(&opp));
        assert_eq!(
            translate(&opp, &view, "2025-Q1", "2031-Q3", 1),
            Reassignment::NoOp(NoOpReason::InvalidDropTarget)
        );
        assert_eq!(
            translate(&opp, &view, "2025-Q1", "not-a-column", 1),
            Reassignment::NoOp(NoOpReason::InvalidDropTarget)
        );
    }

    #[test]
    fn read_only_views_never_mutate() {
        let mut opp = Opportunity::new("lost", Stage::ClosedLost);
        opp.amount_arr = 120_000;
        for view in [BuiltInView::ClosedLost, BuiltInView::CustomerValue] {
            let resolved = built_in(view, std::slice::from_ref(&opp));
            for source in &resolved.columns {
                for target in &resolved.columns {
                    assert_eq!(
                        translate(&opp, &resolved, &source.id, &target.id, 1),
                        Reassignment::NoOp(NoOpReason::ReadOnlyView)
                    );
                }
            }
            assert!(translate(&opp, &resolved, "x", "y", 1).is_noop());
        }
    }

    #[test]
    fn stage_drop_carries_stage_defaults() {
        let opp = Opportunity::new("deal", Stage::Discovery);
        let view = built_in(BuiltInView::Stage, &[]);
        assert_eq!(
            translate(&opp, &view, "discovery", "negotiation", 1),
            Reassignment::Apply(Mutation::SetStage {
                stage: Stage::Negotiation,
                confidence: 80,
                forecast_category: ForecastCategory::Commit,
            })
        );
        assert!(translate(&opp, &view, "discovery", "discovery", 1).is_noop());
    }

    #[test]
    fn forecast_drop_sets_category() {
        let opp = Opportunity::new("deal", Stage::Discovery);
        let view = built_in(BuiltInView::Forecast, &[]);
        assert_eq!(
            translate(&opp, &view, "pipeline", "bestCase", 1),
            Reassignment::Apply(Mutation::SetForecastCategory(ForecastCategory::BestCase))
        );
        assert_eq!(
            translate(&opp, &view, "pipeline", "pipeline", 1),
            Reassignment::NoOp(NoOpReason::Unchanged)
        );
    }

    #[test]
    fn custom_drop_sets_column_id() {
        let board = CustomView {
            id: Uuid::new_v4(),
            name: "Board".to_string(),
            columns: vec![Column::new("todo", "To do", 0), Column::new("done", "Done", 1)],
            is_default: false,
            is_active: true,
        };
        let views = catalog(vec![board.clone()]);
        let view = resolve(
            &views,
            Some(board.id),
            None,
            ViewSelection::BuiltIn(BuiltInView::Quarterly),
            &[],
            &GroupingParams::new(today()),
        );

        let mut opp = Opportunity::new("card", Stage::Demo);
        opp.column_id = Some("todo".to_string());
        assert_eq!(
            translate(&opp, &view, "todo", "done", 1),
            Reassignment::Apply(Mutation::SetColumnId("done".to_string()))
        );
        assert_eq!(
            translate(&opp, &view, "todo", "todo", 1),
            Reassignment::NoOp(NoOpReason::Unchanged)
        );
        assert_eq!(
            translate(&opp, &view, "todo", "archived", 1),
            Reassignment::NoOp(NoOpReason::InvalidDropTarget)
        );
    }

    #[test]
    fn stage_patch_touches_three_fields() {
        let patch = Mutation::for_stage(Stage::ClosedWon).to_patch();
        assert_eq!(patch.stage, Some(Stage::ClosedWon));
        assert_eq!(patch.confidence, Some(Some(100)));
        assert_eq!(patch.forecast_category, Some(Some(ForecastCategory::ClosedWon)));
        assert_eq!(patch.close_date, None);
    }
}
