//! Bucketing strategies, one per view kind.
//!
//! Every strategy is a pure function over borrowed opportunities: inputs
//! are never mutated, every column id present in `columns` gets an entry
//! (possibly empty), and opportunities whose key matches no column are
//! left out of the result rather than reported as errors. Within a
//! column, opportunities keep their input order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};

use crate::fiscal::{self, FiscalQuarter};
use crate::opportunity::{ForecastCategory, Opportunity, Stage};
use crate::view::{BuiltInView, Column, QuarterStatus, ViewKind};

pub type Buckets<'a> = BTreeMap<String, Vec<&'a Opportunity>>;

/// Furthest a quarterly board reaches from the current quarter, either way.
pub const MAX_QUARTER_REACH: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarterlyParams {
    /// Show only quarters near today instead of every populated one.
    pub rolling_window: bool,
    pub window_back: u32,
    pub window_forward: u32,
    pub span_back: u32,
    pub span_forward: u32,
}

impl Default for QuarterlyParams {
    fn default() -> Self {
        Self {
            rolling_window: true,
            window_back: 1,
            window_forward: 4,
            span_back: 4,
            span_forward: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTier {
    pub id: String,
    pub title: String,
    pub min_arr: u64,
}

impl ValueTier {
    pub fn new(title: impl Into<String>, min_arr: u64) -> Self {
        let title = title.into();
        Self {
            id: slugify(&title),
            title,
            min_arr,
        }
    }
}

pub fn default_value_tiers() -> Vec<ValueTier> {
    vec![
        ValueTier::new("Standard", 0),
        ValueTier::new("Growth", 25_000),
        ValueTier::new("Strategic", 100_000),
        ValueTier::new("Enterprise", 250_000),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingParams {
    pub fiscal_year_start_month: u32,
    pub today: NaiveDate,
    pub quarterly: QuarterlyParams,
    /// Ascending by `min_arr`, first tier starting at zero.
    pub value_tiers: Vec<ValueTier>,
}

impl GroupingParams {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            fiscal_year_start_month: 1,
            today,
            quarterly: QuarterlyParams::default(),
            value_tiers: default_value_tiers(),
        }
    }

    pub fn current_quarter(&self) -> FiscalQuarter {
        fiscal::quarter_of(self.today, self.fiscal_year_start_month)
    }
}

/// Columns computed for a virtual view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VirtualColumns {
    pub columns: Vec<Column>,
    /// Opportunities with a valid key that fall outside every column.
    pub hidden_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostRecency {
    ThisMonth,
    LastMonth,
    Older,
}

impl LostRecency {
    pub const ALL: [Self; 3] = [Self::ThisMonth, Self::LastMonth, Self::Older];

    pub fn key(self) -> &'static str {
        match self {
            Self::ThisMonth => "this-month",
            Self::LastMonth => "last-month",
            Self::Older => "older",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::ThisMonth => "This Month",
            Self::LastMonth => "Last Month",
            Self::Older => "Older",
        }
    }
}

pub fn virtual_columns(
    view: BuiltInView,
    opportunities: &[Opportunity],
    params: &GroupingParams,
) -> VirtualColumns {
    let columns = match view {
        BuiltInView::Quarterly => return quarterly_columns(opportunities, params),
        BuiltInView::Stage => stage_columns(),
        BuiltInView::Forecast => forecast_columns(),
        BuiltInView::ClosedLost => closed_lost_columns(),
        BuiltInView::CustomerValue => customer_value_columns(&params.value_tiers),
    };
    VirtualColumns {
        columns,
        hidden_count: 0,
    }
}

/// Dispatches to the strategy for `kind`.
pub fn group<'a>(
    kind: ViewKind,
    opportunities: &'a [Opportunity],
    columns: &[Column],
    params: &GroupingParams,
) -> Buckets<'a> {
    match kind {
        ViewKind::Quarterly => group_quarterly(opportunities, columns, params),
        ViewKind::Stage => group_stage(opportunities, columns),
        ViewKind::Forecast => group_forecast(opportunities, columns),
        ViewKind::ClosedLost => group_closed_lost(opportunities, columns, params),
        ViewKind::CustomerValue => group_customer_value(opportunities, columns, params),
        ViewKind::Custom => group_custom(opportunities, columns),
    }
}

pub fn quarterly_columns(opportunities: &[Opportunity], params: &GroupingParams) -> VirtualColumns {
    let m = params.fiscal_year_start_month;
    let current = params.current_quarter();
    let q = &params.quarterly;

    let (back, forward) = if q.rolling_window {
        (q.window_back, q.window_forward)
    } else {
        (q.span_back, q.span_forward)
    };
    let (back, forward) = (back.min(MAX_QUARTER_REACH), forward.min(MAX_QUARTER_REACH));

    let mut quarters: BTreeSet<FiscalQuarter> = (-i64::from(back)..=i64::from(forward))
        .map(|delta| current.offset(delta))
        .collect();

    let populated = opportunities
        .iter()
        .filter_map(|opp| opp.fiscal_quarter(m));

    let mut hidden_count = 0;
    if q.rolling_window {
        hidden_count = populated.filter(|quarter| !quarters.contains(quarter)).count();
    } else {
        quarters.extend(populated);
    }

    let columns = quarters
        .into_iter()
        .enumerate()
        .map(|(index, quarter)| {
            let mut column = Column::new(quarter.column_id(), quarter.label(), column_order(index));
            column.metadata.quarter_status = Some(quarter_status(quarter, current));
            column
        })
        .collect();

    VirtualColumns {
        columns,
        hidden_count,
    }
}

fn quarter_status(quarter: FiscalQuarter, current: FiscalQuarter) -> QuarterStatus {
    match quarter.cmp(&current) {
        std::cmp::Ordering::Less => QuarterStatus::Past,
        std::cmp::Ordering::Equal => QuarterStatus::Current,
        std::cmp::Ordering::Greater => QuarterStatus::Future,
    }
}

pub fn stage_columns() -> Vec<Column> {
    Stage::PIPELINE
        .into_iter()
        .enumerate()
        .map(|(index, stage)| {
            Column::new(stage.key(), stage.title(), column_order(index)).with_color(palette_color(index))
        })
        .collect()
}

pub fn forecast_columns() -> Vec<Column> {
    ForecastCategory::ALL
        .into_iter()
        .enumerate()
        .map(|(index, category)| {
            Column::new(category.key(), category.title(), column_order(index))
                .with_color(palette_color(index))
        })
        .collect()
}

pub fn closed_lost_columns() -> Vec<Column> {
    LostRecency::ALL
        .into_iter()
        .enumerate()
        .map(|(index, tier)| Column::new(tier.key(), tier.title(), column_order(index)))
        .collect()
}

pub fn customer_value_columns(tiers: &[ValueTier]) -> Vec<Column> {
    tiers
        .iter()
        .enumerate()
        .map(|(index, tier)| {
            Column::new(tier.id.clone(), tier.title.clone(), column_order(index))
                .with_color(palette_color(index))
        })
        .collect()
}

/// Opportunities without a close date are never placed in a quarter.
pub fn group_quarterly<'a>(
    opportunities: &'a [Opportunity],
    columns: &[Column],
    params: &GroupingParams,
) -> Buckets<'a> {
    let m = params.fiscal_year_start_month;
    bucket_by(opportunities, columns, |opp| {
        opp.fiscal_quarter(m).map(FiscalQuarter::column_id)
    })
}

pub fn group_stage<'a>(opportunities: &'a [Opportunity], columns: &[Column]) -> Buckets<'a> {
    bucket_by(opportunities, columns, |opp| Some(opp.stage.key().to_string()))
}

pub fn group_forecast<'a>(opportunities: &'a [Opportunity], columns: &[Column]) -> Buckets<'a> {
    bucket_by(opportunities, columns, |opp| {
        opp.forecast_category
            .map(|category| category.key().to_string())
    })
}

pub fn group_closed_lost<'a>(
    opportunities: &'a [Opportunity],
    columns: &[Column],
    params: &GroupingParams,
) -> Buckets<'a> {
    bucket_by(opportunities, columns, |opp| {
        (opp.stage == Stage::ClosedLost)
            .then(|| lost_recency(opp, params.today).key().to_string())
    })
}

pub fn group_customer_value<'a>(
    opportunities: &'a [Opportunity],
    columns: &[Column],
    params: &GroupingParams,
) -> Buckets<'a> {
    bucket_by(opportunities, columns, |opp| {
        if opp.stage != Stage::ClosedWon {
            return None;
        }
        value_tier_for(opp.amount_arr, &params.value_tiers).map(|tier| tier.id.clone())
    })
}

/// An opportunity whose `column_id` names no column is not displayed.
pub fn group_custom<'a>(opportunities: &'a [Opportunity], columns: &[Column]) -> Buckets<'a> {
    bucket_by(opportunities, columns, |opp| opp.column_id.clone())
}

/// Lost date, falling back to close date. Undated deals count as older;
/// deals dated after today count as this month.
pub fn lost_recency(opportunity: &Opportunity, today: NaiveDate) -> LostRecency {
    let Some(date) = opportunity.lost_date.or(opportunity.close_date) else {
        return LostRecency::Older;
    };

    match month_index(today) - month_index(date) {
        delta if delta <= 0 => LostRecency::ThisMonth,
        1 => LostRecency::LastMonth,
        _ => LostRecency::Older,
    }
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// The highest tier whose lower bound does not exceed `amount`.
pub fn value_tier_for(amount: u64, tiers: &[ValueTier]) -> Option<&ValueTier> {
    tiers.iter().rev().find(|tier| tier.min_arr <= amount)
}

fn bucket_by<'a, F>(opportunities: &'a [Opportunity], columns: &[Column], key: F) -> Buckets<'a>
where
    F: Fn(&Opportunity) -> Option<String>,
{
    let mut buckets: Buckets<'a> = columns
        .iter()
        .map(|column| (column.id.clone(), Vec::new()))
        .collect();

    for opp in opportunities {
        let Some(key) = key(opp) else {
            continue;
        };
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.push(opp);
        }
    }

    buckets
}

pub fn column_order(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

pub fn palette_color(seed: usize) -> String {
    let hue = seed.saturating_mul(47) % 360;
    format!("hsl({hue} 74% 54%)")
}

pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        GroupingParams, LostRecency, MAX_QUARTER_REACH, ValueTier, column_order,
        group_closed_lost, group_custom, group_customer_value, group_forecast, group_quarterly,
        group_stage, lost_recency, quarterly_columns, slugify, stage_columns, virtual_columns,
    };
    use crate::opportunity::{ForecastCategory, Opportunity, Stage};
    use crate::view::{BuiltInView, Column, QuarterStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn closing(name: &str, close: Option<NaiveDate>) -> Opportunity {
        let mut opp = Opportunity::new(name, Stage::Discovery);
        opp.close_date = close;
        opp.refresh_quarter(1);
        opp
    }

    fn ids(bucket: &[&Opportunity]) -> Vec<String> {
        bucket.iter().map(|opp| opp.name.clone()).collect()
    }

    #[test]
    fn rolling_window_tags_quarter_status_and_counts_hidden() {
        let params = GroupingParams::new(date(2025, 2, 10));
        let opps = vec![
            closing("in-window", Some(date(2025, 5, 1))),
            closing("far-future", Some(date(2027, 1, 5))),
            closing("far-past", Some(date(2023, 3, 1))),
            closing("undated", None),
        ];

        let cols = quarterly_columns(&opps, &params);
        let titles: Vec<_> = cols.columns.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Q4 2024", "Q1 2025", "Q2 2025", "Q3 2025", "Q4 2025", "Q1 2026"]
        );
        assert_eq!(cols.hidden_count, 2);
        assert_eq!(
            cols.columns[0].metadata.quarter_status,
            Some(QuarterStatus::Past)
        );
        assert_eq!(
            cols.columns[1].metadata.quarter_status,
            Some(QuarterStatus::Current)
        );
        assert_eq!(
            cols.columns[2].metadata.quarter_status,
            Some(QuarterStatus::Future)
        );

        let orders: Vec<_> = cols.columns.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn show_all_adds_populated_quarters_chronologically() {
        let mut params = GroupingParams::new(date(2025, 2, 10));
        params.quarterly.rolling_window = false;
        params.quarterly.span_back = 0;
        params.quarterly.span_forward = 0;
        let opps = vec![
            closing("later", Some(date(2027, 1, 5))),
            closing("earlier", Some(date(2023, 3, 1))),
        ];

        let cols = quarterly_columns(&opps, &params);
        let ids: Vec<_> = cols.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["2023-Q1", "2025-Q1", "2027-Q1"]);
        assert_eq!(cols.hidden_count, 0);
    }

    #[test]
    fn undated_opportunities_never_land_in_a_quarter() {
        let mut params = GroupingParams::new(date(2025, 2, 10));
        let opps = vec![closing("A", None), closing("B", Some(date(2025, 2, 10)))];

        for rolling in [true, false] {
            params.quarterly.rolling_window = rolling;
            let cols = quarterly_columns(&opps, &params);
            let buckets = group_quarterly(&opps, &cols.columns, &params);
            assert!(buckets.values().flatten().all(|opp| opp.name != "A"));
            assert_eq!(ids(&buckets["2025-Q1"]), vec!["B".to_string()]);
        }
    }

    #[test]
    fn stage_columns_follow_pipeline_order() {
        let cols = stage_columns();
        assert_eq!(cols.first().map(|c| c.id.as_str()), Some("prospecting"));
        assert_eq!(cols.last().map(|c| c.id.as_str()), Some("closedLost"));

        let opps = vec![
            Opportunity::new("one", Stage::Demo),
            Opportunity::new("two", Stage::Demo),
            Opportunity::new("three", Stage::ClosedWon),
        ];
        let buckets = group_stage(&opps, &cols);
        assert_eq!(ids(&buckets["demo"]), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buckets["closedWon"].len(), 1);
        assert!(buckets["proposal"].is_empty());
    }

    #[test]
    fn forecast_omits_uncategorized() {
        let params = GroupingParams::new(date(2025, 2, 10));
        let cols = virtual_columns(BuiltInView::Forecast, &[], &params).columns;
        let mut uncategorized = Opportunity::new("none", Stage::Discovery);
        uncategorized.forecast_category = None;
        let mut commit = Opportunity::new("commit", Stage::Discovery);
        commit.forecast_category = Some(ForecastCategory::Commit);
        let opps = vec![uncategorized, commit];

        let buckets = group_forecast(&opps, &cols);
        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets.values().map(Vec::len).sum::<usize>(), 1);
        assert_eq!(ids(&buckets["commit"]), vec!["commit".to_string()]);
    }

    #[test]
    fn closed_lost_buckets_by_recency() {
        let params = GroupingParams::new(date(2025, 3, 15));
        let cols = virtual_columns(BuiltInView::ClosedLost, &[], &params).columns;

        let mut recent = Opportunity::new("recent", Stage::ClosedLost);
        recent.lost_date = Some(date(2025, 3, 1));
        let mut last = Opportunity::new("last", Stage::ClosedLost);
        last.close_date = Some(date(2025, 2, 28));
        let mut old = Opportunity::new("old", Stage::ClosedLost);
        old.lost_date = Some(date(2024, 12, 31));
        let undated = Opportunity::new("undated", Stage::ClosedLost);
        let open = Opportunity::new("open", Stage::Negotiation);
        let opps = vec![recent, last, old, undated, open];

        let buckets = group_closed_lost(&opps, &cols, &params);
        assert_eq!(ids(&buckets["this-month"]), vec!["recent".to_string()]);
        assert_eq!(ids(&buckets["last-month"]), vec!["last".to_string()]);
        assert_eq!(
            ids(&buckets["older"]),
            vec!["old".to_string(), "undated".to_string()]
        );
    }

    #[test]
    fn lost_dates_after_today_count_as_this_month() {
        let mut opp = Opportunity::new("future", Stage::ClosedLost);
        opp.lost_date = Some(date(2025, 6, 1));
        assert_eq!(lost_recency(&opp, date(2025, 3, 15)), LostRecency::ThisMonth);

        opp.lost_date = Some(date(2024, 12, 20));
        assert_eq!(lost_recency(&opp, date(2025, 1, 2)), LostRecency::LastMonth);
    }

    #[test]
    fn customer_value_tiers_only_closed_won() {
        let mut params = GroupingParams::new(date(2025, 3, 15));
        params.value_tiers = vec![
            ValueTier::new("Small", 0),
            ValueTier::new("Large", 50_000),
        ];
        let cols = virtual_columns(BuiltInView::CustomerValue, &[], &params).columns;

        let mut small = Opportunity::new("small", Stage::ClosedWon);
        small.amount_arr = 49_999;
        let mut edge = Opportunity::new("edge", Stage::ClosedWon);
        edge.amount_arr = 50_000;
        let mut huge = Opportunity::new("huge", Stage::ClosedWon);
        huge.amount_arr = 9_000_000;
        let mut open = Opportunity::new("open", Stage::Proposal);
        open.amount_arr = 80_000;
        let opps = vec![small, edge, huge, open];

        let buckets = group_customer_value(&opps, &cols, &params);
        assert_eq!(ids(&buckets["small"]), vec!["small".to_string()]);
        assert_eq!(
            ids(&buckets["large"]),
            vec!["edge".to_string(), "huge".to_string()]
        );
    }

    #[test]
    fn custom_drops_orphaned_column_ids() {
        let cols = vec![Column::new("a", "Alpha", 0), Column::new("b", "Beta", 1)];
        let mut placed = Opportunity::new("placed", Stage::Demo);
        placed.column_id = Some("b".to_string());
        let mut orphan = Opportunity::new("orphan", Stage::Demo);
        orphan.column_id = Some("deleted".to_string());
        let unassigned = Opportunity::new("unassigned", Stage::Demo);
        let opps = vec![placed, orphan, unassigned];
        let before = opps.clone();

        let buckets = group_custom(&opps, &cols);
        assert_eq!(buckets.len(), 2);
        assert!(buckets["a"].is_empty());
        assert_eq!(ids(&buckets["b"]), vec!["placed".to_string()]);
        assert!(!buckets.contains_key("deleted"));
        assert_eq!(opps, before);
    }

    #[test]
    fn slugs_are_lowercase_dashed() {
        assert_eq!(slugify("  Mid Market / EMEA "), "mid-market-emea");
    }

    #[test]
    fn oversized_reach_is_capped() {
        let mut params = GroupingParams::new(date(2025, 2, 10));
        params.quarterly.window_back = u32::MAX;
        params.quarterly.window_forward = 4_000_000_000;

        let cols = quarterly_columns(&[], &params);
        assert_eq!(cols.columns.len(), 2 * MAX_QUARTER_REACH as usize + 1);
        assert_eq!(cols.columns[0].order, 0);
    }

    #[test]
    fn column_order_saturates() {
        assert_eq!(column_order(3), 3);
        assert_eq!(column_order(usize::MAX), i32::MAX);
    }
}
