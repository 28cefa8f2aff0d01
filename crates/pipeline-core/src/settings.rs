use std::collections::HashSet;

use anyhow::{
  Context,
  anyhow
};
use chrono::NaiveDate;
use tracing::warn;

use crate::config::Config;
use crate::fiscal;
use crate::grouping::{
  GroupingParams,
  MAX_QUARTER_REACH,
  QuarterlyParams,
  ValueTier,
  default_value_tiers
};
use crate::view::BuiltInView;

/// Typed board settings decoded from [`Config`].
///
/// Invalid values are logged and replaced by their defaults so a typo
/// in a pipelinerc never makes the board unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSettings {
  pub fiscal_year_start_month: u32,
  pub default_view:            BuiltInView,
  pub quarterly:               QuarterlyParams,
  pub value_tiers:             Vec<ValueTier>
}

impl Default for BoardSettings {
  fn default() -> Self {
    Self {
      fiscal_year_start_month: 1,
      default_view:            BuiltInView::Quarterly,
      quarterly:               QuarterlyParams::default(),
      value_tiers:             default_value_tiers()
    }
  }
}

impl BoardSettings {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> Self {
    let defaults = Self::default();

    let fiscal_year_start_month =
      match cfg
        .get_u32("fiscal.year_start_month")
      {
        | Ok(Some(month))
          if (1..=12).contains(&month) =>
        {
          month
        }
        | Ok(None) => {
          defaults.fiscal_year_start_month
        }
        | Ok(Some(month)) => {
          warn!(
            month,
            "fiscal.year_start_month out \
             of range; clamping"
          );
          fiscal::normalize_start_month(
            month
          )
        }
        | Err(err) => {
          warn!(error = %err, "invalid fiscal.year_start_month; using default");
          defaults.fiscal_year_start_month
        }
      };

    let default_view = match cfg
      .get("view.default")
    {
      | Some(raw) => {
        BuiltInView::from_key(&raw)
          .unwrap_or_else(|| {
            warn!(value = %raw, "unknown view.default; using quarterly");
            defaults.default_view
          })
      }
      | None => defaults.default_view
    };

    let base = &defaults.quarterly;
    let quarterly = QuarterlyParams {
      rolling_window: !cfg
        .get_bool("quarterly.show_all")
        .unwrap_or(false),
      window_back:    reach_or(
        cfg,
        "quarterly.window.back",
        base.window_back
      ),
      window_forward: reach_or(
        cfg,
        "quarterly.window.forward",
        base.window_forward
      ),
      span_back:      reach_or(
        cfg,
        "quarterly.span.back",
        base.span_back
      ),
      span_forward:   reach_or(
        cfg,
        "quarterly.span.forward",
        base.span_forward
      )
    };

    let value_tiers = match cfg
      .get("value.tiers")
    {
      | Some(raw) => {
        match parse_value_tiers(&raw) {
          | Ok(tiers) => tiers,
          | Err(err) => {
            warn!(error = %format!("{err:#}"), "invalid value.tiers; using defaults");
            defaults.value_tiers
          }
        }
      }
      | None => defaults.value_tiers
    };

    Self {
      fiscal_year_start_month,
      default_view,
      quarterly,
      value_tiers
    }
  }

  #[must_use]
  pub fn grouping_params(
    &self,
    today: NaiveDate
  ) -> GroupingParams {
    GroupingParams {
      fiscal_year_start_month: self
        .fiscal_year_start_month,
      today,
      quarterly: self.quarterly.clone(),
      value_tiers: self
        .value_tiers
        .clone()
    }
  }
}

fn reach_or(
  cfg: &Config,
  key: &str,
  fallback: u32
) -> u32 {
  match cfg.get_u32(key) {
    | Ok(Some(value))
      if value <= MAX_QUARTER_REACH =>
    {
      value
    }
    | Ok(Some(value)) => {
      warn!(
        key,
        value,
        max = MAX_QUARTER_REACH,
        "quarter reach too large; using \
         default"
      );
      fallback
    }
    | Ok(None) => fallback,
    | Err(err) => {
      warn!(key, error = %err, "invalid number; using default");
      fallback
    }
  }
}

/// Parses `Title:min,Title:min,...`.
///
/// Bounds must start at zero and strictly increase; the last tier has no
/// upper bound. Titles that slugify to the same id are rejected.
pub fn parse_value_tiers(
  raw: &str
) -> anyhow::Result<Vec<ValueTier>> {
  let mut tiers = Vec::new();
  let mut seen = HashSet::new();

  for entry in raw
    .split(',')
    .map(str::trim)
    .filter(|entry| !entry.is_empty())
  {
    let (title, min) = entry
      .rsplit_once(':')
      .ok_or_else(|| {
        anyhow!(
          "expected Title:min, got: \
           {entry}"
        )
      })?;
    let title = title.trim();
    if title.is_empty() {
      return Err(anyhow!(
        "tier title cannot be empty: \
         {entry}"
      ));
    }
    let min: u64 = min
      .trim()
      .replace('_', "")
      .parse()
      .with_context(|| {
        format!(
          "invalid tier bound: {entry}"
        )
      })?;
    let tier = ValueTier::new(title, min);
    if !seen.insert(tier.id.clone()) {
      return Err(anyhow!(
        "duplicate value tier: {title}"
      ));
    }
    tiers.push(tier);
  }

  let Some(first) = tiers.first() else {
    return Err(anyhow!(
      "value tiers cannot be empty"
    ));
  };
  if first.min_arr != 0 {
    return Err(anyhow!(
      "first value tier must start at \
       0, got {}",
      first.min_arr
    ));
  }
  for pair in tiers.windows(2) {
    if pair[1].min_arr <= pair[0].min_arr
    {
      return Err(anyhow!(
        "value tiers must strictly \
         increase: {} then {}",
        pair[0].min_arr,
        pair[1].min_arr
      ));
    }
  }

  Ok(tiers)
}
