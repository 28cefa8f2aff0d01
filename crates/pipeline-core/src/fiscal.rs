use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Datelike,
  Duration,
  NaiveDate
};
use regex::Regex;

/// A quarter of a fiscal year whose first month is configurable.
///
/// The fiscal year is named after the calendar year in which it ends,
/// so with a July start the quarter running July-September 2024 is
/// `Q1 2025`. Ordering is chronological.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
)]
pub struct FiscalQuarter {
  pub fiscal_year: i32,
  pub quarter:     u8
}

impl FiscalQuarter {
  #[must_use]
  pub fn new(
    fiscal_year: i32,
    quarter: u8
  ) -> Self {
    Self {
      fiscal_year,
      quarter: quarter.clamp(1, 4)
    }
  }

  fn index(self) -> i64 {
    i64::from(self.fiscal_year) * 4
      + i64::from(self.quarter) - 1
  }

  fn from_index(index: i64) -> Self {
    let year = index.div_euclid(4);
    let quarter = index.rem_euclid(4);
    Self {
      fiscal_year: i32::try_from(year)
        .unwrap_or(if year < 0 {
          i32::MIN
        } else {
          i32::MAX
        }),
      quarter:     quarter as u8 + 1
    }
  }

  #[must_use]
  pub fn offset(
    self,
    quarters: i64
  ) -> Self {
    Self::from_index(
      self
        .index()
        .saturating_add(quarters)
    )
  }

  #[must_use]
  pub fn next(self) -> Self {
    self.offset(1)
  }

  #[must_use]
  pub fn prev(self) -> Self {
    self.offset(-1)
  }

  /// Human label, e.g. `Q2 2025`.
  #[must_use]
  pub fn label(self) -> String {
    format!(
      "Q{} {}",
      self.quarter, self.fiscal_year
    )
  }

  /// Stable column id, e.g. `2025-Q2`.
  #[must_use]
  pub fn column_id(self) -> String {
    format!(
      "{}-Q{}",
      self.fiscal_year, self.quarter
    )
  }
}

impl fmt::Display for FiscalQuarter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "Q{} {}",
      self.quarter, self.fiscal_year
    )
  }
}

impl FromStr for FiscalQuarter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let token = s.trim();

    let label_re = Regex::new(
      r"(?i)^Q(?P<q>[1-4])\s*(?:FY)?\s*(?P<year>-?\d{1,6})$"
    )
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })?;
    let id_re = Regex::new(
      r"(?i)^(?:FY)?(?P<year>-?\d{1,6})-Q(?P<q>[1-4])$"
    )
    .map_err(|e| {
      anyhow!(
        "internal regex compile \
         failure: {e}"
      )
    })?;

    let caps = label_re
      .captures(token)
      .or_else(|| id_re.captures(token))
      .ok_or_else(|| {
        anyhow!(
          "unrecognized fiscal quarter: \
           {s}"
        )
      })?;

    let year: i32 = caps["year"]
      .parse()
      .map_err(|e| {
        anyhow!(
          "invalid fiscal year in {s}: \
           {e}"
        )
      })?;
    let quarter: u8 =
      caps["q"].parse().map_err(|e| {
        anyhow!(
          "invalid quarter in {s}: {e}"
        )
      })?;

    Ok(Self::new(year, quarter))
  }
}

/// Clamps a configured fiscal-year start month into `1..=12`.
#[must_use]
pub fn normalize_start_month(
  month: u32
) -> u32 {
  month.clamp(1, 12)
}

#[must_use]
pub fn quarter_of(
  date: NaiveDate,
  fiscal_year_start_month: u32
) -> FiscalQuarter {
  let start = normalize_start_month(
    fiscal_year_start_month
  );
  let month = date.month();
  let months_in =
    (month + 12 - start) % 12;
  let start_year = if month >= start {
    date.year()
  } else {
    date.year() - 1
  };
  let fiscal_year = if start == 1 {
    start_year
  } else {
    start_year + 1
  };

  FiscalQuarter {
    fiscal_year,
    quarter: (months_in / 3 + 1) as u8
  }
}

/// First day of `quarter`; `quarter_of` maps it back to `quarter`.
#[must_use]
pub fn close_date_for(
  quarter: FiscalQuarter,
  fiscal_year_start_month: u32
) -> NaiveDate {
  let (year, month) =
    quarter_start_month(
      quarter,
      normalize_start_month(
        fiscal_year_start_month
      )
    );
  NaiveDate::from_ymd_opt(year, month, 1)
    .unwrap_or(NaiveDate::MIN)
}

/// Inclusive first and last day of `quarter`.
#[must_use]
pub fn quarter_range(
  quarter: FiscalQuarter,
  fiscal_year_start_month: u32
) -> (NaiveDate, NaiveDate) {
  let start = close_date_for(
    quarter,
    fiscal_year_start_month
  );
  let next_start = close_date_for(
    quarter.next(),
    fiscal_year_start_month
  );
  let end = next_start
    .checked_sub_signed(Duration::days(
      1
    ))
    .unwrap_or(next_start);
  (start, end)
}

#[must_use]
pub fn quarter_label(
  date: NaiveDate,
  fiscal_year_start_month: u32
) -> String {
  quarter_of(
    date,
    fiscal_year_start_month
  )
  .label()
}

fn quarter_start_month(
  quarter: FiscalQuarter,
  start: u32
) -> (i32, u32) {
  let start_year = if start == 1 {
    quarter.fiscal_year
  } else {
    quarter.fiscal_year.saturating_sub(1)
  };
  let offset = (start - 1)
    + (u32::from(quarter.quarter.clamp(1, 4))
      - 1)
      * 3;
  (
    start_year
      .saturating_add(i32::from(offset >= 12)),
    offset % 12 + 1
  )
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::{
    FiscalQuarter,
    close_date_for,
    quarter_of,
    quarter_range
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  #[test]
  fn calendar_year_quarters() {
    assert_eq!(
      quarter_of(date(2025, 2, 10), 1)
        .label(),
      "Q1 2025"
    );
    assert_eq!(
      quarter_of(date(2025, 4, 1), 1)
        .label(),
      "Q2 2025"
    );
    assert_eq!(
      quarter_of(date(2025, 12, 31), 1)
        .label(),
      "Q4 2025"
    );
  }

  #[test]
  fn fiscal_year_is_named_for_its_final_year()
  {
    let q = quarter_of(
      date(2024, 7, 15),
      7
    );
    assert_eq!(
      q,
      FiscalQuarter::new(2025, 1)
    );
    assert_eq!(
      quarter_of(date(2025, 1, 3), 7),
      FiscalQuarter::new(2025, 3)
    );
    assert_eq!(
      quarter_of(date(2025, 6, 30), 7),
      FiscalQuarter::new(2025, 4)
    );
  }

  #[test]
  fn boundary_day_starts_the_new_quarter()
  {
    assert_eq!(
      quarter_of(date(2024, 7, 1), 7),
      FiscalQuarter::new(2025, 1)
    );
    assert_eq!(
      quarter_of(date(2024, 6, 30), 7),
      FiscalQuarter::new(2024, 4)
    );
    assert_eq!(
      quarter_of(date(2025, 1, 1), 1),
      FiscalQuarter::new(2025, 1)
    );
  }

  #[test]
  fn close_date_is_first_day_of_quarter()
  {
    assert_eq!(
      close_date_for(
        FiscalQuarter::new(2025, 2),
        1
      ),
      date(2025, 4, 1)
    );
    assert_eq!(
      close_date_for(
        FiscalQuarter::new(2025, 3),
        7
      ),
      date(2025, 1, 1)
    );
    assert_eq!(
      close_date_for(
        FiscalQuarter::new(2026, 4),
        11
      ),
      date(2026, 8, 1)
    );
  }

  #[test]
  fn range_covers_three_months() {
    let (start, end) = quarter_range(
      FiscalQuarter::new(2025, 1),
      2
    );
    assert_eq!(start, date(2024, 2, 1));
    assert_eq!(end, date(2024, 4, 30));
  }

  #[test]
  fn parses_labels_and_column_ids() {
    let from_label: FiscalQuarter =
      "Q2 2025".parse().expect("label");
    let from_id: FiscalQuarter =
      "2025-Q2".parse().expect("id");
    assert_eq!(from_label, from_id);
    assert_eq!(
      from_label.column_id(),
      "2025-Q2"
    );
    assert!(
      "Q5 2025"
        .parse::<FiscalQuarter>()
        .is_err()
    );
    assert!(
      "discovery"
        .parse::<FiscalQuarter>()
        .is_err()
    );
  }

  #[test]
  fn offsets_cross_year_boundaries() {
    let q = FiscalQuarter::new(2025, 4);
    assert_eq!(
      q.next(),
      FiscalQuarter::new(2026, 1)
    );
    assert_eq!(
      FiscalQuarter::new(2025, 1).prev(),
      FiscalQuarter::new(2024, 4)
    );
    assert_eq!(
      q.offset(-7),
      FiscalQuarter::new(2024, 1)
    );
  }
}
