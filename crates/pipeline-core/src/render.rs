use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::board::RenderedBoard;
use crate::config::Config;
use crate::fiscal::{self, FiscalQuarter};
use crate::opportunity::Opportunity;
use crate::view::{QuarterStatus, View, ViewSelection};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, board))]
    pub fn print_board(&mut self, board: &RenderedBoard) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_board(&mut out, board)
    }

    fn write_board<W: Write>(&self, out: &mut W, board: &RenderedBoard) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} [{}]",
            self.paint(&board.view.name, "1"),
            board.view.kind.key()
        )?;

        for rendered in &board.columns {
            let column = &rendered.column;
            let title = match column.metadata.quarter_status {
                Some(QuarterStatus::Current) => self.paint(&column.title, "32"),
                Some(QuarterStatus::Past) => self.paint(&column.title, "90"),
                _ => column.title.clone(),
            };
            let total: u64 = rendered.opportunities.iter().map(|opp| opp.amount_arr).sum();

            writeln!(out)?;
            writeln!(
                out,
                "{title} ({}, {} ARR)  {}",
                rendered.opportunities.len(),
                format_amount(total),
                self.paint(&column.id, "90")
            )?;

            if rendered.opportunities.is_empty() {
                continue;
            }

            let rows = rendered
                .opportunities
                .iter()
                .map(|opp| self.opportunity_row(opp))
                .collect();
            write_table(&mut *out, opportunity_headers(), rows)?;
        }

        if board.view.hidden_count > 0 {
            writeln!(out)?;
            writeln!(
                out,
                "{} opportunities close outside the shown quarters (board --all)",
                board.view.hidden_count
            )?;
        }

        Ok(())
    }

    fn opportunity_row(&self, opp: &Opportunity) -> Vec<String> {
        let id = opp.id.to_string();
        let short = id.split('-').next().unwrap_or(id.as_str());

        vec![
            self.paint(short, "33"),
            opp.name.clone(),
            opp.stage.title().to_string(),
            opp.forecast_category
                .map(|category| category.title().to_string())
                .unwrap_or_default(),
            format_amount(opp.amount_arr),
            opp.close_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ]
    }

    #[tracing::instrument(skip(self, views))]
    pub fn print_views(
        &mut self,
        views: &[View],
        current: ViewSelection,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            " ".to_string(),
            "Key".to_string(),
            "Name".to_string(),
            "Kind".to_string(),
            "Columns".to_string(),
        ];

        let rows = views
            .iter()
            .map(|view| {
                let marker = if view.selection() == current {
                    self.paint("*", "32")
                } else {
                    String::new()
                };
                let columns = match view {
                    View::BuiltIn(_) => "computed".to_string(),
                    View::Custom(custom) => custom
                        .sorted_columns()
                        .iter()
                        .map(|column| column.title.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                };
                let mut name = view.name().to_string();
                if let View::Custom(custom) = view
                    && custom.is_default
                {
                    name.push_str(" (default)");
                }
                vec![
                    marker,
                    view.selection().to_string(),
                    name,
                    view.kind().key().to_string(),
                    columns,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)
    }

    pub fn print_quarter(
        &mut self,
        date: NaiveDate,
        quarter: FiscalQuarter,
        fiscal_year_start_month: u32,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let (start, end) = fiscal::quarter_range(quarter, fiscal_year_start_month);
        writeln!(out, "date      {}", date.format("%Y-%m-%d"))?;
        writeln!(out, "quarter   {}", self.paint(&quarter.label(), "1"))?;
        writeln!(out, "column    {}", quarter.column_id())?;
        writeln!(
            out,
            "range     {} .. {}",
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )?;
        Ok(())
    }

    pub fn print_message(&mut self, message: &str) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{message}")?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn opportunity_headers() -> Vec<String> {
    ["ID", "Name", "Stage", "Forecast", "ARR", "Close"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
