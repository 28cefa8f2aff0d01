use std::io::{self, Read};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::board::Board;
use crate::cli::Invocation;
use crate::config::Config;
use crate::coordinator::ReassignOutcome;
use crate::datastore::{DataStore, FilePreferences};
use crate::datetime::parse_date_expr;
use crate::fiscal;
use crate::opportunity::{ForecastCategory, Opportunity, Stage};
use crate::reassign::NoOpReason;
use crate::render::Renderer;
use crate::resolver::ResolvedView;
use crate::view::{NewCustomView, View, ViewSelection};

pub type FileBoard = Board<DataStore, FilePreferences>;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "board",
        "move",
        "views",
        "use",
        "create-view",
        "quarter",
        "import",
        "export",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(board, cfg, renderer, inv))]
pub async fn dispatch(
    board: &mut FileBoard,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?args, "dispatching command");

    match command {
        "board" => cmd_board(board, renderer, args),
        "move" => cmd_move(board, renderer, args).await,
        "views" => cmd_views(board, renderer),
        "use" => cmd_use(board, renderer, args).await,
        "create-view" => cmd_create_view(board, renderer, args).await,
        "quarter" => cmd_quarter(board, renderer, args),
        "import" => cmd_import(board).await,
        "export" => cmd_export(board),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(board, renderer, args))]
fn cmd_board(board: &FileBoard, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command board");

    let mut params = board.params();
    for arg in args {
        match arg.as_str() {
            "--all" | "all" => params.quarterly.rolling_window = false,
            other => return Err(anyhow!("board: unexpected argument {other}")),
        }
    }

    let rendered = board.render_with(&params);
    renderer.print_board(&rendered)
}

#[instrument(skip(board, renderer, args))]
async fn cmd_move(
    board: &FileBoard,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command move");

    let [opportunity, source, target] = args else {
        return Err(anyhow!(
            "usage: move <opportunity> <source-column> <target-column>"
        ));
    };

    let id = board.lookup(opportunity)?;
    let view = board.resolve();
    let source_id = resolve_column_id(&view, source).unwrap_or_else(|| source.clone());
    let target_id = resolve_column_id(&view, target).unwrap_or_else(|| target.clone());

    let outcome = match board.on_reassign(id, &source_id, &target_id).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let retry = if err.is_retryable() {
                "; the board was restored, try again"
            } else {
                ""
            };
            return Err(anyhow::Error::new(err).context(format!("move was not saved{retry}")));
        }
    };
    board.settle().await;

    let message = match outcome {
        ReassignOutcome::Applied(saved) => {
            let title = view
                .column(&target_id)
                .map(|column| column.title.as_str())
                .unwrap_or(target_id.as_str());
            format!("Moved {} to {title}.", saved.name)
        }
        ReassignOutcome::Skipped(NoOpReason::Unchanged) => {
            format!("{opportunity} is already in {target}.")
        }
        ReassignOutcome::Skipped(NoOpReason::ReadOnlyView) => {
            format!("The {} view is read-only; nothing changed.", view.name)
        }
        ReassignOutcome::Skipped(NoOpReason::InvalidDropTarget) => {
            format!("{target} is not a column of the {} view; nothing changed.", view.name)
        }
        ReassignOutcome::Missing => format!("No opportunity {opportunity}; nothing changed."),
    };
    renderer.print_message(&message)
}

#[instrument(skip(board, renderer))]
fn cmd_views(board: &FileBoard, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command views");
    let current = board.resolve().selection;
    renderer.print_views(&board.activation().catalog(), current)
}

#[instrument(skip(board, renderer, args))]
async fn cmd_use(
    board: &mut FileBoard,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command use");

    let token = args.join(" ");
    if token.trim().is_empty() {
        return Err(anyhow!("usage: use <view-key|custom-view-id|custom-view-name>"));
    }

    let views = board.activation().catalog();
    let selection =
        find_view(&views, &token).ok_or_else(|| anyhow!("unknown view: {token}"))?;
    board.select(selection).await?;

    let resolved = board.resolve();
    renderer.print_message(&format!("Now showing {}.", resolved.name))
}

#[instrument(skip(board, renderer, args))]
async fn cmd_create_view(
    board: &mut FileBoard,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command create-view");

    let is_default = args.iter().any(|arg| arg == "--default");
    let mut positional = args.iter().filter(|arg| arg.as_str() != "--default");
    let name = positional
        .next()
        .ok_or_else(|| anyhow!("usage: create-view <name> <column>... [--default]"))?;
    let column_titles: Vec<String> = positional.cloned().collect();

    let created = board
        .create_view(NewCustomView {
            name: name.clone(),
            column_titles,
            is_default,
        })
        .await?;

    renderer.print_message(&format!("Created view {} ({}).", created.name, created.id))
}

#[instrument(skip(board, renderer, args))]
fn cmd_quarter(board: &FileBoard, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command quarter");

    let raw = if args.is_empty() {
        "today".to_string()
    } else {
        args.join(" ")
    };
    let date = parse_date_expr(&raw, board.today())?;
    let m = board.settings().fiscal_year_start_month;
    renderer.print_quarter(date, fiscal::quarter_of(date, m), m)
}

#[instrument(skip(board))]
async fn cmd_import(board: &FileBoard) -> anyhow::Result<()> {
    info!("command import");

    let mut stdin = String::new();
    io::stdin()
        .read_to_string(&mut stdin)
        .context("failed reading stdin")?;

    let trimmed = stdin.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("import: empty input"));
    }

    let imported: Vec<Opportunity> = parse_import_items(trimmed)?
        .into_iter()
        .map(ImportOpportunity::into_opportunity)
        .collect();

    let count = board
        .coordinator()
        .store()
        .upsert_opportunities(imported)?;
    board.coordinator().refresh().await?;

    println!("Imported {count} opportunit{}.", if count == 1 { "y" } else { "ies" });
    Ok(())
}

#[instrument(skip(board))]
fn cmd_export(board: &FileBoard) -> anyhow::Result<()> {
    info!("command export");
    let opportunities = board.coordinator().snapshot();
    println!("{}", serde_json::to_string_pretty(&opportunities)?);
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: board [--all], move <opportunity> <source> <target>, views, use <view>, create-view <name> <column>... [--default], quarter [date], import, export"
    );
    Ok(())
}

/// Accepts a column id or, case-insensitively, a column title.
pub fn resolve_column_id(view: &ResolvedView, token: &str) -> Option<String> {
    if view.has_column(token) {
        return Some(token.to_string());
    }
    let wanted = token.trim().to_lowercase();
    view.columns
        .iter()
        .find(|column| column.title.to_lowercase() == wanted)
        .map(|column| column.id.clone())
}

/// Accepts a built-in key, a custom view id, or a custom view name.
pub fn find_view(views: &[View], token: &str) -> Option<ViewSelection> {
    if let Ok(selection) = token.parse::<ViewSelection>() {
        return match selection {
            ViewSelection::BuiltIn(_) => Some(selection),
            ViewSelection::Custom(id) => views
                .iter()
                .any(|view| view.selection() == ViewSelection::Custom(id))
                .then_some(selection),
        };
    }

    let wanted = token.trim().to_lowercase();
    let mut named = views
        .iter()
        .filter(|view| !view.is_built_in() && view.name().to_lowercase() == wanted);
    let first = named.next()?;
    if named.next().is_some() {
        warn!(name = %token, "several custom views share this name; using the first");
    }
    Some(first.selection())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportOpportunity {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    stage: Option<Stage>,
    #[serde(default)]
    forecast_category: Option<ForecastCategory>,
    #[serde(default)]
    confidence: Option<u8>,
    #[serde(default)]
    amount_arr: u64,
    #[serde(default)]
    close_date: Option<NaiveDate>,
    #[serde(default)]
    lost_date: Option<NaiveDate>,
    #[serde(default)]
    column_id: Option<String>,
}

impl ImportOpportunity {
    fn into_opportunity(self) -> Opportunity {
        let stage = self.stage.unwrap_or(Stage::Prospecting);
        let mut opp = Opportunity::new(self.name, stage);
        if let Some(id) = self.id {
            opp.id = id;
        }
        if self.forecast_category.is_some() {
            opp.forecast_category = self.forecast_category;
        }
        if self.confidence.is_some() {
            opp.confidence = self.confidence;
        }
        opp.amount_arr = self.amount_arr;
        opp.close_date = self.close_date;
        opp.lost_date = self.lost_date;
        opp.column_id = self.column_id;
        opp
    }
}

fn parse_import_items(trimmed: &str) -> anyhow::Result<Vec<ImportOpportunity>> {
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("failed parsing JSON array");
    }

    if trimmed.starts_with('{')
        && let Ok(item) = serde_json::from_str::<ImportOpportunity>(trimmed)
    {
        return Ok(vec![item]);
    }

    let mut out = Vec::new();
    for (idx, line) in trimmed.lines().enumerate() {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let item: ImportOpportunity = serde_json::from_str(token)
            .with_context(|| format!("failed parsing import line {}", idx + 1))?;
        out.push(item);
    }

    if out.is_empty() {
        return Err(anyhow!("import: empty input"));
    }

    Ok(out)
}
