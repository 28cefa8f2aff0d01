pub mod activation;
pub mod board;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod datastore;
pub mod datetime;
pub mod fiscal;
pub mod grouping;
pub mod opportunity;
pub mod reassign;
pub mod render;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod view;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting pipeline CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.pipelinerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let settings =
    settings::BoardSettings::from_config(
      &cfg
    );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store = Arc::new(
    datastore::DataStore::open(
      &data_dir,
      settings.fiscal_year_start_month
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?
  );
  let prefs = Arc::new(
    datastore::FilePreferences::open(
      &data_dir
    )?
  );

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let mut board = board::Board::open(
      store,
      prefs,
      settings,
      datetime::project_today()
    )
    .await?;

    commands::dispatch(
      &mut board,
      &cfg,
      &mut renderer,
      inv
    )
    .await?;

    board.settle().await;
    anyhow::Ok(())
  })?;

  info!("done");
  Ok(())
}
