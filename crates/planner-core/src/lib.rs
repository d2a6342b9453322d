pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod planner;
pub mod projects;
pub mod render;
pub mod session;
pub mod shell;
pub mod state;
pub mod task;
pub mod views;

use std::ffi::OsString;
use std::io::Write;

use anyhow::{
  Context,
  anyhow
};
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::planner::{
  Outcome,
  Planner
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
    "starting planner CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.plannerrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  if let Some(api) = cli.api {
    cfg.apply_overrides([(
      "api.url".to_string(),
      api
    )]);
  }

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async \
         runtime"
      )?;

  runtime.block_on(async move {
    let mut planner =
      build_planner(&cfg)?;

    if inv.command == "shell" {
      return shell::run_shell(
        &mut planner,
        &cfg,
        &renderer
      )
      .await;
    }

    if commands::needs_tasks(
      &inv.command
    ) {
      load_tasks(&mut planner).await?;
    }

    let mut out =
      std::io::stdout().lock();
    commands::dispatch(
      &mut planner,
      &cfg,
      &renderer,
      &mut out,
      &inv
    )
    .await?;
    out.flush()?;

    info!("done");
    Ok(())
  })
}

/// Wires config into a planner with
/// any persisted session restored.
pub fn build_planner(
  cfg: &config::Config
) -> anyhow::Result<Planner> {
  let api_url = cfg.api_url();
  let client =
    client::TaskStoreClient::new(
      &api_url
    )
    .with_context(|| {
      format!(
        "invalid task store URL \
         {api_url}"
      )
    })?;

  let session_file =
    config::resolve_session_path(cfg)?
      .map(session::SessionFile::new);
  let session =
    session::SessionManager::new(
      cfg.auth_required(),
      session_file
    );

  let mut planner =
    Planner::new(client, session);
  if planner.restore_session() {
    debug!("using persisted session");
  }
  Ok(planner)
}

async fn load_tasks(
  planner: &mut Planner
) -> anyhow::Result<()> {
  match planner.refresh().await {
    | Outcome::Applied => Ok(()),
    | Outcome::Rejected(reason) => {
      Err(anyhow!(
        "{reason}: planner login \
         EMAIL PASSWORD"
      ))
    }
    | other => {
      Err(anyhow!(
        "could not load tasks: {other}"
      ))
    }
  }
}
