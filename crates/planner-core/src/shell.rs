use std::io::{self, Write};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, instrument};

use crate::cli::Invocation;
use crate::commands::dispatch;
use crate::config::Config;
use crate::planner::Planner;
use crate::render::Renderer;

const PROMPT: &str = "planner> ";

/// Runs commands typed on stdin against one long-lived planner until `quit`,
/// end of input or Ctrl-C. A summary line is printed whenever state changes.
#[instrument(skip_all)]
pub async fn run_shell(
    planner: &mut Planner,
    cfg: &Config,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    let mut changes = planner.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if planner.session().can_mutate() {
        let outcome = planner.refresh().await;
        if !outcome.is_applied() {
            eprintln!("could not load tasks: {outcome}");
        }
    } else {
        println!("Not signed in. Use `login EMAIL PASSWORD` or `register NAME EMAIL PASSWORD`.");
    }
    prompt()?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupted");
                println!();
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let revision = *changes.borrow_and_update();
                debug!(seq = revision.seq, "state changed");
                renderer.print_summary(&mut io::stdout().lock(), revision.counts)?;
                prompt()?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed reading from stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                let line = line.trim();
                if matches!(line, "quit" | "exit") {
                    break;
                }
                if !line.is_empty() {
                    run_line(planner, cfg, renderer, line).await;
                }
                if !changes.has_changed().unwrap_or(false) {
                    prompt()?;
                }
            }
        }
    }

    Ok(())
}

async fn run_line(planner: &mut Planner, cfg: &Config, renderer: &Renderer, line: &str) {
    let result = match Invocation::from_line(cfg, line) {
        Ok(inv) => {
            let mut out = Vec::new();
            let result = dispatch(planner, cfg, renderer, &mut out, &inv).await;
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(&out)
                .and_then(|()| stdout.flush())
                .context("failed writing to stdout")
                .and(result)
        }
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        eprintln!("error: {err:#}");
    }
}

fn prompt() -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{PROMPT}")?;
    stdout.flush()?;
    Ok(())
}
