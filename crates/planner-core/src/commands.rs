use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::planner::{Outcome, Planner};
use crate::render::{Renderer, short_id};
use crate::task::{Category, CategoryFilter, TaskDraft, TaskPatch};

const HELP: &str = "\
usage: planner [-v|-q] [--rc KEY=VALUE] [--plannerrc PATH] [--api URL] <command> [args]

views
  stream [all|work|personal]      open tasks outside any project
  today [DATE|clear]              open tasks scheduled for a day
  projects                        project groups with progress
  done                            completed tasks

tasks
  add [category:C] [project:P] [date:D] TEXT...
  edit ID [category:C] [project:P] [date:D] [TEXT...]
  toggle ID                       flip done
  delete ID

projects
  project add NAME
  project delete NAME             unassigns every task in it
  project toggle NAME             expand or collapse in `projects`

session
  login EMAIL PASSWORD
  register NAME EMAIL PASSWORD
  logout
  whoami

other
  refresh  shell  help  version

IDs may be shortened to any unique prefix. Dates accept today, tomorrow,
yesterday, weekday names, +Nd/-Nd, +Nw/-Nw and YYYY-MM-DD.";

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "stream", "today", "projects", "project", "done", "add", "edit", "toggle", "delete",
        "login", "register", "logout", "whoami", "refresh", "shell", "help", "version",
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

/// Commands that read or address the task list and so need it loaded first.
pub fn needs_tasks(command: &str) -> bool {
    matches!(
        command,
        "stream" | "today" | "projects" | "project" | "done" | "edit" | "toggle" | "delete"
    )
}

#[instrument(skip(planner, cfg, renderer, out, inv), fields(command = %inv.command))]
pub async fn dispatch<W: Write>(
    planner: &mut Planner,
    cfg: &Config,
    renderer: &Renderer,
    out: &mut W,
    inv: &Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let args = inv.args.as_slice();
    debug!(args = ?args, "dispatching command");

    match inv.command.as_str() {
        "stream" => cmd_stream(planner, renderer, out, args, now),
        "today" => cmd_today(planner, renderer, out, args, now),
        "projects" => {
            let projections = planner.projections(now);
            renderer.print_projects(out, &projections.projects)
        }
        "done" => {
            let projections = planner.projections(now);
            renderer.print_done(out, &projections.done)
        }
        "add" => cmd_add(planner, cfg, out, args, now).await,
        "edit" => cmd_edit(planner, renderer, out, args, now).await,
        "toggle" => {
            let id = resolve_task_id(planner, single_arg(args, "toggle ID")?)?;
            let outcome = planner.toggle_done(&id).await;
            report(renderer, out, outcome)
        }
        "delete" => {
            let id = resolve_task_id(planner, single_arg(args, "delete ID")?)?;
            let outcome = planner.delete_task(&id).await;
            report(renderer, out, outcome)
        }
        "project" => cmd_project(planner, renderer, out, args).await,
        "login" => {
            let [email, password] = args else {
                return Err(anyhow!("usage: login EMAIL PASSWORD"));
            };
            planner.login(email, password).await?;
            renderer.print_whoami(out, planner.session())
        }
        "register" => {
            let Some((password, rest)) = args.split_last() else {
                return Err(anyhow!("usage: register NAME EMAIL PASSWORD"));
            };
            let Some((email, name)) = rest.split_last() else {
                return Err(anyhow!("usage: register NAME EMAIL PASSWORD"));
            };
            if name.is_empty() {
                return Err(anyhow!("usage: register NAME EMAIL PASSWORD"));
            }
            planner.register(&name.join(" "), email, password).await?;
            renderer.print_whoami(out, planner.session())
        }
        "logout" => {
            planner.logout().await;
            writeln!(out, "Signed out.")?;
            Ok(())
        }
        "whoami" => renderer.print_whoami(out, planner.session()),
        "refresh" => {
            let outcome = planner.refresh().await;
            report(renderer, out, outcome)?;
            renderer.print_summary(out, planner.projections(now).counts())
        }
        "shell" => Err(anyhow!("the shell is already running")),
        "help" => {
            writeln!(out, "{HELP}")?;
            Ok(())
        }
        "version" => {
            writeln!(out, "{}", env!("CARGO_PKG_VERSION"))?;
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn cmd_stream<W: Write>(
    planner: &mut Planner,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    if let Some(raw) = args.first() {
        let filter: CategoryFilter = raw.parse()?;
        planner.set_category_filter(filter);
    }
    let filter = planner.state().selection.category;
    let projections = planner.projections(now);
    renderer.print_stream(out, &projections.stream, filter)
}

fn cmd_today<W: Write>(
    planner: &mut Planner,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    match args.first().map(String::as_str) {
        Some("clear") => planner.set_today(None),
        Some(raw) => planner.set_today(Some(parse_date_expr(raw, now)?)),
        None => {}
    }
    let projections = planner.projections(now);
    renderer.print_today(out, &projections.today, projections.today_date)
}

#[instrument(skip_all)]
async fn cmd_add<W: Write>(
    planner: &mut Planner,
    cfg: &Config,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");
    let mods = parse_modifiers(args, now)?;

    let category = mods
        .category
        .as_deref()
        .map(Category::parse_or_default)
        .unwrap_or_else(|| cfg.default_category());
    let mut draft = TaskDraft::new(mods.words.join(" ")).with_category(category);
    if let Some(project) = mods.project {
        draft = draft.with_project(project);
    }
    if let Some(Some(date)) = mods.date {
        draft = draft.with_date(date);
    }

    let outcome = planner.create_task(draft).await;
    check(outcome)?;
    if let Some(task) = planner.state().tasks.as_slice().first() {
        writeln!(out, "Created task {}.", short_id(&task.id))?;
    }
    Ok(())
}

#[instrument(skip_all)]
async fn cmd_edit<W: Write>(
    planner: &mut Planner,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let Some((id, rest)) = args.split_first() else {
        return Err(anyhow!("usage: edit ID [category:C] [project:P] [date:D] [TEXT...]"));
    };
    let id = resolve_task_id(planner, id)?;
    let mods = parse_modifiers(rest, now)?;

    let category = mods
        .category
        .as_deref()
        .map(str::parse::<Category>)
        .transpose()
        .context("invalid category modifier")?;
    let patch = TaskPatch {
        text: (!mods.words.is_empty()).then(|| mods.words.join(" ")),
        category,
        project: mods.project,
        date: mods.date,
        done: None,
    };
    let outcome = planner.update_task(&id, patch).await;
    report(renderer, out, outcome)
}

async fn cmd_project<W: Write>(
    planner: &mut Planner,
    renderer: &Renderer,
    out: &mut W,
    args: &[String],
) -> anyhow::Result<()> {
    let Some((action, name)) = args.split_first() else {
        return Err(anyhow!("usage: project add|delete|toggle NAME"));
    };
    let name = name.join(" ");
    if name.trim().is_empty() {
        return Err(anyhow!("project name is empty"));
    }

    match action.as_str() {
        "add" => {
            if planner.add_project(&name) {
                writeln!(out, "Added project {}.", name.trim())?;
            } else {
                writeln!(out, "Project {} already exists.", name.trim())?;
            }
            Ok(())
        }
        "delete" | "remove" => {
            let removal = planner.delete_project(&name).await?;
            renderer.print_project_removal(out, name.trim(), removal)
        }
        "toggle" => {
            let state = if planner.toggle_project(&name) {
                "expanded"
            } else {
                "collapsed"
            };
            writeln!(out, "Project {} {state}.", name.trim())?;
            Ok(())
        }
        other => Err(anyhow!("unknown project action: {other}")),
    }
}

/// Words plus `key:value` modifiers from an `add` or `edit` line.
#[derive(Debug, Default, PartialEq, Eq)]
struct Modifiers {
    words: Vec<String>,
    /// Raw value; `add` falls back to work on unknown names, `edit` refuses them.
    category: Option<String>,
    project: Option<String>,
    /// `Some(None)` clears the date.
    date: Option<Option<NaiveDate>>,
}

fn parse_modifiers(args: &[String], now: DateTime<Utc>) -> anyhow::Result<Modifiers> {
    let mut mods = Modifiers::default();
    for arg in args {
        let Some((key, value)) = arg.split_once(':') else {
            mods.words.push(arg.clone());
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "category" | "cat" => mods.category = Some(value.trim().to_string()),
            "project" | "proj" => mods.project = Some(value.trim().to_string()),
            "date" | "due" if value.trim().is_empty() => mods.date = Some(None),
            "date" | "due" => mods.date = Some(Some(parse_date_expr(value, now)?)),
            _ => mods.words.push(arg.clone()),
        }
    }
    Ok(mods)
}

/// Full id of the single held task whose id equals or starts with `token`.
fn resolve_task_id(planner: &Planner, token: &str) -> anyhow::Result<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(anyhow!("task id is empty"));
    }
    if planner.state().tasks.get(token).is_some() {
        return Ok(token.to_string());
    }

    let mut matches = planner
        .state()
        .tasks
        .iter()
        .filter(|task| task.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("task id {token} is ambiguous")),
        (None, _) => Err(anyhow!("no task matches id {token}")),
    }
}

fn single_arg<'a>(args: &'a [String], usage: &str) -> anyhow::Result<&'a str> {
    match args {
        [one] => Ok(one.as_str()),
        _ => Err(anyhow!("usage: {usage}")),
    }
}

fn check(outcome: Outcome) -> anyhow::Result<()> {
    match outcome {
        Outcome::Applied | Outcome::Unchanged => Ok(()),
        other => Err(anyhow!("{other}")),
    }
}

fn report<W: Write>(renderer: &Renderer, out: &mut W, outcome: Outcome) -> anyhow::Result<()> {
    check(outcome)?;
    renderer.print_outcome(out, outcome)
}
