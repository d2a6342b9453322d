use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::planner::{Outcome, ProjectRemoval};
use crate::session::SessionManager;
use crate::task::{CategoryFilter, Task};
use crate::views::{ProjectGroup, ViewCounts};

const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip_all, fields(filter = %filter))]
    pub fn print_stream<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        filter: CategoryFilter,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&format!("Stream ({filter})"), "1"))?;
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(short_id(&task.id), "33"),
                    task.category.to_string(),
                    task.date.map(|d| d.to_string()).unwrap_or_default(),
                    task.display_title().to_string(),
                ]
            })
            .collect();
        write_table(out, &["ID", "Category", "Date", "Title"], rows)
    }

    #[tracing::instrument(skip_all, fields(day = %day))]
    pub fn print_today<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        day: NaiveDate,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&format!("Today {day}"), "1"))?;
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(short_id(&task.id), "33"),
                    task.category.to_string(),
                    task.project.trim().to_string(),
                    task.display_title().to_string(),
                ]
            })
            .collect();
        write_table(out, &["ID", "Category", "Project", "Title"], rows)
    }

    #[tracing::instrument(skip_all, fields(groups = groups.len()))]
    pub fn print_projects<W: Write>(
        &self,
        out: &mut W,
        groups: &[ProjectGroup<'_>],
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint("Projects", "1"))?;
        if groups.is_empty() {
            writeln!(out, "No projects.")?;
            return Ok(());
        }

        for group in groups {
            let marker = if group.expanded { "v" } else { ">" };
            writeln!(
                out,
                "{marker} {} {}",
                self.paint(&group.name, "36"),
                self.paint(&format!("{}/{}", group.completed, group.total), "2")
            )?;
            if !group.expanded {
                continue;
            }
            for task in &group.tasks {
                let check = if task.done { "[x]" } else { "[ ]" };
                writeln!(
                    out,
                    "    {check} {} {}",
                    self.paint(short_id(&task.id), "33"),
                    task.display_title()
                )?;
            }
        }
        Ok(())
    }

    pub fn print_done<W: Write>(&self, out: &mut W, tasks: &[&Task]) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint("Done", "1"))?;
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(short_id(&task.id), "33"),
                    task.category.to_string(),
                    task.project.trim().to_string(),
                    self.paint(task.display_title(), "9"),
                ]
            })
            .collect();
        write_table(out, &["ID", "Category", "Project", "Title"], rows)
    }

    pub fn print_summary<W: Write>(&self, out: &mut W, counts: ViewCounts) -> anyhow::Result<()> {
        writeln!(
            out,
            "{}",
            self.paint(
                &format!(
                    "stream {}  today {}  projects {}  done {}",
                    counts.stream, counts.today, counts.projects, counts.done
                ),
                "2"
            )
        )?;
        Ok(())
    }

    pub fn print_whoami<W: Write>(
        &self,
        out: &mut W,
        session: &SessionManager,
    ) -> anyhow::Result<()> {
        match session.user() {
            Some(user) if user.name.is_empty() => writeln!(out, "{}", user.email)?,
            Some(user) => writeln!(out, "{} <{}>", user.name, user.email)?,
            None if session.is_required() => writeln!(out, "not signed in")?,
            None => writeln!(out, "accounts are disabled for this task store")?,
        }
        Ok(())
    }

    pub fn print_outcome<W: Write>(&self, out: &mut W, outcome: Outcome) -> anyhow::Result<()> {
        let code = match outcome {
            Outcome::Applied | Outcome::Unchanged => "32",
            Outcome::Rejected(_) => "33",
            Outcome::Failed | Outcome::SessionExpired => "31",
        };
        writeln!(out, "{}", self.paint(&outcome.to_string(), code))?;
        Ok(())
    }

    pub fn print_project_removal<W: Write>(
        &self,
        out: &mut W,
        name: &str,
        removal: ProjectRemoval,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "Removed project {name}; {} task(s) unassigned.",
            removal.cleared
        )?;
        if removal.failed > 0 {
            let note = format!(
                "{} task(s) still carry the project; run the command again to retry.",
                removal.failed
            );
            writeln!(out, "{}", self.paint(&note, "31"))?;
        }
        if removal.session_expired {
            self.print_outcome(out, Outcome::SessionExpired)?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Leading characters of a store id, enough to pick a task by prefix.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    if rows.is_empty() {
        writeln!(writer, "No tasks.")?;
        return Ok(());
    }

    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(*header));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
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
        for (idx, cell) in row.iter().enumerate() {
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

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::task::Category;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            text: format!("{title} and more words"),
            title: Some(title.to_string()),
            category: Category::Personal,
            project: String::new(),
            date: None,
            done: false,
            created_at: Utc::now(),
        }
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn short_id_truncates_on_char_boundary() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("äääääääää"), "ääääääää");
    }

    #[test]
    fn stream_table_aligns_wide_titles() {
        let wide = task("aaaaaaaa-1", "日本語");
        let narrow = task("bbbbbbbb-2", "x");
        let text = render(|out| {
            Renderer::plain().print_stream(out, &[&wide, &narrow], CategoryFilter::All)
        });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Stream (all)");
        assert!(lines[1].starts_with("ID       Category Date Title"));
        assert!(lines[3].contains("aaaaaaaa personal"));
        assert!(lines[3].contains("日本語"));
        assert!(lines[4].contains("bbbbbbbb"));
    }

    #[test]
    fn empty_views_say_so() {
        let text = render(|out| Renderer::plain().print_done(out, &[]));
        assert_eq!(text, "Done\nNo tasks.\n");
        let text = render(|out| Renderer::plain().print_projects(out, &[]));
        assert_eq!(text, "Projects\nNo projects.\n");
    }

    #[test]
    fn collapsed_groups_only_show_counts() {
        let member = task("cccccccc", "Plant beans");
        let groups = vec![
            ProjectGroup {
                name: "Garden".to_string(),
                tasks: vec![&member],
                completed: 0,
                total: 1,
                expanded: true,
            },
            ProjectGroup {
                name: "House".to_string(),
                tasks: vec![],
                completed: 0,
                total: 0,
                expanded: false,
            },
        ];
        let text = render(|out| Renderer::plain().print_projects(out, &groups));
        assert_eq!(
            text,
            "Projects\nv Garden 0/1\n    [ ] cccccccc Plant beans\n> House 0/0\n"
        );
    }
}
