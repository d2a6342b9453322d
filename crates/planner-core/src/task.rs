use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::datetime::{created_at_serde, iso_date_serde};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Work,
    Personal,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
        }
    }

    /// Unknown or empty input falls back to [`Category::Work`].
    pub fn parse_or_default(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Self::Work),
            "personal" => Ok(Self::Personal),
            other => Err(anyhow!("unknown category: {other}")),
        }
    }
}

/// Category selection applied to the stream view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    pub fn matches(self, category: Category) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == category,
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(category) => fmt::Display::fmt(category, f),
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<Category>()
            .map(Self::Only)
            .map_err(|_| anyhow!("expected all, work or personal, got: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "category_or_default")]
    pub category: Category,

    #[serde(default, deserialize_with = "string_or_empty")]
    pub project: String,

    #[serde(default, with = "iso_date_serde::option")]
    pub date: Option<NaiveDate>,

    #[serde(default)]
    pub done: bool,

    #[serde(rename = "createdAt", with = "created_at_serde")]
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Short label for tables; the store may omit the title.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => self.text.as_str(),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.project.trim().is_empty()
    }

    pub fn in_project(&self, name: &str) -> bool {
        !self.is_unassigned() && self.project.trim() == name.trim()
    }
}

/// User input for a new task, before validation.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub text: String,
    pub category: Option<Category>,
    pub project: Option<String>,
    pub date: Option<NaiveDate>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Applies defaults; `None` when the trimmed text is empty.
    pub fn normalize(&self) -> Option<NewTask> {
        let text = self.text.trim();
        if text.is_empty() {
            return None;
        }
        Some(NewTask {
            text: text.to_string(),
            category: self.category.unwrap_or_default(),
            project: self
                .project
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            date: self.date,
        })
    }
}

/// Body of `POST /tasks`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewTask {
    pub text: String,
    pub category: Category,
    pub project: String,
    #[serde(with = "iso_date_serde::option")]
    pub date: Option<NaiveDate>,
}

/// Body of `PATCH /tasks/{id}`. Absent fields are left untouched by the store.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "iso_date_serde::nullable"
    )]
    pub date: Option<Option<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

impl TaskPatch {
    pub fn done(done: bool) -> Self {
        Self {
            done: Some(done),
            ..Self::default()
        }
    }

    pub fn clear_project() -> Self {
        Self {
            project: Some(String::new()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.category.is_none()
            && self.project.is_none()
            && self.date.is_none()
            && self.done.is_none()
    }

    /// True when the patch carries text that trims to nothing.
    pub fn has_blank_text(&self) -> bool {
        self.text
            .as_deref()
            .map(|text| text.trim().is_empty())
            .unwrap_or(false)
    }
}

fn category_or_default<'de, D>(deserializer: D) -> Result<Category, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(Category::parse_or_default)
        .unwrap_or_default())
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_store_record_with_naive_timestamp() {
        let raw = json!({
            "id": "a1",
            "text": "buy milk and bread today please",
            "title": "buy milk and bread today",
            "category": "personal",
            "project": "",
            "date": "2026-02-16",
            "done": false,
            "createdAt": "2026-02-16T08:30:00.123456"
        });
        let task: Task = serde_json::from_value(raw).expect("decode task");
        assert_eq!(task.category, Category::Personal);
        assert!(task.is_unassigned());
        assert_eq!(task.date, NaiveDate::from_ymd_opt(2026, 2, 16));
        assert_eq!(task.display_title(), "buy milk and bread today");
    }

    #[test]
    fn unknown_category_and_null_project_fall_back() {
        let raw = json!({
            "id": "a2",
            "text": "x",
            "category": "errands",
            "project": null,
            "date": null,
            "done": true,
            "createdAt": "2026-02-16T08:30:00Z"
        });
        let task: Task = serde_json::from_value(raw).expect("decode task");
        assert_eq!(task.category, Category::Work);
        assert_eq!(task.project, "");
        assert_eq!(task.date, None);
        assert_eq!(task.display_title(), "x");
    }

    #[test]
    fn draft_normalization_applies_defaults() {
        assert!(TaskDraft::new("   \t ").normalize().is_none());

        let normalized = TaskDraft::new("  write report ")
            .with_project(" Q1 ")
            .normalize()
            .expect("non-empty draft");
        assert_eq!(normalized.text, "write report");
        assert_eq!(normalized.category, Category::Work);
        assert_eq!(normalized.project, "Q1");
        assert_eq!(normalized.date, None);
    }

    #[test]
    fn patch_serializes_only_present_fields() {
        let patch = TaskPatch::done(true);
        assert_eq!(serde_json::to_value(&patch).expect("encode"), json!({"done": true}));

        let clear_date = TaskPatch {
            date: Some(None),
            ..TaskPatch::default()
        };
        assert_eq!(
            serde_json::to_value(&clear_date).expect("encode"),
            json!({"date": ""})
        );
    }
}
