use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::debug;

use crate::task::{CategoryFilter, Task};

/// Local copy of the store's tasks, most recently created first.
///
/// Only ever changed from server responses; callers never edit a task in
/// place.
#[derive(Debug, Clone, Default)]
pub struct TaskCollection {
    tasks: Vec<Task>,
}

impl TaskCollection {
    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        debug!(before = self.tasks.len(), after = tasks.len(), "replacing task collection");
        self.tasks = tasks;
    }

    pub fn insert_front(&mut self, task: Task) {
        self.tasks.retain(|existing| existing.id != task.id);
        self.tasks.insert(0, task);
    }

    /// Swaps in the server's record for the task with the same id. Returns
    /// false, leaving the collection untouched, when no such task is held.
    pub fn replace(&mut self, task: Task) -> bool {
        match self.tasks.iter_mut().find(|existing| existing.id == task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        let idx = self.tasks.iter().position(|task| task.id == id)?;
        Some(self.tasks.remove(idx))
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    pub fn ids_in_project(&self, name: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| task.in_project(name))
            .map(|task| task.id.clone())
            .collect()
    }
}

/// Display selections that outlive a single render.
#[derive(Debug, Clone, Default)]
pub struct ViewSelection {
    pub category: CategoryFilter,
    pub today: Option<NaiveDate>,
    expanded: BTreeSet<String>,
}

impl ViewSelection {
    pub fn is_expanded(&self, project: &str) -> bool {
        self.expanded.contains(project)
    }

    /// Flips a project group open or closed; returns the new state.
    pub fn toggle_expanded(&mut self, project: &str) -> bool {
        if self.expanded.remove(project) {
            false
        } else {
            self.expanded.insert(project.to_string());
            true
        }
    }

    pub fn forget(&mut self, project: &str) {
        self.expanded.remove(project);
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub tasks: TaskCollection,
    pub explicit_projects: BTreeSet<String>,
    pub selection: ViewSelection,
}

impl AppState {
    /// Adds a user-declared project; false for blank or already-known names.
    pub fn add_project(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.explicit_projects.insert(name.to_string())
    }

    pub fn remove_project(&mut self, name: &str) -> bool {
        self.selection.forget(name.trim());
        self.explicit_projects.remove(name.trim())
    }
}
