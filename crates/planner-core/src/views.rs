use std::cmp::Ordering;

use chrono::{
  DateTime,
  NaiveDate,
  Utc
};

use crate::datetime::today;
use crate::projects::resolve_project_names;
use crate::state::AppState;
use crate::task::{
  CategoryFilter,
  Task
};

/// Unassigned, open tasks in store
/// order, optionally narrowed to one
/// category.
pub fn stream_view(
  tasks: &[Task],
  filter: CategoryFilter
) -> impl Iterator<Item = &Task> + Clone
{
  tasks.iter().filter(move |task| {
    task.is_unassigned()
      && !task.done
      && filter.matches(task.category)
  })
}

/// Open tasks scheduled on `day`.
pub fn today_view(
  tasks: &[Task],
  day: NaiveDate
) -> impl Iterator<Item = &Task> + Clone
{
  tasks.iter().filter(move |task| {
    !task.done && task.date == Some(day)
  })
}

pub fn done_view(
  tasks: &[Task]
) -> impl Iterator<Item = &Task> + Clone
{
  tasks.iter().filter(|task| task.done)
}

/// The day the today view shows: the
/// chosen one, else the current date.
pub fn effective_today(
  state: &AppState,
  now: DateTime<Utc>
) -> NaiveDate {
  state
    .selection
    .today
    .unwrap_or_else(|| today(now))
}

#[derive(Debug, Clone)]
pub struct ProjectGroup<'a> {
  pub name:      String,
  pub tasks:     Vec<&'a Task>,
  pub completed: usize,
  pub total:     usize,
  pub expanded:  bool
}

/// One group per visible project name,
/// each with open work first and newer
/// tasks ahead of older ones.
pub fn project_groups(
  state: &AppState
) -> Vec<ProjectGroup<'_>> {
  let tasks = state.tasks.as_slice();
  resolve_project_names(
    &state.explicit_projects,
    tasks
  )
  .into_iter()
  .map(|name| {
    let mut members: Vec<&Task> = tasks
      .iter()
      .filter(|task| {
        task.in_project(&name)
      })
      .collect();
    members.sort_by(|a, b| {
      project_task_order(a, b)
    });
    let completed = members
      .iter()
      .filter(|task| task.done)
      .count();
    ProjectGroup {
      total: members.len(),
      completed,
      expanded: state
        .selection
        .is_expanded(&name),
      tasks: members,
      name
    }
  })
  .collect()
}

fn project_task_order(
  a: &Task,
  b: &Task
) -> Ordering {
  a.done
    .cmp(&b.done)
    .then_with(|| {
      b.created_at.cmp(&a.created_at)
    })
}

/// All four projections of one state
/// snapshot.
#[derive(Debug, Clone)]
pub struct Projections<'a> {
  pub stream:     Vec<&'a Task>,
  pub today_date: NaiveDate,
  pub today:      Vec<&'a Task>,
  pub projects:   Vec<ProjectGroup<'a>>,
  pub done:       Vec<&'a Task>
}

impl<'a> Projections<'a> {
  pub fn compute(
    state: &'a AppState,
    now: DateTime<Utc>
  ) -> Self {
    let tasks = state.tasks.as_slice();
    let today_date =
      effective_today(state, now);
    Self {
      stream: stream_view(
        tasks,
        state.selection.category
      )
      .collect(),
      today_date,
      today: today_view(
        tasks, today_date
      )
      .collect(),
      projects: project_groups(state),
      done: done_view(tasks).collect()
    }
  }

  pub fn counts(&self) -> ViewCounts {
    ViewCounts {
      stream:   self.stream.len(),
      today:    self.today.len(),
      projects: self.projects.len(),
      done:     self.done.len()
    }
  }
}

/// Owned summary published to
/// subscribers after each change.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub struct ViewCounts {
  pub stream:   usize,
  pub today:    usize,
  pub projects: usize,
  pub done:     usize
}

#[cfg(test)]
mod tests {
  use chrono::{
    Duration,
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::*;
  use crate::task::Category;

  fn base_time() -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(
        2026, 2, 16, 9, 0, 0
      )
      .single()
      .expect("valid time")
  }

  fn task(
    id: &str,
    category: Category,
    project: &str,
    done: bool
  ) -> Task {
    Task {
      id: id.to_string(),
      text: format!("task {id}"),
      title: None,
      category,
      project: project.to_string(),
      date: None,
      done,
      created_at: base_time()
    }
  }

  fn ids<'a>(
    tasks: impl Iterator<Item = &'a Task>
  ) -> Vec<&'a str> {
    tasks
      .map(|task| task.id.as_str())
      .collect()
  }

  #[test]
  fn stream_membership_follows_project_done_and_category()
  {
    let tasks = vec![
      task("1", Category::Work, "", false),
      task(
        "2",
        Category::Personal,
        "",
        false
      ),
      task("3", Category::Work, "Q1", false),
      task("4", Category::Work, "", true),
    ];

    assert_eq!(
      ids(stream_view(
        &tasks,
        CategoryFilter::All
      )),
      vec!["1", "2"]
    );
    assert_eq!(
      ids(stream_view(
        &tasks,
        CategoryFilter::Only(
          Category::Personal
        )
      )),
      vec!["2"]
    );
  }

  #[test]
  fn stream_category_mismatch_is_empty()
  {
    let tasks = vec![task(
      "1",
      Category::Work,
      "",
      false
    )];
    let view = stream_view(
      &tasks,
      CategoryFilter::Only(
        Category::Personal
      )
    );
    assert_eq!(view.count(), 0);
  }

  #[test]
  fn today_view_matches_date_and_skips_done()
  {
    let day = NaiveDate::from_ymd_opt(
      2026, 2, 16
    )
    .expect("valid date");
    let mut due = task(
      "1",
      Category::Work,
      "",
      false
    );
    due.date = Some(day);
    let mut due_done = task(
      "2",
      Category::Work,
      "Q1",
      true
    );
    due_done.date = Some(day);
    let mut later = task(
      "3",
      Category::Work,
      "Q1",
      false
    );
    later.date = day.succ_opt();
    let undated = task(
      "4",
      Category::Work,
      "",
      false
    );
    let tasks =
      vec![due, due_done, later, undated];

    assert_eq!(
      ids(today_view(&tasks, day)),
      vec!["1"]
    );
  }

  #[test]
  fn today_uses_chosen_date_until_cleared()
  {
    let mut state = AppState::default();
    let chosen = NaiveDate::from_ymd_opt(
      2030, 1, 1
    )
    .expect("valid date");
    state.selection.today = Some(chosen);
    assert_eq!(
      effective_today(&state, base_time()),
      chosen
    );

    state.selection.today = None;
    assert_eq!(
      effective_today(&state, base_time()),
      today(base_time())
    );
  }

  #[test]
  fn project_groups_sink_done_and_order_by_recency()
  {
    let mut state = AppState::default();
    let mut old_done = task(
      "old",
      Category::Work,
      "Q1",
      true
    );
    old_done.created_at = base_time();
    let mut new_open = task(
      "new",
      Category::Work,
      "Q1",
      false
    );
    new_open.created_at =
      base_time() + Duration::hours(1);
    let mut older_open = task(
      "older",
      Category::Work,
      "Q1",
      false
    );
    older_open.created_at =
      base_time() - Duration::hours(1);
    state.tasks.replace_all(vec![
      old_done, new_open, older_open,
    ]);
    state.add_project("Empty");

    let groups = project_groups(&state);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].name, "Empty");
    assert_eq!(groups[0].total, 0);

    let q1 = &groups[1];
    assert_eq!(
      ids(q1.tasks.iter().copied()),
      vec!["new", "older", "old"]
    );
    assert_eq!(q1.completed, 1);
    assert_eq!(q1.total, 3);
    assert!(!q1.expanded);
  }

  #[test]
  fn done_view_keeps_collection_order() {
    let tasks = vec![
      task("1", Category::Work, "A", true),
      task("2", Category::Work, "", false),
      task(
        "3",
        Category::Personal,
        "",
        true
      ),
    ];
    assert_eq!(
      ids(done_view(&tasks)),
      vec!["1", "3"]
    );
  }

  #[test]
  fn projections_are_restartable() {
    let mut state = AppState::default();
    state.tasks.replace_all(vec![
      task("1", Category::Work, "", false),
      task("2", Category::Work, "B", true),
    ]);

    let first =
      Projections::compute(&state, base_time())
        .counts();
    let second =
      Projections::compute(&state, base_time())
        .counts();
    assert_eq!(first, second);
    assert_eq!(
      first,
      ViewCounts {
        stream:   1,
        today:    0,
        projects: 1,
        done:     1
      }
    );
    assert_eq!(state.tasks.len(), 2);
  }
}
