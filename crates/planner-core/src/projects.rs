use std::cmp::Ordering;
use std::collections::BTreeSet;

use feruca::Collator;

use crate::task::Task;

/// Visible project names: user-declared ones plus every non-empty task
/// project, trimmed, deduplicated and ordered by Unicode collation.
pub fn resolve_project_names<'a, I>(explicit: I, tasks: &[Task]) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let unique: BTreeSet<&str> = explicit
        .into_iter()
        .map(|name| name.trim())
        .chain(tasks.iter().map(|task| task.project.trim()))
        .filter(|name| !name.is_empty())
        .collect();

    let mut names: Vec<String> = unique.into_iter().map(str::to_string).collect();
    let mut collator = Collator::default();
    names.sort_by(|a, b| collate(&mut collator, a, b));
    names
}

fn collate(collator: &mut Collator, a: &str, b: &str) -> Ordering {
    collator.collate(a, b).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::task::Category;

    fn task_in(project: &str) -> Task {
        Task {
            id: format!("id-{project}"),
            text: "t".to_string(),
            title: None,
            category: Category::Work,
            project: project.to_string(),
            date: None,
            done: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unions_explicit_and_task_projects() {
        let explicit = vec!["Zeta".to_string()];
        let tasks = vec![task_in("Alpha")];
        assert_eq!(resolve_project_names(&explicit, &tasks), vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn trims_dedupes_and_skips_blank() {
        let explicit = vec![" Home ".to_string(), "".to_string(), "   ".to_string()];
        let tasks = vec![task_in("Home"), task_in(""), task_in("Home ")];
        assert_eq!(resolve_project_names(&explicit, &tasks), vec!["Home"]);
    }

    #[test]
    fn cyrillic_sorts_by_collation() {
        let explicit = vec!["Бета".to_string(), "Август".to_string(), "ёлка".to_string()];
        let names = resolve_project_names(&explicit, &[]);
        assert_eq!(names, vec!["Август", "Бета", "ёлка"]);
    }

    #[test]
    fn case_does_not_split_alphabet() {
        let explicit = vec!["beta".to_string(), "Alpha".to_string(), "Charlie".to_string()];
        assert_eq!(
            resolve_project_names(&explicit, &[]),
            vec!["Alpha", "beta", "Charlie"]
        );
    }
}
