//! Sync-back (tasks → document): regenerates or in-place updates the
//! Markdown document a TaskList was hydrated from.

use super::types::{Task, TaskStatus};
use std::collections::BTreeMap;

fn checkbox(status: TaskStatus) -> &'static str {
    if status == TaskStatus::Done { "x" } else { " " }
}

fn priority_tag(task: &Task) -> String {
    match task.priority {
        super::types::TaskPriority::Critical => " [critical]".to_string(),
        super::types::TaskPriority::High => " [high]".to_string(),
        _ => String::new(),
    }
}

fn blocked_suffix(task: &Task) -> String {
    if task.depends_on.is_empty() {
        return String::new();
    }
    let mut ids: Vec<&String> = task.depends_on.iter().collect();
    ids.sort();
    let joined = ids.into_iter().cloned().collect::<Vec<_>>().join(", ");
    format!(" ⚠ blocked by {joined}")
}

/// Full regeneration: H1 title, a generated-at line, a totals line, then H2
/// sections grouping tasks by their `epic` (falling back to "Tasks" when a
/// task carries no epic), each line in `- [x] ID: Title` format.
pub fn sync_full(list_name: &str, tasks: &[(Option<String>, Task)]) -> String {
    let mut by_epic: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
    for (epic, task) in tasks {
        by_epic.entry(epic.clone().unwrap_or_else(|| "Tasks".to_string())).or_default().push(task);
    }

    let total = tasks.len();
    let done = tasks.iter().filter(|(_, t)| t.status == TaskStatus::Done).count();

    let mut out = String::new();
    out.push_str(&format!("# {list_name}\n\n"));
    out.push_str(&format!("_generated at {}_\n\n", chrono::Utc::now().to_rfc3339()));
    out.push_str(&format!("{done}/{total} complete\n\n"));

    for (epic, tasks) in by_epic {
        out.push_str(&format!("## {epic}\n"));
        for task in tasks {
            out.push_str(&format!(
                "- [{}] {}: {}{}{}\n",
                checkbox(task.status),
                task.id,
                task.title,
                priority_tag(task),
                blocked_suffix(task)
            ));
        }
        out.push('\n');
    }
    out
}

/// In-place update: touches only the checkbox character of lines whose task
/// id matches one in `tasks`, leaving every other line (prose, spacing,
/// unrelated sections) untouched.
pub fn sync_in_place(original: &str, tasks: &[Task]) -> String {
    let by_id: std::collections::HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut out = String::with_capacity(original.len());

    for line in original.lines() {
        let mut replaced = None;
        if let Some(rest) = line.strip_prefix("- [") {
            if let Some(close) = rest.find(']') {
                let after_checkbox = &rest[close + 1..];
                if let Some(colon) = after_checkbox.find(':') {
                    let id = after_checkbox[..colon].trim();
                    if let Some(task) = by_id.get(id) {
                        let prefix_len = line.len() - rest.len();
                        let mut new_line = String::new();
                        new_line.push_str(&line[..prefix_len]);
                        new_line.push_str(checkbox(task.status));
                        new_line.push_str(&rest[close..]);
                        replaced = Some(new_line);
                    }
                }
            }
        }
        out.push_str(&replaced.unwrap_or_else(|| line.to_string()));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::hydrate::{hydrate, HydrationOptions};

    #[test]
    fn full_sync_produces_checkbox_lines_grouped_by_epic() {
        let mut task = Task::new("AUTH-1", "Add login form");
        task.status = TaskStatus::Done;
        let rendered = sync_full("My List", &[(Some("Auth".to_string()), task)]);
        assert!(rendered.contains("## Auth"));
        assert!(rendered.contains("- [x] AUTH-1: Add login form"));
        assert!(rendered.contains("1/1 complete"));
    }

    #[test]
    fn hydrate_then_sync_round_trips_checkbox_state() {
        let markdown = "## Auth\n- [ ] AUTH-1: Add login form\n- [ ] AUTH-2: Add logout button\n";
        let hydrated = hydrate(markdown, &HydrationOptions { skip_completed: false });
        let tasks: Vec<(Option<String>, Task)> = hydrated.into_iter().map(|h| (h.epic, h.task)).collect();
        let rendered = sync_full("Spec", &tasks);
        let reparsed = hydrate(&rendered, &HydrationOptions { skip_completed: false });
        assert_eq!(reparsed.len(), 2);
        assert!(reparsed.iter().all(|t| t.task.status == TaskStatus::Open));
    }

    #[test]
    fn in_place_sync_touches_only_checkbox() {
        let original = "## Auth\nSome prose here.\n- [ ] AUTH-1: Add login form\nMore prose.\n";
        let mut updated = Task::new("AUTH-1", "Add login form");
        updated.status = TaskStatus::Done;
        let rendered = sync_in_place(original, &[updated]);
        assert!(rendered.contains("Some prose here.\n"));
        assert!(rendered.contains("- [x] AUTH-1: Add login form\n"));
        assert!(rendered.contains("More prose.\n"));
    }
}
