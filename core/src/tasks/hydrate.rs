//! Hydration (document → tasks): parses the Markdown task-list document
//! format into Tasks.

use super::types::{Task, TaskPriority, TaskStatus};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static TASK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^- \[( |x|X)\]\s*([A-Za-z0-9_.-]+):\s*(.+)$").unwrap());
static BLOCKED_BY: Lazy<Regex> = Lazy::new(|| Regex::new(r"⚠\s*blocked by\s*(.+)$").unwrap());
static DEPENDS_ON: Lazy<Regex> = Lazy::new(|| Regex::new(r"⛔\s*depends on\s*(.+)$").unwrap());

#[derive(Debug, Clone)]
pub struct HydrationOptions {
    pub skip_completed: bool,
}

impl Default for HydrationOptions {
    fn default() -> Self {
        Self { skip_completed: true }
    }
}

#[derive(Debug, Clone)]
pub struct HydratedTask {
    pub spec_id: String,
    pub epic: Option<String>,
    pub task: Task,
    pub blocked_by_spec_ids: Vec<String>,
}

/// Parse the Markdown body into tasks. H2 sections (`## Name`) become
/// implicit epics; checkbox lines become subtasks; the `⚠ blocked by` /
/// `⛔ depends on` suffix records a dependency by spec id, resolved against
/// an id map built from the first parsing pass (spec ids may not match the
/// store's own task ids once hydrated repeatedly).
pub fn hydrate(markdown: &str, options: &HydrationOptions) -> Vec<HydratedTask> {
    let mut current_epic: Option<String> = None;
    let mut results = Vec::new();

    for line in markdown.lines() {
        let trimmed = line.trim_end();
        if let Some(name) = trimmed.strip_prefix("## ") {
            current_epic = Some(name.trim().to_string());
            continue;
        }
        let Some(caps) = TASK_LINE.captures(trimmed) else { continue };
        let checked = matches!(&caps[1], "x" | "X");
        if checked && options.skip_completed {
            continue;
        }
        let spec_id = caps[2].to_string();
        let mut subject = caps[3].trim().to_string();

        let mut blocked_by = Vec::new();
        if let Some(m) = BLOCKED_BY.captures(&subject) {
            blocked_by.extend(split_ids(&m[1]));
            subject = BLOCKED_BY.replace(&subject, "").trim().to_string();
        }
        if let Some(m) = DEPENDS_ON.captures(&subject) {
            blocked_by.extend(split_ids(&m[1]));
            subject = DEPENDS_ON.replace(&subject, "").trim().to_string();
        }

        let mut task = Task::new(spec_id.clone(), subject.clone());
        task.status = if checked { TaskStatus::Done } else { TaskStatus::Open };
        task.priority = infer_priority(&subject);
        task.task_type = infer_type(&subject);
        if checked {
            task.completed_at = Some(chrono::Utc::now());
        }

        results.push(HydratedTask { spec_id, epic: current_epic.clone(), task, blocked_by_spec_ids: blocked_by });
    }

    wire_dependencies(&mut results);
    results
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().trim_end_matches('.').to_string()).filter(|s| !s.is_empty()).collect()
}

fn infer_priority(subject: &str) -> TaskPriority {
    let lower = subject.to_lowercase();
    if lower.contains("critical") {
        TaskPriority::Critical
    } else if lower.contains("bug") {
        TaskPriority::High
    } else {
        TaskPriority::Medium
    }
}

fn infer_type(subject: &str) -> String {
    let lower = subject.to_lowercase();
    if lower.contains("bug") {
        "bug".to_string()
    } else if lower.contains("research") {
        "research".to_string()
    } else {
        "task".to_string()
    }
}

/// Second pass: resolve each task's `blocked_by_spec_ids` against the set of
/// spec ids seen in this document, marking it `blocked` if any dependency is
/// not yet done, and wiring the dual `dependsOn`/`blocks` sets.
fn wire_dependencies(results: &mut [HydratedTask]) {
    let status_by_spec_id: HashMap<String, TaskStatus> =
        results.iter().map(|r| (r.spec_id.clone(), r.task.status)).collect();

    for r in results.iter_mut() {
        for dep in &r.blocked_by_spec_ids {
            r.task.depends_on.insert(dep.clone());
        }
        let any_unresolved = r
            .blocked_by_spec_ids
            .iter()
            .any(|dep| status_by_spec_id.get(dep).map(|s| *s != TaskStatus::Done).unwrap_or(true));
        if any_unresolved && !r.blocked_by_spec_ids.is_empty() && r.task.status != TaskStatus::Done {
            r.task.status = TaskStatus::Blocked;
        }
    }

    let blocks_map: HashMap<String, Vec<String>> = {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for r in results.iter() {
            for dep in &r.blocked_by_spec_ids {
                map.entry(dep.clone()).or_default().push(r.spec_id.clone());
            }
        }
        map
    };
    for r in results.iter_mut() {
        if let Some(dependents) = blocks_map.get(&r.spec_id) {
            r.task.blocks.extend(dependents.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_epic_and_checkbox_lines() {
        let markdown = "## Auth\n- [ ] AUTH-1: Add login form\n- [x] AUTH-2: Add logout button\n";
        let tasks = hydrate(markdown, &HydrationOptions { skip_completed: false });
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].epic.as_deref(), Some("Auth"));
        assert_eq!(tasks[1].task.status, TaskStatus::Done);
    }

    #[test]
    fn skip_completed_defaults_to_true() {
        let markdown = "## Auth\n- [x] AUTH-1: Done already\n- [ ] AUTH-2: Still open\n";
        let tasks = hydrate(markdown, &HydrationOptions::default());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].spec_id, "AUTH-2");
    }

    #[test]
    fn blocked_by_suffix_marks_dependency_and_blocked_status() {
        let markdown = "## Auth\n- [ ] AUTH-1: Implement backend\n- [ ] AUTH-2: Wire frontend ⚠ blocked by AUTH-1\n";
        let tasks = hydrate(markdown, &HydrationOptions::default());
        let frontend = tasks.iter().find(|t| t.spec_id == "AUTH-2").unwrap();
        assert!(frontend.task.depends_on.contains("AUTH-1"));
        assert_eq!(frontend.task.status, TaskStatus::Blocked);
    }

    #[test]
    fn bug_keyword_raises_priority_and_type() {
        let markdown = "## Issues\n- [ ] BUG-1: Fix bug in login\n";
        let tasks = hydrate(markdown, &HydrationOptions::default());
        assert_eq!(tasks[0].task.priority, TaskPriority::High);
        assert_eq!(tasks[0].task.task_type, "bug");
    }
}
