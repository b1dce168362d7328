//! Task / TaskList data model.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Review,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskListStatus {
    Active,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(default)]
    pub blocks: HashSet<String>,
    pub assignee: Option<String>,
    pub priority: TaskPriority,
    pub task_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub commits: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub subscribed_sessions: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Open,
            depends_on: HashSet::new(),
            blocks: HashSet::new(),
            assignee: None,
            priority: TaskPriority::Medium,
            task_type: "task".to_string(),
            tags: Vec::new(),
            branch: None,
            commits: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            subscribed_sessions: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub id: String,
    pub name: String,
    pub task_ids: Vec<String>,
    pub status: TaskListStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl TaskList {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self { id: id.into(), name: name.into(), task_ids: Vec::new(), status: TaskListStatus::Active, created_at: now, updated_at: now }
    }
}
