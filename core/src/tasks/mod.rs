//! `TaskStore` + Hydrator/Sync (C9): durable Task/TaskList persistence and
//! the round-trip bridge to human-authored Markdown spec files.

pub mod hydrate;
pub mod lease;
pub mod store;
pub mod sync;
pub mod types;

pub use lease::{Lease, LeaseManager};
pub use store::TaskStore;
pub use types::{Task, TaskList, TaskListStatus, TaskPriority, TaskStatus};
