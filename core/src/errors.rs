//! Typed error taxonomy for the control plane.
//!
//! Each component surfaces its own error enum rather than a single catch-all,
//! mirroring the recovery policy in the design: transient transport errors are
//! retried close to where they occur, capacity errors trigger fallback in the
//! balancer, and invariant/validation/permission errors are surfaced to the
//! caller untouched.

use thiserror::Error;

/// Errors from the per-cluster wire protocol (C1).
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("capacity exceeded on cluster {0}")]
    CapacityExceeded(String),

    #[error("invalid agent spec: {0}")]
    InvalidSpec(String),

    #[error("agent already exists: {0}")]
    AgentAlreadyExists(String),

    #[error("cluster error [{code}]: {message}")]
    ClusterErrorCode { code: String, message: String },
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the local runtime collaborator (C3), folded into the
/// same recovery class as `ClusterError::CapacityExceeded` where applicable.
#[derive(Error, Debug, Clone)]
pub enum LocalRuntimeError {
    #[error("local resource exhausted: {0}")]
    LocalResourceExhausted(String),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("local runtime io error: {0}")]
    Io(String),
}

/// Errors from the load balancer (C4).
#[derive(Error, Debug, Clone)]
pub enum BalancerError {
    #[error("no cluster or local capacity available")]
    NoCapacity,

    #[error("migration already in progress for agent {0}")]
    MigrationInProgress(String),

    #[error("too many concurrent migrations (limit {0})")]
    MigrationLimitReached(usize),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Local(#[from] LocalRuntimeError),
}

pub type BalancerResult<T> = Result<T, BalancerError>;

/// Errors from the transparent proxy (C5).
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Local(#[from] LocalRuntimeError),
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Errors from the role registry (C6).
#[derive(Error, Debug, Clone)]
pub enum RoleError {
    #[error("cannot override or remove built-in role: {0}")]
    CannotOverrideBuiltinRole(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("role not found: {0}")]
    RoleNotFound(String),

    #[error("role {0} has live assignments and cannot be unregistered")]
    RoleHasLiveAssignments(String),

    #[error("agent {0} already has an active assignment")]
    AgentAlreadyAssigned(String),

    #[error("assignment not found for agent {0}")]
    AssignmentNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

pub type RoleResult<T> = Result<T, RoleError>;

/// Errors from the mailbox / message bus (C7).
#[derive(Error, Debug, Clone)]
pub enum MailboxError {
    #[error("recipient unknown: {0}")]
    RecipientUnknown(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("message already expired")]
    Expired,
}

pub type MailboxResult<T> = Result<T, MailboxError>;

/// Errors from the task graph engine (C8).
#[derive(Error, Debug, Clone)]
pub enum TaskGraphError {
    #[error("cycle detected: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("dependency {0} does not resolve inside the subtask set")]
    UnresolvedDependency(String),

    #[error("decomposition strategy failed: {0}")]
    StrategyFailed(String),
}

pub type TaskGraphResult<T> = Result<T, TaskGraphError>;

/// Errors from the task store and hydrator/sync bridge (C9).
#[derive(Error, Debug, Clone)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task list not found: {0}")]
    TaskListNotFound(String),

    #[error("adding this dependency would create a cycle")]
    CircularDependency,

    #[error("could not acquire lock for {0} within {1:?}")]
    LockTimeout(String, std::time::Duration),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("parse error in spec file: {0}")]
    ParseError(String),
}

pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

impl From<std::io::Error> for TaskStoreError {
    fn from(e: std::io::Error) -> Self {
        TaskStoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for TaskStoreError {
    fn from(e: serde_json::Error) -> Self {
        TaskStoreError::Serialization(e.to_string())
    }
}
