//! `RoleRegistry` (C6): role catalog, assignment tracking, permission
//! checks, and team composition.
//!
//! Uses permission-matrix style validation (id pattern, closed enum checks
//! as warnings vs. hard errors) with a single-writer guard around the role
//! and assignment maps so reads stay lock-free snapshots.

use crate::errors::{RoleError, RoleResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadAll,
    ReadAssigned,
    WriteAll,
    WriteAssigned,
    DelegateTasks,
    ManageAgents,
    Comment,
    Approve,
    Reject,
    ReadMetrics,
    ReadLogs,
    SendAlerts,
    GitOperations,
}

impl Permission {
    /// Tokens outside this closed set are accepted as warnings, not errors,
    /// so role validation stores unknown tokens verbatim as strings rather
    /// than refusing the role.
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "read_all" => Permission::ReadAll,
            "read_assigned" => Permission::ReadAssigned,
            "write_all" => Permission::WriteAll,
            "write_assigned" => Permission::WriteAssigned,
            "delegate_tasks" => Permission::DelegateTasks,
            "manage_agents" => Permission::ManageAgents,
            "comment" => Permission::Comment,
            "approve" => Permission::Approve,
            "reject" => Permission::Reject,
            "read_metrics" => Permission::ReadMetrics,
            "read_logs" => Permission::ReadLogs,
            "send_alerts" => Permission::SendAlerts,
            "git_operations" => Permission::GitOperations,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub system_prompt: String,
    pub capabilities: HashSet<String>,
    pub permissions: HashSet<String>,
    pub max_iterations: u32,
    pub auto_submit: bool,
    pub require_approval: bool,
    pub can_message: HashSet<String>,
    pub broadcast_channels: HashSet<String>,
    pub preferred_provider: Option<String>,
    pub preferred_model: Option<String>,
    pub cost_budget: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub max_concurrent_tasks: Option<u32>,
    pub priority: Option<i32>,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub builtin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub agent_id: String,
    pub role_id: String,
    pub team_id: Option<String>,
    pub worktree_id: Option<String>,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
    pub assigned_by: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

static ROLE_ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

pub fn validate_role(role: &Role) -> RoleResult<()> {
    if role.id.is_empty() || !ROLE_ID_PATTERN.is_match(&role.id) {
        return Err(RoleError::InvalidRole(format!("id '{}' must match [a-z0-9-]+", role.id)));
    }
    if role.system_prompt.is_empty() {
        return Err(RoleError::InvalidRole("system_prompt must be non-empty".to_string()));
    }
    if role.max_iterations < 1 {
        return Err(RoleError::InvalidRole("max_iterations must be >= 1".to_string()));
    }
    if let Some(budget) = role.cost_budget {
        if budget < 0.0 {
            return Err(RoleError::InvalidRole("cost_budget must be >= 0".to_string()));
        }
    }
    for token in &role.permissions {
        if Permission::parse(token).is_none() {
            warn!(role_id = %role.id, token, "unknown permission token (warning only)");
        }
    }
    Ok(())
}

fn built_in_roles() -> Vec<Role> {
    vec![
        Role {
            id: "coordinator".into(),
            display_name: "Coordinator".into(),
            description: "Plans and delegates work across the team.".into(),
            system_prompt: "You are the coordinator. Decompose work and delegate to the team.".into(),
            capabilities: ["planning", "delegation"].into_iter().map(String::from).collect(),
            permissions: ["read_all", "write_all", "delegate_tasks", "manage_agents", "approve", "reject"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_iterations: 50,
            can_message: ["worker", "reviewer", "refinery", "monitor"].into_iter().map(String::from).collect(),
            builtin: true,
            ..Default::default()
        },
        Role {
            id: "worker".into(),
            display_name: "Worker".into(),
            description: "Implements assigned subtasks.".into(),
            system_prompt: "You are a worker. Implement the subtask you are assigned.".into(),
            permissions: ["read_assigned", "write_assigned", "comment"].into_iter().map(String::from).collect(),
            max_iterations: 30,
            can_message: ["coordinator", "reviewer"].into_iter().map(String::from).collect(),
            builtin: true,
            ..Default::default()
        },
        Role {
            id: "reviewer".into(),
            display_name: "Reviewer".into(),
            description: "Reviews worker output before it merges.".into(),
            system_prompt: "You are a reviewer. Approve or reject worker output.".into(),
            permissions: ["read_all", "comment", "approve", "reject"].into_iter().map(String::from).collect(),
            max_iterations: 20,
            can_message: ["coordinator", "worker"].into_iter().map(String::from).collect(),
            builtin: true,
            ..Default::default()
        },
        Role {
            id: "refinery".into(),
            display_name: "Refinery".into(),
            description: "Integrates and reconciles parallel worker output.".into(),
            system_prompt: "You are the refinery. Integrate completed work and resolve conflicts.".into(),
            permissions: ["read_all", "write_all", "git_operations"].into_iter().map(String::from).collect(),
            max_iterations: 20,
            can_message: ["coordinator", "worker"].into_iter().map(String::from).collect(),
            builtin: true,
            ..Default::default()
        },
        Role {
            id: "monitor".into(),
            display_name: "Monitor".into(),
            description: "Observes team health and raises alerts.".into(),
            system_prompt: "You are the monitor. Watch for stalled or failing agents and alert the coordinator.".into(),
            permissions: ["read_all", "read_metrics", "read_logs", "send_alerts"].into_iter().map(String::from).collect(),
            max_iterations: 100,
            can_message: ["coordinator"].into_iter().map(String::from).collect(),
            builtin: true,
            ..Default::default()
        },
    ]
}

pub struct RoleRegistry {
    roles: RwLock<HashMap<String, Role>>,
    assignments: RwLock<HashMap<String, RoleAssignment>>,
    events: crate::events::EventBus,
    audit: RwLock<Vec<PermissionDenial>>,
}

#[derive(Debug, Clone)]
pub struct PermissionDenial {
    pub agent_id: String,
    pub permission: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl RoleRegistry {
    pub fn new(events: crate::events::EventBus) -> Arc<Self> {
        let mut roles = HashMap::new();
        for role in built_in_roles() {
            roles.insert(role.id.clone(), role);
        }
        Arc::new(Self {
            roles: RwLock::new(roles),
            assignments: RwLock::new(HashMap::new()),
            events,
            audit: RwLock::new(Vec::new()),
        })
    }

    #[instrument(skip(self, role), fields(role_id = %role.id))]
    pub fn register_role(&self, role: Role) -> RoleResult<()> {
        validate_role(&role)?;
        let mut roles = self.roles.write();
        if let Some(existing) = roles.get(&role.id) {
            if existing.builtin {
                return Err(RoleError::CannotOverrideBuiltinRole(role.id));
            }
        }
        for target in &role.can_message {
            if !roles.contains_key(target) {
                warn!(role_id = %role.id, target, "can_message target role does not exist (warning only)");
            }
        }
        let id = role.id.clone();
        roles.insert(id.clone(), role);
        drop(roles);
        self.events
            .publish(crate::events::EventEnvelope::new(crate::events::EventKind::RoleRegistered).with_id("roleId", id));
        Ok(())
    }

    pub fn unregister_role(&self, role_id: &str) -> RoleResult<()> {
        let roles = self.roles.read();
        let role = roles.get(role_id).ok_or_else(|| RoleError::RoleNotFound(role_id.to_string()))?;
        if role.builtin {
            return Err(RoleError::CannotOverrideBuiltinRole(role_id.to_string()));
        }
        drop(roles);

        let has_live = self.assignments.read().values().any(|a| a.role_id == role_id);
        if has_live {
            return Err(RoleError::RoleHasLiveAssignments(role_id.to_string()));
        }

        self.roles.write().remove(role_id);
        self.events
            .publish(crate::events::EventEnvelope::new(crate::events::EventKind::RoleUnregistered).with_id("roleId", role_id));
        Ok(())
    }

    pub fn get_role(&self, role_id: &str) -> Option<Role> {
        self.roles.read().get(role_id).cloned()
    }

    pub fn list_roles(&self) -> Vec<Role> {
        self.roles.read().values().cloned().collect()
    }

    #[instrument(skip(self))]
    pub fn assign(&self, assignment: RoleAssignment) -> RoleResult<()> {
        if !self.roles.read().contains_key(&assignment.role_id) {
            return Err(RoleError::RoleNotFound(assignment.role_id.clone()));
        }
        let mut assignments = self.assignments.write();
        if assignments.contains_key(&assignment.agent_id) {
            return Err(RoleError::AgentAlreadyAssigned(assignment.agent_id.clone()));
        }
        let agent_id = assignment.agent_id.clone();
        assignments.insert(agent_id.clone(), assignment);
        drop(assignments);
        self.events
            .publish(crate::events::EventEnvelope::new(crate::events::EventKind::AssignmentAssigned).with_id("agentId", agent_id));
        Ok(())
    }

    pub fn unassign(&self, agent_id: &str) -> RoleResult<()> {
        let removed = self.assignments.write().remove(agent_id).is_some();
        if !removed {
            return Err(RoleError::AssignmentNotFound(agent_id.to_string()));
        }
        self.events
            .publish(crate::events::EventEnvelope::new(crate::events::EventKind::AssignmentUnassigned).with_id("agentId", agent_id));
        Ok(())
    }

    pub fn assignment_of(&self, agent_id: &str) -> Option<RoleAssignment> {
        self.assignments.read().get(agent_id).cloned()
    }

    pub fn role_of(&self, agent_id: &str) -> Option<Role> {
        let assignment = self.assignment_of(agent_id)?;
        self.get_role(&assignment.role_id)
    }

    /// `read_all` implies `read_assigned`, `write_all` implies
    /// `write_assigned`; otherwise the permission token must match exactly.
    pub fn has_permission(&self, agent_id: &str, permission: Permission) -> bool {
        let Some(role) = self.role_of(agent_id) else {
            self.record_denial(agent_id, permission);
            return false;
        };
        let granted = role.permissions.iter().any(|token| {
            let Some(held) = Permission::parse(token) else { return false };
            held == permission
                || (held == Permission::ReadAll && permission == Permission::ReadAssigned)
                || (held == Permission::WriteAll && permission == Permission::WriteAssigned)
        });
        if !granted {
            self.record_denial(agent_id, permission);
        }
        granted
    }

    fn record_denial(&self, agent_id: &str, permission: Permission) {
        self.audit.write().push(PermissionDenial {
            agent_id: agent_id.to_string(),
            permission: format!("{permission:?}"),
            at: chrono::Utc::now(),
        });
        info!(agent_id, ?permission, "permission denied");
    }

    pub fn permission_denials(&self) -> Vec<PermissionDenial> {
        self.audit.read().clone()
    }

    pub fn can_message(&self, from_role: &str, to_role: &str) -> bool {
        self.roles
            .read()
            .get(from_role)
            .map(|r| r.can_message.contains(to_role))
            .unwrap_or(false)
    }
}

/// Inputs to `compose_team`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct TeamRequirements {
    pub task: String,
    pub complexity: Complexity,
    pub estimated_subtasks: u32,
    pub security_sensitive: bool,
    pub requires_review: bool,
    pub requires_monitoring: bool,
    pub requires_integration: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TeamProposal {
    pub coordinator_count: u32,
    pub worker_count: u32,
    pub reviewer_count: u32,
    pub monitor_count: u32,
    pub refinery_count: u32,
    pub estimated_budget: f64,
}

impl RoleRegistry {
    pub fn compose_team(&self, reqs: &TeamRequirements) -> TeamProposal {
        let worker_count = match reqs.complexity {
            Complexity::Low => reqs.estimated_subtasks.clamp(1, 2),
            Complexity::Medium => ceil_div(reqs.estimated_subtasks, 2).min(5),
            Complexity::High => ceil_div(reqs.estimated_subtasks, 2).min(10),
        };
        let reviewer_count = if reqs.security_sensitive {
            2
        } else if reqs.requires_review || reqs.complexity == Complexity::High {
            1
        } else {
            0
        };
        let monitor_count = if reqs.complexity == Complexity::High || reqs.requires_monitoring { 1 } else { 0 };
        let refinery_count = if reqs.requires_integration || worker_count > 3 { 1 } else { 0 };

        let mut budget = 0.0;
        if let Some(r) = self.get_role("coordinator") {
            budget += r.cost_budget.unwrap_or(0.0);
        }
        if let Some(r) = self.get_role("worker") {
            budget += r.cost_budget.unwrap_or(0.0) * worker_count as f64;
        }
        if let Some(r) = self.get_role("reviewer") {
            budget += r.cost_budget.unwrap_or(0.0) * reviewer_count as f64;
        }
        if let Some(r) = self.get_role("monitor") {
            budget += r.cost_budget.unwrap_or(0.0) * monitor_count as f64;
        }
        if let Some(r) = self.get_role("refinery") {
            budget += r.cost_budget.unwrap_or(0.0) * refinery_count as f64;
        }

        TeamProposal {
            coordinator_count: 1,
            worker_count,
            reviewer_count,
            monitor_count,
            refinery_count,
            estimated_budget: budget,
        }
    }
}

fn ceil_div(n: u32, d: u32) -> u32 {
    (n + d - 1) / d.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_roles_are_present() {
        let registry = RoleRegistry::new(crate::events::EventBus::default());
        for id in ["coordinator", "worker", "reviewer", "refinery", "monitor"] {
            assert!(registry.get_role(id).is_some(), "missing builtin role {id}");
        }
    }

    #[test]
    fn builtin_roles_cannot_be_overridden_or_removed() {
        let registry = RoleRegistry::new(crate::events::EventBus::default());
        let mut role = registry.get_role("worker").unwrap();
        role.description = "hijacked".into();
        assert!(matches!(registry.register_role(role), Err(RoleError::CannotOverrideBuiltinRole(_))));
        assert!(matches!(registry.unregister_role("worker"), Err(RoleError::CannotOverrideBuiltinRole(_))));
    }

    #[test]
    fn read_all_implies_read_assigned() {
        let registry = RoleRegistry::new(crate::events::EventBus::default());
        registry
            .assign(RoleAssignment {
                agent_id: "a1".into(),
                role_id: "coordinator".into(),
                team_id: None,
                worktree_id: None,
                assigned_at: chrono::Utc::now(),
                assigned_by: "test".into(),
                expires_at: None,
            })
            .unwrap();
        assert!(registry.has_permission("a1", Permission::ReadAll));
        assert!(registry.has_permission("a1", Permission::ReadAssigned));
    }

    #[test]
    fn compose_team_matches_spec_scenario() {
        let registry = RoleRegistry::new(crate::events::EventBus::default());
        let proposal = registry.compose_team(&TeamRequirements {
            task: "x".into(),
            complexity: Complexity::High,
            estimated_subtasks: 6,
            security_sensitive: true,
            requires_review: true,
            requires_monitoring: false,
            requires_integration: false,
        });
        assert_eq!(proposal.coordinator_count, 1);
        assert_eq!(proposal.worker_count, 3);
        assert_eq!(proposal.reviewer_count, 2);
        assert_eq!(proposal.monitor_count, 1);
        assert_eq!(proposal.refinery_count, 0);
    }

    #[test]
    fn double_assignment_is_rejected() {
        let registry = RoleRegistry::new(crate::events::EventBus::default());
        let make = || RoleAssignment {
            agent_id: "a1".into(),
            role_id: "worker".into(),
            team_id: None,
            worktree_id: None,
            assigned_at: chrono::Utc::now(),
            assigned_by: "test".into(),
            expires_at: None,
        };
        registry.assign(make()).unwrap();
        assert!(matches!(registry.assign(make()), Err(RoleError::AgentAlreadyAssigned(_))));
    }
}
