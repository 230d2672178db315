use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::PartId;
use super::task::Task;

/// One traceable line of the locked requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeEntry {
    /// 1-based line number in the requirement text.
    pub line: u32,
    pub text: String,
}

/// Traceability from tasks back to the original requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBoundary {
    entries: Vec<ScopeEntry>,
}

/// Result of tracing a task against the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceStatus {
    /// The task maps to these requirement lines.
    Mapped(Vec<u32>),
    /// The task does not map but an authorization covers it.
    Authorized(String),
    /// The task references no requirement line that exists.
    Unmapped(Vec<u32>),
}

impl TraceStatus {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, TraceStatus::Unmapped(_))
    }
}

impl ScopeBoundary {
    /// One entry per non-blank requirement line.
    pub fn from_requirement(text: &str) -> Self {
        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| ScopeEntry {
                line: i as u32 + 1,
                text: l.trim().to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn contains(&self, line: u32) -> bool {
        self.entries.iter().any(|e| e.line == line)
    }

    pub fn trace(&self, task: &Task, authorizations: &[AuthorizationRecord]) -> TraceStatus {
        let mapped: Vec<u32> = task.trace.iter().copied().filter(|l| self.contains(*l)).collect();
        if !mapped.is_empty() {
            return TraceStatus::Mapped(mapped);
        }
        match authorizations.iter().find(|a| a.covers_task(task)) {
            Some(auth) => TraceStatus::Authorized(auth.id.clone()),
            None => TraceStatus::Unmapped(task.trace.clone()),
        }
    }
}

/// What an authorization record permits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorizationScope {
    /// Work outside the scope boundary for one task key.
    Task { part: PartId, key: String },
    /// Consumption beyond the part's complexity budget.
    Budget { part: PartId },
    /// Resumption after an escalation.
    Escalation { part: PartId },
}

impl AuthorizationScope {
    pub fn part(&self) -> PartId {
        match self {
            AuthorizationScope::Task { part, .. }
            | AuthorizationScope::Budget { part }
            | AuthorizationScope::Escalation { part } => *part,
        }
    }
}

/// An explicit, recorded approval. Append-only on the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRecord {
    pub id: String,
    pub scope: AuthorizationScope,
    pub granted_by: String,
    #[serde(default)]
    pub reason: String,
    pub granted_at: DateTime<Utc>,
}

impl AuthorizationRecord {
    pub fn new(id: impl Into<String>, scope: AuthorizationScope, granted_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope,
            granted_by: granted_by.into(),
            reason: String::new(),
            granted_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn covers_task(&self, task: &Task) -> bool {
        matches!(&self.scope, AuthorizationScope::Task { part, key } if *part == task.part && *key == task.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskSpec;
    use crate::phase::PhaseKind;
    use std::time::Duration;

    fn task(key: &str, trace: Vec<u32>) -> Task {
        let spec = TaskSpec {
            trace,
            ..TaskSpec::new(key, "backend", "coding", "build it")
        };
        Task::from_spec(spec, PartId(1), PhaseKind::Implement, Duration::from_secs(60))
    }

    #[test]
    fn test_trace_maps_to_existing_lines() {
        let scope = ScopeBoundary::from_requirement("a\nb\nc");
        assert_eq!(scope.trace(&task("t", vec![2, 9]), &[]), TraceStatus::Mapped(vec![2]));
    }

    #[test]
    fn test_untraced_task_is_unmapped() {
        let scope = ScopeBoundary::from_requirement("a\nb");
        let status = scope.trace(&task("t", vec![]), &[]);
        assert_eq!(status, TraceStatus::Unmapped(vec![]));
        assert!(!status.is_allowed());
    }

    #[test]
    fn test_authorization_covers_only_its_task() {
        let scope = ScopeBoundary::from_requirement("a");
        let auth = AuthorizationRecord::new(
            "AUTH-7",
            AuthorizationScope::Task {
                part: PartId(1),
                key: "extra".into(),
            },
            "owner",
        );
        let auths = vec![auth];
        assert_eq!(
            scope.trace(&task("extra", vec![5]), &auths),
            TraceStatus::Authorized("AUTH-7".into())
        );
        assert_eq!(
            scope.trace(&task("other", vec![5]), &auths),
            TraceStatus::Unmapped(vec![5])
        );
    }
}
