//! Violation detection and rollback planning.
//!
//! The controller is advisory: it inspects tasks and results, counts
//! cycles and turns gate actions into concrete targets, but never touches
//! the roadmap. The state machine applies what it returns.

pub mod authenticity;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RollbackConfig;
use crate::errors::{HaltCause, HaltReport, Remediation};
use crate::gates::GateAction;
use crate::model::{PartId, PhaseRecord, Project, Task, TaskResult, TraceStatus};
use crate::phase::{PhaseKind, PhaseRules};
use crate::registry::WorkerRegistry;

pub use authenticity::PlaceholderDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Placeholder or synthetic content in a result.
    Authenticity,
    /// Work that does not trace to the locked requirement.
    Scope,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Authenticity => write!(f, "authenticity"),
            ViolationKind::Scope => write!(f, "scope"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub kind: ViolationKind,
    pub task_id: Uuid,
    pub task_key: String,
    pub phase: PhaseKind,
    pub findings: Vec<String>,
}

impl ViolationReport {
    pub fn into_halt(self, part: PartId) -> HaltReport {
        let (cause, remediation) = match self.kind {
            ViolationKind::Authenticity => (
                HaltCause::AuthenticityViolation {
                    task: self.task_key,
                    findings: self.findings,
                },
                Remediation::ReImplement,
            ),
            ViolationKind::Scope => (
                HaltCause::ScopeViolation {
                    task: self.task_key,
                    detail: self.findings.join("; "),
                },
                Remediation::Reauthorize,
            ),
        };
        HaltReport::new(cause, part, self.phase, remediation).with_task(self.task_id)
    }
}

/// Result of counting a cycle or incident against its bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    Retry { cycle: u32 },
    Escalate { cycles: u32 },
}

/// Where the state machine goes after a non-advancing gate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackPlan {
    Advance,
    /// Re-run `phase` from a fresh attempt.
    Restart { phase: PhaseKind },
    /// Reset `to..=through` and the gating phase `from`, then resume at `to`.
    /// Phases between `through` and `from` keep their passed status.
    Rollback {
        from: PhaseKind,
        to: PhaseKind,
        through: PhaseKind,
    },
}

pub struct RollbackController {
    config: RollbackConfig,
    detector: Arc<PlaceholderDetector>,
}

impl RollbackController {
    pub fn new(config: RollbackConfig, detector: Arc<PlaceholderDetector>) -> Self {
        Self { config, detector }
    }

    pub fn detector(&self) -> Arc<PlaceholderDetector> {
        Arc::clone(&self.detector)
    }

    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    /// Violation carried by a finished task, authenticity first.
    pub fn inspect(&self, task: &Task, result: &TaskResult, project: &Project) -> Option<ViolationReport> {
        if result.is_suspect() {
            return Some(ViolationReport {
                kind: ViolationKind::Authenticity,
                task_id: task.id,
                task_key: task.key.clone(),
                phase: task.phase,
                findings: result.findings.clone(),
            });
        }
        self.trace_violation(task, project)
    }

    /// Scope test run before dispatch: phase rules plus requirement trace.
    ///
    /// An authorization for the task's key waives both.
    pub fn check_scope(&self, task: &Task, project: &Project, rules: &PhaseRules) -> Option<ViolationReport> {
        let authorized = project.authorizations().iter().any(|a| a.covers_task(task));
        let mut findings = Vec::new();
        if !authorized {
            if !rules.accepts_task_type(&task.task_type) {
                findings.push(format!("task type '{}' is not allowed in {}", task.task_type, task.phase));
            }
            if task.complexity > rules.max_complexity {
                findings.push(format!(
                    "complexity {} exceeds the {} maximum of {}",
                    task.complexity, task.phase, rules.max_complexity
                ));
            }
        }
        if let Some(report) = self.trace_violation(task, project) {
            findings.extend(report.findings);
        }
        if findings.is_empty() {
            return None;
        }
        Some(ViolationReport {
            kind: ViolationKind::Scope,
            task_id: task.id,
            task_key: task.key.clone(),
            phase: task.phase,
            findings,
        })
    }

    /// A task that no registered worker takes cannot be dispatched.
    pub fn check_capability(&self, task: &Task, registry: &WorkerRegistry) -> Option<ViolationReport> {
        let err = registry.resolve(&task.role, &task.task_type).err()?;
        Some(ViolationReport {
            kind: ViolationKind::Scope,
            task_id: task.id,
            task_key: task.key.clone(),
            phase: task.phase,
            findings: vec![err.to_string()],
        })
    }

    fn trace_violation(&self, task: &Task, project: &Project) -> Option<ViolationReport> {
        match project.scope().trace(task, project.authorizations()) {
            TraceStatus::Mapped(_) | TraceStatus::Authorized(_) => None,
            TraceStatus::Unmapped(lines) => {
                let detail = if lines.is_empty() {
                    "traces to no requirement line".to_string()
                } else {
                    format!("trace {:?} maps to no requirement line", lines)
                };
                Some(ViolationReport {
                    kind: ViolationKind::Scope,
                    task_id: task.id,
                    task_key: task.key.clone(),
                    phase: task.phase,
                    findings: vec![detail],
                })
            }
        }
    }

    /// Count a rollback or restart against `record`.
    pub fn register_cycle(&self, record: &mut PhaseRecord) -> CycleDecision {
        record.rollback_cycles += 1;
        self.bounded(record.rollback_cycles, self.config.max_cycles)
    }

    /// Count a scope incident for a part.
    pub fn register_scope_incident(&self, incidents: &mut u32) -> CycleDecision {
        *incidents += 1;
        self.bounded(*incidents, self.config.scope_incident_limit)
    }

    fn bounded(&self, count: u32, bound: u32) -> CycleDecision {
        if count >= bound {
            CycleDecision::Escalate { cycles: count }
        } else {
            CycleDecision::Retry { cycle: count }
        }
    }

    pub fn plan(&self, from: PhaseKind, action: GateAction) -> RollbackPlan {
        let (to, through) = match action {
            GateAction::Advance => return RollbackPlan::Advance,
            GateAction::RestartPhase => return RollbackPlan::Restart { phase: from },
            GateAction::TargetedRework => (self.config.targeted_from, self.config.targeted_to.min(from)),
            GateAction::MajorRework => (self.config.major_reset_to, from),
        };
        if to >= from {
            return RollbackPlan::Restart { phase: from };
        }
        RollbackPlan::Rollback {
            from,
            to,
            through: through.max(to),
        }
    }
}
