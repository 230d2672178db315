use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::PartId;
use super::task::{Task, TaskResult};
use crate::errors::HaltReport;
use crate::gates::GateVerdict;
use crate::phase::PhaseKind;

/// Why a part is waiting for outside input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    ScopeArbitration,
    Clarification,
    BudgetExceeded,
    Escalated,
}

impl fmt::Display for SuspendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuspendReason::ScopeArbitration => "scope-arbitration",
            SuspendReason::Clarification => "clarification",
            SuspendReason::BudgetExceeded => "budget-exceeded",
            SuspendReason::Escalated => "escalated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PartStatus {
    NotStarted,
    InProgress,
    Completed,
    RolledBack { to: PhaseKind },
    Suspended { reason: SuspendReason },
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartStatus::NotStarted => write!(f, "not-started"),
            PartStatus::InProgress => write!(f, "in-progress"),
            PartStatus::Completed => write!(f, "completed"),
            PartStatus::RolledBack { to } => write!(f, "rolled-back({to})"),
            PartStatus::Suspended { reason } => write!(f, "suspended({reason})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Active,
    Passed,
    Failed { restart_required: bool },
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Active => write!(f, "active"),
            PhaseStatus::Passed => write!(f, "passed"),
            PhaseStatus::Failed {
                restart_required: true,
            } => write!(f, "failed->restart-required"),
            PhaseStatus::Failed { .. } => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartTransition {
    pub at: DateTime<Utc>,
    pub phase: PhaseKind,
    pub status: PartStatus,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub at: DateTime<Utc>,
    pub status: PhaseStatus,
    #[serde(default)]
    pub note: String,
}

/// A task together with its outcome in one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: Task,
    pub result: Option<TaskResult>,
    /// Complexity has been charged against the part's budget.
    #[serde(default)]
    pub charged: bool,
    /// The result was carried over from an earlier attempt.
    #[serde(default)]
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAttempt {
    pub number: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub verdicts: Vec<GateVerdict>,
    /// Results of a discarded attempt are never reused.
    #[serde(default)]
    pub discarded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub kind: PhaseKind,
    status: PhaseStatus,
    /// Rollbacks and restarts counted against this phase.
    #[serde(default)]
    pub rollback_cycles: u32,
    #[serde(default)]
    pub attempts: Vec<PhaseAttempt>,
    #[serde(default)]
    transitions: Vec<PhaseTransition>,
}

impl PhaseRecord {
    pub fn new(kind: PhaseKind) -> Self {
        Self {
            kind,
            status: PhaseStatus::Pending,
            rollback_cycles: 0,
            attempts: Vec::new(),
            transitions: Vec::new(),
        }
    }

    pub fn status(&self) -> PhaseStatus {
        self.status
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn set_status(&mut self, status: PhaseStatus, note: impl Into<String>) {
        self.status = status;
        self.transitions.push(PhaseTransition {
            at: Utc::now(),
            status,
            note: note.into(),
        });
    }

    pub fn begin_attempt(&mut self) -> &mut PhaseAttempt {
        let number = self.attempts.len() as u32 + 1;
        self.attempts.push(PhaseAttempt {
            number,
            started_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
            verdicts: Vec::new(),
            discarded: false,
        });
        let last = self.attempts.len() - 1;
        &mut self.attempts[last]
    }

    pub fn latest_attempt(&self) -> Option<&PhaseAttempt> {
        self.attempts.last()
    }

    /// Newest accepted result for an identical task in a non-discarded attempt.
    pub fn reusable(&self, fingerprint: &str) -> Option<&TaskRecord> {
        self.attempts
            .iter()
            .rev()
            .filter(|a| !a.discarded)
            .flat_map(|a| a.tasks.iter())
            .find(|r| {
                r.task.fingerprint() == fingerprint && r.result.as_ref().is_some_and(TaskResult::is_accepted)
            })
    }

    /// Invalidate every attempt so the next run starts from nothing.
    pub fn discard_attempts(&mut self) {
        for attempt in &mut self.attempts {
            attempt.discarded = true;
        }
    }
}

/// Fixes a gate asked for when it sent the part back, kept until that gate
/// passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkRequest {
    pub origin: PhaseKind,
    pub gate: String,
    #[serde(default)]
    pub fixes: Vec<String>,
}

/// A bounded subdivision of the project, driven through every phase.
///
/// `status` and `current_phase` are caches of the last transition; after a
/// load they are rebuilt by [`Part::replay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub name: String,
    pub budget_points: u32,
    status: PartStatus,
    current_phase: PhaseKind,
    pub phases: Vec<PhaseRecord>,
    transitions: Vec<PartTransition>,
    /// The halt that suspended the part, repeated to callers until lifted.
    #[serde(default)]
    pub pending_halt: Option<HaltReport>,
    #[serde(default)]
    pub rework: Option<ReworkRequest>,
}

impl Part {
    pub fn new(id: PartId, name: impl Into<String>, budget_points: u32) -> Self {
        let mut part = Self {
            id,
            name: name.into(),
            budget_points,
            status: PartStatus::NotStarted,
            current_phase: PhaseKind::Init,
            phases: PhaseKind::ALL.into_iter().map(PhaseRecord::new).collect(),
            transitions: Vec::new(),
            pending_halt: None,
            rework: None,
        };
        part.transition(PhaseKind::Init, PartStatus::NotStarted, "created");
        part
    }

    pub fn status(&self) -> PartStatus {
        self.status
    }

    pub fn current_phase(&self) -> PhaseKind {
        self.current_phase
    }

    pub fn transitions(&self) -> &[PartTransition] {
        &self.transitions
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.status, PartStatus::Suspended { .. })
    }

    pub fn suspend_reason(&self) -> Option<SuspendReason> {
        match self.status {
            PartStatus::Suspended { reason } => Some(reason),
            _ => None,
        }
    }

    /// Append a transition and move the part to `phase` with `status`.
    pub fn transition(&mut self, phase: PhaseKind, status: PartStatus, note: impl Into<String>) {
        self.status = status;
        self.current_phase = phase;
        self.transitions.push(PartTransition {
            at: Utc::now(),
            phase,
            status,
            note: note.into(),
        });
    }

    pub fn phase(&self, kind: PhaseKind) -> &PhaseRecord {
        &self.phases[kind.ordinal() as usize]
    }

    pub fn phase_mut(&mut self, kind: PhaseKind) -> &mut PhaseRecord {
        &mut self.phases[kind.ordinal() as usize]
    }

    /// Rebuild cached status from the transition logs.
    pub fn replay(&mut self) -> Result<()> {
        if self.phases.len() != PhaseKind::ALL.len()
            || self.phases.iter().zip(PhaseKind::ALL).any(|(r, k)| r.kind != k)
        {
            bail!("{} has a malformed phase table", self.id);
        }
        let Some(last) = self.transitions.last() else {
            bail!("{} has an empty transition log", self.id);
        };
        self.status = last.status;
        self.current_phase = last.phase;
        for record in &mut self.phases {
            if let Some(t) = record.transitions.last() {
                record.status = t.status;
            }
        }
        if !self.is_suspended() {
            self.pending_halt = None;
        }
        Ok(())
    }
}
