//! Typed error hierarchy for phasegate.
//!
//! Two kinds of failure are kept apart:
//! - **Halts** ([`HaltCause`] inside a [`HaltReport`]) are orchestration
//!   outcomes. They are returned as values, persisted with the part and always
//!   name the category, the phase/task implicated and the remediation.
//! - **Errors** (`*Error` enums) are infrastructure failures: unknown ids,
//!   I/O, persistence, misconfiguration.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::gates::GateAction;
use crate::model::PartId;
use crate::phase::PhaseKind;

/// Why a part stopped making automatic progress.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltCause {
    #[error("worker for task '{task}' cannot proceed without: {}", .missing.join(", "))]
    InformationGap { task: String, missing: Vec<String> },

    #[error("task '{task}' returned placeholder content ({})", .findings.join("; "))]
    AuthenticityViolation { task: String, findings: Vec<String> },

    #[error("task '{task}' is outside the scope boundary: {detail}")]
    ScopeViolation { task: String, detail: String },

    #[error("budget exceeded: {requested} more points requested with {consumed}/{total} consumed")]
    BudgetExceeded {
        requested: u32,
        consumed: u32,
        total: u32,
    },

    #[error("gate '{gate}' rejected the work product ({action})")]
    GateRejected { gate: String, action: GateAction },

    #[error("{trigger} after {cycles} cycles (bound {bound})")]
    EscalationRequired {
        trigger: String,
        cycles: u32,
        bound: u32,
    },
}

impl HaltCause {
    pub fn category(&self) -> &'static str {
        match self {
            HaltCause::InformationGap { .. } => "information gap",
            HaltCause::AuthenticityViolation { .. } => "authenticity violation",
            HaltCause::ScopeViolation { .. } => "scope violation",
            HaltCause::BudgetExceeded { .. } => "budget exceeded",
            HaltCause::GateRejected { .. } => "gate rejected",
            HaltCause::EscalationRequired { .. } => "escalation required",
        }
    }
}

/// The exact action needed before a halted part may continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Remediation {
    /// An explicit authorization record must be attached.
    Reauthorize,
    /// The phase must be re-executed with verifiable output.
    ReImplement,
    /// Missing input must be supplied from outside.
    ExternalClarification,
    /// Phases `to..=from` are re-run.
    Rework { from: PhaseKind, to: PhaseKind },
    /// Automatic processing stopped; a person must resolve it.
    ManualResolution,
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remediation::Reauthorize => write!(f, "attach an authorization record"),
            Remediation::ReImplement => {
                write!(f, "re-implement the phase with verifiable, non-placeholder output")
            }
            Remediation::ExternalClarification => {
                write!(f, "provide the missing information, then resume")
            }
            Remediation::Rework { from, to } => write!(f, "rework {to} through {from}"),
            Remediation::ManualResolution => {
                write!(f, "resolve manually and attach an escalation authorization")
            }
        }
    }
}

/// A halt as reported to the caller and stored on the part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltReport {
    pub cause: HaltCause,
    pub part: PartId,
    pub phase: PhaseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub remediation: Remediation,
    pub detected_at: DateTime<Utc>,
}

impl HaltReport {
    pub fn new(cause: HaltCause, part: PartId, phase: PhaseKind, remediation: Remediation) -> Self {
        Self {
            cause,
            part,
            phase,
            task_id: None,
            remediation,
            detected_at: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

impl fmt::Display for HaltReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} at {}", self.cause.category(), self.part, self.phase)?;
        if let Some(id) = self.task_id {
            write!(f, " (task {})", &id.to_string()[..8])?;
        }
        write!(f, ": {}. Remediation: {}", self.cause, self.remediation)
    }
}

/// Errors from project-level mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectError {
    #[error("Original requirement is already locked and cannot be changed")]
    RequirementLocked,

    #[error("Original requirement text is empty")]
    EmptyRequirement,

    #[error("Authorization '{0}' already exists")]
    DuplicateAuthorization(String),

    #[error("Authorization id must not be empty")]
    EmptyAuthorization,
}

/// Errors from the complexity budget tracker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("No budget allocated for {0}")]
    UnknownPart(PartId),

    #[error("Budget exceeded for {part}: {consumed} + {requested} > {total}")]
    Exceeded {
        part: PartId,
        requested: u32,
        consumed: u32,
        total: u32,
    },

    #[error("Budget override requires a non-empty authorization reference")]
    MissingAuthorization,
}

/// Errors from the worker registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Worker role '{0}' is already registered")]
    DuplicateRole(String),

    #[error("No worker registered for role '{0}'")]
    UnknownRole(String),

    #[error("Worker role '{role}' does not accept task type '{task_type}'")]
    TaskTypeNotAccepted { role: String, task_type: String },
}

/// Errors that prevent a task from being dispatched at all.
///
/// Worker failures and timeouts are not errors; they come back as task
/// results with a failed or timed-out status.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Knowledge search failed for role '{role}': {source}")]
    Knowledge {
        role: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from roadmap persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Roadmap at {path} is locked by another orchestrator")]
    Locked { path: PathBuf },

    #[error("No roadmap found at {path}; run `phasegate init` first")]
    Missing { path: PathBuf },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the phase state machine.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown part {0}")]
    UnknownPart(PartId),

    #[error("Original requirement must be locked before any part can run")]
    RequirementNotLocked,

    #[error("{part} is not suspended for {expected}")]
    NotSuspended { part: PartId, expected: String },

    #[error("Task planning failed for {phase}: {source}")]
    Planning {
        phase: PhaseKind,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
