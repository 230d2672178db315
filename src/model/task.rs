use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use phasegate_common::{ArtifactRef, ResponseStatus, WorkItem, WorkerRequest, WorkerResponse};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::project::PartId;
use crate::budget::BudgetCategory;
use crate::phase::PhaseKind;
use crate::util::duration_millis;

fn default_complexity() -> u32 {
    1
}

/// A task as produced by a planner, before it is bound to a part and phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Stable logical name, unique within a phase. Authorizations and result
    /// reuse refer to tasks by key.
    pub key: String,
    pub role: String,
    pub task_type: String,
    pub content: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default = "default_complexity")]
    pub complexity: u32,
    #[serde(default)]
    pub category: BudgetCategory,
    /// Requirement line numbers this task implements.
    #[serde(default)]
    pub trace: Vec<u32>,
}

impl TaskSpec {
    pub fn new(
        key: impl Into<String>,
        role: impl Into<String>,
        task_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            role: role.into(),
            task_type: task_type.into(),
            content: content.into(),
            constraints: Vec::new(),
            complexity: default_complexity(),
            category: BudgetCategory::default(),
            trace: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub key: String,
    pub part: PartId,
    pub phase: PhaseKind,
    pub role: String,
    pub task_type: String,
    pub content: String,
    pub constraints: Vec<String>,
    pub complexity: u32,
    pub category: BudgetCategory,
    pub trace: Vec<u32>,
    #[serde(with = "duration_millis")]
    pub deadline: Duration,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, part: PartId, phase: PhaseKind, deadline: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: spec.key,
            part,
            phase,
            role: spec.role,
            task_type: spec.task_type,
            content: spec.content,
            constraints: spec.constraints,
            complexity: spec.complexity,
            category: spec.category,
            trace: spec.trace,
            deadline,
        }
    }

    /// Digest over everything that defines the work. Two tasks with the same
    /// fingerprint ask a worker for the same thing.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [&self.role, &self.task_type, &self.content] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        for constraint in &self.constraints {
            hasher.update(constraint.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0u8]);
        for line in &self.trace {
            hasher.update(line.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn to_request(&self, context_refs: Vec<ArtifactRef>) -> WorkerRequest {
        WorkerRequest {
            task_id: self.id,
            role: self.role.clone(),
            task_type: self.task_type.clone(),
            content: self.content.clone(),
            constraints: self.constraints.clone(),
            context_refs,
        }
    }
}

/// Terminal status of a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    Partial,
    TimedOut,
    Cancelled,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "completed",
            ResultStatus::Failed => "failed",
            ResultStatus::Partial => "partial",
            ResultStatus::TimedOut => "failed:timeout",
            ResultStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the worker produced usable output.
    pub fn produced_output(&self) -> bool {
        matches!(self, ResultStatus::Completed | ResultStatus::Partial)
    }
}

impl From<ResponseStatus> for ResultStatus {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Completed => ResultStatus::Completed,
            ResponseStatus::Failed => ResultStatus::Failed,
            ResponseStatus::Partial => ResultStatus::Partial,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authenticity {
    Verified,
    Suspect,
}

/// Why a task did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    Timeout { attempts: u32 },
    Worker { message: String },
    InformationGap { missing: Vec<String> },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub status: ResultStatus,
    pub content: String,
    pub authenticity: Authenticity,
    /// Placeholder indicators found in the content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn from_response(
        task: &Task,
        response: WorkerResponse,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let failure = if response.is_information_gap() {
            Some(TaskFailure::InformationGap {
                missing: response.missing_inputs.clone(),
            })
        } else if response.status == ResponseStatus::Failed {
            Some(TaskFailure::Worker {
                message: response.content.clone(),
            })
        } else {
            None
        };
        Self {
            task_id: task.id,
            status: response.status.into(),
            content: response.content,
            authenticity: Authenticity::Verified,
            findings: Vec::new(),
            confidence: response.confidence,
            sources: response.sources,
            failure,
            attempts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn without_output(task: &Task, status: ResultStatus, failure: TaskFailure, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            status,
            content: String::new(),
            authenticity: Authenticity::Verified,
            findings: Vec::new(),
            confidence: None,
            sources: Vec::new(),
            failure: Some(failure),
            attempts,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn timed_out(task: &Task, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self::without_output(task, ResultStatus::TimedOut, TaskFailure::Timeout { attempts }, attempts, started_at)
    }

    pub fn worker_error(task: &Task, message: impl Into<String>, attempts: u32, started_at: DateTime<Utc>) -> Self {
        let failure = TaskFailure::Worker {
            message: message.into(),
        };
        Self::without_output(task, ResultStatus::Failed, failure, attempts, started_at)
    }

    pub fn cancelled(task: &Task, attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self::without_output(task, ResultStatus::Cancelled, TaskFailure::Cancelled, attempts, started_at)
    }

    /// Drop whatever a worker produced and mark the result cancelled.
    pub fn discard(&mut self) {
        self.status = ResultStatus::Cancelled;
        self.content.clear();
        self.sources.clear();
        self.failure = Some(TaskFailure::Cancelled);
    }

    pub fn mark_suspect(&mut self, findings: Vec<String>) {
        self.authenticity = Authenticity::Suspect;
        self.findings = findings;
    }

    pub fn is_suspect(&self) -> bool {
        self.authenticity == Authenticity::Suspect
    }

    /// Completed with verified authenticity; eligible for reuse and knowledge.
    pub fn is_accepted(&self) -> bool {
        self.status == ResultStatus::Completed && self.authenticity == Authenticity::Verified
    }

    pub fn missing_inputs(&self) -> Option<&[String]> {
        match &self.failure {
            Some(TaskFailure::InformationGap { missing }) => Some(missing),
            _ => None,
        }
    }

    pub fn to_work_item(&self, task: &Task) -> WorkItem {
        let status = match self.status {
            ResultStatus::Completed => Some(ResponseStatus::Completed),
            ResultStatus::Failed => Some(ResponseStatus::Failed),
            ResultStatus::Partial => Some(ResponseStatus::Partial),
            ResultStatus::TimedOut | ResultStatus::Cancelled => None,
        };
        WorkItem {
            task_id: task.id,
            key: task.key.clone(),
            role: task.role.clone(),
            status,
            content: self.content.clone(),
            sources: self.sources.clone(),
        }
    }
}
