//! Worker dispatch contract.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ContractError;
use crate::knowledge::ArtifactRef;

/// A unit of work handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: Uuid,
    pub role: String,
    pub task_type: String,
    pub content: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Knowledge artifacts found for this task before dispatch. May be empty.
    #[serde(default)]
    pub context_refs: Vec<ArtifactRef>,
}

/// Status reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Failed,
    Partial,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Completed => "completed",
            ResponseStatus::Failed => "failed",
            ResponseStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseStatus {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(ResponseStatus::Completed),
            "failed" => Ok(ResponseStatus::Failed),
            "partial" => Ok(ResponseStatus::Partial),
            other => Err(ContractError::UnknownStatus(other.to_string())),
        }
    }
}

/// What a worker sends back.
///
/// `status = completed` promises that `content` is directly verifiable or
/// executable. A worker that cannot proceed without more input reports
/// `failed` and lists what it needs in `missing_inputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub task_id: Uuid,
    pub status: ResponseStatus,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_inputs: Vec<String>,
}

impl WorkerResponse {
    pub fn completed(task_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            task_id,
            status: ResponseStatus::Completed,
            content: content.into(),
            confidence: None,
            sources: Vec::new(),
            missing_inputs: Vec::new(),
        }
    }

    pub fn failed(task_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failed,
            ..Self::completed(task_id, content)
        }
    }

    /// A failure caused by missing input rather than by the work itself.
    pub fn needs_input(task_id: Uuid, missing: Vec<String>) -> Self {
        Self {
            missing_inputs: missing,
            ..Self::failed(task_id, "")
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn is_information_gap(&self) -> bool {
        self.status == ResponseStatus::Failed && !self.missing_inputs.is_empty()
    }
}

/// An external worker able to execute tasks for one role.
///
/// Implementations should watch `cancel` and return promptly once it fires;
/// the orchestrator discards anything produced after cancellation anyway.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(
        &self,
        request: WorkerRequest,
        cancel: CancellationToken,
    ) -> anyhow::Result<WorkerResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults_when_fields_missing() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"task_id":"{id}","status":"completed","content":"done"}}"#);
        let response: WorkerResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(response.sources.is_empty());
        assert!(response.missing_inputs.is_empty());
        assert!(response.confidence.is_none());
    }

    #[test]
    fn test_information_gap_requires_failed_status() {
        let id = Uuid::new_v4();
        let gap = WorkerResponse::needs_input(id, vec!["api schema".into()]);
        assert!(gap.is_information_gap());

        let mut partial = gap.clone();
        partial.status = ResponseStatus::Partial;
        assert!(!partial.is_information_gap());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Completed".parse::<ResponseStatus>().unwrap(), ResponseStatus::Completed);
        assert_eq!("partial".parse::<ResponseStatus>().unwrap(), ResponseStatus::Partial);
        assert!(matches!(
            "done".parse::<ResponseStatus>(),
            Err(ContractError::UnknownStatus(_))
        ));
    }
}
