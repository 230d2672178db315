//! Validator role contract.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ContractError;
use crate::worker::ResponseStatus;

/// Binary verdict of a single validator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail => write!(f, "FAIL"),
        }
    }
}

impl FromStr for Verdict {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            other => Err(ContractError::UnknownVerdict(other.to_string())),
        }
    }
}

/// One task's contribution to a phase work product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: Uuid,
    pub key: String,
    pub role: String,
    /// `None` when the task ended without a worker response (timeout, cancellation).
    pub status: Option<ResponseStatus>,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// The joined output of every task dispatched in one phase attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkProduct {
    pub phase: u8,
    pub phase_name: String,
    pub attempt: u32,
    pub items: Vec<WorkItem>,
    /// True when at least one item did not complete.
    pub partial: bool,
}

/// Input to a validator role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub gate: String,
    pub role: String,
    pub work_product: WorkProduct,
    /// SHA-256 digest of the locked requirement text.
    pub requirement_digest: String,
    pub requirement: String,
}

/// Output of a validator role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub verdict: Verdict,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub required_fixes: Vec<String>,
}

impl ValidationResponse {
    pub fn pass(rationale: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            rationale: rationale.into(),
            required_fixes: Vec::new(),
        }
    }

    pub fn fail(rationale: impl Into<String>, required_fixes: Vec<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            rationale: rationale.into(),
            required_fixes,
        }
    }
}

/// An independent validator role consulted by a gate.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn evaluate(&self, request: ValidationRequest) -> anyhow::Result<ValidationResponse>;
}
