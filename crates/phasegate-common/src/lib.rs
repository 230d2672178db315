//! Wire contracts shared between the phasegate orchestrator and the
//! external parties it coordinates.
//!
//! | Contract | Implemented by | Consumed by |
//! |----------|----------------|-------------|
//! | [`Worker`] | task workers/agents | task delegator |
//! | [`Validator`] | gate validator roles | gate coordinator |
//! | [`KnowledgeRepository`] | knowledge stores | delegator, orchestrator |
//!
//! Everything here is plain serde data plus `async_trait` traits so that
//! adapters can be written without depending on the orchestration core.

pub mod knowledge;
pub mod validator;
pub mod worker;

pub use knowledge::{ArtifactRef, KnowledgeArtifact, KnowledgeRepository};
pub use validator::{ValidationRequest, ValidationResponse, Validator, Verdict, WorkItem, WorkProduct};
pub use worker::{ResponseStatus, Worker, WorkerRequest, WorkerResponse};

use thiserror::Error;

/// Errors raised while interpreting contract values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("unknown verdict '{0}' (expected PASS or FAIL)")]
    UnknownVerdict(String),

    #[error("unknown response status '{0}' (expected completed, failed or partial)")]
    UnknownStatus(String),
}
