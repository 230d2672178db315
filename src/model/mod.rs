//! Orchestration data model.
//!
//! All of these types are owned by the phase state machine and persisted in
//! the roadmap. Status changes are recorded as appended transitions, never by
//! rewriting or removing earlier records.

mod part;
mod project;
mod scope;
mod task;

pub use part::{
    Part, PartStatus, PartTransition, PhaseAttempt, PhaseRecord, PhaseStatus, PhaseTransition,
    ReworkRequest, SuspendReason, TaskRecord,
};
pub use project::{LockedRequirement, PartId, Project};
pub use scope::{AuthorizationRecord, AuthorizationScope, ScopeBoundary, ScopeEntry, TraceStatus};
pub use task::{Authenticity, ResultStatus, Task, TaskFailure, TaskResult, TaskSpec};
