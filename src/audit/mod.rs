//! Append-only audit trail of orchestration runs.
//!
//! A run groups the events produced while driving one part, from the first
//! phase attempt to a terminal outcome. Events are only ever appended; the
//! in-progress run is flushed to `current-run.json` after every event and
//! moved into `runs/` when it finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::BudgetEvent;
use crate::errors::HaltReport;
use crate::gates::GateVerdict;
use crate::model::{Authenticity, AuthorizationRecord, PartId, PartStatus, ResultStatus};
use crate::phase::PhaseKind;
use crate::rollback::ViolationReport;

pub mod logger;
pub use logger::AuditLogger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub part: PartId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Short description of how the run ended.
    #[serde(default)]
    pub outcome: Option<String>,
    pub events: Vec<AuditEntry>,
}

impl AuditRun {
    pub fn new(part: PartId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            part,
            started_at: Utc::now(),
            ended_at: None,
            outcome: None,
            events: Vec::new(),
        }
    }

    pub fn finish(&mut self, outcome: impl Into<String>) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome.into());
    }

    pub fn count(&self, pred: impl Fn(&AuditEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(&e.event)).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    PhaseStarted {
        part: PartId,
        phase: PhaseKind,
        attempt: u32,
    },
    TaskDispatched {
        task_id: Uuid,
        key: String,
        role: String,
        phase: PhaseKind,
    },
    TaskFinished {
        task_id: Uuid,
        key: String,
        status: ResultStatus,
        authenticity: Authenticity,
        attempts: u32,
        reused: bool,
    },
    /// A gate verdict together with what the validators were shown.
    GateEvaluated {
        requirement_digest: String,
        task_keys: Vec<String>,
        verdict: GateVerdict,
    },
    BudgetAlert {
        alert: BudgetEvent,
    },
    Violation {
        report: ViolationReport,
    },
    Incident {
        part: PartId,
        count: u32,
    },
    Transition {
        part: PartId,
        phase: PhaseKind,
        status: PartStatus,
        note: String,
    },
    Authorization {
        record: AuthorizationRecord,
    },
    Clarification {
        part: PartId,
        artifact_id: Uuid,
    },
    Halt {
        report: HaltReport,
    },
    Escalation {
        report: HaltReport,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_run_new() {
        let run = AuditRun::new(PartId(3));
        assert!(run.ended_at.is_none());
        assert!(run.outcome.is_none());
        assert!(run.events.is_empty());
        assert_eq!(run.part, PartId(3));
    }

    #[test]
    fn test_entry_serializes_flat_with_event_tag() {
        let entry = AuditEntry {
            at: Utc::now(),
            event: AuditEvent::Incident {
                part: PartId(1),
                count: 2,
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"], "incident");
        assert_eq!(value["count"], 2);
        assert!(value.get("at").is_some());
    }

    #[test]
    fn test_count_events() {
        let mut run = AuditRun::new(PartId(1));
        for count in 1..=2 {
            run.events.push(AuditEntry {
                at: Utc::now(),
                event: AuditEvent::Incident { part: PartId(1), count },
            });
        }
        run.events.push(AuditEntry {
            at: Utc::now(),
            event: AuditEvent::PhaseStarted {
                part: PartId(1),
                phase: PhaseKind::Init,
                attempt: 1,
            },
        });
        assert_eq!(run.count(|e| matches!(e, AuditEvent::Incident { .. })), 2);
    }
}
