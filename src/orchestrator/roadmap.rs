use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::ComplexityBudgetTracker;
use crate::config::PhasegateToml;
use crate::errors::OrchestratorError;
use crate::gates::GateVerdict;
use crate::model::{Part, PartId, Project, ResultStatus, TaskRecord};
use crate::phase::PhaseKind;

/// Current format of `roadmap.json`.
pub const ROADMAP_FORMAT: u32 = 1;

/// A gate verdict in the project-wide history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    pub part: PartId,
    #[serde(flatten)]
    pub verdict: GateVerdict,
}

/// Outcome counts over a part's task records.
///
/// Reused results are counted apart from `dispatched`, so a task carried
/// over into a later attempt is not counted twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskMetrics {
    /// Results returned by a worker.
    pub dispatched: usize,
    pub completed: usize,
    /// Failed or timed out.
    pub failed: usize,
    pub partial: usize,
    /// Cancelled siblings and discarded placeholder output.
    pub cancelled: usize,
    pub needs_input: usize,
    pub reused: usize,
    /// Planned but stopped by the pre-dispatch screen.
    pub blocked: usize,
}

impl TaskMetrics {
    fn record(&mut self, record: &TaskRecord) {
        let Some(result) = &record.result else {
            self.blocked += 1;
            return;
        };
        if record.reused {
            self.reused += 1;
            return;
        }
        self.dispatched += 1;
        if result.missing_inputs().is_some() {
            self.needs_input += 1;
            return;
        }
        match result.status {
            ResultStatus::Completed => self.completed += 1,
            ResultStatus::Failed | ResultStatus::TimedOut => self.failed += 1,
            ResultStatus::Partial => self.partial += 1,
            ResultStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Completed share of dispatched tasks, 0.0 when nothing ran.
    pub fn success_rate(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.completed as f64 / self.dispatched as f64
        }
    }
}

/// One task record with the attempt it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct TaskEntry<'a> {
    pub phase: PhaseKind,
    pub attempt: u32,
    pub discarded: bool,
    pub record: &'a TaskRecord,
}

impl TaskEntry<'_> {
    fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.record.result.as_ref().map(|r| r.finished_at)
    }
}

/// Everything needed to resume a project after a restart.
///
/// Owned by the phase state machine; other components only ever see
/// snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roadmap {
    #[serde(default = "default_format")]
    pub format: u32,
    /// Incremented on every save.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub project: Project,
    pub budget: ComplexityBudgetTracker,
    #[serde(default)]
    pub gate_history: Vec<GateRecord>,
    #[serde(default)]
    pub scope_incidents: BTreeMap<PartId, u32>,
}

fn default_format() -> u32 {
    ROADMAP_FORMAT
}

impl Roadmap {
    pub fn new(project: Project, config: &PhasegateToml) -> Self {
        Self {
            format: ROADMAP_FORMAT,
            version: 0,
            updated_at: Utc::now(),
            project,
            budget: ComplexityBudgetTracker::new(config.budget.warn_percent, config.budget.critical_percent),
            gate_history: Vec::new(),
            scope_incidents: BTreeMap::new(),
        }
    }

    /// Add a part and allocate its budget.
    pub fn add_part(&mut self, name: &str, budget_points: u32) -> PartId {
        let id = self.project.add_part(name, budget_points);
        self.budget.allocate(id, budget_points);
        id
    }

    pub fn part(&self, id: PartId) -> Result<&Part, OrchestratorError> {
        self.project.part(id).ok_or(OrchestratorError::UnknownPart(id))
    }

    pub fn part_mut(&mut self, id: PartId) -> Result<&mut Part, OrchestratorError> {
        self.project.part_mut(id).ok_or(OrchestratorError::UnknownPart(id))
    }

    pub fn part_ids(&self) -> Vec<PartId> {
        self.project.parts.iter().map(|p| p.id).collect()
    }

    pub fn gates_for(&self, part: PartId) -> impl Iterator<Item = &GateRecord> {
        self.gate_history.iter().filter(move |g| g.part == part)
    }

    pub fn scope_incidents(&self, part: PartId) -> u32 {
        self.scope_incidents.get(&part).copied().unwrap_or(0)
    }

    /// Task outcome counts for a whole part.
    pub fn task_metrics(&self, id: PartId) -> Result<TaskMetrics, OrchestratorError> {
        let mut metrics = TaskMetrics::default();
        for entry in self.task_entries(id)? {
            metrics.record(entry.record);
        }
        Ok(metrics)
    }

    /// Task outcome counts per phase, for phases that planned any task.
    pub fn phase_task_metrics(&self, id: PartId) -> Result<Vec<(PhaseKind, TaskMetrics)>, OrchestratorError> {
        let mut by_phase: BTreeMap<PhaseKind, TaskMetrics> = BTreeMap::new();
        for entry in self.task_entries(id)? {
            by_phase.entry(entry.phase).or_default().record(entry.record);
        }
        Ok(by_phase.into_iter().collect())
    }

    /// Up to `limit` task records, most recently finished first. Records
    /// that never ran sort last. A `limit` of 0 returns everything.
    pub fn task_history(&self, id: PartId, limit: usize) -> Result<Vec<TaskEntry<'_>>, OrchestratorError> {
        let mut entries = self.task_entries(id)?;
        entries.sort_by(|a, b| b.finished_at().cmp(&a.finished_at()));
        if limit > 0 {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    fn task_entries(&self, id: PartId) -> Result<Vec<TaskEntry<'_>>, OrchestratorError> {
        let part = self.part(id)?;
        Ok(part
            .phases
            .iter()
            .flat_map(|phase| {
                phase.attempts.iter().flat_map(move |attempt| {
                    attempt.tasks.iter().map(move |record| TaskEntry {
                        phase: phase.kind,
                        attempt: attempt.number,
                        discarded: attempt.discarded,
                        record,
                    })
                })
            })
            .collect())
    }

    /// Rebuild every part's cached status from its transition log.
    pub fn replay(&mut self) -> Result<()> {
        for part in &mut self.project.parts {
            part.replay()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskResult;

    fn roadmap() -> Roadmap {
        let mut project = Project::new("shop");
        project.lock_requirement("Customers can pay by card").unwrap();
        Roadmap::new(project, &PhasegateToml::default())
    }

    #[test]
    fn test_add_part_allocates_budget() {
        let mut roadmap = roadmap();
        let id = roadmap.add_part("checkout", 30);
        assert_eq!(id, PartId(1));
        assert_eq!(roadmap.budget.status(id).unwrap().total, 30);
        assert_eq!(roadmap.part(id).unwrap().name, "checkout");
        assert_eq!(roadmap.part_ids(), vec![PartId(1)]);
    }

    #[test]
    fn test_unknown_part_is_error() {
        let roadmap = roadmap();
        assert!(matches!(
            roadmap.part(PartId(9)),
            Err(OrchestratorError::UnknownPart(PartId(9)))
        ));
    }

    fn record(key: &str, phase: PhaseKind, status: Option<ResultStatus>, reused: bool) -> TaskRecord {
        use crate::model::{Task, TaskSpec};
        use phasegate_common::WorkerResponse;
        use std::time::Duration;

        let task = Task::from_spec(
            TaskSpec::new(key, "backend", "coding", "Build the checkout endpoint"),
            PartId(1),
            phase,
            Duration::from_secs(60),
        );
        let result = status.map(|status| {
            let response = match status {
                ResultStatus::Completed => WorkerResponse::completed(task.id, "done"),
                _ => WorkerResponse::failed(task.id, "worker crashed"),
            };
            let mut result = TaskResult::from_response(&task, response, 1, Utc::now());
            result.status = status;
            result
        });
        TaskRecord {
            task,
            result,
            charged: false,
            reused,
        }
    }

    #[test]
    fn test_task_metrics_count_outcomes() {
        let mut roadmap = roadmap();
        let id = roadmap.add_part("checkout", 25);
        let part = roadmap.part_mut(id).unwrap();
        let plan = part.phase_mut(PhaseKind::Plan);
        plan.begin_attempt().tasks = vec![
            record("design", PhaseKind::Plan, Some(ResultStatus::Completed), false),
            record("schema", PhaseKind::Plan, Some(ResultStatus::TimedOut), false),
        ];
        plan.begin_attempt().tasks = vec![
            record("design", PhaseKind::Plan, Some(ResultStatus::Completed), true),
            record("schema", PhaseKind::Plan, Some(ResultStatus::Completed), false),
        ];
        part.phase_mut(PhaseKind::Implement).begin_attempt().tasks = vec![
            record("api", PhaseKind::Implement, Some(ResultStatus::Cancelled), false),
            record("loyalty", PhaseKind::Implement, None, false),
        ];

        let metrics = roadmap.task_metrics(id).unwrap();
        assert_eq!(metrics.dispatched, 4);
        assert_eq!(metrics.completed, 2);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.cancelled, 1);
        assert_eq!(metrics.reused, 1);
        assert_eq!(metrics.blocked, 1);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);

        let phases = roadmap.phase_task_metrics(id).unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].0, PhaseKind::Plan);
        assert_eq!(phases[0].1.dispatched, 3);
        assert_eq!(phases[1].1.blocked, 1);

        let history = roadmap.task_history(id, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.record.result.is_some()));
        assert_eq!(roadmap.task_history(id, 0).unwrap().len(), 6);
        assert_eq!(TaskMetrics::default().success_rate(), 0.0);
    }

    #[test]
    fn test_roundtrip_keeps_incident_counts() {
        let mut roadmap = roadmap();
        let id = roadmap.add_part("checkout", 25);
        roadmap.scope_incidents.insert(id, 2);

        let json = serde_json::to_string(&roadmap).unwrap();
        let mut back: Roadmap = serde_json::from_str(&json).unwrap();
        back.replay().unwrap();
        assert_eq!(back.scope_incidents(id), 2);
        assert_eq!(back.scope_incidents(PartId(5)), 0);
    }
}
