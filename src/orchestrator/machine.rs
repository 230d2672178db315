use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use phasegate_common::{ArtifactRef, KnowledgeArtifact, KnowledgeRepository, WorkProduct};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::planner::{PlanContext, TaskPlanner};
use super::roadmap::{GateRecord, Roadmap};
use super::state::StateEntry;
use super::store::RoadmapStore;
use crate::audit::{AuditEvent, AuditLogger};
use crate::config::{PhasegateConfig, PhasegateToml};
use crate::delegate::{FanOut, RetryPolicy, TaskDelegator};
use crate::errors::{BudgetError, HaltCause, HaltReport, OrchestratorError, Remediation};
use crate::gates::{GateDefinition, GateVerdict, ValidationGateCoordinator};
use crate::knowledge::CLARIFICATION_TAG;
use crate::model::{
    AuthorizationRecord, AuthorizationScope, LockedRequirement, PartId, PartStatus, PhaseAttempt, PhaseStatus,
    ResultStatus, ReworkRequest, SuspendReason, Task, TaskRecord, TaskResult,
};
use crate::phase::{PhaseKind, PhaseRules};
use crate::registry::WorkerRegistry;
use crate::rollback::{CycleDecision, PlaceholderDetector, RollbackController, RollbackPlan, ViolationKind, ViolationReport};

/// What one call to [`PhaseStateMachine::advance`] did.
///
/// Halts are outcomes, not errors; callers must handle every variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Advanced { from: PhaseKind, to: PhaseKind },
    /// Every phase passed.
    Completed,
    /// The phase must be re-executed from a fresh attempt.
    RestartRequired { phase: PhaseKind, report: HaltReport },
    /// The part went back to `to`; `restart_range` is re-run before the
    /// gating phase `from` is evaluated again.
    RolledBack {
        from: PhaseKind,
        to: PhaseKind,
        restart_range: RangeInclusive<PhaseKind>,
        report: HaltReport,
    },
    /// Suspended until an authorization or clarification is supplied.
    Halted { report: HaltReport },
    /// Automatic processing stopped; needs manual resolution.
    Escalate { report: HaltReport },
}

impl PhaseOutcome {
    /// `run` stops at terminal outcomes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseOutcome::Completed | PhaseOutcome::Halted { .. } | PhaseOutcome::Escalate { .. }
        )
    }

    pub fn report(&self) -> Option<&HaltReport> {
        match self {
            PhaseOutcome::RestartRequired { report, .. }
            | PhaseOutcome::RolledBack { report, .. }
            | PhaseOutcome::Halted { report }
            | PhaseOutcome::Escalate { report } => Some(report),
            PhaseOutcome::Advanced { .. } | PhaseOutcome::Completed => None,
        }
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOutcome::Advanced { from, to } => write!(f, "advanced from {from} to {to}"),
            PhaseOutcome::Completed => write!(f, "completed"),
            PhaseOutcome::RestartRequired { phase, report } => write!(f, "restart {phase}: {report}"),
            PhaseOutcome::RolledBack {
                from,
                to,
                restart_range,
                ..
            } => write!(
                f,
                "rolled back from {from} to {to} (rework {} through {})",
                restart_range.start(),
                restart_range.end()
            ),
            PhaseOutcome::Halted { report } => write!(f, "halted: {report}"),
            PhaseOutcome::Escalate { report } => write!(f, "escalation required: {report}"),
        }
    }
}

/// The external pieces a state machine drives.
pub struct Collaborators {
    pub registry: WorkerRegistry,
    pub validators: ValidationGateCoordinator,
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub planner: Box<dyn TaskPlanner>,
}

/// Drives parts through the phase sequence.
///
/// The only writer of the roadmap, the budget tracker and the audit log.
/// Workers and validators return values; every mutation happens here, one
/// part and one phase at a time.
pub struct PhaseStateMachine {
    config: PhasegateToml,
    store: RoadmapStore,
    roadmap: Roadmap,
    delegator: TaskDelegator,
    gates: ValidationGateCoordinator,
    rollback: RollbackController,
    planner: Box<dyn TaskPlanner>,
    knowledge: Arc<dyn KnowledgeRepository>,
    audit: AuditLogger,
}

impl PhaseStateMachine {
    /// Lock and load the project's roadmap.
    pub fn open(config: &PhasegateConfig, collaborators: Collaborators) -> Result<Self, OrchestratorError> {
        let store = RoadmapStore::open(&config.state_dir)?;
        let roadmap = store.load()?;
        let detector = Arc::new(PlaceholderDetector::with_patterns(
            &config.toml.authenticity.extra_patterns,
        )?);
        let delegator = TaskDelegator::new(
            Arc::new(collaborators.registry),
            Arc::clone(&collaborators.knowledge),
            Arc::clone(&detector),
            RetryPolicy::from_config(&config.toml.delegation),
        );
        let rollback = RollbackController::new(config.toml.rollback.clone(), detector);
        let mut audit = AuditLogger::new(&config.audit_dir());
        if audit.load_current()? {
            warn!("finishing audit run left open by an interrupted process");
            audit.finish_run("interrupted")?;
        }

        info!(
            project = %roadmap.project.name,
            parts = roadmap.project.parts.len(),
            version = roadmap.version,
            "roadmap loaded"
        );
        Ok(Self {
            config: config.toml.clone(),
            store,
            roadmap,
            delegator,
            gates: collaborators.validators,
            rollback,
            planner: collaborators.planner,
            knowledge: collaborators.knowledge,
            audit,
        })
    }

    /// Read-only view of the current state.
    pub fn roadmap(&self) -> &Roadmap {
        &self.roadmap
    }

    /// Run one attempt of the part's current phase.
    pub async fn advance(&mut self, id: PartId) -> Result<PhaseOutcome, OrchestratorError> {
        let requirement = self
            .roadmap
            .project
            .requirement()
            .cloned()
            .ok_or(OrchestratorError::RequirementNotLocked)?;
        let part = self.roadmap.part(id)?;
        match part.status() {
            PartStatus::Completed => return Ok(PhaseOutcome::Completed),
            PartStatus::Suspended { reason } => {
                let report = part
                    .pending_halt
                    .clone()
                    .ok_or_else(|| anyhow!("{id} is suspended without a halt report"))?;
                return Ok(match reason {
                    SuspendReason::Escalated => PhaseOutcome::Escalate { report },
                    _ => PhaseOutcome::Halted { report },
                });
            }
            _ => {}
        }
        let phase = part.current_phase();

        self.audit.start_run(id)?;
        let span = info_span!("advance", part = %id, phase = %phase);
        let result = self.run_attempt(id, phase, &requirement).instrument(span).await;

        if let Ok(attempt) = self.attempt_mut(id, phase) {
            attempt.finished_at.get_or_insert_with(Utc::now);
        }
        let summary = match &result {
            Ok(outcome) => outcome.to_string(),
            Err(e) => format!("error: {e}"),
        };
        self.commit(&summary)?;
        result
    }

    /// Advance until the part completes, halts or escalates.
    pub async fn run(&mut self, id: PartId) -> Result<PhaseOutcome, OrchestratorError> {
        loop {
            let outcome = self.advance(id).await?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
            info!(part = %id, %outcome, "continuing");
        }
    }

    /// Attach a task authorization to a part halted for scope arbitration.
    pub fn authorize_scope(&mut self, id: PartId, record: AuthorizationRecord) -> Result<(), OrchestratorError> {
        self.expect_suspended(id, SuspendReason::ScopeArbitration)?;
        if !matches!(&record.scope, AuthorizationScope::Task { part, .. } if *part == id) {
            return Err(anyhow!("Authorization '{}' does not cover a task of {id}", record.id).into());
        }
        self.resume_authorized(id, record, "scope authorized")
    }

    /// Attach a budget override to a part halted on its budget.
    pub fn authorize_budget_override(
        &mut self,
        id: PartId,
        record: AuthorizationRecord,
    ) -> Result<(), OrchestratorError> {
        self.expect_suspended(id, SuspendReason::BudgetExceeded)?;
        if record.scope != (AuthorizationScope::Budget { part: id }) {
            return Err(anyhow!("Authorization '{}' is not a budget override for {id}", record.id).into());
        }
        self.resume_authorized(id, record, "budget override authorized")
    }

    /// Lift an escalation. The cycle counter of the escalated phase and the
    /// part's scope incident count start again from zero.
    pub fn resolve_escalation(&mut self, id: PartId, record: AuthorizationRecord) -> Result<(), OrchestratorError> {
        self.expect_suspended(id, SuspendReason::Escalated)?;
        if record.scope != (AuthorizationScope::Escalation { part: id }) {
            return Err(anyhow!("Authorization '{}' does not resolve an escalation of {id}", record.id).into());
        }
        let part = self.roadmap.part_mut(id)?;
        let phase = part.current_phase();
        part.phase_mut(phase).rollback_cycles = 0;
        self.roadmap.scope_incidents.insert(id, 0);
        self.resume_authorized(id, record, "escalation resolved")
    }

    /// Supply the input a worker was missing. The text becomes a knowledge
    /// artifact, so the re-issued task finds it through the usual search.
    pub async fn provide_clarification(
        &mut self,
        id: PartId,
        text: &str,
        author: &str,
    ) -> Result<ArtifactRef, OrchestratorError> {
        self.expect_suspended(id, SuspendReason::Clarification)?;
        if text.trim().is_empty() {
            return Err(anyhow!("Clarification text is empty").into());
        }

        let part = self.roadmap.part(id)?;
        let mut tags = vec![CLARIFICATION_TAG.to_string()];
        if let Some(halt) = &part.pending_halt {
            if let HaltCause::InformationGap { missing, .. } = &halt.cause {
                tags.extend(missing.iter().cloned());
            }
            let task = part
                .phase(halt.phase)
                .latest_attempt()
                .and_then(|a| a.tasks.iter().find(|r| Some(r.task.id) == halt.task_id));
            if let Some(record) = task {
                tags.push(record.task.role.clone());
            }
        }

        let reference = self
            .knowledge
            .contribute(KnowledgeArtifact::new(author, text, tags))
            .await?;

        self.audit.start_run(id)?;
        self.audit_event(AuditEvent::Clarification {
            part: id,
            artifact_id: reference.id,
        })?;
        self.resume(id, &format!("clarification {} from {author}", &reference.id.to_string()[..8]))?;
        self.commit("clarification provided")?;
        Ok(reference)
    }

    /// Send a scope-halted part back to Plan instead of authorizing the work.
    pub fn revert_to_plan(&mut self, id: PartId) -> Result<(), OrchestratorError> {
        self.expect_suspended(id, SuspendReason::ScopeArbitration)?;
        self.audit.start_run(id)?;

        let part = self.roadmap.part_mut(id)?;
        let current = part.current_phase();
        part.pending_halt = None;
        if current > PhaseKind::Plan {
            for kind in PhaseKind::ALL.into_iter().filter(|k| (PhaseKind::Plan..=current).contains(k)) {
                part.phase_mut(kind).set_status(PhaseStatus::Pending, "reverted to plan");
            }
            self.transition(
                id,
                PhaseKind::Plan,
                PartStatus::RolledBack { to: PhaseKind::Plan },
                "reverted to plan after scope violation",
            )?;
        } else {
            self.transition(
                id,
                current,
                PartStatus::InProgress,
                &format!("resumed at {current} after scope violation"),
            )?;
        }
        self.commit("reverted to plan")
    }

    async fn run_attempt(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        requirement: &LockedRequirement,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let rules = self.config.phase_rules(phase);
        let part = self.roadmap.part(id)?;
        let part_name = part.name.clone();
        let feedback = part.rework.as_ref().map(|r| r.fixes.clone()).unwrap_or_default();
        if part.status() != PartStatus::InProgress {
            self.transition(id, phase, PartStatus::InProgress, &format!("{phase} started"))?;
        }

        let record = self.roadmap.part_mut(id)?.phase_mut(phase);
        let attempt = record.begin_attempt().number;
        record.set_status(PhaseStatus::Active, format!("attempt {attempt}"));
        self.audit_event(AuditEvent::PhaseStarted { part: id, phase, attempt })?;
        info!(attempt, "phase attempt started");

        let ctx = PlanContext {
            part: id,
            part_name: &part_name,
            phase,
            attempt,
            requirement,
            feedback: &feedback,
        };
        let specs = self
            .planner
            .plan(&ctx)
            .map_err(|source| OrchestratorError::Planning { phase, source })?;
        let tasks: Vec<Task> = specs
            .into_iter()
            .map(|spec| Task::from_spec(spec, id, phase, rules.timeout))
            .collect();
        debug!(tasks = tasks.len(), "tasks planned");

        for task in &tasks {
            let screened = self
                .rollback
                .check_scope(task, &self.roadmap.project, &rules)
                .or_else(|| self.rollback.check_capability(task, self.delegator.registry()));
            if let Some(report) = screened {
                self.attempt_mut(id, phase)?.tasks.push(TaskRecord {
                    task: task.clone(),
                    result: None,
                    charged: false,
                    reused: false,
                });
                return self.scope_violation(id, phase, report);
            }
        }

        let mut records = Vec::new();
        let mut to_run = Vec::new();
        let history = self.roadmap.part(id)?.phase(phase);
        for task in tasks {
            match history.reusable(&task.fingerprint()) {
                Some(previous) => records.push(TaskRecord {
                    reused: true,
                    ..previous.clone()
                }),
                None => to_run.push(task),
            }
        }
        for record in &records {
            debug!(task = %record.task.key, "reusing verified result");
            self.audit_task_finished(record)?;
        }

        let results = self.dispatch(&to_run, &rules).await;
        let results = match results {
            Ok(results) => results,
            Err(e) => {
                self.roadmap
                    .part_mut(id)?
                    .phase_mut(phase)
                    .set_status(PhaseStatus::Failed { restart_required: false }, "dispatch failed");
                return Err(e);
            }
        };
        for (task, result) in to_run.into_iter().zip(results) {
            let record = TaskRecord {
                task,
                result: Some(result),
                charged: false,
                reused: false,
            };
            self.audit_task_finished(&record)?;
            records.push(record);
        }
        self.attempt_mut(id, phase)?.tasks = records;

        if let Some((index, report)) = self.first_violation(id, phase)? {
            if let Some(result) = self.attempt_mut(id, phase)?.tasks[index].result.as_mut() {
                result.discard();
            }
            return match report.kind {
                ViolationKind::Authenticity => self.authenticity_violation(id, phase, report),
                ViolationKind::Scope => self.scope_violation(id, phase, report),
            };
        }

        if let Some(outcome) = self.information_gap(id, phase)? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.charge_budget(id, phase)? {
            return Ok(outcome);
        }

        let verdicts = self.evaluate_gates(id, phase, requirement).await?;
        self.apply_verdicts(id, phase, verdicts).await
    }

    async fn dispatch(&mut self, tasks: &[Task], rules: &PhaseRules) -> Result<Vec<TaskResult>, OrchestratorError> {
        let cancel = CancellationToken::new();
        if rules.fan_out && tasks.len() > 1 {
            for task in tasks {
                self.audit_dispatched(task)?;
            }
            let rollback = &self.rollback;
            let project = &self.roadmap.project;
            let results = self
                .delegator
                .delegate_parallel(tasks, &cancel, |task, result| {
                    if rollback.inspect(task, result, project).is_some() || result.missing_inputs().is_some() {
                        FanOut::Cancel
                    } else {
                        FanOut::Continue
                    }
                })
                .await?;
            return Ok(results);
        }

        let mut results = Vec::new();
        for task in tasks {
            self.audit_dispatched(task)?;
            let result = self.delegator.delegate(task, &cancel).await?;
            let stop = self.rollback.inspect(task, &result, &self.roadmap.project).is_some()
                || result.missing_inputs().is_some();
            results.push(result);
            if stop {
                debug!(task = %task.key, "stopping serial dispatch");
                break;
            }
        }
        Ok(results)
    }

    fn first_violation(
        &self,
        id: PartId,
        phase: PhaseKind,
    ) -> Result<Option<(usize, ViolationReport)>, OrchestratorError> {
        let attempt = self.attempt(id, phase)?;
        Ok(attempt.tasks.iter().enumerate().find_map(|(i, record)| {
            let result = record.result.as_ref()?;
            if result.status == ResultStatus::Cancelled {
                return None;
            }
            self.rollback
                .inspect(&record.task, result, &self.roadmap.project)
                .map(|report| (i, report))
        }))
    }

    fn information_gap(&mut self, id: PartId, phase: PhaseKind) -> Result<Option<PhaseOutcome>, OrchestratorError> {
        let gap = self.attempt(id, phase)?.tasks.iter().find_map(|record| {
            let missing = record.result.as_ref()?.missing_inputs()?;
            Some((record.task.id, record.task.key.clone(), missing.to_vec()))
        });
        let Some((task_id, task, missing)) = gap else {
            return Ok(None);
        };
        self.roadmap
            .part_mut(id)?
            .phase_mut(phase)
            .set_status(PhaseStatus::Failed { restart_required: false }, "information gap");
        let report = HaltReport::new(
            HaltCause::InformationGap { task, missing },
            id,
            phase,
            Remediation::ExternalClarification,
        )
        .with_task(task_id);
        self.halt(id, phase, report, SuspendReason::Clarification).map(Some)
    }

    /// Charge every uncharged result that produced output.
    fn charge_budget(&mut self, id: PartId, phase: PhaseKind) -> Result<Option<PhaseOutcome>, OrchestratorError> {
        let override_id = self
            .roadmap
            .project
            .authorizations()
            .iter()
            .rev()
            .find(|a| a.scope == AuthorizationScope::Budget { part: id })
            .map(|a| a.id.clone());

        let count = self.attempt(id, phase)?.tasks.len();
        for i in 0..count {
            let record = &self.attempt(id, phase)?.tasks[i];
            let chargeable = !record.charged && record.result.as_ref().is_some_and(|r| r.status.produced_output());
            if !chargeable {
                continue;
            }
            let (task_id, key, category, points) = (
                record.task.id,
                record.task.key.clone(),
                record.task.category,
                record.task.complexity,
            );

            let charged = match &override_id {
                Some(auth) => self.roadmap.budget.consume_with_override(id, category, points, auth),
                None => self.roadmap.budget.consume(id, category, points),
            };
            self.flush_budget_events()?;
            match charged {
                Ok(status) => {
                    debug!(task = %key, points, consumed = status.consumed, total = status.total, "budget charged");
                    self.attempt_mut(id, phase)?.tasks[i].charged = true;
                }
                Err(BudgetError::Exceeded {
                    requested,
                    consumed,
                    total,
                    ..
                }) => {
                    self.roadmap
                        .part_mut(id)?
                        .phase_mut(phase)
                        .set_status(PhaseStatus::Failed { restart_required: false }, "budget exceeded");
                    let report = HaltReport::new(
                        HaltCause::BudgetExceeded {
                            requested,
                            consumed,
                            total,
                        },
                        id,
                        phase,
                        Remediation::Reauthorize,
                    )
                    .with_task(task_id);
                    return self.halt(id, phase, report, SuspendReason::BudgetExceeded).map(Some);
                }
                Err(e) => return Err(anyhow::Error::from(e).into()),
            }
        }
        Ok(None)
    }

    async fn evaluate_gates(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        requirement: &LockedRequirement,
    ) -> Result<Vec<GateVerdict>, OrchestratorError> {
        let attempt = self.attempt(id, phase)?;
        let product = WorkProduct {
            phase: phase.ordinal(),
            phase_name: phase.name().to_string(),
            attempt: attempt.number,
            items: attempt
                .tasks
                .iter()
                .filter_map(|r| r.result.as_ref().map(|res| res.to_work_item(&r.task)))
                .collect(),
            partial: attempt
                .tasks
                .iter()
                .any(|r| r.result.as_ref().is_none_or(|res| res.status != ResultStatus::Completed)),
        };

        let mut gates = self.config.gates_for(phase);
        if gates.is_empty() {
            gates.push(GateDefinition::completeness(phase));
        }

        let mut verdicts = Vec::with_capacity(gates.len());
        for gate in &gates {
            let verdict = self.gates.evaluate(gate, &product, requirement).await;
            info!(gate = %gate.name, action = %verdict.action, partial = product.partial, "gate evaluated");
            self.audit_event(AuditEvent::GateEvaluated {
                requirement_digest: requirement.digest.clone(),
                task_keys: product.items.iter().map(|i| i.key.clone()).collect(),
                verdict: verdict.clone(),
            })?;
            self.roadmap.gate_history.push(GateRecord {
                part: id,
                verdict: verdict.clone(),
            });
            verdicts.push(verdict);
        }
        self.attempt_mut(id, phase)?.verdicts.extend(verdicts.iter().cloned());
        Ok(verdicts)
    }

    async fn apply_verdicts(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        verdicts: Vec<GateVerdict>,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let Some(worst) = verdicts.iter().max_by_key(|v| v.action) else {
            return Err(anyhow!("no gate evaluated for {phase}").into());
        };
        let (gate, action) = (worst.gate.clone(), worst.action);
        let fixes: Vec<String> = verdicts.iter().flat_map(|v| v.required_fixes()).collect();

        match self.rollback.plan(phase, action) {
            RollbackPlan::Advance => self.phase_passed(id, phase).await,
            RollbackPlan::Restart { phase } => {
                let report = HaltReport::new(
                    HaltCause::GateRejected {
                        gate: gate.clone(),
                        action,
                    },
                    id,
                    phase,
                    Remediation::Rework { from: phase, to: phase },
                );
                let record = self.roadmap.part_mut(id)?.phase_mut(phase);
                record.set_status(PhaseStatus::Failed { restart_required: true }, format!("gate '{gate}': {action}"));
                match self.rollback.register_cycle(record) {
                    CycleDecision::Retry { cycle } => {
                        warn!(%gate, cycle, "gate requested a restart");
                        self.transition(
                            id,
                            phase,
                            PartStatus::InProgress,
                            &format!("restart {phase} after gate '{gate}' (cycle {cycle})"),
                        )?;
                        Ok(PhaseOutcome::RestartRequired { phase, report })
                    }
                    CycleDecision::Escalate { cycles } => {
                        self.escalate(id, phase, format!("gate '{gate}' keeps failing"), cycles)
                    }
                }
            }
            RollbackPlan::Rollback { from, to, through } => {
                let report = HaltReport::new(
                    HaltCause::GateRejected {
                        gate: gate.clone(),
                        action,
                    },
                    id,
                    from,
                    Remediation::Rework { from: through, to },
                );
                let record = self.roadmap.part_mut(id)?.phase_mut(from);
                record.set_status(PhaseStatus::Failed { restart_required: false }, format!("gate '{gate}': {action}"));
                let cycle = match self.rollback.register_cycle(record) {
                    CycleDecision::Retry { cycle } => cycle,
                    CycleDecision::Escalate { cycles } => {
                        return self.escalate(id, from, format!("gate '{gate}' keeps failing"), cycles);
                    }
                };

                warn!(%gate, %action, %to, %through, cycle, "rolling back");
                let part = self.roadmap.part_mut(id)?;
                for kind in PhaseKind::ALL
                    .into_iter()
                    .filter(|k| (to..=through).contains(k) || *k == from)
                {
                    part.phase_mut(kind)
                        .set_status(PhaseStatus::Pending, format!("reset by {action} from {from}"));
                }
                part.rework = Some(ReworkRequest {
                    origin: from,
                    gate: gate.clone(),
                    fixes,
                });
                self.transition(
                    id,
                    to,
                    PartStatus::RolledBack { to },
                    &format!("{action} requested by gate '{gate}' at {from} (cycle {cycle})"),
                )?;
                Ok(PhaseOutcome::RolledBack {
                    from,
                    to,
                    restart_range: to..=through,
                    report,
                })
            }
        }
    }

    async fn phase_passed(&mut self, id: PartId, phase: PhaseKind) -> Result<PhaseOutcome, OrchestratorError> {
        let part = self.roadmap.part_mut(id)?;
        part.phase_mut(phase).set_status(PhaseStatus::Passed, "gates passed");
        if part.rework.as_ref().is_some_and(|r| r.origin <= phase) {
            part.rework = None;
        }

        let contributions: Vec<KnowledgeArtifact> = part
            .phase(phase)
            .latest_attempt()
            .map(|a| {
                a.tasks
                    .iter()
                    .filter(|r| !r.reused && r.result.as_ref().is_some_and(|res| res.is_accepted()))
                    .filter_map(|r| {
                        let result = r.result.as_ref()?;
                        Some(KnowledgeArtifact::new(
                            r.task.role.clone(),
                            result.content.clone(),
                            vec![phase.slug().to_string(), r.task.key.clone(), r.task.task_type.clone()],
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        for artifact in contributions {
            if let Err(e) = self.knowledge.contribute(artifact).await {
                warn!(error = %e, "failed to contribute result to knowledge");
            }
        }

        let part = self.roadmap.part(id)?;
        let next = PhaseKind::ALL
            .into_iter()
            .filter(|k| *k > phase)
            .find(|k| part.phase(*k).status() != PhaseStatus::Passed);
        match next {
            Some(to) => {
                self.transition(id, to, PartStatus::InProgress, &format!("advanced from {phase}"))?;
                Ok(PhaseOutcome::Advanced { from: phase, to })
            }
            None => {
                self.transition(id, phase, PartStatus::Completed, "all phases passed")?;
                info!(part = %id, "part completed");
                Ok(PhaseOutcome::Completed)
            }
        }
    }

    /// Zero tolerance: the whole attempt is discarded and the phase re-run.
    fn authenticity_violation(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        report: ViolationReport,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        warn!(task = %report.task_key, findings = ?report.findings, "authenticity violation; discarding attempt");
        self.audit_event(AuditEvent::Violation { report: report.clone() })?;
        let halt = report.into_halt(id);

        let record = self.roadmap.part_mut(id)?.phase_mut(phase);
        record.discard_attempts();
        record.set_status(PhaseStatus::Failed { restart_required: true }, "authenticity violation");
        match self.rollback.register_cycle(record) {
            CycleDecision::Retry { cycle } => {
                self.transition(
                    id,
                    phase,
                    PartStatus::InProgress,
                    &format!("restart {phase} after authenticity violation (cycle {cycle})"),
                )?;
                Ok(PhaseOutcome::RestartRequired { phase, report: halt })
            }
            CycleDecision::Escalate { cycles } => {
                self.escalate(id, phase, "repeated authenticity violations".to_string(), cycles)
            }
        }
    }

    fn scope_violation(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        report: ViolationReport,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        warn!(task = %report.task_key, findings = ?report.findings, "scope violation");
        self.audit_event(AuditEvent::Violation { report: report.clone() })?;
        self.roadmap
            .part_mut(id)?
            .phase_mut(phase)
            .set_status(PhaseStatus::Failed { restart_required: false }, "scope violation");

        let incidents = self.roadmap.scope_incidents.entry(id).or_insert(0);
        let decision = self.rollback.register_scope_incident(incidents);
        let count = *incidents;
        self.audit_event(AuditEvent::Incident { part: id, count })?;

        match decision {
            CycleDecision::Retry { .. } => {
                let halt = report.into_halt(id);
                self.halt(id, phase, halt, SuspendReason::ScopeArbitration)
            }
            CycleDecision::Escalate { cycles } => {
                let bound = self.rollback.config().scope_incident_limit;
                self.escalate_with_bound(id, phase, "repeated scope violations".to_string(), cycles, bound)
            }
        }
    }

    fn halt(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        report: HaltReport,
        reason: SuspendReason,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        warn!(%report, "part halted");
        self.roadmap.part_mut(id)?.pending_halt = Some(report.clone());
        self.transition(id, phase, PartStatus::Suspended { reason }, report.cause.category())?;
        self.audit_event(AuditEvent::Halt { report: report.clone() })?;
        Ok(PhaseOutcome::Halted { report })
    }

    fn escalate(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        trigger: String,
        cycles: u32,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let bound = self.rollback.config().max_cycles;
        self.escalate_with_bound(id, phase, trigger, cycles, bound)
    }

    fn escalate_with_bound(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        trigger: String,
        cycles: u32,
        bound: u32,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        let report = HaltReport::new(
            HaltCause::EscalationRequired { trigger, cycles, bound },
            id,
            phase,
            Remediation::ManualResolution,
        );
        error!(%report, "escalation required");
        self.roadmap.part_mut(id)?.pending_halt = Some(report.clone());
        self.transition(
            id,
            phase,
            PartStatus::Suspended {
                reason: SuspendReason::Escalated,
            },
            report.cause.category(),
        )?;
        self.audit_event(AuditEvent::Escalation { report: report.clone() })?;
        Ok(PhaseOutcome::Escalate { report })
    }

    fn expect_suspended(&self, id: PartId, reason: SuspendReason) -> Result<(), OrchestratorError> {
        if self.roadmap.part(id)?.suspend_reason() == Some(reason) {
            Ok(())
        } else {
            Err(OrchestratorError::NotSuspended {
                part: id,
                expected: reason.to_string(),
            })
        }
    }

    fn resume_authorized(
        &mut self,
        id: PartId,
        record: AuthorizationRecord,
        note: &str,
    ) -> Result<(), OrchestratorError> {
        self.roadmap.project.record_authorization(record.clone())?;
        info!(part = %id, authorization = %record.id, granted_by = %record.granted_by, "authorization recorded");
        self.audit.start_run(id)?;
        let note = format!("{note}: {}", record.id);
        self.audit_event(AuditEvent::Authorization { record })?;
        self.resume(id, &note)?;
        self.commit(&note)
    }

    fn resume(&mut self, id: PartId, note: &str) -> Result<(), OrchestratorError> {
        let part = self.roadmap.part_mut(id)?;
        part.pending_halt = None;
        let phase = part.current_phase();
        self.transition(id, phase, PartStatus::InProgress, note)
    }

    fn transition(
        &mut self,
        id: PartId,
        phase: PhaseKind,
        status: PartStatus,
        note: &str,
    ) -> Result<(), OrchestratorError> {
        self.roadmap.part_mut(id)?.transition(phase, status, note);
        info!(part = %id, %phase, %status, note, "part transition");
        self.store.log_transition(&StateEntry {
            part: id,
            phase,
            status,
            note: note.to_string(),
            timestamp: Utc::now(),
        })?;
        self.audit_event(AuditEvent::Transition {
            part: id,
            phase,
            status,
            note: note.to_string(),
        })
    }

    /// Persist the roadmap and close the audit run.
    fn commit(&mut self, summary: &str) -> Result<(), OrchestratorError> {
        self.store.save(&mut self.roadmap)?;
        if self.audit.is_active() {
            self.audit.finish_run(summary)?;
        }
        Ok(())
    }

    fn audit_event(&mut self, event: AuditEvent) -> Result<(), OrchestratorError> {
        self.audit.record(event)?;
        Ok(())
    }

    fn audit_dispatched(&mut self, task: &Task) -> Result<(), OrchestratorError> {
        self.audit_event(AuditEvent::TaskDispatched {
            task_id: task.id,
            key: task.key.clone(),
            role: task.role.clone(),
            phase: task.phase,
        })
    }

    fn audit_task_finished(&mut self, record: &TaskRecord) -> Result<(), OrchestratorError> {
        let Some(result) = &record.result else {
            return Ok(());
        };
        self.audit_event(AuditEvent::TaskFinished {
            task_id: record.task.id,
            key: record.task.key.clone(),
            status: result.status,
            authenticity: result.authenticity,
            attempts: result.attempts,
            reused: record.reused,
        })
    }

    fn flush_budget_events(&mut self) -> Result<(), OrchestratorError> {
        for alert in self.roadmap.budget.drain_events() {
            self.audit_event(AuditEvent::BudgetAlert { alert })?;
        }
        Ok(())
    }

    fn attempt(&self, id: PartId, phase: PhaseKind) -> Result<&PhaseAttempt, OrchestratorError> {
        self.roadmap
            .part(id)?
            .phase(phase)
            .latest_attempt()
            .ok_or_else(|| OrchestratorError::from(anyhow!("{id} has no attempt for {phase}")))
    }

    fn attempt_mut(&mut self, id: PartId, phase: PhaseKind) -> Result<&mut PhaseAttempt, OrchestratorError> {
        self.roadmap
            .part_mut(id)?
            .phase_mut(phase)
            .attempts
            .last_mut()
            .ok_or_else(|| OrchestratorError::from(anyhow!("{id} has no attempt for {phase}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(cause: HaltCause, phase: PhaseKind) -> HaltReport {
        HaltReport::new(cause, PartId(1), phase, Remediation::Reauthorize)
    }

    #[test]
    fn test_only_completion_halt_and_escalation_are_terminal() {
        let budget = report(
            HaltCause::BudgetExceeded {
                requested: 6,
                consumed: 20,
                total: 25,
            },
            PhaseKind::Validate,
        );
        let rework = report(
            HaltCause::GateRejected {
                gate: "value".into(),
                action: crate::gates::GateAction::TargetedRework,
            },
            PhaseKind::UserValueValidation,
        );

        assert!(PhaseOutcome::Completed.is_terminal());
        assert!(PhaseOutcome::Halted { report: budget.clone() }.is_terminal());
        assert!(PhaseOutcome::Escalate { report: budget.clone() }.is_terminal());
        assert!(
            !PhaseOutcome::Advanced {
                from: PhaseKind::Init,
                to: PhaseKind::Research
            }
            .is_terminal()
        );
        assert!(
            !PhaseOutcome::RestartRequired {
                phase: PhaseKind::Validate,
                report: budget.clone()
            }
            .is_terminal()
        );
        assert!(
            !PhaseOutcome::RolledBack {
                from: PhaseKind::UserValueValidation,
                to: PhaseKind::Plan,
                restart_range: PhaseKind::Plan..=PhaseKind::Verify,
                report: rework,
            }
            .is_terminal()
        );
        assert!(PhaseOutcome::Completed.report().is_none());
    }

    #[test]
    fn test_rollback_display_names_the_range() {
        let outcome = PhaseOutcome::RolledBack {
            from: PhaseKind::UserValueValidation,
            to: PhaseKind::Plan,
            restart_range: PhaseKind::Plan..=PhaseKind::Verify,
            report: report(
                HaltCause::GateRejected {
                    gate: "value".into(),
                    action: crate::gates::GateAction::TargetedRework,
                },
                PhaseKind::UserValueValidation,
            ),
        };
        assert_eq!(
            outcome.to_string(),
            "rolled back from P8 User Value Validation to P2 Plan (rework P2 Plan through P6 Verify)"
        );
        assert_eq!(
            PhaseOutcome::Advanced {
                from: PhaseKind::Plan,
                to: PhaseKind::ContextPreparation
            }
            .to_string(),
            "advanced from P2 Plan to P3 Context Preparation"
        );
    }
}
