use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use phasegate_common::{ValidationRequest, Validator, Verdict, WorkProduct};
use tracing::{debug, warn};

use super::{
    Completeness, GateAction, GateDefinition, GateRule, GateVerdict, RoleVerdict, VerdictReason,
    all_must_pass, dual_approval,
};
use crate::model::LockedRequirement;

/// Runs the validators of a gate concurrently and reduces their verdicts.
///
/// Validators are isolated from each other: each receives the same work
/// product and the locked requirement, never another validator's verdict.
pub struct ValidationGateCoordinator {
    validators: HashMap<String, Arc<dyn Validator>>,
    timeout: Duration,
}

impl ValidationGateCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            validators: HashMap::new(),
            timeout,
        }
    }

    /// Register a validator for `role`, replacing any previous one.
    pub fn register(&mut self, role: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(role.into(), validator);
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.validators.contains_key(role)
    }

    pub async fn evaluate(
        &self,
        gate: &GateDefinition,
        product: &WorkProduct,
        requirement: &LockedRequirement,
    ) -> GateVerdict {
        let completeness = if product.partial {
            Completeness::Partial
        } else {
            Completeness::Complete
        };

        if gate.rule == GateRule::Completeness {
            let action = match completeness {
                Completeness::Complete => GateAction::Advance,
                Completeness::Partial => GateAction::RestartPhase,
            };
            return self.verdict(gate, product, Vec::new(), action, completeness);
        }

        let checks = gate
            .validators
            .iter()
            .map(|role| self.ask(role, gate, product, requirement));
        let mut verdicts: Vec<RoleVerdict> = join_all(checks).await;

        if let Some(problem) = gate.misconfiguration() {
            warn!(gate = %gate.name, rule = %gate.rule, %problem, "gate cannot pass as configured");
            verdicts.push(RoleVerdict::implicit_fail(
                &gate.name,
                VerdictReason::GateMisconfigured,
                problem,
            ));
        }

        let outcomes: Vec<Verdict> = verdicts.iter().map(|v| v.verdict).collect();
        let action = match (gate.rule, outcomes.as_slice()) {
            (GateRule::DualApproval, [a, b]) => dual_approval(*a, *b),
            _ => all_must_pass(&outcomes),
        };
        self.verdict(gate, product, verdicts, action, completeness)
    }

    async fn ask(
        &self,
        role: &str,
        gate: &GateDefinition,
        product: &WorkProduct,
        requirement: &LockedRequirement,
    ) -> RoleVerdict {
        let Some(validator) = self.validators.get(role) else {
            warn!(gate = %gate.name, role, "no validator registered");
            return RoleVerdict::implicit_fail(
                role,
                VerdictReason::ValidatorUnavailable,
                format!("no validator registered for role '{role}'"),
            );
        };
        let request = ValidationRequest {
            gate: gate.name.clone(),
            role: role.to_string(),
            work_product: product.clone(),
            requirement_digest: requirement.digest.clone(),
            requirement: requirement.text.clone(),
        };
        match tokio::time::timeout(self.timeout, validator.evaluate(request)).await {
            Ok(Ok(response)) => {
                debug!(gate = %gate.name, role, verdict = %response.verdict, "validator answered");
                RoleVerdict {
                    role: role.to_string(),
                    verdict: response.verdict,
                    reason: VerdictReason::Evaluated,
                    rationale: response.rationale,
                    required_fixes: response.required_fixes,
                }
            }
            Ok(Err(e)) => {
                warn!(gate = %gate.name, role, error = %e, "validator failed");
                RoleVerdict::implicit_fail(role, VerdictReason::ValidatorError, format!("{e:#}"))
            }
            Err(_) => {
                warn!(gate = %gate.name, role, timeout_secs = self.timeout.as_secs(), "validator timed out");
                RoleVerdict::implicit_fail(
                    role,
                    VerdictReason::ValidatorTimeout,
                    format!("no verdict within {}s", self.timeout.as_secs()),
                )
            }
        }
    }

    fn verdict(
        &self,
        gate: &GateDefinition,
        product: &WorkProduct,
        verdicts: Vec<RoleVerdict>,
        action: GateAction,
        completeness: Completeness,
    ) -> GateVerdict {
        GateVerdict {
            gate: gate.name.clone(),
            phase: gate.phase,
            attempt: product.attempt,
            rule: gate.rule,
            verdicts,
            action,
            completeness,
            evaluated_at: Utc::now(),
        }
    }
}
