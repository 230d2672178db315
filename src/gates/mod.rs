//! Validation gates and the verdict decision matrix.
//!
//! A gate asks one or more independent validator roles for a PASS/FAIL
//! verdict on a phase's work product and reduces the verdicts to a
//! [`GateAction`]. Reduction is a table lookup, never a vote:
//!
//! | Validator A | Validator B | Action |
//! |-------------|-------------|--------|
//! | PASS | PASS | Advance |
//! | FAIL | PASS | Targeted rework |
//! | PASS | FAIL | Targeted rework |
//! | FAIL | FAIL | Major rework |
//!
//! ```
//! use phasegate::gates::{dual_approval, GateAction, Verdict};
//!
//! assert_eq!(dual_approval(Verdict::Pass, Verdict::Pass), GateAction::Advance);
//! assert_eq!(dual_approval(Verdict::Fail, Verdict::Pass), GateAction::TargetedRework);
//! assert_eq!(dual_approval(Verdict::Fail, Verdict::Fail), GateAction::MajorRework);
//! ```

mod coordinator;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::PhaseKind;

pub use coordinator::ValidationGateCoordinator;
pub use phasegate_common::Verdict;

/// How a gate combines its validators' verdicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    /// Every validator must PASS. One FAIL is targeted rework, more is major.
    #[default]
    AllMustPass,
    /// Exactly two validators, reduced by [`DUAL_APPROVAL_MATRIX`].
    DualApproval,
    /// No validators; passes when every task completed. Used for phases
    /// without configured gates.
    Completeness,
}

impl fmt::Display for GateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRule::AllMustPass => write!(f, "all_must_pass"),
            GateRule::DualApproval => write!(f, "dual_approval"),
            GateRule::Completeness => write!(f, "completeness"),
        }
    }
}

impl std::str::FromStr for GateRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "all_must_pass" => Ok(GateRule::AllMustPass),
            "dual_approval" => Ok(GateRule::DualApproval),
            "completeness" => Ok(GateRule::Completeness),
            _ => anyhow::bail!(
                "Invalid gate rule '{}'. Valid values: all_must_pass, dual_approval, completeness",
                s
            ),
        }
    }
}

/// What the state machine does with a phase after its gates ran.
///
/// Ordered by severity; when a phase has several gates the most severe
/// action wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Advance,
    /// Re-run the same phase from scratch.
    RestartPhase,
    /// Roll back to a bounded early-middle phase range.
    TargetedRework,
    /// Roll back to an early phase.
    MajorRework,
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateAction::Advance => write!(f, "advance"),
            GateAction::RestartPhase => write!(f, "restart phase"),
            GateAction::TargetedRework => write!(f, "targeted rework"),
            GateAction::MajorRework => write!(f, "major rework"),
        }
    }
}

/// Dual-approval policy, indexed `[validator A][validator B]` with PASS = 0.
pub const DUAL_APPROVAL_MATRIX: [[GateAction; 2]; 2] = [
    [GateAction::Advance, GateAction::TargetedRework],
    [GateAction::TargetedRework, GateAction::MajorRework],
];

fn verdict_index(v: Verdict) -> usize {
    match v {
        Verdict::Pass => 0,
        Verdict::Fail => 1,
    }
}

pub fn dual_approval(a: Verdict, b: Verdict) -> GateAction {
    DUAL_APPROVAL_MATRIX[verdict_index(a)][verdict_index(b)]
}

/// Reduce any number of verdicts. An empty slice advances, so callers
/// must make sure a gate actually had validators.
pub fn all_must_pass(verdicts: &[Verdict]) -> GateAction {
    match verdicts.iter().filter(|v| !v.is_pass()).count() {
        0 => GateAction::Advance,
        1 => GateAction::TargetedRework,
        _ => GateAction::MajorRework,
    }
}

/// A gate attached to a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub phase: PhaseKind,
    pub name: String,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default)]
    pub rule: GateRule,
}

impl GateDefinition {
    /// Why this gate cannot produce a meaningful verdict, if it can't.
    pub fn misconfiguration(&self) -> Option<String> {
        match (self.rule, self.validators.len()) {
            (GateRule::AllMustPass, 0) => Some("gate lists no validators".to_string()),
            (GateRule::DualApproval, n) if n != 2 => {
                Some(format!("dual approval gate lists {n} validators, needs exactly 2"))
            }
            _ => None,
        }
    }

    pub fn completeness(phase: PhaseKind) -> Self {
        Self {
            phase,
            name: "completeness".to_string(),
            validators: Vec::new(),
            rule: GateRule::Completeness,
        }
    }
}

/// Why a validator's verdict is what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Evaluated,
    /// The validator did not answer in time; counted as FAIL.
    ValidatorTimeout,
    /// The validator errored; counted as FAIL.
    ValidatorError,
    /// No validator is registered for the role; counted as FAIL.
    ValidatorUnavailable,
    /// The gate lists too few or too many validators for its rule; counted
    /// as FAIL so a misconfigured gate never passes a phase.
    GateMisconfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleVerdict {
    pub role: String,
    pub verdict: Verdict,
    pub reason: VerdictReason,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub required_fixes: Vec<String>,
}

impl RoleVerdict {
    pub fn implicit_fail(role: &str, reason: VerdictReason, rationale: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            verdict: Verdict::Fail,
            reason,
            rationale: rationale.into(),
            required_fixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    /// At least one task failed, timed out or was cancelled.
    Partial,
}

/// Logged outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate: String,
    pub phase: PhaseKind,
    pub attempt: u32,
    pub rule: GateRule,
    pub verdicts: Vec<RoleVerdict>,
    pub action: GateAction,
    pub completeness: Completeness,
    pub evaluated_at: DateTime<Utc>,
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        self.action == GateAction::Advance
    }

    pub fn required_fixes(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .flat_map(|v| v.required_fixes.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dual_matrix_covers_all_combinations() {
        let cases = [
            (Verdict::Pass, Verdict::Pass, GateAction::Advance),
            (Verdict::Fail, Verdict::Pass, GateAction::TargetedRework),
            (Verdict::Pass, Verdict::Fail, GateAction::TargetedRework),
            (Verdict::Fail, Verdict::Fail, GateAction::MajorRework),
        ];
        for (a, b, expected) in cases {
            assert_eq!(dual_approval(a, b), expected, "({a}, {b})");
        }
    }

    #[test]
    fn test_all_must_pass_counts_failures() {
        assert_eq!(all_must_pass(&[]), GateAction::Advance);
        assert_eq!(all_must_pass(&[Verdict::Pass, Verdict::Pass]), GateAction::Advance);
        assert_eq!(
            all_must_pass(&[Verdict::Pass, Verdict::Fail, Verdict::Pass]),
            GateAction::TargetedRework
        );
        assert_eq!(all_must_pass(&[Verdict::Fail, Verdict::Fail]), GateAction::MajorRework);
    }

    #[test]
    fn test_actions_ordered_by_severity() {
        let worst = [GateAction::Advance, GateAction::MajorRework, GateAction::RestartPhase]
            .into_iter()
            .max();
        assert_eq!(worst, Some(GateAction::MajorRework));
        assert!(GateAction::RestartPhase < GateAction::TargetedRework);
    }

    #[test]
    fn test_gate_misconfiguration() {
        let gate = |rule, validators: &[&str]| GateDefinition {
            phase: PhaseKind::Verify,
            name: "verify".into(),
            validators: validators.iter().map(|v| v.to_string()).collect(),
            rule,
        };
        assert!(gate(GateRule::AllMustPass, &[]).misconfiguration().is_some());
        assert!(gate(GateRule::AllMustPass, &["qa"]).misconfiguration().is_none());
        assert!(gate(GateRule::DualApproval, &["qa"]).misconfiguration().is_some());
        assert!(gate(GateRule::DualApproval, &["a", "b", "c"]).misconfiguration().is_some());
        assert!(gate(GateRule::DualApproval, &["a", "b"]).misconfiguration().is_none());
        assert!(GateDefinition::completeness(PhaseKind::Plan).misconfiguration().is_none());
    }

    #[test]
    fn test_gate_rule_parse() {
        assert_eq!("dual-approval".parse::<GateRule>().unwrap(), GateRule::DualApproval);
        assert!("majority".parse::<GateRule>().is_err());
    }

    #[test]
    fn test_required_fixes_are_collected() {
        let verdict = GateVerdict {
            gate: "dual".into(),
            phase: PhaseKind::UserValueValidation,
            attempt: 1,
            rule: GateRule::DualApproval,
            verdicts: vec![
                RoleVerdict {
                    role: "value".into(),
                    verdict: Verdict::Fail,
                    reason: VerdictReason::Evaluated,
                    rationale: "no receipts".into(),
                    required_fixes: vec!["send receipt".into()],
                },
                RoleVerdict::implicit_fail("compliance", VerdictReason::ValidatorTimeout, "no answer"),
            ],
            action: GateAction::MajorRework,
            completeness: Completeness::Complete,
            evaluated_at: Utc::now(),
        };
        assert!(!verdict.is_pass());
        assert_eq!(verdict.required_fixes(), vec!["send receipt"]);
    }
}
