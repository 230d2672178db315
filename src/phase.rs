//! The fixed phase sequence every part is driven through.
//!
//! | # | Phase | Slug |
//! |---|-------|------|
//! | 0 | Initialization | `init` |
//! | 1 | Research | `research` |
//! | 2 | Plan | `plan` |
//! | 3 | Context Preparation | `context-preparation` |
//! | 4 | Validate | `validate` |
//! | 5 | Implement | `implement` |
//! | 6 | Verify | `verify` |
//! | 7 | Test | `test` |
//! | 8 | User Value Validation | `user-value-validation` |
//! | 9 | Document | `document` |
//! | 10 | Prepare | `prepare` |
//!
//! Phases serialize as their ordinal so config files and the roadmap can
//! write `phase = 5`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PhaseKind {
    Init,
    Research,
    Plan,
    ContextPreparation,
    Validate,
    Implement,
    Verify,
    Test,
    UserValueValidation,
    Document,
    Prepare,
}

impl PhaseKind {
    pub const ALL: [PhaseKind; 11] = [
        PhaseKind::Init,
        PhaseKind::Research,
        PhaseKind::Plan,
        PhaseKind::ContextPreparation,
        PhaseKind::Validate,
        PhaseKind::Implement,
        PhaseKind::Verify,
        PhaseKind::Test,
        PhaseKind::UserValueValidation,
        PhaseKind::Document,
        PhaseKind::Prepare,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Init => "Initialization",
            PhaseKind::Research => "Research",
            PhaseKind::Plan => "Plan",
            PhaseKind::ContextPreparation => "Context Preparation",
            PhaseKind::Validate => "Validate",
            PhaseKind::Implement => "Implement",
            PhaseKind::Verify => "Verify",
            PhaseKind::Test => "Test",
            PhaseKind::UserValueValidation => "User Value Validation",
            PhaseKind::Document => "Document",
            PhaseKind::Prepare => "Prepare",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            PhaseKind::Init => "init",
            PhaseKind::Research => "research",
            PhaseKind::Plan => "plan",
            PhaseKind::ContextPreparation => "context-preparation",
            PhaseKind::Validate => "validate",
            PhaseKind::Implement => "implement",
            PhaseKind::Verify => "verify",
            PhaseKind::Test => "test",
            PhaseKind::UserValueValidation => "user-value-validation",
            PhaseKind::Document => "document",
            PhaseKind::Prepare => "prepare",
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    pub fn is_last(self) -> bool {
        self == PhaseKind::Prepare
    }

    /// Task types a phase accepts.
    pub fn allowed_task_types(self) -> &'static [&'static str] {
        match self {
            PhaseKind::Init => &["system_setup", "configuration", "validation"],
            PhaseKind::Research => &["research", "analysis", "knowledge_synthesis"],
            PhaseKind::Plan => &["architecture", "design", "planning"],
            PhaseKind::ContextPreparation => &["context_assembly", "validation", "documentation"],
            PhaseKind::Validate => &["validation", "risk_assessment", "scope_check"],
            PhaseKind::Implement => &["development", "coding", "implementation"],
            PhaseKind::Verify => &["verification", "testing", "quality_check"],
            PhaseKind::Test => &["testing", "qa", "integration_testing"],
            PhaseKind::UserValueValidation => &["validation", "user_testing", "compliance_check"],
            PhaseKind::Document => &["documentation", "guides", "api_docs"],
            PhaseKind::Prepare => &["preparation", "setup", "configuration"],
        }
    }

    /// Built-in rules before config overrides are applied.
    pub fn default_rules(self) -> PhaseRules {
        let (max_complexity, timeout_secs) = match self {
            PhaseKind::Init => (3, 300),
            PhaseKind::Research => (8, 1800),
            PhaseKind::Plan => (7, 1200),
            PhaseKind::ContextPreparation => (5, 600),
            PhaseKind::Validate => (6, 900),
            PhaseKind::Implement => (10, 3600),
            PhaseKind::Verify => (8, 1800),
            PhaseKind::Test => (9, 2400),
            PhaseKind::UserValueValidation => (7, 1200),
            PhaseKind::Document => (5, 900),
            PhaseKind::Prepare => (3, 300),
        };
        PhaseRules {
            kind: self,
            max_complexity,
            timeout: Duration::from_secs(timeout_secs),
            fan_out: self == PhaseKind::Research,
        }
    }
}

impl From<PhaseKind> for u8 {
    fn from(kind: PhaseKind) -> u8 {
        kind.ordinal()
    }
}

impl TryFrom<u8> for PhaseKind {
    type Error = String;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        PhaseKind::from_ordinal(ordinal).ok_or_else(|| format!("phase ordinal {ordinal} out of range 0-10"))
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{} {}", self.ordinal(), self.name())
    }
}

impl FromStr for PhaseKind {
    type Err = String;

    /// Accepts an ordinal (`5`), a `P`-prefixed ordinal (`P5`) or a slug.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix(['P', 'p']).unwrap_or(s);
        if let Ok(ordinal) = digits.parse::<u8>() {
            return PhaseKind::try_from(ordinal);
        }
        let lowered = s.to_lowercase();
        PhaseKind::ALL
            .into_iter()
            .find(|k| k.slug() == lowered)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// Effective rules for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRules {
    pub kind: PhaseKind,
    /// Highest complexity a single task in this phase may declare.
    pub max_complexity: u32,
    /// Per-task deadline.
    pub timeout: Duration,
    /// Dispatch the phase's tasks concurrently instead of one after another.
    pub fan_out: bool,
}

impl PhaseRules {
    pub fn accepts_task_type(&self, task_type: &str) -> bool {
        self.kind.allowed_task_types().contains(&task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_dense() {
        for (i, kind) in PhaseKind::ALL.iter().enumerate() {
            assert_eq!(kind.ordinal() as usize, i);
            assert_eq!(PhaseKind::from_ordinal(i as u8), Some(*kind));
        }
        assert_eq!(PhaseKind::from_ordinal(11), None);
    }

    #[test]
    fn test_next_stops_after_prepare() {
        assert_eq!(PhaseKind::Init.next(), Some(PhaseKind::Research));
        assert_eq!(PhaseKind::Prepare.next(), None);
        assert!(PhaseKind::Prepare.is_last());
    }

    #[test]
    fn test_from_str_forms() {
        assert_eq!("5".parse::<PhaseKind>().unwrap(), PhaseKind::Implement);
        assert_eq!("P1".parse::<PhaseKind>().unwrap(), PhaseKind::Research);
        assert_eq!(
            "user-value-validation".parse::<PhaseKind>().unwrap(),
            PhaseKind::UserValueValidation
        );
        assert!("42".parse::<PhaseKind>().is_err());
        assert!("deploy".parse::<PhaseKind>().is_err());
    }

    #[test]
    fn test_serializes_as_ordinal() {
        assert_eq!(serde_json::to_string(&PhaseKind::Verify).unwrap(), "6");
        let k: PhaseKind = serde_json::from_str("10").unwrap();
        assert_eq!(k, PhaseKind::Prepare);
        assert!(serde_json::from_str::<PhaseKind>("11").is_err());
    }

    #[test]
    fn test_default_rules() {
        let research = PhaseKind::Research.default_rules();
        assert!(research.fan_out);
        assert_eq!(research.max_complexity, 8);
        assert_eq!(research.timeout, Duration::from_secs(1800));

        let implement = PhaseKind::Implement.default_rules();
        assert!(!implement.fan_out);
        assert!(implement.accepts_task_type("coding"));
        assert!(!implement.accepts_task_type("research"));
    }

    #[test]
    fn test_display() {
        assert_eq!(PhaseKind::ContextPreparation.to_string(), "P3 Context Preparation");
    }
}
