//! Placeholder and synthetic-content detection.
//!
//! Matching is on whole words, case-insensitive, so `mockingbird` or
//! `stubborn` do not trip the detector. "example" is deliberately not an
//! indicator.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::model::{ResultStatus, TaskResult};

static BUILTIN_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("mock", r"(?i)\bmock(s|ed)?\b"),
        ("placeholder", r"(?i)\bplaceholders?\b"),
        ("dummy", r"(?i)\bdumm(y|ies)\b"),
        ("stub", r"(?i)\bstub(s|bed)?\b"),
        ("fake", r"(?i)\bfake(d)?\b"),
        ("lorem ipsum", r"(?i)\blorem\s+ipsum\b"),
        ("todo: implement", r"(?i)\btodo\b[^\n]{0,40}\bimplement"),
        ("not implemented", r"(?i)\bnot\s+(yet\s+)?implemented\b"),
        ("NotImplementedError", r"\bNotImplementedError\b"),
        ("unimplemented!()", r"\bunimplemented!\s*\("),
        ("todo!()", r"\btodo!\s*\("),
        ("simulated output", r"(?i)\bsimulated\s+(data|results?|responses?|output)\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).unwrap()))
    .collect()
});

/// Flags content that is placeholder or synthetic instead of verifiable.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderDetector {
    extra: Vec<(String, Regex)>,
}

impl PlaceholderDetector {
    /// Build a detector with additional case-insensitive patterns.
    pub fn with_patterns(patterns: &[String]) -> Result<Self> {
        let extra = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid authenticity pattern '{}'", p))
                    .map(|re| (p.clone(), re))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { extra })
    }

    /// Labels of every indicator found in `content`.
    pub fn scan(&self, content: &str) -> Vec<String> {
        BUILTIN_PATTERNS
            .iter()
            .map(|(label, re)| (*label, re))
            .chain(self.extra.iter().map(|(label, re)| (label.as_str(), re)))
            .filter(|(_, re)| re.is_match(content))
            .map(|(label, _)| label.to_string())
            .collect()
    }

    /// Screen a result that carries worker output and flag it suspect when
    /// indicators are found. A completed result with no content is suspect.
    pub fn assess(&self, result: &mut TaskResult) {
        if !result.status.produced_output() {
            return;
        }
        let mut findings = self.scan(&result.content);
        if result.status == ResultStatus::Completed && result.content.trim().is_empty() {
            findings.push("empty content".to_string());
        }
        if !findings.is_empty() {
            result.mark_suspect(findings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartId, Task, TaskSpec};
    use crate::phase::PhaseKind;
    use chrono::Utc;
    use phasegate_common::WorkerResponse;
    use std::time::Duration;

    fn result(content: &str) -> TaskResult {
        let task = Task::from_spec(
            TaskSpec::new("k", "backend", "coding", "x"),
            PartId(1),
            PhaseKind::Implement,
            Duration::from_secs(1),
        );
        TaskResult::from_response(&task, WorkerResponse::completed(task.id, content), 1, Utc::now())
    }

    #[test]
    fn test_detects_common_indicators() {
        let d = PlaceholderDetector::default();
        assert_eq!(d.scan("returns a mock response"), vec!["mock"]);
        assert_eq!(d.scan("Lorem Ipsum dolor"), vec!["lorem ipsum"]);
        assert_eq!(d.scan("// TODO: implement retries"), vec!["todo: implement"]);
        assert_eq!(d.scan("raise NotImplementedError"), vec!["NotImplementedError"]);
        assert_eq!(d.scan("fn pay() { todo!() }"), vec!["todo!()"]);
        assert_eq!(d.scan("fn pay() { unimplemented!() }"), vec!["unimplemented!()"]);
        assert_eq!(d.scan("feature not yet implemented"), vec!["not implemented"]);
    }

    #[test]
    fn test_whole_words_only() {
        let d = PlaceholderDetector::default();
        assert!(d.scan("The mockingbird is stubborn").is_empty());
        assert!(d.scan("For example, use Stripe's idempotency keys").is_empty());
        assert!(d.scan("Implemented TLS termination with rustls").is_empty());
    }

    #[test]
    fn test_multiple_findings() {
        let d = PlaceholderDetector::default();
        let findings = d.scan("placeholder values from a dummy stub");
        assert_eq!(findings, vec!["placeholder", "dummy", "stub"]);
    }

    #[test]
    fn test_extra_patterns() {
        let d = PlaceholderDetector::with_patterns(&["xxx+".to_string()]).unwrap();
        assert_eq!(d.scan("password: XXXX"), vec!["xxx+"]);
        assert!(PlaceholderDetector::with_patterns(&["(".to_string()]).is_err());
    }

    #[test]
    fn test_assess_marks_suspect() {
        let d = PlaceholderDetector::default();
        let mut r = result("Here is fake data for the report");
        d.assess(&mut r);
        assert!(r.is_suspect());
        assert_eq!(r.findings, vec!["fake"]);

        let mut clean = result("Charges are created via POST /v1/charges (docs.stripe.com)");
        d.assess(&mut clean);
        assert!(!clean.is_suspect());
    }

    #[test]
    fn test_assess_flags_empty_completion() {
        let d = PlaceholderDetector::default();
        let mut r = result("   ");
        d.assess(&mut r);
        assert_eq!(r.findings, vec!["empty content"]);
    }

    #[test]
    fn test_assess_ignores_failures() {
        let d = PlaceholderDetector::default();
        let mut r = result("mock");
        r.status = ResultStatus::Failed;
        d.assess(&mut r);
        assert!(!r.is_suspect());
    }
}
