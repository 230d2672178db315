//! Configuration for phasegate, read from `.phasegate/phasegate.toml`.
//!
//! Every field has a default, so an empty (or missing) file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "storefront"
//!
//! [budget]
//! default_points = 25
//! warn_percent = 80
//! critical_percent = 90
//!
//! [delegation]
//! task_timeout_secs = 300
//! max_attempts = 3
//! backoff_base_ms = 500
//!
//! [rollback]
//! max_cycles = 3
//! targeted_from = 2
//! targeted_to = 6
//! major_reset_to = 1
//!
//! [[workers]]
//! role = "research"
//! task_types = ["research", "analysis", "knowledge_synthesis"]
//! concurrency = 3
//! command = "./agents/research.sh"
//!
//! [[validators]]
//! role = "user_value"
//! command = "./agents/value-check.sh"
//!
//! [[gates.definitions]]
//! phase = 8
//! name = "value-and-compliance"
//! validators = ["user_value", "compliance"]
//! rule = "dual_approval"
//!
//! [phases.overrides."impl*"]
//! timeout_secs = 7200
//!
//! [[phases.tasks]]
//! phase = 1
//! key = "provider-survey"
//! role = "research"
//! task_type = "research"
//! content = "Compare payment providers for EU card payments"
//! complexity = 3
//! trace = [1]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gates::{GateDefinition, GateRule};
use crate::init::STATE_DIR;
use crate::model::TaskSpec;
use crate::phase::{PhaseKind, PhaseRules};

pub const CONFIG_FILE: &str = "phasegate.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (defaults to the directory name at init)
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Points allocated to each new part
    #[serde(default = "default_points")]
    pub default_points: u32,
    #[serde(default = "default_warn_percent")]
    pub warn_percent: u8,
    #[serde(default = "default_critical_percent")]
    pub critical_percent: u8,
}

fn default_points() -> u32 {
    25
}

fn default_warn_percent() -> u8 {
    80
}

fn default_critical_percent() -> u8 {
    90
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_points: default_points(),
            warn_percent: default_warn_percent(),
            critical_percent: default_critical_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Per-task deadline when neither the phase nor the worker sets one
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Attempts per task before a timeout becomes a hard failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Maximum knowledge references handed to a worker
    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: usize,
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_knowledge_limit() -> usize {
    5
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: default_task_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            knowledge_limit: default_knowledge_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesConfig {
    /// How long a validator role may take before it counts as FAIL
    #[serde(default = "default_validator_timeout_secs")]
    pub validator_timeout_secs: u64,
    #[serde(default)]
    pub definitions: Vec<GateDefinition>,
}

fn default_validator_timeout_secs() -> u64 {
    120
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            validator_timeout_secs: default_validator_timeout_secs(),
            definitions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Rollback cycles through one phase before escalation
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    #[serde(default = "default_targeted_from")]
    pub targeted_from: PhaseKind,
    #[serde(default = "default_targeted_to")]
    pub targeted_to: PhaseKind,
    #[serde(default = "default_major_reset_to")]
    pub major_reset_to: PhaseKind,
    /// Scope violations within one part before escalation
    #[serde(default = "default_scope_incident_limit")]
    pub scope_incident_limit: u32,
}

fn default_max_cycles() -> u32 {
    3
}

fn default_targeted_from() -> PhaseKind {
    PhaseKind::Plan
}

fn default_targeted_to() -> PhaseKind {
    PhaseKind::Verify
}

fn default_major_reset_to() -> PhaseKind {
    PhaseKind::Research
}

fn default_scope_incident_limit() -> u32 {
    3
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            targeted_from: default_targeted_from(),
            targeted_to: default_targeted_to(),
            major_reset_to: default_major_reset_to(),
            scope_incident_limit: default_scope_incident_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticityConfig {
    /// Additional case-insensitive regexes that mark content as placeholder
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

fn default_concurrency() -> usize {
    1
}

/// A worker role and how to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub role: String,
    /// Accepted task types; empty accepts all
    #[serde(default)]
    pub task_types: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Shell command run per task, JSON request on stdin, JSON response on stdout
    #[serde(default)]
    pub command: Option<String>,
    /// Overrides the phase deadline for this role
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub role: String,
    pub command: String,
}

/// Override settings for phases whose slug matches a glob pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_complexity: Option<u32>,
    #[serde(default)]
    pub fan_out: Option<bool>,
}

/// A statically configured task for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub phase: PhaseKind,
    #[serde(flatten)]
    pub spec: TaskSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesConfig {
    /// Keyed by glob over phase slugs, e.g. `"impl*"` or `"*-validation"`
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

/// Root of `phasegate.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasegateToml {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub authenticity: AuthenticityConfig,
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub phases: PhasesConfig,
}

impl PhasegateToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasegate.toml")
    }

    /// Load `phasegate.toml` from the state directory, or defaults if absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize phasegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// A starter configuration with the stock worker roles.
    pub fn starter() -> Self {
        let worker = |role: &str, concurrency: usize, task_types: &[&str]| WorkerConfig {
            role: role.to_string(),
            task_types: task_types.iter().map(|t| t.to_string()).collect(),
            concurrency,
            command: None,
            timeout_secs: None,
        };
        Self {
            workers: vec![
                worker("research", 3, &["research", "analysis", "knowledge_synthesis"]),
                worker("codebase_analyzer", 2, &["analysis", "validation", "risk_assessment"]),
                worker("frontend", 2, &["development", "coding", "implementation"]),
                worker("backend", 2, &["development", "coding", "implementation"]),
            ],
            ..Self::default()
        }
    }

    /// Effective rules for a phase after applying matching overrides in key order.
    pub fn phase_rules(&self, kind: PhaseKind) -> PhaseRules {
        let mut rules = kind.default_rules();
        for (pattern, o) in &self.phases.overrides {
            if !pattern_matches(pattern, kind.slug()) {
                continue;
            }
            if let Some(secs) = o.timeout_secs {
                rules.timeout = Duration::from_secs(secs);
            }
            if let Some(max) = o.max_complexity {
                rules.max_complexity = max;
            }
            if let Some(fan_out) = o.fan_out {
                rules.fan_out = fan_out;
            }
        }
        rules
    }

    pub fn gates_for(&self, kind: PhaseKind) -> Vec<GateDefinition> {
        self.gates
            .definitions
            .iter()
            .filter(|g| g.phase == kind)
            .cloned()
            .collect()
    }

    pub fn tasks_for(&self, kind: PhaseKind) -> Vec<TaskSpec> {
        self.phases
            .tasks
            .iter()
            .filter(|t| t.phase == kind)
            .map(|t| t.spec.clone())
            .collect()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.budget.warn_percent > self.budget.critical_percent {
            warnings.push(format!(
                "budget.warn_percent ({}) is above budget.critical_percent ({})",
                self.budget.warn_percent, self.budget.critical_percent
            ));
        }
        if self.delegation.max_attempts == 0 {
            warnings.push("delegation.max_attempts is 0; no task would ever be dispatched".into());
        }
        if self.rollback.max_cycles == 0 {
            warnings.push("rollback.max_cycles is 0; every rollback escalates immediately".into());
        }
        if self.rollback.targeted_from > self.rollback.targeted_to {
            warnings.push(format!(
                "rollback.targeted_from ({}) is after rollback.targeted_to ({})",
                self.rollback.targeted_from, self.rollback.targeted_to
            ));
        }

        let mut roles = HashSet::new();
        for w in &self.workers {
            if !roles.insert(w.role.as_str()) {
                warnings.push(format!("Worker role '{}' is declared more than once", w.role));
            }
            if w.concurrency == 0 {
                warnings.push(format!("Worker role '{}' has concurrency 0", w.role));
            }
        }

        let validator_roles: HashSet<&str> = self.validators.iter().map(|v| v.role.as_str()).collect();
        for gate in &self.gates.definitions {
            if gate.validators.is_empty() && gate.rule != GateRule::Completeness {
                warnings.push(format!("Gate '{}' lists no validators", gate.name));
            }
            if gate.rule == GateRule::DualApproval && gate.validators.len() != 2 {
                warnings.push(format!(
                    "Gate '{}' uses dual_approval but lists {} validators",
                    gate.name,
                    gate.validators.len()
                ));
            }
            for role in &gate.validators {
                if !validator_roles.contains(role.as_str()) {
                    warnings.push(format!(
                        "Gate '{}' references undeclared validator '{}'",
                        gate.name, role
                    ));
                }
            }
        }

        for pattern in self.phases.overrides.keys() {
            if glob::Pattern::new(pattern).is_err() {
                warnings.push(format!("Invalid phase override pattern '{}'", pattern));
            } else if !PhaseKind::ALL.iter().any(|k| pattern_matches(pattern, k.slug())) {
                warnings.push(format!("Phase override pattern '{}' matches no phase", pattern));
            }
        }

        for t in &self.phases.tasks {
            let rules = self.phase_rules(t.phase);
            if !rules.accepts_task_type(&t.spec.task_type) {
                warnings.push(format!(
                    "Task '{}' has type '{}' not allowed in {}",
                    t.spec.key, t.spec.task_type, t.phase
                ));
            }
            if t.spec.complexity > rules.max_complexity {
                warnings.push(format!(
                    "Task '{}' complexity {} exceeds the {} maximum of {}",
                    t.spec.key, t.spec.complexity, t.phase, rules.max_complexity
                ));
            }
            if !roles.contains(t.spec.role.as_str()) {
                warnings.push(format!(
                    "Task '{}' targets undeclared worker role '{}'",
                    t.spec.key, t.spec.role
                ));
            }
            if t.spec.trace.is_empty() {
                warnings.push(format!(
                    "Task '{}' traces to no requirement line and will need authorization",
                    t.spec.key
                ));
            }
        }

        warnings
    }
}

/// Case-insensitive glob match of a phase slug.
pub fn pattern_matches(pattern: &str, slug: &str) -> bool {
    glob::Pattern::new(&pattern.to_lowercase())
        .map(|p| p.matches(&slug.to_lowercase()))
        .unwrap_or(false)
}

/// Resolved runtime configuration: file settings plus project paths.
#[derive(Debug, Clone)]
pub struct PhasegateConfig {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub toml: PhasegateToml,
}

impl PhasegateConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);
        let toml = PhasegateToml::load_or_default(&state_dir)?;
        Ok(Self {
            project_dir,
            state_dir,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn roadmap_file(&self) -> PathBuf {
        self.state_dir.join("roadmap.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("roadmap.lock")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.jsonl")
    }

    pub fn knowledge_file(&self) -> PathBuf {
        self.state_dir.join("knowledge.jsonl")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.state_dir.join("audit")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn is_initialized(&self) -> bool {
        self.roadmap_file().exists()
    }
}
