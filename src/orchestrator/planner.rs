use anyhow::Result;

use crate::config::{PhasegateToml, TaskTemplate};
use crate::model::{LockedRequirement, PartId, TaskSpec};
use crate::phase::PhaseKind;

/// What a planner knows when asked for a phase's tasks.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub part: PartId,
    pub part_name: &'a str,
    pub phase: PhaseKind,
    /// Attempt number about to start, 1-based.
    pub attempt: u32,
    pub requirement: &'a LockedRequirement,
    /// Fixes requested by the gate that sent the part back, if any.
    pub feedback: &'a [String],
}

/// Produces the tasks for one phase attempt.
///
/// Planning is deterministic for a given context: identical inputs yield
/// identical task fingerprints, which is what makes result reuse possible.
pub trait TaskPlanner: Send + Sync {
    fn plan(&self, ctx: &PlanContext<'_>) -> Result<Vec<TaskSpec>>;
}

impl<F> TaskPlanner for F
where
    F: Fn(&PlanContext<'_>) -> Result<Vec<TaskSpec>> + Send + Sync,
{
    fn plan(&self, ctx: &PlanContext<'_>) -> Result<Vec<TaskSpec>> {
        self(ctx)
    }
}

/// Plans from the `[[phases.tasks]]` templates in `phasegate.toml`.
///
/// Gate feedback is attached to every task as extra constraints, so reworked
/// tasks get new fingerprints and are dispatched again.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    templates: Vec<TaskTemplate>,
}

impl StaticPlanner {
    pub fn new(templates: Vec<TaskTemplate>) -> Self {
        Self { templates }
    }

    pub fn from_config(config: &PhasegateToml) -> Self {
        Self::new(config.phases.tasks.clone())
    }
}

impl TaskPlanner for StaticPlanner {
    fn plan(&self, ctx: &PlanContext<'_>) -> Result<Vec<TaskSpec>> {
        Ok(self
            .templates
            .iter()
            .filter(|t| t.phase == ctx.phase)
            .map(|t| {
                let mut spec = t.spec.clone();
                spec.constraints
                    .extend(ctx.feedback.iter().map(|fix| format!("Required fix: {fix}")));
                spec
            })
            .collect())
    }
}
