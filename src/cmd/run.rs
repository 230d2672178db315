//! Phase orchestration: `phasegate run`.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use phasegate::config::PhasegateConfig;
use phasegate::delegate::{ProcessValidator, ProcessWorker};
use phasegate::errors::HaltCause;
use phasegate::gates::ValidationGateCoordinator;
use phasegate::knowledge::KnowledgeStore;
use phasegate::model::PartId;
use phasegate::orchestrator::{Collaborators, PhaseOutcome, PhaseStateMachine, StaticPlanner};
use phasegate::registry::{WorkerDescriptor, WorkerRegistry};
use tracing::warn;

use super::check_initialized;

/// Shell-command workers and validators from `phasegate.toml`.
pub fn collaborators(config: &PhasegateConfig) -> Result<Collaborators> {
    let mut registry = WorkerRegistry::new();
    for worker in &config.toml.workers {
        let Some(command) = &worker.command else {
            warn!(role = %worker.role, "worker role has no command; not registered");
            continue;
        };
        let descriptor = WorkerDescriptor {
            role: worker.role.clone(),
            task_types: worker.task_types.clone(),
            concurrency: worker.concurrency,
            timeout_secs: worker.timeout_secs,
        };
        registry.register(
            descriptor,
            Arc::new(ProcessWorker::new(&worker.role, command, &config.project_dir)),
        )?;
    }

    let mut validators =
        ValidationGateCoordinator::new(Duration::from_secs(config.toml.gates.validator_timeout_secs));
    for validator in &config.toml.validators {
        validators.register(
            &validator.role,
            Arc::new(ProcessValidator::new(&validator.role, &validator.command, &config.project_dir)),
        );
    }

    let knowledge = KnowledgeStore::open(&config.knowledge_file(), config.toml.delegation.knowledge_limit)?;
    Ok(Collaborators {
        registry,
        validators,
        knowledge: Arc::new(knowledge),
        planner: Box::new(StaticPlanner::from_config(&config.toml)),
    })
}

pub fn open_machine(project_dir: &Path) -> Result<PhaseStateMachine> {
    check_initialized(project_dir)?;
    let config = PhasegateConfig::new(project_dir.to_path_buf())?;
    Ok(PhaseStateMachine::open(&config, collaborators(&config)?)?)
}

pub async fn cmd_run(project_dir: &Path, part: Option<PartId>, step: bool) -> Result<()> {
    let mut machine = open_machine(project_dir)?;
    let parts = match part {
        Some(id) => vec![id],
        None => machine.roadmap().part_ids(),
    };

    println!();
    for id in parts {
        let name = machine.roadmap().part(id)?.name.clone();
        let outcome = if step {
            machine.advance(id).await?
        } else {
            machine.run(id).await?
        };
        print_outcome(id, &name, &outcome);
    }
    println!();
    Ok(())
}

fn print_outcome(id: PartId, name: &str, outcome: &PhaseOutcome) {
    let label = match outcome {
        PhaseOutcome::Completed => console::style("completed").green().bold(),
        PhaseOutcome::Advanced { .. } => console::style("advanced").green(),
        PhaseOutcome::RestartRequired { .. } | PhaseOutcome::RolledBack { .. } => {
            console::style("reworking").yellow()
        }
        PhaseOutcome::Halted { .. } => console::style("halted").yellow().bold(),
        PhaseOutcome::Escalate { .. } => console::style("escalated").red().bold(),
    };
    println!("{} {}: {} ({})", id, name, label, outcome);
    if let Some(report) = outcome.report()
        && outcome.is_terminal()
    {
        let part = id.0;
        match &report.cause {
            HaltCause::ScopeViolation { task, .. } => {
                println!("  Authorize: phasegate authorize scope --part {part} --task {task} --id <id> --by <name>");
                println!("  Or revert: phasegate revert --part {part}");
            }
            HaltCause::BudgetExceeded { .. } => {
                println!("  Authorize: phasegate authorize budget --part {part} --id <id> --by <name>");
            }
            HaltCause::InformationGap { .. } => {
                println!("  Clarify:   phasegate clarify --part {part} --text <answer>");
            }
            HaltCause::EscalationRequired { .. } => {
                println!("  Resolve:   phasegate authorize escalation --part {part} --id <id> --by <name>");
            }
            _ => {}
        }
    }
}
