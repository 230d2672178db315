//! Read-only reports: status, history, tasks, gates and audit.
//!
//! These read the roadmap without taking the orchestrator lock, so they work
//! while `phasegate run` is in progress.

use anyhow::{Result, bail};
use std::path::Path;

use phasegate::audit::AuditLogger;
use phasegate::init::get_state_dir;
use phasegate::model::{PartId, PhaseStatus};
use phasegate::orchestrator::{Roadmap, RoadmapStore, StateManager, TaskMetrics};
use phasegate::phase::PhaseKind;

use super::super::AuditCommands;
use super::check_initialized;

fn load(project_dir: &Path) -> Result<Roadmap> {
    check_initialized(project_dir)?;
    Ok(RoadmapStore::peek(&get_state_dir(project_dir))?)
}

fn selected(roadmap: &Roadmap, part: Option<PartId>) -> Result<Vec<PartId>> {
    match part {
        Some(id) => {
            roadmap.part(id)?;
            Ok(vec![id])
        }
        None => Ok(roadmap.part_ids()),
    }
}

fn metrics_line(m: &TaskMetrics) -> String {
    let mut line = format!(
        "{} dispatched, {} completed, {} failed ({:.0}% success)",
        m.dispatched,
        m.completed,
        m.failed,
        m.success_rate() * 100.0
    );
    for (count, label) in [
        (m.partial, "partial"),
        (m.cancelled, "cancelled"),
        (m.needs_input, "awaiting input"),
        (m.reused, "reused"),
        (m.blocked, "blocked"),
    ] {
        if count > 0 {
            line.push_str(&format!(", {count} {label}"));
        }
    }
    line
}

fn phase_marker(status: PhaseStatus) -> console::StyledObject<&'static str> {
    match status {
        PhaseStatus::Pending => console::style("·").dim(),
        PhaseStatus::Active => console::style("▶").cyan(),
        PhaseStatus::Passed => console::style("✓").green(),
        PhaseStatus::Failed {
            restart_required: true,
        } => console::style("↻").yellow(),
        PhaseStatus::Failed { .. } => console::style("✗").red(),
    }
}

pub fn cmd_status(project_dir: &Path, part: Option<PartId>) -> Result<()> {
    let roadmap = load(project_dir)?;

    println!();
    println!("Phasegate Project Status");
    println!("========================");
    println!();
    println!("Project:     {}", roadmap.project.name);
    if let Some(requirement) = roadmap.project.requirement() {
        println!(
            "Requirement: {} scope entries, locked {} (sha256 {})",
            roadmap.project.scope().entries().len(),
            requirement.locked_at.format("%Y-%m-%d %H:%M:%S"),
            &requirement.digest[..12]
        );
    }
    println!(
        "Roadmap:     version {}, updated {}",
        roadmap.version,
        roadmap.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("Authorizations: {}", roadmap.project.authorizations().len());

    for id in selected(&roadmap, part)? {
        let p = roadmap.part(id)?;
        println!();
        println!(
            "{} {}: {} at {}",
            console::style(id).bold(),
            p.name,
            p.status(),
            p.current_phase()
        );

        let phases: Vec<String> = PhaseKind::ALL
            .iter()
            .map(|k| format!("{}{}", phase_marker(p.phase(*k).status()), k.ordinal()))
            .collect();
        println!("  Phases: {}", phases.join(" "));

        if let Some(budget) = roadmap.budget.status(id) {
            println!(
                "  Budget: {}/{} ({:.0}%) {}",
                budget.consumed, budget.total, budget.percent, budget.level
            );
            let overrides = roadmap.budget.overrides(id);
            if !overrides.is_empty() {
                let points: u32 = overrides.iter().map(|o| o.points).sum();
                println!("          {} point(s) over allocation under {} override(s)", points, overrides.len());
            }
        }

        let metrics = roadmap.task_metrics(id)?;
        if metrics != TaskMetrics::default() {
            println!("  Tasks:  {}", metrics_line(&metrics));
        }

        let cycles: Vec<String> = p
            .phases
            .iter()
            .filter(|r| r.rollback_cycles > 0)
            .map(|r| format!("{} x{}", r.kind, r.rollback_cycles))
            .collect();
        if !cycles.is_empty() {
            println!("  Rollback cycles: {}", cycles.join(", "));
        }
        let incidents = roadmap.scope_incidents(id);
        if incidents > 0 {
            println!("  Scope incidents: {}", incidents);
        }
        if let Some(rework) = &p.rework {
            println!(
                "  Rework requested by gate '{}' at {} ({} fix(es))",
                rework.gate,
                rework.origin,
                rework.fixes.len()
            );
        }
        if let Some(halt) = &p.pending_halt {
            println!("  {} {}", console::style("Halt:").yellow().bold(), halt);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_history(project_dir: &Path, part: Option<PartId>, limit: usize) -> Result<()> {
    check_initialized(project_dir)?;
    let state = StateManager::new(get_state_dir(project_dir).join("state.jsonl"));
    let entries = match part {
        Some(id) => state.entries_for(id)?,
        None => state.entries()?,
    };

    println!();
    if entries.is_empty() {
        println!("No transitions recorded yet. Run 'phasegate run' to start execution.");
        println!();
        return Ok(());
    }

    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!(
            "{}  {}  {:<22} {:<24} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.part,
            entry.phase.to_string(),
            entry.status.to_string(),
            entry.note
        );
    }
    if skip > 0 {
        println!();
        println!("({} earlier transition(s) not shown; use -n to see more)", skip);
    }
    println!();
    Ok(())
}

pub fn cmd_tasks(project_dir: &Path, part: Option<PartId>, limit: usize) -> Result<()> {
    let roadmap = load(project_dir)?;

    println!();
    for id in selected(&roadmap, part)? {
        let p = roadmap.part(id)?;
        println!("{} {}", console::style(id).bold(), p.name);
        let history = roadmap.task_history(id, limit)?;
        if history.is_empty() {
            println!("  No tasks planned yet.");
            println!();
            continue;
        }

        for (phase, metrics) in roadmap.phase_task_metrics(id)? {
            println!("  {:<28} {}", phase.to_string(), metrics_line(&metrics));
        }
        println!();

        for entry in &history {
            let record = entry.record;
            let (when, status) = match &record.result {
                Some(result) => (
                    result.finished_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    result.status.as_str(),
                ),
                None => ("-".to_string(), "not dispatched"),
            };
            let mut flags = Vec::new();
            if record.reused {
                flags.push("reused");
            }
            if entry.discarded {
                flags.push("discarded");
            }
            if record.result.as_ref().is_some_and(|r| r.missing_inputs().is_some()) {
                flags.push("needs input");
            }
            println!(
                "  {:<19}  {} #{}  {:<20} {:<12} {:<15} {}",
                when,
                entry.phase.slug(),
                entry.attempt,
                record.task.key,
                record.task.role,
                status,
                flags.join(", ")
            );
        }
        println!();
    }
    Ok(())
}

pub fn cmd_gates(project_dir: &Path, part: Option<PartId>) -> Result<()> {
    let roadmap = load(project_dir)?;

    println!();
    let mut shown = 0;
    for id in selected(&roadmap, part)? {
        for record in roadmap.gates_for(id) {
            let v = &record.verdict;
            let action = if v.is_pass() {
                console::style(v.action.to_string()).green()
            } else {
                console::style(v.action.to_string()).red()
            };
            println!(
                "{}  {}  {} attempt {}  gate '{}' ({})  -> {}",
                v.evaluated_at.format("%Y-%m-%d %H:%M:%S"),
                record.part,
                v.phase,
                v.attempt,
                v.gate,
                v.rule,
                action
            );
            for role in &v.verdicts {
                println!("    {:<16} {}  {}", role.role, role.verdict, role.rationale);
                for fix in &role.required_fixes {
                    println!("      - {}", fix);
                }
            }
            shown += 1;
        }
    }
    if shown == 0 {
        println!("No gate evaluations recorded yet.");
    }
    println!();
    Ok(())
}

pub fn cmd_audit(project_dir: &Path, command: Option<AuditCommands>) -> Result<()> {
    check_initialized(project_dir)?;
    let logger = AuditLogger::new(&get_state_dir(project_dir).join("audit"));
    let runs = logger.list_runs()?;

    match command {
        None | Some(AuditCommands::List) => {
            println!();
            if runs.is_empty() {
                println!("No audit runs recorded yet.");
            }
            for path in &runs {
                let run = logger.load_run(path)?;
                println!(
                    "{}  {}  {:>3} event(s)  {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.part,
                    run.events.len(),
                    run.outcome.as_deref().unwrap_or("(unfinished)")
                );
            }
            println!();
        }
        Some(AuditCommands::Show { run }) => {
            let path = match run {
                Some(path) => path,
                None => match runs.first() {
                    Some(path) => path.clone(),
                    None => bail!("No audit runs recorded yet"),
                },
            };
            let run = logger.load_run(&path)?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
    }
    Ok(())
}
