//! Configuration view and validation commands: `phasegate config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use phasegate::config::{CONFIG_FILE, PhasegateToml};
    use phasegate::init::get_state_dir;
    use phasegate::phase::PhaseKind;

    let state_dir = get_state_dir(project_dir);
    let config_path = state_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Phasegate Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                PhasegateToml::load(&config_path)?
            } else {
                println!("No phasegate.toml found at {}; using defaults.", config_path.display());
                PhasegateToml::default()
            };
            println!();

            if let Some(name) = &toml.project.name {
                println!("[project]");
                println!("  name = \"{}\"", name);
                println!();
            }

            println!("[budget]");
            println!("  default_points = {}", toml.budget.default_points);
            println!("  warn_percent = {}", toml.budget.warn_percent);
            println!("  critical_percent = {}", toml.budget.critical_percent);
            println!();

            println!("[delegation]");
            println!("  task_timeout_secs = {}", toml.delegation.task_timeout_secs);
            println!("  max_attempts = {}", toml.delegation.max_attempts);
            println!("  backoff_base_ms = {}", toml.delegation.backoff_base_ms);
            println!("  backoff_max_ms = {}", toml.delegation.backoff_max_ms);
            println!("  knowledge_limit = {}", toml.delegation.knowledge_limit);
            println!();

            println!("[rollback]");
            println!("  max_cycles = {}", toml.rollback.max_cycles);
            println!(
                "  targeted rework = {} through {}",
                toml.rollback.targeted_from, toml.rollback.targeted_to
            );
            println!("  major rework resets to {}", toml.rollback.major_reset_to);
            println!("  scope_incident_limit = {}", toml.rollback.scope_incident_limit);
            println!();

            if !toml.workers.is_empty() {
                println!("Workers:");
                for w in &toml.workers {
                    println!(
                        "  {:<18} x{}  [{}]  {}",
                        w.role,
                        w.concurrency,
                        w.task_types.join(", "),
                        w.command.as_deref().unwrap_or("(no command)")
                    );
                }
                println!();
            }
            if !toml.validators.is_empty() {
                println!("Validators:");
                for v in &toml.validators {
                    println!("  {:<18} {}", v.role, v.command);
                }
                println!();
            }

            println!("Effective phase rules:");
            for kind in PhaseKind::ALL {
                let rules = toml.phase_rules(kind);
                let gates: Vec<String> = toml
                    .gates_for(kind)
                    .iter()
                    .map(|g| format!("{} ({})", g.name, g.rule))
                    .collect();
                println!(
                    "  {:<28} timeout {:>6}s  max complexity {:>3}  {}  gates: {}",
                    kind.to_string(),
                    rules.timeout.as_secs(),
                    rules.max_complexity,
                    if rules.fan_out { "fan-out" } else { "serial " },
                    if gates.is_empty() { "completeness".to_string() } else { gates.join(", ") }
                );
            }
            println!();
            println!("Configured tasks: {}", toml.phases.tasks.len());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No phasegate.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = PhasegateToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("phasegate.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !state_dir.exists() {
                std::fs::create_dir_all(&state_dir)?;
            }

            PhasegateToml::starter().save(&config_path)?;

            println!("Created phasegate.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [[workers]] role, task_types, concurrency, command");
            println!("  - [[validators]] and [[gates.definitions]] for phase gates");
            println!("  - [phases.overrides.\"pattern-*\"] for phase-specific settings");
            println!("  - [[phases.tasks]] for the tasks each phase dispatches");
            println!();
        }
    }

    Ok(())
}
