//! Lifting halts: `phasegate authorize`, `phasegate clarify`, `phasegate revert`.

use anyhow::{Context, Result, bail};
use std::path::Path;

use phasegate::model::{AuthorizationRecord, AuthorizationScope, PartId};

use super::super::{AuthorizeCommands, GrantArgs};
use super::run::open_machine;

fn record(grant: &GrantArgs, scope: AuthorizationScope) -> AuthorizationRecord {
    AuthorizationRecord::new(&grant.id, scope, &grant.granted_by).with_reason(&grant.reason)
}

pub fn cmd_authorize(project_dir: &Path, command: AuthorizeCommands) -> Result<()> {
    let mut machine = open_machine(project_dir)?;

    let part = match &command {
        AuthorizeCommands::Scope { grant, task } => {
            let scope = AuthorizationScope::Task {
                part: grant.part,
                key: task.clone(),
            };
            machine.authorize_scope(grant.part, record(grant, scope))?;
            grant.part
        }
        AuthorizeCommands::Budget { grant } => {
            let scope = AuthorizationScope::Budget { part: grant.part };
            machine.authorize_budget_override(grant.part, record(grant, scope))?;
            grant.part
        }
        AuthorizeCommands::Escalation { grant } => {
            let scope = AuthorizationScope::Escalation { part: grant.part };
            machine.resolve_escalation(grant.part, record(grant, scope))?;
            grant.part
        }
    };

    println!("Authorization recorded; {} resumed.", part);
    println!("Run `phasegate run --part {}` to continue.", part.0);
    Ok(())
}

pub async fn cmd_clarify(
    project_dir: &Path,
    part: PartId,
    text: Option<String>,
    file: Option<&Path>,
    author: &str,
) -> Result<()> {
    let text = match (text, file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read clarification file: {}", path.display()))?,
        (None, None) => bail!("Provide the clarification with --text or --file"),
    };

    let mut machine = open_machine(project_dir)?;
    let artifact = machine.provide_clarification(part, &text, author).await?;

    println!("Clarification stored as knowledge artifact {}; {} resumed.", artifact.id, part);
    println!("Run `phasegate run --part {}` to continue.", part.0);
    Ok(())
}

pub fn cmd_revert(project_dir: &Path, part: PartId) -> Result<()> {
    let mut machine = open_machine(project_dir)?;
    machine.revert_to_plan(part)?;
    let p = machine.roadmap().part(part)?;
    println!("{} is now {} at {}.", part, p.status(), p.current_phase());
    Ok(())
}
