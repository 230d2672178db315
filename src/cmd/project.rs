//! Project initialization: `phasegate init`.

use anyhow::{Context, Result, bail};
use std::path::Path;

pub fn cmd_init(
    project_dir: &Path,
    name: Option<String>,
    requirement: Option<String>,
    requirement_file: Option<&Path>,
    parts: Vec<String>,
    budget: Option<u32>,
) -> Result<()> {
    use phasegate::init::{InitOptions, init_project};

    let requirement = match (requirement, requirement_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read requirement file: {}", path.display()))?,
        (None, None) => bail!("Provide the original requirement with --requirement or --requirement-file"),
    };
    let name = match name {
        Some(name) => name,
        None => project_dir
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "project".to_string()),
    };

    let result = init_project(
        project_dir,
        InitOptions {
            name: name.clone(),
            requirement,
            parts,
            budget,
        },
    )?;

    println!("Initialized phasegate project '{}' at {}", name, result.state_dir.display());
    println!();
    println!("Created:");
    println!("  .phasegate/");
    if result.wrote_config {
        println!("  ├── phasegate.toml   # Workers, validators, gates, tasks (starter)");
    } else {
        println!("  ├── phasegate.toml   # Kept existing configuration");
    }
    println!("  ├── roadmap.json     # Locked requirement and {} part(s)", result.parts.len());
    println!("  ├── audit/runs/      # Audit trail");
    println!("  └── logs/            # Log files");
    println!();
    println!("Next steps:");
    println!("  1. Configure worker and validator commands in phasegate.toml");
    println!("  2. Run `phasegate run` to start execution");

    Ok(())
}
