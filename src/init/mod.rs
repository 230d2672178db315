//! Initialization of phasegate projects.
//!
//! `phasegate init` creates the state directory and the project roadmap:
//!
//! ```text
//! .phasegate/
//! ├── phasegate.toml   # Configuration (starter written if missing)
//! ├── roadmap.json     # Project, parts, phases, budget, gate history
//! ├── state.jsonl      # One line per status transition
//! ├── knowledge.jsonl  # Append-only knowledge artifacts
//! ├── audit/           # Run logs and audit trail
//! │   └── runs/
//! └── logs/            # Rolling tracing output
//! ```

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{CONFIG_FILE, PhasegateToml};
use crate::model::{PartId, Project};
use crate::orchestrator::{Roadmap, RoadmapStore};

/// The name of the phasegate state directory.
pub const STATE_DIR: &str = ".phasegate";

/// What to create.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub name: String,
    pub requirement: String,
    /// Part names; one part named after the project when empty
    pub parts: Vec<String>,
    /// Per-part budget; falls back to `budget.default_points`
    pub budget: Option<u32>,
}

#[derive(Debug)]
pub struct InitResult {
    pub state_dir: PathBuf,
    pub parts: Vec<PartId>,
    /// Whether a starter phasegate.toml was written
    pub wrote_config: bool,
}

/// Initialize a phasegate project in `project_dir`.
///
/// Fails if a roadmap already exists: the original requirement is locked at
/// initialization and never replaced.
pub fn init_project(project_dir: &Path, options: InitOptions) -> Result<InitResult> {
    let state_dir = project_dir.join(STATE_DIR);
    let roadmap_file = state_dir.join("roadmap.json");
    if roadmap_file.exists() {
        bail!(
            "Project already initialized at {}; the original requirement is locked",
            state_dir.display()
        );
    }

    ensure_directory_structure(&state_dir)?;

    let config_path = state_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        PhasegateToml::starter().save(&config_path)?;
    }
    let config = PhasegateToml::load(&config_path)?;

    let mut project = Project::new(&options.name);
    project
        .lock_requirement(&options.requirement)
        .context("Failed to lock original requirement")?;

    let budget = options.budget.unwrap_or(config.budget.default_points);
    let names = if options.parts.is_empty() {
        vec![options.name.clone()]
    } else {
        options.parts.clone()
    };

    let mut roadmap = Roadmap::new(project, &config);
    let parts: Vec<PartId> = names.iter().map(|n| roadmap.add_part(n, budget)).collect();

    let mut store = RoadmapStore::create(&state_dir)?;
    store.save(&mut roadmap)?;
    info!(project = %options.name, parts = parts.len(), budget, "project initialized");

    Ok(InitResult {
        state_dir,
        parts,
        wrote_config,
    })
}

/// Create the state directory layout. Existing files are left untouched.
pub fn ensure_directory_structure(state_dir: &Path) -> Result<()> {
    for dir in [state_dir.join("audit").join("runs"), state_dir.join("logs")] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Check if a project has a roadmap.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STATE_DIR).join("roadmap.json").exists()
}

pub fn get_state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> InitOptions {
        InitOptions {
            name: "storefront".into(),
            requirement: "Customers can pay by card\nCustomers receive a receipt".into(),
            parts: vec![],
            budget: None,
        }
    }

    #[test]
    fn test_init_creates_layout_and_roadmap() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path(), options()).unwrap();

        assert_eq!(result.state_dir, dir.path().join(".phasegate"));
        assert!(result.wrote_config);
        assert!(result.state_dir.join("audit/runs").is_dir());
        assert!(result.state_dir.join("logs").is_dir());
        assert!(result.state_dir.join("phasegate.toml").is_file());
        assert!(is_initialized(dir.path()));
        assert_eq!(result.parts, vec![PartId(1)]);
    }

    #[test]
    fn test_init_uses_named_parts_and_budget() {
        let dir = tempdir().unwrap();
        let result = init_project(
            dir.path(),
            InitOptions {
                parts: vec!["checkout".into(), "receipts".into()],
                budget: Some(40),
                ..options()
            },
        )
        .unwrap();
        assert_eq!(result.parts, vec![PartId(1), PartId(2)]);

        let store = RoadmapStore::open(&result.state_dir).unwrap();
        let roadmap = store.load().unwrap();
        assert_eq!(roadmap.project.parts[1].name, "receipts");
        assert_eq!(roadmap.budget.status(PartId(2)).unwrap().total, 40);
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let state_dir = dir.path().join(STATE_DIR);
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join(CONFIG_FILE), "[budget]\ndefault_points = 12\n").unwrap();

        let result = init_project(dir.path(), options()).unwrap();
        assert!(!result.wrote_config);
        let roadmap = RoadmapStore::open(&result.state_dir).unwrap().load().unwrap();
        assert_eq!(roadmap.budget.status(PartId(1)).unwrap().total, 12);
        assert_eq!(
            std::fs::read_to_string(state_dir.join(CONFIG_FILE)).unwrap(),
            "[budget]\ndefault_points = 12\n"
        );
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let dir = tempdir().unwrap();
        init_project(dir.path(), options()).unwrap();
        let err = init_project(dir.path(), options()).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn test_init_rejects_empty_requirement() {
        let dir = tempdir().unwrap();
        let err = init_project(
            dir.path(),
            InitOptions {
                requirement: "   ".into(),
                ..options()
            },
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("empty"));
        assert!(!is_initialized(dir.path()));
    }

    #[test]
    fn test_get_state_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(get_state_dir(dir.path()), dir.path().join(".phasegate"));
    }
}
