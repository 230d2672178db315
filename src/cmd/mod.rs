//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                          |
//! |-------------|-------------------------------------------|
//! | `project`   | `Init`                                    |
//! | `run`       | `Run`                                     |
//! | `status`    | `Status`, `History`, `Gates`, `Audit`     |
//! | `authorize` | `Authorize`, `Clarify`, `Revert`          |
//! | `config`    | `Config`                                  |

pub mod authorize;
pub mod config;
pub mod project;
pub mod run;
pub mod status;

pub use authorize::{cmd_authorize, cmd_clarify, cmd_revert};
pub use config::cmd_config;
pub use project::cmd_init;
pub use run::cmd_run;
pub use status::{cmd_audit, cmd_gates, cmd_history, cmd_status, cmd_tasks};

use anyhow::Result;
use std::path::Path;

pub fn check_initialized(project_dir: &Path) -> Result<()> {
    if !phasegate::init::is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'phasegate init --requirement <text>' first.");
    }
    Ok(())
}
