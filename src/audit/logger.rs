use super::{AuditEntry, AuditEvent, AuditRun};
use crate::model::PartId;
use crate::util::write_atomic;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

pub struct AuditLogger {
    audit_dir: PathBuf,
    current_run: Option<AuditRun>,
    current_run_file: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, part: PartId) -> Result<()> {
        self.current_run = Some(AuditRun::new(part));
        self.save_current()
    }

    /// Append an event to the current run and flush it.
    ///
    /// Returns an error if no run is active, so events are never dropped
    /// silently.
    pub fn record(&mut self, event: AuditEvent) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("record called with no active run"))?;
        run.events.push(AuditEntry { at: Utc::now(), event });
        self.save_current()
    }

    pub fn finish_run(&mut self, outcome: &str) -> Result<PathBuf> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;

        run.finish(outcome);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S%.3f"),
            &run.run_id.to_string()[..8]
        );
        let runs_dir = self.audit_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create audit runs directory")?;
        let run_file = runs_dir.join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize audit run")?;
        write_atomic(&run_file, json.as_bytes()).context("Failed to write audit run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            let json = serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::create_dir_all(&self.audit_dir).context("Failed to create audit directory")?;
            write_atomic(&self.current_run_file, json.as_bytes()).context("Failed to write current run file")?;
        }
        Ok(())
    }

    /// Pick up a run left behind by an interrupted process.
    pub fn load_current(&mut self) -> Result<bool> {
        if self.current_run_file.exists() {
            let content = fs::read_to_string(&self.current_run_file).context("Failed to read current run file")?;
            let run: AuditRun = serde_json::from_str(&content).context("Failed to parse current run file")?;
            self.current_run = Some(run);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn current_run(&self) -> Option<&AuditRun> {
        self.current_run.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current_run.is_some()
    }

    /// Finished runs, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun> {
        let content = fs::read_to_string(path).context("Failed to read audit run file")?;
        let run: AuditRun = serde_json::from_str(&content).context("Failed to parse audit run file")?;
        Ok(run)
    }
}
