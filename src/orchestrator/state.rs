use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use crate::model::{PartId, PartStatus};
use crate::phase::PhaseKind;

/// One line of `state.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub part: PartId,
    pub phase: PhaseKind,
    pub status: PartStatus,
    #[serde(default)]
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only trail of part transitions, one JSON object per line.
pub struct StateManager {
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn append(&self, entry: &StateEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize state entry")?;
        line.push('\n');

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(line.as_bytes())
            .context("Failed to write state entry")?;

        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("Malformed state entry on line {}", i + 1))
            })
            .collect()
    }

    pub fn entries_for(&self, part: PartId) -> Result<Vec<StateEntry>> {
        Ok(self.entries()?.into_iter().filter(|e| e.part == part).collect())
    }

    /// Last recorded entry for a part.
    pub fn last_for(&self, part: PartId) -> Result<Option<StateEntry>> {
        Ok(self.entries_for(part)?.pop())
    }
}
