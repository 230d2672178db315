use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use fs2::FileExt;
use tracing::debug;

use super::roadmap::Roadmap;
use super::state::{StateEntry, StateManager};
use crate::errors::StoreError;
use crate::util::write_atomic;

const ROADMAP_FILE: &str = "roadmap.json";
const LOCK_FILE: &str = "roadmap.lock";
const STATE_FILE: &str = "state.jsonl";

/// Exclusive handle on a project's roadmap.
///
/// Holding a store holds an advisory lock on `roadmap.lock`, so at most one
/// orchestrator drives a project at a time. The lock is released on drop.
pub struct RoadmapStore {
    roadmap_file: PathBuf,
    lock_file: PathBuf,
    lock: File,
    transitions: StateManager,
}

impl RoadmapStore {
    /// Lock a state directory that may not have a roadmap yet.
    pub fn create(state_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create state directory: {}", state_dir.display()))?;
        Self::acquire(state_dir)
    }

    /// Lock an existing roadmap.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let roadmap_file = state_dir.join(ROADMAP_FILE);
        if !roadmap_file.exists() {
            return Err(StoreError::Missing { path: roadmap_file });
        }
        Self::acquire(state_dir)
    }

    fn acquire(state_dir: &Path) -> Result<Self, StoreError> {
        let lock_file = state_dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file)
            .with_context(|| format!("Failed to open lock file: {}", lock_file.display()))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked { path: lock_file });
        }
        debug!(path = %lock_file.display(), "roadmap lock acquired");
        Ok(Self {
            roadmap_file: state_dir.join(ROADMAP_FILE),
            lock_file,
            lock,
            transitions: StateManager::new(state_dir.join(STATE_FILE)),
        })
    }

    /// Read a roadmap without taking the lock, for read-only commands.
    pub fn peek(state_dir: &Path) -> Result<Roadmap, StoreError> {
        read(&state_dir.join(ROADMAP_FILE))
    }

    pub fn load(&self) -> Result<Roadmap, StoreError> {
        read(&self.roadmap_file)
    }

    /// Bump the version and write the roadmap atomically.
    pub fn save(&mut self, roadmap: &mut Roadmap) -> Result<(), StoreError> {
        roadmap.version += 1;
        roadmap.updated_at = Utc::now();
        let json = serde_json::to_string_pretty(roadmap).context("Failed to serialize roadmap")?;
        write_atomic(&self.roadmap_file, json.as_bytes())?;
        debug!(version = roadmap.version, "roadmap saved");
        Ok(())
    }

    pub fn log_transition(&self, entry: &StateEntry) -> Result<(), StoreError> {
        self.transitions.append(entry)?;
        Ok(())
    }

    pub fn transitions(&self) -> &StateManager {
        &self.transitions
    }
}

impl Drop for RoadmapStore {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock) {
            debug!(path = %self.lock_file.display(), error = %e, "failed to release roadmap lock");
        }
    }
}

fn read(path: &Path) -> Result<Roadmap, StoreError> {
    if !path.exists() {
        return Err(StoreError::Missing {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read roadmap: {}", path.display()))?;
    let mut roadmap: Roadmap = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse roadmap: {}", path.display()))?;
    roadmap.replay().context("Failed to replay roadmap transitions")?;
    Ok(roadmap)
}
