//! Knowledge repository backed by memory and an optional append-only journal.
//!
//! Artifacts are immutable. A newer artifact supersedes an older one by
//! pointing at it; superseded artifacts stay in the journal but are never
//! returned from search.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use phasegate_common::{ArtifactRef, KnowledgeArtifact, KnowledgeRepository};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const MIN_TOKEN_LEN: usize = 3;
const ROLE_BONUS: usize = 2;
const CLARIFICATION_BONUS: usize = 3;

/// Tag carried by operator-supplied answers to an information gap.
pub const CLARIFICATION_TAG: &str = "clarification";

pub struct KnowledgeStore {
    artifacts: RwLock<Vec<KnowledgeArtifact>>,
    journal: Option<PathBuf>,
    limit: usize,
}

impl KnowledgeStore {
    pub fn in_memory(limit: usize) -> Self {
        Self {
            artifacts: RwLock::new(Vec::new()),
            journal: None,
            limit,
        }
    }

    /// Open a journal-backed store, replaying any existing artifacts.
    pub fn open(path: &Path, limit: usize) -> Result<Self> {
        let mut artifacts = Vec::new();
        if path.exists() {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open knowledge journal: {}", path.display()))?;
            for (i, line) in BufReader::new(file).lines().enumerate() {
                let line = line.context("Failed to read knowledge journal")?;
                if line.trim().is_empty() {
                    continue;
                }
                let artifact: KnowledgeArtifact = serde_json::from_str(&line)
                    .with_context(|| format!("Corrupt knowledge journal entry at line {}", i + 1))?;
                artifacts.push(artifact);
            }
        }
        Ok(Self {
            artifacts: RwLock::new(artifacts),
            journal: Some(path.to_path_buf()),
            limit,
        })
    }

    /// Contribute `artifact` as the successor of `previous`.
    pub async fn supersede(&self, previous: Uuid, artifact: KnowledgeArtifact) -> Result<ArtifactRef> {
        if !self.artifacts.read().await.iter().any(|a| a.id == previous) {
            bail!("Cannot supersede unknown artifact {}", previous);
        }
        self.contribute(artifact.superseding(previous)).await
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }

    fn append_journal(&self, artifact: &KnowledgeArtifact) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let line = serde_json::to_string(artifact).context("Failed to serialize artifact")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open knowledge journal: {}", path.display()))?;
        writeln!(file, "{}", line).context("Failed to append to knowledge journal")?;
        Ok(())
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl KnowledgeRepository for KnowledgeStore {
    async fn search(&self, role: &str, task_description: &str) -> Result<Vec<ArtifactRef>> {
        let wanted = tokens(task_description);
        let artifacts = self.artifacts.read().await;
        let superseded: HashSet<Uuid> = artifacts.iter().filter_map(|a| a.supersedes).collect();

        let mut scored: Vec<(usize, &KnowledgeArtifact)> = artifacts
            .iter()
            .filter(|a| !superseded.contains(&a.id))
            .filter_map(|a| {
                let mut have = tokens(&a.content);
                for tag in &a.tags {
                    have.extend(tokens(tag));
                }
                let overlap = wanted.intersection(&have).count();
                let for_role = a.producer == role || a.tags.iter().any(|t| t == role);
                // A clarification addressed to the role is found even when it
                // shares no words with the task.
                let clarifies = for_role && a.tags.iter().any(|t| t == CLARIFICATION_TAG);
                if overlap == 0 && !clarifies {
                    return None;
                }
                let mut score = overlap;
                if for_role {
                    score += ROLE_BONUS;
                }
                if clarifies {
                    score += CLARIFICATION_BONUS;
                }
                Some((score, a))
            })
            .collect();

        // Highest score first, newest first among equals.
        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(b.created_at.cmp(&a.created_at)));
        let refs: Vec<ArtifactRef> = scored
            .into_iter()
            .take(self.limit)
            .map(|(_, a)| a.to_ref())
            .collect();
        debug!(role, found = refs.len(), "knowledge search");
        Ok(refs)
    }

    async fn contribute(&self, artifact: KnowledgeArtifact) -> Result<ArtifactRef> {
        let mut artifacts = self.artifacts.write().await;
        if artifacts.iter().any(|a| a.id == artifact.id) {
            bail!("Artifact {} already exists; artifacts are immutable", artifact.id);
        }
        self.append_journal(&artifact)?;
        let reference = artifact.to_ref();
        debug!(id = %artifact.id, producer = %artifact.producer, "knowledge contributed");
        artifacts.push(artifact);
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact(producer: &str, content: &str, tags: &[&str]) -> KnowledgeArtifact {
        KnowledgeArtifact::new(producer, content, tags.iter().map(|t| t.to_string()).collect())
    }

    #[tokio::test]
    async fn test_search_may_be_empty() {
        let store = KnowledgeStore::in_memory(5);
        assert!(store.search("research", "payment providers").await.unwrap().is_empty());

        store.contribute(artifact("plan", "Database schema notes", &[])).await.unwrap();
        assert!(store.search("research", "payment providers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_overlap_and_role() {
        let store = KnowledgeStore::in_memory(5);
        let generic = artifact("plan", "Payment providers comparison", &[]);
        let tagged = artifact("research", "Payment gateway latency", &["research"]);
        store.contribute(generic.clone()).await.unwrap();
        store.contribute(tagged.clone()).await.unwrap();

        let refs = store.search("research", "compare payment providers").await.unwrap();
        // generic: payment + providers = 2; tagged: payment + role bonus = 3
        assert_eq!(refs[0].id, tagged.id);
        assert_eq!(refs[1].id, generic.id);
    }

    #[tokio::test]
    async fn test_clarification_found_without_shared_words() {
        let store = KnowledgeStore::in_memory(2);
        for i in 0..3 {
            store
                .contribute(artifact("plan", &format!("Confirm card processor note {i}"), &[]))
                .await
                .unwrap();
        }
        let answer = artifact("ops", "Use Stripe, id acct-42, keys in vault", &[CLARIFICATION_TAG, "research"]);
        store.contribute(answer.clone()).await.unwrap();

        let refs = store.search("research", "Confirm the card processor").await.unwrap();
        assert_eq!(refs[0].id, answer.id);

        // Only the role it was given for sees it.
        let refs = store.search("backend", "Confirm the card processor").await.unwrap();
        assert!(refs.iter().all(|r| r.id != answer.id));
    }

    #[tokio::test]
    async fn test_tags_match_word_by_word() {
        let store = KnowledgeStore::in_memory(5);
        let a = artifact("ops", "acct-42", &["card processor account"]);
        store.contribute(a.clone()).await.unwrap();
        let refs = store.search("backend", "which processor do we use").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, a.id);
    }

    #[tokio::test]
    async fn test_superseded_artifacts_are_hidden() {
        let store = KnowledgeStore::in_memory(5);
        let v1 = artifact("plan", "Checkout flow version one", &[]);
        store.contribute(v1.clone()).await.unwrap();
        let v2 = artifact("plan", "Checkout flow version two", &[]);
        store.supersede(v1.id, v2.clone()).await.unwrap();

        let refs = store.search("plan", "checkout flow").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, v2.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_contribute_is_append_only() {
        let store = KnowledgeStore::in_memory(5);
        let a = artifact("plan", "Original", &[]);
        store.contribute(a.clone()).await.unwrap();
        let mut rewrite = a.clone();
        rewrite.content = "Rewritten".into();
        assert!(store.contribute(rewrite).await.is_err());
        assert!(store.supersede(Uuid::new_v4(), artifact("plan", "x", &[])).await.is_err());
    }

    #[tokio::test]
    async fn test_limit_caps_results() {
        let store = KnowledgeStore::in_memory(2);
        for i in 0..4 {
            store
                .contribute(artifact("research", &format!("retry policy note {i}"), &[]))
                .await
                .unwrap();
        }
        assert_eq!(store.search("research", "retry policy").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_journal_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("knowledge.jsonl");
        let a = artifact("research", "Rate limits for the card API", &["api"]);
        {
            let store = KnowledgeStore::open(&path, 5).unwrap();
            store.contribute(a.clone()).await.unwrap();
        }
        let reopened = KnowledgeStore::open(&path, 5).unwrap();
        let refs = reopened.search("backend", "card api rate limits").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, a.id);
    }
}
