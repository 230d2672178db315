//! Knowledge repository contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An immutable named artifact. Newer artifacts supersede older ones; nothing
/// is overwritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArtifact {
    pub id: Uuid,
    pub producer: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeArtifact {
    pub fn new(producer: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            producer: producer.into(),
            content: content.into(),
            tags,
            supersedes: None,
            created_at: Utc::now(),
        }
    }

    pub fn superseding(mut self, previous: Uuid) -> Self {
        self.supersedes = Some(previous);
        self
    }

    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            id: self.id,
            producer: self.producer.clone(),
            tags: self.tags.clone(),
            summary: summarize(&self.content),
        }
    }
}

/// Lightweight pointer to an artifact, handed to workers as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: Uuid,
    pub producer: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

const SUMMARY_CHARS: usize = 160;

fn summarize(content: &str) -> String {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first_line.chars().count() <= SUMMARY_CHARS {
        first_line.trim().to_string()
    } else {
        let cut: String = first_line.chars().take(SUMMARY_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Read/write store of knowledge artifacts.
///
/// `search` may legitimately return nothing. `contribute` appends and must
/// reject an artifact whose id already exists.
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    async fn search(&self, role: &str, task_description: &str) -> anyhow::Result<Vec<ArtifactRef>>;

    async fn contribute(&self, artifact: KnowledgeArtifact) -> anyhow::Result<ArtifactRef>;
}
