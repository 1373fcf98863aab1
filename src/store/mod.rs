//! Persistence: sources and their relationships, panel rows, and transcript blobs.
//!
//! The pipeline only sees the traits here. SQLite and in-memory backends
//! implement the row stores; blobs go to the local filesystem or memory.

mod blob;
mod memory;
mod sqlite;

pub use blob::{validate_key, LocalBlobStore, MemoryBlobStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{PanelistError, Result};
use crate::models::{PanelAudio, PanelDiscussion, PanelTranscript, WebSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of edge between two stored sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Same story at another outlet, discovered through feed summary links.
    LinkedNewsItems,
    /// Collection to member.
    ParentChildLink,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::LinkedNewsItems => "linked_news_items",
            RelationKind::ParentChildLink => "parent_child_link",
        }
    }
}

impl std::str::FromStr for RelationKind {
    type Err = PanelistError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linked_news_items" => Ok(RelationKind::LinkedNewsItems),
            "parent_child_link" => Ok(RelationKind::ParentChildLink),
            other => Err(PanelistError::Storage(format!("Unknown relation kind: {}", other))),
        }
    }
}

/// An edge as seen from one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRelation {
    pub source_id: Uuid,
    pub related_id: Uuid,
    pub kind: RelationKind,
}

/// Sources keyed by original URL.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Insert or update by `original_url`. Returns the stored row id, which is
    /// the id of the first insert for that URL.
    async fn upsert(&self, source: &WebSource) -> Result<Uuid>;

    async fn exists(&self, url: &str) -> Result<bool>;

    async fn load(&self, url: &str) -> Result<Option<WebSource>>;

    /// A resolved source with the same content hash, if one is stored.
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<WebSource>>;

    /// Record a relationship. Returns false if it already existed in either direction.
    async fn link(&self, a: Uuid, b: Uuid, kind: RelationKind) -> Result<bool>;

    /// Every relationship touching `id`, with `id` as `source_id`.
    async fn related(&self, id: Uuid) -> Result<Vec<SourceRelation>>;
}

/// Panel, transcript and audio rows.
#[async_trait]
pub trait PanelStore: Send + Sync {
    async fn upsert_panel(&self, panel: &PanelDiscussion) -> Result<()>;

    async fn get_panel(&self, id: &str) -> Result<Option<PanelDiscussion>>;

    async fn upsert_transcript(&self, transcript: &PanelTranscript) -> Result<()>;

    async fn get_transcript(&self, id: Uuid) -> Result<Option<PanelTranscript>>;

    /// All transcripts of a panel, newest first.
    async fn list_transcripts(&self, panel_id: &str) -> Result<Vec<PanelTranscript>>;

    /// Up to `limit` finished transcripts of a panel in `language`, newest first.
    async fn recent_done(&self, panel_id: &str, language: &str, limit: usize) -> Result<Vec<PanelTranscript>>;

    /// Transcripts whose parent is `parent_id`, newest first.
    async fn children(&self, parent_id: Uuid) -> Result<Vec<PanelTranscript>>;

    /// Transcripts carrying a cron expression.
    async fn cron_transcripts(&self) -> Result<Vec<PanelTranscript>>;

    async fn upsert_audio(&self, audio: &PanelAudio) -> Result<()>;

    async fn audio_for_transcript(&self, transcript_id: Uuid) -> Result<Vec<PanelAudio>>;
}

/// Object storage for transcript files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.get(bucket, key).await?.is_some())
    }
}

pub(crate) fn lock_error(e: impl std::fmt::Display) -> PanelistError {
    PanelistError::Storage(format!("Failed to acquire lock: {}", e))
}
