//! In-memory row stores. Useful for tests and dry runs.

use super::{lock_error, PanelStore, RelationKind, SourceRelation, SourceStore};
use crate::error::Result;
use crate::models::{PanelAudio, PanelDiscussion, PanelTranscript, ProcessState, WebSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<String, WebSource>>,
    relations: RwLock<Vec<(Uuid, Uuid, RelationKind)>>,
    panels: RwLock<HashMap<String, PanelDiscussion>>,
    transcripts: RwLock<HashMap<Uuid, PanelTranscript>>,
    audio: RwLock<HashMap<Uuid, PanelAudio>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transcripts_where(&self, keep: impl Fn(&PanelTranscript) -> bool) -> Result<Vec<PanelTranscript>> {
        let rows = self.transcripts.read().map_err(lock_error)?;
        let mut out: Vec<PanelTranscript> = rows.values().filter(|t| keep(t)).cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn upsert(&self, source: &WebSource) -> Result<Uuid> {
        let mut sources = self.sources.write().map_err(lock_error)?;
        let id = sources
            .get(&source.original_url)
            .map(|existing| existing.id)
            .unwrap_or(source.id);
        let mut stored = source.clone();
        stored.id = id;
        sources.insert(source.original_url.clone(), stored);
        Ok(id)
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        Ok(self.sources.read().map_err(lock_error)?.contains_key(url))
    }

    async fn load(&self, url: &str) -> Result<Option<WebSource>> {
        Ok(self.sources.read().map_err(lock_error)?.get(url).cloned())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<WebSource>> {
        Ok(self
            .sources
            .read()
            .map_err(lock_error)?
            .values()
            .find(|s| s.is_resolved() && s.content_hash() == content_hash)
            .cloned())
    }

    async fn link(&self, a: Uuid, b: Uuid, kind: RelationKind) -> Result<bool> {
        let mut relations = self.relations.write().map_err(lock_error)?;
        let exists = relations
            .iter()
            .any(|(x, y, k)| *k == kind && ((*x == a && *y == b) || (*x == b && *y == a)));
        if exists {
            return Ok(false);
        }
        relations.push((a, b, kind));
        Ok(true)
    }

    async fn related(&self, id: Uuid) -> Result<Vec<SourceRelation>> {
        Ok(self
            .relations
            .read()
            .map_err(lock_error)?
            .iter()
            .filter_map(|(a, b, kind)| {
                let other = if *a == id {
                    *b
                } else if *b == id {
                    *a
                } else {
                    return None;
                };
                Some(SourceRelation {
                    source_id: id,
                    related_id: other,
                    kind: *kind,
                })
            })
            .collect())
    }
}

#[async_trait]
impl PanelStore for MemoryStore {
    async fn upsert_panel(&self, panel: &PanelDiscussion) -> Result<()> {
        self.panels
            .write()
            .map_err(lock_error)?
            .insert(panel.id.clone(), panel.clone());
        Ok(())
    }

    async fn get_panel(&self, id: &str) -> Result<Option<PanelDiscussion>> {
        Ok(self.panels.read().map_err(lock_error)?.get(id).cloned())
    }

    async fn upsert_transcript(&self, transcript: &PanelTranscript) -> Result<()> {
        self.transcripts
            .write()
            .map_err(lock_error)?
            .insert(transcript.id, transcript.clone());
        Ok(())
    }

    async fn get_transcript(&self, id: Uuid) -> Result<Option<PanelTranscript>> {
        Ok(self.transcripts.read().map_err(lock_error)?.get(&id).cloned())
    }

    async fn list_transcripts(&self, panel_id: &str) -> Result<Vec<PanelTranscript>> {
        self.transcripts_where(|t| t.panel_id == panel_id)
    }

    async fn recent_done(&self, panel_id: &str, language: &str, limit: usize) -> Result<Vec<PanelTranscript>> {
        let mut rows = self.transcripts_where(|t| {
            t.panel_id == panel_id && t.language == language && t.process_state == ProcessState::Done
        })?;
        rows.truncate(limit);
        Ok(rows)
    }

    async fn children(&self, parent_id: Uuid) -> Result<Vec<PanelTranscript>> {
        self.transcripts_where(|t| t.transcript_parent_id == Some(parent_id))
    }

    async fn cron_transcripts(&self) -> Result<Vec<PanelTranscript>> {
        let mut rows =
            self.transcripts_where(|t| t.generation_cronjob.as_deref().is_some_and(|c| !c.is_empty()))?;
        rows.reverse();
        Ok(rows)
    }

    async fn upsert_audio(&self, audio: &PanelAudio) -> Result<()> {
        self.audio
            .write()
            .map_err(lock_error)?
            .insert(audio.id, audio.clone());
        Ok(())
    }

    async fn audio_for_transcript(&self, transcript_id: Uuid) -> Result<Vec<PanelAudio>> {
        let mut rows: Vec<PanelAudio> = self
            .audio
            .read()
            .map_err(lock_error)?
            .values()
            .filter(|a| a.transcript_id == transcript_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }
}
