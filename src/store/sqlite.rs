//! SQLite-backed source and panel stores.
//!
//! Rows keep their full record as JSON next to the columns queries filter on.

use super::{lock_error, PanelStore, RelationKind, SourceRelation, SourceStore};
use crate::error::{PanelistError, Result};
use crate::models::{PanelAudio, PanelDiscussion, PanelTranscript, ResolveState, WebSource};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    original_url TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    resolve_state TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sources_hash ON sources(content_hash);

CREATE TABLE IF NOT EXISTS source_relationships (
    source_id TEXT NOT NULL,
    related_source_id TEXT NOT NULL,
    type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, related_source_id, type)
);

CREATE TABLE IF NOT EXISTS panels (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transcripts (
    id TEXT PRIMARY KEY,
    panel_id TEXT NOT NULL,
    language TEXT NOT NULL,
    parent_id TEXT,
    cronjob TEXT,
    process_state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transcripts_panel ON transcripts(panel_id, created_at);
CREATE INDEX IF NOT EXISTS idx_transcripts_parent ON transcripts(parent_id);

CREATE TABLE IF NOT EXISTS audio (
    id TEXT PRIMARY KEY,
    transcript_id TEXT NOT NULL,
    process_state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    data TEXT NOT NULL
);
"#;

/// Both row stores over one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened SQLite store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and one-off runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(lock_error)
    }

    fn query_transcripts(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<PanelTranscript>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(from_json(&json?)?);
        }
        Ok(out)
    }
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| PanelistError::Storage(format!("Corrupt row: {}", e)))
}

fn source_from_row(id: &str, json: &str) -> Result<WebSource> {
    let mut source: WebSource = from_json(json)?;
    source.id = Uuid::parse_str(id).map_err(|e| PanelistError::Storage(e.to_string()))?;
    Ok(source)
}

#[async_trait]
impl SourceStore for SqliteStore {
    #[instrument(skip(self, source), fields(url = %source.original_url))]
    async fn upsert(&self, source: &WebSource) -> Result<Uuid> {
        let conn = self.lock()?;
        let data = serde_json::to_string(source)?;
        conn.execute(
            r#"
            INSERT INTO sources (id, original_url, content_hash, resolve_state, data, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(original_url) DO UPDATE SET
                content_hash = excluded.content_hash,
                resolve_state = excluded.resolve_state,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![
                source.id.to_string(),
                source.original_url,
                source.content_hash(),
                source.resolve_state.to_string(),
                data,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id: String = conn.query_row(
            "SELECT id FROM sources WHERE original_url = ?1",
            params![source.original_url],
            |row| row.get(0),
        )?;
        debug!("Upserted source {}", id);
        Uuid::parse_str(&id).map_err(|e| PanelistError::Storage(e.to_string()))
    }

    async fn exists(&self, url: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sources WHERE original_url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn load(&self, url: &str) -> Result<Option<WebSource>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, data FROM sources WHERE original_url = ?1",
                params![url],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, json)| source_from_row(&id, &json)).transpose()
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<WebSource>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, data FROM sources WHERE content_hash = ?1 AND resolve_state = ?2 LIMIT 1",
                params![content_hash, ResolveState::Resolved.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, json)| source_from_row(&id, &json)).transpose()
    }

    async fn link(&self, a: Uuid, b: Uuid, kind: RelationKind) -> Result<bool> {
        let conn = self.lock()?;
        let (a, b) = (a.to_string(), b.to_string());
        let existing: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM source_relationships
            WHERE type = ?3
              AND ((source_id = ?1 AND related_source_id = ?2)
                OR (source_id = ?2 AND related_source_id = ?1))
            "#,
            params![a, b, kind.as_str()],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO source_relationships (source_id, related_source_id, type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![a, b, kind.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(true)
    }

    async fn related(&self, id: Uuid) -> Result<Vec<SourceRelation>> {
        let conn = self.lock()?;
        let id_str = id.to_string();
        let mut stmt = conn.prepare(
            r#"
            SELECT source_id, related_source_id, type FROM source_relationships
            WHERE source_id = ?1 OR related_source_id = ?1
            ORDER BY created_at
            "#,
        )?;
        let rows = stmt.query_map(params![id_str], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut relations = Vec::new();
        for row in rows {
            let (from, to, kind) = row?;
            let other = if from == id_str { to } else { from };
            relations.push(SourceRelation {
                source_id: id,
                related_id: Uuid::parse_str(&other).map_err(|e| PanelistError::Storage(e.to_string()))?,
                kind: kind.parse()?,
            });
        }
        Ok(relations)
    }
}

#[async_trait]
impl PanelStore for SqliteStore {
    async fn upsert_panel(&self, panel: &PanelDiscussion) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO panels (id, data) VALUES (?1, ?2)",
            params![panel.id, serde_json::to_string(panel)?],
        )?;
        Ok(())
    }

    async fn get_panel(&self, id: &str) -> Result<Option<PanelDiscussion>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row("SELECT data FROM panels WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        json.map(|j| from_json(&j)).transpose()
    }

    #[instrument(skip(self, transcript), fields(id = %transcript.id, state = %transcript.process_state))]
    async fn upsert_transcript(&self, transcript: &PanelTranscript) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO transcripts
            (id, panel_id, language, parent_id, cronjob, process_state, created_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                transcript.id.to_string(),
                transcript.panel_id,
                transcript.language,
                transcript.transcript_parent_id.map(|p| p.to_string()),
                transcript.generation_cronjob,
                transcript.process_state.to_string(),
                transcript.created_at.to_rfc3339(),
                serde_json::to_string(transcript)?,
            ],
        )?;
        Ok(())
    }

    async fn get_transcript(&self, id: Uuid) -> Result<Option<PanelTranscript>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT data FROM transcripts WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| from_json(&j)).transpose()
    }

    async fn list_transcripts(&self, panel_id: &str) -> Result<Vec<PanelTranscript>> {
        self.query_transcripts(
            "SELECT data FROM transcripts WHERE panel_id = ?1 ORDER BY created_at DESC",
            params![panel_id],
        )
    }

    async fn recent_done(&self, panel_id: &str, language: &str, limit: usize) -> Result<Vec<PanelTranscript>> {
        self.query_transcripts(
            r#"
            SELECT data FROM transcripts
            WHERE panel_id = ?1 AND language = ?2 AND process_state = 'done'
            ORDER BY created_at DESC LIMIT ?3
            "#,
            params![panel_id, language, limit as i64],
        )
    }

    async fn children(&self, parent_id: Uuid) -> Result<Vec<PanelTranscript>> {
        self.query_transcripts(
            "SELECT data FROM transcripts WHERE parent_id = ?1 ORDER BY created_at DESC",
            params![parent_id.to_string()],
        )
    }

    async fn cron_transcripts(&self) -> Result<Vec<PanelTranscript>> {
        self.query_transcripts(
            "SELECT data FROM transcripts WHERE cronjob IS NOT NULL AND cronjob != '' ORDER BY created_at",
            [],
        )
    }

    async fn upsert_audio(&self, audio: &PanelAudio) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO audio (id, transcript_id, process_state, created_at, data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                audio.id.to_string(),
                audio.transcript_id.to_string(),
                audio.process_state.to_string(),
                audio.created_at.to_rfc3339(),
                serde_json::to_string(audio)?,
            ],
        )?;
        Ok(())
    }

    async fn audio_for_transcript(&self, transcript_id: Uuid) -> Result<Vec<PanelAudio>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM audio WHERE transcript_id = ?1 ORDER BY created_at")?;
        let rows = stmt.query_map(params![transcript_id.to_string()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(from_json(&json?)?);
        }
        Ok(out)
    }
}
