//! Persisted panel, transcript and audio rows.

use super::SummarySubject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Processing state of a transcript or audio row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    #[default]
    Waiting,
    Processing,
    Failed,
    Done,
}

impl ProcessState {
    /// Allowed transitions: waiting -> processing -> {done, failed}. Repeating a state is a no-op.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (ProcessState::Waiting, ProcessState::Processing)
                | (ProcessState::Waiting, ProcessState::Failed)
                | (ProcessState::Processing, ProcessState::Done)
                | (ProcessState::Processing, ProcessState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Done | ProcessState::Failed)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Waiting => write!(f, "waiting"),
            ProcessState::Processing => write!(f, "processing"),
            ProcessState::Failed => write!(f, "failed"),
            ProcessState::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(ProcessState::Waiting),
            "processing" => Ok(ProcessState::Processing),
            "failed" => Ok(ProcessState::Failed),
            "done" => Ok(ProcessState::Done),
            _ => Err(format!("Unknown process state: {}", s)),
        }
    }
}

/// Free-form metadata carried by a transcript row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptMetadata {
    pub subjects: Vec<SummarySubject>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub conversation_config: Option<serde_json::Value>,
    /// Prior blob keys, oldest first.
    pub transcript_history: Vec<String>,
    /// The generation request that produced this row, reused by recurring runs.
    pub request: Option<serde_json::Value>,
}

/// A generated transcript for one panel in one language.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelTranscript {
    pub id: Uuid,
    pub panel_id: String,
    pub title: Option<String>,
    pub language: String,
    pub bucket: String,
    /// Blob key of the current transcript.
    pub file: Option<String>,
    pub process_state: ProcessState,
    pub process_fail_message: Option<String>,
    pub generation_cronjob: Option<String>,
    /// Origin of a translation or of a recurring child.
    pub transcript_parent_id: Option<Uuid>,
    pub metadata: TranscriptMetadata,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PanelTranscript {
    pub fn new(panel_id: impl Into<String>, language: impl Into<String>, bucket: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            panel_id: panel_id.into(),
            title: None,
            language: language.into(),
            bucket: bucket.into(),
            file: None,
            process_state: ProcessState::Waiting,
            process_fail_message: None,
            generation_cronjob: None,
            transcript_parent_id: None,
            metadata: TranscriptMetadata::default(),
            owner_id: None,
            organization_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition. Returns false (and leaves the row untouched) if it is not allowed.
    pub fn transition(&mut self, next: ProcessState, message: Option<String>) -> bool {
        if !self.process_state.can_transition_to(next) {
            return false;
        }
        self.process_state = next;
        if next == ProcessState::Failed {
            self.process_fail_message = message;
        } else if message.is_some() {
            self.process_fail_message = message;
        }
        self.updated_at = Utc::now();
        true
    }
}

/// A panel: the long-lived podcast definition transcripts are generated for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelDiscussion {
    pub id: String,
    pub title: String,
    /// Holds panel-level overrides such as `conversation_config`.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub owner_id: Option<String>,
    pub organization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PanelDiscussion {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            metadata: serde_json::Value::Object(Default::default()),
            owner_id: None,
            organization_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Hand-off record for the external audio stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelAudio {
    pub id: Uuid,
    pub panel_id: String,
    pub transcript_id: Uuid,
    pub tts_model: Option<String>,
    pub bucket: String,
    pub file: Option<String>,
    pub process_state: ProcessState,
    pub process_fail_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PanelAudio {
    pub fn for_transcript(transcript: &PanelTranscript, tts_model: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            panel_id: transcript.panel_id.clone(),
            transcript_id: transcript.id,
            tts_model,
            bucket: transcript.bucket.clone(),
            file: None,
            process_state: ProcessState::Waiting,
            process_fail_message: None,
            created_at: Utc::now(),
        }
    }
}
