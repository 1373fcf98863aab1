//! Episode summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A resolved pointer from a summary subject back to a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReference {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
}

/// A reference as returned by the model: a bare id or a full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawReference {
    Id(String),
    Full(SummaryReference),
}

impl RawReference {
    pub fn id(&self) -> &str {
        match self {
            RawReference::Id(id) => id,
            RawReference::Full(reference) => &reference.id,
        }
    }
}

/// One subject covered by the episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarySubject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub references: Vec<RawReference>,
}

/// Title, description and per-subject summaries of an episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<SummarySubject>,
}

impl TranscriptSummary {
    /// All reference ids across subjects.
    pub fn reference_ids(&self) -> Vec<&str> {
        self.subjects
            .iter()
            .flat_map(|s| s.references.iter().map(RawReference::id))
            .collect()
    }
}
