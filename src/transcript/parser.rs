//! Normalizing parser for model-produced dialogue.

use super::text::word_count;
use crate::error::{PanelistError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static XML_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```xml\s*(.*?)```").expect("Invalid regex"));
static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think>.*?</think>|<reflection>.*?</reflection>").expect("Invalid regex")
});
static OUTPUT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?\s*output\s*>").expect("Invalid regex"));
static SPEAKER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(/)?\s*person\s*(\d+)[^>]*>").expect("Invalid regex"));

/// One speaker turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: u8,
    pub text: String,
}

impl Turn {
    pub fn new(speaker: u8, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// A normalized two-host dialogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
}

impl Transcript {
    /// Build from turns, merging consecutive same-speaker turns and dropping empty ones.
    pub fn from_turns(turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut merged: Vec<Turn> = Vec::new();
        for turn in turns {
            let text = collapse_whitespace(&turn.text);
            if text.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.speaker == turn.speaker => {
                    last.text.push(' ');
                    last.text.push_str(&text);
                }
                _ => merged.push(Turn::new(turn.speaker, text)),
            }
        }
        Self { turns: merged }
    }

    /// Concatenate transcripts in order, merging turns across the seams.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a Transcript>) -> Self {
        Self::from_turns(parts.into_iter().flat_map(|t| t.turns.iter().cloned()))
    }

    /// Render to the wire format.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("<Person{0}>{1}</Person{0}>", t.speaker, t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn word_count(&self) -> usize {
        self.turns.iter().map(|t| word_count(&t.text)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn speaker_sequence(&self) -> Vec<u8> {
        self.turns.iter().map(|t| t.speaker).collect()
    }

    /// Starts with Person1 and ends with Person2.
    pub fn has_show_shape(&self) -> bool {
        matches!(
            (self.turns.first(), self.turns.last()),
            (Some(first), Some(last)) if first.speaker == 1 && last.speaker == 2
        )
    }

    /// The last `n` turns, rendered. Used to give bridges and follow-ups context.
    pub fn tail(&self, n: usize) -> String {
        let start = self.turns.len().saturating_sub(n);
        Transcript::from_turns(self.turns[start..].iter().cloned()).render()
    }

    /// The first `n` turns, rendered.
    pub fn head(&self, n: usize) -> String {
        let end = n.min(self.turns.len());
        Transcript::from_turns(self.turns[..end].iter().cloned()).render()
    }
}

impl std::fmt::Display for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip fences, reasoning blocks and `<output>` wrappers.
fn unwrap_response(raw: &str) -> String {
    let body = match XML_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().to_string(),
        None => raw.to_string(),
    };
    let body = THINK_BLOCK.replace_all(&body, "");
    OUTPUT_TAG.replace_all(&body, "").into_owned()
}

/// Split into turns, balancing missing opening or closing tags.
fn split_turns(body: &str) -> Result<Vec<Turn>> {
    let mut turns = Vec::new();
    let mut open: Option<(u8, usize)> = None;
    let mut cursor = 0usize;
    let mut saw_tag = false;

    for caps in SPEAKER_TAG.captures_iter(body) {
        saw_tag = true;
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        let closing = caps.get(1).is_some();
        let speaker: u8 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| PanelistError::Parse("Invalid speaker index".to_string()))?;

        match (closing, open) {
            (false, None) => {
                open = Some((speaker, whole.1));
            }
            (false, Some((current, start))) => {
                // Missing closing tag: close the running turn here.
                turns.push(Turn::new(current, &body[start..whole.0]));
                open = Some((speaker, whole.1));
            }
            (true, Some((current, start))) if current == speaker => {
                turns.push(Turn::new(current, &body[start..whole.0]));
                open = None;
            }
            (true, Some((current, _))) => {
                return Err(PanelistError::Parse(format!(
                    "Mismatched tags: <Person{}> closed by </Person{}>. Every turn must be closed by its own speaker tag.",
                    current, speaker
                )));
            }
            (true, None) => {
                // Missing opening tag: the text since the previous turn belongs to this speaker.
                let orphan = &body[cursor..whole.0];
                if !orphan.trim().is_empty() {
                    turns.push(Turn::new(speaker, orphan));
                }
            }
        }
        cursor = whole.1;
    }

    if let Some((current, start)) = open {
        turns.push(Turn::new(current, &body[start..]));
    }

    if !saw_tag {
        return Err(PanelistError::Parse(
            "No <Person1>/<Person2> tags found. Wrap every line of dialogue in speaker tags.".to_string(),
        ));
    }

    Ok(turns)
}

fn parse_inner(raw: &str, strict: bool) -> Result<Transcript> {
    let body = unwrap_response(raw);
    let transcript = Transcript::from_turns(split_turns(&body)?);

    if transcript.is_empty() {
        return Err(PanelistError::Parse(
            "The transcript contains no dialogue. Produce at least one non-empty speaker turn.".to_string(),
        ));
    }

    if let Some(bad) = transcript.turns.iter().find(|t| t.speaker != 1 && t.speaker != 2) {
        return Err(PanelistError::Parse(format!(
            "Unknown speaker Person{}. Only Person1 and Person2 may speak.",
            bad.speaker
        )));
    }

    if strict && !transcript.has_show_shape() {
        return Err(PanelistError::Parse(
            "The dialogue must start with <Person1> and end with </Person2>.".to_string(),
        ));
    }

    Ok(transcript)
}

/// Parse and normalize a model response into a transcript that starts with
/// Person1 and ends with Person2.
pub fn parse_transcript(raw: &str) -> Result<Transcript> {
    parse_inner(raw, true)
}

/// Like [`parse_transcript`] but without the start/end speaker requirement.
pub fn parse_transcript_lenient(raw: &str) -> Result<Transcript> {
    parse_inner(raw, false)
}
