//! Episode title, description and subject list, with references resolved
//! back to the sources the episode was written from.

use crate::config::{ConversationConfig, Prompts};
use crate::error::Result;
use crate::llm::{Chain, LlmClient, DEFAULT_PARSE_RETRIES};
use crate::models::{
    RawReference, SummaryReference, SummarySubject, TranscriptSummary, WebSource, WebSourceCollection,
};
use crate::transcript::Transcript;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Longest accepted episode title, in characters.
pub const MAX_TITLE_CHARS: usize = 90;

/// Subject hints: one block per collection, one `id: title` line per source.
pub fn subjects_hint(collections: &[WebSourceCollection]) -> String {
    collections
        .iter()
        .map(|c| {
            let mut block = format!("{}:", c.title);
            for source in c.included() {
                block.push_str(&format!("\n- {}: {}", source.short_id(), source.title));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn source_matches(source: &WebSource, id: &str) -> bool {
    let id = id.trim();
    !id.is_empty()
        && (source.short_id() == id
            || source.title_hash() == id
            || source.id.to_string() == id
            || source.sorting_id() == id)
}

fn reference_for(source: &WebSource) -> SummaryReference {
    SummaryReference {
        id: source.id.to_string(),
        title: source.title.clone(),
        url: source.resolved_url.clone().unwrap_or_else(|| source.original_url.clone()),
        image: source.image.clone(),
        publish_date: source.publish_date,
    }
}

/// Find the source `id` refers to, searching collections and then their children.
/// A collection id resolves to its first included source.
pub fn find_match<'a>(id: &str, collections: &'a [WebSourceCollection]) -> Option<&'a WebSource> {
    collections.iter().find_map(|c| {
        let own = c.id.to_string();
        if own == id || own.split('-').next() == Some(id) {
            return c.included().first();
        }
        c.web_sources.iter().find(|s| source_matches(s, id))
    })
}

/// Cut at a word boundary so the result has at most `max` characters.
pub fn clamp_title(title: &str, max: usize) -> String {
    let title = title.trim();
    if title.chars().count() <= max {
        return title.to_string();
    }
    let cut: String = title.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(space) if space > 0 => cut[..space].trim_end_matches([',', ';', ':', '-', ' ']).to_string(),
        _ => cut,
    }
}

/// Replace raw references with resolved ones. Unknown ids are dropped and
/// each source appears at most once per subject.
pub fn resolve_references(summary: &mut TranscriptSummary, collections: &[WebSourceCollection]) {
    for subject in &mut summary.subjects {
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for raw in &subject.references {
            match find_match(raw.id(), collections) {
                Some(source) if seen.insert(source.id) => {
                    resolved.push(RawReference::Full(reference_for(source)));
                }
                Some(_) => {}
                None => debug!("Dropping unknown reference '{}'", raw.id()),
            }
        }
        subject.references = resolved;
    }
}

/// A summary built without the model, used when the summary chain fails.
pub fn fallback_summary(collections: &[WebSourceCollection]) -> TranscriptSummary {
    let subjects: Vec<SummarySubject> = collections
        .iter()
        .map(|c| SummarySubject {
            title: c.title.clone(),
            description: c.topic.clone().unwrap_or_default(),
            references: c
                .included()
                .iter()
                .map(|s| RawReference::Full(reference_for(s)))
                .collect(),
        })
        .collect();
    TranscriptSummary {
        title: clamp_title(
            &collections
                .iter()
                .take(3)
                .map(|c| c.title.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            MAX_TITLE_CHARS,
        ),
        description: String::new(),
        subjects,
    }
}

pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    prompts: Arc<Prompts>,
    parse_retries: u32,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>, prompts: Arc<Prompts>) -> Self {
        Self {
            llm,
            prompts,
            parse_retries: DEFAULT_PARSE_RETRIES,
        }
    }

    pub fn with_parse_retries(mut self, retries: u32) -> Self {
        self.parse_retries = retries;
        self
    }

    #[instrument(skip_all, fields(collections = collections.len()))]
    pub async fn summarize(
        &self,
        transcript: &Transcript,
        collections: &[WebSourceCollection],
        config: &ConversationConfig,
    ) -> Result<TranscriptSummary> {
        let mut vars = config.prompt_vars();
        vars.insert("subjects_hint".to_string(), subjects_hint(collections));
        vars.insert("transcript".to_string(), transcript.render());

        let mut summary: TranscriptSummary =
            Chain::from_prompts("summary", self.llm.clone(), &self.prompts, &self.prompts.summary, &vars)
                .json()
                .with_temperature(0.2)
                .with_parse_retries(self.parse_retries)
                .invoke_json()
                .await?;

        if summary.title.chars().count() > MAX_TITLE_CHARS {
            warn!("Summary title over {} characters, clamping", MAX_TITLE_CHARS);
            summary.title = clamp_title(&summary.title, MAX_TITLE_CHARS);
        }
        resolve_references(&mut summary, collections);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{dialogue, MockLlm};
    use crate::transcript::parse_transcript;
    use serde_json::json;

    fn collections() -> Vec<WebSourceCollection> {
        let mut chips = WebSourceCollection::new("Chip plant opens", 5);
        chips.push(WebSource::new("Chip plant opens in Oulu", "https://a.test/chips", "A"));
        chips.push(WebSource::new("Three thousand jobs", "https://b.test/jobs", "B"));
        let mut rail = WebSourceCollection::new("Rail strike", 5);
        rail.push(WebSource::new("Rail strike ends", "https://c.test/rail", "C"));
        vec![chips, rail]
    }

    #[test]
    fn test_hint_lists_short_ids() {
        let cols = collections();
        let hint = subjects_hint(&cols);
        let first = &cols[0].web_sources[0];
        assert!(hint.contains(&format!("- {}: Chip plant opens in Oulu", first.short_id())));
        assert!(hint.contains("Rail strike:"));
    }

    #[test]
    fn test_find_match_by_any_handle() {
        let cols = collections();
        let source = &cols[1].web_sources[0];
        assert_eq!(find_match(&source.short_id(), &cols).map(|s| s.id), Some(source.id));
        assert_eq!(find_match(&source.title_hash(), &cols).map(|s| s.id), Some(source.id));
        assert_eq!(find_match(&source.sorting_id(), &cols).map(|s| s.id), Some(source.id));
        let collection_short = cols[0].id.to_string().split('-').next().unwrap().to_string();
        assert_eq!(find_match(&collection_short, &cols).map(|s| s.id), Some(cols[0].web_sources[0].id));
        assert!(find_match("deadbeef", &cols).is_none());
    }

    #[test]
    fn test_clamp_title() {
        let long = "word ".repeat(40);
        let clamped = clamp_title(&long, MAX_TITLE_CHARS);
        assert!(clamped.chars().count() <= MAX_TITLE_CHARS);
        assert!(!clamped.ends_with(' '));
        assert_eq!(clamp_title("Short title", MAX_TITLE_CHARS), "Short title");
    }

    #[tokio::test]
    async fn test_references_are_resolved_and_deduped() {
        let cols = collections();
        let a = cols[0].web_sources[0].clone();
        let b = cols[0].web_sources[1].clone();
        let llm = Arc::new(MockLlm::new());
        llm.push(
            "summary",
            json!({
                "title": "Oulu chip plant brings three thousand jobs as rail strike ends",
                "description": "Two stories. Both matter.",
                "subjects": [
                    {"title": "Chips", "description": "d", "references": [a.short_id(), a.title_hash(), b.short_id(), "ffffffff"]},
                    {"title": "Rail", "description": "d", "references": [{"id": cols[1].web_sources[0].short_id()}]}
                ]
            })
            .to_string(),
        );
        let summarizer = Summarizer::new(llm.clone(), Arc::new(Prompts::default()));
        let transcript = parse_transcript(&dialogue(40, 4)).unwrap();

        let summary = summarizer
            .summarize(&transcript, &cols, &ConversationConfig::default())
            .await
            .unwrap();
        let chips: Vec<&str> = summary.subjects[0].references.iter().map(RawReference::id).collect();
        assert_eq!(chips, vec![a.id.to_string(), b.id.to_string()]);
        match &summary.subjects[1].references[0] {
            RawReference::Full(r) => assert_eq!(r.url, "https://c.test/rail"),
            other => panic!("unexpected reference {:?}", other),
        }
        let known: HashSet<String> = cols
            .iter()
            .flat_map(|c| c.web_sources.iter().map(|s| s.id.to_string()))
            .collect();
        assert!(summary.reference_ids().iter().all(|id| known.contains(*id)));
        assert!(llm.requests("summary")[0].user_prompt().contains(&a.short_id()));
    }

    #[test]
    fn test_fallback_summary() {
        let cols = collections();
        let summary = fallback_summary(&cols);
        assert_eq!(summary.title, "Chip plant opens, Rail strike");
        assert_eq!(summary.subjects.len(), 2);
        assert_eq!(summary.subjects[0].references.len(), 2);
    }
}
