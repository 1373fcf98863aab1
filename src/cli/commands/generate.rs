//! Generate command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::{merge_json, Settings};
use crate::feeds::parse_url_input;
use crate::orchestrator::{GenerationRequest, Orchestrator};
use anyhow::{Context, Result};
use serde_json::json;

/// Flags of the generate command.
#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub request: Option<String>,
    pub panel: Option<String>,
    pub urls: Vec<String>,
    pub text: Option<String>,
    pub languages: Vec<String>,
    pub words: Option<usize>,
    pub segments: Option<usize>,
    pub longform: bool,
    pub guidance: Option<String>,
    pub cron: Option<String>,
    pub output: Option<String>,
}

/// Merge a request file with command-line flags. Flags win.
pub fn build_request(args: &GenerateArgs) -> Result<GenerationRequest> {
    let mut request: GenerationRequest = match &args.request {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading request file {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing request file {}", path))?
        }
        None => GenerationRequest::default(),
    };

    if let Some(panel) = &args.panel {
        request.panel_id = panel.clone();
    }
    if request.panel_id.trim().is_empty() {
        anyhow::bail!("a panel id is required (--panel or \"panel_id\" in the request file)");
    }

    if !args.urls.is_empty() {
        let mut urls = request.input_source.as_ref().map(parse_url_input).unwrap_or_default();
        urls.extend(args.urls.iter().cloned());
        request.input_source = Some(json!(urls));
    }
    if let Some(path) = &args.text {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading text file {}", path))?;
        request.input_text = Some(text);
    }
    request.languages.extend(args.languages.iter().cloned());
    if let Some(words) = args.words {
        let config = request.conversation_config.get_or_insert_with(|| json!({}));
        merge_json(config, &json!({ "word_count": words }));
    }
    if args.segments.is_some() {
        request.segments = args.segments;
    }
    if args.longform {
        request.longform = Some(true);
    }
    if args.guidance.is_some() {
        request.news_guidance = args.guidance.clone();
    }
    if args.cron.is_some() {
        request.cronjob = args.cron.clone();
    }
    Ok(request)
}

/// Run the generate command.
pub async fn run_generate(args: GenerateArgs, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Generate, &settings.llm) {
        Output::error(&e.to_string());
        return Err(e.into());
    }
    let request = build_request(&args)?;
    Output::info(&format!("Generating an episode for panel '{}'", request.panel_id));

    let orchestrator = Orchestrator::new(settings)?;
    let spinner = Output::spinner("Collecting, writing and repairing...");
    let result = orchestrator.generate(&request).await;
    spinner.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            Output::error(&format!("Generation failed: {}", e));
            return Err(e.into());
        }
    };

    let row = &outcome.transcript;
    Output::success(&format!(
        "{} ({} words)",
        row.title.as_deref().unwrap_or("Untitled episode"),
        outcome.text.word_count()
    ));
    Output::kv("Transcript", &row.id.to_string());
    Output::kv("Blob", &format!("{}/{}", row.bucket, row.file.as_deref().unwrap_or("-")));
    if let Some(description) = &row.metadata.description {
        Output::kv("Description", description);
    }
    for child in &outcome.translations {
        Output::kv(
            &format!("Translation ({})", child.language),
            &format!("{} {}", child.id, child.file.as_deref().unwrap_or("-")),
        );
    }
    let failed = request.languages.len().saturating_sub(outcome.translations.len());
    if failed > 0 {
        Output::warning(&format!("{} translation(s) did not complete", failed));
    }

    match &args.output {
        Some(path) => {
            std::fs::write(path, outcome.text.render()).with_context(|| format!("writing {}", path))?;
            Output::success(&format!("Transcript written to {}", path));
        }
        None => {
            Output::header("Transcript");
            Output::transcript(&outcome.text);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_request_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"panel_id": "news", "input_source": "https://a.test/1", "conversation_config": {{"word_count": 300, "output_language": "Finnish"}}}}"#
        )
        .unwrap();
        let args = GenerateArgs {
            request: Some(file.path().display().to_string()),
            urls: vec!["https://b.test/2".to_string()],
            words: Some(500),
            languages: vec!["English".to_string()],
            ..Default::default()
        };

        let request = build_request(&args).unwrap();
        assert_eq!(request.panel_id, "news");
        assert_eq!(
            request.input_source,
            Some(json!(["https://a.test/1", "https://b.test/2"]))
        );
        let config = request.conversation_config.unwrap();
        assert_eq!(config["word_count"], json!(500));
        assert_eq!(config["output_language"], serde_json::Value::from("Finnish"));
        assert_eq!(request.languages, vec!["English".to_string()]);
    }

    #[test]
    fn test_panel_is_required() {
        assert!(build_request(&GenerateArgs::default()).is_err());
        let args = GenerateArgs {
            panel: Some("tech".to_string()),
            cron: Some("0 8 * * *".to_string()),
            ..Default::default()
        };
        let request = build_request(&args).unwrap();
        assert_eq!(request.cronjob.as_deref(), Some("0 8 * * *"));
        assert_eq!(request.longform, None);
    }
}
