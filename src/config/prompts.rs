//! Prompt templates for Panelist.
//!
//! Every LLM chain reads its system and user template from here. Any group can be
//! overridden by placing `<group>.toml` (with `system` and/or `user` keys) in the
//! custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Spell-out rules shared by every chain that produces spoken dialogue.
pub const TTS_RULES: &str = r#"Text-to-speech normalization (mandatory):
- Write every number as words ("twenty twenty-four", "three point five", "forty percent").
- Spell out currency ("five million dollars"), ordinals ("the third"), roman numerals ("Louis the fourteenth").
- Expand abbreviations and acronyms the way a host would say them ("the EU" becomes "the E U" or "the European Union").
- Say units in full ("kilometers per hour", "gigawatts").
- Speak URLs, dates, times and addresses naturally ("example dot com", "March fifth", "half past eight").
- No Arabic digits may remain anywhere in the dialogue.
- Do not use Amazon or Alexa specific SSML tags."#;

/// Filler and style rules shared by every chain that produces spoken dialogue.
pub const FILLER_RULES: &str = r#"Style rules:
- Do not overuse fillers: "absolutely", "totally", "exactly", "yeah", "it's like".
- Never write laughter ("ha ha", "haha", "lol").
- Keep each turn under six hundred characters.
- Make it a discussion between peers, not a question-and-answer interview.
- Use humor only where it suits the topic."#;

/// Output format rules shared by every chain that produces dialogue.
pub const FORMAT_RULES: &str = r#"Output format:
- Wrap every turn in <Person1>...</Person1> or <Person2>...</Person2>.
- The speakers alternate. The dialogue starts with <Person1> and ends with </Person2>.
- Output only the dialogue. No headings, notes or commentary."#;

/// System and user template for one chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainPrompts {
    pub system: String,
    pub user: String,
}

impl ChainPrompts {
    fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Partial override loaded from `<group>.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChainOverride {
    system: Option<String>,
    user: Option<String>,
}

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    /// Segment writer.
    pub segment: ChainPrompts,
    /// Quality verifier (JSON).
    pub quality: ChainPrompts,
    pub rewriter: ChainPrompts,
    pub rewriter_extend: ChainPrompts,
    pub rewriter_reduce: ChainPrompts,
    /// Length compressor.
    pub compress: ChainPrompts,
    /// Length extender.
    pub extend: ChainPrompts,
    pub intro: ChainPrompts,
    pub intro_short: ChainPrompts,
    pub bridge: ChainPrompts,
    pub conclusion: ChainPrompts,
    pub conclusion_short: ChainPrompts,
    /// Episode summary (JSON).
    pub summary: ChainPrompts,
    pub translate: ChainPrompts,
    /// Source grouping (JSON).
    pub grouping: ChainPrompts,
    /// Page text formatter used by the link resolver.
    pub formatter: ChainPrompts,
    /// Article validator used by the link resolver (JSON).
    pub validator: ChainPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

const SCREENWRITER: &str = r#"You are an award-winning screenwriter for "{{podcast_name}}" ({{podcast_tagline}}), a news podcast hosted by two people.

Hosts:
{{hosts}}

Conversation style: {{conversation_style}}
Dialogue structure: {{dialogue_structure}}
Engagement techniques: {{engagement_techniques}}
Write in {{output_language}}."#;

impl Default for Prompts {
    fn default() -> Self {
        Self {
            segment: ChainPrompts::new(
                format!(
                    "{SCREENWRITER}\n\nYou turn news sources into an engaging, factual dialogue segment.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"
                ),
                r#"Write a dialogue segment covering the sources below.

Length: at least {{word_count}} words. Aim substantially higher rather than lower.
{{main_item_note}}
{{detail_note}}
{{user_instructions}}

Earlier segments of this episode (do not repeat them):
{{previous_segments}}

Earlier episodes (refer to them only with facts stated here):
{{previous_episodes}}

Sources:
{{content}}"#,
            ),

            quality: ChainPrompts::new(
                r#"You are a strict podcast script editor. Review a two-host transcript against its sources and report problems as JSON.

Rubric:
1. Natural conversational language.
2. Speakers alternate correctly, starting with Person1 and ending with Person2.
3. No overuse of fillers ("absolutely", "totally", "exactly", "yeah", "it's like").
4. No written laughter ("ha ha").
5. Humor appropriate to the topic.
6. Text-to-speech normalization is complete: every number and unit is spelled out in words.
7. The language is {{output_language}}.
8. No turn is longer than six hundred characters.
9. All provided source content is covered.
10. References to prior episodes are factual and not fabricated.
11. The dialogue is a discussion, not a question-and-answer session.
12. Transitions are smooth.
13. The ending is not abrupt.

Severity: 1 = minor, 2 = must fix, 3 = critical.

Respond with JSON:
{"pass_test": bool, "issues": [{"title": str, "severity": 1|2|3, "coverage": str, "transcript_segments": [str], "suggestions": str}]}"#,
                r#"Sources:
{{content}}

Prior episodes:
{{previous_episodes}}

Transcript to review:
{{transcript}}"#,
            ),

            rewriter: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou revise a podcast transcript so that it fixes every listed problem while keeping everything that already works.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"),
                r#"Revise the transcript below.

Problems to fix:
{{feedback}}

Keep the length close to {{word_count}} words.

Sources:
{{content}}

Transcript:
{{transcript}}"#,
            ),

            rewriter_extend: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou revise a podcast transcript that is too short. Fix every listed problem and make the dialogue longer by adding detail from the sources. Never remove existing segments.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"),
                r#"Revise and lengthen the transcript below.

Problems to fix:
{{feedback}}

The result must have at least {{word_count}} words.

Sources:
{{content}}

Transcript:
{{transcript}}"#,
            ),

            rewriter_reduce: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou revise a podcast transcript that is too long. Fix every listed problem and tighten the dialogue. Keep every fact that matters.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"),
                r#"Revise and shorten the transcript below.

Problems to fix:
{{feedback}}

The result must have at most {{word_count}} words.

Transcript:
{{transcript}}"#,
            ),

            compress: ChainPrompts::new(
                format!("You shorten podcast transcripts. Remove repetition and filler, merge redundant turns, and keep all facts. Preserve every speaker tag and all spoken-number normalization.\n\n{FORMAT_RULES}\n\n{TTS_RULES}"),
                r#"The transcript has {{current_words}} words. Shorten it to about {{word_count}} words. It must lose at least one tenth of its length.

Transcript:
{{transcript}}"#,
            ),

            extend: ChainPrompts::new(
                format!("You lengthen podcast transcripts. Add new detail, context and discussion drawn from the sources. Never remove existing turns. Keep numbers written as words.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"),
                r#"The transcript has {{current_words}} words. Extend it to about {{word_count}} words. It must grow by at least one tenth.

Sources:
{{content}}

Transcript:
{{transcript}}"#,
            ),

            intro: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou write the opening of the episode: exactly four turns. Person1 welcomes listeners to {{{{podcast_name}}}} and mentions the tagline. Preview the topics without covering them.\n\n{FORMAT_RULES}\n\n{TTS_RULES}"),
                r#"Today is {{date}}.{{location_note}}

Topics in this episode:
{{topics}}

The first segment begins like this:
{{first_segment}}"#,
            ),

            intro_short: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou write a very short opening of the episode: exactly four brief turns that lead straight into the first topic.\nDo not use any of these openers: \"welcome\", \"welcome back\", \"today\", \"let's dive in\", \"in this episode\", \"hello everyone\", \"hey there\".\n\n{FORMAT_RULES}\n\n{TTS_RULES}"),
                r#"Topics in this episode:
{{topics}}

The first segment begins like this:
{{first_segment}}"#,
            ),

            bridge: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou write a bridge between two segments: four to six short turns that connect the end of one segment to the start of the next. Do not summarize either segment.\n\n{FORMAT_RULES}\n\n{FILLER_RULES}\n\n{TTS_RULES}"),
                r#"The previous segment ends like this:
{{previous_tail}}

The next segment starts like this:
{{next_head}}"#,
            ),

            conclusion: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou write the closing of the episode: four to six turns that wrap up the main takeaways and thank the listeners of {{{{podcast_name}}}}.\n\n{FORMAT_RULES}\n\n{TTS_RULES}"),
                r#"The episode so far:
{{transcript}}"#,
            ),

            conclusion_short: ChainPrompts::new(
                format!("{SCREENWRITER}\n\nYou write a very short closing of the episode: two to four brief turns. No recap of every topic.\n\n{FORMAT_RULES}\n\n{TTS_RULES}"),
                r#"The episode ends like this:
{{transcript}}"#,
            ),

            summary: ChainPrompts::new(
                r#"You write metadata for podcast episodes.

Respond with JSON:
{"title": str, "description": str, "subjects": [{"title": str, "description": str, "references": [str]}]}

Rules:
- title: at most ninety characters, specific to the stories. No generic phrases like "news roundup" or "this week in". Do not include "{{podcast_name}}" or its tagline.
- description: two to three sentences.
- subjects: one per story discussed, in order. references lists the ids of the sources each subject is based on, taken from the subject hints.
- Write in {{output_language}}."#,
                r#"Subject hints (id: title):
{{subjects_hint}}

Transcript:
{{transcript}}"#,
            ),

            translate: ChainPrompts::new(
                format!("You translate podcast transcripts from {{{{source_language}}}} to {{{{target_language}}}}.\n\nRules:\n- Keep every <Person1>/<Person2> tag exactly as it is, in the same order.\n- Translate only the spoken content inside the tags.\n- Adapt idioms so they work in the target language.\n- Keep all spoken normalization in the target language: numbers, units, URLs, dates, times and addresses as natural speech.\n\n{TTS_RULES}"),
                r#"Translate this transcript to {{target_language}}:

{{transcript}}"#,
            ),

            grouping: ChainPrompts::new(
                r#"You are a news editor planning a podcast episode. Group news items that cover the same event or story, then order the groups for a good broadcast flow.

Rules:
- Every id must appear exactly once.
- Each group is semantically coherent: one event or story.
- At most {{max_ids_per_group}} ids per group.
- Produce at least {{min_groups}} groups when the items allow it.
- main_group is the zero-based index of the most important group.

Respond with JSON:
{"ordered_groups": [[id]], "main_group": int, "min_groups": int}"#,
                r#"Editorial guidance: {{guidance}}

Previous episode:
{{previous_episode}}

Pre-grouped items (same story across outlets):
{{link_groups}}

News items:
{{items}}"#,
            ),

            formatter: ChainPrompts::new(
                r#"You clean up text extracted from a web page. Keep the article body in its original language, with headings and paragraphs in plain Markdown. Keep [Image N ...] placeholders where they appear. Remove navigation, cookie notices, advertisements, share buttons, related-article lists and footers. Do not summarize and do not add anything."#,
                r#"Page title: {{title}}

Extracted text:
{{content}}"#,
            ),

            validator: ChainPrompts::new(
                r#"You check whether extracted page content is a real news article. Error pages, login walls, cookie walls, paywall teasers, and content unrelated to the expected title are not valid.

Respond with JSON:
{"is_valid": bool, "reason": str}"#,
                r#"Expected title: {{title}}
Expected description: {{description}}

Content:
{{content}}"#,
            ),

            variables: HashMap::new(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());
            for (group, chain) in prompts.groups_mut() {
                let path = custom_path.join(format!("{}.toml", group));
                if path.exists() {
                    let content = std::fs::read_to_string(&path)?;
                    let overrides: ChainOverride = toml::from_str(&content)?;
                    if let Some(system) = overrides.system {
                        chain.system = system;
                    }
                    if let Some(user) = overrides.user {
                        chain.user = user;
                    }
                }
            }
        }

        Ok(prompts)
    }

    fn groups_mut(&mut self) -> Vec<(&'static str, &mut ChainPrompts)> {
        vec![
            ("segment", &mut self.segment),
            ("quality", &mut self.quality),
            ("rewriter", &mut self.rewriter),
            ("rewriter_extend", &mut self.rewriter_extend),
            ("rewriter_reduce", &mut self.rewriter_reduce),
            ("compress", &mut self.compress),
            ("extend", &mut self.extend),
            ("intro", &mut self.intro),
            ("intro_short", &mut self.intro_short),
            ("bridge", &mut self.bridge),
            ("conclusion", &mut self.conclusion),
            ("conclusion_short", &mut self.conclusion_short),
            ("summary", &mut self.summary),
            ("translate", &mut self.translate),
            ("grouping", &mut self.grouping),
            ("formatter", &mut self.formatter),
            ("validator", &mut self.validator),
        ]
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
