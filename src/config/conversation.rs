//! The conversation contract handed to every writing chain.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One podcast host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostProfile {
    pub name: String,
    pub persona: String,
    pub role: String,
}

/// Host profiles keyed by speaker index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonRoles {
    #[serde(rename = "1")]
    pub person1: HostProfile,
    #[serde(rename = "2")]
    pub person2: HostProfile,
}

impl Default for PersonRoles {
    fn default() -> Self {
        Self {
            person1: HostProfile {
                name: "Alex".to_string(),
                persona: "Curious, upbeat host who keeps the conversation moving".to_string(),
                role: "main summarizer".to_string(),
            },
            person2: HostProfile {
                name: "Sam".to_string(),
                persona: "Thoughtful analyst with a dry sense of humor".to_string(),
                role: "questioner and clarifier".to_string(),
            },
        }
    }
}

/// How the show opens and closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroMode {
    Disabled,
    Short,
    Full,
}

/// The full generation contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub output_language: String,
    pub conversation_style: Vec<String>,
    pub person_roles: PersonRoles,
    pub dialogue_structure: Vec<String>,
    pub engagement_techniques: Vec<String>,
    pub user_instructions: Option<String>,
    pub podcast_name: String,
    pub podcast_tagline: String,
    pub creativity: f32,
    /// Target total words. `None` or zero disables length repair.
    pub word_count: Option<usize>,
    pub longform: bool,
    pub location: Option<String>,
    pub short_intro_and_conclusion: bool,
    pub disable_intro_and_conclusion: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            output_language: "English".to_string(),
            conversation_style: vec!["casual".to_string(), "humorous".to_string()],
            person_roles: PersonRoles::default(),
            dialogue_structure: vec![
                "Topic introduction".to_string(),
                "Discussion of the key facts".to_string(),
                "Different perspectives".to_string(),
                "Takeaways".to_string(),
            ],
            engagement_techniques: vec![
                "rhetorical questions".to_string(),
                "personal anecdotes".to_string(),
                "analogies".to_string(),
            ],
            user_instructions: None,
            podcast_name: "Panelist".to_string(),
            podcast_tagline: "Your daily news, talked through".to_string(),
            creativity: 0.7,
            word_count: Some(200),
            longform: false,
            location: None,
            short_intro_and_conclusion: false,
            disable_intro_and_conclusion: false,
        }
    }
}

impl ConversationConfig {
    /// Deep-merge defaults, then panel metadata, then the request's config.
    pub fn resolve(
        defaults: &ConversationConfig,
        panel_metadata: Option<&Value>,
        request: Option<&Value>,
    ) -> Result<Self> {
        let mut merged = serde_json::to_value(defaults)?;
        if let Some(panel) = panel_metadata.and_then(|m| m.get("conversation_config")) {
            merge_json(&mut merged, panel);
        }
        if let Some(request) = request {
            merge_json(&mut merged, request);
        }
        Ok(serde_json::from_value(merged)?)
    }

    /// Target word count, with zero treated as unset.
    pub fn target_words(&self) -> Option<usize> {
        self.word_count.filter(|w| *w > 0)
    }

    /// Total target for the combined show over `article_count` articles.
    pub fn combined_target(&self, article_count: usize) -> Option<usize> {
        let base = self.target_words()?;
        if self.longform {
            Some((base * article_count.max(1) / 2).max(1))
        } else {
            Some(base)
        }
    }

    /// `disable_intro_and_conclusion` wins over `short_intro_and_conclusion`.
    pub fn intro_mode(&self) -> IntroMode {
        if self.disable_intro_and_conclusion {
            IntroMode::Disabled
        } else if self.short_intro_and_conclusion {
            IntroMode::Short
        } else {
            IntroMode::Full
        }
    }

    /// Copy with a different output language.
    pub fn with_language(&self, language: &str) -> Self {
        let mut config = self.clone();
        config.output_language = language.to_string();
        config
    }

    /// Human-readable host description for prompts.
    pub fn hosts_description(&self) -> String {
        let p1 = &self.person_roles.person1;
        let p2 = &self.person_roles.person2;
        format!(
            "Person1: {} ({}) - {}\nPerson2: {} ({}) - {}",
            p1.name, p1.role, p1.persona, p2.name, p2.role, p2.persona
        )
    }

    /// Variables for the shared screenwriter preamble.
    pub fn prompt_vars(&self) -> HashMap<String, String> {
        HashMap::from([
            ("podcast_name".to_string(), self.podcast_name.clone()),
            ("podcast_tagline".to_string(), self.podcast_tagline.clone()),
            ("hosts".to_string(), self.hosts_description()),
            ("conversation_style".to_string(), self.conversation_style.join(", ")),
            ("dialogue_structure".to_string(), self.dialogue_structure.join(", ")),
            ("engagement_techniques".to_string(), self.engagement_techniques.join(", ")),
            ("output_language".to_string(), self.output_language.clone()),
        ])
    }
}

/// Recursively merge `overlay` into `base`. Objects merge key by key, nulls are skipped,
/// everything else replaces.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) if !overlay.is_null() => *base = overlay.clone(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_precedence() {
        let defaults = ConversationConfig::default();
        let panel = json!({"conversation_config": {"podcast_name": "Tech Hour", "word_count": 400,
            "person_roles": {"1": {"name": "Ada"}}}});
        let request = json!({"word_count": 250, "output_language": "Finnish"});

        let config = ConversationConfig::resolve(&defaults, Some(&panel), Some(&request)).unwrap();
        assert_eq!(config.podcast_name, "Tech Hour");
        assert_eq!(config.word_count, Some(250));
        assert_eq!(config.output_language, "Finnish");
        assert_eq!(config.person_roles.person1.name, "Ada");
        // Untouched nested fields survive the merge.
        assert_eq!(config.person_roles.person1.role, "main summarizer");
        assert_eq!(config.conversation_style, vec!["casual", "humorous"]);
    }

    #[test]
    fn test_null_does_not_override() {
        let mut base = json!({"a": 1, "b": {"c": 2}});
        merge_json(&mut base, &json!({"a": null, "b": {"d": 3}}));
        assert_eq!(base, json!({"a": 1, "b": {"c": 2, "d": 3}}));
    }

    #[test]
    fn test_combined_target() {
        let mut config = ConversationConfig {
            word_count: Some(200),
            ..Default::default()
        };
        assert_eq!(config.combined_target(4), Some(200));
        config.longform = true;
        assert_eq!(config.combined_target(4), Some(400));
        config.word_count = Some(0);
        assert_eq!(config.combined_target(4), None);
    }

    #[test]
    fn test_disable_dominates_short() {
        let config = ConversationConfig {
            short_intro_and_conclusion: true,
            disable_intro_and_conclusion: true,
            ..Default::default()
        };
        assert_eq!(config.intro_mode(), IntroMode::Disabled);
    }
}
