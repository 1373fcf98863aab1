//! Plain-text measurements over transcript markup.

use regex::Regex;
use std::sync::LazyLock;

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("Invalid regex"));
static DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S*\d\S*").expect("Invalid regex"));

/// Remove every tag (speaker tags and inline TTS markup), leaving spoken text.
pub fn strip_markup(text: &str) -> String {
    MARKUP.replace_all(text, " ").into_owned()
}

/// Number of spoken words, ignoring all tags.
pub fn word_count(text: &str) -> usize {
    strip_markup(text).split_whitespace().count()
}

/// Whether any Arabic digit remains in spoken text.
pub fn contains_spoken_digits(text: &str) -> bool {
    strip_markup(text).chars().any(|c| c.is_ascii_digit())
}

/// The whitespace-delimited tokens of spoken text that still contain digits.
pub fn spoken_digit_snippets(text: &str) -> Vec<String> {
    let spoken = strip_markup(text);
    DIGIT_RUN
        .find_iter(&spoken)
        .map(|m| m.as_str().to_string())
        .collect()
}
