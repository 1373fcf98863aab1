//! Verifier verdicts.

use serde::{Deserialize, Deserializer, Serialize};

/// One problem found by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub title: String,
    /// 1 = minor, 2 = must fix, 3 = critical.
    #[serde(default = "default_severity")]
    pub severity: u8,
    /// Which part of the source content or rubric the issue concerns.
    #[serde(default, deserialize_with = "string_or_list")]
    pub coverage: String,
    /// Quoted transcript excerpts the issue refers to.
    #[serde(default, deserialize_with = "list_or_string")]
    pub transcript_segments: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub suggestions: String,
}

fn default_severity() -> u8 {
    2
}

impl QualityIssue {
    pub fn new(title: impl Into<String>, severity: u8, suggestions: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            severity: severity.clamp(1, 3),
            coverage: String::new(),
            transcript_segments: Vec::new(),
            suggestions: suggestions.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity >= 2
    }

    /// Render as one feedback item for the rewriter.
    pub fn as_feedback(&self) -> String {
        let mut out = format!("- {} (severity {})", self.title, self.severity);
        if !self.coverage.is_empty() {
            out.push_str(&format!("\n  Coverage: {}", self.coverage));
        }
        for segment in self.transcript_segments.iter().take(3) {
            out.push_str(&format!("\n  Segment: \"{}\"", segment));
        }
        if !self.suggestions.is_empty() {
            out.push_str(&format!("\n  Fix: {}", self.suggestions));
        }
        out
    }
}

/// Result of the quality verifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptQualityCheck {
    #[serde(default)]
    pub pass_test: bool,
    #[serde(default)]
    pub issues: Vec<QualityIssue>,
}

impl TranscriptQualityCheck {
    /// Passing means no issue of severity 2 or higher.
    pub fn passes(&self) -> bool {
        !self.issues.iter().any(QualityIssue::is_blocking)
    }

    /// Merge extra issues and recompute `pass_test`.
    pub fn merge(&mut self, issues: Vec<QualityIssue>) {
        for issue in issues {
            if !self.issues.iter().any(|i| i.title == issue.title) {
                self.issues.push(issue);
            }
        }
        self.pass_test = self.passes();
    }

    /// Issues ordered most severe first.
    pub fn ranked_issues(&self) -> Vec<&QualityIssue> {
        let mut issues: Vec<&QualityIssue> = self.issues.iter().collect();
        issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        issues
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn string_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => s,
        Some(OneOrMany::Many(v)) => v.join(" "),
        None => String::new(),
    })
}

fn list_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_ignores_minor_issues() {
        let check = TranscriptQualityCheck {
            pass_test: false,
            issues: vec![QualityIssue::new("Slightly repetitive", 1, "Vary wording")],
        };
        assert!(check.passes());
    }

    #[test]
    fn test_fail_on_severity_two() {
        let check = TranscriptQualityCheck {
            pass_test: true,
            issues: vec![QualityIssue::new("Digits present", 2, "Spell out numbers")],
        };
        assert!(!check.passes());
    }

    #[test]
    fn test_lenient_deserialization() {
        let json = r#"{
            "pass_test": false,
            "issues": [
                {"title": "Too many fillers", "severity": 2, "coverage": "style",
                 "transcript_segments": "Yeah, totally", "suggestions": ["Remove fillers", "Vary tone"]}
            ]
        }"#;
        let check: TranscriptQualityCheck = serde_json::from_str(json).unwrap();
        assert_eq!(check.issues[0].transcript_segments, vec!["Yeah, totally".to_string()]);
        assert_eq!(check.issues[0].suggestions, "Remove fillers Vary tone");
    }

    #[test]
    fn test_merge_recomputes_pass() {
        let mut check = TranscriptQualityCheck { pass_test: true, issues: vec![] };
        check.merge(vec![QualityIssue::new("Wrong speaker order", 3, "Start with Person1")]);
        assert!(!check.pass_test);
        assert_eq!(check.ranked_issues()[0].severity, 3);
    }
}
