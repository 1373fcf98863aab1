//! Word-count classification against a target with tolerance.

use serde::{Deserialize, Serialize};

/// Targets below this are raised to it.
pub const DEFAULT_MIN_TARGET_WORDS: usize = 300;
/// Accepted deviation from the target, as a fraction.
pub const DEFAULT_TOLERANCE: f64 = 0.25;

/// Which way the length has to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LengthChange {
    /// Too long.
    Shorten,
    Keep,
    /// Too short.
    Extend,
}

impl LengthChange {
    /// -1 too long, 0 within tolerance, +1 too short.
    pub fn as_i8(self) -> i8 {
        match self {
            LengthChange::Shorten => -1,
            LengthChange::Keep => 0,
            LengthChange::Extend => 1,
        }
    }
}

/// Length rules for one repair run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthPolicy {
    /// Effective target, `None` when length is not checked.
    pub target: Option<usize>,
    pub tolerance: f64,
}

impl LengthPolicy {
    /// `word_count` of zero or `None` disables the check. Otherwise the target
    /// is raised to `floor`.
    pub fn new(word_count: Option<usize>, floor: usize, tolerance: f64) -> Self {
        Self {
            target: word_count.filter(|w| *w > 0).map(|w| w.max(floor)),
            tolerance,
        }
    }

    pub fn unchecked() -> Self {
        Self {
            target: None,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Inclusive band of accepted word counts.
    pub fn band(&self) -> Option<(f64, f64)> {
        self.target.map(|t| {
            let t = t as f64;
            (t * (1.0 - self.tolerance), t * (1.0 + self.tolerance))
        })
    }

    /// Distance from the accepted band; zero inside it or when unchecked.
    pub fn deviation(&self, words: usize) -> f64 {
        let words = words as f64;
        match self.band() {
            Some((low, _)) if words < low => low - words,
            Some((_, high)) if words > high => words - high,
            _ => 0.0,
        }
    }

    pub fn check(&self, words: usize) -> LengthCheck {
        check_transcript_length(words, self)
    }
}

/// Outcome of a length check.
#[derive(Debug, Clone, PartialEq)]
pub struct LengthCheck {
    pub words: usize,
    pub target: Option<usize>,
    pub change: LengthChange,
    /// Instruction for the rewriter, present when the length is off.
    pub instruction: Option<String>,
}

fn multiplier_phrase(ratio: f64, longer: bool) -> &'static str {
    match (longer, ratio) {
        (true, r) if r > 2.0 => "at least three times as long",
        (true, r) if r > 1.5 => "at least twice as long",
        (true, _) => "slightly longer",
        (false, r) if r > 2.0 => "at least three times shorter",
        (false, r) if r > 1.5 => "at least twice shorter",
        (false, _) => "slightly shorter",
    }
}

/// Classify `words` against the policy and phrase the fix.
pub fn check_transcript_length(words: usize, policy: &LengthPolicy) -> LengthCheck {
    let (Some(target), Some((low, high))) = (policy.target, policy.band()) else {
        return LengthCheck {
            words,
            target: None,
            change: LengthChange::Keep,
            instruction: None,
        };
    };

    let actual = words as f64;
    let (change, instruction) = if actual < low {
        let ratio = if words == 0 { f64::INFINITY } else { target as f64 / actual };
        (
            LengthChange::Extend,
            Some(format!(
                "The transcript has {} words but needs about {}. Make it {}.",
                words,
                target,
                multiplier_phrase(ratio, true)
            )),
        )
    } else if actual > high {
        let ratio = actual / target as f64;
        (
            LengthChange::Shorten,
            Some(format!(
                "The transcript has {} words but needs about {}. Make it {}.",
                words,
                target,
                multiplier_phrase(ratio, false)
            )),
        )
    } else {
        (LengthChange::Keep, None)
    };

    LengthCheck {
        words,
        target: Some(target),
        change,
        instruction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(target: usize) -> LengthPolicy {
        LengthPolicy::new(Some(target), DEFAULT_MIN_TARGET_WORDS, DEFAULT_TOLERANCE)
    }

    #[test]
    fn test_within_tolerance() {
        let check = policy(500).check(400);
        assert_eq!(check.change, LengthChange::Keep);
        assert_eq!(check.change.as_i8(), 0);
        assert!(check.instruction.is_none());
    }

    #[test]
    fn test_too_short_twice() {
        let check = policy(500).check(300);
        assert_eq!(check.change.as_i8(), 1);
        assert!(check.instruction.unwrap().contains("twice as long"));
    }

    #[test]
    fn test_too_long_three_times() {
        let check = policy(500).check(1600);
        assert_eq!(check.change.as_i8(), -1);
        assert!(check.instruction.unwrap().contains("three times shorter"));
    }

    #[test]
    fn test_multiplier_steps() {
        assert!(policy(900).check(200).instruction.unwrap().contains("three times as long"));
        assert!(policy(500).check(360).instruction.unwrap().contains("slightly longer"));
        assert!(policy(500).check(700).instruction.unwrap().contains("slightly shorter"));
        assert!(policy(500).check(900).instruction.unwrap().contains("twice shorter"));
        assert!(policy(500).check(0).instruction.unwrap().contains("three times as long"));
    }

    #[test]
    fn test_floor_and_unset_target() {
        assert_eq!(policy(200).target, Some(300));
        assert_eq!(LengthPolicy::new(Some(0), 300, 0.25).target, None);
        assert_eq!(LengthPolicy::new(None, 300, 0.25).check(5).change, LengthChange::Keep);
    }

    #[test]
    fn test_deviation_is_zero_inside_band() {
        let p = policy(400);
        assert_eq!(p.deviation(400), 0.0);
        assert_eq!(p.deviation(500), 0.0);
        assert_eq!(p.deviation(200), 100.0);
        assert_eq!(p.deviation(600), 100.0);
    }
}
