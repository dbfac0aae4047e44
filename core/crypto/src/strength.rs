//! Advisory passphrase strength estimate.
//!
//! The score only informs the caller; nothing in the cipher consults it.

use serde::Serialize;

/// Coarse strength bucket derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthLevel {
    VeryWeak,
    Weak,
    Fair,
    Strong,
    VeryStrong,
}

impl StrengthLevel {
    fn from_score(score: u8) -> Self {
        match score {
            0..=19 => StrengthLevel::VeryWeak,
            20..=39 => StrengthLevel::Weak,
            40..=59 => StrengthLevel::Fair,
            60..=79 => StrengthLevel::Strong,
            _ => StrengthLevel::VeryStrong,
        }
    }
}

/// Result of [`assess_passphrase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrengthReport {
    /// Score in `0..=100`.
    pub score: u8,
    pub level: StrengthLevel,
    /// Human-readable hints for improving the passphrase.
    pub suggestions: Vec<String>,
}

const COMMON_FRAGMENTS: &[&str] = &[
    "password", "passwort", "qwerty", "letmein", "welcome", "admin", "iloveyou", "monkey",
    "dragon", "123456", "abc123", "secret",
];

/// Score a passphrase from length, character classes and pattern penalties.
pub fn assess_passphrase(passphrase: &str) -> StrengthReport {
    let mut suggestions = Vec::new();
    let chars: Vec<char> = passphrase.chars().collect();
    let len = chars.len();

    if len == 0 {
        return StrengthReport {
            score: 0,
            level: StrengthLevel::VeryWeak,
            suggestions: vec!["Enter a passphrase".to_string()],
        };
    }

    // Length carries most of the weight: 4 points per char up to 60.
    let mut score: i32 = (len.min(15) * 4) as i32;
    if len < 12 {
        suggestions.push("Use at least 12 characters".to_string());
    }

    let has_lower = chars.iter().any(|c| c.is_lowercase());
    let has_upper = chars.iter().any(|c| c.is_uppercase());
    let has_digit = chars.iter().any(|c| c.is_ascii_digit());
    let has_symbol = chars.iter().any(|c| !c.is_alphanumeric());
    let classes = [has_lower, has_upper, has_digit, has_symbol]
        .iter()
        .filter(|&&present| present)
        .count() as i32;
    score += classes * 10;
    if classes < 3 {
        suggestions.push("Mix upper and lower case letters, digits and symbols".to_string());
    }

    if has_repeated_run(&chars, 3) {
        score -= 15;
        suggestions.push("Avoid repeating the same character".to_string());
    }
    if has_sequence(&chars, 4) {
        score -= 15;
        suggestions.push("Avoid sequences like 'abcd' or '1234'".to_string());
    }

    let lowered = passphrase.to_lowercase();
    if COMMON_FRAGMENTS.iter().any(|word| lowered.contains(word)) {
        score -= 25;
        suggestions.push("Avoid common words and passwords".to_string());
    }

    let unique: std::collections::HashSet<&char> = chars.iter().collect();
    if unique.len() * 3 < len {
        score -= 10;
    }

    let score = score.clamp(0, 100) as u8;
    StrengthReport {
        score,
        level: StrengthLevel::from_score(score),
        suggestions,
    }
}

fn has_repeated_run(chars: &[char], run: usize) -> bool {
    chars
        .windows(run)
        .any(|w| w.iter().all(|&c| c == w[0]))
}

fn has_sequence(chars: &[char], run: usize) -> bool {
    chars.windows(run).any(|w| {
        let ascending = w.windows(2).all(|p| p[1] as i64 - p[0] as i64 == 1);
        let descending = w.windows(2).all(|p| p[0] as i64 - p[1] as i64 == 1);
        ascending || descending
    })
}
