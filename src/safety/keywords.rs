//! Keyword fallback for refusals that carry no structured safety fields.

use once_cell::sync::Lazy;
use regex::Regex;

use super::codes;
use crate::error::EngineError;

/// One ordered keyword rule.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub code: u16,
    pub category: String,
    pattern: Regex,
}

impl KeywordRule {
    /// Case-insensitive whole-word match against any of `terms`.
    pub fn new(code: u16, category: impl Into<String>, terms: &[&str]) -> Result<Self, EngineError> {
        let alternation = terms
            .iter()
            .map(|t| regex::escape(t.trim()))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).map_err(|e| {
            EngineError::ConfigurationError(format!("invalid keyword rule: {e}"))
        })?;
        Ok(Self {
            code,
            category: category.into(),
            pattern,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Rules tested in order; the first match wins.
#[derive(Debug, Clone)]
pub struct KeywordPolicy {
    rules: Vec<KeywordRule>,
}

const SEXUAL_TERMS: &[&str] = &[
    "sexual", "sexually", "explicit", "nude", "nudity", "naked", "porn", "pornographic",
    "pornography", "nsfw", "erotic",
];
const DANGEROUS_TERMS: &[&str] = &[
    "dangerous", "violence", "violent", "weapon", "weapons", "gore", "gory", "bloody",
    "self-harm", "harmful", "kill", "terrorism",
];
const HATE_TERMS: &[&str] = &[
    "hate", "hateful", "hate speech", "racist", "racism", "slur", "slurs", "discriminatory",
    "bigotry",
];
const HARASSMENT_TERMS: &[&str] = &[
    "harass", "harassment", "harassing", "bully", "bullying", "threatening", "intimidation",
    "abusive",
];
const POLICY_TERMS: &[&str] = &[
    "content policy", "policy", "policies", "guidelines", "not allowed", "violates",
    "inappropriate", "can't help", "cannot help", "can't create", "cannot create",
    "unable to generate", "i can't", "i cannot",
];

static DEFAULT_POLICY: Lazy<KeywordPolicy> = Lazy::new(KeywordPolicy::english);

impl KeywordPolicy {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// Default English lists: sexual, dangerous, hate, harassment, generic policy.
    pub fn english() -> Self {
        let table: [(u16, &str, &[&str]); 5] = [
            (codes::SEXUALLY_EXPLICIT, "sexually_explicit", SEXUAL_TERMS),
            (codes::DANGEROUS_CONTENT, "dangerous_content", DANGEROUS_TERMS),
            (codes::HATE_SPEECH, "hate_speech", HATE_TERMS),
            (codes::HARASSMENT, "harassment", HARASSMENT_TERMS),
            (codes::CONTENT_POLICY, "content_policy", POLICY_TERMS),
        ];
        let rules = table
            .into_iter()
            .filter_map(|(code, category, terms)| KeywordRule::new(code, category, terms).ok())
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// `(code, category)` of the first matching rule, or the unknown-violation code.
    pub fn classify(&self, text: &str) -> (u16, &str) {
        self.rules
            .iter()
            .find(|r| r.matches(text))
            .map_or((codes::UNKNOWN, "unknown"), |r| (r.code, r.category.as_str()))
    }
}

impl Default for KeywordPolicy {
    fn default() -> Self {
        DEFAULT_POLICY.clone()
    }
}
