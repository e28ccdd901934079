//! Safety violation normalisation.
//!
//! Two upstream vocabularies are folded into one [`SafetyVerdict`]:
//! SafeSearch five-category annotations from a vision API, and the
//! `promptFeedback`/`candidates` envelope of generative image models.
//! Refusals without structured fields fall back to a [`KeywordPolicy`].

pub mod generative;
pub mod keywords;
pub mod safe_search;
pub mod vision;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use generative::{GenerativeResponse, harm_category};
pub use keywords::{KeywordPolicy, KeywordRule};
pub use safe_search::{Likelihood, SafeSearchAnnotation};
pub use vision::SafeSearchClient;

/// Fixed violation codes.
pub mod codes {
    pub const ADULT: u16 = 1001;
    pub const VIOLENCE: u16 = 1002;
    pub const RACY: u16 = 1003;
    pub const MEDICAL: u16 = 1004;
    pub const SPOOF: u16 = 1005;

    pub const HATE_SPEECH: u16 = 2001;
    pub const HARASSMENT: u16 = 2002;
    pub const SEXUALLY_EXPLICIT: u16 = 2003;
    pub const DANGEROUS_CONTENT: u16 = 2004;

    pub const UNKNOWN: u16 = 3000;
    pub const CONTENT_POLICY: u16 = 3001;
}

/// Normalised outcome of one safety check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyVerdict {
    pub is_safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            code: None,
            category: None,
            level: None,
            reason: None,
        }
    }

    pub fn blocked(
        code: u16,
        category: impl Into<String>,
        level: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            is_safe: false,
            code: Some(code),
            category: Some(category.into()),
            level,
            reason: Some(reason.into()),
        }
    }
}

/// Which SafeSearch levels count as unsafe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStrictness {
    /// Nothing is ever flagged.
    Disabled,
    /// VERY_LIKELY only.
    Lenient,
    /// LIKELY and VERY_LIKELY.
    Strict,
    /// POSSIBLE and above.
    #[default]
    Sensitive,
}

impl SafetyStrictness {
    /// Minimum [`Likelihood::severity`] that is unsafe, `None` when disabled.
    pub fn min_severity(self) -> Option<u8> {
        match self {
            Self::Disabled => None,
            Self::Lenient => Some(3),
            Self::Strict => Some(2),
            Self::Sensitive => Some(1),
        }
    }
}

impl FromStr for SafetyStrictness {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            "sensitive" => Ok(Self::Sensitive),
            other => Err(EngineError::ConfigurationError(format!(
                "unknown safety strictness '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SafetyStrictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Lenient => "lenient",
            Self::Strict => "strict",
            Self::Sensitive => "sensitive",
        })
    }
}

/// Input accepted by [`SafetyNormalizer::normalize`].
#[derive(Debug, Clone)]
pub enum SafetySignal {
    SafeSearch(SafeSearchAnnotation),
    Generative {
        response: GenerativeResponse,
        /// Whether the call was supposed to return an image; a plain `STOP`
        /// without one is then a silent refusal.
        expects_image: bool,
    },
    /// Free-text refusal, e.g. an Imagen `raiFilteredReason`.
    Refusal(String),
}

/// Folds upstream safety signals into [`SafetyVerdict`]s.
#[derive(Debug, Clone, Default)]
pub struct SafetyNormalizer {
    strictness: SafetyStrictness,
    keywords: KeywordPolicy,
}

impl SafetyNormalizer {
    pub fn new(strictness: SafetyStrictness) -> Self {
        Self {
            strictness,
            keywords: KeywordPolicy::default(),
        }
    }

    pub fn with_keywords(mut self, keywords: KeywordPolicy) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn strictness(&self) -> SafetyStrictness {
        self.strictness
    }

    pub fn normalize(&self, signal: &SafetySignal) -> SafetyVerdict {
        match signal {
            SafetySignal::SafeSearch(annotation) => annotation.evaluate(self.strictness),
            SafetySignal::Generative {
                response,
                expects_image,
            } => response.evaluate(*expects_image, &self.keywords),
            SafetySignal::Refusal(text) => self.normalize_refusal(text),
        }
    }

    pub fn normalize_refusal(&self, text: &str) -> SafetyVerdict {
        let (code, category) = self.keywords.classify(text);
        SafetyVerdict::blocked(code, category, None, text.trim())
    }

    /// Normalise a raw JSON body whose shape is not known in advance.
    ///
    /// Accepts a Vision `images:annotate` response, a bare or wrapped
    /// `safeSearchAnnotation`, or a generative-model envelope.
    pub fn normalize_value(
        &self,
        body: &serde_json::Value,
        expects_image: bool,
    ) -> Result<SafetyVerdict, EngineError> {
        let annotation = body
            .pointer("/responses/0/safeSearchAnnotation")
            .or_else(|| body.get("safeSearchAnnotation"));
        if let Some(a) = annotation {
            let a: SafeSearchAnnotation = serde_json::from_value(a.clone())?;
            return Ok(self.normalize(&SafetySignal::SafeSearch(a)));
        }
        let is_bare_annotation = ["adult", "violence", "racy", "medical", "spoof"]
            .iter()
            .any(|k| body.get(*k).is_some_and(|v| v.is_string()));
        if is_bare_annotation {
            let a: SafeSearchAnnotation = serde_json::from_value(body.clone())?;
            return Ok(self.normalize(&SafetySignal::SafeSearch(a)));
        }
        if body.get("candidates").is_some() || body.get("promptFeedback").is_some() {
            let response: GenerativeResponse = serde_json::from_value(body.clone())?;
            return Ok(self.normalize(&SafetySignal::Generative {
                response,
                expects_image,
            }));
        }
        Err(EngineError::ParseError(
            "body carries no recognised safety signal".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn verdict_serialises_camel_case() {
        let v = SafetyVerdict::blocked(1001, "adult", Some("LIKELY".into()), "r");
        let j = serde_json::to_value(&v).unwrap();
        assert_eq!(j["isSafe"], false);
        assert_eq!(j["code"], 1001);
        let safe = serde_json::to_value(SafetyVerdict::safe()).unwrap();
        assert_eq!(safe, json!({"isSafe": true}));
    }

    #[test]
    fn detects_body_shapes() {
        let n = SafetyNormalizer::new(SafetyStrictness::Strict);
        let vision = json!({"responses": [{"safeSearchAnnotation": {"spoof": "LIKELY"}}]});
        assert_eq!(n.normalize_value(&vision, false).unwrap().code, Some(1005));

        let bare = json!({"adult": "VERY_UNLIKELY", "medical": "VERY_LIKELY"});
        assert_eq!(n.normalize_value(&bare, false).unwrap().code, Some(1004));

        let gen_body = json!({"promptFeedback": {"blockReason": "HARM_CATEGORY_DANGEROUS_CONTENT"}});
        assert_eq!(n.normalize_value(&gen_body, true).unwrap().code, Some(2004));

        assert!(n.normalize_value(&json!({"foo": 1}), true).is_err());
    }

    #[test]
    fn strictness_parses() {
        assert_eq!("Lenient".parse::<SafetyStrictness>().unwrap(), SafetyStrictness::Lenient);
        assert!("paranoid".parse::<SafetyStrictness>().is_err());
        assert_eq!(SafetyStrictness::default(), SafetyStrictness::Sensitive);
    }

    #[test]
    fn refusal_text_is_classified() {
        let n = SafetyNormalizer::default();
        let v = n.normalize_refusal("Image editing failed due to potential nudity.");
        assert_eq!(v.code, Some(2003));
    }
}
