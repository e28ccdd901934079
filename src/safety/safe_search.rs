//! Five-category SafeSearch annotations.

use serde::{Deserialize, Serialize};

use super::{SafetyStrictness, SafetyVerdict, codes};

/// Ordinal likelihood scale used by SafeSearch.
///
/// Ranking goes through [`Likelihood::severity`]; values the API adds later
/// deserialize as `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Likelihood {
    VeryUnlikely,
    Unlikely,
    Possible,
    Likely,
    VeryLikely,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Likelihood {
    /// Severity rank among the unsafe levels: POSSIBLE=1, LIKELY=2, VERY_LIKELY=3, otherwise 0.
    pub fn severity(self) -> u8 {
        match self {
            Self::Possible => 1,
            Self::Likely => 2,
            Self::VeryLikely => 3,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::VeryUnlikely => "VERY_UNLIKELY",
            Self::Unlikely => "UNLIKELY",
            Self::Possible => "POSSIBLE",
            Self::Likely => "LIKELY",
            Self::VeryLikely => "VERY_LIKELY",
        }
    }
}

/// `safeSearchAnnotation` as returned by the Vision API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeSearchAnnotation {
    pub adult: Likelihood,
    pub violence: Likelihood,
    pub racy: Likelihood,
    pub medical: Likelihood,
    pub spoof: Likelihood,
}

impl SafeSearchAnnotation {
    /// Categories in tie-break order with their fixed codes.
    fn categories(&self) -> [(&'static str, u16, Likelihood); 5] {
        [
            ("adult", codes::ADULT, self.adult),
            ("violence", codes::VIOLENCE, self.violence),
            ("racy", codes::RACY, self.racy),
            ("medical", codes::MEDICAL, self.medical),
            ("spoof", codes::SPOOF, self.spoof),
        ]
    }

    /// Worst unsafe category under `strictness`, or a safe verdict.
    pub fn evaluate(&self, strictness: SafetyStrictness) -> SafetyVerdict {
        let Some(min_severity) = strictness.min_severity() else {
            return SafetyVerdict::safe();
        };
        let mut worst: Option<(&'static str, u16, Likelihood)> = None;
        for (category, code, level) in self.categories() {
            if level.severity() < min_severity {
                continue;
            }
            if worst.is_none_or(|(_, _, w)| level.severity() > w.severity()) {
                worst = Some((category, code, level));
            }
        }
        match worst {
            Some((category, code, level)) => SafetyVerdict::blocked(
                code,
                category,
                Some(level.as_str().to_string()),
                format!("{category} content rated {}", level.as_str()),
            ),
            None => SafetyVerdict::safe(),
        }
    }
}
