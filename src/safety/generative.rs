//! Generative-model response envelopes (`promptFeedback` / `candidates`).

use serde::{Deserialize, Serialize};

use super::keywords::KeywordPolicy;
use super::{SafetyVerdict, codes};

/// Response of a Gemini-style `generateContent` call, reduced to what
/// image extraction and safety normalisation need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerativeResponse {
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

/// Feedback on the prompt itself. A set `block_reason` means no candidates were produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptFeedback {
    #[serde(alias = "blockedReason", skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason_message: Option<String>,
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Candidate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_message: Option<String>,
    pub safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    /// Thought summaries are not part of the answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Per-category safety rating.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyRating {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl SafetyRating {
    fn is_flagged(&self) -> bool {
        self.blocked == Some(true)
            || matches!(self.probability.as_deref(), Some("MEDIUM" | "HIGH"))
    }
}

/// Finish reasons that always mean the candidate was withheld.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "RECITATION",
    "BLOCKED",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

/// Map a harm-category string to `(code, category)`.
pub fn harm_category(name: &str) -> Option<(u16, &'static str)> {
    match name.trim().to_ascii_uppercase().as_str() {
        "HARM_CATEGORY_HATE_SPEECH" | "HARM_CATEGORY_IMAGE_HATE" => {
            Some((codes::HATE_SPEECH, "hate_speech"))
        }
        "HARM_CATEGORY_HARASSMENT" | "HARM_CATEGORY_IMAGE_HARASSMENT" => {
            Some((codes::HARASSMENT, "harassment"))
        }
        "HARM_CATEGORY_SEXUALLY_EXPLICIT" | "HARM_CATEGORY_IMAGE_SEXUALLY_EXPLICIT" => {
            Some((codes::SEXUALLY_EXPLICIT, "sexually_explicit"))
        }
        "HARM_CATEGORY_DANGEROUS_CONTENT" | "HARM_CATEGORY_IMAGE_DANGEROUS_CONTENT" => {
            Some((codes::DANGEROUS_CONTENT, "dangerous_content"))
        }
        _ => None,
    }
}

impl Candidate {
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.content.iter().flat_map(|c| c.parts.iter())
    }

    pub fn has_image(&self) -> bool {
        self.parts().any(|p| p.inline_data.is_some())
    }

    /// Answer text, excluding thought summaries.
    pub fn text(&self) -> String {
        self.parts()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    fn is_blocked(&self, expects_image: bool) -> bool {
        match self.finish_reason.as_deref() {
            Some(r) if BLOCKING_FINISH_REASONS.contains(&r) => true,
            Some("STOP") => expects_image && !self.has_image(),
            _ => false,
        }
    }
}

impl GenerativeResponse {
    /// First inline image across candidates.
    pub fn first_image(&self) -> Option<&InlineData> {
        self.candidates
            .iter()
            .flat_map(|c| c.parts())
            .find_map(|p| p.inline_data.as_ref())
    }

    /// Concatenated answer text of the first candidate.
    pub fn text(&self) -> Option<String> {
        self.candidates
            .first()
            .map(Candidate::text)
            .filter(|t| !t.trim().is_empty())
    }

    /// Normalise this envelope into a verdict.
    pub fn evaluate(&self, expects_image: bool, keywords: &KeywordPolicy) -> SafetyVerdict {
        if let Some(feedback) = &self.prompt_feedback
            && let Some(reason) = feedback.block_reason.as_deref()
        {
            return prompt_block(reason, feedback);
        }

        let Some(candidate) = self.candidates.iter().find(|c| c.is_blocked(expects_image)) else {
            return SafetyVerdict::safe();
        };
        let finish = candidate.finish_reason.as_deref().unwrap_or("STOP");

        if let Some((rating, (code, category))) = candidate
            .safety_ratings
            .iter()
            .filter(|r| r.is_flagged())
            .find_map(|r| harm_category(&r.category).map(|hit| (r, hit)))
        {
            return SafetyVerdict::blocked(
                code,
                category,
                rating.probability.clone(),
                format!("candidate finished with {finish}: {}", rating.category),
            );
        }

        let text = [candidate.finish_message.clone().unwrap_or_default(), candidate.text()]
            .join(" ");
        let (code, category) = keywords.classify(&text);
        let reason = match text.trim() {
            "" => format!("candidate finished with {finish}"),
            t => format!("candidate finished with {finish}: {t}"),
        };
        SafetyVerdict::blocked(code, category, None, reason)
    }
}

fn prompt_block(reason: &str, feedback: &PromptFeedback) -> SafetyVerdict {
    let message = feedback
        .block_reason_message
        .as_deref()
        .map(|m| format!("prompt blocked ({reason}): {m}"))
        .unwrap_or_else(|| format!("prompt blocked ({reason})"));

    if let Some((code, category)) = harm_category(reason) {
        return SafetyVerdict::blocked(code, category, None, message);
    }
    if let Some((rating, (code, category))) = feedback
        .safety_ratings
        .iter()
        .filter(|r| r.is_flagged())
        .find_map(|r| harm_category(&r.category).map(|hit| (r, hit)))
    {
        return SafetyVerdict::blocked(code, category, rating.probability.clone(), message);
    }
    SafetyVerdict::blocked(codes::UNKNOWN, "unknown", None, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> GenerativeResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn prompt_block_maps_harm_category() {
        let r = parse(json!({"promptFeedback": {"blockedReason": "HARM_CATEGORY_HARASSMENT"}}));
        let v = r.evaluate(true, &KeywordPolicy::default());
        assert_eq!(v.code, Some(2002));
    }

    #[test]
    fn unrecognised_prompt_block_is_unknown() {
        let r = parse(json!({"promptFeedback": {"blockReason": "OTHER"}}));
        let v = r.evaluate(true, &KeywordPolicy::default());
        assert!(!v.is_safe);
        assert_eq!(v.code, Some(3000));
    }

    #[test]
    fn flagged_rating_wins_over_keywords() {
        let r = parse(json!({"candidates": [{
            "finishReason": "IMAGE_SAFETY",
            "finishMessage": "violence detected",
            "safetyRatings": [
                {"category": "HARM_CATEGORY_HATE_SPEECH", "probability": "NEGLIGIBLE"},
                {"category": "HARM_CATEGORY_IMAGE_SEXUALLY_EXPLICIT", "probability": "HIGH"}
            ]
        }]}));
        let v = r.evaluate(true, &KeywordPolicy::default());
        assert_eq!(v.code, Some(2003));
        assert_eq!(v.level.as_deref(), Some("HIGH"));
    }

    #[test]
    fn stop_without_image_falls_back_to_keywords() {
        let r = parse(json!({"candidates": [{
            "finishReason": "STOP",
            "content": {"parts": [{"text": "I can't generate images depicting weapons."}]}
        }]}));
        let v = r.evaluate(true, &KeywordPolicy::default());
        assert_eq!(v.code, Some(2004));
        assert!(v.reason.unwrap().contains("weapons"));
        // Text answers are expected on the prompt path.
        assert!(r.evaluate(false, &KeywordPolicy::default()).is_safe);
    }

    #[test]
    fn image_response_is_safe() {
        let r = parse(json!({"candidates": [{
            "finishReason": "STOP",
            "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AAAA"}}]}
        }]}));
        assert!(r.evaluate(true, &KeywordPolicy::default()).is_safe);
        assert_eq!(r.first_image().unwrap().mime_type, "image/png");
    }
}
