use genbridge::safety::{
    KeywordPolicy, KeywordRule, Likelihood, SafeSearchAnnotation, SafetyNormalizer, SafetySignal,
    SafetyStrictness,
};
use serde_json::json;

fn annotation() -> SafeSearchAnnotation {
    SafeSearchAnnotation {
        adult: Likelihood::VeryLikely,
        violence: Likelihood::Unlikely,
        racy: Likelihood::Possible,
        ..Default::default()
    }
}

#[test]
fn lenient_mode_flags_only_very_likely() {
    let verdict = SafetyNormalizer::new(SafetyStrictness::Lenient)
        .normalize(&SafetySignal::SafeSearch(annotation()));
    assert!(!verdict.is_safe);
    assert_eq!(verdict.code, Some(1001));
    assert_eq!(verdict.category.as_deref(), Some("adult"));
    assert_eq!(verdict.level.as_deref(), Some("VERY_LIKELY"));
}

#[test]
fn strict_mode_still_reports_the_worst_category() {
    let verdict = SafetyNormalizer::new(SafetyStrictness::Strict)
        .normalize(&SafetySignal::SafeSearch(annotation()));
    assert_eq!(verdict.code, Some(1001));
    assert_eq!(verdict.category.as_deref(), Some("adult"));
}

#[test]
fn lenient_mode_passes_possible_racy_alone() {
    let a = SafeSearchAnnotation {
        racy: Likelihood::Possible,
        violence: Likelihood::Likely,
        ..Default::default()
    };
    let n = SafetyNormalizer::new(SafetyStrictness::Lenient);
    assert!(n.normalize(&SafetySignal::SafeSearch(a.clone())).is_safe);

    let sensitive = SafetyNormalizer::default().normalize(&SafetySignal::SafeSearch(a));
    assert_eq!(sensitive.code, Some(1002));
}

#[test]
fn disabled_mode_never_blocks_safe_search() {
    let verdict = SafetyNormalizer::new(SafetyStrictness::Disabled)
        .normalize(&SafetySignal::SafeSearch(annotation()));
    assert!(verdict.is_safe);
    assert_eq!(verdict.code, None);
}

#[test]
fn vision_response_body_is_recognised() {
    let body = json!({
        "responses": [{
            "safeSearchAnnotation": {
                "adult": "UNLIKELY",
                "spoof": "VERY_UNLIKELY",
                "medical": "LIKELY",
                "violence": "LIKELY",
                "racy": "UNKNOWN"
            }
        }]
    });
    let verdict = SafetyNormalizer::new(SafetyStrictness::Strict)
        .normalize_value(&body, false)
        .unwrap();
    // Equal severities resolve in category order: violence before medical.
    assert_eq!(verdict.code, Some(1002));
    assert_eq!(verdict.category.as_deref(), Some("violence"));
}

#[test]
fn unrecognised_likelihood_strings_are_tolerated() {
    let body = json!({"adult": "SOMETIMES", "racy": "VERY_UNLIKELY"});
    let verdict = SafetyNormalizer::default().normalize_value(&body, false).unwrap();
    assert!(verdict.is_safe);
}

#[test]
fn generative_image_safety_finish_uses_flagged_rating() {
    let body = json!({
        "candidates": [{
            "finishReason": "IMAGE_SAFETY",
            "safetyRatings": [
                {"category": "HARM_CATEGORY_HATE_SPEECH", "probability": "NEGLIGIBLE"},
                {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "probability": "HIGH"}
            ]
        }]
    });
    let verdict = SafetyNormalizer::default().normalize_value(&body, true).unwrap();
    assert_eq!(verdict.code, Some(2003));
    assert_eq!(verdict.level.as_deref(), Some("HIGH"));
}

#[test]
fn text_only_stop_is_a_silent_refusal_for_image_calls() {
    let body = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"text": "I can't create images that depict violence or weapons."}
            ]},
            "finishReason": "STOP"
        }]
    });
    let n = SafetyNormalizer::default();
    let verdict = n.normalize_value(&body, true).unwrap();
    assert!(!verdict.is_safe);
    assert_eq!(verdict.code, Some(2004));

    // The same answer is fine when text was all that was asked for.
    assert!(n.normalize_value(&body, false).unwrap().is_safe);
}

#[test]
fn unknown_prompt_block_reason_falls_back_to_unknown_code() {
    let body = json!({"promptFeedback": {"blockReason": "OTHER"}});
    let verdict = SafetyNormalizer::default().normalize_value(&body, true).unwrap();
    assert_eq!(verdict.code, Some(3000));
    assert_eq!(verdict.category.as_deref(), Some("unknown"));
}

#[test]
fn refusals_use_configured_keywords() {
    let custom = KeywordPolicy::new(vec![
        KeywordRule::new(2001, "hate_speech", &["slur"]).unwrap(),
    ]);
    let n = SafetyNormalizer::new(SafetyStrictness::Strict).with_keywords(custom);
    let verdict = n.normalize(&SafetySignal::Refusal("Contains a SLUR.".into()));
    assert_eq!(verdict.code, Some(2001));

    let verdict = n.normalize_refusal("filtered for reasons unknown");
    assert_eq!(verdict.code, Some(3000));
    assert_eq!(verdict.reason.as_deref(), Some("filtered for reasons unknown"));
}
