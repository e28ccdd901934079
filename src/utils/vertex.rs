//! Vertex AI endpoint helpers.

/// Build a Vertex AI publisher base URL.
///
/// Regional locations use the `{location}-aiplatform` host; `global` uses the global host.
pub fn vertex_base_url(project: &str, location: &str, publisher: &str) -> String {
    let host = if location == "global" {
        "aiplatform.googleapis.com".to_string()
    } else {
        format!("{location}-aiplatform.googleapis.com")
    };
    format!("https://{host}/v1/projects/{project}/locations/{location}/publishers/{publisher}")
}

/// `{base}/models/{model}:{method}`, e.g. `:generateContent` or `:predict`.
pub fn vertex_model_url(base: &str, model: &str, method: &str) -> String {
    format!("{}/models/{model}:{method}", base.trim_end_matches('/'))
}
