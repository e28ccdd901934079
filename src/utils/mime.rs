//! MIME type detection for image payloads

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::image::detect_format;

/// Guess MIME by inspecting bytes.
///
/// The three formats the inspector understands are recognised directly;
/// anything else goes through `infer`.
pub fn guess_mime_from_bytes(bytes: &[u8]) -> Option<String> {
    if let Some(format) = detect_format(bytes) {
        return Some(format.mime_type().to_string());
    }
    infer::get(bytes).map(|k| k.mime_type().to_string())
}

/// Guess MIME by URL path extension. Query strings and fragments are ignored.
pub fn guess_mime_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    mime_guess::from_path(path)
        .first_raw()
        .map(|s| s.to_string())
}

/// Prefer bytes, fall back to the URL extension, otherwise `application/octet-stream`.
pub fn guess_mime(bytes: Option<&[u8]>, url: Option<&str>) -> String {
    if let Some(b) = bytes
        && let Some(m) = guess_mime_from_bytes(b)
    {
        return m;
    }
    if let Some(u) = url
        && let Some(m) = guess_mime_from_url(u)
    {
        return m;
    }
    "application/octet-stream".to_string()
}

/// `data:<mime>;base64,<payload>` for upstreams that take inline images as URIs.
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}
