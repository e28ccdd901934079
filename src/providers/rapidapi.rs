//! RapidAPI face swap: one multipart POST, result URL in the JSON reply.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::ExposeSecret;

use super::http::{FormPart, PreparedRequest, UpstreamResponse};
use super::ProviderOutput;
use crate::config::RapidApiConfig;
use crate::error::EngineError;
use crate::types::{GenerationRequest, ImageRef, ResultRef};
use crate::utils::mime::guess_mime;

const PROVIDER: &str = "rapidapi";

/// JSON pointers checked, in order, for the result location.
const RESULT_URL_POINTERS: &[&str] = &[
    "/result_url",
    "/resultUrl",
    "/image_url",
    "/url",
    "/result",
    "/data/result_url",
    "/data/image_url",
    "/data/url",
    "/output/url",
];
const RESULT_BASE64_POINTERS: &[&str] = &["/image_base64", "/result_base64", "/data/image_base64"];

pub struct RapidApiProvider {
    config: RapidApiConfig,
}

fn image_field(kind: &str, image: &ImageRef) -> FormPart {
    match image {
        ImageRef::Url(url) => FormPart::Text {
            name: format!("{kind}_url"),
            value: url.clone(),
        },
        ImageRef::Bytes { data, mime_type } => {
            let mime_type = mime_type
                .clone()
                .unwrap_or_else(|| guess_mime(Some(data), None));
            let ext = mime_guess::get_mime_extensions_str(&mime_type)
                .and_then(|exts| exts.first())
                .copied()
                .unwrap_or("bin");
            FormPart::File {
                name: format!("{kind}_image"),
                file_name: format!("{kind}.{ext}"),
                mime_type,
                bytes: data.clone(),
            }
        }
    }
}

impl RapidApiProvider {
    pub fn new(config: RapidApiConfig) -> Self {
        Self { config }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/swap", self.config.base_url.trim_end_matches('/'))
    }

    /// Multipart request: URLs become `*_url` text fields, bytes become `*_image` files.
    pub fn build_request(&self, request: &GenerationRequest) -> Result<PreparedRequest, EngineError> {
        let source = request.source_image.as_ref().ok_or_else(|| {
            EngineError::InvalidInput("face swap requires a source image".to_string())
        })?;

        let mut parts = vec![
            image_field("source", source),
            image_field("target", &request.target_image),
        ];
        let mut extra: Vec<_> = request.extra_params.iter().collect();
        extra.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in extra {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            parts.push(FormPart::Text {
                name: name.clone(),
                value,
            });
        }

        PreparedRequest::post_multipart(self.endpoint(), parts, self.config.timeout)
            .header("x-rapidapi-key", self.config.api_key.expose_secret())?
            .header("x-rapidapi-host", &self.config.host)
    }

    pub fn parse_response(&self, resp: &UpstreamResponse) -> Result<ProviderOutput, EngineError> {
        if let Some(ct) = resp.content_type()
            && ct.starts_with("image/")
        {
            let mime_type = ct.split(';').next().unwrap_or(ct).trim().to_string();
            return Ok(ProviderOutput {
                result_ref: Some(ResultRef::Inline {
                    mime_type,
                    data_base64: STANDARD.encode(&resp.body),
                }),
                ..Default::default()
            });
        }

        let body = resp.json()?;
        let failed = body.get("success").and_then(|v| v.as_bool()) == Some(false)
            || matches!(
                body.get("status").and_then(|v| v.as_str()),
                Some("error" | "failed")
            );
        if failed {
            let message = ["/message", "/error", "/error/message", "/detail"]
                .iter()
                .find_map(|p| body.pointer(p).and_then(|v| v.as_str()))
                .unwrap_or("face swap failed");
            return Err(EngineError::UpstreamTaskFailed(format!(
                "provider={PROVIDER} {message}"
            )));
        }

        if let Some(url) = RESULT_URL_POINTERS
            .iter()
            .find_map(|p| {
                body.pointer(p)
                    .and_then(|v| v.as_str())
                    .filter(|u| u.starts_with("http"))
            })
        {
            return Ok(ProviderOutput {
                result_ref: Some(ResultRef::Url {
                    url: url.to_string(),
                }),
                upstream_task_id: body
                    .get("request_id")
                    .or_else(|| body.get("id"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                ..Default::default()
            });
        }

        if let Some(data) = RESULT_BASE64_POINTERS
            .iter()
            .find_map(|p| body.pointer(p).and_then(|v| v.as_str()))
        {
            let decoded = STANDARD
                .decode(data)
                .map_err(|e| EngineError::ParseError(format!("invalid base64 image: {e}")))?;
            return Ok(ProviderOutput {
                result_ref: Some(ResultRef::Inline {
                    mime_type: guess_mime(Some(&decoded), None),
                    data_base64: data.to_string(),
                }),
                ..Default::default()
            });
        }

        Err(EngineError::ParseError(format!(
            "provider={PROVIDER} response carries no result image"
        )))
    }
}
