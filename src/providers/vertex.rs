//! Vertex AI: Gemini image generation, Imagen upscaling and the prompt model.
//!
//! All three endpoints take inline base64 image parts and a service-account
//! bearer token. Gemini replies with the generative envelope; Imagen replies
//! with a `predictions` array whose entries may carry `raiFilteredReason`
//! instead of an image.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use super::ProviderOutput;
use super::http::{PreparedRequest, UpstreamResponse};
use crate::config::VertexConfig;
use crate::error::EngineError;
use crate::fetch::LoadedImage;
use crate::safety::{GenerativeResponse, SafetySignal};
use crate::types::ResultRef;
use crate::utils::vertex_model_url;

const DEFAULT_EDIT_PROMPT: &str =
    "Edit the provided image as instructed while preserving the identity of the people in it.";
pub const DEFAULT_PROMPT_INSTRUCTION: &str = "Describe this image as a detailed prompt for an image generation model. \
Reply with the prompt only.";

/// Passthrough `generationConfig` keys accepted from `extra_params`.
const GENERATION_CONFIG_KEYS: &[&str] = &["temperature", "topP", "topK", "seed", "candidateCount"];

pub struct VertexProvider {
    config: VertexConfig,
}

fn inline_part(image: &LoadedImage) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type,
            "data": STANDARD.encode(&image.bytes),
        }
    })
}

impl VertexProvider {
    pub fn new(config: VertexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VertexConfig {
        &self.config
    }

    pub fn generate_endpoint(&self) -> String {
        vertex_model_url(&self.config.endpoint_base(), &self.config.model, "generateContent")
    }

    pub fn upscale_endpoint(&self) -> String {
        vertex_model_url(&self.config.endpoint_base(), &self.config.upscale_model, "predict")
    }

    pub fn prompt_endpoint(&self) -> String {
        vertex_model_url(&self.config.endpoint_base(), &self.config.prompt_model, "generateContent")
    }

    /// `generateContent` with the prompt, the target image and, for swaps, the source image.
    pub fn build_generate(
        &self,
        prompt: &str,
        target: &LoadedImage,
        source: Option<&LoadedImage>,
        aspect_ratio: Option<&str>,
        extra: &std::collections::HashMap<String, Value>,
    ) -> PreparedRequest {
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_EDIT_PROMPT
        } else {
            prompt
        };
        let mut parts = vec![json!({ "text": prompt }), inline_part(target)];
        if let Some(source) = source {
            parts.push(inline_part(source));
        }

        let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
        if let Some(ratio) = aspect_ratio {
            generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
        }
        for key in GENERATION_CONFIG_KEYS {
            if let Some(v) = extra.get(*key) {
                generation_config[*key] = v.clone();
            }
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        });
        if let Some(settings) = extra.get("safetySettings").filter(|v| v.is_array()) {
            body["safetySettings"] = settings.clone();
        }
        PreparedRequest::post_json(self.generate_endpoint(), body, self.config.timeout)
    }

    /// Imagen `predict` in upscale mode.
    pub fn build_upscale(
        &self,
        target: &LoadedImage,
        extra: &std::collections::HashMap<String, Value>,
    ) -> PreparedRequest {
        let factor = extra
            .get("upscaleFactor")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.config.upscale_factor);
        let body = json!({
            "instances": [{
                "prompt": "",
                "image": { "bytesBase64Encoded": STANDARD.encode(&target.bytes) },
            }],
            "parameters": {
                "mode": "upscale",
                "upscaleConfig": { "upscaleFactor": factor },
                "outputOptions": { "mimeType": "image/png" },
            },
        });
        PreparedRequest::post_json(self.upscale_endpoint(), body, self.config.timeout)
    }

    /// Text-only `generateContent` asking the model to describe an image.
    pub fn build_prompt(&self, image: &LoadedImage, instruction: Option<&str>) -> PreparedRequest {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": instruction.unwrap_or(DEFAULT_PROMPT_INSTRUCTION) },
                    inline_part(image),
                ],
            }],
            "generationConfig": { "responseModalities": ["TEXT"] },
        });
        PreparedRequest::post_json(self.prompt_endpoint(), body, self.config.timeout)
    }

    pub fn parse_generate(&self, resp: &UpstreamResponse) -> Result<ProviderOutput, EngineError> {
        let response: GenerativeResponse = serde_json::from_value(resp.json()?)?;
        let result_ref = response.first_image().map(|img| ResultRef::Inline {
            mime_type: img.mime_type.clone(),
            data_base64: img.data.clone(),
        });
        Ok(ProviderOutput {
            result_ref,
            text: response.text(),
            safety_signal: Some(SafetySignal::Generative {
                response,
                expects_image: true,
            }),
            upstream_task_id: None,
        })
    }

    pub fn parse_prompt(&self, resp: &UpstreamResponse) -> Result<ProviderOutput, EngineError> {
        let response: GenerativeResponse = serde_json::from_value(resp.json()?)?;
        Ok(ProviderOutput {
            result_ref: None,
            text: response.text(),
            safety_signal: Some(SafetySignal::Generative {
                response,
                expects_image: false,
            }),
            upstream_task_id: None,
        })
    }

    pub fn parse_upscale(&self, resp: &UpstreamResponse) -> Result<ProviderOutput, EngineError> {
        let body = resp.json()?;
        let predictions = body
            .get("predictions")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let image = predictions.iter().find_map(|p| {
            let data = p
                .get("bytesBase64Encoded")
                .or_else(|| p.pointer("/image/bytesBase64Encoded"))
                .and_then(|v| v.as_str())?;
            let mime_type = p
                .get("mimeType")
                .and_then(|v| v.as_str())
                .unwrap_or("image/png");
            Some(ResultRef::Inline {
                mime_type: mime_type.to_string(),
                data_base64: data.to_string(),
            })
        });
        if let Some(result_ref) = image {
            return Ok(ProviderOutput {
                result_ref: Some(result_ref),
                ..Default::default()
            });
        }

        let filtered = predictions
            .iter()
            .find_map(|p| p.get("raiFilteredReason").and_then(|v| v.as_str()));
        match filtered {
            Some(reason) => Ok(ProviderOutput {
                safety_signal: Some(SafetySignal::Refusal(reason.to_string())),
                ..Default::default()
            }),
            None => Err(EngineError::ParseError(
                "upscale response carries neither an image nor a filter reason".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use std::collections::HashMap;

    fn provider() -> VertexProvider {
        VertexProvider::new(VertexConfig::new("proj").with_base_url("http://vertex.local/v1/publishers/google"))
    }

    fn image() -> LoadedImage {
        LoadedImage {
            bytes: Bytes::from_static(b"abc"),
            mime_type: "image/jpeg".into(),
        }
    }

    fn response(v: Value) -> UpstreamResponse {
        UpstreamResponse {
            status: 200,
            headers: HeaderMap::new(),
            body: Bytes::from(v.to_string()),
        }
    }

    #[test]
    fn generate_request_carries_aspect_ratio_and_parts() {
        let mut extra = HashMap::new();
        extra.insert("temperature".to_string(), json!(0.4));
        let req = provider().build_generate("swap faces", &image(), Some(&image()), Some("4:3"), &extra);
        assert_eq!(
            req.url,
            "http://vertex.local/v1/publishers/google/models/gemini-2.5-flash-image:generateContent"
        );
        let crate::providers::RequestBody::Json(body) = req.body else {
            panic!("expected json");
        };
        assert_eq!(body["generationConfig"]["imageConfig"]["aspectRatio"], "4:3");
        assert_eq!(body["generationConfig"]["temperature"], 0.4);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1]["inlineData"]["data"], "YWJj");
    }

    #[test]
    fn upscale_reads_image_or_filter_reason() {
        let p = provider();
        let ok = p
            .parse_upscale(&response(json!({"predictions": [{"bytesBase64Encoded": "AAA", "mimeType": "image/png"}]})))
            .unwrap();
        assert!(matches!(ok.result_ref, Some(ResultRef::Inline { .. })));

        let filtered = p
            .parse_upscale(&response(json!({"predictions": [{"raiFilteredReason": "The image contains nudity."}]})))
            .unwrap();
        assert!(filtered.result_ref.is_none());
        assert!(matches!(filtered.safety_signal, Some(SafetySignal::Refusal(_))));

        assert!(p.parse_upscale(&response(json!({}))).is_err());
    }

    #[test]
    fn generate_response_exposes_image() {
        let out = provider()
            .parse_generate(&response(json!({"candidates": [{
                "finishReason": "STOP",
                "content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "QUJD"}}]}
            }]})))
            .unwrap();
        assert_eq!(
            out.result_ref,
            Some(ResultRef::Inline { mime_type: "image/png".into(), data_base64: "QUJD".into() })
        );
    }
}
