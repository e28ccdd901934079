//! WaveSpeed v3 task API: submit a prediction, then poll for its result.

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use super::http::{PreparedRequest, UpstreamResponse, send};
use super::{ProviderOutput, WaveSpeedModel};
use crate::config::WaveSpeedConfig;
use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::telemetry::ProviderTracer;
use crate::types::{GenerationRequest, ImageRef, ResultRef};
use crate::utils::{data_uri, guess_mime};

const PROVIDER: &str = "wavespeed";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    data: Option<Prediction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Prediction {
    id: String,
    status: String,
    outputs: Vec<String>,
    error: Option<String>,
}

enum TaskState {
    Pending,
    Done(ProviderOutput),
}

pub struct WaveSpeedProvider {
    config: WaveSpeedConfig,
}

fn image_value(image: &ImageRef) -> String {
    match image {
        ImageRef::Url(url) => url.clone(),
        ImageRef::Bytes { data, mime_type } => {
            let mime = mime_type
                .clone()
                .unwrap_or_else(|| guess_mime(Some(data), None));
            data_uri(&mime, data)
        }
    }
}

impl WaveSpeedProvider {
    pub fn new(config: WaveSpeedConfig) -> Self {
        Self { config }
    }

    pub fn model_path(&self, model: WaveSpeedModel) -> &str {
        match model {
            WaveSpeedModel::FaceSwap => &self.config.faceswap_model,
            WaveSpeedModel::Enhance => &self.config.enhance_model,
            WaveSpeedModel::Upscale => &self.config.upscale_model,
        }
    }

    pub fn endpoint(&self, model: WaveSpeedModel) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.model_path(model).trim_matches('/')
        )
    }

    fn result_url(&self, task_id: &str) -> String {
        format!(
            "{}/predictions/{}/result",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(task_id)
        )
    }

    pub fn build_request(
        &self,
        model: WaveSpeedModel,
        request: &GenerationRequest,
        aspect_ratio: Option<&str>,
    ) -> Result<PreparedRequest, EngineError> {
        let target = image_value(&request.target_image);
        let mut body = match model {
            WaveSpeedModel::FaceSwap => {
                let source = request.source_image.as_ref().ok_or_else(|| {
                    EngineError::InvalidInput("face swap requires a source image".to_string())
                })?;
                json!({
                    "image": target,
                    "face_image": image_value(source),
                })
            }
            WaveSpeedModel::Enhance => {
                let mut body = json!({
                    "images": [target],
                    "prompt": request.prompt,
                    "output_format": "png",
                });
                if let Some(ratio) = aspect_ratio {
                    body["aspect_ratio"] = json!(ratio);
                }
                body
            }
            WaveSpeedModel::Upscale => json!({
                "image": target,
                "target_resolution": request.extra_str("target_resolution").unwrap_or("4k"),
                "output_format": "png",
            }),
        };
        body["enable_base64_output"] = json!(false);
        body["enable_sync_mode"] = json!(false);
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in &request.extra_params {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        PreparedRequest::post_json(self.endpoint(model), body, self.config.timeout)
            .bearer(self.config.api_key.expose_secret())
    }

    fn read_prediction(resp: &UpstreamResponse) -> Result<Prediction, EngineError> {
        let envelope: Envelope = serde_json::from_value(resp.json()?)?;
        if let Some(code) = envelope.code
            && code != 200
        {
            return Err(EngineError::UpstreamTaskFailed(format!(
                "provider={PROVIDER} code={code} {}",
                envelope.message.unwrap_or_default()
            )));
        }
        envelope.data.ok_or_else(|| {
            EngineError::ParseError(format!("provider={PROVIDER} response has no data"))
        })
    }

    fn task_state(prediction: &Prediction) -> Result<TaskState, EngineError> {
        match prediction.status.as_str() {
            "completed" | "succeeded" => {
                let url = prediction.outputs.first().ok_or_else(|| {
                    EngineError::ParseError(format!(
                        "provider={PROVIDER} task {} completed without outputs",
                        prediction.id
                    ))
                })?;
                let result_ref = if url.starts_with("data:") {
                    let (meta, data) = url.split_once(',').unwrap_or(("", ""));
                    ResultRef::Inline {
                        mime_type: meta
                            .trim_start_matches("data:")
                            .trim_end_matches(";base64")
                            .to_string(),
                        data_base64: data.to_string(),
                    }
                } else {
                    ResultRef::Url { url: url.clone() }
                };
                Ok(TaskState::Done(ProviderOutput {
                    result_ref: Some(result_ref),
                    upstream_task_id: Some(prediction.id.clone()),
                    ..Default::default()
                }))
            }
            "failed" | "error" | "canceled" | "cancelled" => Err(EngineError::UpstreamTaskFailed(format!(
                "provider={PROVIDER} task {} {}: {}",
                prediction.id,
                prediction.status,
                prediction.error.as_deref().unwrap_or("no error message")
            ))),
            _ => Ok(TaskState::Pending),
        }
    }

    /// Follow a submitted task until it completes, fails, or polling runs out.
    ///
    /// Transient poll failures use up one poll each; fatal ones end the attempt.
    pub async fn await_result(
        &self,
        http: &reqwest::Client,
        tracer: &ProviderTracer,
        submitted: &UpstreamResponse,
        attempt: u32,
    ) -> Result<ProviderOutput, EngineError> {
        let prediction = Self::read_prediction(submitted)?;
        if prediction.id.is_empty() {
            return Err(EngineError::ParseError(format!(
                "provider={PROVIDER} submission returned no task id"
            )));
        }
        if let TaskState::Done(out) = Self::task_state(&prediction)? {
            return Ok(out);
        }

        let task_id = prediction.id;
        let poll = PreparedRequest::get(self.result_url(&task_id), self.config.timeout)
            .bearer(self.config.api_key.expose_secret())?;
        for poll_no in 1..=self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;
            // A failed poll does not resubmit the task; only the poll budget bounds it.
            let resp = match send(http, &poll, tracer, PROVIDER, attempt).await {
                Ok(resp) => resp,
                Err(e) if RetryPolicy::classify(&e, None) => {
                    tracing::warn!(task_id = %task_id, poll_no, error = %e, "result poll failed, polling again");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let prediction = Self::read_prediction(&resp)?;
            match Self::task_state(&prediction)? {
                TaskState::Done(out) => return Ok(out),
                TaskState::Pending => {
                    tracing::trace!(task_id = %task_id, poll_no, status = %prediction.status, "task pending");
                }
            }
        }
        Err(EngineError::TimeoutError(format!(
            "provider={PROVIDER} task {task_id} not finished after {} polls",
            self.config.max_polls
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RequestBody;
    use bytes::Bytes;

    fn provider() -> WaveSpeedProvider {
        WaveSpeedProvider::new(WaveSpeedConfig::new("ws-key").with_base_url("http://ws.local/api/v3/"))
    }

    #[test]
    fn face_swap_body_uses_urls_and_data_uris() {
        let req = GenerationRequest::builder(ImageRef::url("https://img/t.jpg"))
            .source_image(ImageRef::Bytes {
                data: Bytes::from_static(b"hi"),
                mime_type: Some("image/jpeg".into()),
            })
            .build();
        let prepared = provider()
            .build_request(WaveSpeedModel::FaceSwap, &req, None)
            .unwrap();
        assert_eq!(prepared.url, "http://ws.local/api/v3/wavespeed-ai/image-face-swap");
        assert_eq!(prepared.headers["authorization"], "Bearer ws-key");
        let RequestBody::Json(body) = prepared.body else {
            panic!("expected json");
        };
        assert_eq!(body["image"], "https://img/t.jpg");
        assert_eq!(body["face_image"], "data:image/jpeg;base64,aGk=");
    }

    #[test]
    fn enhance_carries_aspect_ratio() {
        let req = GenerationRequest::builder(ImageRef::url("https://img/t.jpg"))
            .prompt("sharpen")
            .build();
        let prepared = provider()
            .build_request(WaveSpeedModel::Enhance, &req, Some("3:4"))
            .unwrap();
        let RequestBody::Json(body) = prepared.body else {
            panic!("expected json");
        };
        assert_eq!(body["aspect_ratio"], "3:4");
        assert_eq!(body["images"][0], "https://img/t.jpg");
    }

    #[test]
    fn task_states() {
        let done = Prediction {
            id: "t1".into(),
            status: "completed".into(),
            outputs: vec!["https://cdn/out.png".into()],
            error: None,
        };
        assert!(matches!(WaveSpeedProvider::task_state(&done), Ok(TaskState::Done(_))));
        let failed = Prediction {
            id: "t2".into(),
            status: "failed".into(),
            error: Some("face not found".into()),
            ..Default::default()
        };
        assert!(matches!(
            WaveSpeedProvider::task_state(&failed),
            Err(EngineError::UpstreamTaskFailed(m)) if m.contains("face not found")
        ));
        let pending = Prediction {
            status: "processing".into(),
            ..Default::default()
        };
        assert!(matches!(WaveSpeedProvider::task_state(&pending), Ok(TaskState::Pending)));
    }
}
