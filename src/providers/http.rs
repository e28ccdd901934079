//! Rebuildable upstream requests and the shared send path.
//!
//! A `reqwest::multipart::Form` can only be sent once, so requests are kept
//! in a plain description and turned into a `reqwest` request per attempt.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Method;

use crate::error::{EngineError, classify_http_error};
use crate::telemetry::ProviderTracer;

/// One multipart field.
#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        bytes: Bytes,
    },
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormPart>),
}

/// A request that can be sent any number of times.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl PreparedRequest {
    pub fn post_json(url: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Json(body),
            timeout,
        }
    }

    pub fn post_multipart(url: impl Into<String>, parts: Vec<FormPart>, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Multipart(parts),
            timeout,
        }
    }

    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout,
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Result<Self, EngineError> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            EngineError::ConfigurationError(format!("invalid value for header {name}: {e}"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Attach `Authorization: Bearer <token>`, marked sensitive.
    pub fn bearer(mut self, token: &str) -> Result<Self, EngineError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            EngineError::CredentialError("access token is not a valid header value".to_string())
        })?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    fn build(&self, http: &reqwest::Client) -> Result<reqwest::RequestBuilder, EngineError> {
        let builder = http
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .timeout(self.timeout);
        Ok(match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        })
    }
}

fn build_form(parts: &[FormPart]) -> Result<Form, EngineError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime_type,
                bytes,
            } => {
                let p = Part::bytes(bytes.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(mime_type)
                    .map_err(|e| EngineError::InvalidInput(format!("invalid MIME type {mime_type}: {e}")))?;
                form.part(name.clone(), p)
            }
        };
    }
    Ok(form)
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Result<serde_json::Value, EngineError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let sample: String = String::from_utf8_lossy(&self.body).chars().take(200).collect();
            EngineError::ParseError(format!("invalid JSON from upstream: {e}; body_sample={sample}"))
        })
    }
}

/// Send once. Non-2xx responses are classified into typed errors.
pub async fn send(
    http: &reqwest::Client,
    request: &PreparedRequest,
    tracer: &ProviderTracer,
    provider: &str,
    attempt: u32,
) -> Result<UpstreamResponse, EngineError> {
    let started = Instant::now();
    tracer.request_start(attempt, request.method.as_str(), &request.url);
    tracer.request_headers(&request.headers);

    let resp = match request.build(http)?.send().await {
        Ok(resp) => resp,
        Err(e) => {
            let err = EngineError::from(e);
            tracer.request_error(attempt, None, &err, started);
            return Err(err);
        }
    };
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp.bytes().await?;

    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(&body);
        let err = classify_http_error(provider, status, &text, &headers);
        tracer.request_error(attempt, Some(status), &err, started);
        return Err(err);
    }
    tracer.response_success(attempt, status, started);
    Ok(UpstreamResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_sensitive() {
        let req = PreparedRequest::get("http://x", Duration::from_secs(1))
            .bearer("tok")
            .unwrap();
        let v = req.headers.get(AUTHORIZATION).unwrap();
        assert!(v.is_sensitive());
        assert_eq!(v.to_str().unwrap(), "Bearer tok");
    }

    #[test]
    fn forms_rebuild_every_time() {
        let parts = vec![
            FormPart::Text {
                name: "source_url".into(),
                value: "https://a".into(),
            },
            FormPart::File {
                name: "target_image".into(),
                file_name: "target.png".into(),
                mime_type: "image/png".into(),
                bytes: Bytes::from_static(b"png"),
            },
        ];
        assert!(build_form(&parts).is_ok());
        assert!(build_form(&parts).is_ok());
        let bad = vec![FormPart::File {
            name: "f".into(),
            file_name: "f".into(),
            mime_type: "not a mime".into(),
            bytes: Bytes::new(),
        }];
        assert!(build_form(&bad).is_err());
    }
}
