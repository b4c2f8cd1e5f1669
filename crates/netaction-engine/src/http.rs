//! HTTP calls made by `rest_api` actions.

use async_trait::async_trait;
use log::{debug, warn};
use netaction_core::error::HttpError;
use netaction_core::types::BodyType;
use netaction_core::utils::value_text;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub body_type: BodyType,
    pub timeout: Duration,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// JSON when the body parses as JSON, plain text otherwise.
    pub fn body_value(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// GET and HEAD requests go out without a body.
fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

pub struct ReqwestClient {
    verified: reqwest::Client,
    unverified: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, HttpError> {
        let build = |accept_invalid: bool| {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(accept_invalid)
                .build()
                .map_err(|e| HttpError::Transport {
                    url: String::new(),
                    reason: e.to_string(),
                })
        };
        Ok(ReqwestClient {
            verified: build(false)?,
            unverified: build(true)?,
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| HttpError::Method(request.method.clone()))?;
        let client = if request.verify {
            &self.verified
        } else {
            &self.unverified
        };

        let with_body = carries_body(&method);
        let mut builder = client.request(method, &request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body.as_ref().filter(|_| with_body) {
            builder = match request.body_type {
                BodyType::Json => builder.json(body),
                BodyType::Form => {
                    let form: HashMap<String, String> = body
                        .as_object()
                        .map(|map| map.iter().map(|(k, v)| (k.clone(), value_text(v))).collect())
                        .unwrap_or_default();
                    builder.form(&form)
                }
                BodyType::Text => builder.body(value_text(body)),
            };
        }

        let transport = |e: reqwest::Error| HttpError::Transport {
            url: request.url.clone(),
            reason: e.to_string(),
        };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        debug!("{} {} -> {}", request.method, request.url, status);
        Ok(HttpResponse { status, body })
    }
}

/// Send `request`, retrying transport failures up to `attempts` times in
/// total. A response with a status other than `expect_status` is returned as
/// an error without retrying.
pub async fn send_with_retry(
    client: &dyn HttpClient,
    request: &HttpRequest,
    expect_status: u16,
    attempts: u32,
    backoff: Duration,
) -> Result<HttpResponse, HttpError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.send(request).await {
            Ok(response) if response.status == expect_status => return Ok(response),
            Ok(response) => {
                return Err(HttpError::UnexpectedStatus {
                    url: request.url.clone(),
                    status: response.status,
                    expected: expect_status,
                })
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "Request attempt {}/{} to {} failed: {}. Retrying in {:?}",
                    attempt, attempts, request.url, e, backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        status: u16,
    }

    #[async_trait]
    impl HttpClient for Flaky {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(HttpError::Transport {
                    url: request.url.clone(),
                    reason: "connection reset".into(),
                });
            }
            Ok(HttpResponse {
                status: self.status,
                body: r#"{"ok": true}"#.into(),
            })
        }
    }

    fn request() -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            url: "https://nms.example/api/devices".into(),
            headers: HashMap::new(),
            body: None,
            body_type: BodyType::Json,
            timeout: Duration::from_secs(1),
            verify: true,
        }
    }

    #[tokio::test]
    async fn test_retries_transport_failures() {
        let client = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            status: 200,
        };
        let response = send_with_retry(&client, &request(), 200, 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(response.body_value()["ok"], Value::Bool(true));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let client = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
            status: 200,
        };
        let err = send_with_retry(&client, &request(), 200, 2, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Transport { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unexpected_status_is_not_retried() {
        let client = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
            status: 503,
        };
        let err = send_with_retry(&client, &request(), 200, 3, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::UnexpectedStatus { status: 503, .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_and_head_carry_no_body() {
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::HEAD));
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PATCH));
    }
}
