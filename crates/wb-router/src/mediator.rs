//! Delivery client - one attempt to hand a payload to the downstream sink
//!
//! Every result, including transport errors, is normalized into a
//! [`DeliveryOutcome`]; nothing is propagated to the caller.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, error, warn};
use wb_common::DeliveryOutcome;

use crate::error::RouterError;

const RESPONSE_PREVIEW_BYTES: usize = 512;

/// Performs a single delivery attempt
#[async_trait]
pub trait Mediator: Send + Sync {
    async fn mediate(&self, payload: &[u8]) -> DeliveryOutcome;
}

/// Map an HTTP status code to a delivery outcome.
///
/// Statuses outside 2xx/4xx/5xx (1xx, 3xx reaching this layer) are treated as
/// transient. This is a policy choice: retrying and requeueing is preferred over
/// dropping a reading, at the cost of possibly masking a permanent redirect.
pub fn classify_status(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Success,
        400..=499 => DeliveryOutcome::PermanentFailure,
        500..=u16::MAX => DeliveryOutcome::TransientFailure,
        _ => DeliveryOutcome::TransientFailure,
    }
}

#[derive(Debug, Clone)]
pub struct HttpMediatorConfig {
    /// Full sink URL, e.g. `http://backend:3000/weather/logs`
    pub endpoint: String,
    /// Whole-request timeout
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl HttpMediatorConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// POSTs payloads to the sink over a pooled HTTP client
pub struct HttpMediator {
    config: HttpMediatorConfig,
    client: reqwest::Client,
}

impl HttpMediator {
    pub fn new(config: HttpMediatorConfig) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RouterError::HttpClient(e.to_string()))?;

        Ok(Self { config, client })
    }

    async fn response_preview(response: reqwest::Response) -> String {
        match response.bytes().await {
            Ok(body) => {
                let end = body.len().min(RESPONSE_PREVIEW_BYTES);
                String::from_utf8_lossy(&body[..end]).into_owned()
            }
            Err(_) => String::new(),
        }
    }
}

#[async_trait]
impl Mediator for HttpMediator {
    async fn mediate(&self, payload: &[u8]) -> DeliveryOutcome {
        debug!(
            operation = "post_backend",
            url = %self.config.endpoint,
            body_size = payload.len(),
            "Attempting POST request"
        );

        let result = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(
                    operation = "post_backend",
                    url = %self.config.endpoint,
                    timeout = e.is_timeout(),
                    connect = e.is_connect(),
                    error = %e,
                    "HTTP request error"
                );
                return DeliveryOutcome::TransientFailure;
            }
        };

        let status_code = response.status().as_u16();
        let outcome = classify_status(status_code);

        match outcome {
            DeliveryOutcome::Success => {
                debug!(
                    operation = "post_backend",
                    status_code,
                    url = %self.config.endpoint,
                    "POST successful"
                );
            }
            DeliveryOutcome::PermanentFailure => {
                let content_length = response.content_length();
                let preview = Self::response_preview(response).await;
                error!(
                    operation = "post_backend",
                    status_code,
                    url = %self.config.endpoint,
                    response_body = %preview,
                    content_length = ?content_length,
                    "Client error (non-temporary)"
                );
                if status_code == 404 {
                    error!(
                        operation = "post_backend",
                        full_url = %self.config.endpoint,
                        hint = "check BACKEND_URL and SINK_PATH",
                        "Endpoint not found"
                    );
                }
            }
            DeliveryOutcome::TransientFailure if status_code >= 500 => {
                let preview = Self::response_preview(response).await;
                error!(
                    operation = "post_backend",
                    status_code,
                    url = %self.config.endpoint,
                    response_body = %preview,
                    "Server error (temporary)"
                );
            }
            DeliveryOutcome::TransientFailure => {
                warn!(
                    operation = "post_backend",
                    status_code,
                    url = %self.config.endpoint,
                    "Unexpected status code, treating as temporary"
                );
            }
        }

        outcome
    }
}
