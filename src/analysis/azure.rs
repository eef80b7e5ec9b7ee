//! REST client for an Azure Document Intelligence–style layout service.
//!
//! The protocol is the long-running-operation pattern:
//!
//! 1. `POST {endpoint}/documentintelligence/documentModels/{model}:analyze?api-version=…`
//!    with the raw document as the body → `202 Accepted` plus an
//!    `Operation-Location` header.
//! 2. `GET` the operation URL until `status` is `succeeded` (payload under
//!    `analyzeResult`) or `failed` (payload under `error`).
//!
//! HTTP status codes are mapped onto [`ServiceError`] so the gateway can pick
//! the right retry behaviour: 429 → `RateLimited`, other 4xx → `Rejected`,
//! 5xx and network failures → `Transient`.

use super::{AnalysisService, PendingAnalysis, RawResult};
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// API version sent with every request unless overridden.
pub const DEFAULT_API_VERSION: &str = "2024-11-30";

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";

/// Layout-analysis REST client.
#[derive(Debug, Clone)]
pub struct LayoutClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    poll_interval: Duration,
}

impl LayoutClient {
    /// Create a client for `endpoint` (e.g. `https://my-resource.cognitiveservices.azure.com`).
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceError::Transient(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval: Duration::from_secs(1),
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Interval between status polls when the service sends no `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn analyze_url(&self, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
            self.endpoint, model_id, self.api_version
        )
    }
}

/// Body of a status poll.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<RawResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OperationError {
    code: String,
    message: String,
}

/// Body of a 4xx/5xx response.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: OperationError,
}

#[async_trait]
impl AnalysisService for LayoutClient {
    async fn submit(&self, document: &[u8], model_id: &str) -> Result<PendingAnalysis, ServiceError> {
        let response = self
            .http
            .post(self.analyze_url(model_id))
            .header(KEY_HEADER, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| ServiceError::Transient(e.to_string()))?;

        let response = check_status(response).await?;

        let operation = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Malformed("analyze response has no Operation-Location header".into())
            })?;

        info!("Layout analysis accepted ({} bytes)", document.len());
        Ok(PendingAnalysis { operation })
    }

    async fn await_result(
        &self,
        pending: &PendingAnalysis,
        _timeout: Duration,
    ) -> Result<RawResult, ServiceError> {
        loop {
            let response = self
                .http
                .get(&pending.operation)
                .header(KEY_HEADER, &self.api_key)
                .send()
                .await
                .map_err(|e| ServiceError::Transient(e.to_string()))?;

            let response = check_status(response).await?;
            let wait = retry_after(response.headers()).unwrap_or(self.poll_interval);

            let body: OperationStatus = response
                .json()
                .await
                .map_err(|e| ServiceError::Malformed(e.to_string()))?;

            match body.status.as_str() {
                "succeeded" => {
                    return body.analyze_result.ok_or_else(|| {
                        ServiceError::Malformed("succeeded operation has no analyzeResult".into())
                    });
                }
                "failed" | "canceled" => {
                    let error = body.error.unwrap_or_default();
                    return Err(ServiceError::OperationFailed {
                        code: if error.code.is_empty() {
                            body.status.clone()
                        } else {
                            error.code
                        },
                        message: error.message,
                    });
                }
                status => {
                    debug!("Layout analysis status '{}', polling again in {:?}", status, wait);
                    sleep(wait).await;
                }
            }
        }
    }
}

/// Map non-success responses onto [`ServiceError`].
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status, retry_after, &body))
}

fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ServiceError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| format!("{}: {}", e.error.code, e.error.message))
        .unwrap_or_else(|_| body.chars().take(500).collect());

    if status == StatusCode::TOO_MANY_REQUESTS {
        ServiceError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ServiceError::Transient(format!("HTTP {status}: {message}"))
    } else {
        ServiceError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
