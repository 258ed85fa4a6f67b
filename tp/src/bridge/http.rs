//! HTTP bridge to the browser extension and planner
//!
//! Implements all three collaborator traits over JSON endpoints, retrying
//! transient failures with exponential backoff.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{PlanRequest, RefineRequest};
use super::{ActionExecutor, BridgeError, PageStateProvider, PlanResponse, PlanningService, RefineResponse};
use crate::config::BridgeConfig;
use crate::domain::{Action, ActionResult, ConversationEntry, PageElement, PageState, Plan};

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// JSON-over-HTTP implementation of every collaborator seam
pub struct HttpBridge {
    http: Client,
    page_url: String,
    executor_url: String,
    planner_url: String,
}

impl HttpBridge {
    pub fn from_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        debug!(?config, "from_config: called");
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(BridgeError::Network)?;

        Ok(Self {
            http,
            page_url: config.page_url.clone(),
            executor_url: config.executor_url.clone(),
            planner_url: config.planner_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<R: DeserializeOwned>(&self, url: &str) -> Result<R, BridgeError> {
        debug!(%url, "get_json: called");
        self.send_with_retry(url, || self.http.get(url)).await
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R, BridgeError> {
        debug!(%url, "post_json: called");
        let body = serde_json::to_value(body)?;
        self.send_with_retry(url, || self.http.post(url).json(&body)).await
    }

    async fn send_with_retry<R: DeserializeOwned>(
        &self,
        url: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<R, BridgeError> {
        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(%url, attempt, backoff_ms = backoff, "send_with_retry: retrying after transient error");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let response = match build().send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    debug!(attempt, "send_with_retry: timed out");
                    last_error = Some(BridgeError::Timeout);
                    continue;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "send_with_retry: network error");
                    last_error = Some(BridgeError::Network(e));
                    continue;
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                let message = response.text().await.unwrap_or_default();
                let error = BridgeError::Api { status, message };
                if error.is_transient() && attempt < MAX_RETRIES {
                    debug!(attempt, status, "send_with_retry: retryable status");
                    last_error = Some(error);
                    continue;
                }
                debug!(status, "send_with_retry: API error");
                return Err(error);
            }

            let text = response.text().await?;
            return serde_json::from_str(&text).map_err(|e| {
                BridgeError::InvalidResponse(format!("{} returned unexpected body: {}", url, e))
            });
        }

        Err(last_error.unwrap_or_else(|| BridgeError::InvalidResponse("Max retries exceeded".to_string())))
    }
}

#[async_trait]
impl PageStateProvider for HttpBridge {
    async fn capture(&self) -> Result<PageState, BridgeError> {
        debug!("capture: called");
        let page: PageState = self.get_json(&self.page_url).await?;
        debug!(url = %page.url, element_count = page.elements.len(), "capture: page received");
        Ok(page)
    }
}

#[async_trait]
impl ActionExecutor for HttpBridge {
    async fn execute(&self, action: &Action) -> Result<ActionResult, BridgeError> {
        debug!(action = %action.action, target = ?action.target, "execute: called");
        self.post_json(&self.executor_url, action).await
    }
}

#[async_trait]
impl PlanningService for HttpBridge {
    async fn get_plan_with_confidence(
        &self,
        task: &str,
        url: &str,
        elements: &[PageElement],
        history: &[ConversationEntry],
    ) -> Result<PlanResponse, BridgeError> {
        debug!(%task, %url, element_count = elements.len(), "get_plan_with_confidence: called");
        let body = PlanRequest {
            task,
            url,
            elements,
            history,
        };
        self.post_json(&format!("{}/plan", self.planner_url), &body).await
    }

    async fn refine(
        &self,
        plan: &Plan,
        feedback: &[String],
        elements: &[PageElement],
        task: &str,
    ) -> Result<RefineResponse, BridgeError> {
        debug!(feedback_count = feedback.len(), "refine: called");
        let body = RefineRequest {
            plan,
            feedback,
            elements,
            task,
        };
        self.post_json(&format!("{}/refine", self.planner_url), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_trims_planner_slash() {
        let config = BridgeConfig {
            planner_url: "http://planner.local/".to_string(),
            ..BridgeConfig::default()
        };
        let bridge = HttpBridge::from_config(&config).unwrap();
        assert_eq!(bridge.planner_url, "http://planner.local");
        assert_eq!(bridge.page_url, config.page_url);
    }
}
