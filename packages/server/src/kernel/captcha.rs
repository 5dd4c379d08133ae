//! HTTP captcha solving service client.
//!
//! Submit-then-poll: the service accepts an image and returns a task id;
//! the answer becomes available some seconds later. Polling uses the
//! retry primitive with a constant interval so a slow solve is not an
//! error until the polling attempts run out.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use conveyor::{retry_if, Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::common::AutomationError;
use conveyor::ErrorClass;

use super::http::{status_error, transport_error};
use super::traits::BaseCaptchaSolver;

pub struct HttpCaptchaSolver {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    poll_policy: RetryPolicy,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    key: &'a str,
    image_base64: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct AnswerResponse {
    status: String,
    #[serde(default)]
    answer: Option<String>,
}

impl HttpCaptchaSolver {
    pub fn new(base_url: String, api_key: String) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AutomationError::terminal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key,
            client,
            // Poll every 3 seconds, up to 20 times (a minute of waiting).
            poll_policy: RetryPolicy::new(Duration::from_secs(3), 20, Backoff::None),
        })
    }

    async fn poll_answer(&self, task_id: &str) -> Result<String, AutomationError> {
        let response = self
            .client
            .get(format!("{}/answer/{task_id}", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| transport_error("captcha service", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("captcha service", status, &body));
        }

        let answer: AnswerResponse = response
            .json()
            .await
            .map_err(|e| transport_error("captcha service", e))?;

        match answer.status.as_str() {
            "ready" => answer
                .answer
                .ok_or_else(|| AutomationError::terminal("captcha service reported ready with no answer")),
            "pending" => Err(AutomationError::transient("captcha answer not ready yet")),
            other => Err(AutomationError::terminal(format!(
                "captcha task failed with status '{other}'"
            ))),
        }
    }
}

#[async_trait]
impl BaseCaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, image: &[u8]) -> Result<String, AutomationError> {
        let response = self
            .client
            .post(format!("{}/submit", self.base_url))
            .json(&SubmitRequest {
                key: &self.api_key,
                image_base64: STANDARD.encode(image),
            })
            .send()
            .await
            .map_err(|e| transport_error("captcha service", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("captcha service", status, &body));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| transport_error("captcha service", e))?;
        debug!(task_id = %submitted.task_id, "captcha submitted");

        let answer = retry_if(
            self.poll_policy,
            || self.poll_answer(&submitted.task_id),
            |e: &AutomationError| e.is_transient(),
        )
        .await?;

        debug!(task_id = %submitted.task_id, "captcha solved");
        Ok(answer)
    }
}
