//! Browser gateway client.
//!
//! Talks to the remote browser automation gateway over its HTTP API. The
//! gateway holds the logged-in profiles; this client acquires sessions,
//! drives page actions, and feeds captcha challenges through the
//! configured solver when the site throws one mid-action.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::AutomationError;

use super::http::{status_error, transport_error};
use super::traits::{
    BaseBrowserSession, BaseCaptchaSolver, BrowserHandle, CrawledPost, PostDraft, PublishedArtifact,
    SessionMode,
};

pub struct BrowserGatewayClient {
    base_url: String,
    client: reqwest::Client,
    captcha: Arc<dyn BaseCaptchaSolver>,
    /// Sessions handed out in Reuse mode, keyed by profile id. An
    /// Exclusive acquire never touches this pool.
    reuse_pool: Mutex<HashMap<String, Arc<GatewaySession>>>,
}

impl BrowserGatewayClient {
    pub fn new(base_url: String, captcha: Arc<dyn BaseCaptchaSolver>) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AutomationError::terminal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            captcha,
            reuse_pool: Mutex::new(HashMap::new()),
        })
    }

    async fn open_session(&self, session_id: &str) -> Result<Arc<GatewaySession>, AutomationError> {
        #[derive(Serialize)]
        struct OpenRequest<'a> {
            profile: &'a str,
        }
        #[derive(Deserialize)]
        struct OpenResponse {
            session_token: String,
        }

        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&OpenRequest { profile: session_id })
            .send()
            .await
            .map_err(|e| transport_error("browser gateway", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("browser gateway", status, &body));
        }

        let opened: OpenResponse = response
            .json()
            .await
            .map_err(|e| transport_error("browser gateway", e))?;

        info!(profile = %session_id, "browser session opened");
        Ok(Arc::new(GatewaySession {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            captcha: Arc::clone(&self.captcha),
            token: opened.session_token,
            reused: false,
        }))
    }
}

#[async_trait]
impl BaseBrowserSession for BrowserGatewayClient {
    async fn acquire(
        &self,
        session_id: &str,
        mode: SessionMode,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError> {
        match mode {
            SessionMode::Exclusive => {
                let session = self.open_session(session_id).await?;
                Ok(session as Arc<dyn BrowserHandle>)
            }
            SessionMode::Reuse => {
                let mut pool = self.reuse_pool.lock().await;
                if let Some(session) = pool.get(session_id) {
                    debug!(profile = %session_id, "reusing pooled browser session");
                    return Ok(Arc::clone(session) as Arc<dyn BrowserHandle>);
                }
                let session = self.open_session(session_id).await?;
                let session = Arc::new(GatewaySession {
                    reused: true,
                    ..GatewaySession::clone_fields(&session)
                });
                pool.insert(session_id.to_string(), Arc::clone(&session));
                Ok(session as Arc<dyn BrowserHandle>)
            }
        }
    }
}

struct GatewaySession {
    base_url: String,
    client: reqwest::Client,
    captcha: Arc<dyn BaseCaptchaSolver>,
    token: String,
    reused: bool,
}

impl GatewaySession {
    fn clone_fields(other: &GatewaySession) -> GatewaySession {
        GatewaySession {
            base_url: other.base_url.clone(),
            client: other.client.clone(),
            captcha: Arc::clone(&other.captcha),
            token: other.token.clone(),
            reused: other.reused,
        }
    }

    /// POST an action to the gateway, solving at most one captcha
    /// challenge before giving up on the attempt.
    async fn action<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, AutomationError> {
        let mut captcha_answer: Option<String> = None;

        // Two passes at most: the bare action, then once more with the
        // solved captcha attached.
        for _ in 0..2 {
            #[derive(Serialize)]
            struct ActionEnvelope<'a, R: Serialize> {
                #[serde(flatten)]
                request: &'a R,
                #[serde(skip_serializing_if = "Option::is_none")]
                captcha_answer: Option<&'a str>,
            }

            let response = self
                .client
                .post(format!("{}/sessions/{}/{path}", self.base_url, self.token))
                .json(&ActionEnvelope {
                    request,
                    captcha_answer: captcha_answer.as_deref(),
                })
                .send()
                .await
                .map_err(|e| transport_error("browser gateway", e))?;

            let status = response.status();
            if status == reqwest::StatusCode::PRECONDITION_REQUIRED {
                // The site threw a captcha. The challenge image comes back
                // base64-encoded in the error body.
                #[derive(Deserialize)]
                struct CaptchaChallenge {
                    image_base64: String,
                }
                let challenge: CaptchaChallenge = response
                    .json()
                    .await
                    .map_err(|e| transport_error("browser gateway", e))?;
                let image = base64_decode(&challenge.image_base64)?;
                debug!(path, "captcha challenge received, solving");
                captcha_answer = Some(self.captcha.solve(&image).await?);
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error("browser gateway", status, &body));
            }

            return response.json().await.map_err(|e| transport_error("browser gateway", e));
        }

        Err(AutomationError::transient(
            "browser gateway rejected the solved captcha",
        ))
    }
}

fn base64_decode(input: &str) -> Result<Vec<u8>, AutomationError> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    STANDARD
        .decode(input)
        .map_err(|e| AutomationError::terminal(format!("captcha image is not valid base64: {e}")))
}

#[async_trait]
impl BrowserHandle for GatewaySession {
    async fn fetch_post(&self, url: &str) -> Result<CrawledPost, AutomationError> {
        #[derive(Serialize)]
        struct FetchRequest<'a> {
            url: &'a str,
        }
        #[derive(Deserialize)]
        struct FetchResponse {
            title: String,
            markdown: String,
        }

        let fetched: FetchResponse = self.action("fetch", &FetchRequest { url }).await?;
        Ok(CrawledPost {
            title: fetched.title,
            body: fetched.markdown,
            source_url: url.to_string(),
        })
    }

    async fn publish_post(&self, draft: &PostDraft) -> Result<PublishedArtifact, AutomationError> {
        #[derive(Deserialize)]
        struct PublishResponse {
            url: String,
            post_id: String,
        }

        let published: PublishResponse = self.action("publish", draft).await?;
        info!(url = %published.url, "post published");
        Ok(PublishedArtifact {
            url: published.url,
            remote_id: published.post_id,
        })
    }

    async fn submit_comment(&self, target_url: &str, body: &str) -> Result<(), AutomationError> {
        #[derive(Serialize)]
        struct CommentRequest<'a> {
            url: &'a str,
            body: &'a str,
        }
        #[derive(Deserialize)]
        struct CommentResponse {}

        let _: CommentResponse = self.action("comment", &CommentRequest { url: target_url, body }).await?;
        info!(target = %target_url, "comment submitted");
        Ok(())
    }

    async fn delete_post(&self, artifact_url: &str) -> Result<(), AutomationError> {
        #[derive(Serialize)]
        struct DeleteRequest<'a> {
            url: &'a str,
        }
        #[derive(Deserialize)]
        struct DeleteResponse {}

        let result: Result<DeleteResponse, AutomationError> =
            self.action("delete", &DeleteRequest { url: artifact_url }).await;
        match result {
            Ok(_) => Ok(()),
            // The post being gone already is the outcome we wanted.
            Err(AutomationError::Terminal(e)) if e.to_string().contains("404") => {
                info!(url = %artifact_url, "post already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&self) -> Result<(), AutomationError> {
        if self.reused {
            debug!("pooled session left open");
            return Ok(());
        }

        let response = self
            .client
            .delete(format!("{}/sessions/{}", self.base_url, self.token))
            .send()
            .await
            .map_err(|e| transport_error("browser gateway", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error("browser gateway", status, &body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decodes_known_vectors() {
        assert_eq!(base64_decode("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(base64_decode("aGVsbG8h").unwrap(), b"hello!");
        assert!(base64_decode("not base64 !").is_err());
    }
}
