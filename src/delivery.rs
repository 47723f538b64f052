//! src/delivery.rs — transactional email delivery client. A single-attempt
//! `Transport` does the provider call; `DeliveryClient` wraps it in a bounded
//! retry loop so the retry count stays testable.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const JITTER_MAX_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("rate limited by delivery provider")]
    RateLimited,
    #[error("delivery provider server error ({0})")]
    Server(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by delivery provider ({0})")]
    Rejected(u16),
}

impl SendError {
    /// Transient failures are retried with backoff; 4xx rejections (bad
    /// request / auth / forbidden) are permanent and propagate immediately.
    pub fn is_transient(&self) -> bool {
        !matches!(self, SendError::Rejected(_))
    }
}

/// Delivery metadata echoed back in provider webhooks.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SendOptions {
    pub category: Option<String>,
    pub campaign: Option<String>,
    pub click_tracking: bool,
    pub open_tracking: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_args: BTreeMap<String, String>,
}

/// The two send modes the provider supports.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EmailContent {
    Template {
        template_id: String,
        template_data: serde_json::Value,
    },
    Raw {
        subject: String,
        html_body: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub from_email: String,
    pub from_name: String,
    #[serde(flatten)]
    pub content: EmailContent,
    pub options: SendOptions,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// One delivery attempt, no retries.
    async fn attempt(&self, email: &OutgoingEmail) -> Result<(), SendError>;
}

pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    from_email: String,
    from_name: String,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, from_email: String, from_name: String) -> Self {
        DeliveryClient {
            transport,
            from_email,
            from_name,
        }
    }

    pub async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        template_data: serde_json::Value,
        options: SendOptions,
    ) -> Result<(), SendError> {
        self.send(OutgoingEmail {
            to: to.to_string(),
            from_email: self.from_email.clone(),
            from_name: self.from_name.clone(),
            content: EmailContent::Template {
                template_id: template_id.to_string(),
                template_data,
            },
            options,
        })
        .await
    }

    pub async fn send_raw(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        options: SendOptions,
    ) -> Result<(), SendError> {
        self.send(OutgoingEmail {
            to: to.to_string(),
            from_email: self.from_email.clone(),
            from_name: self.from_name.clone(),
            content: EmailContent::Raw {
                subject: subject.to_string(),
                html_body: html_body.to_string(),
            },
            options,
        })
        .await
    }

    /// Bounded retry loop: exponential backoff doubling from `BACKOFF_BASE`
    /// plus jitter, transient errors only.
    async fn send(&self, email: OutgoingEmail) -> Result<(), SendError> {
        let mut attempt = 0u32;
        loop {
            match self.transport.attempt(&email).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff = BACKOFF_BASE * 2u32.pow(attempt);
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
                    warn!(to = %email.to, error = %e, attempt, "delivery attempt failed, retrying");
                    tokio::time::sleep(backoff + jitter).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Thin HTTP transport for the delivery provider's send endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build delivery http client")?;
        Ok(HttpTransport {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn attempt(&self, email: &OutgoingEmail) -> Result<(), SendError> {
        let resp = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(email)
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        match status {
            200..=299 => Ok(()),
            429 => Err(SendError::RateLimited),
            500..=599 => Err(SendError::Server(status)),
            _ => Err(SendError::Rejected(status)),
        }
    }
}
