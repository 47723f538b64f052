//! src/enrich.rs — enrichment provider client. The pipeline treats every
//! failure reason the same way (terminal for this run, re-eligible next run),
//! but the reasons are kept distinct for logging.
use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::prospect::EnrichedFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichFailure {
    NotFound,
    RateLimited,
    ServerError,
    Network,
}

impl fmt::Display for EnrichFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrichFailure::NotFound => "profile not found",
            EnrichFailure::RateLimited => "rate limited",
            EnrichFailure::ServerError => "provider server error",
            EnrichFailure::Network => "network error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum EnrichmentOutcome {
    Success(EnrichedFields),
    Failure(EnrichFailure),
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Look up a profile reference. `Err` is reserved for malformed provider
    /// responses; provider-side failures come back as `Failure(reason)`.
    async fn enrich(&self, profile_url: &str) -> Result<EnrichmentOutcome>;
}

#[derive(Deserialize)]
struct ProviderPerson {
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    job_title: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    work_email: Option<String>,
    #[serde(default)]
    facts: serde_json::Map<String, serde_json::Value>,
}

impl From<ProviderPerson> for EnrichedFields {
    fn from(p: ProviderPerson) -> Self {
        EnrichedFields {
            company: p.company,
            job_title: p.job_title,
            industry: p.industry,
            location: p.location,
            country: p.country,
            work_email: p.work_email,
            facts: p.facts,
        }
    }
}

pub struct HttpEnricher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpEnricher {
    pub fn new(base_url: String, api_key: String, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build enrichment http client")?;
        Ok(HttpEnricher {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, profile_url: &str) -> Result<EnrichmentOutcome> {
        let resp = match self
            .client
            .post(format!("{}/v1/person/enrich", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "profile_url": profile_url }))
            .send()
            .await
        {
            Ok(resp) => resp,
            // timeouts and connection failures are a provider failure, not a bug
            Err(_) => return Ok(EnrichmentOutcome::Failure(EnrichFailure::Network)),
        };

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(EnrichmentOutcome::Failure(EnrichFailure::NotFound));
        }
        if status.as_u16() == 429 {
            return Ok(EnrichmentOutcome::Failure(EnrichFailure::RateLimited));
        }
        if status.is_server_error() {
            return Ok(EnrichmentOutcome::Failure(EnrichFailure::ServerError));
        }
        if !status.is_success() {
            return Ok(EnrichmentOutcome::Failure(EnrichFailure::Network));
        }

        let person: ProviderPerson = resp
            .json()
            .await
            .context("decode enrichment provider response")?;
        Ok(EnrichmentOutcome::Success(person.into()))
    }
}
