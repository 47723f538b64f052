//! src/config.rs — environment-driven settings, loaded once at startup.
//! Missing required credentials abort the whole invocation before any phase runs.
use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub store_path: String,

    pub openai_api_key: String,
    pub openai_model: String,

    pub enrich_api_url: String,
    pub enrich_api_key: String,

    pub delivery_api_url: String,
    pub delivery_api_key: String,

    pub sender_email: String,
    pub sender_name: String,
    pub unsubscribe_url: String,

    // per-phase batch bounds
    pub max_enrichments_per_run: usize,
    pub max_generations_per_run: usize,
    pub max_initial_emails_per_run: usize,
    pub max_followup_emails_per_run: usize,

    /// Inter-call pause in the generation phase (provider rate limits).
    pub generation_throttle: Duration,
    /// Fixed timeout applied to each outbound provider call.
    pub http_timeout: Duration,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} not set"))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("{key} is not a number")),
        Err(_) => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        Ok(Settings {
            bind_addr: optional("BIND_ADDR", "0.0.0.0:3000"),
            store_path: optional("PROSPECT_STORE_PATH", "prospects.json"),

            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: optional("OPENAI_MODEL", "gpt-4o-mini"),

            enrich_api_url: required("ENRICH_API_URL")?,
            enrich_api_key: required("ENRICH_API_KEY")?,

            delivery_api_url: required("DELIVERY_API_URL")?,
            delivery_api_key: required("DELIVERY_API_KEY")?,

            sender_email: required("SENDER_EMAIL")?,
            sender_name: optional("SENDER_NAME", "Outreach"),
            unsubscribe_url: optional("UNSUBSCRIBE_URL", "https://example.com/unsubscribe"),

            max_enrichments_per_run: optional_usize("MAX_ENRICHMENTS_PER_RUN", 50)?,
            max_generations_per_run: optional_usize("MAX_GENERATIONS_PER_RUN", 30)?,
            max_initial_emails_per_run: optional_usize("MAX_INITIAL_EMAILS_PER_RUN", 25)?,
            max_followup_emails_per_run: optional_usize("MAX_FOLLOWUP_EMAILS_PER_RUN", 25)?,

            generation_throttle: Duration::from_millis(1500),
            http_timeout: Duration::from_secs(20),
        })
    }
}
