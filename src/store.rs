//! src/store.rs — record store adapter. The pipeline only ever needs a handful
//! of eligibility queries, so the predicate surface is an enum rather than a
//! general query language.
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::prospect::{OutreachStatus, Prospect, ProspectUpdate};
use crate::state;

/// Eligibility predicates the phases select on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Not yet enriched, with a discovered profile reference.
    NeedsEnrichment,
    /// Enriched, still pending upload, no generated content yet.
    AwaitingGeneration,
    /// Enriched and still pending upload.
    ReadyForInitialSend,
    /// Status in the follow-up interval table, not opted out.
    FollowupEligible,
}

pub(crate) fn matches(selection: Selection, p: &Prospect) -> bool {
    match selection {
        Selection::NeedsEnrichment => !p.enrichment_success && p.linkedin_url_found,
        Selection::AwaitingGeneration => {
            p.enrichment_success
                && !p.ai_initial_email_template
                && p.outreach_status == OutreachStatus::PendingUpload
        }
        Selection::ReadyForInitialSend => state::eligible_for_initial_send(p),
        Selection::FollowupEligible => state::eligible_for_followup(p),
    }
}

#[async_trait]
pub trait ProspectStore: Send + Sync {
    /// Ordered (by id) sequence of at most `limit` matching records.
    async fn select(&self, selection: Selection, limit: usize) -> Result<Vec<Prospect>>;

    /// Apply a partial update to one record, stamping `last_modified`.
    /// An empty payload is a warn-level no-op, never a write.
    async fn update(&self, id: &str, update: ProspectUpdate) -> Result<()>;
}

/// Flat-file JSON store. One invocation is the single writer, so a mutex
/// around load/modify/save is all the coordination needed.
pub struct JsonStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<Prospect>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    async fn save(&self, prospects: &[Prospect]) -> Result<()> {
        let raw = serde_json::to_string_pretty(prospects).context("serialize prospect store")?;
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("write {}", self.path.display()))
    }
}

#[async_trait]
impl ProspectStore for JsonStore {
    async fn select(&self, selection: Selection, limit: usize) -> Result<Vec<Prospect>> {
        let _guard = self.lock.lock().await;
        let mut hits: Vec<Prospect> = self
            .load()
            .await?
            .into_iter()
            .filter(|p| matches(selection, p))
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn update(&self, id: &str, update: ProspectUpdate) -> Result<()> {
        if update.is_empty() {
            warn!(id, "empty update payload, skipping write");
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut prospects = self.load().await?;
        let Some(record) = prospects.iter_mut().find(|p| p.id == id) else {
            bail!("prospect {id} not found");
        };
        update.apply(record);
        record.last_modified = Some(Utc::now());
        self.save(&prospects).await
    }
}
