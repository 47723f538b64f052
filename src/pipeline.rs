//! src/pipeline.rs — the four-phase orchestrator. One invocation runs
//! enrichment → content generation → initial send → follow-up, each phase
//! independently bounded and independently fault-tolerant.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::content::{self, MessageFrame};
use crate::delivery::{DeliveryClient, SendOptions};
use crate::enrich::{Enricher, EnrichmentOutcome};
use crate::generate::{self, ContentGenerator};
use crate::locale::{self, EmailType};
use crate::prospect::{AiEmail, EmailStatus, OutreachStatus, Prospect, ProspectUpdate};
use crate::state::{self, FollowupAction};
use crate::store::{ProspectStore, Selection};

/// Candidate pool multiplier for the follow-up phase: due-dates are evaluated
/// in-process, so more records are fetched than will be sent.
const FOLLOWUP_OVERFETCH: usize = 5;

/// Everything a phase needs, constructed once per process and passed in
/// explicitly so the phases stay testable with fakes.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn ProspectStore>,
    pub enricher: Arc<dyn Enricher>,
    pub delivery: Arc<DeliveryClient>,
    pub generator: Arc<dyn ContentGenerator>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub processed: u32,
    pub successful: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SendStats {
    pub sent: u32,
    pub errors: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub enrichment: BatchStats,
    pub generation: BatchStats,
    pub initial: SendStats,
    pub followup: SendStats,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "enrichment: {}/{} succeeded; generation: {}/{} succeeded; \
             initial: {} sent, {} errors; follow-up: {} sent, {} errors",
            self.enrichment.successful,
            self.enrichment.processed,
            self.generation.successful,
            self.generation.processed,
            self.initial.sent,
            self.initial.errors,
            self.followup.sent,
            self.followup.errors,
        )
    }
}

/// Run all four phases in fixed order. A failing phase logs and contributes a
/// zero stat; later phases still run.
pub async fn run_all(ctx: &AppContext) -> RunSummary {
    let mut summary = RunSummary::default();

    match enrichment_phase(ctx).await {
        Ok(stats) => summary.enrichment = stats,
        Err(e) => error!(error = %format!("{e:#}"), "enrichment phase failed"),
    }
    match generation_phase(ctx).await {
        Ok(stats) => summary.generation = stats,
        Err(e) => error!(error = %format!("{e:#}"), "generation phase failed"),
    }
    match initial_send_phase(ctx).await {
        Ok(stats) => summary.initial = stats,
        Err(e) => error!(error = %format!("{e:#}"), "initial send phase failed"),
    }
    match followup_phase(ctx).await {
        Ok(stats) => summary.followup = stats,
        Err(e) => error!(error = %format!("{e:#}"), "follow-up phase failed"),
    }

    info!(summary = %summary, "run complete");
    summary
}

/// Per-record store writes never abort the batch; they log and move on.
async fn apply_update(ctx: &AppContext, id: &str, update: ProspectUpdate) {
    if let Err(e) = ctx.store.update(id, update).await {
        error!(id, error = %format!("{e:#}"), "store update failed");
    }
}

async fn enrichment_phase(ctx: &AppContext) -> Result<BatchStats> {
    let batch = ctx
        .store
        .select(Selection::NeedsEnrichment, ctx.settings.max_enrichments_per_run)
        .await?;
    info!(candidates = batch.len(), "enrichment phase");

    let mut stats = BatchStats::default();
    for prospect in batch {
        stats.processed += 1;
        let now = Utc::now();

        let profile_url = prospect
            .linkedin_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());
        let Some(profile_url) = profile_url else {
            warn!(id = %prospect.id, "selected for enrichment without a profile url");
            // manual terminal states (unsubscribed, do_not_contact, …) are
            // never overwritten by the pipeline
            let failed_status = (!prospect.outreach_status.is_manual())
                .then_some(OutreachStatus::EnrichmentFailed);
            apply_update(
                ctx,
                &prospect.id,
                ProspectUpdate {
                    outreach_status: failed_status,
                    email_status: Some(EmailStatus::LookupFailed),
                    enrichment_success: Some(false),
                    enrichment_timestamp: Some(now),
                    ..Default::default()
                },
            )
            .await;
            continue;
        };

        // provider failures are terminal for this run; the record stays
        // eligible and is retried on the next invocation
        let outcome = match ctx.enricher.enrich(profile_url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(id = %prospect.id, error = %format!("{e:#}"), "enrichment call failed");
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        email_status: Some(EmailStatus::LookupFailed),
                        enrichment_success: Some(false),
                        enrichment_timestamp: Some(now),
                        ..Default::default()
                    },
                )
                .await;
                continue;
            }
        };

        match outcome {
            EnrichmentOutcome::Success(fields) => {
                let email_status = if fields
                    .work_email
                    .as_deref()
                    .map_or(false, |e| !e.trim().is_empty())
                {
                    EmailStatus::Verified
                } else {
                    EmailStatus::Pending
                };
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        enriched: Some(fields),
                        enrichment_success: Some(true),
                        email_status: Some(email_status),
                        enrichment_timestamp: Some(now),
                        ..Default::default()
                    },
                )
                .await;
                stats.successful += 1;
            }
            EnrichmentOutcome::Failure(reason) => {
                warn!(id = %prospect.id, %reason, "enrichment failed");
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        email_status: Some(EmailStatus::LookupFailed),
                        enrichment_success: Some(false),
                        enrichment_timestamp: Some(now),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
    }
    Ok(stats)
}

async fn generation_phase(ctx: &AppContext) -> Result<BatchStats> {
    let batch = ctx
        .store
        .select(Selection::AwaitingGeneration, ctx.settings.max_generations_per_run)
        .await?;
    info!(candidates = batch.len(), "generation phase");

    let mut stats = BatchStats::default();
    let mut first_call = true;
    for prospect in batch {
        stats.processed += 1;

        if let Some(field) = generate::missing_required_fact(&prospect) {
            warn!(id = %prospect.id, field, "missing required fact for generation");
            apply_update(
                ctx,
                &prospect.id,
                ProspectUpdate {
                    ai_generation_error: Some(format!("missing required field: {field}")),
                    ai_generation_timestamp: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;
            continue;
        }

        // fixed pause between provider calls
        if !first_call {
            tokio::time::sleep(ctx.settings.generation_throttle).await;
        }
        first_call = false;

        let lang = generate::content_language(&prospect);
        let prompt = generate::build_prompt(&prospect, lang);
        let now = Utc::now();
        match ctx.generator.generate(&prompt).await {
            Ok(email) => {
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        ai_initial_email: Some(AiEmail {
                            subject: email.subject,
                            body: email.body,
                            model: Some(ctx.settings.openai_model.clone()),
                            generated_at: Some(now),
                        }),
                        ai_initial_email_template: Some(true),
                        ai_generation_timestamp: Some(now),
                        clear_generation_error: true,
                        ..Default::default()
                    },
                )
                .await;
                stats.successful += 1;
            }
            Err(e) => {
                warn!(id = %prospect.id, error = %format!("{e:#}"), "generation failed");
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        ai_generation_error: Some(format!("{e:#}")),
                        ai_generation_timestamp: Some(now),
                        ..Default::default()
                    },
                )
                .await;
            }
        }
    }
    Ok(stats)
}

fn send_options(kind: &str, prospect_id: &str) -> SendOptions {
    let mut custom_args = BTreeMap::new();
    custom_args.insert("prospect_id".to_string(), prospect_id.to_string());
    SendOptions {
        category: Some(kind.to_string()),
        campaign: Some("cold_outreach".to_string()),
        click_tracking: true,
        open_tracking: true,
        custom_args,
    }
}

fn template_data(prospect: &Prospect) -> serde_json::Value {
    json!({
        "first_name": prospect.first_name.as_deref().unwrap_or(""),
        "last_name": prospect.last_name.as_deref().unwrap_or(""),
        "company": prospect.company.as_deref().unwrap_or(""),
        "job_title": prospect.job_title.as_deref().unwrap_or(""),
    })
}

async fn initial_send_phase(ctx: &AppContext) -> Result<SendStats> {
    let batch = ctx
        .store
        .select(
            Selection::ReadyForInitialSend,
            ctx.settings.max_initial_emails_per_run,
        )
        .await?;
    info!(candidates = batch.len(), "initial send phase");

    let mut stats = SendStats::default();
    for prospect in batch {
        let Some(to) = prospect.recipient() else {
            warn!(id = %prospect.id, "no resolvable recipient");
            apply_update(
                ctx,
                &prospect.id,
                ProspectUpdate {
                    outreach_status: Some(OutreachStatus::NoValidEmail),
                    ..Default::default()
                },
            )
            .await;
            stats.errors += 1;
            continue;
        };
        let to = to.to_string();
        let options = send_options("initial", &prospect.id);

        let sent = if let Some(ai) = prospect.usable_ai_email() {
            let lang = generate::content_language(&prospect);
            let frame = MessageFrame {
                first_name: prospect.first_name.as_deref().unwrap_or(""),
                sender_name: &ctx.settings.sender_name,
                unsubscribe_url: &ctx.settings.unsubscribe_url,
            };
            let body = content::compose_body(lang, &ai.body, &frame);
            ctx.delivery
                .send_raw(&to, &ai.subject, &content::text_to_html(&body), options)
                .await
        } else {
            let template = locale::resolve_template(
                EmailType::Initial,
                prospect.language.as_deref(),
                prospect.country.as_deref(),
            );
            let Some(template_id) = template else {
                warn!(id = %prospect.id, "no template for locale");
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        outreach_status: Some(OutreachStatus::TemplateMissing),
                        ..Default::default()
                    },
                )
                .await;
                stats.errors += 1;
                continue;
            };
            ctx.delivery
                .send_template(&to, template_id, template_data(&prospect), options)
                .await
        };

        match sent {
            Ok(()) => {
                // send + status change are one logical unit
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        outreach_status: Some(state::after_initial_send()),
                        last_contacted: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
                stats.sent += 1;
            }
            Err(e) => {
                // no status write: still pending_upload, retried next run
                error!(id = %prospect.id, error = %e, "initial send failed");
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}

async fn followup_phase(ctx: &AppContext) -> Result<SendStats> {
    let cap = ctx.settings.max_followup_emails_per_run;
    let pool = ctx
        .store
        .select(Selection::FollowupEligible, cap * FOLLOWUP_OVERFETCH)
        .await?;
    info!(candidates = pool.len(), cap, "follow-up phase");

    let now = Utc::now();
    let mut stats = SendStats::default();
    for prospect in &pool {
        if stats.sent as usize >= cap {
            info!("follow-up cap reached, remaining candidates roll to next run");
            break;
        }
        if !state::is_due(prospect, now) {
            continue;
        }

        match state::followup_action(prospect.outreach_status) {
            FollowupAction::Graduate => {
                // sequence exhausted: exit transition, no email
                info!(id = %prospect.id, "sequence exhausted, moving to leads");
                apply_update(
                    ctx,
                    &prospect.id,
                    ProspectUpdate {
                        outreach_status: Some(OutreachStatus::MovedToLeads),
                        ..Default::default()
                    },
                )
                .await;
            }
            FollowupAction::Send { next } => {
                let Some(to) = prospect.recipient() else {
                    warn!(id = %prospect.id, "no resolvable recipient");
                    apply_update(
                        ctx,
                        &prospect.id,
                        ProspectUpdate {
                            outreach_status: Some(OutreachStatus::NoValidEmail),
                            ..Default::default()
                        },
                    )
                    .await;
                    stats.errors += 1;
                    continue;
                };
                let template = locale::resolve_template(
                    EmailType::Followup,
                    prospect.language.as_deref(),
                    prospect.country.as_deref(),
                );
                let Some(template_id) = template else {
                    warn!(id = %prospect.id, "no follow-up template for locale");
                    apply_update(
                        ctx,
                        &prospect.id,
                        ProspectUpdate {
                            outreach_status: Some(OutreachStatus::TemplateMissing),
                            ..Default::default()
                        },
                    )
                    .await;
                    stats.errors += 1;
                    continue;
                };

                let result = ctx
                    .delivery
                    .send_template(
                        to,
                        template_id,
                        template_data(prospect),
                        send_options("followup", &prospect.id),
                    )
                    .await;
                match result {
                    Ok(()) => {
                        apply_update(
                            ctx,
                            &prospect.id,
                            ProspectUpdate {
                                outreach_status: Some(next),
                                last_contacted: Some(Utc::now()),
                                ..Default::default()
                            },
                        )
                        .await;
                        stats.sent += 1;
                    }
                    Err(e) => {
                        error!(id = %prospect.id, error = %e, "follow-up send failed");
                        stats.errors += 1;
                    }
                }
            }
        }
    }

    if (stats.sent as usize) < cap && pool.len() == cap * FOLLOWUP_OVERFETCH {
        // over-fetch page exhausted before the cap was met; later due records
        // may be starved behind not-yet-due ones until next run
        warn!("follow-up candidate page exhausted below send cap");
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    use crate::delivery::{OutgoingEmail, SendError, Transport};
    use crate::generate::GeneratedEmail;
    use crate::prospect::EnrichedFields;
    use crate::store::{self, Selection};

    // ── fakes ──────────────────────────────────────────────────────────

    struct MemoryStore {
        records: Mutex<Vec<Prospect>>,
        writes: AtomicU32,
        fail_selects: bool,
    }

    impl MemoryStore {
        fn new(records: Vec<Prospect>) -> Arc<Self> {
            Arc::new(MemoryStore {
                records: Mutex::new(records),
                writes: AtomicU32::new(0),
                fail_selects: false,
            })
        }

        fn get(&self, id: &str) -> Prospect {
            self.records
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .unwrap()
        }

        fn writes(&self) -> u32 {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProspectStore for MemoryStore {
        async fn select(&self, selection: Selection, limit: usize) -> Result<Vec<Prospect>> {
            if self.fail_selects {
                anyhow::bail!("store unavailable");
            }
            let mut hits: Vec<Prospect> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|p| store::matches(selection, p))
                .cloned()
                .collect();
            hits.sort_by(|a, b| a.id.cmp(&b.id));
            hits.truncate(limit);
            Ok(hits)
        }

        async fn update(&self, id: &str, update: ProspectUpdate) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut records = self.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| anyhow::anyhow!("prospect {id} not found"))?;
            update.apply(record);
            record.last_modified = Some(Utc::now());
            Ok(())
        }
    }

    struct FakeEnricher {
        outcome: fn() -> EnrichmentOutcome,
    }

    #[async_trait]
    impl Enricher for FakeEnricher {
        async fn enrich(&self, _profile_url: &str) -> Result<EnrichmentOutcome> {
            Ok((self.outcome)())
        }
    }

    struct FakeGenerator {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ContentGenerator for FakeGenerator {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedEmail> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("model returned garbage");
            }
            Ok(GeneratedEmail {
                subject: "A thought about your data platform".into(),
                body: "Your team's recent platform work caught my eye and I had an idea worth sharing.".into(),
            })
        }
    }

    struct CountingTransport {
        attempts: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn attempt(&self, _email: &OutgoingEmail) -> Result<(), SendError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SendError::Rejected(400))
            } else {
                Ok(())
            }
        }
    }

    fn test_settings() -> Settings {
        Settings {
            bind_addr: "127.0.0.1:0".into(),
            store_path: "unused.json".into(),
            openai_api_key: "test".into(),
            openai_model: "test-model".into(),
            enrich_api_url: "http://enrich.test".into(),
            enrich_api_key: "test".into(),
            delivery_api_url: "http://delivery.test".into(),
            delivery_api_key: "test".into(),
            sender_email: "me@agency.test".into(),
            sender_name: "Sam".into(),
            unsubscribe_url: "https://agency.test/unsubscribe".into(),
            max_enrichments_per_run: 10,
            max_generations_per_run: 10,
            max_initial_emails_per_run: 10,
            max_followup_emails_per_run: 10,
            generation_throttle: StdDuration::ZERO,
            http_timeout: StdDuration::from_secs(1),
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<CountingTransport>,
        generator: Arc<FakeGenerator>,
        ctx: AppContext,
    }

    fn harness(records: Vec<Prospect>) -> Harness {
        harness_with(records, test_settings(), || {
            EnrichmentOutcome::Success(EnrichedFields::default())
        })
    }

    fn harness_with(
        records: Vec<Prospect>,
        settings: Settings,
        enrich_outcome: fn() -> EnrichmentOutcome,
    ) -> Harness {
        let store = MemoryStore::new(records);
        let transport = Arc::new(CountingTransport {
            attempts: AtomicU32::new(0),
            fail: false,
        });
        let generator = Arc::new(FakeGenerator {
            calls: AtomicU32::new(0),
            fail: false,
        });
        let delivery = Arc::new(DeliveryClient::new(
            transport.clone(),
            settings.sender_email.clone(),
            settings.sender_name.clone(),
        ));
        let ctx = AppContext {
            settings,
            store: store.clone(),
            enricher: Arc::new(FakeEnricher {
                outcome: enrich_outcome,
            }),
            delivery,
            generator: generator.clone(),
        };
        Harness {
            store,
            transport,
            generator,
            ctx,
        }
    }

    fn ready_prospect(id: &str) -> Prospect {
        Prospect {
            id: id.into(),
            first_name: Some("Ada".into()),
            generic_email: Some(format!("contact+{id}")),
            enrichment_success: true,
            outreach_status: OutreachStatus::PendingUpload,
            country: Some("France".into()),
            ..Default::default()
        }
    }

    // ── initial send ───────────────────────────────────────────────────

    #[tokio::test]
    async fn initial_send_transitions_and_respects_cap() {
        let mut settings = test_settings();
        settings.max_initial_emails_per_run = 2;
        let records = vec![
            ready_prospect("a@x.com"),
            ready_prospect("b@x.com"),
            ready_prospect("c@x.com"),
        ];
        let h = harness_with(records, settings, || {
            EnrichmentOutcome::Success(EnrichedFields::default())
        });

        let stats = initial_send_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.errors, 0);

        let a = h.store.get("a@x.com");
        assert_eq!(a.outreach_status, OutreachStatus::SequenceStarted);
        assert!(a.last_contacted.is_some());
        let c = h.store.get("c@x.com");
        assert_eq!(c.outreach_status, OutreachStatus::PendingUpload);
        assert!(c.last_contacted.is_none());
    }

    #[tokio::test]
    async fn initial_send_without_recipient_marks_no_valid_email() {
        let mut p = ready_prospect("a@x.com");
        p.generic_email = None;
        let h = harness(vec![p]);

        let stats = initial_send_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.errors, 1);
        assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.store.get("a@x.com").outreach_status,
            OutreachStatus::NoValidEmail
        );
    }

    #[tokio::test]
    async fn initial_send_failure_leaves_status_retryable() {
        let h = harness(vec![ready_prospect("a@x.com")]);
        // swap in a failing transport via a fresh delivery client
        let failing = Arc::new(CountingTransport {
            attempts: AtomicU32::new(0),
            fail: true,
        });
        let ctx = AppContext {
            settings: h.ctx.settings.clone(),
            store: h.store.clone(),
            enricher: h.ctx.enricher.clone(),
            delivery: Arc::new(DeliveryClient::new(
                failing,
                "me@agency.test".into(),
                "Sam".into(),
            )),
            generator: h.ctx.generator.clone(),
        };

        let stats = initial_send_phase(&ctx).await.unwrap();
        assert_eq!(stats.errors, 1);
        // still pending_upload, so it is selected again next run
        assert_eq!(
            h.store.get("a@x.com").outreach_status,
            OutreachStatus::PendingUpload
        );
    }

    #[tokio::test]
    async fn initial_send_uses_ai_content_when_usable() {
        let mut p = ready_prospect("a@x.com");
        p.ai_initial_email_template = true;
        p.ai_initial_email = Some(AiEmail {
            subject: "Bonjour".into(),
            body: "Votre travail chez Acme est impressionnant et je voulais en discuter.".into(),
            ..Default::default()
        });
        let h = harness(vec![p]);

        let stats = initial_send_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 1);
    }

    // ── follow-up ──────────────────────────────────────────────────────

    fn followup_prospect(id: &str, status: OutreachStatus, days_ago: i64) -> Prospect {
        Prospect {
            id: id.into(),
            generic_email: Some(format!("contact+{id}")),
            outreach_status: status,
            last_contacted: Some(Utc::now() - Duration::days(days_ago)),
            country: Some("France".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn followup_not_due_makes_no_write() {
        // sequence_started has a 2-day interval; contacted yesterday
        let h = harness(vec![followup_prospect(
            "a@x.com",
            OutreachStatus::SequenceStarted,
            1,
        )]);
        let stats = followup_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(h.store.writes(), 0);
        assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn followup_due_advances_status_and_stamps() {
        let h = harness(vec![followup_prospect(
            "a@x.com",
            OutreachStatus::SequenceStarted,
            3,
        )]);
        let before = h.store.get("a@x.com").last_contacted.unwrap();

        let stats = followup_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 1);
        let after = h.store.get("a@x.com");
        assert_eq!(after.outreach_status, OutreachStatus::Followup1);
        assert!(after.last_contacted.unwrap() > before);
    }

    #[tokio::test]
    async fn followup_graduates_exhausted_sequence_without_send() {
        let h = harness(vec![followup_prospect(
            "a@x.com",
            OutreachStatus::Followup2,
            5,
        )]);
        let stats = followup_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.store.get("a@x.com").outreach_status,
            OutreachStatus::MovedToLeads
        );
    }

    #[tokio::test]
    async fn followup_stops_issuing_sends_at_cap() {
        let mut settings = test_settings();
        settings.max_followup_emails_per_run = 1;
        let records = vec![
            followup_prospect("a@x.com", OutreachStatus::SequenceStarted, 3),
            followup_prospect("b@x.com", OutreachStatus::SequenceStarted, 3),
        ];
        let h = harness_with(records, settings, || {
            EnrichmentOutcome::Success(EnrichedFields::default())
        });

        let stats = followup_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 1);
        // second due candidate rolls to the next run
        assert_eq!(
            h.store.get("b@x.com").outreach_status,
            OutreachStatus::SequenceStarted
        );
    }

    #[tokio::test]
    async fn followup_skips_opted_out_records() {
        let mut p = followup_prospect("a@x.com", OutreachStatus::SequenceStarted, 3);
        p.followup_not_needed = true;
        let h = harness(vec![p]);
        let stats = followup_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(h.store.writes(), 0);
    }

    // ── enrichment ─────────────────────────────────────────────────────

    fn unenriched_prospect(id: &str) -> Prospect {
        Prospect {
            id: id.into(),
            linkedin_url: Some("https://linkedin.test/in/ada".into()),
            linkedin_url_found: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn enrichment_success_merges_fields_and_verifies_email() {
        let h = harness_with(vec![unenriched_prospect("a@x.com")], test_settings(), || {
            EnrichmentOutcome::Success(EnrichedFields {
                company: Some("Acme".into()),
                work_email: Some("ada@acme.com".into()),
                ..Default::default()
            })
        });

        let stats = enrichment_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.successful, 1);
        let p = h.store.get("a@x.com");
        assert!(p.enrichment_success);
        assert_eq!(p.email_status, EmailStatus::Verified);
        assert_eq!(p.company.as_deref(), Some("Acme"));
        assert!(p.enrichment_timestamp.is_some());
    }

    #[tokio::test]
    async fn enrichment_failure_is_terminal_for_the_run() {
        let h = harness_with(vec![unenriched_prospect("a@x.com")], test_settings(), || {
            EnrichmentOutcome::Failure(crate::enrich::EnrichFailure::NotFound)
        });

        let stats = enrichment_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.successful, 0);
        let p = h.store.get("a@x.com");
        assert!(!p.enrichment_success);
        assert_eq!(p.email_status, EmailStatus::LookupFailed);
        // outreach status untouched: record is re-eligible next run
        assert_eq!(p.outreach_status, OutreachStatus::PendingUpload);
    }

    #[tokio::test]
    async fn enrichment_never_overwrites_manual_statuses() {
        // unsubscribed record with a set-but-blank profile url still gets
        // selected; the failure write must leave the manual status alone
        let mut p = unenriched_prospect("a@x.com");
        p.linkedin_url = Some("   ".into());
        p.outreach_status = OutreachStatus::Unsubscribed;
        let h = harness(vec![p]);

        let stats = enrichment_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.successful, 0);
        let p = h.store.get("a@x.com");
        assert_eq!(p.outreach_status, OutreachStatus::Unsubscribed);
        assert_eq!(p.email_status, EmailStatus::LookupFailed);
    }

    // ── generation ─────────────────────────────────────────────────────

    fn enriched_prospect(id: &str) -> Prospect {
        Prospect {
            id: id.into(),
            first_name: Some("Ada".into()),
            job_title: Some("CTO".into()),
            company: Some("Acme".into()),
            country: Some("France".into()),
            enrichment_success: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn generation_caches_content_and_flags_record() {
        let h = harness(vec![enriched_prospect("a@x.com")]);
        let stats = generation_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.successful, 1);
        let p = h.store.get("a@x.com");
        assert!(p.ai_initial_email_template);
        let ai = p.ai_initial_email.unwrap();
        assert!(!ai.subject.is_empty());
        assert_eq!(ai.model.as_deref(), Some("test-model"));
    }

    #[tokio::test]
    async fn generation_skips_records_missing_facts() {
        let mut p = enriched_prospect("a@x.com");
        p.job_title = None;
        let h = harness(vec![p]);

        let stats = generation_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.successful, 0);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
        let p = h.store.get("a@x.com");
        assert!(!p.ai_initial_email_template);
        assert!(p
            .ai_generation_error
            .as_deref()
            .unwrap()
            .contains("job_title"));
    }

    #[tokio::test]
    async fn generation_success_clears_stale_error() {
        // a failed earlier run left an error; a successful retry must not
        // leave the record carrying both content and the old error
        let mut p = enriched_prospect("a@x.com");
        p.ai_generation_error = Some("model returned garbage".into());
        let h = harness(vec![p]);

        let stats = generation_phase(&h.ctx).await.unwrap();
        assert_eq!(stats.successful, 1);
        let p = h.store.get("a@x.com");
        assert!(p.ai_initial_email_template);
        assert!(p.ai_generation_error.is_none());
    }

    #[tokio::test]
    async fn generation_error_does_not_set_generated_flag() {
        let h = harness(vec![enriched_prospect("a@x.com")]);
        let ctx = AppContext {
            generator: Arc::new(FakeGenerator {
                calls: AtomicU32::new(0),
                fail: true,
            }),
            settings: h.ctx.settings.clone(),
            store: h.store.clone(),
            enricher: h.ctx.enricher.clone(),
            delivery: h.ctx.delivery.clone(),
        };

        let stats = generation_phase(&ctx).await.unwrap();
        assert_eq!(stats.successful, 0);
        let p = h.store.get("a@x.com");
        assert!(!p.ai_initial_email_template);
        assert!(p.ai_generation_error.is_some());
    }

    // ── orchestrator ───────────────────────────────────────────────────

    #[tokio::test]
    async fn failing_store_does_not_abort_the_run() {
        let store = Arc::new(MemoryStore {
            records: Mutex::new(vec![]),
            writes: AtomicU32::new(0),
            fail_selects: true,
        });
        let h = harness(vec![]);
        let ctx = AppContext {
            store,
            settings: h.ctx.settings.clone(),
            enricher: h.ctx.enricher.clone(),
            delivery: h.ctx.delivery.clone(),
            generator: h.ctx.generator.clone(),
        };

        // every phase fails its eligibility query; the run still completes
        let summary = run_all(&ctx).await;
        assert_eq!(summary.enrichment.processed, 0);
        assert_eq!(summary.initial.sent, 0);
        assert_eq!(summary.followup.sent, 0);
    }

    #[tokio::test]
    async fn full_run_moves_a_prospect_through_the_front_of_the_sequence() {
        let mut p = unenriched_prospect("a@x.com");
        p.first_name = Some("Ada".into());
        p.generic_email = Some("contact@acme.com".into());
        let h = harness_with(vec![p], test_settings(), || {
            EnrichmentOutcome::Success(EnrichedFields {
                company: Some("Acme".into()),
                job_title: Some("CTO".into()),
                country: Some("France".into()),
                work_email: Some("ada@acme.com".into()),
                ..Default::default()
            })
        });

        let summary = run_all(&h.ctx).await;
        assert_eq!(summary.enrichment.successful, 1);
        assert_eq!(summary.generation.successful, 1);
        assert_eq!(summary.initial.sent, 1);

        let p = h.store.get("a@x.com");
        assert_eq!(p.outreach_status, OutreachStatus::SequenceStarted);
        assert!(p.last_contacted.is_some());
        assert!(p.ai_initial_email_template);
    }
}
