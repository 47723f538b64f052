//! src/prospect.rs — the central record each pipeline phase reads and mutates.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    PendingUpload,
    EnrichmentFailed,
    SequenceStarted,
    #[serde(rename = "followup_1")]
    Followup1,
    #[serde(rename = "followup_2")]
    Followup2,
    MovedToLeads,
    RepliedPositive,
    RepliedNegative,
    MeetingBooked,
    Unsubscribed,
    DoNotContact,
    // descriptive terminal error statuses written by the pipeline itself
    TemplateMissing,
    NoValidEmail,
}

impl Default for OutreachStatus {
    fn default() -> Self {
        OutreachStatus::PendingUpload
    }
}

impl OutreachStatus {
    /// States set by reply handling / unsubscribe flows outside this system.
    /// The pipeline must never overwrite them.
    pub fn is_manual(self) -> bool {
        matches!(
            self,
            OutreachStatus::RepliedPositive
                | OutreachStatus::RepliedNegative
                | OutreachStatus::MeetingBooked
                | OutreachStatus::Unsubscribed
                | OutreachStatus::DoNotContact
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Verified,
    LookupFailed,
    EnrichmentInprogress,
}

impl Default for EmailStatus {
    fn default() -> Self {
        EmailStatus::Pending
    }
}

/// Subject/body pair produced by the content generator, cached on the record
/// so a later run can send without regenerating.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct AiEmail {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
}

/// Normalized fields returned by the enrichment provider.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnrichedFields {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub work_email: Option<String>,
    /// Open-ended biographical bag (skills, experience history, …).
    #[serde(default)]
    pub facts: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Prospect {
    /// Stable key (the upload email address).
    pub id: String,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub work_email: Option<String>,
    pub generic_email: Option<String>,
    #[serde(default)]
    pub personal_emails: Vec<String>,
    /// External professional-network profile reference.
    pub linkedin_url: Option<String>,

    pub company: Option<String>,
    pub job_title: Option<String>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub facts: Map<String, Value>,

    #[serde(default)]
    pub enrichment_success: bool,
    #[serde(default)]
    pub linkedin_url_found: bool,
    #[serde(default)]
    pub email_status: EmailStatus,
    #[serde(default)]
    pub outreach_status: OutreachStatus,
    #[serde(default)]
    pub followup_not_needed: bool,

    pub last_contacted: Option<DateTime<Utc>>,
    pub enrichment_timestamp: Option<DateTime<Utc>>,
    pub ai_generation_timestamp: Option<DateTime<Utc>>,

    /// Has generation run for this record (success only).
    #[serde(default)]
    pub ai_initial_email_template: bool,
    pub ai_initial_email: Option<AiEmail>,
    pub ai_generation_error: Option<String>,

    /// Stamped by the store adapter on every write.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Prospect {
    /// Recipient priority: verified work email → generic email → first
    /// personal candidate. First non-empty wins.
    pub fn recipient(&self) -> Option<&str> {
        if self.email_status == EmailStatus::Verified {
            if let Some(e) = non_empty(&self.work_email) {
                return Some(e);
            }
        }
        if let Some(e) = non_empty(&self.generic_email) {
            return Some(e);
        }
        self.personal_emails
            .iter()
            .map(String::as_str)
            .find(|e| !e.trim().is_empty())
    }

    pub fn full_name(&self) -> String {
        let mut name = self.first_name.clone().unwrap_or_default();
        if let Some(last) = non_empty(&self.last_name) {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }
        name
    }

    /// AI content is usable for the initial send if generation succeeded and
    /// the cached copy is non-empty.
    pub fn usable_ai_email(&self) -> Option<&AiEmail> {
        if !self.ai_initial_email_template {
            return None;
        }
        self.ai_initial_email
            .as_ref()
            .filter(|ai| !ai.subject.trim().is_empty() && !ai.body.trim().is_empty())
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Partial write payload handed to the store adapter. Every field is optional;
/// `None` means "leave untouched". The adapter stamps `last_modified` itself.
#[derive(Debug, Default, Clone)]
pub struct ProspectUpdate {
    pub outreach_status: Option<OutreachStatus>,
    pub email_status: Option<EmailStatus>,
    pub enrichment_success: Option<bool>,
    pub enriched: Option<EnrichedFields>,
    pub last_contacted: Option<DateTime<Utc>>,
    pub enrichment_timestamp: Option<DateTime<Utc>>,
    pub ai_generation_timestamp: Option<DateTime<Utc>>,
    pub ai_initial_email_template: Option<bool>,
    pub ai_initial_email: Option<AiEmail>,
    pub ai_generation_error: Option<String>,
    /// Reset a stale generation error once a later attempt succeeds.
    pub clear_generation_error: bool,
}

impl ProspectUpdate {
    pub fn is_empty(&self) -> bool {
        self.outreach_status.is_none()
            && self.email_status.is_none()
            && self.enrichment_success.is_none()
            && self.enriched.is_none()
            && self.last_contacted.is_none()
            && self.enrichment_timestamp.is_none()
            && self.ai_generation_timestamp.is_none()
            && self.ai_initial_email_template.is_none()
            && self.ai_initial_email.is_none()
            && self.ai_generation_error.is_none()
            && !self.clear_generation_error
    }

    /// Merge into a record. Enriched fields only overwrite when present so a
    /// partial provider response never blanks earlier data.
    pub fn apply(&self, p: &mut Prospect) {
        if let Some(s) = self.outreach_status {
            p.outreach_status = s;
        }
        if let Some(s) = self.email_status {
            p.email_status = s;
        }
        if let Some(b) = self.enrichment_success {
            p.enrichment_success = b;
        }
        if let Some(ref e) = self.enriched {
            if e.company.is_some() {
                p.company = e.company.clone();
            }
            if e.job_title.is_some() {
                p.job_title = e.job_title.clone();
            }
            if e.industry.is_some() {
                p.industry = e.industry.clone();
            }
            if e.location.is_some() {
                p.location = e.location.clone();
            }
            if e.country.is_some() {
                p.country = e.country.clone();
            }
            if e.work_email.is_some() {
                p.work_email = e.work_email.clone();
            }
            for (k, v) in &e.facts {
                p.facts.insert(k.clone(), v.clone());
            }
        }
        if let Some(t) = self.last_contacted {
            p.last_contacted = Some(t);
        }
        if let Some(t) = self.enrichment_timestamp {
            p.enrichment_timestamp = Some(t);
        }
        if let Some(t) = self.ai_generation_timestamp {
            p.ai_generation_timestamp = Some(t);
        }
        if let Some(b) = self.ai_initial_email_template {
            p.ai_initial_email_template = b;
        }
        if let Some(ref ai) = self.ai_initial_email {
            p.ai_initial_email = Some(ai.clone());
        }
        if self.clear_generation_error {
            p.ai_generation_error = None;
        } else if let Some(ref err) = self.ai_generation_error {
            p.ai_generation_error = Some(err.clone());
        }
    }
}
