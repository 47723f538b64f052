//! src/state.rs — outreach state machine: which phase a prospect is in,
//! whether it is due for contact, and what it transitions to next.
use chrono::{DateTime, Duration, Utc};

use crate::prospect::{OutreachStatus, Prospect};

/// Days to wait after the last contact before the next touch, keyed by the
/// *current* status. The keys of this table define the follow-up-eligible set.
const FOLLOW_UP_INTERVALS: &[(OutreachStatus, i64)] = &[
    (OutreachStatus::SequenceStarted, 2),
    (OutreachStatus::Followup1, 3),
    (OutreachStatus::Followup2, 4),
];

pub fn interval_days(status: OutreachStatus) -> Option<i64> {
    FOLLOW_UP_INTERVALS
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, days)| *days)
}

/// Statuses eligible for the follow-up phase, in table order. Used both for
/// the store selection and for transition-completeness checks.
pub fn followup_eligible_statuses() -> impl Iterator<Item = OutreachStatus> {
    FOLLOW_UP_INTERVALS.iter().map(|(s, _)| *s)
}

pub fn is_followup_eligible(status: OutreachStatus) -> bool {
    interval_days(status).is_some()
}

/// What the follow-up phase does to a due record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowupAction {
    /// Send a follow-up email, then move to `next`.
    Send { next: OutreachStatus },
    /// Sequence exhausted: move to `moved_to_leads` without sending.
    Graduate,
}

/// Transition table for a due, follow-up-eligible record. Any eligible status
/// without an explicit next step graduates out of the automated sequence, so
/// no record is ever silently dropped.
pub fn followup_action(status: OutreachStatus) -> FollowupAction {
    match status {
        OutreachStatus::SequenceStarted => FollowupAction::Send {
            next: OutreachStatus::Followup1,
        },
        OutreachStatus::Followup1 => FollowupAction::Send {
            next: OutreachStatus::Followup2,
        },
        _ => FollowupAction::Graduate,
    }
}

/// Status written after a successful initial send.
pub fn after_initial_send() -> OutreachStatus {
    OutreachStatus::SequenceStarted
}

/// `last_contacted + interval(status)`. `None` when the status carries no
/// configured interval or the record has never been contacted (no anchor to
/// compute from).
pub fn due_date(
    last_contacted: Option<DateTime<Utc>>,
    status: OutreachStatus,
) -> Option<DateTime<Utc>> {
    let anchor = last_contacted?;
    let days = interval_days(status)?;
    Some(anchor + Duration::days(days))
}

pub fn is_due(prospect: &Prospect, now: DateTime<Utc>) -> bool {
    match due_date(prospect.last_contacted, prospect.outreach_status) {
        Some(due) => now >= due,
        None => false,
    }
}

/// Initial-send eligibility: enriched and still at the top of the sequence.
pub fn eligible_for_initial_send(prospect: &Prospect) -> bool {
    prospect.enrichment_success && prospect.outreach_status == OutreachStatus::PendingUpload
}

pub fn eligible_for_followup(prospect: &Prospect) -> bool {
    is_followup_eligible(prospect.outreach_status) && !prospect.followup_not_needed
}
