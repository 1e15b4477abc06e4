use chrono::{DateTime, Duration, Utc};
use plaudit_contracts::{Submission, SubmissionPatch, SubmissionStatus};

pub mod drafting;
pub mod messages;
pub mod qualification;
pub mod transitions;
pub mod webhook;

pub use drafting::{
    backoff_delay, build_review_prompt, clean_draft, within_band, word_count, PromptInput,
    SYSTEM_PROMPT,
};
pub use messages::{
    escape_html, internal_alert_email, normalize_phone, truncate_chars, EmailContent,
    MessageContext, OutboundMessage,
};
pub use qualification::{
    average, evaluate, has_consent, has_negative_sentiment, meets_threshold, parse_rating,
    ratings_from_form, Qualification, QualificationPolicy, NEGATIVE_KEYWORDS,
};
pub use transitions::{next_status, StatusEvent};
pub use webhook::{
    constant_time_eq, parse_button_payload, parse_chat_webhook, sign_body, verify_signature,
    InboundChat, MalformedWebhook,
};

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

/// A token with no issuance time never expires.
pub fn token_expired(issued_at: Option<DateTime<Utc>>, now: DateTime<Utc>, expiry_days: u32) -> bool {
    match issued_at {
        Some(issued) => now - issued > Duration::days(i64::from(expiry_days)),
        None => false,
    }
}

/// Age in whole days, saturating at zero for timestamps in the future.
pub fn age_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(0)
}

/// Maps the 0–10 average onto the 1–5 stars the landing page renders.
pub fn star_rating(avg_rating: f64) -> u8 {
    if !avg_rating.is_finite() || avg_rating <= 0.0 {
        return 5;
    }
    (avg_rating / 2.0).round().clamp(1.0, 5.0) as u8
}

/// Short, log-safe form of a token.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchRejected {
    TokenReassigned { submission_id: i64 },
    Stale {
        submission_id: i64,
        found: SubmissionStatus,
    },
}

impl std::fmt::Display for PatchRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchRejected::TokenReassigned { submission_id } => {
                write!(f, "token already assigned for submission {submission_id}")
            }
            PatchRejected::Stale {
                submission_id,
                found,
            } => write!(
                f,
                "submission {submission_id} changed concurrently; now {}",
                found.as_str()
            ),
        }
    }
}

/// Applies a partial update in place. A token, once set, cannot change, and a
/// guarded patch only applies to the row state it was computed from.
pub fn apply_patch(sub: &mut Submission, patch: &SubmissionPatch) -> Result<(), PatchRejected> {
    let status_moved = patch.expected_status.is_some_and(|s| s != sub.status);
    let count_moved = patch.expected_regen_count.is_some_and(|c| c != sub.regen_count);
    if status_moved || count_moved {
        return Err(PatchRejected::Stale {
            submission_id: sub.id,
            found: sub.status,
        });
    }
    if let (Some(existing), Some(incoming)) = (&sub.token, &patch.token) {
        if existing != incoming {
            return Err(PatchRejected::TokenReassigned {
                submission_id: sub.id,
            });
        }
    }
    if let Some(status) = patch.status {
        sub.status = status;
    }
    if let Some(reason) = patch.alert_reason {
        sub.alert_reason = Some(reason);
    }
    if let Some(token) = &patch.token {
        sub.token = Some(token.clone());
    }
    if let Some(draft) = &patch.draft_text {
        sub.draft_text = Some(draft.clone());
    }
    if let Some(count) = patch.regen_count {
        sub.regen_count = count;
    }
    if let Some(method) = patch.delivery_method {
        sub.delivery_method = method;
    }
    if let Some(ts) = patch.sent_at {
        sub.sent_at = Some(ts);
    }
    if let Some(ts) = patch.copied_at {
        sub.copied_at = Some(ts);
    }
    if let Some(ts) = patch.posted_at {
        sub.posted_at = Some(ts);
    }
    if let Some(ts) = patch.reminded_at {
        sub.reminded_at = Some(ts);
    }
    if let Some(error) = &patch.error {
        sub.error = error.clone();
    }
    Ok(())
}
