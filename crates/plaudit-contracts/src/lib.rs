use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: &str = "1.0.0";

/// Number of rating questions on the satisfaction survey.
pub const RATING_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Sent,
    Approved,
    Edited,
    Declined,
    Copied,
    Posted,
    AlertSent,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 8] = [
        SubmissionStatus::Pending,
        SubmissionStatus::Sent,
        SubmissionStatus::Approved,
        SubmissionStatus::Edited,
        SubmissionStatus::Declined,
        SubmissionStatus::Copied,
        SubmissionStatus::Posted,
        SubmissionStatus::AlertSent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Sent => "SENT",
            SubmissionStatus::Approved => "APPROVED",
            SubmissionStatus::Edited => "EDITED",
            SubmissionStatus::Declined => "DECLINED",
            SubmissionStatus::Copied => "COPIED",
            SubmissionStatus::Posted => "POSTED",
            SubmissionStatus::AlertSent => "ALERT_SENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|s| s.as_str() == wanted)
    }

    /// No consent action is accepted once a submission reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Declined
                | SubmissionStatus::Copied
                | SubmissionStatus::Posted
                | SubmissionStatus::AlertSent
        )
    }

    /// Statuses that block a second submission from the same e-mail.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Pending
                | SubmissionStatus::Sent
                | SubmissionStatus::Approved
                | SubmissionStatus::Edited
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsentAction {
    Approve,
    Regenerate,
    Decline,
}

impl ConsentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentAction::Approve => "approve",
            ConsentAction::Regenerate => "regenerate",
            ConsentAction::Decline => "decline",
        }
    }

    /// Chat buttons historically used `edit` for "request changes"; it maps to
    /// the full regenerate cycle.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(ConsentAction::Approve),
            "regenerate" | "edit" => Some(ConsentAction::Regenerate),
            "decline" => Some(ConsentAction::Decline),
            _ => None,
        }
    }
}

/// Entry point a consent action arrived through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Chat,
    EmailLink,
    LandingPage,
}

impl ActionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionSource::Chat => "chat",
            ActionSource::EmailLink => "email_link",
            ActionSource::LandingPage => "landing_page",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    Email,
    #[default]
    None,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::WhatsApp => "WHATSAPP",
            DeliveryMethod::Email => "EMAIL",
            DeliveryMethod::None => "NONE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WHATSAPP" => Some(DeliveryMethod::WhatsApp),
            "EMAIL" => Some(DeliveryMethod::Email),
            "NONE" | "" => Some(DeliveryMethod::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertReason {
    LowRating,
    ConsentDeclined,
    NegativeSentiment,
}

impl AlertReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertReason::LowRating => "low_rating",
            AlertReason::ConsentDeclined => "consent_declined",
            AlertReason::NegativeSentiment => "negative_sentiment",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low_rating" => Some(AlertReason::LowRating),
            "consent_declined" => Some(AlertReason::ConsentDeclined),
            "negative_sentiment" => Some(AlertReason::NegativeSentiment),
            _ => None,
        }
    }

    pub fn audit_event(self) -> &'static str {
        match self {
            AlertReason::LowRating => "LOW_RATING_ALERT",
            AlertReason::ConsentDeclined => "CONSENT_DECLINED_ALERT",
            AlertReason::NegativeSentiment => "NEGATIVE_SENTIMENT_ALERT",
        }
    }
}

/// The eight survey scores, in question order. `None` marks a missing or
/// unparseable answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Ratings(pub [Option<f64>; RATING_COUNT]);

impl Ratings {
    pub fn values(&self) -> &[Option<f64>] {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientProfile {
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub services: String,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub business_email: Option<String>,
    #[serde(default)]
    pub found: bool,
}

impl ClientProfile {
    pub const DEFAULT_NAME: &'static str = "Valued Client";
    pub const DEFAULT_BUSINESS_NAME: &'static str = "Our Business";

    /// Profile used when the directory has no entry for an e-mail.
    pub fn unknown(email: &str) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            company: String::new(),
            services: String::new(),
            whatsapp: None,
            business_email: if email.trim().is_empty() {
                None
            } else {
                Some(email.trim().to_string())
            },
            found: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: i64,
    pub email: String,
    pub submitted_at: DateTime<Utc>,
    pub ratings: Ratings,
    pub consent_raw: String,
    #[serde(default)]
    pub open_feedback: Option<String>,
    pub status: SubmissionStatus,
    pub avg_rating: f64,
    pub qualified: bool,
    #[serde(default)]
    pub alert_reason: Option<AlertReason>,
    pub profile: ClientProfile,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub draft_text: Option<String>,
    #[serde(default)]
    pub regen_count: u32,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub copied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Values for a row that does not exist yet; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub email: String,
    pub submitted_at: DateTime<Utc>,
    pub ratings: Ratings,
    pub consent_raw: String,
    pub open_feedback: Option<String>,
    pub avg_rating: f64,
    pub qualified: bool,
    pub profile: ClientProfile,
}

impl NewSubmission {
    pub fn into_submission(self, id: i64) -> Submission {
        Submission {
            id,
            email: self.email,
            submitted_at: self.submitted_at,
            ratings: self.ratings,
            consent_raw: self.consent_raw,
            open_feedback: self.open_feedback,
            status: SubmissionStatus::Pending,
            avg_rating: self.avg_rating,
            qualified: self.qualified,
            alert_reason: None,
            profile: self.profile,
            token: None,
            draft_text: None,
            regen_count: 0,
            delivery_method: DeliveryMethod::None,
            sent_at: None,
            copied_at: None,
            posted_at: None,
            reminded_at: None,
            error: None,
        }
    }
}

/// Partial update of a submission row. `None` leaves a field untouched;
/// `error: Some(None)` clears the last error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionPatch {
    pub status: Option<SubmissionStatus>,
    pub alert_reason: Option<AlertReason>,
    pub token: Option<String>,
    pub draft_text: Option<String>,
    pub regen_count: Option<u32>,
    pub delivery_method: Option<DeliveryMethod>,
    pub sent_at: Option<DateTime<Utc>>,
    pub copied_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub reminded_at: Option<DateTime<Utc>>,
    pub error: Option<Option<String>>,
    /// Guard: rejected unless the stored status still equals this.
    pub expected_status: Option<SubmissionStatus>,
    pub expected_regen_count: Option<u32>,
}

impl SubmissionPatch {
    pub fn status(status: SubmissionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    /// Makes the write conditional on the row still matching `current`'s
    /// status and regeneration count.
    pub fn expecting(mut self, current: &Submission) -> Self {
        self.expected_status = Some(current.status);
        self.expected_regen_count = Some(current.regen_count);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub reference: String,
    pub details: String,
}

impl AuditEvent {
    pub fn new(event_type: &str, submission_id: i64, details: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            event_type: event_type.to_string(),
            reference: format!("row_{submission_id}"),
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationResult {
    pub method: DeliveryMethod,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationResult {
    pub fn delivered(method: DeliveryMethod, message_id: Option<String>) -> Self {
        Self {
            method,
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            method: DeliveryMethod::None,
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// A survey answer as the form forwards it: usually a number, sometimes text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawRating {
    Number(f64),
    Text(String),
}

fn default_consent() -> String {
    "No".to_string()
}

/// Payload posted by the form integration for each new survey response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormSubmission {
    pub email: String,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub q1_kickoff: Option<RawRating>,
    #[serde(default)]
    pub q2_communication: Option<RawRating>,
    #[serde(default)]
    pub q3_project_management: Option<RawRating>,
    #[serde(default)]
    pub q4_design_ux: Option<RawRating>,
    #[serde(default)]
    pub q5_technical_quality: Option<RawRating>,
    #[serde(default)]
    pub q6_launch: Option<RawRating>,
    #[serde(default)]
    pub q7_support: Option<RawRating>,
    #[serde(default)]
    pub q8_overall: Option<RawRating>,
    #[serde(default = "default_consent")]
    pub testimonial_consent: String,
    #[serde(default)]
    pub open_feedback: Option<String>,
}

impl FormSubmission {
    pub fn raw_ratings(&self) -> [Option<&RawRating>; RATING_COUNT] {
        [
            self.q1_kickoff.as_ref(),
            self.q2_communication.as_ref(),
            self.q3_project_management.as_ref(),
            self.q4_design_ux.as_ref(),
            self.q5_technical_quality.as_ref(),
            self.q6_launch.as_ref(),
            self.q7_support.as_ref(),
            self.q8_overall.as_ref(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsentOutcome {
    Applied {
        submission_id: i64,
        action: String,
        status: SubmissionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification: Option<NotificationResult>,
    },
    NotFound,
    AlreadyActioned {
        status: SubmissionStatus,
    },
    Expired,
    LimitReached {
        regen_count: u32,
        max_regenerations: u32,
    },
    NotActionable {
        status: SubmissionStatus,
    },
}

impl ConsentOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            ConsentOutcome::Applied { .. } => "applied",
            ConsentOutcome::NotFound => "not_found",
            ConsentOutcome::AlreadyActioned { .. } => "already_actioned",
            ConsentOutcome::Expired => "expired",
            ConsentOutcome::LimitReached { .. } => "limit_reached",
            ConsentOutcome::NotActionable { .. } => "not_actionable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntakeReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<i64>,
    pub duplicate: bool,
    pub qualified: bool,
    pub avg_rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_reason: Option<AlertReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<NotificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReminderReport {
    pub reminded: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Landing-page view of a draft, keyed by token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewView {
    pub draft_text: String,
    pub client_name: String,
    pub business_name: String,
    pub rating: u8,
    pub gbp_review_url: String,
    pub status: SubmissionStatus,
    pub regeneration_count: u32,
    pub max_regenerations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WebhookResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_wire_names_match_row_values() {
        for status in SubmissionStatus::ALL {
            let wire = serde_json::to_value(status).unwrap();
            assert_eq!(wire, Value::String(status.as_str().to_string()));
            assert_eq!(SubmissionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubmissionStatus::parse(" sent "), Some(SubmissionStatus::Sent));
        assert_eq!(SubmissionStatus::parse("unknown"), None);
    }

    #[test]
    fn terminal_and_active_sets_do_not_overlap() {
        for status in SubmissionStatus::ALL {
            assert!(!(status.is_terminal() && status.is_active()), "{status:?}");
        }
        assert!(SubmissionStatus::Declined.is_terminal());
        assert!(SubmissionStatus::Copied.is_terminal());
        assert!(SubmissionStatus::Posted.is_terminal());
        assert!(!SubmissionStatus::Approved.is_terminal());
    }

    #[test]
    fn edit_is_parsed_as_regenerate() {
        assert_eq!(ConsentAction::parse("edit"), Some(ConsentAction::Regenerate));
        assert_eq!(ConsentAction::parse("APPROVE"), Some(ConsentAction::Approve));
        assert_eq!(ConsentAction::parse("publish"), None);
    }

    #[test]
    fn form_submission_accepts_numeric_and_text_ratings() {
        let form: FormSubmission = serde_json::from_value(json!({
            "email": "client@example.com",
            "q1_kickoff": 9,
            "q2_communication": "8.5",
            "testimonial_consent": "Yes"
        }))
        .unwrap();
        assert_eq!(form.q1_kickoff, Some(RawRating::Number(9.0)));
        assert_eq!(form.q2_communication, Some(RawRating::Text("8.5".to_string())));
        assert!(form.q3_project_management.is_none());
        assert_eq!(form.raw_ratings().iter().filter(|r| r.is_some()).count(), 2);
    }

    #[test]
    fn consent_outcome_is_tagged() {
        let value = serde_json::to_value(ConsentOutcome::LimitReached {
            regen_count: 2,
            max_regenerations: 2,
        })
        .unwrap();
        assert_eq!(value["outcome"], "limit_reached");
        assert_eq!(value["regen_count"], 2);
    }

    #[test]
    fn patch_builders_compose() {
        let patch = SubmissionPatch::status(SubmissionStatus::Approved).with_error("x");
        assert_eq!(patch.status, Some(SubmissionStatus::Approved));
        assert_eq!(patch.error, Some(Some("x".to_string())));
        assert_eq!(patch.clear_error().error, Some(None));
    }
}
