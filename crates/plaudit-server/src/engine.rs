use std::sync::Arc;

use chrono::{DateTime, Utc};
use plaudit_config::Config;
use plaudit_contracts::{
    ActionSource, AlertReason, AuditEvent, ClientProfile, ConsentAction, ConsentOutcome,
    FormSubmission, IntakeReport, NewSubmission, NotificationResult, ReminderReport, ReviewView,
    Submission, SubmissionPatch, SubmissionStatus,
};
use plaudit_kernel::{
    age_days, evaluate, internal_alert_email, next_status, parse_rfc3339, ratings_from_form,
    star_rating, token_expired, token_prefix, word_count, PromptInput, QualificationPolicy,
    StatusEvent,
};
use tracing::{error, info, warn};

use crate::audit::AuditLog;
use crate::directory::ClientDirectory;
use crate::drafting::DraftGenerator;
use crate::error::{EngineError, StoreError};
use crate::notify::Notifier;
use crate::store::SubmissionStore;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: QualificationPolicy,
    pub max_regenerations: u32,
    pub token_expiry_days: u32,
    pub reminder_min_age_days: u32,
    pub gbp_review_url: String,
    pub alert_recipients: Vec<String>,
}

impl EngineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let mut policy = QualificationPolicy {
            rating_threshold: cfg.qualification.rating_threshold,
            ..QualificationPolicy::default()
        };
        if let Some(keywords) = &cfg.qualification.negative_keywords {
            policy.negative_keywords = keywords.clone();
        }
        Self {
            policy,
            max_regenerations: cfg.consent.max_regenerations,
            token_expiry_days: cfg.consent.token_expiry_days,
            reminder_min_age_days: cfg.consent.reminder_min_age_days,
            gbp_review_url: cfg.links.gbp_review_url.clone(),
            alert_recipients: cfg.alerts.recipients.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewLookup {
    Found(ReviewView),
    NotFound,
    Expired,
}

/// Intake pipeline, consent state machine and reminder sweep over one shared
/// submission store.
pub struct ReviewEngine {
    store: Arc<dyn SubmissionStore>,
    directory: Arc<dyn ClientDirectory>,
    generator: DraftGenerator,
    notifier: Notifier,
    audit: Arc<AuditLog>,
    settings: EngineSettings,
}

fn prompt_input(sub: &Submission) -> PromptInput<'_> {
    PromptInput {
        client_name: &sub.profile.name,
        company: &sub.profile.company,
        services: &sub.profile.services,
        avg_rating: sub.avg_rating,
        ratings: &sub.ratings,
        open_feedback: sub.open_feedback.as_deref(),
    }
}

/// Result of a write that only lands on the row state it was computed from.
enum Guarded {
    Written(Submission),
    Superseded(SubmissionStatus),
}

fn applied(
    sub: &Submission,
    action: &str,
    status: SubmissionStatus,
    notification: Option<NotificationResult>,
) -> ConsentOutcome {
    ConsentOutcome::Applied {
        submission_id: sub.id,
        action: action.to_string(),
        status,
        notification,
    }
}

impl ReviewEngine {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        directory: Arc<dyn ClientDirectory>,
        generator: DraftGenerator,
        notifier: Notifier,
        audit: Arc<AuditLog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            directory,
            generator,
            notifier,
            audit,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    pub fn drafting_configured(&self) -> bool {
        self.generator.is_configured()
    }

    async fn audit(
        &self,
        event_type: &str,
        submission_id: i64,
        details: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.audit
            .append(AuditEvent::new(event_type, submission_id, details))
            .await
    }

    /// Applies `patch` only if the row still has `current`'s status and
    /// regeneration count. A concurrent action that got there first wins.
    async fn guarded_update(
        &self,
        current: &Submission,
        patch: SubmissionPatch,
    ) -> Result<Guarded, StoreError> {
        match self
            .store
            .update_fields(current.id, &patch.expecting(current))
            .await
        {
            Ok(row) => Ok(Guarded::Written(row)),
            Err(StoreError::Stale { found, .. }) => {
                warn!(
                    submission_id = current.id,
                    read = current.status.as_str(),
                    found = found.as_str(),
                    "submission changed concurrently; transition dropped"
                );
                Ok(Guarded::Superseded(found))
            }
            Err(e) => Err(e),
        }
    }

    async fn record_failure(
        &self,
        sub: &Submission,
        event_type: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.store
            .update_fields(sub.id, &SubmissionPatch::default().with_error(message))
            .await?;
        self.audit(event_type, sub.id, message).await
    }

    /// Records the outcome of a follow-up send; the caller's transition is
    /// already committed either way.
    async fn record_delivery(
        &self,
        sub: &Submission,
        result: &NotificationResult,
        success_event: &str,
    ) -> Result<(), StoreError> {
        if result.success {
            self.audit(
                success_event,
                sub.id,
                format!("delivered via {}", result.method.as_str()),
            )
            .await
        } else {
            let message = result.error.as_deref().unwrap_or("delivery failed");
            self.record_failure(sub, "DELIVERY_FAILED", message).await
        }
    }

    pub async fn process_submission(
        &self,
        form: FormSubmission,
    ) -> Result<IntakeReport, EngineError> {
        self.process_submission_at(form, Utc::now()).await
    }

    pub async fn process_submission_at(
        &self,
        form: FormSubmission,
        now: DateTime<Utc>,
    ) -> Result<IntakeReport, EngineError> {
        let email = form.email.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(EngineError::Invalid("email is required".to_string()));
        }

        if self.store.check_duplicate_active(&email).await? {
            info!(%email, "duplicate submission suppressed");
            self.audit
                .append(AuditEvent {
                    ts: now,
                    event_type: "DUPLICATE".to_string(),
                    reference: email.clone(),
                    details: "active submission already exists".to_string(),
                })
                .await?;
            return Ok(IntakeReport {
                duplicate: true,
                ..IntakeReport::default()
            });
        }

        let profile = match self.directory.lookup(&email).await? {
            Some(profile) => profile,
            None => {
                warn!(%email, "client not found in directory; using default profile");
                ClientProfile::unknown(&email)
            }
        };
        let ratings = ratings_from_form(&form);
        let q = evaluate(
            &self.settings.policy,
            &ratings,
            &form.testimonial_consent,
            form.open_feedback.as_deref(),
        );
        let submitted_at = form
            .submitted_at
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(now);

        let id = self
            .store
            .insert(NewSubmission {
                email: email.clone(),
                submitted_at,
                ratings,
                consent_raw: form.testimonial_consent.clone(),
                open_feedback: form.open_feedback.clone(),
                avg_rating: q.avg_rating,
                qualified: q.qualified,
                profile: profile.clone(),
            })
            .await?;
        self.audit(
            "FORM_SUBMIT",
            id,
            format!(
                "client={} avg={:.2} consent={} found={}",
                profile.name, q.avg_rating, q.consent_ok, profile.found
            ),
        )
        .await?;
        info!(submission_id = id, avg = q.avg_rating, qualified = q.qualified, "submission stored");

        if let Some(reason) = q.alert_reason() {
            return self
                .raise_alert(id, &profile, q.avg_rating, form.open_feedback.as_deref(), reason)
                .await;
        }

        self.audit("QUALIFIED", id, format!("avg={:.2}", q.avg_rating))
            .await?;
        let sub = self
            .store
            .get(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        let draft = match self.generator.generate(&prompt_input(&sub)).await {
            Ok(draft) => draft,
            Err(e) => {
                error!(submission_id = id, error = %e, "draft generation failed");
                self.record_failure(&sub, "ERROR", &format!("draft generation failed: {e}"))
                    .await?;
                return Err(EngineError::Generation {
                    submission_id: id,
                    source: e,
                });
            }
        };

        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .update_fields(
                id,
                &SubmissionPatch {
                    token: Some(token.clone()),
                    draft_text: Some(draft.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.audit(
            "AI_DRAFT_GENERATED",
            id,
            format!("{} words, token {}", word_count(&draft), token_prefix(&token)),
        )
        .await?;

        let allow_regenerate = self.settings.max_regenerations > 0;
        let delivery = self
            .notifier
            .send_consent_request(&profile, &draft, &token, allow_regenerate)
            .await;

        let status = if delivery.success {
            let next = next_status(SubmissionStatus::Pending, StatusEvent::Delivered)
                .unwrap_or(SubmissionStatus::Sent);
            self.store
                .update_fields(
                    id,
                    &SubmissionPatch {
                        status: Some(next),
                        delivery_method: Some(delivery.method),
                        sent_at: Some(now),
                        ..Default::default()
                    }
                    .clear_error(),
                )
                .await?;
            self.audit(
                "NOTIFICATION_SENT",
                id,
                format!("consent request via {}", delivery.method.as_str()),
            )
            .await?;
            next
        } else {
            let message = delivery
                .error
                .clone()
                .unwrap_or_else(|| "delivery failed".to_string());
            self.store
                .update_fields(
                    id,
                    &SubmissionPatch {
                        delivery_method: Some(delivery.method),
                        ..Default::default()
                    }
                    .with_error(message.clone()),
                )
                .await?;
            self.audit("DELIVERY_FAILED", id, message).await?;
            SubmissionStatus::Pending
        };

        Ok(IntakeReport {
            submission_id: Some(id),
            duplicate: false,
            qualified: true,
            avg_rating: q.avg_rating,
            status: Some(status),
            alert_reason: None,
            delivery: Some(delivery),
            token: Some(token),
        })
    }

    async fn raise_alert(
        &self,
        id: i64,
        profile: &ClientProfile,
        avg_rating: f64,
        open_feedback: Option<&str>,
        reason: AlertReason,
    ) -> Result<IntakeReport, EngineError> {
        let next = next_status(SubmissionStatus::Pending, StatusEvent::Alerted)
            .unwrap_or(SubmissionStatus::AlertSent);
        self.store
            .update_fields(
                id,
                &SubmissionPatch {
                    status: Some(next),
                    alert_reason: Some(reason),
                    ..Default::default()
                },
            )
            .await?;

        let content = internal_alert_email(
            &profile.name,
            &profile.company,
            avg_rating,
            open_feedback,
            reason,
        );
        let outcome = self
            .notifier
            .send_internal_alert(&self.settings.alert_recipients, &content)
            .await;
        if outcome.failed > 0 {
            self.store
                .update_fields(
                    id,
                    &SubmissionPatch::default()
                        .with_error(format!("internal alert failed for {} recipients", outcome.failed)),
                )
                .await?;
        }
        self.audit(
            reason.audit_event(),
            id,
            format!(
                "avg={avg_rating:.2} alerts_sent={} alerts_failed={}",
                outcome.sent, outcome.failed
            ),
        )
        .await?;
        info!(submission_id = id, reason = reason.as_str(), "submission routed to internal alert");

        Ok(IntakeReport {
            submission_id: Some(id),
            duplicate: false,
            qualified: false,
            avg_rating,
            status: Some(next),
            alert_reason: Some(reason),
            delivery: None,
            token: None,
        })
    }

    pub async fn apply_consent_action(
        &self,
        token: &str,
        action: ConsentAction,
        source: ActionSource,
    ) -> Result<ConsentOutcome, EngineError> {
        self.apply_consent_action_at(token, action, source, Utc::now())
            .await
    }

    /// The single entry point for client decisions, whichever channel they
    /// arrive on.
    pub async fn apply_consent_action_at(
        &self,
        token: &str,
        action: ConsentAction,
        source: ActionSource,
        now: DateTime<Utc>,
    ) -> Result<ConsentOutcome, EngineError> {
        let prefix = token_prefix(token);
        let Some(sub) = self.store.find_by_token(token).await? else {
            warn!(token = prefix, action = action.as_str(), "unknown token");
            return Ok(ConsentOutcome::NotFound);
        };

        if sub.status.is_terminal() {
            info!(token = prefix, status = sub.status.as_str(), "action on terminal submission ignored");
            return Ok(ConsentOutcome::AlreadyActioned { status: sub.status });
        }
        if token_expired(sub.sent_at, now, self.settings.token_expiry_days) {
            info!(token = prefix, action = action.as_str(), "token expired");
            return Ok(ConsentOutcome::Expired);
        }
        if sub.status == SubmissionStatus::Pending {
            warn!(token = prefix, "action on undelivered submission");
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        }
        if sub.status == SubmissionStatus::Approved && action != ConsentAction::Decline {
            return Ok(ConsentOutcome::AlreadyActioned { status: sub.status });
        }

        info!(
            submission_id = sub.id,
            token = prefix,
            action = action.as_str(),
            source = source.as_str(),
            "applying consent action"
        );
        match action {
            ConsentAction::Approve => self.approve(sub, token, source).await,
            ConsentAction::Regenerate => self.regenerate(sub, token, source).await,
            ConsentAction::Decline => self.decline(sub, source).await,
        }
    }

    async fn approve(
        &self,
        sub: Submission,
        token: &str,
        source: ActionSource,
    ) -> Result<ConsentOutcome, EngineError> {
        let Some(next) = next_status(sub.status, StatusEvent::Approve) else {
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        };
        let updated = match self
            .guarded_update(&sub, SubmissionPatch::status(next).clear_error())
            .await?
        {
            Guarded::Written(row) => row,
            Guarded::Superseded(found) => {
                return Ok(ConsentOutcome::AlreadyActioned { status: found });
            }
        };
        self.audit("APPROVED", sub.id, format!("approved via {}", source.as_str()))
            .await?;

        let notification = self
            .notifier
            .send_approval_notice(&updated.profile, token)
            .await;
        self.record_delivery(&updated, &notification, "APPROVAL_NOTICE_SENT")
            .await?;
        Ok(applied(&updated, "approve", next, Some(notification)))
    }

    async fn regenerate(
        &self,
        sub: Submission,
        token: &str,
        source: ActionSource,
    ) -> Result<ConsentOutcome, EngineError> {
        let max = self.settings.max_regenerations;
        if sub.regen_count >= max {
            warn!(submission_id = sub.id, regen_count = sub.regen_count, "regeneration limit reached");
            self.audit(
                "REGEN_LIMIT_REACHED",
                sub.id,
                format!("{}/{} via {}", sub.regen_count, max, source.as_str()),
            )
            .await?;
            return Ok(ConsentOutcome::LimitReached {
                regen_count: sub.regen_count,
                max_regenerations: max,
            });
        }

        let draft = match self.generator.generate(&prompt_input(&sub)).await {
            Ok(draft) => draft,
            Err(e) => {
                error!(submission_id = sub.id, error = %e, "regeneration failed");
                let mut patch = SubmissionPatch::default()
                    .with_error(format!("draft regeneration failed: {e}"));
                patch.status = next_status(sub.status, StatusEvent::RegenerationFailed);
                if let Guarded::Superseded(found) = self.guarded_update(&sub, patch).await? {
                    return Ok(ConsentOutcome::AlreadyActioned { status: found });
                }
                self.audit("ERROR", sub.id, format!("draft regeneration failed: {e}"))
                    .await?;
                return Err(EngineError::Generation {
                    submission_id: sub.id,
                    source: e,
                });
            }
        };

        let Some(next) = next_status(sub.status, StatusEvent::Regenerate) else {
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        };
        let count = sub.regen_count + 1;
        let patch = SubmissionPatch {
            status: Some(next),
            draft_text: Some(draft.clone()),
            regen_count: Some(count),
            ..Default::default()
        }
        .clear_error();
        let updated = match self.guarded_update(&sub, patch).await? {
            Guarded::Written(row) => row,
            Guarded::Superseded(found) => {
                return Ok(ConsentOutcome::AlreadyActioned { status: found });
            }
        };
        self.audit(
            "REGENERATED",
            sub.id,
            format!("{count}/{max} via {}", source.as_str()),
        )
        .await?;

        let notification = self
            .notifier
            .send_consent_request(&updated.profile, &draft, token, count < max)
            .await;
        self.record_delivery(&updated, &notification, "NOTIFICATION_SENT")
            .await?;
        Ok(applied(&updated, "regenerate", next, Some(notification)))
    }

    async fn decline(
        &self,
        sub: Submission,
        source: ActionSource,
    ) -> Result<ConsentOutcome, EngineError> {
        let Some(next) = next_status(sub.status, StatusEvent::Decline) else {
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        };
        let updated = match self
            .guarded_update(&sub, SubmissionPatch::status(next))
            .await?
        {
            Guarded::Written(row) => row,
            Guarded::Superseded(found) => {
                return Ok(ConsentOutcome::AlreadyActioned { status: found });
            }
        };
        self.audit("DECLINED", sub.id, format!("declined via {}", source.as_str()))
            .await?;

        let notification = self.notifier.send_decline_ack(&updated.profile).await;
        self.record_delivery(&updated, &notification, "DECLINE_ACK_SENT")
            .await?;
        Ok(applied(&updated, "decline", next, Some(notification)))
    }

    pub async fn mark_copied(&self, token: &str) -> Result<ConsentOutcome, EngineError> {
        self.mark_copied_at(token, Utc::now()).await
    }

    pub async fn mark_copied_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ConsentOutcome, EngineError> {
        let Some(sub) = self.store.find_by_token(token).await? else {
            return Ok(ConsentOutcome::NotFound);
        };
        if matches!(sub.status, SubmissionStatus::Copied | SubmissionStatus::Posted) {
            return Ok(ConsentOutcome::AlreadyActioned { status: sub.status });
        }
        if token_expired(sub.sent_at, now, self.settings.token_expiry_days) {
            return Ok(ConsentOutcome::Expired);
        }
        let Some(next) = next_status(sub.status, StatusEvent::Copy) else {
            info!(submission_id = sub.id, status = sub.status.as_str(), "copy ignored outside APPROVED");
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        };
        let patch = SubmissionPatch {
            status: Some(next),
            copied_at: Some(now),
            ..Default::default()
        };
        let updated = match self.guarded_update(&sub, patch).await? {
            Guarded::Written(row) => row,
            Guarded::Superseded(found) => {
                return Ok(ConsentOutcome::AlreadyActioned { status: found });
            }
        };
        self.audit("COPIED", sub.id, "draft copied from landing page")
            .await?;
        Ok(applied(&updated, "copied", next, None))
    }

    pub async fn mark_posted(&self, token: &str) -> Result<ConsentOutcome, EngineError> {
        let Some(sub) = self.store.find_by_token(token).await? else {
            return Ok(ConsentOutcome::NotFound);
        };
        if sub.status == SubmissionStatus::Posted {
            return Ok(ConsentOutcome::AlreadyActioned { status: sub.status });
        }
        let Some(next) = next_status(sub.status, StatusEvent::Post) else {
            return Ok(ConsentOutcome::NotActionable { status: sub.status });
        };
        let patch = SubmissionPatch {
            status: Some(next),
            posted_at: Some(Utc::now()),
            ..Default::default()
        };
        let updated = match self.guarded_update(&sub, patch).await? {
            Guarded::Written(row) => row,
            Guarded::Superseded(found) => {
                return Ok(ConsentOutcome::AlreadyActioned { status: found });
            }
        };
        self.audit("POSTED", sub.id, "review confirmed as posted")
            .await?;
        Ok(applied(&updated, "posted", next, None))
    }

    pub async fn review_view(&self, token: &str) -> Result<ReviewLookup, EngineError> {
        self.review_view_at(token, Utc::now()).await
    }

    pub async fn review_view_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ReviewLookup, EngineError> {
        let Some(sub) = self.store.find_by_token(token).await? else {
            return Ok(ReviewLookup::NotFound);
        };
        if token_expired(sub.sent_at, now, self.settings.token_expiry_days) {
            return Ok(ReviewLookup::Expired);
        }
        Ok(ReviewLookup::Found(ReviewView {
            draft_text: sub.draft_text.clone().unwrap_or_default(),
            client_name: sub.profile.name.clone(),
            business_name: if sub.profile.company.trim().is_empty() {
                ClientProfile::DEFAULT_BUSINESS_NAME.to_string()
            } else {
                sub.profile.company.clone()
            },
            rating: star_rating(sub.avg_rating),
            gbp_review_url: self.settings.gbp_review_url.clone(),
            status: sub.status,
            regeneration_count: sub.regen_count,
            max_regenerations: self.settings.max_regenerations,
        }))
    }

    /// Nudges clients who have not finished: SENT rows get the consent request
    /// again, APPROVED rows get the landing-page link.
    pub async fn send_reminders(&self, now: DateTime<Utc>) -> Result<ReminderReport, EngineError> {
        let rows = self
            .store
            .list_by_status(&[SubmissionStatus::Sent, SubmissionStatus::Approved])
            .await?;
        let min_age = i64::from(self.settings.reminder_min_age_days);
        let mut report = ReminderReport::default();

        for sub in rows {
            let (Some(token), Some(sent_at)) = (sub.token.clone(), sub.sent_at) else {
                report.skipped += 1;
                continue;
            };
            if token_expired(Some(sent_at), now, self.settings.token_expiry_days) {
                report.expired += 1;
                continue;
            }
            let recently_reminded = sub
                .reminded_at
                .map(|r| age_days(r, now) < min_age)
                .unwrap_or(false);
            if age_days(sent_at, now) < min_age || recently_reminded {
                report.skipped += 1;
                continue;
            }

            let result = match sub.status {
                SubmissionStatus::Approved => self.notifier.send_reminder(&sub.profile, &token).await,
                _ => {
                    let draft = sub.draft_text.as_deref().unwrap_or_default();
                    let allow = sub.regen_count < self.settings.max_regenerations;
                    self.notifier
                        .send_consent_request(&sub.profile, draft, &token, allow)
                        .await
                }
            };
            if result.success {
                self.store
                    .update_fields(
                        sub.id,
                        &SubmissionPatch {
                            reminded_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.audit(
                    "REMINDER_SENT",
                    sub.id,
                    format!("{} via {}", sub.status.as_str(), result.method.as_str()),
                )
                .await?;
                report.reminded += 1;
            } else {
                let message = result.error.as_deref().unwrap_or("delivery failed");
                self.record_failure(&sub, "DELIVERY_FAILED", message).await?;
                report.failed += 1;
            }
        }

        info!(
            reminded = report.reminded,
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            "reminder sweep finished"
        );
        Ok(report)
    }
}
