use std::sync::Arc;

use plaudit_config::Config;
use plaudit_contracts::{ClientProfile, DeliveryMethod, NotificationResult};
use plaudit_kernel::{EmailContent, MessageContext, OutboundMessage};
use tracing::{error, info, warn};

use crate::channels::{ChatTransport, EmailTransport};

/// Owned copy of everything the payload builders read from config.
#[derive(Debug, Clone)]
pub struct MessageSettings {
    pub sender_name: String,
    pub app_base_url: String,
    pub frontend_url: String,
    pub consent_template: Option<String>,
    pub approved_template: Option<String>,
    pub template_language: String,
}

impl MessageSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        Self {
            sender_name: cfg.email.from_name.clone(),
            app_base_url: cfg.links.app_base_url.clone(),
            frontend_url: cfg.links.frontend_url.clone(),
            consent_template: non_empty(&cfg.whatsapp.consent_template),
            approved_template: non_empty(&cfg.whatsapp.approved_template),
            template_language: cfg.whatsapp.template_language.clone(),
        }
    }

    pub fn context(&self) -> MessageContext<'_> {
        MessageContext {
            sender_name: &self.sender_name,
            app_base_url: &self.app_base_url,
            frontend_url: &self.frontend_url,
            consent_template: self.consent_template.as_deref(),
            approved_template: self.approved_template.as_deref(),
            template_language: &self.template_language,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertDelivery {
    pub sent: usize,
    pub failed: usize,
}

/// Chat first, e-mail as fallback, for every client-facing message.
pub struct Notifier {
    chat: Arc<dyn ChatTransport>,
    email: Arc<dyn EmailTransport>,
    settings: MessageSettings,
}

fn contact(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Notifier {
    pub fn new(
        chat: Arc<dyn ChatTransport>,
        email: Arc<dyn EmailTransport>,
        settings: MessageSettings,
    ) -> Self {
        Self {
            chat,
            email,
            settings,
        }
    }

    pub fn settings(&self) -> &MessageSettings {
        &self.settings
    }

    pub fn chat_configured(&self) -> bool {
        self.chat.is_configured()
    }

    pub fn email_configured(&self) -> bool {
        self.email.is_configured()
    }

    pub async fn deliver(
        &self,
        profile: &ClientProfile,
        message: OutboundMessage<'_>,
    ) -> NotificationResult {
        let ctx = self.settings.context();
        let kind = message.kind();
        let mut failures = Vec::new();

        if let Some(handle) = contact(profile.whatsapp.as_deref()) {
            match self.chat.send(&message.chat_payload(&ctx, handle)).await {
                Ok(id) => {
                    info!(kind, client = %profile.name, "delivered via whatsapp");
                    let id = (!id.is_empty()).then_some(id);
                    return NotificationResult::delivered(DeliveryMethod::WhatsApp, id);
                }
                Err(e) => {
                    warn!(kind, client = %profile.name, error = %e, "whatsapp delivery failed; falling back to email");
                    failures.push(format!("whatsapp: {e}"));
                }
            }
        }

        if let Some(address) = contact(profile.business_email.as_deref()) {
            match self.email.send(address, &message.email(&ctx)).await {
                Ok(id) => {
                    info!(kind, client = %profile.name, "delivered via email");
                    return NotificationResult::delivered(DeliveryMethod::Email, id);
                }
                Err(e) => {
                    warn!(kind, client = %profile.name, error = %e, "email delivery failed");
                    failures.push(format!("email: {e}"));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no contact method available".to_string()
        } else {
            failures.join("; ")
        };
        error!(kind, client = %profile.name, %reason, "no channel delivered the message");
        NotificationResult::failed(reason)
    }

    pub async fn send_consent_request(
        &self,
        profile: &ClientProfile,
        draft_text: &str,
        token: &str,
        allow_regenerate: bool,
    ) -> NotificationResult {
        self.deliver(
            profile,
            OutboundMessage::ConsentRequest {
                client_name: &profile.name,
                draft_text,
                token,
                allow_regenerate,
            },
        )
        .await
    }

    pub async fn send_approval_notice(
        &self,
        profile: &ClientProfile,
        token: &str,
    ) -> NotificationResult {
        self.deliver(
            profile,
            OutboundMessage::ApprovalNotice {
                client_name: &profile.name,
                token,
            },
        )
        .await
    }

    pub async fn send_reminder(&self, profile: &ClientProfile, token: &str) -> NotificationResult {
        self.deliver(
            profile,
            OutboundMessage::Reminder {
                client_name: &profile.name,
                token,
            },
        )
        .await
    }

    pub async fn send_decline_ack(&self, profile: &ClientProfile) -> NotificationResult {
        self.deliver(
            profile,
            OutboundMessage::DeclineAck {
                client_name: &profile.name,
            },
        )
        .await
    }

    /// Internal alerts go by e-mail only, to every recipient.
    pub async fn send_internal_alert(
        &self,
        recipients: &[String],
        content: &EmailContent,
    ) -> AlertDelivery {
        let mut outcome = AlertDelivery::default();
        if recipients.is_empty() {
            warn!("no alert recipients configured; internal alert skipped");
            return outcome;
        }
        for recipient in recipients {
            match self.email.send(recipient, content).await {
                Ok(_) => outcome.sent += 1,
                Err(e) => {
                    error!(%recipient, error = %e, "internal alert failed");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}
