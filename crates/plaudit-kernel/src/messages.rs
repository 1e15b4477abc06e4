use plaudit_contracts::{AlertReason, ConsentAction};
use serde_json::{json, Value};

/// Chat bodies are capped well below the provider's 1024-char parameter limit.
pub const CHAT_DRAFT_LIMIT: usize = 800;

/// Everything the payload builders need besides the message itself.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub sender_name: &'a str,
    pub app_base_url: &'a str,
    pub frontend_url: &'a str,
    pub consent_template: Option<&'a str>,
    pub approved_template: Option<&'a str>,
    pub template_language: &'a str,
}

impl MessageContext<'_> {
    pub fn landing_url(&self, token: &str) -> String {
        format!("{}/review/{token}", self.frontend_url.trim_end_matches('/'))
    }

    pub fn action_url(&self, token: &str, action: ConsentAction) -> String {
        format!(
            "{}/api/email-action/{token}/{}",
            self.app_base_url.trim_end_matches('/'),
            action.as_str()
        )
    }

    /// Page the e-mail action links redirect to once an action is handled.
    pub fn confirmation_url(&self, kind: &str) -> String {
        format!(
            "{}/action-confirmed?type={kind}",
            self.frontend_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage<'a> {
    ConsentRequest {
        client_name: &'a str,
        draft_text: &'a str,
        token: &'a str,
        allow_regenerate: bool,
    },
    ApprovalNotice {
        client_name: &'a str,
        token: &'a str,
    },
    Reminder {
        client_name: &'a str,
        token: &'a str,
    },
    DeclineAck {
        client_name: &'a str,
    },
}

fn button_id(action: ConsentAction, token: &str) -> String {
    format!("{}_{token}", action.as_str())
}

fn envelope(to: &str, kind: &str, body_key: &str, body: Value) -> Value {
    let mut payload = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to.trim_start_matches('+'),
        "type": kind,
    });
    payload[body_key] = body;
    payload
}

fn cta(header: &str, body: String, footer: Option<String>, label: &str, url: String) -> Value {
    let mut interactive = json!({
        "type": "cta_url",
        "header": { "type": "text", "text": header },
        "body": { "text": body },
        "action": {
            "name": "cta_url",
            "parameters": { "display_text": label, "url": url }
        }
    });
    if let Some(footer) = footer {
        interactive["footer"] = json!({ "text": footer });
    }
    interactive
}

impl OutboundMessage<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::ConsentRequest { .. } => "consent_request",
            OutboundMessage::ApprovalNotice { .. } => "approval_notice",
            OutboundMessage::Reminder { .. } => "reminder",
            OutboundMessage::DeclineAck { .. } => "decline_ack",
        }
    }

    /// Cloud API message body addressed to an E.164 number.
    pub fn chat_payload(&self, ctx: &MessageContext<'_>, to: &str) -> Value {
        let footer = format!("{} - Thank you for your partnership", ctx.sender_name);
        match *self {
            OutboundMessage::ConsentRequest {
                client_name,
                draft_text,
                token,
                allow_regenerate,
            } => {
                let draft = truncate_chars(draft_text, CHAT_DRAFT_LIMIT);
                if let Some(template) = ctx.consent_template {
                    let mut components = vec![json!({
                        "type": "body",
                        "parameters": [
                            { "type": "text", "text": client_name },
                            { "type": "text", "text": draft }
                        ]
                    })];
                    let actions = [
                        ConsentAction::Approve,
                        ConsentAction::Regenerate,
                        ConsentAction::Decline,
                    ];
                    // Slot indexes are fixed by the template.
                    for (index, action) in actions.into_iter().enumerate() {
                        if action == ConsentAction::Regenerate && !allow_regenerate {
                            continue;
                        }
                        components.push(json!({
                            "type": "button",
                            "sub_type": "quick_reply",
                            "index": index.to_string(),
                            "parameters": [
                                { "type": "payload", "payload": button_id(action, token) }
                            ]
                        }));
                    }
                    return envelope(
                        to,
                        "template",
                        "template",
                        json!({
                            "name": template,
                            "language": { "code": ctx.template_language },
                            "components": components
                        }),
                    );
                }

                let mut buttons = vec![json!({
                    "type": "reply",
                    "reply": { "id": button_id(ConsentAction::Approve, token), "title": "Approve" }
                })];
                if allow_regenerate {
                    buttons.push(json!({
                        "type": "reply",
                        "reply": { "id": button_id(ConsentAction::Regenerate, token), "title": "Regenerate" }
                    }));
                }
                buttons.push(json!({
                    "type": "reply",
                    "reply": { "id": button_id(ConsentAction::Decline, token), "title": "Decline" }
                }));
                envelope(
                    to,
                    "interactive",
                    "interactive",
                    json!({
                        "type": "button",
                        "header": { "type": "text", "text": "Your Review Draft is Ready!" },
                        "body": {
                            "text": format!(
                                "Hi {client_name},\n\nThank you for your feedback on our recent project! \
                                 Based on your responses, we've drafted a review for you:\n\n\"{draft}\"\n\n\
                                 Would you like to post this review on Google?"
                            )
                        },
                        "footer": { "text": footer },
                        "action": { "buttons": buttons }
                    }),
                )
            }
            OutboundMessage::ApprovalNotice { client_name, token } => {
                if let Some(template) = ctx.approved_template {
                    return envelope(
                        to,
                        "template",
                        "template",
                        json!({
                            "name": template,
                            "language": { "code": ctx.template_language },
                            "components": [
                                {
                                    "type": "body",
                                    "parameters": [{ "type": "text", "text": client_name }]
                                },
                                {
                                    "type": "button",
                                    "sub_type": "url",
                                    "index": "0",
                                    "parameters": [{ "type": "text", "text": token }]
                                }
                            ]
                        }),
                    );
                }
                envelope(
                    to,
                    "interactive",
                    "interactive",
                    cta(
                        "Your Review is Approved!",
                        format!(
                            "Great, {client_name}! Your review is ready.\n\n\
                             Tap below to copy and post it. It takes about 10 seconds."
                        ),
                        Some(footer),
                        "Copy & Post Review",
                        ctx.landing_url(token),
                    ),
                )
            }
            OutboundMessage::Reminder { client_name, token } => envelope(
                to,
                "interactive",
                "interactive",
                cta(
                    "Quick Reminder",
                    format!(
                        "Hi {client_name},\n\nJust a friendly reminder that your review is ready to post.\n\n\
                         It only takes 30 seconds and helps other businesses find the right partner."
                    ),
                    None,
                    "Post Now",
                    ctx.landing_url(token),
                ),
            ),
            OutboundMessage::DeclineAck { client_name } => envelope(
                to,
                "text",
                "text",
                json!({
                    "body": format!(
                        "No problem, {client_name}. We won't post anything on your behalf. \
                         Thank you for taking the time to share your feedback!"
                    )
                }),
            ),
        }
    }

    pub fn email(&self, ctx: &MessageContext<'_>) -> EmailContent {
        let sender = escape_html(ctx.sender_name);
        match *self {
            OutboundMessage::ConsentRequest {
                client_name,
                draft_text,
                token,
                allow_regenerate,
            } => {
                let landing = ctx.landing_url(token);
                let approve = ctx.action_url(token, ConsentAction::Approve);
                let regenerate = ctx.action_url(token, ConsentAction::Regenerate);
                let decline = ctx.action_url(token, ConsentAction::Decline);

                let mut links = vec![link_button(&approve, "Approve & Post", "#1E8E3E")];
                if allow_regenerate {
                    links.push(link_button(&regenerate, "Write a New Draft", "#4285F4"));
                }
                links.push(link_button(&decline, "No Thanks", "#6C757D"));

                let html = layout(
                    &sender,
                    &format!(
                        "<h2>Hi {name},</h2>\
                         <p>Thank you for your feedback on our recent project! Based on your \
                         responses, we've drafted a review for you:</p>\
                         <blockquote style=\"border-left:4px solid #1F4E79;padding:12px 20px;\
                         font-style:italic;\">\"{draft}\"</blockquote>\
                         <p>Would you like to post this review on Google?</p>\
                         <p style=\"text-align:center;\">{buttons}</p>\
                         <p style=\"font-size:12px;color:#999;\">You can also open the \
                         <a href=\"{landing}\">review page</a> directly.</p>",
                        name = escape_html(client_name),
                        draft = escape_html(draft_text),
                        buttons = links.join(" "),
                        landing = escape_html(&landing),
                    ),
                );

                let mut text = format!(
                    "Hi {client_name},\n\nYour review draft is ready:\n\n\"{draft_text}\"\n\n\
                     Approve: {approve}\n"
                );
                if allow_regenerate {
                    text.push_str(&format!("New draft: {regenerate}\n"));
                }
                text.push_str(&format!(
                    "Decline: {decline}\n\nReview page: {landing}\n\n{} Team",
                    ctx.sender_name
                ));

                EmailContent {
                    subject: format!(
                        "Your Review Draft for {} - Quick Action Needed",
                        ctx.sender_name
                    ),
                    html,
                    text,
                }
            }
            OutboundMessage::ApprovalNotice { client_name, token } => {
                let landing = ctx.landing_url(token);
                EmailContent {
                    subject: "Your approved review is ready to post".to_string(),
                    html: layout(
                        &sender,
                        &format!(
                            "<h2>Great, {name}!</h2>\
                             <p>Your approved review is ready to post. It takes about 10 seconds.</p>\
                             <p style=\"text-align:center;\">{button}</p>",
                            name = escape_html(client_name),
                            button = link_button(&landing, "Copy & Post Review", "#4285F4"),
                        ),
                    ),
                    text: format!(
                        "Great, {client_name}!\n\nYour approved review is ready to post: {landing}\n\n{} Team",
                        ctx.sender_name
                    ),
                }
            }
            OutboundMessage::Reminder { client_name, token } => {
                let landing = ctx.landing_url(token);
                EmailContent {
                    subject: "Reminder: your review is ready to post".to_string(),
                    html: layout(
                        &sender,
                        &format!(
                            "<h2>Hi {name},</h2>\
                             <p>Just a friendly reminder that your review is ready to post. \
                             Your feedback helps other businesses find the right partner.</p>\
                             <p style=\"text-align:center;\">{button}</p>",
                            name = escape_html(client_name),
                            button = link_button(&landing, "Post Now", "#4285F4"),
                        ),
                    ),
                    text: format!(
                        "Hi {client_name},\n\nJust a friendly reminder that your review is ready to post: {landing}\n\n{} Team",
                        ctx.sender_name
                    ),
                }
            }
            OutboundMessage::DeclineAck { client_name } => EmailContent {
                subject: "Thank you for your feedback".to_string(),
                html: layout(
                    &sender,
                    &format!(
                        "<h2>No problem, {name}.</h2>\
                         <p>We won't post anything on your behalf. Thank you for taking the \
                         time to share your feedback!</p>",
                        name = escape_html(client_name),
                    ),
                ),
                text: format!(
                    "No problem, {client_name}.\n\nWe won't post anything on your behalf. \
                     Thank you for taking the time to share your feedback!\n\n{} Team",
                    ctx.sender_name
                ),
            },
        }
    }
}

fn link_button(href: &str, label: &str, colour: &str) -> String {
    format!(
        "<a href=\"{}\" style=\"display:inline-block;background:{colour};color:#fff;\
         padding:12px 24px;margin:4px;text-decoration:none;border-radius:8px;\
         font-weight:600;\">{label}</a>",
        escape_html(href)
    )
}

fn layout(sender_html: &str, inner: &str) -> String {
    format!(
        "<div style=\"font-family:'Segoe UI',Arial,sans-serif;max-width:600px;margin:0 auto;\">\
         <div style=\"background:#1F4E79;padding:24px;border-radius:12px 12px 0 0;text-align:center;\">\
         <h1 style=\"color:#fff;margin:0;font-size:22px;\">{sender_html}</h1></div>\
         <div style=\"background:#fff;padding:24px;border:1px solid #e9ecef;\">{inner}</div>\
         <div style=\"padding:16px;text-align:center;font-size:12px;color:#999;\">\
         {sender_html} - Thank you for your partnership</div></div>"
    )
}

/// Alert sent to the account team for submissions that did not qualify.
pub fn internal_alert_email(
    client_name: &str,
    company: &str,
    avg_rating: f64,
    open_feedback: Option<&str>,
    reason: AlertReason,
) -> EmailContent {
    let headline = match reason {
        AlertReason::LowRating => "Low Feedback Score",
        AlertReason::ConsentDeclined => "Testimonial Consent Declined",
        AlertReason::NegativeSentiment => "Negative Feedback Detected",
    };
    let company = if company.trim().is_empty() {
        "N/A"
    } else {
        company.trim()
    };
    let feedback = open_feedback.map(str::trim).filter(|f| !f.is_empty());

    let mut html = format!(
        "<div style=\"font-family:'Segoe UI',Arial,sans-serif;max-width:600px;margin:0 auto;\">\
         <div style=\"background:#DC3545;padding:20px;border-radius:12px 12px 0 0;\">\
         <h2 style=\"color:#fff;margin:0;\">{headline}</h2></div>\
         <div style=\"background:#fff;padding:24px;border:1px solid #e9ecef;\">\
         <p><strong>Client:</strong> {name}</p>\
         <p><strong>Company:</strong> {company}</p>\
         <p><strong>Average Rating:</strong> {avg_rating:.1} / 10</p>\
         <p><strong>Reason:</strong> {reason}</p>",
        name = escape_html(client_name),
        company = escape_html(company),
        reason = reason.as_str(),
    );
    if let Some(feedback) = feedback {
        html.push_str(&format!(
            "<hr><p><strong>Client Feedback:</strong></p><p>{}</p>",
            escape_html(feedback)
        ));
    }
    html.push_str(
        "<p style=\"background:#FFF3CD;padding:12px;border-radius:8px;\">\
         <strong>Recommended Action:</strong> Reach out to this client to understand \
         their concerns.</p></div></div>",
    );

    let mut text = format!(
        "{headline}\n\nClient: {client_name}\nCompany: {company}\nAverage Rating: {avg_rating:.1} / 10\nReason: {}\n",
        reason.as_str()
    );
    if let Some(feedback) = feedback {
        text.push_str(&format!("\nClient Feedback:\n{feedback}\n"));
    }

    EmailContent {
        subject: format!("[ACTION REQUIRED] {headline} from {client_name}"),
        html,
        text,
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Normalizes a directory phone number to E.164, prefixing `default_country_code`
/// when no `+` is present.
pub fn normalize_phone(raw: &str, default_country_code: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.starts_with('+') {
        return Some(cleaned);
    }
    let code = default_country_code.trim();
    if code.starts_with('+') {
        Some(format!("{code}{cleaned}"))
    } else {
        Some(format!("+{code}{cleaned}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(consent: Option<&'a str>, approved: Option<&'a str>) -> MessageContext<'a> {
        MessageContext {
            sender_name: "Acme Studio",
            app_base_url: "https://api.example.com/",
            frontend_url: "https://reviews.example.com",
            consent_template: consent,
            approved_template: approved,
            template_language: "en",
        }
    }

    #[test]
    fn links_are_built_from_bases() {
        let c = ctx(None, None);
        assert_eq!(c.landing_url("tok"), "https://reviews.example.com/review/tok");
        assert_eq!(
            c.action_url("tok", ConsentAction::Regenerate),
            "https://api.example.com/api/email-action/tok/regenerate"
        );
        assert_eq!(
            c.confirmation_url("expired"),
            "https://reviews.example.com/action-confirmed?type=expired"
        );
    }

    #[test]
    fn consent_template_carries_three_quick_replies() {
        let msg = OutboundMessage::ConsentRequest {
            client_name: "Asha",
            draft_text: "Great work",
            token: "tok-1",
            allow_regenerate: true,
        };
        let payload = msg.chat_payload(&ctx(Some("review_consent"), None), "+919876543210");
        assert_eq!(payload["to"], "919876543210");
        assert_eq!(payload["type"], "template");
        assert_eq!(payload["template"]["name"], "review_consent");
        let components = payload["template"]["components"].as_array().unwrap();
        assert_eq!(components.len(), 4);
        assert_eq!(components[0]["parameters"][1]["text"], "Great work");
        assert_eq!(
            components[2]["parameters"][0]["payload"],
            "regenerate_tok-1"
        );
    }

    #[test]
    fn interactive_consent_drops_regenerate_when_exhausted() {
        let msg = OutboundMessage::ConsentRequest {
            client_name: "Asha",
            draft_text: "Great work",
            token: "tok-1",
            allow_regenerate: false,
        };
        let payload = msg.chat_payload(&ctx(None, None), "+15550001111");
        assert_eq!(payload["type"], "interactive");
        let buttons = payload["interactive"]["action"]["buttons"].as_array().unwrap();
        let ids: Vec<&str> = buttons
            .iter()
            .map(|b| b["reply"]["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["approve_tok-1", "decline_tok-1"]);
    }

    #[test]
    fn approval_template_passes_token_as_url_suffix() {
        let msg = OutboundMessage::ApprovalNotice {
            client_name: "Asha",
            token: "tok-9",
        };
        let templated = msg.chat_payload(&ctx(None, Some("review_approved")), "+1555");
        assert_eq!(
            templated["template"]["components"][1]["parameters"][0]["text"],
            "tok-9"
        );
        let fallback = msg.chat_payload(&ctx(None, None), "+1555");
        assert_eq!(fallback["interactive"]["type"], "cta_url");
        assert_eq!(
            fallback["interactive"]["action"]["parameters"]["url"],
            "https://reviews.example.com/review/tok-9"
        );
    }

    #[test]
    fn consent_email_escapes_and_links_actions() {
        let msg = OutboundMessage::ConsentRequest {
            client_name: "<Asha>",
            draft_text: "Fast & friendly",
            token: "tok-2",
            allow_regenerate: true,
        };
        let email = msg.email(&ctx(None, None));
        assert!(email.html.contains("&lt;Asha&gt;"));
        assert!(email.html.contains("Fast &amp; friendly"));
        assert!(email.html.contains("/api/email-action/tok-2/approve"));
        assert!(email.html.contains("/api/email-action/tok-2/regenerate"));
        assert!(email.text.contains("Fast & friendly"));
        assert!(email.subject.contains("Acme Studio"));
    }

    #[test]
    fn alert_email_names_reason() {
        let email = internal_alert_email(
            "Asha",
            "",
            6.0,
            Some("slow <replies>"),
            AlertReason::LowRating,
        );
        assert!(email.subject.starts_with("[ACTION REQUIRED] Low Feedback Score"));
        assert!(email.html.contains("N/A"));
        assert!(email.html.contains("slow &lt;replies&gt;"));
        assert!(email.text.contains("6.0 / 10"));
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 6), "abc...");
        assert_eq!(truncate_chars("ééééééé", 5), "éé...");
    }

    #[test]
    fn phone_numbers_get_country_code() {
        assert_eq!(
            normalize_phone("98765 43210", "+91").as_deref(),
            Some("+919876543210")
        );
        assert_eq!(
            normalize_phone("+1 (555) 000-1111", "+91").as_deref(),
            Some("+15550001111")
        );
        assert_eq!(normalize_phone("5550001111", "44").as_deref(), Some("+445550001111"));
        assert_eq!(normalize_phone("  ", "+91"), None);
    }
}
