use hmac::{Hmac, Mac};
use plaudit_contracts::ConsentAction;
use serde_json::Value;
use sha2::Sha256;
use std::fmt::Write;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// What an inbound chat webhook asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundChat {
    Action {
        from: String,
        action: ConsentAction,
        token: String,
    },
    UnknownButton {
        from: String,
        raw: String,
    },
    Text {
        from: String,
        body: String,
    },
    /// Status callbacks and anything else without a message.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedWebhook(pub String);

impl std::fmt::Display for MalformedWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed chat webhook: {}", self.0)
    }
}

/// Splits a button id of the form `<action>_<token>`.
pub fn parse_button_payload(raw: &str) -> Option<(ConsentAction, String)> {
    let (action, token) = raw.trim().split_once('_')?;
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some((ConsentAction::parse(action)?, token.to_string()))
}

fn first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key)?.as_array()?.first()
}

pub fn parse_chat_webhook(body: &Value) -> Result<InboundChat, MalformedWebhook> {
    if !body.is_object() {
        return Err(MalformedWebhook("body is not a JSON object".to_string()));
    }
    let message = first(body, "entry")
        .and_then(|entry| first(entry, "changes"))
        .and_then(|change| change.get("value"))
        .and_then(|value| first(value, "messages"));
    let Some(message) = message else {
        return Ok(InboundChat::Ignored);
    };

    let from = message
        .get("from")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();

    let button = match kind {
        "interactive" => message.get("interactive").and_then(|i| {
            i.get("button_reply")
                .or_else(|| i.get("list_reply"))
                .and_then(|reply| reply.get("id"))
                .and_then(Value::as_str)
        }),
        "button" => message
            .get("button")
            .and_then(|b| b.get("payload"))
            .and_then(Value::as_str),
        "text" => {
            let text = message
                .get("text")
                .and_then(|t| t.get("body"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Ok(InboundChat::Text {
                from,
                body: text.trim().to_string(),
            });
        }
        _ => return Ok(InboundChat::Ignored),
    };

    let Some(raw) = button else {
        return Ok(InboundChat::Ignored);
    };
    Ok(match parse_button_payload(raw) {
        Some((action, token)) => InboundChat::Action {
            from,
            action,
            token,
        },
        None => InboundChat::UnknownButton {
            from,
            raw: raw.to_string(),
        },
    })
}

/// Hex HMAC-SHA256 of `body` in the `sha256=<hex>` header format.
pub fn sign_body(app_secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).ok()?;
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(SIGNATURE_PREFIX.len() + digest.len() * 2);
    out.push_str(SIGNATURE_PREFIX);
    for byte in digest {
        write!(&mut out, "{byte:02x}").ok()?;
    }
    Some(out)
}

pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(header) = header.map(str::trim) else {
        return false;
    };
    let Some(expected) = sign_body(app_secret, body) else {
        return false;
    };
    constant_time_eq(
        expected.as_bytes(),
        header.to_ascii_lowercase().as_bytes(),
    )
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
