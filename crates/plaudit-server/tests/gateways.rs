mod mocks;

use std::sync::Arc;

use axum::http::StatusCode;
use mocks::{spawn_upstream, test_config};
use plaudit_config::{Email, WhatsApp};
use plaudit_contracts::Ratings;
use plaudit_kernel::{EmailContent, PromptInput, SYSTEM_PROMPT};
use plaudit_server::{
    ChatTransport, DraftGenerator, EmailRelayClient, EmailTransport, GatewayError, GeminiClient,
    GenerationError, TextService, WhatsAppClient,
};
use serde_json::json;

fn whatsapp_cfg(base: &str) -> WhatsApp {
    WhatsApp {
        api_base: base.to_string(),
        phone_number_id: "1234".to_string(),
        timeout_ms: 2_000,
        ..WhatsApp::default()
    }
}

fn email_cfg(endpoint: Option<String>) -> Email {
    Email {
        endpoint,
        from_email: "reviews@example.com".to_string(),
        from_name: "Acme Studio".to_string(),
        timeout_ms: 2_000,
        ..Email::default()
    }
}

fn content() -> EmailContent {
    EmailContent {
        subject: "Your Review Draft".to_string(),
        html: "<p>Hi</p>".to_string(),
        text: "Hi".to_string(),
    }
}

#[tokio::test]
async fn gemini_client_sends_system_instruction_and_reads_parts() {
    let (base, seen) = spawn_upstream(
        StatusCode::OK,
        json!({
            "candidates": [{ "content": { "parts": [{ "text": "A fine draft." }] } }]
        }),
    )
    .await;
    let mut cfg = test_config().drafting;
    cfg.endpoint = format!("{base}/v1beta/");
    let client = GeminiClient::new(&cfg, Some("gm-key".to_string())).unwrap();

    let text = client.complete(SYSTEM_PROMPT, "Write it").await.unwrap();
    assert_eq!(text, "A fine draft.");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/v1beta/models/test-model:generateContent");
    assert_eq!(seen[0].headers["x-goog-api-key"], "gm-key");
    assert_eq!(
        seen[0].body["systemInstruction"]["parts"][0]["text"],
        SYSTEM_PROMPT
    );
    assert_eq!(seen[0].body["contents"][0]["parts"][0]["text"], "Write it");
    assert_eq!(seen[0].body["generationConfig"]["maxOutputTokens"], 500);
}

#[tokio::test]
async fn gemini_client_maps_upstream_errors() {
    let (base, _) = spawn_upstream(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": { "message": "quota exhausted" } }),
    )
    .await;
    let mut cfg = test_config().drafting;
    cfg.endpoint = base;
    let client = GeminiClient::new(&cfg, Some("gm-key".to_string())).unwrap();
    let err = client.complete("s", "p").await.unwrap_err();
    assert!(matches!(
        err,
        GenerationError::Upstream { status: 429, ref message } if message == "quota exhausted"
    ));
}

#[tokio::test]
async fn gemini_client_without_key_is_not_configured() {
    let client = GeminiClient::new(&test_config().drafting, None).unwrap();
    assert!(!client.is_configured());
    assert!(matches!(
        client.complete("s", "p").await,
        Err(GenerationError::NotConfigured)
    ));
}

#[tokio::test]
async fn generator_over_http_strips_quotes() {
    let draft = "\"Rao Logistics found the whole engagement smooth, from kickoff through launch, \
                 with clear communication and dependable support every step of the way.\"";
    let (base, seen) = spawn_upstream(
        StatusCode::OK,
        json!({ "candidates": [{ "content": { "parts": [{ "text": draft }] } }] }),
    )
    .await;
    let mut cfg = test_config().drafting;
    cfg.endpoint = base;
    let client = GeminiClient::new(&cfg, Some("gm-key".to_string())).unwrap();
    let generator = DraftGenerator::new(Arc::new(client), &cfg);

    let ratings = Ratings([Some(9.0); 8]);
    let text = generator
        .generate(&PromptInput {
            client_name: "Asha Rao",
            company: "Rao Logistics",
            services: "Web platform",
            avg_rating: 9.0,
            ratings: &ratings,
            open_feedback: Some("Great team"),
        })
        .await
        .unwrap();
    assert!(text.starts_with("Rao Logistics found"));
    assert!(!text.ends_with('"'));

    let prompt = seen.lock().unwrap()[0].body["contents"][0]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(prompt.contains("Asha Rao"));
    assert!(prompt.contains("Great team"));
}

#[tokio::test]
async fn whatsapp_client_posts_with_bearer_and_returns_message_id() {
    let (base, seen) = spawn_upstream(
        StatusCode::OK,
        json!({ "messages": [{ "id": "wamid.HBgM" }] }),
    )
    .await;
    let client = WhatsAppClient::new(&whatsapp_cfg(&base), Some("wa-token".to_string())).unwrap();
    assert!(client.is_configured());

    let payload = json!({ "messaging_product": "whatsapp", "to": "919876543210", "type": "text" });
    let id = client.send(&payload).await.unwrap();
    assert_eq!(id, "wamid.HBgM");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].path, "/v18.0/1234/messages");
    assert_eq!(seen[0].headers["authorization"], "Bearer wa-token");
    assert_eq!(seen[0].body, payload);
}

#[tokio::test]
async fn whatsapp_client_reports_api_errors() {
    let (base, _) = spawn_upstream(
        StatusCode::BAD_REQUEST,
        json!({ "error": { "message": "Invalid parameter", "code": 100 } }),
    )
    .await;
    let client = WhatsAppClient::new(&whatsapp_cfg(&base), Some("wa-token".to_string())).unwrap();
    let err = client.send(&json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Rejected { status: 400, ref message } if message == "Invalid parameter"
    ));

    let (base, _) = spawn_upstream(
        StatusCode::OK,
        json!({ "error": { "message": "Re-engagement window closed" } }),
    )
    .await;
    let client = WhatsAppClient::new(&whatsapp_cfg(&base), Some("wa-token".to_string())).unwrap();
    assert!(matches!(
        client.send(&json!({})).await,
        Err(GatewayError::Rejected { status: 200, .. })
    ));
}

#[tokio::test]
async fn whatsapp_client_without_token_never_calls_out() {
    let (base, seen) = spawn_upstream(StatusCode::OK, json!({})).await;
    let client = WhatsAppClient::new(&whatsapp_cfg(&base), None).unwrap();
    assert!(!client.is_configured());
    assert!(matches!(
        client.send(&json!({})).await,
        Err(GatewayError::NotConfigured("whatsapp"))
    ));
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn email_relay_posts_message_json() {
    let (base, seen) = spawn_upstream(StatusCode::ACCEPTED, json!({ "id": "msg-42" })).await;
    let client =
        EmailRelayClient::new(&email_cfg(Some(format!("{base}/send"))), Some("relay-key".to_string()))
            .unwrap();

    let id = client.send("asha@example.com", &content()).await.unwrap();
    assert_eq!(id.as_deref(), Some("msg-42"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].path, "/send");
    assert_eq!(seen[0].headers["authorization"], "Bearer relay-key");
    assert_eq!(seen[0].body["to"][0]["email"], "asha@example.com");
    assert_eq!(seen[0].body["from"]["name"], "Acme Studio");
    assert_eq!(seen[0].body["subject"], "Your Review Draft");
    assert_eq!(seen[0].body["text"], "Hi");
}

#[tokio::test]
async fn email_relay_failures_are_rejections() {
    let (base, _) = spawn_upstream(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "mailbox unavailable" }),
    )
    .await;
    let client = EmailRelayClient::new(&email_cfg(Some(base)), None).unwrap();
    let err = client.send("asha@example.com", &content()).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Rejected { status: 500, ref message } if message == "mailbox unavailable"
    ));

    let unconfigured = EmailRelayClient::new(&email_cfg(None), None).unwrap();
    assert!(!unconfigured.is_configured());
    assert!(matches!(
        unconfigured.send("asha@example.com", &content()).await,
        Err(GatewayError::NotConfigured("email"))
    ));
}
