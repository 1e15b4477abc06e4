use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use plaudit_config::{resolve_optional, Config, SecretValue};
use plaudit_contracts::{
    ActionSource, ConsentAction, ConsentOutcome, FormSubmission, IntakeReport, ReviewView,
    WebhookResponse, API_VERSION,
};
use plaudit_kernel::{constant_time_eq, parse_chat_webhook, token_prefix, verify_signature, InboundChat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

pub mod audit;
pub mod channels;
pub mod directory;
pub mod drafting;
pub mod engine;
pub mod error;
pub mod notify;
pub mod store;

pub use audit::{
    read_audit_records, verify_audit_chain, verify_audit_chain_with_mirror, AuditLog, AuditRecord,
};
pub use channels::{ChatTransport, EmailRelayClient, EmailTransport, WhatsAppClient};
pub use directory::{ClientDirectory, StaticDirectory};
pub use drafting::{DraftGenerator, GeminiClient, TextService};
pub use engine::{EngineSettings, ReviewEngine, ReviewLookup};
pub use error::{ApiError, EngineError, GatewayError, GenerationError, StoreError};
pub use notify::{AlertDelivery, MessageSettings, Notifier};
pub use store::{MemoryStore, SqliteStore, SubmissionStore};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// External collaborators the engine is built on. `build_app` wires the real
/// ones from config; tests pass fakes to `build_app_with`.
pub struct Services {
    pub store: Arc<dyn SubmissionStore>,
    pub directory: Arc<dyn ClientDirectory>,
    pub text: Arc<dyn TextService>,
    pub chat: Arc<dyn ChatTransport>,
    pub email: Arc<dyn EmailTransport>,
}

fn secret(value: Option<&SecretValue>) -> Result<Option<String>, String> {
    resolve_optional(value).map_err(|e| e.to_string())
}

impl Services {
    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        let store: Arc<dyn SubmissionStore> = if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .as_deref()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            Arc::new(SqliteStore::open(sqlite_path).map_err(|e| e.to_string())?)
        } else {
            Arc::new(MemoryStore::new())
        };

        let directory =
            StaticDirectory::from_config(&cfg.crm.clients, &cfg.whatsapp.default_country_code);
        info!(clients = directory.len(), "client directory loaded");

        let text = GeminiClient::new(&cfg.drafting, secret(cfg.drafting.api_key.as_ref())?)
            .map_err(|e| e.to_string())?;
        let chat = WhatsAppClient::new(&cfg.whatsapp, secret(cfg.whatsapp.access_token.as_ref())?)
            .map_err(|e| e.to_string())?;
        let email = EmailRelayClient::new(&cfg.email, secret(cfg.email.api_key.as_ref())?)
            .map_err(|e| e.to_string())?;

        Ok(Self {
            store,
            directory: Arc::new(directory),
            text: Arc::new(text),
            chat: Arc::new(chat),
            email: Arc::new(email),
        })
    }
}

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "plaudit listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let services = Services::from_config(&cfg)?;
    build_app_with(cfg, services).await
}

pub async fn build_app_with(cfg: Config, services: Services) -> Result<Router, String> {
    let state = AppState::new(cfg, services).await?;
    Ok(Router::new()
        .route("/health", get(health))
        .route("/api/webhook/form", post(form_webhook))
        .route(
            "/api/webhook/whatsapp",
            get(whatsapp_verify).post(whatsapp_webhook),
        )
        .route("/api/email-action/{token}/{action}", get(email_action))
        .route("/api/review/{token}", get(review))
        .route("/api/review/{token}/action", post(review_action))
        .route("/api/review/{token}/copied", post(review_copied))
        .route("/api/review/{token}/posted", post(review_posted))
        .route("/api/reviews/send-reminders", post(send_reminders))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    engine: Arc<ReviewEngine>,
    webhook_secret: Option<String>,
    verify_token: Option<String>,
    app_secret: Option<String>,
}

impl AppState {
    async fn new(cfg: Config, services: Services) -> Result<Self, String> {
        let audit_sqlite = if cfg.store.kind == "sqlite" {
            cfg.store.sqlite_path.as_deref()
        } else {
            None
        };
        let audit = AuditLog::open(
            &cfg.audit.jsonl_path,
            audit_sqlite,
            cfg.audit.immutable_mirror_path.as_deref(),
        )
        .await
        .map_err(|e| e.to_string())?;

        let generator = DraftGenerator::new(services.text, &cfg.drafting);
        let notifier = Notifier::new(
            services.chat,
            services.email,
            MessageSettings::from_config(&cfg),
        );
        let engine = ReviewEngine::new(
            services.store,
            services.directory,
            generator,
            notifier,
            Arc::new(audit),
            EngineSettings::from_config(&cfg),
        );

        Ok(Self {
            engine: Arc::new(engine),
            webhook_secret: secret(cfg.security.webhook_secret.as_ref())?,
            verify_token: secret(cfg.whatsapp.verify_token.as_ref())?,
            app_secret: secret(cfg.whatsapp.app_secret.as_ref())?,
        })
    }

    fn require_webhook_secret(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = self.webhook_secret.as_deref() else {
            return Ok(());
        };
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            Ok(())
        } else {
            warn!("rejected request with invalid webhook secret");
            Err(ApiError::Forbidden("invalid webhook secret".to_string()))
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

/// Benign repeats answer 200 so callers can retry freely.
fn outcome_response(outcome: ConsentOutcome) -> Result<Json<WebhookResponse>, ApiError> {
    match outcome {
        ConsentOutcome::NotFound => Err(ApiError::NotFound("review not found".to_string())),
        ConsentOutcome::Expired => Err(ApiError::Gone("review link has expired".to_string())),
        ConsentOutcome::LimitReached {
            regen_count,
            max_regenerations,
        } => Err(ApiError::Conflict(format!(
            "regeneration limit reached ({regen_count}/{max_regenerations})"
        ))),
        ConsentOutcome::NotActionable { status } => Err(ApiError::Conflict(format!(
            "action not available while {}",
            status.as_str()
        ))),
        applied @ ConsentOutcome::Applied { .. } => {
            let data = to_data(&applied)?;
            Ok(Json(WebhookResponse::ok("action applied").with_data(data)))
        }
        repeat @ ConsentOutcome::AlreadyActioned { .. } => {
            let data = to_data(&repeat)?;
            Ok(Json(WebhookResponse::ok("already actioned").with_data(data)))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let view = |configured: bool| if configured { "configured" } else { "missing" };
    let engine = &state.engine;
    Json(json!({
        "status": "ok",
        "version": API_VERSION,
        "store": engine.store().backend_name(),
        "dependencies": {
            "drafting": view(engine.drafting_configured()),
            "whatsapp": view(engine.notifier().chat_configured()),
            "email": view(engine.notifier().email_configured()),
            "webhook_secret": view(state.webhook_secret.is_some()),
            "whatsapp_verify_token": view(state.verify_token.is_some()),
        }
    }))
}

fn intake_message(report: &IntakeReport) -> &'static str {
    if report.duplicate {
        "duplicate submission ignored"
    } else if !report.qualified {
        "internal alert raised"
    } else if report.delivery.as_ref().map(|d| d.success).unwrap_or(false) {
        "consent request sent"
    } else {
        "draft created; delivery failed"
    }
}

async fn form_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    state.require_webhook_secret(&headers)?;
    let form: FormSubmission = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid form payload: {e}")))?;
    let report = state.engine.process_submission(form).await?;
    let data = to_data(&report)?;
    Ok(Json(
        WebhookResponse::ok(intake_message(&report)).with_data(data),
    ))
}

async fn whatsapp_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    let (Some(mode), Some(token), Some(challenge)) = (
        params.get("hub.mode"),
        params.get("hub.verify_token"),
        params.get("hub.challenge"),
    ) else {
        return Err(ApiError::BadRequest(
            "hub.mode, hub.verify_token and hub.challenge are required".to_string(),
        ));
    };
    let token_ok = state
        .verify_token
        .as_deref()
        .map(|expected| constant_time_eq(expected.as_bytes(), token.as_bytes()))
        .unwrap_or(false);
    if mode != "subscribe" || !token_ok {
        warn!(%mode, "whatsapp webhook verification rejected");
        return Err(ApiError::Forbidden("verification failed".to_string()));
    }
    info!("whatsapp webhook verified");
    Ok(challenge.clone())
}

async fn whatsapp_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(app_secret) = state.app_secret.as_deref() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_signature(app_secret, &body, signature) {
            warn!("rejected whatsapp callback with invalid signature");
            return Err(ApiError::Forbidden("invalid signature".to_string()));
        }
    }
    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook body: {e}")))?;
    let inbound =
        parse_chat_webhook(&value).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    match inbound {
        InboundChat::Action { action, token, .. } => {
            match state
                .engine
                .apply_consent_action(&token, action, ActionSource::Chat)
                .await
            {
                Ok(outcome) => {
                    let data = to_data(&outcome)?;
                    Ok(Json(WebhookResponse::ok(outcome.code()).with_data(data)))
                }
                Err(e @ EngineError::Generation { .. }) => {
                    error!(token = token_prefix(&token), error = %e, "chat regeneration failed");
                    Ok(Json(WebhookResponse {
                        success: false,
                        message: e.to_string(),
                        data: None,
                    }))
                }
                Err(e) => Err(e.into()),
            }
        }
        InboundChat::UnknownButton { raw, .. } => {
            warn!(payload = %raw, "unrecognised button payload");
            Ok(Json(WebhookResponse::ok("button ignored")))
        }
        InboundChat::Text { body, .. } => {
            info!(chars = body.chars().count(), "free-text chat message received");
            Ok(Json(WebhookResponse::ok("message received")))
        }
        InboundChat::Ignored => Ok(Json(WebhookResponse::ok("event ignored"))),
    }
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn email_action(
    State(state): State<AppState>,
    Path((token, action)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let action = ConsentAction::parse(&action)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown action: {action}")))?;
    let result = state
        .engine
        .apply_consent_action(&token, action, ActionSource::EmailLink)
        .await;

    let ctx = state.engine.notifier().settings().context();
    let location = match result {
        Ok(ConsentOutcome::Applied { .. }) => match action {
            ConsentAction::Approve => ctx.landing_url(&token),
            ConsentAction::Regenerate => ctx.confirmation_url("regenerate"),
            ConsentAction::Decline => ctx.confirmation_url("decline"),
        },
        Ok(ConsentOutcome::NotFound) => ctx.confirmation_url("not-found"),
        Ok(ConsentOutcome::Expired) => ctx.confirmation_url("expired"),
        Ok(ConsentOutcome::AlreadyActioned { .. }) => ctx.confirmation_url("already-actioned"),
        Ok(ConsentOutcome::LimitReached { .. }) => ctx.confirmation_url("regen-limit"),
        Ok(ConsentOutcome::NotActionable { .. }) => ctx.confirmation_url("not-actionable"),
        Err(e) => {
            error!(token = token_prefix(&token), error = %e, "email action failed");
            ctx.confirmation_url("error")
        }
    };
    Ok(found(location))
}

async fn review(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ReviewView>, ApiError> {
    match state.engine.review_view(&token).await? {
        ReviewLookup::Found(view) => Ok(Json(view)),
        ReviewLookup::NotFound => Err(ApiError::NotFound("review not found".to_string())),
        ReviewLookup::Expired => Err(ApiError::Gone("review link has expired".to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct LandingAction {
    action: String,
}

async fn review_action(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(input): Json<LandingAction>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let action = ConsentAction::parse(&input.action)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown action: {}", input.action)))?;
    let outcome = state
        .engine
        .apply_consent_action(&token, action, ActionSource::LandingPage)
        .await?;
    outcome_response(outcome)
}

async fn review_copied(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<WebhookResponse>, ApiError> {
    outcome_response(state.engine.mark_copied(&token).await?)
}

async fn review_posted(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<WebhookResponse>, ApiError> {
    state.require_webhook_secret(&headers)?;
    outcome_response(state.engine.mark_posted(&token).await?)
}

async fn send_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WebhookResponse>, ApiError> {
    state.require_webhook_secret(&headers)?;
    let report = state.engine.send_reminders(Utc::now()).await?;
    let data = to_data(&report)?;
    Ok(Json(
        WebhookResponse::ok("reminder sweep finished").with_data(data),
    ))
}
