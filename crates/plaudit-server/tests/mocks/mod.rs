#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::{Json, Router};
use plaudit_config::{
    Alerts, Audit, Config, Consent, Crm, CrmClient, Drafting, Email, Links, Logging,
    Qualification, Security, Server, Store, WhatsApp,
};
use plaudit_contracts::{FormSubmission, RawRating};
use plaudit_kernel::EmailContent;
use plaudit_server::{
    AuditLog, ChatTransport, DraftGenerator, EmailTransport, EngineSettings, GatewayError,
    GenerationError, MemoryStore, MessageSettings, Notifier, ReviewEngine, Services,
    StaticDirectory, TextService,
};
use serde_json::Value;

pub const DRAFT: &str = "Working with the team was a genuinely great experience from kickoff \
                         to launch, and the support afterwards has been just as reliable.";

pub fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos()
}

pub fn temp_path(prefix: &str, ext: &str) -> String {
    std::env::temp_dir()
        .join(format!("{prefix}-{}.{ext}", nanos()))
        .to_string_lossy()
        .to_string()
}

pub fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
        },
        logging: Logging::default(),
        qualification: Qualification::default(),
        consent: Consent::default(),
        links: Links {
            app_base_url: "https://api.example.com".to_string(),
            frontend_url: "https://reviews.example.com".to_string(),
            gbp_review_url: "https://g.page/r/example/review".to_string(),
        },
        security: Security::default(),
        drafting: Drafting {
            endpoint: "http://127.0.0.1:1".to_string(),
            model: "test-model".to_string(),
            api_key: None,
            timeout_ms: 1_000,
            max_attempts: 3,
            backoff_base_ms: 0,
            min_words: 15,
            max_words: 100,
            max_output_tokens: 500,
            temperature: 0.7,
        },
        whatsapp: WhatsApp::default(),
        email: Email {
            from_email: "reviews@example.com".to_string(),
            from_name: "Acme Studio".to_string(),
            ..Email::default()
        },
        alerts: Alerts {
            recipients: vec!["ops@example.com".to_string()],
        },
        audit: Audit {
            jsonl_path: temp_path("plaudit-audit", "jsonl"),
            immutable_mirror_path: None,
        },
        crm: Crm {
            clients: vec![
                CrmClient {
                    email: "asha@example.com".to_string(),
                    name: "Asha Rao".to_string(),
                    company: "Rao Logistics".to_string(),
                    services: "Web platform".to_string(),
                    whatsapp: Some("98765 43210".to_string()),
                    business_email: Some("asha@raologistics.example".to_string()),
                },
                CrmClient {
                    email: "li@example.com".to_string(),
                    name: "Li Wei".to_string(),
                    company: "Wei Foods".to_string(),
                    services: "Mobile app".to_string(),
                    whatsapp: None,
                    business_email: None,
                },
            ],
        },
    }
}

/// Text service replaying queued results, then numbered in-band drafts.
#[derive(Default)]
pub struct FakeText {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    calls: Mutex<usize>,
    delay: Mutex<Duration>,
}

impl FakeText {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: Result<String, GenerationError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_times(&self, n: usize) {
        for _ in 0..n {
            self.push(Err(GenerationError::Transport("connection refused".to_string())));
        }
    }

    /// Every later completion waits this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextService for FakeText {
    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, GenerationError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(format!("\"{DRAFT} Draft {n}.\"")),
        }
    }
}

#[derive(Default)]
pub struct FakeChat {
    fail: bool,
    sent: Mutex<Vec<Value>>,
}

impl FakeChat {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn send(&self, payload: &Value) -> Result<String, GatewayError> {
        if self.fail {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "recipient not on whatsapp".to_string(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(payload.clone());
        Ok(format!("wamid.{}", sent.len()))
    }

    fn is_configured(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct FakeEmail {
    fail: bool,
    sent: Mutex<Vec<(String, EmailContent)>>,
}

impl FakeEmail {
    pub fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<(String, EmailContent)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for FakeEmail {
    async fn send(&self, to: &str, content: &EmailContent) -> Result<Option<String>, GatewayError> {
        if self.fail {
            return Err(GatewayError::Transport("relay unreachable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), content.clone()));
        Ok(None)
    }

    fn is_configured(&self) -> bool {
        true
    }
}

pub struct Harness {
    pub cfg: Config,
    pub engine: ReviewEngine,
    pub store: Arc<MemoryStore>,
    pub text: Arc<FakeText>,
    pub chat: Arc<FakeChat>,
    pub email: Arc<FakeEmail>,
}

pub async fn harness_with(cfg: Config, chat_fails: bool, email_fails: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let text = FakeText::new();
    let chat = FakeChat::new(chat_fails);
    let email = FakeEmail::new(email_fails);
    let audit = AuditLog::open(&cfg.audit.jsonl_path, None, None)
        .await
        .expect("open audit log");
    let directory =
        StaticDirectory::from_config(&cfg.crm.clients, &cfg.whatsapp.default_country_code);
    let engine = ReviewEngine::new(
        store.clone(),
        Arc::new(directory),
        DraftGenerator::new(text.clone(), &cfg.drafting),
        Notifier::new(chat.clone(), email.clone(), MessageSettings::from_config(&cfg)),
        Arc::new(audit),
        EngineSettings::from_config(&cfg),
    );
    Harness {
        cfg,
        engine,
        store,
        text,
        chat,
        email,
    }
}

pub async fn harness(chat_fails: bool, email_fails: bool) -> Harness {
    harness_with(test_config(), chat_fails, email_fails).await
}

/// Fakes wired for `build_app_with`, with handles kept for assertions.
pub struct FakeServices {
    pub text: Arc<FakeText>,
    pub chat: Arc<FakeChat>,
    pub email: Arc<FakeEmail>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            text: FakeText::new(),
            chat: FakeChat::new(false),
            email: FakeEmail::new(false),
        }
    }

    pub fn services(&self, cfg: &Config) -> Services {
        Services {
            store: Arc::new(MemoryStore::new()),
            directory: Arc::new(StaticDirectory::from_config(
                &cfg.crm.clients,
                &cfg.whatsapp.default_country_code,
            )),
            text: self.text.clone(),
            chat: self.chat.clone(),
            email: self.email.clone(),
        }
    }
}

pub fn form(email: &str, score: f64, consent: &str, feedback: Option<&str>) -> FormSubmission {
    let r = || Some(RawRating::Number(score));
    FormSubmission {
        email: email.to_string(),
        submitted_at: Some("2026-03-01T10:00:00Z".to_string()),
        q1_kickoff: r(),
        q2_communication: r(),
        q3_project_management: r(),
        q4_design_ux: r(),
        q5_technical_quality: r(),
        q6_launch: r(),
        q7_support: r(),
        q8_overall: r(),
        testimonial_consent: consent.to_string(),
        open_feedback: feedback.map(str::to_string),
    }
}

pub fn audit_event_types(path: &str) -> Vec<String> {
    plaudit_server::read_audit_records(path)
        .expect("read audit records")
        .into_iter()
        .map(|r| r.event_type)
        .collect()
}

/// One request captured by a throwaway upstream server.
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone)]
struct Upstream {
    status: StatusCode,
    reply: Value,
    seen: Arc<Mutex<Vec<Seen>>>,
}

async fn upstream_handler(
    State(upstream): State<Upstream>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    upstream.seen.lock().unwrap().push(Seen {
        path: uri.path().to_string(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    (upstream.status, Json(upstream.reply.clone()))
}

/// Serves `reply` with `status` for every request on an ephemeral port.
pub async fn spawn_upstream(status: StatusCode, reply: Value) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .fallback(upstream_handler)
        .with_state(Upstream {
            status,
            reply,
            seen: seen.clone(),
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test port");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), seen)
}
