use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("secret resolution failed: {0}")]
    Secret(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub qualification: Qualification,
    #[serde(default)]
    pub consent: Consent,
    pub links: Links,
    #[serde(default)]
    pub security: Security,
    pub drafting: Drafting,
    #[serde(default)]
    pub whatsapp: WhatsApp,
    #[serde(default)]
    pub email: Email,
    #[serde(default)]
    pub alerts: Alerts,
    pub audit: Audit,
    #[serde(default)]
    pub crm: Crm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qualification {
    #[serde(default = "default_rating_threshold")]
    pub rating_threshold: f64,
    /// Replaces the built-in negative keyword list when set.
    #[serde(default)]
    pub negative_keywords: Option<Vec<String>>,
}

impl Default for Qualification {
    fn default() -> Self {
        Self {
            rating_threshold: default_rating_threshold(),
            negative_keywords: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consent {
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
    #[serde(default = "default_token_expiry_days")]
    pub token_expiry_days: u32,
    #[serde(default = "default_reminder_min_age_days")]
    pub reminder_min_age_days: u32,
}

impl Default for Consent {
    fn default() -> Self {
        Self {
            max_regenerations: default_max_regenerations(),
            token_expiry_days: default_token_expiry_days(),
            reminder_min_age_days: default_reminder_min_age_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Links {
    /// Public base URL of this service; e-mail action links point here.
    pub app_base_url: String,
    /// Base URL of the landing page frontend.
    pub frontend_url: String,
    #[serde(default)]
    pub gbp_review_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Security {
    #[serde(default)]
    pub webhook_secret: Option<SecretValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drafting {
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<SecretValue>,
    #[serde(default = "default_external_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsApp {
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
    #[serde(default = "default_whatsapp_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub phone_number_id: String,
    #[serde(default)]
    pub access_token: Option<SecretValue>,
    #[serde(default)]
    pub verify_token: Option<SecretValue>,
    /// Enables `X-Hub-Signature-256` verification of inbound callbacks.
    #[serde(default)]
    pub app_secret: Option<SecretValue>,
    #[serde(default)]
    pub consent_template: Option<String>,
    #[serde(default)]
    pub approved_template: Option<String>,
    #[serde(default = "default_template_language")]
    pub template_language: String,
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default = "default_external_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WhatsApp {
    fn default() -> Self {
        Self {
            api_base: default_whatsapp_api_base(),
            api_version: default_whatsapp_api_version(),
            phone_number_id: String::new(),
            access_token: None,
            verify_token: None,
            app_secret: None,
            consent_template: None,
            approved_template: None,
            template_language: default_template_language(),
            default_country_code: default_country_code(),
            timeout_ms: default_external_timeout_ms(),
        }
    }
}

impl WhatsApp {
    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Transactional e-mail relay accepting JSON messages over HTTPS.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<SecretValue>,
    #[serde(default)]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_external_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            from_email: String::new(),
            from_name: default_from_name(),
            timeout_ms: default_external_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Alerts {
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Audit {
    pub jsonl_path: String,
    #[serde(default)]
    pub immutable_mirror_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Crm {
    #[serde(default)]
    pub clients: Vec<CrmClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmClient {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub services: String,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub business_email: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    Env,
    Plain,
}

/// A credential given either inline or as the name of an environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretValue {
    #[serde(rename = "type")]
    pub source: SecretSource,
    pub value: String,
}

impl SecretValue {
    pub fn plain(value: &str) -> Self {
        Self {
            source: SecretSource::Plain,
            value: value.to_string(),
        }
    }

    pub fn env(name: &str) -> Self {
        Self {
            source: SecretSource::Env,
            value: name.to_string(),
        }
    }

    pub fn resolve(&self) -> Result<String, ConfigError> {
        match self.source {
            SecretSource::Plain => Ok(self.value.clone()),
            SecretSource::Env => std::env::var(&self.value).map_err(|_| {
                ConfigError::Secret(format!("environment variable {} is not set", self.value))
            }),
        }
    }
}

/// Resolves an optional secret; empty values count as unset.
pub fn resolve_optional(secret: Option<&SecretValue>) -> Result<Option<String>, ConfigError> {
    match secret {
        Some(s) => {
            let value = s.resolve()?;
            Ok(if value.trim().is_empty() {
                None
            } else {
                Some(value)
            })
        }
        None => Ok(None),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rating_threshold() -> f64 {
    8.0
}

fn default_max_regenerations() -> u32 {
    2
}

fn default_token_expiry_days() -> u32 {
    14
}

fn default_reminder_min_age_days() -> u32 {
    3
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_external_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_min_words() -> usize {
    15
}

fn default_max_words() -> usize {
    100
}

fn default_max_output_tokens() -> u32 {
    500
}

fn default_temperature() -> f64 {
    0.7
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_whatsapp_api_version() -> String {
    "v18.0".to_string()
}

fn default_template_language() -> String {
    "en".to_string()
}

fn default_country_code() -> String {
    "+91".to_string()
}

fn default_from_name() -> String {
    "bdcode Team".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }
    if !(0.0..=10.0).contains(&cfg.qualification.rating_threshold) {
        return Err(ConfigError::UnsupportedConfig(
            "qualification.rating_threshold must be within 0..=10".to_string(),
        ));
    }
    if cfg.consent.token_expiry_days == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "consent.token_expiry_days must be >= 1".to_string(),
        ));
    }
    if cfg.consent.reminder_min_age_days > cfg.consent.token_expiry_days {
        return Err(ConfigError::UnsupportedConfig(
            "consent.reminder_min_age_days must not exceed consent.token_expiry_days".to_string(),
        ));
    }
    if cfg.drafting.max_attempts == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "drafting.max_attempts must be >= 1".to_string(),
        ));
    }
    if cfg.drafting.min_words > cfg.drafting.max_words {
        return Err(ConfigError::UnsupportedConfig(
            "drafting.min_words must not exceed drafting.max_words".to_string(),
        ));
    }
    if cfg.drafting.timeout_ms == 0 || cfg.whatsapp.timeout_ms == 0 || cfg.email.timeout_ms == 0
    {
        return Err(ConfigError::UnsupportedConfig(
            "external call timeouts must be >= 1ms".to_string(),
        ));
    }
    if cfg.links.frontend_url.trim().is_empty() || cfg.links.app_base_url.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "links.app_base_url and links.frontend_url are required".to_string(),
        ));
    }
    Ok(())
}
