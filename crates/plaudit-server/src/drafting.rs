use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plaudit_config::Drafting;
use plaudit_kernel::{
    backoff_delay, build_review_prompt, clean_draft, within_band, word_count, PromptInput,
    SYSTEM_PROMPT,
};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::GenerationError;

/// Black-box text generator: one system instruction plus one user prompt in,
/// free text out.
#[async_trait]
pub trait TextService: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError>;

    fn is_configured(&self) -> bool {
        true
    }
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_output_tokens: u32,
    temperature: f64,
}

impl GeminiClient {
    pub fn new(cfg: &Drafting, api_key: Option<String>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
            max_output_tokens: cfg.max_output_tokens,
            temperature: cfg.temperature,
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

fn extract_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl TextService for GeminiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::NotConfigured)?;
        let request = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": self.max_output_tokens,
                "temperature": self.temperature
            }
        });
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        extract_text(&body).ok_or(GenerationError::Empty)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Prompt construction, output validation and bounded retry around a
/// [`TextService`].
pub struct DraftGenerator {
    service: Arc<dyn TextService>,
    max_attempts: u32,
    backoff_base: Duration,
    min_words: usize,
    max_words: usize,
}

impl DraftGenerator {
    pub fn new(service: Arc<dyn TextService>, cfg: &Drafting) -> Self {
        Self {
            service,
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            min_words: cfg.min_words,
            max_words: cfg.max_words,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_configured()
    }

    /// On the last attempt an out-of-band draft is accepted; transport and
    /// empty-output failures are not.
    pub async fn generate(&self, input: &PromptInput<'_>) -> Result<String, GenerationError> {
        let prompt = build_review_prompt(input);
        let mut last_error = GenerationError::Empty;

        for attempt in 0..self.max_attempts {
            let final_attempt = attempt + 1 == self.max_attempts;
            match self.service.complete(SYSTEM_PROMPT, &prompt).await {
                Ok(raw) => {
                    let draft = clean_draft(&raw);
                    if draft.is_empty() {
                        last_error = GenerationError::Empty;
                    } else if within_band(&draft, self.min_words, self.max_words) {
                        info!(attempt = attempt + 1, words = word_count(&draft), "draft generated");
                        return Ok(draft);
                    } else if final_attempt {
                        warn!(
                            attempt = attempt + 1,
                            words = word_count(&draft),
                            "accepting out-of-band draft on final attempt"
                        );
                        return Ok(draft);
                    } else {
                        last_error = GenerationError::OutOfBand {
                            words: word_count(&draft),
                            min: self.min_words,
                            max: self.max_words,
                        };
                    }
                }
                Err(GenerationError::NotConfigured) => return Err(GenerationError::NotConfigured),
                Err(e) => last_error = e,
            }

            if !final_attempt {
                let delay = backoff_delay(self.backoff_base, attempt);
                warn!(
                    attempt = attempt + 1,
                    error = %last_error,
                    delay_ms = delay.as_millis() as u64,
                    "draft attempt failed; retrying"
                );
                if delay > Duration::ZERO {
                    sleep(delay).await;
                }
            }
        }
        Err(last_error)
    }
}
