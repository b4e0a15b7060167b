use super::models::{Model, Usage};
use crate::config::Config;
use crate::error::LlmError;
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// OpenRouter direct API URL (BYOK mode)
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Who authored a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One request to a language model: optional system instruction plus the
/// ordered turns to send (the last one is normally the user's prompt).
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: Model,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub json_mode: bool,
}

impl ModelRequest {
    /// A single-prompt request with no prior turns.
    pub fn prompt(model: Model, prompt: impl Into<String>) -> Self {
        Self {
            model,
            system: None,
            messages: vec![ChatMessage::user(prompt)],
            json_mode: false,
        }
    }

    /// A request that carries a full conversation history.
    pub fn conversation(model: Model, messages: Vec<ChatMessage>) -> Self {
        Self {
            model,
            system: None,
            messages,
            json_mode: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Ask for a JSON object response when the model supports it.
    pub fn json(mut self) -> Self {
        self.json_mode = self.model.supports_json_mode();
        self
    }

    /// Text of the most recent user turn, if any.
    pub fn last_user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Response from LLM including content and usage stats
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

/// The language-model text service. Responses are untrusted free text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<LlmResponse, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

/// OpenRouter-compatible chat-completions client.
#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model_override: Option<String>,
}

impl OpenRouterClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model_override: None,
        }
    }

    /// Build a client from the loaded configuration, resolving the credential
    /// from the environment or keychain.
    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new(config.api_base_url.clone(), config.api_key());
        client.model_override = config.model_override.clone();
        client
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_request(&self, request: &ModelRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));

        let response_format = if request.json_mode {
            Some(ResponseFormat {
                format_type: "json_object".to_string(),
            })
        } else {
            None
        };

        ChatRequest {
            model: self
                .model_override
                .clone()
                .unwrap_or_else(|| request.model.id().to_string()),
            messages,
            max_tokens: request.model.max_tokens(),
            stream: false,
            response_format,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn complete(&self, request: ModelRequest) -> Result<LlmResponse, LlmError> {
        let api_key = self.api_key.as_ref().ok_or(LlmError::MissingCredential)?;
        let body = self.build_request(&request);

        let mut retry_count = 0;
        loop {
            let response = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("X-Title", "Pairpad")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    LlmError::Malformed(format!("{} ({})", e, truncate(&text, 200)))
                })?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                debug!(model = %body.model, chars = content.len(), "model call completed");
                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                    model: parsed.model.unwrap_or_default(),
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text).unwrap_or_else(|| {
                    (INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1)) / 1000
                });
                warn!(
                    retry_after_secs = retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "model service rate limited, retrying"
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(status_error(status.as_u16(), &text, retry_count));
        }
    }
}

fn status_error(status: u16, body: &str, retries: u32) -> LlmError {
    let message = match status {
        401 => "Invalid API key. Run 'pairpad setup' to update it.".to_string(),
        429 => format!(
            "Rate limited after {} retries. Try again in a few minutes.",
            retries
        ),
        500..=599 => format!(
            "Model service error ({}). The service may be temporarily unavailable.",
            status
        ),
        _ => format!("API error {}: {}", status, truncate(body, 200)),
    };
    LlmError::Status { status, message }
}

/// Extract a retry-after hint like "retry after 12 seconds" from an error body
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    let after_retry = &text_lower[pos..];
    for word in after_retry.split_whitespace().skip(1).take(5) {
        if let Ok(secs) = word
            .trim_matches(|c: char| !c.is_numeric())
            .parse::<u64>()
        {
            if secs > 0 && secs < 300 {
                return Some(secs);
            }
        }
    }
    None
}
