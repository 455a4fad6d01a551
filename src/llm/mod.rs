mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

pub use ollama::OllamaClient;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur while talking to the inference backend
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("cannot reach inference backend: {0}")]
    Unreachable(String),

    #[error("inference backend returned status {0}")]
    Status(u16),

    #[error("{0}")]
    Other(String),
}

/// Shown instead of a reply when the backend cannot be reached at all.
pub const UNREACHABLE_FALLBACK: &str =
    "⚠️ Cannot connect to Ollama. Make sure Ollama is running (`ollama serve`).";

/// Shown when the backend answers but the reply carries no content.
pub const NO_REPLY_FALLBACK: &str = "I couldn't generate a response.";

/// Map an error to the fixed text a chat user sees in place of a reply.
///
/// The chat flow never surfaces inference errors; classification lives in the
/// returned string and in the warn log emitted by the caller.
pub fn fallback_text(err: &LlmError) -> String {
    match err {
        LlmError::Unreachable(_) => UNREACHABLE_FALLBACK.to_string(),
        LlmError::Status(code) => format!("⚠️ Ollama error: {}", code),
        LlmError::Other(msg) => format!("⚠️ Error: {}", msg),
    }
}

/// A single conversation turn, in the backend's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
}

impl ChatEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Contract the chat surface depends on.
///
/// Every method degrades instead of failing: `chat` and `chat_stream` always
/// produce displayable text, the probes report unavailable/empty. This keeps
/// the relay usable while the backend is down.
#[async_trait]
pub trait Inference: Send + Sync {
    /// Single-shot completion. Errors come back as fallback text.
    async fn chat(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> String;

    /// Streamed completion; one text fragment per received chunk. The channel
    /// closes when the backend ends the stream. On connectivity failure the
    /// channel yields exactly one fallback fragment and closes.
    async fn chat_stream(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> mpsc::Receiver<String>;

    /// Lightweight reachability probe.
    async fn is_available(&self) -> bool;

    /// Names of models the backend has pulled; empty on any failure.
    async fn list_models(&self) -> Vec<String>;

    /// The model completions are requested with.
    fn model(&self) -> &str;
}

/// Inference backend configuration
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ollama:11434".to_string(),
            model: "phi3".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl OllamaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let base_url = std::env::var("OLLAMA_BASE_URL")
            .ok()
            .and_then(|url| {
                let trimmed = url.trim();
                (!trimmed.is_empty()).then(|| trimmed.trim_end_matches('/').to_string())
            })
            .unwrap_or(defaults.base_url);

        let model = std::env::var("OLLAMA_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or(defaults.model);

        let timeout = std::env::var("OLLAMA_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        Self {
            base_url,
            model,
            timeout,
        }
    }
}
