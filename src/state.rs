use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::Inference;
use crate::registry::ChatRegistry;
use crate::users::UserStore;

/// Deployment variant of the chat endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Relay inbound frames verbatim to all other connections
    Broadcast,
    /// Keep per-connection history and answer via the inference backend
    Assistant,
}

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant in a small chat room. Keep replies short and conversational.";

/// Chat surface configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub mode: ChatMode,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mode: ChatMode::Assistant,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables.
    ///
    /// One mode per process; `CHAT_MODE=broadcast` selects the plain relay,
    /// anything else runs the assistant variant.
    pub fn from_env() -> Self {
        let mode = match std::env::var("CHAT_MODE")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            Ok("broadcast") => ChatMode::Broadcast,
            Ok("assistant") | Ok("") | Err(_) => ChatMode::Assistant,
            Ok(other) => {
                tracing::warn!("unknown CHAT_MODE '{}', running assistant mode", other);
                ChatMode::Assistant
            }
        };

        let system_prompt = std::env::var("CHAT_SYSTEM_PROMPT")
            .ok()
            .and_then(|p| {
                let trimmed = p.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        Self {
            mode,
            system_prompt,
        }
    }
}

/// Process-wide shared state, injected into every handler.
pub struct AppState {
    pub registry: ChatRegistry,
    pub users: UserStore,
    pub llm: Arc<dyn Inference>,
    pub config: ChatConfig,
}

impl AppState {
    pub fn new(config: ChatConfig, llm: Arc<dyn Inference>) -> Self {
        Self {
            registry: ChatRegistry::new(),
            users: UserStore::new(),
            llm,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn mode_defaults_to_assistant() {
        std::env::remove_var("CHAT_MODE");
        assert_eq!(ChatConfig::from_env().mode, ChatMode::Assistant);
    }

    #[test]
    #[serial]
    fn mode_broadcast_from_env() {
        std::env::set_var("CHAT_MODE", " Broadcast ");
        assert_eq!(ChatConfig::from_env().mode, ChatMode::Broadcast);
        std::env::remove_var("CHAT_MODE");
    }

    #[test]
    #[serial]
    fn unknown_mode_falls_back_to_assistant() {
        std::env::set_var("CHAT_MODE", "both");
        assert_eq!(ChatConfig::from_env().mode, ChatMode::Assistant);
        std::env::remove_var("CHAT_MODE");
    }
}
