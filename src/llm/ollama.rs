use super::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Client for a local Ollama server.
///
/// All public methods degrade into fallback values on failure, see the
/// [`Inference`] contract.
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap();

        Self {
            base_url: config.base_url,
            model: config.model,
            client,
        }
    }

    /// Message list sent to the backend: [system?] + history + new message.
    fn build_messages(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> Vec<ChatEntry> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(prompt) = system_prompt {
            messages.push(ChatEntry::system(prompt));
        }
        messages.extend_from_slice(history);
        messages.push(ChatEntry::user(message));
        messages
    }

    async fn chat_inner(&self, messages: Vec<ChatEntry>) -> LlmResult<String> {
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }

        let body: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Other(e.to_string()))?;

        Ok(body
            .message
            .and_then(|m| m.content)
            .unwrap_or_else(|| NO_REPLY_FALLBACK.to_string()))
    }
}

#[async_trait]
impl Inference for OllamaClient {
    async fn chat(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> String {
        let messages = self.build_messages(message, system_prompt, history);
        match self.chat_inner(messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("inference request failed: {}", e);
                fallback_text(&e)
            }
        }
    }

    async fn chat_stream(
        &self,
        message: &str,
        system_prompt: Option<&str>,
        history: &[ChatEntry],
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(32);

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(message, system_prompt, history),
            stream: true,
        };
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.base_url);

        tokio::spawn(async move {
            let mut response = match client.post(&url).json(&request).send().await {
                Ok(r) => r,
                Err(e) => {
                    let err = classify(e);
                    tracing::warn!("streaming inference request failed: {}", err);
                    let _ = tx.send(fallback_text(&err)).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let err = LlmError::Status(status.as_u16());
                tracing::warn!("streaming inference request failed: {}", err);
                let _ = tx.send(fallback_text(&err)).await;
                return;
            }

            // The backend emits newline-delimited JSON; a chunk boundary may
            // fall mid-line, so buffer and split on complete lines only.
            let mut buf = String::new();
            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line: String = buf.drain(..=pos).collect();
                            if let Some(content) = chunk_content(&line) {
                                if tx.send(content).await.is_err() {
                                    // Receiver dropped (client went away)
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let err = LlmError::Other(e.to_string());
                        tracing::warn!("streaming inference read failed: {}", err);
                        let _ = tx.send(fallback_text(&err)).await;
                        return;
                    }
                }
            }

            if let Some(content) = chunk_content(&buf) {
                let _ = tx.send(content).await;
            }
        });

        rx
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Vec<String> {
        let response = match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return Vec::new(),
        };

        match response.json::<OllamaTagsResponse>().await {
            Ok(tags) => tags.models.into_iter().map(|m| m.name).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Classify a transport error: connect failures get their own fallback text.
fn classify(err: reqwest::Error) -> LlmError {
    if err.is_connect() {
        LlmError::Unreachable(err.to_string())
    } else {
        LlmError::Other(err.to_string())
    }
}

/// Extract the content fragment from one NDJSON stream line, if any.
fn chunk_content(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let chunk: OllamaChatResponse = serde_json::from_str(line).ok()?;
    chunk
        .message
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty())
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatEntry>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
}
