use serde::{Deserialize, Serialize};

/// Inbound chat frame.
///
/// Clients may send structured JSON (`{"text", "username"?, "type"?}`) or any
/// raw text; see [`ClientFrame::parse`].
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub text: String,
    pub username: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ClientFrame {
    /// Lenient parse: anything that does not deserialize as a frame object
    /// becomes a plain message with the raw frame as its text. Input is never
    /// rejected.
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            text: raw.to_string(),
            username: None,
            kind: None,
        })
    }

    /// Join/leave notifications carry presence, not chat content.
    pub fn is_presence(&self) -> bool {
        matches!(self.kind.as_deref(), Some("join" | "leave"))
    }
}

/// Outbound chat frame
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    System {
        text: String,
    },
    Message {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(rename = "isAI", skip_serializing_if = "Option::is_none")]
        is_ai: Option<bool>,
    },
}

impl ServerMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// An assistant reply addressed back to the asking connection.
    pub fn ai_reply(text: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            username: None,
            is_ai: Some(true),
        }
    }
}
