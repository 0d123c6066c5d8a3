//! Request model for the chat and shell endpoints.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when flattening a transcript into a prompt.
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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

const fn default_stream() -> bool {
    true
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl ChatRequest {
    pub const fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            stream: true,
        }
    }

    /// Parse a raw request body. An empty body is treated as `{}`.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        parse_body(body)
    }

    /// Check that the conversation is non-empty and ends with a user turn.
    pub fn validate(&self) -> Result<&Message, ValidationError> {
        let latest = self.messages.last().ok_or(ValidationError::NoMessages)?;
        if latest.role != Role::User {
            return Err(ValidationError::LastMessageNotUser);
        }
        Ok(latest)
    }
}

/// Body of `POST /shell`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellRequest {
    #[serde(default)]
    pub command: String,
    /// Accepted for client compatibility; not used when executing.
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
}

impl ShellRequest {
    /// Parse a raw request body. An empty body is treated as `{}`.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        parse_body(body)
    }

    /// The command with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.command.trim()
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ValidationError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))
}
