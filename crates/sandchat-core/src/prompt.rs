//! Prompt rendering.
//!
//! Producers that accept a single text argument (command-line AI tools) get
//! the whole conversation flattened into one prompt: the persona, the prior
//! turns as `"<Role>: <content>"` blocks, then the latest user turn.

use std::path::Path;

use crate::error::{Error, Result};
use crate::message::{Message, Role};

const DEFAULT_PERSONA: &str = "\
You are an AI assistant representing the owner of this website. Answer \
questions in first person, as if you were them.

When answering:
1. Speak in first person
2. Be conversational and friendly
3. If you don't know something specific, say so honestly
4. Keep responses concise but helpful";

/// System description the model is asked to embody.
///
/// Injected into the relay at construction time so deployments and tests
/// can substitute their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona(String);

impl Persona {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Load a persona from a UTF-8 text file. Surrounding whitespace is trimmed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read persona file {}: {}", path.display(), e))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Config(format!(
                "Persona file {} is empty",
                path.display()
            )));
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self(DEFAULT_PERSONA.to_string())
    }
}

/// Flatten a conversation into a single prompt string.
///
/// The last message is always rendered as `User:`; callers validate that it
/// is a user turn before rendering.
pub fn render(persona: &Persona, messages: &[Message]) -> String {
    let mut out = String::from(persona.as_str());
    let Some((latest, history)) = messages.split_last() else {
        return out;
    };

    if !history.is_empty() {
        let transcript = history
            .iter()
            .map(render_turn)
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push_str("\n\n");
        out.push_str(&transcript);
    }

    out.push_str("\n\n");
    out.push_str(Role::User.label());
    out.push_str(": ");
    out.push_str(&latest.content);
    out
}

fn render_turn(message: &Message) -> String {
    format!("{}: {}", message.role.label(), message.content)
}
