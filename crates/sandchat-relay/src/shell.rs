//! Shell command dispatch.
//!
//! A few commands never reach the shell: the empty command, the welcome
//! command, and `<prefix> <question>`, which is answered by the chat relay.

use std::sync::Arc;

use sandchat_core::config::ShellConfig;

use crate::producer::Producer;

/// What to do with a submitted shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellAction<'a> {
    /// Nothing to run.
    Noop,
    /// Reply with the welcome text.
    Welcome,
    /// Ask the chat relay this question.
    Chat(&'a str),
    /// Execute in the shell.
    Execute(&'a str),
}

/// Routes shell commands and owns the shell producer.
pub struct ShellService {
    welcome_command: String,
    welcome_text: String,
    chat_prefix: String,
    /// `None` when command execution is disabled.
    executor: Option<Arc<dyn Producer>>,
}

impl ShellService {
    pub fn new(config: &ShellConfig, executor: Option<Arc<dyn Producer>>) -> Self {
        Self {
            welcome_command: config.welcome_command.clone(),
            welcome_text: config.welcome_message(),
            chat_prefix: config.chat_prefix.clone(),
            executor,
        }
    }

    pub fn welcome_text(&self) -> &str {
        &self.welcome_text
    }

    pub fn executor(&self) -> Option<&dyn Producer> {
        self.executor.as_deref()
    }

    /// Classify a command. Surrounding whitespace is ignored.
    pub fn dispatch<'a>(&self, command: &'a str) -> ShellAction<'a> {
        let command = command.trim();
        if command.is_empty() {
            return ShellAction::Noop;
        }
        if command == self.welcome_command {
            return ShellAction::Welcome;
        }
        if let Some(question) = command
            .strip_prefix(self.chat_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(' '))
        {
            let question = question.trim();
            if !question.is_empty() {
                return ShellAction::Chat(question);
            }
        }
        ShellAction::Execute(command)
    }
}
