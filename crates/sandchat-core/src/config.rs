//! Configuration resolution for Sandchat.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Settings file (`--config`, or `$XDG_CONFIG_HOME/sandchat/settings.json`)
//! 3. Environment variables and CLI flags (applied by the binary)
//!
//! Every section and field is optional in the settings file; missing values
//! fall back to their defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete Sandchat configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub shell: ShellConfig,
}

/// HTTP listener and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// Which producer answers chat requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatBackend {
    /// Hosted Messages API over HTTP.
    #[default]
    Api,
    /// Command-line AI tool spawned per request.
    Cli,
}

impl FromStr for ChatBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "cli" => Ok(Self::Cli),
            other => Err(Error::Config(format!(
                "unknown chat backend '{other}' (expected 'api' or 'cli')"
            ))),
        }
    }
}

/// Chat producer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub backend: ChatBackend,
    pub model: String,
    pub max_tokens: u32,
    pub api_base_url: String,
    pub api_version: String,
    /// Path to the command-line AI tool (used by the `cli` backend).
    pub cli_bin: PathBuf,
    /// Arguments placed before the prompt argument.
    pub cli_args: Vec<String>,
    /// Wall-clock bound for non-streaming requests.
    pub timeout_secs: u64,
    /// Optional file replacing the built-in persona.
    pub persona_path: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend: ChatBackend::Api,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 1024,
            api_base_url: "https://api.anthropic.com".to_string(),
            api_version: "2023-06-01".to_string(),
            cli_bin: PathBuf::from("claude"),
            cli_args: vec!["-p".to_string()],
            timeout_secs: 300,
            persona_path: None,
        }
    }
}

/// Shell endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Whether caller-supplied commands are executed at all.
    pub enabled: bool,
    pub program: PathBuf,
    /// Account the shell runs as. `None` keeps the server's own identity.
    pub user: Option<String>,
    pub working_directory: PathBuf,
    /// `PATH` given to the shell's otherwise empty environment.
    pub path: String,
    pub welcome_command: String,
    pub welcome_text: Option<String>,
    /// Commands starting with `<chat_prefix> ` are routed to chat.
    pub chat_prefix: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: PathBuf::from("bash"),
            user: None,
            working_directory: std::env::temp_dir(),
            path: "/usr/local/bin:/usr/bin:/bin".to_string(),
            welcome_command: "welcome".to_string(),
            welcome_text: None,
            chat_prefix: "tom".to_string(),
        }
    }
}

impl ShellConfig {
    /// Text returned for the welcome command.
    pub fn welcome_message(&self) -> String {
        self.welcome_text.clone().unwrap_or_else(|| {
            format!(
                "Welcome to the sandbox.\n\
                 Type `{} <question>` to chat, or run any shell command.\n",
                self.chat_prefix
            )
        })
    }
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the global settings file is
/// read when present and defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_config_file(path);
    }
    match global_config_path() {
        Some(global) if global.exists() => load_config_file(&global),
        _ => Ok(Config::default()),
    }
}

/// Path of the global settings file.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sandchat").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}
