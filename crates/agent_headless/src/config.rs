//! Runtime configuration: CLI flags layered over an optional JSON file.
//!
//! File shape (every field optional, unknown fields rejected):
//!
//! ```json
//! {
//!   "base_url": "http://localhost:8283",
//!   "agent_id": "agent-123",
//!   "timeout_sec": 30,
//!   "max_retries": 3,
//!   "queue_capacity": 64,
//!   "permissions": {
//!     "allow": ["Read", "Bash(git status*)"],
//!     "deny": ["Bash(rm*)"],
//!     "ask": [],
//!     "mode": "default"
//!   }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use thiserror::Error;
use turn_engine::DEFAULT_QUEUE_CAPACITY;

use crate::args::Cli;
use crate::permissions::PermissionRule;

pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    StreamJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    Text,
    StreamJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Http,
    Mock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Read-only tools run; everything else asks.
    #[default]
    Default,
    /// File edits run too.
    AcceptEdits,
    /// Everything runs unless a deny rule matches.
    BypassPermissions,
    /// Read-only tools run; writes and commands are denied.
    Plan,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept-edits",
            Self::BypassPermissions => "bypass-permissions",
            Self::Plan => "plan",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("agent id is required for the http backend (use --agent-id or AGENT_ID)")]
    MissingAgentId,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub agent_id: Option<String>,
    pub timeout_sec: Option<u64>,
    pub max_retries: Option<u32>,
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub permissions: FilePermissions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePermissions {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub ask: Vec<String>,
    pub mode: Option<PermissionMode>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSettings {
    pub allow: Vec<PermissionRule>,
    pub deny: Vec<PermissionRule>,
    pub ask: Vec<PermissionRule>,
    pub mode: PermissionMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessConfig {
    pub backend: Backend,
    pub base_url: Option<String>,
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub queue_capacity: usize,
    pub output_format: OutputFormat,
    pub input_format: InputFormat,
    pub permissions: PermissionSettings,
    pub prompt: Option<String>,
    pub workspace: Option<PathBuf>,
}

impl HeadlessConfig {
    /// Loads the config file named by `cli` (if any) and applies the flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    /// Flags override file values; file values override defaults.
    pub fn merge(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        };

        if file.timeout_sec == Some(0) {
            return Err(ConfigError::Invalid("timeout_sec must be > 0".to_string()));
        }

        let max_retries = cli
            .max_retries
            .or(file.max_retries)
            .unwrap_or(turn_engine::OrchestratorConfig::default().max_retries);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_retries must be <= {MAX_RETRIES_LIMIT}; got {max_retries}"
            )));
        }

        let queue_capacity = cli
            .queue_capacity
            .or(file.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".to_string()));
        }

        if cli.input_format == InputFormat::StreamJson && cli.output_format != OutputFormat::StreamJson {
            return Err(ConfigError::Invalid(
                "--input-format stream-json requires --output-format stream-json".to_string(),
            ));
        }

        let agent_id = non_empty(&cli.agent_id).or_else(|| non_empty(&file.agent_id));
        if cli.backend == Backend::Http && agent_id.is_none() {
            return Err(ConfigError::MissingAgentId);
        }

        let mut allow = parse_rules(&file.permissions.allow)?;
        allow.extend(parse_rules(&cli.allowed_tools)?);
        let mut deny = parse_rules(&file.permissions.deny)?;
        deny.extend(parse_rules(&cli.disallowed_tools)?);

        Ok(Self {
            backend: cli.backend,
            base_url: non_empty(&cli.base_url).or_else(|| non_empty(&file.base_url)),
            agent_id,
            api_key: non_empty(&cli.api_key),
            timeout: file.timeout_sec.map(Duration::from_secs),
            max_retries,
            queue_capacity,
            output_format: cli.output_format,
            input_format: cli.input_format,
            permissions: PermissionSettings {
                allow,
                deny,
                ask: parse_rules(&file.permissions.ask)?,
                mode: cli
                    .permission_mode
                    .or(file.permissions.mode)
                    .unwrap_or_default(),
            },
            prompt: cli.prompt().map(ToString::to_string),
            workspace: cli.workspace.clone(),
        })
    }
}

fn parse_rules(raw: &[String]) -> Result<Vec<PermissionRule>, ConfigError> {
    raw.iter()
        .map(|rule| rule.trim())
        .filter(|rule| !rule.is_empty())
        .map(|rule| PermissionRule::parse(rule).map_err(ConfigError::Invalid))
        .collect()
}
