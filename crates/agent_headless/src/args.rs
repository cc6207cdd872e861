use std::path::PathBuf;

use clap::Parser;

use crate::config::{Backend, InputFormat, OutputFormat, PermissionMode};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "agent-headless",
    version,
    about = "Run remote coding-agent turns without a terminal UI"
)]
pub struct Cli {
    /// Prompt for a single turn. Without it, user messages are read from stdin.
    #[arg(short = 'p', long = "prompt")]
    pub prompt: Option<String>,

    /// Prompt given positionally; ignored when --prompt is set.
    #[arg(value_name = "PROMPT")]
    pub positional_prompt: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    #[arg(long, value_enum, default_value_t = InputFormat::Text)]
    pub input_format: InputFormat,

    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    #[arg(long, env = "AGENT_BASE_URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, value_enum, env = "AGENT_HEADLESS_BACKEND", default_value_t = Backend::Http)]
    pub backend: Backend,

    /// Retries plus approval recoveries allowed per turn.
    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Rules such as `Read` or `Bash(git status*)`. Comma separated.
    #[arg(long, value_delimiter = ',')]
    pub allowed_tools: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub disallowed_tools: Vec<String>,

    #[arg(long, value_enum)]
    pub permission_mode: Option<PermissionMode>,

    /// JSON config file.
    #[arg(long, env = "AGENT_HEADLESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory local tools may touch. Defaults to the current directory.
    #[arg(long)]
    pub workspace: Option<PathBuf>,
}

impl Cli {
    pub fn prompt(&self) -> Option<&str> {
        self.prompt
            .as_deref()
            .or(self.positional_prompt.as_deref())
            .filter(|prompt| !prompt.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stream_json_flags_and_tool_lists() {
        let cli = Cli::try_parse_from([
            "agent-headless",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--allowed-tools",
            "Read,Bash(git status*)",
            "--permission-mode",
            "accept-edits",
            "--backend",
            "mock",
        ])
        .expect("flags should parse");

        assert_eq!(cli.output_format, OutputFormat::StreamJson);
        assert_eq!(cli.input_format, InputFormat::StreamJson);
        assert_eq!(cli.allowed_tools, vec!["Read", "Bash(git status*)"]);
        assert_eq!(cli.permission_mode, Some(PermissionMode::AcceptEdits));
        assert_eq!(cli.backend, Backend::Mock);
        assert_eq!(cli.prompt(), None);
    }

    #[test]
    fn explicit_prompt_wins_over_positional() {
        let cli = Cli::try_parse_from(["agent-headless", "-p", "first", "second"])
            .expect("flags should parse");
        assert_eq!(cli.prompt(), Some("first"));

        let cli = Cli::try_parse_from(["agent-headless", "only"]).expect("flags should parse");
        assert_eq!(cli.prompt(), Some("only"));
    }
}
