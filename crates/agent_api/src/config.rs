use std::collections::BTreeMap;
use std::time::Duration;

/// Default base URL for the hosted agent service.
pub const DEFAULT_BASE_URL: &str = "https://api.letta.com";

/// Transport configuration for remote agent requests.
#[derive(Debug, Clone)]
pub struct AgentApiConfig {
    /// Base URL without the `/v1` suffix.
    pub base_url: String,
    /// Agent that receives every turn.
    pub agent_id: String,
    /// Bearer token passed to `Authorization`; local servers may omit it.
    pub api_key: Option<String>,
    /// Optional `User-Agent` override.
    pub user_agent: Option<String>,
    /// Additional headers merged into request headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Optional request timeout applied to non-streaming calls.
    pub timeout: Option<Duration>,
}

impl Default for AgentApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            agent_id: String::new(),
            api_key: None,
            user_agent: None,
            extra_headers: BTreeMap::new(),
            timeout: None,
        }
    }
}

impl AgentApiConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    /// Base URL with trailing slashes and a trailing `/v1` removed.
    pub fn normalized_base_url(&self) -> String {
        let base = if self.base_url.trim().is_empty() {
            DEFAULT_BASE_URL
        } else {
            self.base_url.trim()
        };

        let trimmed = base.trim_end_matches('/');
        trimmed
            .strip_suffix("/v1")
            .unwrap_or(trimmed)
            .to_string()
    }

    pub fn messages_stream_url(&self) -> String {
        format!(
            "{}/v1/agents/{}/messages/stream",
            self.normalized_base_url(),
            self.agent_id.trim()
        )
    }

    pub fn run_url(&self, run_id: &str) -> String {
        format!("{}/v1/runs/{}", self.normalized_base_url(), run_id.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization_strips_slashes_and_version_suffix() {
        let config = AgentApiConfig::new("agent-1").with_base_url("http://localhost:8283/v1/");
        assert_eq!(config.normalized_base_url(), "http://localhost:8283");
        assert_eq!(
            config.messages_stream_url(),
            "http://localhost:8283/v1/agents/agent-1/messages/stream"
        );
        assert_eq!(config.run_url("run-7"), "http://localhost:8283/v1/runs/run-7");
    }

    #[test]
    fn blank_base_url_falls_back_to_default() {
        let config = AgentApiConfig::new("agent-1").with_base_url("   ");
        assert_eq!(config.normalized_base_url(), DEFAULT_BASE_URL);
    }
}
