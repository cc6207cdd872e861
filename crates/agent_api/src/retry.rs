use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

/// Default shared retry/recovery budget per logical turn.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base delay before the first retry.
pub const BASE_DELAY_MS: u64 = 1000;
/// Error text the server returns when an approval reply has nothing to apply to.
pub const APPROVAL_DESYNC_PATTERN: &str = "no tool call is currently awaiting approval";

fn retryable_status_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused")
            .expect("retry regex must compile")
    })
}

fn provider_error_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect",
            r"|connection.?(refused|reset|error|closed)|econnreset|etimedout",
            r"|timed?.?out|internal.?server.?error|bad.?gateway|gateway.?time.?out",
            r"|api.?error|provider.?(error|unavailable)|temporarily.?unavailable",
            r"|\b(429|500|502|503|504|529)\b",
        ))
        .expect("provider error regex must compile")
    })
}

/// Error text retry policy for transient failures and retryable statuses.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504) || retryable_status_regex().is_match(error_text)
}

/// Best-effort classification of a generic run error as an LLM provider or
/// network failure. The pattern list is known to be incomplete; a miss means
/// the error is treated as non-retriable.
pub fn is_provider_error(error_text: &str) -> bool {
    provider_error_regex().is_match(error_text)
}

/// Returns true when `error_text` reports that no approval is pending
/// server-side, i.e. the client's approval state is out of sync.
pub fn is_approval_desync(error_text: &str) -> bool {
    error_text
        .to_ascii_lowercase()
        .contains(APPROVAL_DESYNC_PATTERN)
}

/// Exponential backoff for the n-th retry (1-based): 1s, 2s, 4s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30);
    Duration::from_millis(BASE_DELAY_MS.saturating_mul(2u64.saturating_pow(exponent)))
}
