use tracing_subscriber::EnvFilter;

/// Env var holding the tracing filter, e.g. `agent_headless=debug,turn_engine=info`.
pub const LOG_ENV_VAR: &str = "AGENT_HEADLESS_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs a stderr subscriber so stdout stays a clean protocol channel.
/// Calling it again is a no-op.
pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
