use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SCHOOLD_LOG";

/// stdout carries the protocol, so logs go to stderr only.
pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("schoold=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}
