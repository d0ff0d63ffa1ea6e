// Tracing initialization with a configurable log level.
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_from(config: &LoggingConfig) {
    init_tracing_with_level(&config.level);
}

pub fn init_tracing_with_level(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer())
        .try_init();
}

// Prefer RUST_LOG from env, otherwise use provided level string.
fn env_filter(level: &str) -> EnvFilter {
    std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing_from(&LoggingConfig::default());
        init_tracing_with_level("debug");
        tracing::info!("tracing initialised twice");
    }
}
