//! Tracing subscriber initialization
//!
//! Structured logs go to stdout through `tracing-subscriber`, filtered by
//! `RUST_LOG` when set and by a crate-level default otherwise.

use libro_core::ConfigError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "libro_engine=debug,libro_llm=info,info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(LogFormat::Json),
            "pretty" | "text" => Some(LogFormat::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `LIBRO_LOG_FORMAT`, json unless set to pretty
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Service name attached to the startup event
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: std::env::var("LIBRO_LOG_FORMAT")
                .ok()
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Json),
            default_filter: DEFAULT_FILTER.to_string(),
            service_name: std::env::var("LIBRO_SERVICE_NAME")
                .unwrap_or_else(|_| "libro-engine".to_string()),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call fails with
/// `ConfigError::TelemetryInit` because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| ConfigError::TelemetryInit {
        reason: e.to_string(),
    })?;

    tracing::info!(
        service_name = config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );

    Ok(())
}
