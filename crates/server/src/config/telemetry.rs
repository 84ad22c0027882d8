use serde::Deserialize;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
///
/// # Example
///
/// ```toml
/// [telemetry]
/// format = "json"
/// ```
///
/// The filter itself comes from `RUST_LOG` (default `info`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub format: LogFormat,
}
