// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization.

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,
    /// Whether to include file/line information.
    pub include_file_line: bool,
    /// Whether to include target module path.
    pub include_target: bool,
    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,
    /// Custom filter directive (overrides default_level).
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Verbose config for development.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_file_line: true,
            ..Default::default()
        }
    }

    /// Quiet config for production embedding.
    pub fn production() -> Self {
        Self {
            default_level: Level::WARN,
            include_target: false,
            ansi_colors: false,
            ..Default::default()
        }
    }
}

/// Install the global tracing subscriber.
///
/// Returns an error if a subscriber is already installed; embedders that
/// bring their own subscriber simply skip this call.
pub fn init_telemetry(config: &TelemetryConfig) -> crate::error::Result<()> {
    let filter = match &config.filter_directive {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string())),
    };

    let layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_presets() {
        assert_eq!(TelemetryConfig::default().default_level, Level::INFO);
        assert_eq!(TelemetryConfig::development().default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::production().default_level, Level::WARN);
    }
}
