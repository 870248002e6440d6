// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: structured logging with spans around tool dispatch and
//!   sandbox execution
//! - **Metrics**: lightweight counters and timings, collected in-process
//!
//! Initialize at startup:
//!
//! ```rust,ignore
//! use crucible::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Metrics collection compiles in only with the `telemetry` feature;
//! without it the hooks are zero-cost.

mod init;

#[cfg(feature = "telemetry")]
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig};
