// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for performance monitoring.
//!
//! Lightweight in-process counters, without external dependencies. Suitable
//! for an embedded runtime where a full observability stack is overkill.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Tool execution metrics by tool id.
    tools: RwLock<HashMap<String, ToolMetrics>>,
    /// Generic operation timings (planning, filtering, pruning).
    operations: RwLock<HashMap<String, OperationMetrics>>,
    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a tool execution.
    pub fn record_tool(&self, tool_id: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap();
        let metrics = tools.entry(tool_id.to_string()).or_default();
        metrics.record(duration, success);
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap();
        let metrics = ops.entry(name.to_string()).or_default();
        metrics.record(duration);
    }

    /// Get metrics for a specific tool.
    pub fn tool_metrics(&self, tool_id: &str) -> Option<ToolMetrics> {
        self.tools.read().unwrap().get(tool_id).cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().unwrap().get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self.tools.read().unwrap().clone(),
            operations: self.operations.read().unwrap().clone(),
            uptime: self.uptime(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-tool execution counters.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    pub calls: u64,
    pub errors: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if !success {
            self.errors += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Mean execution time.
    pub fn mean_duration(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.calls as u32
        }
    }

    /// Error rate in [0, 1].
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }
}

/// Generic operation timings.
#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
}

impl OperationMetrics {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
    }
}

/// Snapshot of all collected metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub uptime: Duration,
}
