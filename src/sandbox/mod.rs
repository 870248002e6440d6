// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandboxed code execution.
//!
//! This module runs opaque code snippets (and sandbox-declared tool
//! handlers) under memory, time and capability caps:
//!
//! - [`SandboxExecutor`] - environments, execution lifecycle, limits,
//!   cancellation
//! - [`ScriptEngine`] - the evaluation seam; actual interpreters are leaf
//!   call-outs supplied by the embedder
//! - [`ScriptScope`] - the handle an engine uses to log, report memory and
//!   observe cancellation
//!
//! Each execution is conceptually a single cooperative task: yield points
//! exist at I/O, timers, and explicit [`ScriptScope::checkpoint`] calls.
//! Parallelism is bounded by `maxConcurrentExecutions` per environment
//! kind.

pub mod engine;
pub mod executor;

pub use engine::{SandboxPolicy, ScriptEngine, ScriptScope};
pub use executor::{ExecutionInfo, SandboxExecutor, SandboxExecutorBuilder};

pub use crate::types::ExecutionEnvironment;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a captured log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

/// One entry in an execution's captured log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create a log entry stamped with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Check whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Error recorded on a failed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
}

/// Result of one sandboxed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub logs: Vec<LogEntry>,
    pub duration_ms: u64,
    pub memory_peak_mb: u64,
}

impl ExecutionResult {
    /// Format the result for display.
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if self.success {
            parts.push(format!("completed in {}ms", self.duration_ms));
        } else if let Some(ref error) = self.error {
            parts.push(format!("{} after {}ms: {}", error.code, self.duration_ms, error.message));
        }
        if !self.logs.is_empty() {
            parts.push(format!("{} log entries", self.logs.len()));
        }
        if self.memory_peak_mb > 0 {
            parts.push(format!("peak {}MB", self.memory_peak_mb));
        }
        parts.join(", ")
    }
}
