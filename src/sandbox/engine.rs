// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Script engine seam and execution scope.
//!
//! The executor never interprets code itself. Evaluation is delegated to a
//! [`ScriptEngine`] registered per environment kind; the engine receives a
//! [`ScriptScope`] through which it logs, reports memory usage, and observes
//! cooperative cancellation.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use tracing::warn;

use crate::error::SandboxError;
use crate::types::{ExecutionEnvironment, ResourceLimits};

use super::{LogEntry, LogLevel};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Handle given to a [`ScriptEngine`] for the duration of one execution.
pub struct ScriptScope {
    environment: ExecutionEnvironment,
    context: serde_json::Value,
    limits: ResourceLimits,
    logs: Mutex<Vec<LogEntry>>,
    memory_bytes: AtomicU64,
    memory_peak_bytes: AtomicU64,
    cancelled: watch::Receiver<bool>,
}

impl ScriptScope {
    pub(crate) fn new(
        environment: ExecutionEnvironment,
        context: serde_json::Value,
        limits: ResourceLimits,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            environment,
            context,
            limits,
            logs: Mutex::new(Vec::new()),
            memory_bytes: AtomicU64::new(0),
            memory_peak_bytes: AtomicU64::new(0),
            cancelled,
        }
    }

    /// Environment kind this execution runs in.
    pub fn environment(&self) -> ExecutionEnvironment {
        self.environment
    }

    /// Caller-supplied execution context.
    pub fn context(&self) -> &serde_json::Value {
        &self.context
    }

    /// Resource caps for this execution.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Append an entry to the captured log stream.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let mut logs = self.logs.lock().expect("scope log lock poisoned");
        logs.push(LogEntry::new(level, message));
    }

    /// Shorthand for an info-level entry.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Record an allocation. The memory monitor polls the resulting total.
    pub fn track_allocation(&self, bytes: u64) {
        let total = self.memory_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.memory_peak_bytes.fetch_max(total, Ordering::Relaxed);
    }

    /// Record a release of previously tracked memory.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .memory_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Currently tracked memory, in whole megabytes (rounded up).
    pub fn memory_used_mb(&self) -> u64 {
        self.memory_bytes.load(Ordering::Relaxed).div_ceil(BYTES_PER_MB)
    }

    /// Peak tracked memory, in whole megabytes (rounded up).
    pub fn memory_peak_mb(&self) -> u64 {
        self.memory_peak_bytes
            .load(Ordering::Relaxed)
            .div_ceil(BYTES_PER_MB)
    }

    /// Check whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Cooperative yield point. Engines call this between units of work;
    /// returns `Err(Cancelled)` once cancellation is signalled.
    pub fn checkpoint(&self) -> Result<(), SandboxError> {
        if self.is_cancelled() {
            Err(SandboxError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether this environment permits timer built-ins.
    pub fn allows_timers(&self) -> bool {
        !matches!(self.environment, ExecutionEnvironment::Isolated)
    }

    /// Whether this execution may open network connections.
    pub fn allows_network(&self) -> bool {
        self.limits.allow_network && !matches!(self.environment, ExecutionEnvironment::Isolated)
    }

    /// Whether this execution may touch the filesystem.
    pub fn allows_file_system(&self) -> bool {
        self.limits.allow_file_system
            && matches!(
                self.environment,
                ExecutionEnvironment::Direct | ExecutionEnvironment::Worker
            )
    }

    /// Drain the captured logs, in emission order.
    pub(crate) fn take_logs(&self) -> Vec<LogEntry> {
        let mut logs = self.logs.lock().expect("scope log lock poisoned");
        std::mem::take(&mut *logs)
    }
}

/// Evaluates code inside an execution scope.
///
/// Implementations are external collaborators (a JS interpreter, a Python
/// subprocess bridge, a WASM host). They must be cancellation-aware:
/// call [`ScriptScope::checkpoint`] between units of work.
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// Engine name for diagnostics.
    fn name(&self) -> &str;

    /// Evaluate `code` and return its result value.
    async fn eval(&self, code: &str, scope: &ScriptScope) -> Result<serde_json::Value, SandboxError>;
}

/// Security policy consulted before any code runs.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub allow_unsafe_eval: bool,
    pub allow_external_requests: bool,
    pub max_code_length: usize,
    /// Regex patterns; a match rejects the code outright.
    pub blocked_patterns: Vec<String>,
    pub allowed_modules: Vec<String>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            allow_unsafe_eval: false,
            allow_external_requests: false,
            max_code_length: 64 * 1024,
            blocked_patterns: vec![
                r"\beval\s*\(".to_string(),
                r"process\.exit".to_string(),
                r"child_process".to_string(),
            ],
            allowed_modules: Vec::new(),
        }
    }
}

impl SandboxPolicy {
    /// Screen a code snippet. Violations fail before any code runs.
    pub fn check(&self, code: &str) -> Result<(), SandboxError> {
        if code.len() > self.max_code_length {
            return Err(SandboxError::PolicyViolation(format!(
                "code length {} exceeds maximum {}",
                code.len(),
                self.max_code_length
            )));
        }

        for pattern in &self.blocked_patterns {
            if self.allow_unsafe_eval && pattern.contains("eval") {
                continue;
            }
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if re.is_match(code) {
                        return Err(SandboxError::PolicyViolation(format!(
                            "code matches blocked pattern: {pattern}"
                        )));
                    }
                }
                Err(e) => {
                    warn!("Invalid blocked pattern '{}': {}", pattern, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(environment: ExecutionEnvironment) -> (watch::Sender<bool>, ScriptScope) {
        let (tx, rx) = watch::channel(false);
        let scope = ScriptScope::new(environment, json!({}), ResourceLimits::default(), rx);
        (tx, scope)
    }

    #[test]
    fn test_scope_logs_in_order() {
        let (_tx, scope) = scope(ExecutionEnvironment::Worker);
        scope.info("first");
        scope.log(LogLevel::Error, "second");
        let logs = scope.take_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].level, LogLevel::Error);
        // Drained: a second take is empty.
        assert!(scope.take_logs().is_empty());
    }

    #[test]
    fn test_scope_memory_accounting() {
        let (_tx, scope) = scope(ExecutionEnvironment::Worker);
        scope.track_allocation(3 * BYTES_PER_MB);
        assert_eq!(scope.memory_used_mb(), 3);
        scope.track_allocation(BYTES_PER_MB / 2);
        assert_eq!(scope.memory_used_mb(), 4); // rounded up
        scope.release(3 * BYTES_PER_MB);
        assert_eq!(scope.memory_used_mb(), 1);
        assert_eq!(scope.memory_peak_mb(), 4);
    }

    #[test]
    fn test_scope_release_does_not_underflow() {
        let (_tx, scope) = scope(ExecutionEnvironment::Worker);
        scope.release(BYTES_PER_MB);
        assert_eq!(scope.memory_used_mb(), 0);
    }

    #[test]
    fn test_scope_checkpoint_cancellation() {
        let (tx, scope) = scope(ExecutionEnvironment::Worker);
        assert!(scope.checkpoint().is_ok());
        tx.send(true).unwrap();
        assert!(matches!(scope.checkpoint(), Err(SandboxError::Cancelled)));
    }

    #[test]
    fn test_capability_gates() {
        let (_tx, isolated) = scope(ExecutionEnvironment::Isolated);
        assert!(!isolated.allows_timers());
        assert!(!isolated.allows_network());

        let (_tx, worker) = scope(ExecutionEnvironment::Worker);
        assert!(worker.allows_timers());
        // Network still denied: limits default to no network.
        assert!(!worker.allows_network());
    }

    #[test]
    fn test_policy_code_length() {
        let policy = SandboxPolicy {
            max_code_length: 10,
            ..Default::default()
        };
        assert!(policy.check("short").is_ok());
        let err = policy.check("a very long piece of code").unwrap_err();
        assert_eq!(err.code(), "POLICY_VIOLATION");
    }

    #[test]
    fn test_policy_blocked_patterns() {
        let policy = SandboxPolicy::default();
        let err = policy.check("eval('2 + 2')").unwrap_err();
        assert!(matches!(err, SandboxError::PolicyViolation(_)));
        assert!(policy.check("let x = 2 + 2;").is_ok());
    }

    #[test]
    fn test_policy_unsafe_eval_opt_in() {
        let policy = SandboxPolicy {
            allow_unsafe_eval: true,
            ..Default::default()
        };
        assert!(policy.check("eval('2 + 2')").is_ok());
        // Other patterns still apply.
        assert!(policy.check("child_process.spawn('sh')").is_err());
    }
}
