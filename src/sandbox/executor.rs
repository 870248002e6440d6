// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandboxed executor.
//!
//! Owns environments and in-flight executions. Every `execute` enforces a
//! hard wall-clock deadline, polls tracked memory on a monitor tick, and
//! captures an ordered log stream. Concurrency is bounded per environment
//! kind; terminate is idempotent.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};

use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::tools::{ToolHandler, ToolOutput};
use crate::types::{ExecutionEnvironment, ResourceLimits};

use super::engine::{SandboxPolicy, ScriptEngine, ScriptScope};
use super::{ExecutionError, ExecutionResult, ExecutionStatus};

struct EnvironmentState {
    kind: ExecutionEnvironment,
    limits: ResourceLimits,
}

struct ExecutionEntry {
    environment_id: String,
    status: ExecutionStatus,
    cancel: Arc<watch::Sender<bool>>,
    started_at: DateTime<Utc>,
}

/// Summary of one tracked execution.
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub execution_id: String,
    pub environment_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
}

/// Builder for a [`SandboxExecutor`].
pub struct SandboxExecutorBuilder {
    policy: SandboxPolicy,
    default_limits: ResourceLimits,
    engines: HashMap<ExecutionEnvironment, Arc<dyn ScriptEngine>>,
    monitor_interval: Duration,
}

impl SandboxExecutorBuilder {
    /// Create a builder with default policy and limits.
    pub fn new() -> Self {
        Self {
            policy: SandboxPolicy::default(),
            default_limits: ResourceLimits::default(),
            engines: HashMap::new(),
            monitor_interval: Duration::from_secs(1),
        }
    }

    /// Set the security policy consulted before every execution.
    pub fn with_policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the limits applied when an environment is created without any.
    pub fn with_default_limits(mut self, limits: ResourceLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Register the engine evaluating code for an environment kind.
    pub fn with_engine(
        mut self,
        kind: ExecutionEnvironment,
        engine: Arc<dyn ScriptEngine>,
    ) -> Self {
        self.engines.insert(kind, engine);
        self
    }

    /// Set the memory monitor poll interval. Must be at most one second.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval.min(Duration::from_secs(1));
        self
    }

    /// Build the executor.
    pub fn build(self) -> SandboxExecutor {
        SandboxExecutor {
            policy: self.policy,
            default_limits: self.default_limits,
            engines: self.engines,
            monitor_interval: self.monitor_interval,
            environments: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            kind_slots: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SandboxExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Isolated execution of dynamic code with memory/time caps.
pub struct SandboxExecutor {
    policy: SandboxPolicy,
    default_limits: ResourceLimits,
    engines: HashMap<ExecutionEnvironment, Arc<dyn ScriptEngine>>,
    monitor_interval: Duration,
    environments: Mutex<HashMap<String, Arc<EnvironmentState>>>,
    executions: Mutex<HashMap<String, ExecutionEntry>>,
    kind_slots: Mutex<HashMap<ExecutionEnvironment, Arc<Semaphore>>>,
}

impl SandboxExecutor {
    /// Start building an executor.
    pub fn builder() -> SandboxExecutorBuilder {
        SandboxExecutorBuilder::new()
    }

    /// Create an environment of the given kind.
    pub fn create_environment(
        &self,
        kind: ExecutionEnvironment,
        limits: Option<ResourceLimits>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(EnvironmentState {
            kind,
            limits: limits.unwrap_or(self.default_limits),
        });
        self.environments
            .lock()
            .expect("environment lock poisoned")
            .insert(id.clone(), state);
        debug!(environment = %id, kind = %kind.as_str(), "Created sandbox environment");
        id
    }

    /// Destroy an environment, cancelling any of its in-flight executions.
    pub fn destroy_environment(&self, environment_id: &str) -> Result<(), SandboxError> {
        let removed = self
            .environments
            .lock()
            .expect("environment lock poisoned")
            .remove(environment_id);
        if removed.is_none() {
            return Err(SandboxError::NotFound(environment_id.to_string()));
        }

        let mut executions = self.executions.lock().expect("execution lock poisoned");
        executions.retain(|_, entry| {
            if entry.environment_id == environment_id {
                let _ = entry.cancel.send(true);
                false
            } else {
                true
            }
        });
        debug!(environment = %environment_id, "Destroyed sandbox environment");
        Ok(())
    }

    /// Execute a code snippet inside an environment.
    ///
    /// The security policy is consulted first; violations fail before any
    /// code runs. The environment remains usable after a failed execution.
    pub async fn execute(
        &self,
        environment_id: &str,
        code: &str,
        context: serde_json::Value,
    ) -> Result<ExecutionResult, SandboxError> {
        self.policy.check(code)?;

        let env = self
            .environments
            .lock()
            .expect("environment lock poisoned")
            .get(environment_id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(environment_id.to_string()))?;

        let engine = self.engines.get(&env.kind).cloned().ok_or_else(|| {
            SandboxError::ExecutionFailed(format!(
                "no engine configured for '{}' environments",
                env.kind.as_str()
            ))
        })?;

        let semaphore = self.kind_slot(env.kind, env.limits.max_concurrent_executions);
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::ExecutionFailed("executor is shutting down".to_string()))?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel = Arc::new(cancel_tx);
        let scope = Arc::new(ScriptScope::new(
            env.kind,
            context,
            env.limits,
            cancel_rx,
        ));

        self.executions.lock().expect("execution lock poisoned").insert(
            execution_id.clone(),
            ExecutionEntry {
                environment_id: environment_id.to_string(),
                status: ExecutionStatus::Running,
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );

        // Memory monitor: polls tracked usage and cancels on breach.
        let memory_exceeded = Arc::new(AtomicBool::new(false));
        let monitor = {
            let scope = scope.clone();
            let memory_exceeded = memory_exceeded.clone();
            let cancel = cancel.clone();
            let limit_mb = env.limits.max_memory_mb;
            let tick = self.monitor_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                loop {
                    interval.tick().await;
                    if scope.memory_used_mb() > limit_mb {
                        memory_exceeded.store(true, Ordering::SeqCst);
                        let _ = cancel.send(true);
                        break;
                    }
                }
            })
        };

        let deadline = Duration::from_millis(env.limits.max_execution_time_ms);
        let start = Instant::now();
        let outcome = tokio::time::timeout(deadline, engine.eval(code, &scope)).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        monitor.abort();

        let memory_hit = memory_exceeded.load(Ordering::SeqCst);
        let (value, error): (Option<serde_json::Value>, Option<SandboxError>) = match outcome {
            Err(_) => {
                let _ = cancel.send(true);
                (None, Some(SandboxError::Timeout(env.limits.max_execution_time_ms)))
            }
            Ok(Ok(value)) => {
                if memory_hit {
                    (None, Some(self.memory_error(&scope, env.limits.max_memory_mb)))
                } else if *cancel.borrow() {
                    (None, Some(SandboxError::Cancelled))
                } else {
                    (Some(value), None)
                }
            }
            Ok(Err(SandboxError::Cancelled)) => {
                if memory_hit {
                    (None, Some(self.memory_error(&scope, env.limits.max_memory_mb)))
                } else {
                    (None, Some(SandboxError::Cancelled))
                }
            }
            Ok(Err(e)) => (None, Some(e)),
        };

        let status = match error {
            None => ExecutionStatus::Completed,
            Some(SandboxError::Cancelled) => ExecutionStatus::Cancelled,
            Some(_) => ExecutionStatus::Failed,
        };
        if let Some(entry) = self
            .executions
            .lock()
            .expect("execution lock poisoned")
            .get_mut(&execution_id)
        {
            entry.status = status;
        }

        if let Some(ref e) = error {
            warn!(execution = %execution_id, code = e.code(), "Sandboxed execution failed");
        }

        Ok(ExecutionResult {
            execution_id,
            success: error.is_none(),
            value,
            error: error.map(|e| ExecutionError {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
            logs: scope.take_logs(),
            duration_ms,
            memory_peak_mb: scope.memory_peak_mb(),
        })
    }

    /// Run a tool handler under an environment kind's caps.
    ///
    /// Used for tools that declare a sandbox environment: applies the
    /// per-kind concurrency bound, the wall-clock deadline, and cooperative
    /// cancellation. Handler-level failures are folded into
    /// `EXECUTION_ERROR`.
    pub async fn run_handler(
        &self,
        kind: ExecutionEnvironment,
        limits: ResourceLimits,
        handler: Arc<dyn ToolHandler>,
        input: serde_json::Value,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ToolOutput, SandboxError> {
        let semaphore = self.kind_slot(kind, limits.max_concurrent_executions);
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::ExecutionFailed("executor is shutting down".to_string()))?;

        let deadline = Duration::from_millis(limits.max_execution_time_ms);
        let work = tokio::time::timeout(deadline, handler.execute(input));

        let outcome = match cancel {
            Some(mut cancel) => {
                let cancelled = async move {
                    // A dropped sender means no cancellation will ever arrive.
                    if *cancel.borrow() {
                        return;
                    }
                    loop {
                        match cancel.changed().await {
                            Ok(()) => {
                                if *cancel.borrow() {
                                    return;
                                }
                            }
                            Err(_) => std::future::pending().await,
                        }
                    }
                };
                tokio::select! {
                    outcome = work => outcome,
                    _ = cancelled => return Err(SandboxError::Cancelled),
                }
            }
            None => work.await,
        };

        match outcome {
            Err(_) => Err(SandboxError::Timeout(limits.max_execution_time_ms)),
            Ok(Ok(output)) => Ok(output),
            Ok(Err(tool_err)) => Err(SandboxError::ExecutionFailed(tool_err.to_string())),
        }
    }

    /// Cancel an execution. Idempotent; unknown ids are a no-op.
    pub fn terminate(&self, execution_id: &str) -> Result<(), SandboxError> {
        let mut executions = self.executions.lock().expect("execution lock poisoned");
        if let Some(entry) = executions.get_mut(execution_id) {
            let _ = entry.cancel.send(true);
            if !entry.status.is_terminal() {
                entry.status = ExecutionStatus::Cancelled;
            }
        }
        Ok(())
    }

    /// Status of a tracked execution.
    pub fn status(&self, execution_id: &str) -> Result<ExecutionStatus, SandboxError> {
        let executions = self.executions.lock().expect("execution lock poisoned");
        executions
            .get(execution_id)
            .map(|entry| entry.status)
            .ok_or_else(|| SandboxError::NotFound(execution_id.to_string()))
    }

    /// All tracked executions, newest first.
    pub fn list_executions(&self) -> Vec<ExecutionInfo> {
        let executions = self.executions.lock().expect("execution lock poisoned");
        let mut infos: Vec<ExecutionInfo> = executions
            .iter()
            .map(|(id, entry)| ExecutionInfo {
                execution_id: id.clone(),
                environment_id: entry.environment_id.clone(),
                status: entry.status,
                started_at: entry.started_at,
            })
            .collect();
        infos.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        infos
    }

    fn memory_error(&self, scope: &ScriptScope, limit_mb: u64) -> SandboxError {
        SandboxError::MemoryLimitExceeded {
            used_mb: scope.memory_peak_mb(),
            limit_mb,
        }
    }

    fn kind_slot(&self, kind: ExecutionEnvironment, capacity: usize) -> Arc<Semaphore> {
        let mut slots = self.kind_slots.lock().expect("slot lock poisoned");
        slots
            .entry(kind)
            .or_insert_with(|| Arc::new(Semaphore::new(capacity.max(1))))
            .clone()
    }
}
