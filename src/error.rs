// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Crucible runtime.
//!
//! This module provides strongly-typed errors for each subsystem, using
//! `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation. Every error exposes a stable `code()` string so failures
//! can be reported through typed results rather than exceptions.

use thiserror::Error;

use crate::schema::ValidationError;

/// Errors surfaced by tool handlers.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ToolError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "TOOL_NOT_FOUND",
            Self::InvalidInput(_) | Self::MissingParameter(_) => "VALIDATION_FAILED",
            Self::ExecutionFailed(_) => "TOOL_ERROR",
            Self::Timeout(_) => "EXECUTION_TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Check if this error should be reported back for a retry with
    /// different parameters.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Errors from tool registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool already registered: {0}")]
    AlreadyExists(String),

    #[error("Tool '{id}' failed validation with {} error(s)", errors.len())]
    ValidationFailed {
        id: String,
        errors: Vec<ValidationError>,
    },
}

impl RegistryError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
        }
    }
}

/// Errors from the sandboxed executor.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Unknown environment or execution: {0}")]
    NotFound(String),

    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    #[error("Memory limit exceeded: {used_mb}MB used, {limit_mb}MB allowed")]
    MemoryLimitExceeded { used_mb: u64, limit_mb: u64 },

    #[error("Security policy violation: {0}")]
    PolicyViolation(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Concurrent execution limit reached: {0}")]
    ConcurrencyLimit(usize),

    #[error("Execution cancelled")]
    Cancelled,
}

impl SandboxError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Timeout(_) => "EXECUTION_TIMEOUT",
            Self::MemoryLimitExceeded { .. } => "MEMORY_LIMIT_EXCEEDED",
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
            Self::ExecutionFailed(_) => "EXECUTION_ERROR",
            Self::ConcurrencyLimit(_) => "RESOURCE_LIMIT_EXCEEDED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Check if the environment remains usable after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}

/// Errors from the security gate.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Rate limited: {principal} (retry after {retry_after_ms}ms)")]
    RateLimited {
        principal: String,
        retry_after_ms: u64,
    },

    #[error("Content blocked by filter: {0}")]
    ContentBlocked(String),

    #[error("Resource limits exceeded: {0}")]
    ResourceLimit(String),

    #[error("Category not allowed: {0}")]
    CategoryDenied(String),

    #[error("Tool call budget exhausted ({0} allowed)")]
    BudgetExhausted(usize),
}

impl SecurityError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::ContentBlocked(_) => "POLICY_VIOLATION",
            Self::ResourceLimit(_) | Self::BudgetExhausted(_) => "RESOURCE_LIMIT_EXCEEDED",
            Self::CategoryDenied(_) => "POLICY_VIOLATION",
        }
    }
}

/// Errors from the execution planner.
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Plan output could not be parsed: {0}")]
    InvalidJson(String),

    #[error("Plan dependency cycle involving '{0}'")]
    DependencyCycle(String),
}

impl PlannerError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::DependencyCycle(_) => "VALIDATION_FAILED",
        }
    }
}

/// Errors from the conversation orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Maximum iterations exceeded: {0}")]
    MaxIterationsExceeded(u32),

    #[error("Turn cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Stable error code for the failure taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConversationNotFound(_) => "NOT_FOUND",
            Self::Planner(e) => e.code(),
            Self::Security(e) => e.code(),
            Self::Sandbox(e) => e.code(),
            Self::MaxIterationsExceeded(_) => "RESOURCE_LIMIT_EXCEEDED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

/// Convert any error type that implements std::error::Error to an anyhow::Error.
pub fn to_anyhow<E: std::error::Error + Send + Sync + 'static>(err: E) -> anyhow::Error {
    anyhow::Error::new(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_codes() {
        assert_eq!(ToolError::Timeout(500).code(), "EXECUTION_TIMEOUT");
        assert_eq!(ToolError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            ToolError::ExecutionFailed("boom".to_string()).code(),
            "TOOL_ERROR"
        );
    }

    #[test]
    fn test_registry_error_codes() {
        assert_eq!(
            RegistryError::AlreadyExists("web-search".to_string()).code(),
            "ALREADY_EXISTS"
        );
        assert_eq!(RegistryError::NotFound("x".to_string()).code(), "NOT_FOUND");
    }

    #[test]
    fn test_sandbox_error_codes() {
        assert_eq!(SandboxError::Timeout(30_000).code(), "EXECUTION_TIMEOUT");
        assert_eq!(
            SandboxError::MemoryLimitExceeded {
                used_mb: 128,
                limit_mb: 64
            }
            .code(),
            "MEMORY_LIMIT_EXCEEDED"
        );
        assert!(SandboxError::Timeout(1).is_recoverable());
        assert!(!SandboxError::NotFound("env".to_string()).is_recoverable());
    }

    #[test]
    fn test_security_error_codes() {
        let err = SecurityError::RateLimited {
            principal: "user-1".to_string(),
            retry_after_ms: 1000,
        };
        assert_eq!(err.code(), "RATE_LIMITED");
        assert_eq!(
            SecurityError::CategoryDenied("execution".to_string()).code(),
            "POLICY_VIOLATION"
        );
    }

    #[test]
    fn test_orchestrator_error_wrapping() {
        let err: OrchestratorError = SandboxError::Cancelled.into();
        assert_eq!(err.code(), "CANCELLED");

        let err: OrchestratorError = SecurityError::BudgetExhausted(3).into();
        assert_eq!(err.code(), "RESOURCE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_error_display() {
        let err = SandboxError::MemoryLimitExceeded {
            used_mb: 128,
            limit_mb: 64,
        };
        let display = format!("{}", err);
        assert!(display.contains("128"));
        assert!(display.contains("64"));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }
}
