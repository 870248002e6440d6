// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool system for Crucible.
//!
//! This module provides the infrastructure for defining and cataloguing
//! tools the runtime can plan over and execute:
//!
//! - [`ToolHandler`] trait - Core abstraction for tool implementations
//! - [`ToolOutput`] - Result shape returned by handlers
//! - [`ToolRegistry`] - Indexed catalogue with validation and ranked search
//!
//! Tool *implementations* are opaque to the runtime: a handler consumes a
//! JSON input matching the tool's `inputSchema` and produces a
//! [`ToolOutput`], which the orchestrator normalises to a canonical
//! [`ToolExecutionResult`](crate::types::ToolExecutionResult).

pub mod registry;

pub use registry::{RegisteredTool, RegistryStats, SearchOptions, ToolFilter, ToolRegistry};

use async_trait::async_trait;

use crate::error::ToolError;

/// Output from executing a tool handler.
#[derive(Debug, Clone)]
pub enum ToolOutput {
    /// A bare value; wrapped as a success during normalisation.
    Raw(serde_json::Value),
    /// Structured result with explicit success flag and optional metadata.
    Structured {
        success: bool,
        data: serde_json::Value,
        error: Option<String>,
        metadata: Option<serde_json::Value>,
    },
}

impl ToolOutput {
    /// Create a successful output.
    pub fn success(data: serde_json::Value) -> Self {
        Self::Structured {
            success: true,
            data,
            error: None,
            metadata: None,
        }
    }

    /// Create a failed output.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Structured {
            success: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
            metadata: None,
        }
    }

    /// Create a successful output with metadata.
    pub fn with_metadata(data: serde_json::Value, metadata: serde_json::Value) -> Self {
        Self::Structured {
            success: true,
            data,
            error: None,
            metadata: Some(metadata),
        }
    }

    /// Check if the output indicates success.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Raw(_) => true,
            Self::Structured { success, .. } => *success,
        }
    }

    /// Normalise into the canonical execution result.
    pub fn into_execution_result(self, processing_time_ms: u64) -> crate::types::ToolExecutionResult {
        match self {
            Self::Raw(value) => crate::types::ToolExecutionResult::normalize(value, processing_time_ms),
            Self::Structured {
                success,
                data,
                error,
                metadata,
            } => crate::types::ToolExecutionResult {
                success,
                data,
                error,
                processing_time_ms,
                metadata,
            },
        }
    }
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// Trait that all tool handlers must implement.
///
/// Handlers are leaf call-outs: the runtime validates their input against
/// the registered `inputSchema`, enforces timeouts and security policy
/// around the call, and normalises whatever they return.
///
/// # Example
///
/// ```rust,ignore
/// use crucible::tools::{ToolHandler, ToolOutput};
///
/// struct EchoTool;
///
/// #[async_trait]
/// impl ToolHandler for EchoTool {
///     async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
///         Ok(ToolOutput::success(input))
///     }
/// }
/// ```
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given input parameters.
    ///
    /// May suspend at I/O; the caller enforces the wall-clock deadline and
    /// abandons the future on cancellation.
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_output_success() {
        let output = ToolOutput::success(json!({"x": 1}));
        assert!(output.is_success());
        let result = output.into_execution_result(7);
        assert!(result.success);
        assert_eq!(result.data, json!({"x": 1}));
        assert_eq!(result.processing_time_ms, 7);
    }

    #[test]
    fn test_tool_output_error() {
        let output = ToolOutput::error("failed");
        assert!(!output.is_success());
        let result = output.into_execution_result(3);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("failed"));
    }

    #[test]
    fn test_raw_output_normalises_structured_shape() {
        let output = ToolOutput::Raw(json!({"success": false, "error": "nope"}));
        let result = output.into_execution_result(1);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("nope"));
    }

}
