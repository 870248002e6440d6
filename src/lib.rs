// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crucible - an agentic tool-execution runtime.
//!
//! Accepts a free-text user request, analyses its intent, selects
//! registered tools, plans a partially-ordered execution, runs the tools
//! under resource and security constraints, streams incremental events to
//! the caller, and persists dialogue state per conversation.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (ToolDefinition, Message, ToolCall, etc.)
//! - [`error`] - Error types and result aliases
//! - [`schema`] - JSON-Schema subset validation and coercion
//! - [`tools`] - Tool handler trait and the indexed registry
//! - [`sandbox`] - Sandboxed code execution with resource caps
//! - [`security`] - Rate limiting, content filtering, resource accounting, audit
//! - [`planner`] - Intent analysis and execution planning
//! - [`orchestrator`] - Conversation state and the message pipeline
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing and metrics infrastructure
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use crucible::orchestrator::Orchestrator;
//! use crucible::tools::ToolRegistry;
//! use crucible::types::ToolDefinition;
//!
//! let registry = Arc::new(ToolRegistry::new());
//! registry.register(my_tool_definition, my_handler)?;
//!
//! let orchestrator = Orchestrator::with_defaults(registry);
//! let conversation = orchestrator.create_conversation(None);
//! let reply = orchestrator
//!     .process_message(&conversation, "Search for Rust async patterns", None)
//!     .await?;
//! println!("{}", reply.content);
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod sandbox;
pub mod schema;
pub mod security;
pub mod telemetry;
pub mod tools;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    OrchestratorError, PlannerError, RegistryError, Result, SandboxError, SecurityError, ToolError,
};
pub use orchestrator::{
    ChannelSink, CollectSink, Conversation, ConversationPreferences, EventSink, Orchestrator,
    OrchestratorOptions, PreferencesPatch, StreamingEvent, ToolMiddleware, Verbosity,
};
pub use planner::{ExecutionPlan, Intent, IntentType, PlannedToolCall, Planner, PlannerWeights};
pub use sandbox::{SandboxExecutor, SandboxPolicy, ScriptEngine, ScriptScope};
pub use security::{PolicyLevel, SecurityGate, SecurityPolicy};
pub use tools::{ToolHandler, ToolOutput, ToolRegistry};
pub use types::{
    ExecutionEnvironment, Message, ResourceLimits, Role, ToolCall, ToolCallStatus, ToolCategory,
    ToolDefinition, ToolExecutionResult, ToolKind, ToolPermissions,
};

/// Crucible version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        // Verify key types are accessible
        let _msg = Message::user("test");
        let _def = ToolDefinition::new("t", "T", "a tool");
        let _prefs = ConversationPreferences::default();
    }
}
