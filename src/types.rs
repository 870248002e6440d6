// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for the Crucible runtime.
//!
//! This module defines the fundamental data structures used throughout the
//! crate: tool definitions, messages, tool calls, and execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::schema::Schema;

// ============================================================================
// Tool Definitions
// ============================================================================

/// Functional category a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Core,
    Integration,
    Execution,
    Data,
    Search,
    Utility,
}

impl ToolCategory {
    /// All categories, in declaration order.
    pub const ALL: [ToolCategory; 6] = [
        Self::Core,
        Self::Integration,
        Self::Execution,
        Self::Data,
        Self::Search,
        Self::Utility,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Integration => "integration",
            Self::Execution => "execution",
            Self::Data => "data",
            Self::Search => "search",
            Self::Utility => "utility",
        }
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of tool, dispatched on explicitly rather than by reflective
/// property sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    Api,
    Knowledge,
    Ai,
    WebSearch,
    JsExecution,
    PyExecution,
    McpServer,
    FileSystem,
    Database,
    Workflow,
}

impl ToolKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Api => "api",
            Self::Knowledge => "knowledge",
            Self::Ai => "ai",
            Self::WebSearch => "web_search",
            Self::JsExecution => "js_execution",
            Self::PyExecution => "py_execution",
            Self::McpServer => "mcp_server",
            Self::FileSystem => "file_system",
            Self::Database => "database",
            Self::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags a tool declares up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPermissions {
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub file_system: bool,
    #[serde(default)]
    pub requires_auth: bool,
}

/// Resource caps applied to sandboxed executions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_execution_time_ms: u64,
    pub max_concurrent_executions: usize,
    pub allow_network: bool,
    pub allow_file_system: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 64,
            max_execution_time_ms: 30_000,
            max_concurrent_executions: 5,
            allow_network: false,
            allow_file_system: false,
        }
    }
}

/// Where a tool's work runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnvironment {
    /// Same-task execution with intercepted standard streams.
    #[default]
    Direct,
    /// Isolated cooperative task with a scripted context.
    Worker,
    /// Worker with restricted built-ins.
    Sandboxed,
    /// Worker with minimal built-ins; no timers, no arbitrary network.
    Isolated,
}

impl ExecutionEnvironment {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Worker => "worker",
            Self::Sandboxed => "sandboxed",
            Self::Isolated => "isolated",
        }
    }

    /// Check whether this environment runs through the sandboxed executor.
    pub fn is_sandboxed(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

/// Execution settings carried by a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub environment: ExecutionEnvironment,
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            environment: ExecutionEnvironment::Direct,
            timeout_ms: 30_000,
            resource_limits: None,
        }
    }
}

/// Definition of a tool registered with the runtime.
///
/// Immutable once registered; the registry rejects duplicate ids and removes
/// definitions only on explicit unregister.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Semantic version, `major.minor.patch`.
    pub version: String,
    pub category: ToolCategory,
    pub kind: ToolKind,
    pub input_schema: Schema,
    pub output_schema: Schema,
    #[serde(default)]
    pub permissions: ToolPermissions,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub experimental: bool,
}

impl ToolDefinition {
    /// Create a new tool definition with defaults.
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Utility,
            kind: ToolKind::Function,
            input_schema: Schema::object(),
            output_schema: Schema::object(),
            permissions: ToolPermissions::default(),
            execution: ExecutionConfig::default(),
            tags: BTreeSet::new(),
            deprecated: false,
            experimental: false,
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: ToolKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set the input schema.
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    /// Set the output schema.
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    /// Set permission flags.
    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set execution settings.
    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    /// Add tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Mark the tool as deprecated.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Mark the tool as experimental.
    pub fn experimental(mut self) -> Self {
        self.experimental = true;
        self
    }

    /// Searchable haystack: name, description, id and tags concatenated.
    pub fn search_text(&self) -> String {
        let mut text = String::with_capacity(
            self.name.len() + self.description.len() + self.id.len() + 16,
        );
        text.push_str(&self.name);
        text.push(' ');
        text.push_str(&self.description);
        text.push(' ');
        text.push_str(&self.id);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text.to_lowercase()
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A message in a conversation. Append-only once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_stats: Option<TurnStats>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: None,
            turn_stats: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }

    /// Attach tool call records.
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = if calls.is_empty() { None } else { Some(calls) };
        self
    }
}

// ============================================================================
// Tool Calls
// ============================================================================

/// Lifecycle state of a tool call. Transitions form a DAG:
/// pending -> running -> {ok, failed, cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Ok,
    Failed,
    Cancelled,
}

impl ToolCallStatus {
    /// Check whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Failed | Self::Cancelled)
    }
}

/// Error recorded on a failed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallError {
    pub code: String,
    pub message: String,
}

impl ToolCallError {
    /// Create a new tool call error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A single tool invocation recorded in a conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub tool_id: String,
    pub parameters: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolCallError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// Create a pending tool call.
    pub fn new(tool_id: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool_id: tool_id.into(),
            parameters,
            result: None,
            error: None,
            started_at: None,
            finished_at: None,
            status: ToolCallStatus::Pending,
        }
    }

    /// Transition pending -> running.
    pub fn begin(&mut self) {
        debug_assert_eq!(self.status, ToolCallStatus::Pending);
        self.status = ToolCallStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to ok with a result.
    pub fn finish_ok(&mut self, result: ToolExecutionResult) {
        self.result = Some(result);
        self.status = ToolCallStatus::Ok;
        self.finished_at = Some(Utc::now());
    }

    /// Transition to failed with an error.
    pub fn finish_failed(&mut self, error: ToolCallError) {
        self.error = Some(error);
        self.status = ToolCallStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Transition to cancelled.
    pub fn finish_cancelled(&mut self) {
        self.status = ToolCallStatus::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}

// ============================================================================
// Execution Results
// ============================================================================

/// Canonical result of a tool execution, normalised from whatever shape the
/// handler returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionResult {
    pub success: bool,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolExecutionResult {
    /// Create a successful result.
    pub fn success(data: serde_json::Value, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data,
            error: None,
            processing_time_ms,
            metadata: None,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
            processing_time_ms,
            metadata: None,
        }
    }

    /// Normalise a raw handler return value.
    ///
    /// Handlers may return either a bare value (wrapped as a success) or a
    /// structured object `{success?, result|output, error?, metadata?}`.
    /// `success` defaults to true unless the handler explicitly said false.
    pub fn normalize(raw: serde_json::Value, processing_time_ms: u64) -> Self {
        if let serde_json::Value::Object(ref obj) = raw {
            let structured = obj.contains_key("success")
                || obj.contains_key("result")
                || obj.contains_key("output")
                || obj.contains_key("error");
            if structured {
                let success = obj
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                let data = obj
                    .get("result")
                    .or_else(|| obj.get("output"))
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let error = obj
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let metadata = obj.get("metadata").cloned();
                return Self {
                    success,
                    data,
                    error,
                    processing_time_ms,
                    metadata,
                };
            }
        }

        Self::success(raw, processing_time_ms)
    }
}

// ============================================================================
// Turn Statistics
// ============================================================================

/// Statistics for a single tool call within a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnToolCall {
    pub tool_id: String,
    pub duration_ms: u64,
    pub is_error: bool,
}

/// Statistics for a single conversation turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStats {
    pub tool_call_count: usize,
    pub duration_ms: u64,
    pub iterations: u32,
    pub tool_calls: Vec<TurnToolCall>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_definition_builder() {
        let tool = ToolDefinition::new("web-search", "Web Search", "Search the web")
            .with_category(ToolCategory::Search)
            .with_kind(ToolKind::WebSearch)
            .with_tags(["web", "search"]);

        assert_eq!(tool.id, "web-search");
        assert_eq!(tool.category, ToolCategory::Search);
        assert_eq!(tool.kind, ToolKind::WebSearch);
        assert!(tool.tags.contains("web"));
        assert!(!tool.deprecated);
    }

    #[test]
    fn test_tool_definition_serialization() {
        let tool = ToolDefinition::new("t1", "Tool", "A tool").with_kind(ToolKind::JsExecution);
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["kind"], "js_execution");
        assert_eq!(json["category"], "utility");
        assert_eq!(json["inputSchema"]["type"], "object");
        assert_eq!(json["execution"]["timeoutMs"], 30_000);
    }

    #[test]
    fn test_search_text() {
        let tool = ToolDefinition::new("calc", "Calculator", "Does Math").with_tags(["numbers"]);
        let text = tool.search_text();
        assert!(text.contains("calculator"));
        assert!(text.contains("does math"));
        assert!(text.contains("numbers"));
    }

    #[test]
    fn test_resource_limits_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_memory_mb, 64);
        assert_eq!(limits.max_execution_time_ms, 30_000);
        assert_eq!(limits.max_concurrent_executions, 5);
        assert!(!limits.allow_network);
        assert!(!limits.allow_file_system);
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let mut call = ToolCall::new("web-search", json!({"query": "rust"}));
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert!(!call.status.is_terminal());

        call.begin();
        assert_eq!(call.status, ToolCallStatus::Running);
        assert!(call.started_at.is_some());

        call.finish_ok(ToolExecutionResult::success(json!({"hits": 3}), 12));
        assert_eq!(call.status, ToolCallStatus::Ok);
        assert!(call.status.is_terminal());
        assert!(call.finished_at.is_some());
    }

    #[test]
    fn test_tool_call_failure() {
        let mut call = ToolCall::new("web-search", json!({}));
        call.begin();
        call.finish_failed(ToolCallError::new("EXECUTION_TIMEOUT", "timed out"));
        assert_eq!(call.status, ToolCallStatus::Failed);
        assert_eq!(call.error.as_ref().unwrap().code, "EXECUTION_TIMEOUT");
    }

    #[test]
    fn test_normalize_raw_value() {
        let result = ToolExecutionResult::normalize(json!([1, 2, 3]), 5);
        assert!(result.success);
        assert_eq!(result.data, json!([1, 2, 3]));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_normalize_structured_output() {
        let result = ToolExecutionResult::normalize(
            json!({"success": false, "output": {"partial": true}, "error": "boom"}),
            5,
        );
        assert!(!result.success);
        assert_eq!(result.data, json!({"partial": true}));
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_normalize_result_key_and_default_success() {
        let result =
            ToolExecutionResult::normalize(json!({"result": 42, "metadata": {"cached": true}}), 1);
        assert!(result.success);
        assert_eq!(result.data, json!(42));
        assert_eq!(result.metadata, Some(json!({"cached": true})));
    }

    #[test]
    fn test_normalize_plain_object_is_wrapped() {
        // No structured keys: treat the whole object as data.
        let result = ToolExecutionResult::normalize(json!({"hits": [1]}), 1);
        assert!(result.success);
        assert_eq!(result.data, json!({"hits": [1]}));
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::assistant("done").with_tool_calls(vec![ToolCall::new("t", json!({}))]);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json["toolCalls"].is_array());
    }

    #[test]
    fn test_execution_environment() {
        assert!(!ExecutionEnvironment::Direct.is_sandboxed());
        assert!(ExecutionEnvironment::Isolated.is_sandboxed());
        let env: ExecutionEnvironment = serde_json::from_str("\"sandboxed\"").unwrap();
        assert_eq!(env, ExecutionEnvironment::Sandboxed);
    }
}
