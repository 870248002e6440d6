// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation orchestrator.
//!
//! Owns per-conversation state and drives the message pipeline: plan the
//! turn, gate every tool call, execute directly or through the sandbox,
//! merge results into the context store, stream events, and persist the
//! assistant reply. The tool-call loop re-plans on follow-up signals up to
//! a hard iteration ceiling.
//!
//! Concurrency: different conversations proceed fully in parallel; a
//! conversation serialises its own turns behind a per-conversation lock.
//! The outer map lock is held only long enough to obtain the inner lock.

pub mod conversation;
pub mod events;

pub use conversation::{
    Conversation, ConversationPreferences, ContextStore, PreferencesPatch, Verbosity,
};
pub use events::{ChannelSink, CollectSink, EventSink, StreamingEvent};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{watch, Mutex as AsyncMutex};

use tracing::debug;

use crate::error::OrchestratorError;
use crate::planner::{Planner, PlannerOptions};
use crate::sandbox::SandboxExecutor;
use crate::schema::{validate, ValidationOptions};
use crate::security::{CallContext, SecurityGate, SecurityPolicy};
use crate::tools::{RegisteredTool, ToolRegistry};
use crate::types::{
    Message, ResourceLimits, ToolCall, ToolCallError, ToolExecutionResult, TurnStats, TurnToolCall,
};

use events::EventEmitter;

/// Hard ceiling on planner/executor iterations within one turn.
pub const MAX_ITERATIONS: u32 = 5;

/// Mutable view of a tool call handed to middleware.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    pub conversation_id: String,
    pub tool_id: String,
    pub parameters: serde_json::Value,
}

/// Hook pair invoked around every tool execution, in registration order.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Runs before the handler; may rewrite the parameters.
    async fn pre_call(&self, _ctx: &mut MiddlewareContext) {}

    /// Runs after normalisation; may rewrite the result.
    async fn post_call(&self, _ctx: &MiddlewareContext, _result: &mut ToolExecutionResult) {}
}

/// Options for constructing an orchestrator.
pub struct OrchestratorOptions {
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<SecurityGate>,
    pub executor: Arc<SandboxExecutor>,
    pub planner: Planner,
    pub middleware: Vec<Arc<dyn ToolMiddleware>>,
    pub max_iterations: u32,
}

impl OrchestratorOptions {
    /// Options with default gate, executor and planner.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            gate: Arc::new(SecurityGate::default()),
            executor: Arc::new(SandboxExecutor::builder().build()),
            planner: Planner::default(),
            middleware: Vec::new(),
            max_iterations: MAX_ITERATIONS,
        }
    }
}

/// The conversation orchestrator.
pub struct Orchestrator {
    conversations: RwLock<HashMap<String, Arc<AsyncMutex<Conversation>>>>,
    registry: Arc<ToolRegistry>,
    gate: Arc<SecurityGate>,
    executor: Arc<SandboxExecutor>,
    planner: Planner,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
    max_iterations: u32,
}

impl Orchestrator {
    /// Create an orchestrator from options.
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            registry: options.registry,
            gate: options.gate,
            executor: options.executor,
            planner: options.planner,
            middleware: options.middleware,
            max_iterations: options.max_iterations.clamp(1, MAX_ITERATIONS),
        }
    }

    /// Create an orchestrator with defaults around a registry.
    pub fn with_defaults(registry: Arc<ToolRegistry>) -> Self {
        Self::new(OrchestratorOptions::new(registry))
    }

    /// Security gate handle.
    pub fn gate(&self) -> Arc<SecurityGate> {
        self.gate.clone()
    }

    /// Create a conversation; unset preference fields take defaults.
    pub fn create_conversation(&self, patch: Option<PreferencesPatch>) -> String {
        let mut preferences = ConversationPreferences::default();
        if let Some(patch) = patch {
            patch.apply(&mut preferences);
        }
        let conversation = Conversation::new(preferences);
        let id = conversation.id.clone();
        self.conversations
            .write()
            .expect("conversation lock poisoned")
            .insert(id.clone(), Arc::new(AsyncMutex::new(conversation)));
        debug!(conversation = %id, "Created conversation");
        id
    }

    /// Snapshot of a conversation.
    pub async fn get_conversation(&self, id: &str) -> Option<Conversation> {
        let arc = self.lookup(id)?;
        let conversation = arc.lock().await;
        Some(conversation.clone())
    }

    /// Ids of all live conversations.
    pub fn list_conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .conversations
            .read()
            .expect("conversation lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Delete a conversation. Returns whether it existed.
    pub fn delete_conversation(&self, id: &str) -> bool {
        self.conversations
            .write()
            .expect("conversation lock poisoned")
            .remove(id)
            .is_some()
    }

    /// Patch a conversation's preferences. Returns whether it existed.
    pub async fn update_preferences(&self, id: &str, patch: PreferencesPatch) -> bool {
        let Some(arc) = self.lookup(id) else {
            return false;
        };
        let mut conversation = arc.lock().await;
        patch.apply(&mut conversation.preferences);
        conversation.touch();
        true
    }

    /// Process a user message through the full pipeline.
    pub async fn process_message(
        &self,
        conversation_id: &str,
        content: &str,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Message, OrchestratorError> {
        self.process_message_with_cancel(conversation_id, content, sink, None)
            .await
    }

    /// Process a user message with a cancellation token.
    ///
    /// On cancellation the current tool call is cancelled, remaining
    /// planned calls are skipped, and the assistant message reflects
    /// partial completion. Every recorded tool call ends in a terminal
    /// state.
    pub async fn process_message_with_cancel(
        &self,
        conversation_id: &str,
        content: &str,
        sink: Option<Arc<dyn EventSink>>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<Message, OrchestratorError> {
        let arc = self
            .lookup(conversation_id)
            .ok_or_else(|| OrchestratorError::ConversationNotFound(conversation_id.to_string()))?;
        let mut conv = arc.lock().await;
        let emitter = EventEmitter::new(sink);
        let turn_start = Instant::now();
        let principal = conv.principal();

        // Rate limit and input filtering come before anything is stored.
        let check = self.gate.check_message(&principal, conversation_id, content);
        if !check.allowed {
            let retry = check.retry_after_ms.unwrap_or(0);
            emitter
                .error(
                    format!("Rate limit exceeded; retry after {retry}ms"),
                    Some("RATE_LIMITED"),
                )
                .await;
            conv.append_message(Message::user(content));
            let assistant = Message::assistant(format!(
                "I can't process this request right now: rate limit exceeded. Try again in {retry}ms."
            ));
            conv.append_message(assistant.clone());
            emitter.text(assistant.content.clone()).await;
            return Ok(assistant);
        }

        let content = check.filtered_content;
        conv.append_message(Message::user(content.clone()));
        emitter.thinking("Analyzing your request...").await;

        let conv_policy = SecurityPolicy::preset(conv.preferences.safety_level);
        let call_budget = conv
            .preferences
            .max_tool_calls
            .min(conv_policy.max_tool_calls);

        let planner_options = PlannerOptions {
            max_tool_calls: conv.preferences.max_tool_calls,
            allowed_categories: conv.preferences.allowed_categories.clone(),
            preferred_tools: conv.preferences.preferred_tools.clone(),
        };

        let mut records: Vec<ToolCall> = Vec::new();
        let mut turn_stats = TurnStats::default();
        let mut assistant_content: Option<String> = None;
        let mut iterations = 0u32;
        let mut turn_cancelled = false;

        'turn: loop {
            iterations += 1;
            let merged_context = conv.context.snapshot();
            let plan = self
                .planner
                .plan(&content, &merged_context, &planner_options, &self.registry);
            if let Err(e) = plan.validate() {
                emitter.error(e.to_string(), Some(e.code())).await;
                let assistant = Message::assistant(format!("Planning failed: {e}"));
                conv.append_message(assistant.clone());
                emitter.text(assistant.content.clone()).await;
                return Ok(assistant);
            }
            emitter.thinking(plan.reasoning.clone()).await;

            if !conv.preferences.auto_execute || plan.is_empty() {
                assistant_content = Some(format_plan_summary(&plan));
                break 'turn;
            }

            let mut followup = false;
            for planned in &plan.tool_calls {
                if records.len() >= call_budget {
                    debug!(
                        conversation = %conversation_id,
                        budget = call_budget,
                        "Tool call budget reached; skipping remaining planned calls"
                    );
                    break;
                }

                let mut record = ToolCall::new(&planned.tool_id, planned.parameters.clone());

                if is_cancelled(&cancel) {
                    record.finish_cancelled();
                    records.push(record);
                    turn_cancelled = true;
                    break;
                }

                let ctx = CallContext {
                    principal: &principal,
                    conversation_id,
                    calls_so_far: records.len(),
                };

                let Some(entry) = self.registry.entry(&planned.tool_id) else {
                    let error = ToolCallError::new(
                        "TOOL_NOT_FOUND",
                        format!("tool '{}' is not registered", planned.tool_id),
                    );
                    emitter.error(error.message.clone(), Some(error.code.as_str())).await;
                    record.finish_failed(error);
                    records.push(record);
                    continue;
                };

                let pre = self.gate.pre_check(&ctx, &entry.definition, &planned.parameters);
                if !pre.allowed {
                    let first = pre.violations.first();
                    let error = ToolCallError::new(
                        first.map(|v| v.code.clone()).unwrap_or_else(|| "POLICY_VIOLATION".to_string()),
                        first
                            .map(|v| v.message.clone())
                            .unwrap_or_else(|| "denied by security policy".to_string()),
                    );
                    emitter.error(error.message.clone(), Some(error.code.as_str())).await;
                    record.finish_failed(error);
                    records.push(record);
                    continue;
                }

                // Typed contract: validate and coerce against the input schema.
                let validated = validate(
                    &pre.filtered_parameters,
                    &entry.definition.input_schema,
                    ValidationOptions::default(),
                );
                if !validated.is_ok() {
                    let error = ToolCallError::new(
                        "VALIDATION_FAILED",
                        format!(
                            "parameters failed schema validation: {}",
                            validated
                                .errors
                                .iter()
                                .map(|e| e.to_string())
                                .collect::<Vec<_>>()
                                .join("; ")
                        ),
                    );
                    emitter.error(error.message.clone(), Some(error.code.as_str())).await;
                    record.finish_failed(error);
                    records.push(record);
                    continue;
                }

                let mut middleware_ctx = MiddlewareContext {
                    conversation_id: conversation_id.to_string(),
                    tool_id: planned.tool_id.clone(),
                    parameters: validated.value,
                };
                for hook in &self.middleware {
                    hook.pre_call(&mut middleware_ctx).await;
                }

                emitter
                    .emit(StreamingEvent::ToolCall {
                        tool_name: planned.tool_id.clone(),
                        parameters: Some(middleware_ctx.parameters.clone()),
                    })
                    .await;

                record.begin();
                let started = Instant::now();
                let outcome = self
                    .invoke_tool(
                        &entry,
                        &conv_policy,
                        middleware_ctx.parameters.clone(),
                        cancel.clone(),
                    )
                    .await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.gate.record_exec(conversation_id, elapsed_ms);

                let mut is_error = true;
                match outcome {
                    Ok(output) => {
                        let mut result = output.into_execution_result(elapsed_ms);
                        for hook in &self.middleware {
                            hook.post_call(&middleware_ctx, &mut result).await;
                        }

                        let post = self.gate.post_check(&ctx, &result.data);
                        result.data = post.filtered_result;

                        if result.success {
                            is_error = false;
                            conv.context
                                .set(format!("{}_result", planned.tool_id), result.data.clone());
                            if let Some(memories) =
                                result.data.get("memories").and_then(|v| v.as_object())
                            {
                                conv.context.merge_object(memories);
                            }
                            if result.data.get("next_turn").and_then(|v| v.as_str())
                                == Some("assistant")
                            {
                                followup = true;
                            }
                            conv.active_tools.insert(planned.tool_id.clone());

                            emitter
                                .emit(StreamingEvent::ToolResult {
                                    tool_name: planned.tool_id.clone(),
                                    success: true,
                                    content: result.data.clone(),
                                    metadata: result.metadata.clone(),
                                })
                                .await;
                            record.finish_ok(result);
                        } else {
                            let message = result
                                .error
                                .clone()
                                .unwrap_or_else(|| "tool reported failure".to_string());
                            emitter
                                .emit(StreamingEvent::ToolResult {
                                    tool_name: planned.tool_id.clone(),
                                    success: false,
                                    content: result.data.clone(),
                                    metadata: result.metadata.clone(),
                                })
                                .await;
                            record.result = Some(result);
                            record.finish_failed(ToolCallError::new("TOOL_ERROR", message));
                        }
                    }
                    Err(e) if e.code() == "CANCELLED" => {
                        record.finish_cancelled();
                        records.push(record);
                        turn_stats.tool_calls.push(TurnToolCall {
                            tool_id: planned.tool_id.clone(),
                            duration_ms: elapsed_ms,
                            is_error: true,
                        });
                        turn_cancelled = true;
                        break;
                    }
                    Err(e) => {
                        emitter
                            .emit(StreamingEvent::ToolResult {
                                tool_name: planned.tool_id.clone(),
                                success: false,
                                content: serde_json::Value::Null,
                                metadata: None,
                            })
                            .await;
                        record.finish_failed(ToolCallError::new(e.code(), e.to_string()));
                    }
                }

                #[cfg(feature = "telemetry")]
                {
                    crate::telemetry::metrics::GLOBAL_METRICS.record_tool(
                        &planned.tool_id,
                        started.elapsed(),
                        !is_error,
                    );
                }

                turn_stats.tool_calls.push(TurnToolCall {
                    tool_id: planned.tool_id.clone(),
                    duration_ms: elapsed_ms,
                    is_error,
                });
                records.push(record);
            }

            if turn_cancelled {
                emitter.error("cancelled", Some("CANCELLED")).await;
                assistant_content = Some(format!(
                    "The request was cancelled after {} of {} planned tool call(s).",
                    records
                        .iter()
                        .filter(|r| r.status == crate::types::ToolCallStatus::Ok)
                        .count(),
                    plan.tool_calls.len()
                ));
                break 'turn;
            }

            if followup && iterations < self.max_iterations && records.len() < call_budget {
                debug!(iteration = iterations, "Re-planning after follow-up signal");
                continue;
            }
            break;
        }

        let body = assistant_content
            .unwrap_or_else(|| format_execution_summary(&records, conv.preferences.verbosity));

        conv.context.prune();

        turn_stats.tool_call_count = records.len();
        turn_stats.duration_ms = turn_start.elapsed().as_millis() as u64;
        turn_stats.iterations = iterations;

        let mut assistant = Message::assistant(body).with_tool_calls(records);
        assistant.turn_stats = Some(turn_stats);
        conv.append_message(assistant.clone());
        emitter.text(assistant.content.clone()).await;
        Ok(assistant)
    }

    /// Invoke a tool handler under the strictest applicable limits, either
    /// directly or through the sandboxed executor.
    async fn invoke_tool(
        &self,
        entry: &RegisteredTool,
        conv_policy: &SecurityPolicy,
        parameters: serde_json::Value,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<crate::tools::ToolOutput, crate::error::SandboxError> {
        let def = &entry.definition;
        let gate_policy = self.gate.policy();

        let mut limits = def.execution.resource_limits.unwrap_or(ResourceLimits {
            max_execution_time_ms: def.execution.timeout_ms,
            ..Default::default()
        });
        limits.max_execution_time_ms = def
            .execution
            .timeout_ms
            .min(conv_policy.max_execution_time_ms)
            .min(gate_policy.max_execution_time_ms);
        limits.max_memory_mb = limits
            .max_memory_mb
            .min(conv_policy.max_memory_mb)
            .min(gate_policy.max_memory_mb);

        self.executor
            .run_handler(
                def.execution.environment,
                limits,
                entry.handler.clone(),
                parameters,
                cancel,
            )
            .await
    }

    fn lookup(&self, id: &str) -> Option<Arc<AsyncMutex<Conversation>>> {
        self.conversations
            .read()
            .expect("conversation lock poisoned")
            .get(id)
            .cloned()
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|c| *c.borrow()).unwrap_or(false)
}

/// Human-readable rendering of a plan, used when auto-exec is off or the
/// plan is empty.
fn format_plan_summary(plan: &crate::planner::ExecutionPlan) -> String {
    if plan.is_empty() {
        return format!(
            "I couldn't find suitable tools for this request.\n\nReasoning: {}",
            plan.reasoning
        );
    }

    let mut out = String::from("**Execution Plan**\n\n");
    out.push_str(&format!("Reasoning: {}\n\nPlanned tools:\n", plan.reasoning));
    for call in &plan.tool_calls {
        out.push_str(&format!("- {} (priority {:.2})", call.tool_id, call.priority));
        if !call.dependencies.is_empty() {
            out.push_str(&format!(" after {}", call.dependencies.join(", ")));
        }
        out.push('\n');
    }
    out.push_str(&format!("\nConfidence: {:.2}", plan.confidence));
    if !plan.alternatives.is_empty() {
        out.push_str(&format!(
            "\n{} alternative plan(s) available.",
            plan.alternatives.len()
        ));
    }
    out
}

/// Summary of an executed turn.
fn format_execution_summary(records: &[ToolCall], verbosity: Verbosity) -> String {
    use crate::types::ToolCallStatus;

    let succeeded: Vec<&ToolCall> = records
        .iter()
        .filter(|r| r.status == ToolCallStatus::Ok)
        .collect();
    let failed: Vec<&ToolCall> = records
        .iter()
        .filter(|r| r.status == ToolCallStatus::Failed)
        .collect();
    let cancelled = records
        .iter()
        .filter(|r| r.status == ToolCallStatus::Cancelled)
        .count();

    let mut out = format!("I've executed {} tool(s) successfully.", succeeded.len());
    if !failed.is_empty() {
        out.push_str(&format!(" {} tool call(s) failed.", failed.len()));
    }
    if cancelled > 0 {
        out.push_str(&format!(" {cancelled} tool call(s) were cancelled."));
    }

    if verbosity != Verbosity::Minimal {
        for call in &succeeded {
            if let Some(ref result) = call.result {
                out.push_str(&format!(
                    "\n- {}: {}",
                    call.tool_id,
                    preview(&result.data, 200)
                ));
            }
        }
        for call in &failed {
            if let Some(ref error) = call.error {
                out.push_str(&format!("\n- {} failed: {}", call.tool_id, error.code));
                if verbosity == Verbosity::Verbose {
                    out.push_str(&format!(" ({})", error.message));
                }
            }
        }
    }

    out
}

fn preview(value: &serde_json::Value, max_chars: usize) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= max_chars {
        text
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::schema::Schema;
    use crate::tools::{ToolHandler, ToolOutput};
    use crate::types::{ToolCallStatus, ToolCategory, ToolDefinition, ToolKind};
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(json!({"echo": input})))
        }
    }

    fn web_search() -> ToolDefinition {
        ToolDefinition::new("web-search", "Web Search", "Search the web for anything")
            .with_category(ToolCategory::Search)
            .with_kind(ToolKind::WebSearch)
            .with_input_schema(Schema::object().with_property("query", Schema::string()))
    }

    fn orchestrator_with(tools: Vec<ToolDefinition>) -> Orchestrator {
        let registry = Arc::new(ToolRegistry::new());
        for def in tools {
            registry.register(def, Arc::new(EchoHandler)).unwrap();
        }
        Orchestrator::with_defaults(registry)
    }

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let orchestrator = orchestrator_with(vec![]);
        let id = orchestrator.create_conversation(None);

        assert_eq!(orchestrator.list_conversations(), vec![id.clone()]);
        let conversation = orchestrator.get_conversation(&id).await.unwrap();
        assert!(conversation.preferences.auto_execute);
        assert_eq!(conversation.preferences.max_tool_calls, 3);

        assert!(orchestrator.delete_conversation(&id));
        assert!(!orchestrator.delete_conversation(&id));
        assert!(orchestrator.get_conversation(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_update_preferences() {
        let orchestrator = orchestrator_with(vec![]);
        let id = orchestrator.create_conversation(None);

        let updated = orchestrator
            .update_preferences(
                &id,
                PreferencesPatch {
                    auto_execute: Some(false),
                    ..Default::default()
                },
            )
            .await;
        assert!(updated);

        let conversation = orchestrator.get_conversation(&id).await.unwrap();
        assert!(!conversation.preferences.auto_execute);

        assert!(
            !orchestrator
                .update_preferences("missing", PreferencesPatch::default())
                .await
        );
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let orchestrator = orchestrator_with(vec![]);
        let err = orchestrator
            .process_message("missing", "hello", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_plan_only_turn() {
        let orchestrator = orchestrator_with(vec![web_search()]);
        let id = orchestrator.create_conversation(Some(PreferencesPatch {
            auto_execute: Some(false),
            ..Default::default()
        }));

        let sink = CollectSink::new();
        let reply = orchestrator
            .process_message(&id, "Search for React best practices", Some(sink.clone()))
            .await
            .unwrap();

        assert!(reply.content.contains("Reasoning"));
        assert!(reply.content.contains("web-search"));
        assert!(reply.tool_calls.is_none());

        let kinds: Vec<&str> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["thinking", "thinking", "text"]);
    }

    #[tokio::test]
    async fn test_auto_execute_turn() {
        let orchestrator = orchestrator_with(vec![web_search()]);
        let id = orchestrator.create_conversation(None);

        let sink = CollectSink::new();
        let reply = orchestrator
            .process_message(&id, "Search for React best practices", Some(sink.clone()))
            .await
            .unwrap();

        assert!(reply
            .content
            .starts_with("I've executed 1 tool(s) successfully"));
        let calls = reply.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_id, "web-search");
        assert_eq!(calls[0].status, ToolCallStatus::Ok);

        let kinds: Vec<&str> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["thinking", "thinking", "tool_call", "tool_result", "text"]
        );

        // The tool result landed in the context store.
        let conversation = orchestrator.get_conversation(&id).await.unwrap();
        assert!(conversation.context.get("web-search_result").is_some());
        assert!(conversation.active_tools.contains("web-search"));
    }

    #[tokio::test]
    async fn test_message_count_and_activity_invariant() {
        let orchestrator = orchestrator_with(vec![web_search()]);
        let id = orchestrator.create_conversation(None);

        let before = orchestrator.get_conversation(&id).await.unwrap();
        orchestrator
            .process_message(&id, "Search for things", None)
            .await
            .unwrap();
        let after = orchestrator.get_conversation(&id).await.unwrap();

        assert_eq!(after.message_count(), before.message_count() + 2);
        assert!(after.last_activity_at > before.last_activity_at);
    }

    #[tokio::test]
    async fn test_tool_call_statuses_terminal() {
        let orchestrator = orchestrator_with(vec![web_search()]);
        let id = orchestrator.create_conversation(None);

        let reply = orchestrator
            .process_message(&id, "Search for things", None)
            .await
            .unwrap();
        for call in reply.tool_calls.as_deref().unwrap_or(&[]) {
            assert!(call.status.is_terminal());
        }
    }

    struct RenamingMiddleware;

    #[async_trait]
    impl ToolMiddleware for RenamingMiddleware {
        async fn pre_call(&self, ctx: &mut MiddlewareContext) {
            if let Some(obj) = ctx.parameters.as_object_mut() {
                obj.insert("injected".to_string(), json!(true));
            }
        }

        async fn post_call(&self, _ctx: &MiddlewareContext, result: &mut ToolExecutionResult) {
            result.metadata = Some(json!({"stamped": true}));
        }
    }

    #[tokio::test]
    async fn test_middleware_chain() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(web_search(), Arc::new(EchoHandler))
            .unwrap();
        let mut options = OrchestratorOptions::new(registry);
        options.middleware.push(Arc::new(RenamingMiddleware));
        let orchestrator = Orchestrator::new(options);

        let id = orchestrator.create_conversation(None);
        let reply = orchestrator
            .process_message(&id, "Search for things", None)
            .await
            .unwrap();

        let call = &reply.tool_calls.as_ref().unwrap()[0];
        let result = call.result.as_ref().unwrap();
        assert_eq!(result.metadata, Some(json!({"stamped": true})));
        assert_eq!(result.data["echo"]["injected"], json!(true));
    }

    #[tokio::test]
    async fn test_cancellation_before_execution() {
        let orchestrator = orchestrator_with(vec![web_search()]);
        let id = orchestrator.create_conversation(None);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let sink = CollectSink::new();
        let reply = orchestrator
            .process_message_with_cancel(&id, "Search for things", Some(sink.clone()), Some(rx))
            .await
            .unwrap();

        assert!(reply.content.contains("cancelled"));
        let calls = reply.tool_calls.as_ref().unwrap();
        assert!(calls.iter().all(|c| c.status == ToolCallStatus::Cancelled));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            StreamingEvent::Error { code: Some(code), .. } if code == "CANCELLED"
        )));
    }

    #[tokio::test]
    async fn test_budget_caps_executed_calls() {
        let mut tools = Vec::new();
        for i in 0..5 {
            tools.push(
                ToolDefinition::new(format!("search-{i}"), format!("Search {i}"), "search things")
                    .with_category(ToolCategory::Search)
                    .with_input_schema(Schema::object().with_property("query", Schema::string())),
            );
        }
        let orchestrator = orchestrator_with(tools);
        let id = orchestrator.create_conversation(Some(PreferencesPatch {
            max_tool_calls: Some(2),
            ..Default::default()
        }));

        let reply = orchestrator
            .process_message(&id, "search everywhere please", None)
            .await
            .unwrap();
        assert!(reply.tool_calls.as_ref().unwrap().len() <= 2);
    }

    #[test]
    fn test_format_execution_summary_counts() {
        let mut ok_call = ToolCall::new("a", json!({}));
        ok_call.begin();
        ok_call.finish_ok(ToolExecutionResult::success(json!("hi"), 1));

        let mut failed_call = ToolCall::new("b", json!({}));
        failed_call.begin();
        failed_call.finish_failed(ToolCallError::new("EXECUTION_TIMEOUT", "too slow"));

        let summary = format_execution_summary(&[ok_call, failed_call], Verbosity::Normal);
        assert!(summary.starts_with("I've executed 1 tool(s) successfully."));
        assert!(summary.contains("1 tool call(s) failed."));
        assert!(summary.contains("- a: hi"));
        assert!(summary.contains("- b failed: EXECUTION_TIMEOUT"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = json!("x".repeat(500));
        let shown = preview(&long, 100);
        assert!(shown.ends_with("..."));
        assert!(shown.chars().count() <= 103);
    }
}
