// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Execution planner.
//!
//! Stateless: turns a free-text query, the merged conversation context and
//! caller preferences into an [`ExecutionPlan`] against a read-only view of
//! the registry.
//!
//! - [`intent`] - lexical intent analysis
//! - [`params`] - per-tool parameter synthesis
//!
//! Scoring constants are deliberately configuration
//! ([`PlannerWeights`]), not hardcoded.

pub mod intent;
pub mod params;

pub use intent::{analyze, Intent, IntentType};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::PlannerError;
use crate::tools::{SearchOptions, ToolFilter, ToolRegistry};
use crate::types::{ToolCategory, ToolDefinition};

/// Tunable scoring constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerWeights {
    /// Starting priority for every candidate.
    pub base: f64,
    /// Added when the intent type matches the tool category.
    pub category_match: f64,
    /// Added per query keyword found in the tool name or description.
    pub keyword_match: f64,
    /// Added for well-known exact tool ids.
    pub exact_id_bonus: f64,
    /// Added for calculation-capable tools on calculation queries.
    pub calculation_bonus: f64,
    /// Confidence penalty factor applied per unit of query complexity.
    pub complexity_penalty: f64,
    /// Confidence multiplier for alternative plans.
    pub alternative_scale: f64,
}

impl Default for PlannerWeights {
    fn default() -> Self {
        Self {
            base: 0.3,
            category_match: 0.4,
            keyword_match: 0.1,
            exact_id_bonus: 0.3,
            calculation_bonus: 0.3,
            complexity_penalty: 0.2,
            alternative_scale: 0.8,
        }
    }
}

/// Ids that receive the exact-id bonus.
const EXACT_ID_BONUS_IDS: &[&str] = &["search", "api", "text"];

const CALCULATION_MARKERS: &[&str] = &["calculat", "math", "comput"];

/// Planner-facing slice of the conversation preferences.
#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub max_tool_calls: usize,
    /// Lenient category terms; empty allows everything.
    pub allowed_categories: Vec<String>,
    /// Tools ranked ahead of other candidates.
    pub preferred_tools: Vec<String>,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_tool_calls: 3,
            allowed_categories: Vec::new(),
            preferred_tools: Vec::new(),
        }
    }
}

/// One planned tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedToolCall {
    /// Plan-local id; dependencies reference these.
    pub id: String,
    pub tool_id: String,
    pub parameters: Value,
    /// Priority in [0, 1]; total-ordered for tie-breaking.
    pub priority: f64,
    pub dependencies: Vec<String>,
    pub reason: String,
}

/// An ordered, acyclic plan with confidence and alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub tool_calls: Vec<PlannedToolCall>,
    pub reasoning: String,
    /// Confidence in [0, 1]; zero when no candidates survived.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<ExecutionPlan>,
}

impl ExecutionPlan {
    /// A plan with no tool calls.
    pub fn empty(reasoning: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            reasoning: reasoning.into(),
            confidence: 0.0,
            alternatives: Vec::new(),
        }
    }

    /// Check whether the plan has no tool calls.
    pub fn is_empty(&self) -> bool {
        self.tool_calls.is_empty()
    }

    /// Verify id references and acyclicity of the dependency graph.
    pub fn validate(&self) -> Result<(), PlannerError> {
        let ids: HashSet<&str> = self.tool_calls.iter().map(|c| c.id.as_str()).collect();
        for call in &self.tool_calls {
            for dep in &call.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(PlannerError::InvalidJson(format!(
                        "dependency '{dep}' does not name a plan entry"
                    )));
                }
            }
        }

        // Depth-first cycle check over id references.
        let mut state: std::collections::HashMap<&str, u8> = std::collections::HashMap::new();
        for call in &self.tool_calls {
            if self.has_cycle(&call.id, &mut state) {
                return Err(PlannerError::DependencyCycle(call.id.clone()));
            }
        }
        Ok(())
    }

    fn has_cycle<'a>(
        &'a self,
        id: &'a str,
        state: &mut std::collections::HashMap<&'a str, u8>,
    ) -> bool {
        match state.get(id) {
            Some(2) => return false,
            Some(1) => return true,
            _ => {}
        }
        state.insert(id, 1);
        if let Some(call) = self.tool_calls.iter().find(|c| c.id == id) {
            for dep in &call.dependencies {
                if self.has_cycle(dep, state) {
                    return true;
                }
            }
        }
        state.insert(id, 2);
        false
    }
}

/// The execution planner.
pub struct Planner {
    weights: PlannerWeights,
}

impl Planner {
    /// Create a planner with the given weights.
    pub fn new(weights: PlannerWeights) -> Self {
        Self { weights }
    }

    /// Active weights.
    pub fn weights(&self) -> &PlannerWeights {
        &self.weights
    }

    /// Produce a plan for a query.
    pub fn plan(
        &self,
        query: &str,
        context: &Map<String, Value>,
        options: &PlannerOptions,
        registry: &ToolRegistry,
    ) -> ExecutionPlan {
        let intent = intent::analyze(query);
        debug!(intent = intent.intent_type.as_str(), keywords = intent.keywords.len(), "Planning");

        let candidates = self.retrieve_candidates(&intent, options, registry);
        if candidates.is_empty() {
            return ExecutionPlan::empty(format!(
                "Identified {} intent but found no matching tools.",
                intent.intent_type.as_str()
            ));
        }

        // Synthesise parameters; candidates with none are dropped.
        let mut calls: Vec<PlannedToolCall> = Vec::new();
        for def in &candidates {
            let Some(parameters) = params::synthesize(def, &intent, query, context) else {
                continue;
            };
            let priority = self.priority(def, &intent);
            calls.push(PlannedToolCall {
                id: String::new(), // assigned after ordering
                tool_id: def.id.clone(),
                parameters: Value::Object(parameters),
                priority,
                dependencies: Vec::new(),
                reason: format!(
                    "{} matched the {} intent with priority {:.2}",
                    def.id,
                    intent.intent_type.as_str(),
                    priority
                ),
            });
        }

        if calls.is_empty() {
            return ExecutionPlan::empty(format!(
                "Identified {} intent but could not synthesise parameters for any candidate.",
                intent.intent_type.as_str()
            ));
        }

        // Order by priority, tie-broken by tool id.
        calls.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });
        for (i, call) in calls.iter_mut().enumerate() {
            call.id = format!("call-{}", i + 1);
        }

        self.infer_dependencies(&mut calls, registry);

        let confidence = self.confidence(&calls, intent.complexity);
        let reasoning = format!(
            "Identified {} intent (keywords: {}). Selected {} tool(s): {}.",
            intent.intent_type.as_str(),
            if intent.keywords.is_empty() {
                "none".to_string()
            } else {
                intent.keywords.join(", ")
            },
            calls.len(),
            calls
                .iter()
                .map(|c| c.tool_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut plan = ExecutionPlan {
            tool_calls: calls,
            reasoning,
            confidence,
            alternatives: Vec::new(),
        };
        plan.alternatives = self.alternatives(&plan);
        plan
    }

    /// Candidate retrieval in three falling-back stages.
    fn retrieve_candidates(
        &self,
        intent: &Intent,
        options: &PlannerOptions,
        registry: &ToolRegistry,
    ) -> Vec<Arc<ToolDefinition>> {
        let search_options = SearchOptions::default();

        // Stage (a): keywords plus the intent type term.
        let mut candidates: Vec<Arc<ToolDefinition>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut terms: Vec<&str> = intent.keywords.iter().map(String::as_str).collect();
        terms.push(intent.intent_type.as_str());
        for term in terms {
            for def in registry.search(term, &search_options) {
                if seen.insert(def.id.clone()) {
                    candidates.push(def);
                }
            }
        }

        // Stage (b): intent type only.
        if candidates.is_empty() {
            candidates = registry.search(intent.intent_type.as_str(), &search_options);
        }

        // Stage (c): everything.
        if candidates.is_empty() {
            candidates = registry.list(&ToolFilter::default());
        }

        // Lenient allowed-category filter.
        if !options.allowed_categories.is_empty() {
            candidates.retain(|def| {
                options
                    .allowed_categories
                    .iter()
                    .any(|term| category_matches(def.category, &term.to_lowercase()))
            });
        }

        // Preferred tools rank ahead; sort is stable so ties keep order.
        if !options.preferred_tools.is_empty() {
            candidates.sort_by_key(|def| {
                if options.preferred_tools.contains(&def.id) {
                    0
                } else {
                    1
                }
            });
        }

        candidates.truncate(2 * options.max_tool_calls.max(1));
        candidates
    }

    /// Priority scoring: base plus weighted contributions, clamped to [0, 1].
    fn priority(&self, def: &ToolDefinition, intent: &Intent) -> f64 {
        let w = &self.weights;
        let mut priority = w.base;

        if category_matches(def.category, intent.intent_type.as_str()) {
            priority += w.category_match;
        }

        let haystack = format!("{} {}", def.name, def.description).to_lowercase();
        for keyword in &intent.keywords {
            if haystack.contains(keyword.as_str()) {
                priority += w.keyword_match;
            }
        }

        if EXACT_ID_BONUS_IDS.contains(&def.id.as_str()) {
            priority += w.exact_id_bonus;
        }

        if intent.intent_type == IntentType::Calculation {
            let text = def.search_text();
            if CALCULATION_MARKERS.iter().any(|m| text.contains(m)) {
                priority += w.calculation_bonus;
            }
        }

        priority.clamp(0.0, 1.0)
    }

    /// An execution-category tool that follows search tools depends on each
    /// of them. Backward references only, so the graph is acyclic by
    /// construction.
    fn infer_dependencies(&self, calls: &mut [PlannedToolCall], registry: &ToolRegistry) {
        let categories: Vec<Option<ToolCategory>> = calls
            .iter()
            .map(|c| registry.get(&c.tool_id).map(|d| d.category))
            .collect();

        let mut search_ids: Vec<String> = Vec::new();
        for (i, call) in calls.iter_mut().enumerate() {
            match categories[i] {
                Some(ToolCategory::Execution) if !search_ids.is_empty() => {
                    call.dependencies = search_ids.clone();
                }
                Some(ToolCategory::Search) => {
                    search_ids.push(call.id.clone());
                }
                _ => {}
            }
        }
    }

    fn confidence(&self, calls: &[PlannedToolCall], complexity: f64) -> f64 {
        if calls.is_empty() {
            return 0.0;
        }
        let mean = calls.iter().map(|c| c.priority).sum::<f64>() / calls.len() as f64;
        (mean * (1.0 - self.weights.complexity_penalty * complexity)).clamp(0.0, 1.0)
    }

    /// Up to two reduced-subset alternatives. Alternatives carry no further
    /// alternatives.
    fn alternatives(&self, plan: &ExecutionPlan) -> Vec<ExecutionPlan> {
        let mut alternatives = Vec::new();
        for n in [2usize, 1] {
            if plan.tool_calls.len() > n {
                alternatives.push(self.subset_plan(plan, n));
            }
            if alternatives.len() == 2 {
                break;
            }
        }
        alternatives
    }

    fn subset_plan(&self, plan: &ExecutionPlan, n: usize) -> ExecutionPlan {
        let calls: Vec<PlannedToolCall> = plan.tool_calls.iter().take(n).cloned().collect();
        let retained: HashSet<String> = calls.iter().map(|c| c.id.clone()).collect();
        let calls = calls
            .into_iter()
            .map(|mut call| {
                call.dependencies.retain(|d| retained.contains(d));
                call
            })
            .collect::<Vec<_>>();

        ExecutionPlan {
            reasoning: format!(
                "Reduced plan using the top {} tool(s): {}.",
                calls.len(),
                calls
                    .iter()
                    .map(|c| c.tool_id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            confidence: (plan.confidence * self.weights.alternative_scale).clamp(0.0, 1.0),
            tool_calls: calls,
            alternatives: Vec::new(),
        }
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(PlannerWeights::default())
    }
}

/// Lenient category matching: direct equality, containment either way, or
/// the symmetric alias table.
pub fn category_matches(category: ToolCategory, term: &str) -> bool {
    let name = category.as_str();
    if name == term || name.contains(term) || term.contains(name) {
        return true;
    }
    let aliases: &[&str] = match category {
        ToolCategory::Integration => &["api", "http"],
        ToolCategory::Search => &["web", "find", "lookup"],
        ToolCategory::Utility => &["text", "processing", "function"],
        ToolCategory::Core => &["ai", "llm", "chat", "embedding"],
        ToolCategory::Data => &["knowledge", "database", "storage"],
        ToolCategory::Execution => &[],
    };
    aliases.contains(&term)
}
