// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Parameter synthesis.
//!
//! Fills a candidate tool's input parameters from the query, the analysed
//! intent, and the merged conversation context. Memory-style tools get a
//! dedicated store/recall heuristic; everything else is mapped by property
//! name. A candidate whose parameter map comes out empty is dropped.

use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::types::{ToolCategory, ToolDefinition};

use super::intent::Intent;

const INTERROGATIVE_KEYWORDS: &[&str] = &[
    "what", "tell", "recall", "remember", "said", "did", "where", "when", "how", "who",
];

const KEY_SIGNALS: &[&str] = &["name", "profession", "location", "interests", "workplace"];

static VALUE_PATTERN: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"(?i)(?:name is|i'm|called)\s+(\w+)").expect("valid value pattern")
});

/// Synthesise parameters for one candidate tool.
pub fn synthesize(
    tool: &ToolDefinition,
    intent: &Intent,
    query: &str,
    context: &Map<String, Value>,
) -> Option<Map<String, Value>> {
    let properties = tool.input_schema.properties.as_ref();

    if is_memory_tool(tool) {
        if properties.map(|p| p.contains_key("action")).unwrap_or(false) {
            return Some(memory_parameters(query));
        }
    }

    let mut params = Map::new();
    if let Some(properties) = properties {
        for name in properties.keys() {
            match name.as_str() {
                "query" | "question" => {
                    if !intent.keywords.is_empty() {
                        params.insert(name.clone(), Value::String(intent.keywords.join(" ")));
                    }
                }
                "text" | "content" => {
                    params.insert(name.clone(), Value::String(query.to_string()));
                }
                "url" => {
                    if let Some(url) = query.split_whitespace().find(|t| t.contains("http")) {
                        params.insert(name.clone(), Value::String(url.to_string()));
                    }
                }
                _ => {
                    if let Some(value) = context.get(name) {
                        params.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }

    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

/// Memory-style tool detection: id mentions memory, or a utility tool whose
/// name does.
pub fn is_memory_tool(tool: &ToolDefinition) -> bool {
    tool.id.contains("memory")
        || (tool.category == ToolCategory::Utility && tool.name.to_lowercase().contains("memory"))
}

fn memory_parameters(query: &str) -> Map<String, Value> {
    let lowered = query.to_lowercase();
    let mut params = Map::new();

    if is_recall_query(&lowered) {
        params.insert("action".to_string(), Value::String("recall".to_string()));
        match extract_key(&lowered) {
            Some(key) => {
                params.insert("key".to_string(), Value::String(key.to_string()));
            }
            None => {
                params.insert("query".to_string(), Value::String(query.to_string()));
            }
        }
    } else {
        params.insert("action".to_string(), Value::String("store".to_string()));
        let key = extract_key(&lowered).unwrap_or("general");
        params.insert("key".to_string(), Value::String(key.to_string()));
        let value = VALUE_PATTERN
            .captures(query)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| query.to_string());
        params.insert("value".to_string(), Value::String(value));
    }

    params
}

fn is_recall_query(lowered: &str) -> bool {
    if lowered.contains('?') || lowered.contains("about") {
        return true;
    }
    lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .any(|t| {
            INTERROGATIVE_KEYWORDS.contains(&t)
                || t.split('\'').next().map(|s| INTERROGATIVE_KEYWORDS.contains(&s)).unwrap_or(false)
        })
}

fn extract_key(lowered: &str) -> Option<&'static str> {
    KEY_SIGNALS.iter().find(|k| lowered.contains(*k)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::intent::analyze;
    use crate::schema::Schema;
    use serde_json::json;

    fn memory_tool() -> ToolDefinition {
        ToolDefinition::new("memory-store", "Memory", "stores and recalls facts").with_input_schema(
            Schema::object()
                .with_property("action", Schema::string())
                .with_property("key", Schema::string())
                .with_property("value", Schema::string())
                .with_property("query", Schema::string()),
        )
    }

    fn search_tool() -> ToolDefinition {
        ToolDefinition::new("web-search", "Web Search", "searches the web").with_input_schema(
            Schema::object().with_property("query", Schema::string()),
        )
    }

    fn synth(tool: &ToolDefinition, query: &str) -> Option<Map<String, Value>> {
        let intent = analyze(query);
        synthesize(tool, &intent, query, &Map::new())
    }

    #[test]
    fn test_memory_store_name() {
        let params = synth(&memory_tool(), "My name is Alice").unwrap();
        assert_eq!(params["action"], "store");
        assert_eq!(params["key"], "name");
        assert_eq!(params["value"], "Alice");
    }

    #[test]
    fn test_memory_recall_name() {
        let params = synth(&memory_tool(), "What's my name?").unwrap();
        assert_eq!(params["action"], "recall");
        assert_eq!(params["key"], "name");
    }

    #[test]
    fn test_memory_recall_via_about() {
        let params = synth(&memory_tool(), "tell me about my workplace").unwrap();
        assert_eq!(params["action"], "recall");
        assert_eq!(params["key"], "workplace");
    }

    #[test]
    fn test_memory_store_fallback_value() {
        let params = synth(&memory_tool(), "my profession involves welding").unwrap();
        assert_eq!(params["action"], "store");
        assert_eq!(params["key"], "profession");
        // No "name is"-style marker: the raw query is stored.
        assert_eq!(params["value"], "my profession involves welding");
    }

    #[test]
    fn test_memory_recall_without_key_uses_query() {
        let params = synth(&memory_tool(), "what did I say earlier?").unwrap();
        assert_eq!(params["action"], "recall");
        assert!(params.contains_key("query"));
        assert!(!params.contains_key("key"));
    }

    #[test]
    fn test_memory_detection_by_utility_name() {
        let tool = ToolDefinition::new("kv-store", "Session Memory", "remembers things")
            .with_category(ToolCategory::Utility)
            .with_input_schema(
                Schema::object()
                    .with_property("action", Schema::string())
                    .with_property("key", Schema::string()),
            );
        assert!(is_memory_tool(&tool));
    }

    #[test]
    fn test_query_property_from_keywords() {
        let params = synth(&search_tool(), "Search for React best practices").unwrap();
        assert_eq!(params["query"], "search for react best practices");
    }

    #[test]
    fn test_text_property_gets_raw_query() {
        let tool = ToolDefinition::new("tts", "Speaker", "reads text aloud")
            .with_input_schema(Schema::object().with_property("text", Schema::string()));
        let params = synth(&tool, "Say Hello there").unwrap();
        assert_eq!(params["text"], "Say Hello there");
    }

    #[test]
    fn test_url_property_from_token() {
        let tool = ToolDefinition::new("fetch", "Fetcher", "fetches a url")
            .with_input_schema(Schema::object().with_property("url", Schema::string()));
        let params = synth(&tool, "fetch https://example.com please").unwrap();
        assert_eq!(params["url"], "https://example.com");
    }

    #[test]
    fn test_context_fallback() {
        let tool = ToolDefinition::new("kb", "Knowledge", "looks up a topic")
            .with_input_schema(Schema::object().with_property("topic", Schema::string()));
        let intent = analyze("look this up");
        let mut context = Map::new();
        context.insert("topic".to_string(), json!("rust"));
        let params = synthesize(&tool, &intent, "look this up", &context).unwrap();
        assert_eq!(params["topic"], "rust");
    }

    #[test]
    fn test_empty_parameters_drop_candidate() {
        let tool = ToolDefinition::new("opaque", "Opaque", "no mappable properties")
            .with_input_schema(Schema::object().with_property("blob", Schema::string()));
        assert!(synth(&tool, "do something").is_none());
    }
}
