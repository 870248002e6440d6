// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation state.
//!
//! A conversation is an append-only message log plus a mutable, bounded
//! context map. The context store prunes itself once its serialized size
//! passes a threshold, keeping the important keys and the most recently
//! updated entries.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::security::PolicyLevel;
use crate::types::Message;

/// Serialized context size that triggers pruning.
const MAX_CONTEXT_CHARS: usize = 1000;

/// Entries kept on recency during a prune.
const KEEP_RECENT: usize = 10;

/// Keys always retained during a prune.
const IMPORTANT_KEYS: &[&str] = &["user_preferences", "session_data"];

/// How much detail goes into assistant replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Minimal,
    #[default]
    Normal,
    Verbose,
}

/// Per-conversation preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationPreferences {
    pub auto_execute: bool,
    pub max_tool_calls: usize,
    /// Lenient category terms the planner may select from.
    pub allowed_categories: Vec<String>,
    pub verbosity: Verbosity,
    pub safety_level: PolicyLevel,
    pub preferred_tools: Vec<String>,
    /// Subject for rate limiting and audit; defaults to the conversation id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

impl Default for ConversationPreferences {
    fn default() -> Self {
        Self {
            auto_execute: true,
            max_tool_calls: 3,
            allowed_categories: vec![
                "knowledge".to_string(),
                "search".to_string(),
                "utility".to_string(),
                "ai".to_string(),
            ],
            verbosity: Verbosity::Normal,
            safety_level: PolicyLevel::Medium,
            preferred_tools: Vec::new(),
            principal: None,
        }
    }
}

/// Partial preferences update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesPatch {
    pub auto_execute: Option<bool>,
    pub max_tool_calls: Option<usize>,
    pub allowed_categories: Option<Vec<String>>,
    pub verbosity: Option<Verbosity>,
    pub safety_level: Option<PolicyLevel>,
    pub preferred_tools: Option<Vec<String>>,
    pub principal: Option<String>,
}

impl PreferencesPatch {
    /// Apply the patch onto existing preferences.
    pub fn apply(self, preferences: &mut ConversationPreferences) {
        if let Some(auto_execute) = self.auto_execute {
            preferences.auto_execute = auto_execute;
        }
        if let Some(max_tool_calls) = self.max_tool_calls {
            preferences.max_tool_calls = max_tool_calls;
        }
        if let Some(allowed_categories) = self.allowed_categories {
            preferences.allowed_categories = allowed_categories;
        }
        if let Some(verbosity) = self.verbosity {
            preferences.verbosity = verbosity;
        }
        if let Some(safety_level) = self.safety_level {
            preferences.safety_level = safety_level;
        }
        if let Some(preferred_tools) = self.preferred_tools {
            preferences.preferred_tools = preferred_tools;
        }
        if let Some(principal) = self.principal {
            preferences.principal = Some(principal);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextEntry {
    value: serde_json::Value,
    updated_at: DateTime<Utc>,
    seq: u64,
}

/// Bounded per-conversation key/value store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStore {
    entries: BTreeMap<String, ContextEntry>,
    next_seq: u64,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.into(),
            ContextEntry {
                value,
                updated_at: Utc::now(),
                seq,
            },
        );
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Merge every field of a JSON object into the store.
    pub fn merge_object(&mut self, object: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in object {
            self.set(key.clone(), value.clone());
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key-sorted snapshot of the current values.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Serialized size of the snapshot, in characters.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(&self.snapshot())
            .map(|s| s.chars().count())
            .unwrap_or(0)
    }

    /// Prune once the serialized size passes the threshold: keep the
    /// important keys plus the most recently updated entries, drop the rest
    /// in one step.
    pub fn prune(&mut self) {
        if self.serialized_len() <= MAX_CONTEXT_CHARS {
            return;
        }

        let mut recency: Vec<(&String, u64)> = self
            .entries
            .iter()
            .filter(|(k, _)| !IMPORTANT_KEYS.contains(&k.as_str()))
            .map(|(k, e)| (k, e.seq))
            .collect();
        recency.sort_by(|a, b| b.1.cmp(&a.1));

        let keep: BTreeSet<String> = IMPORTANT_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(recency.iter().take(KEEP_RECENT).map(|(k, _)| (*k).clone()))
            .collect();

        self.entries.retain(|k, _| keep.contains(k));
    }
}

/// A stateful dialogue: append-only messages plus mutable context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub preferences: ConversationPreferences,
    pub messages: Vec<Message>,
    pub context: ContextStore,
    /// Ids of tools executed at least once in this conversation.
    pub active_tools: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation.
    pub fn new(preferences: ConversationPreferences) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            preferences,
            messages: Vec::new(),
            context: ContextStore::new(),
            active_tools: BTreeSet::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Principal for rate limiting and audit.
    pub fn principal(&self) -> String {
        self.preferences
            .principal
            .clone()
            .unwrap_or_else(|| self.id.clone())
    }

    /// Append a message and advance the activity timestamp.
    ///
    /// `last_activity_at` is strictly monotonic even when appends land on
    /// the same clock tick.
    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Advance `last_activity_at`, strictly.
    pub fn touch(&mut self) {
        let now = Utc::now();
        let bumped = self.last_activity_at + Duration::microseconds(1);
        self.last_activity_at = now.max(bumped);
    }

    /// Number of messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_preferences() {
        let prefs = ConversationPreferences::default();
        assert!(prefs.auto_execute);
        assert_eq!(prefs.max_tool_calls, 3);
        assert_eq!(
            prefs.allowed_categories,
            vec!["knowledge", "search", "utility", "ai"]
        );
        assert_eq!(prefs.verbosity, Verbosity::Normal);
        assert_eq!(prefs.safety_level, PolicyLevel::Medium);
        assert!(prefs.preferred_tools.is_empty());
    }

    #[test]
    fn test_preferences_patch() {
        let mut prefs = ConversationPreferences::default();
        PreferencesPatch {
            auto_execute: Some(false),
            max_tool_calls: Some(2),
            ..Default::default()
        }
        .apply(&mut prefs);

        assert!(!prefs.auto_execute);
        assert_eq!(prefs.max_tool_calls, 2);
        // Untouched fields keep their defaults.
        assert_eq!(prefs.verbosity, Verbosity::Normal);
    }

    #[test]
    fn test_context_set_get() {
        let mut context = ContextStore::new();
        context.set("name", json!("Alice"));
        assert_eq!(context.get("name"), Some(&json!("Alice")));
        assert!(context.get("missing").is_none());
    }

    #[test]
    fn test_context_snapshot_sorted() {
        let mut context = ContextStore::new();
        context.set("zebra", json!(1));
        context.set("apple", json!(2));
        let snapshot = context.snapshot();
        let keys: Vec<&String> = snapshot.keys().collect::<Vec<_>>();
        assert_eq!(keys, vec!["apple", "zebra"]);
    }

    #[test]
    fn test_context_prune_keeps_important_and_recent() {
        let mut context = ContextStore::new();
        context.set("user_preferences", json!({"theme": "dark"}));
        // Enough bulk to cross the serialized threshold.
        for i in 0..30 {
            context.set(format!("entry-{i:02}"), json!("x".repeat(40)));
        }
        assert!(context.serialized_len() > 1000);

        context.prune();

        assert!(context.get("user_preferences").is_some());
        // Ten most recent survive.
        assert!(context.get("entry-29").is_some());
        assert!(context.get("entry-20").is_some());
        assert!(context.get("entry-19").is_none());
        assert!(context.get("entry-00").is_none());
        assert_eq!(context.len(), 11);
    }

    #[test]
    fn test_context_prune_noop_under_threshold() {
        let mut context = ContextStore::new();
        context.set("small", json!("value"));
        context.prune();
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_context_update_refreshes_recency() {
        let mut context = ContextStore::new();
        context.set("first", json!("x".repeat(40)));
        for i in 0..20 {
            context.set(format!("filler-{i:02}"), json!("x".repeat(40)));
        }
        // Updating "first" makes it the most recent entry again.
        context.set("first", json!("updated"));
        assert!(context.serialized_len() > 1000);
        context.prune();
        assert_eq!(context.get("first"), Some(&json!("updated")));
        assert!(context.get("filler-00").is_none());
    }

    #[test]
    fn test_conversation_activity_strictly_increases() {
        let mut conversation = Conversation::new(ConversationPreferences::default());
        let t0 = conversation.last_activity_at;
        conversation.append_message(Message::user("one"));
        let t1 = conversation.last_activity_at;
        conversation.append_message(Message::assistant("two"));
        let t2 = conversation.last_activity_at;

        assert!(t1 > t0);
        assert!(t2 > t1);
        assert_eq!(conversation.message_count(), 2);
    }

    #[test]
    fn test_principal_defaults_to_conversation_id() {
        let conversation = Conversation::new(ConversationPreferences::default());
        assert_eq!(conversation.principal(), conversation.id);

        let mut prefs = ConversationPreferences::default();
        prefs.principal = Some("user-7".to_string());
        let conversation = Conversation::new(prefs);
        assert_eq!(conversation.principal(), "user-7");
    }

    #[test]
    fn test_merge_object() {
        let mut context = ContextStore::new();
        let object = json!({"name": "Alice", "city": "Paris"});
        context.merge_object(object.as_object().unwrap());
        assert_eq!(context.get("name"), Some(&json!("Alice")));
        assert_eq!(context.get("city"), Some(&json!("Paris")));
    }
}
