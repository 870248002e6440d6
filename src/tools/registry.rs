// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry.
//!
//! Keeps immutable [`ToolDefinition`]s together with their handlers,
//! maintains category/kind/tag indexes atomically with the primary map, and
//! provides exact, substring and fuzzy-subsequence search with deterministic
//! ranking.
//!
//! Locking: one `RwLock` guards the primary map and every index, so readers
//! can never observe a tool listed in an index but absent from the map.
//! Writes (register/unregister) are rare; reads are the hot path.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::RegistryError;
use crate::schema::{ValidationCode, ValidationError};
use crate::tools::ToolHandler;
use crate::types::{ToolCategory, ToolDefinition, ToolKind};

static ID_PATTERN: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid id pattern"));

static SEMVER_PATTERN: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver pattern"));

/// A registered tool: immutable definition plus its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: Arc<ToolDefinition>,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("id", &self.definition.id)
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    tools: HashMap<String, RegisteredTool>,
    by_category: HashMap<ToolCategory, BTreeSet<String>>,
    by_kind: HashMap<ToolKind, BTreeSet<String>>,
    by_tag: HashMap<String, BTreeSet<String>>,
}

/// Filter applied by [`ToolRegistry::list`] and carried by search options.
#[derive(Debug, Clone)]
pub struct ToolFilter {
    pub category: Option<ToolCategory>,
    pub kind: Option<ToolKind>,
    /// Tool must carry every listed tag.
    pub tags: Vec<String>,
    pub include_deprecated: bool,
    pub include_experimental: bool,
}

impl Default for ToolFilter {
    fn default() -> Self {
        Self {
            category: None,
            kind: None,
            tags: Vec::new(),
            include_deprecated: false,
            include_experimental: true,
        }
    }
}

impl ToolFilter {
    /// Filter by category.
    pub fn category(category: ToolCategory) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    /// Filter by kind.
    pub fn kind(kind: ToolKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    fn matches(&self, def: &ToolDefinition) -> bool {
        if let Some(category) = self.category {
            if def.category != category {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if def.kind != kind {
                return false;
            }
        }
        if !self.tags.iter().all(|t| def.tags.contains(t)) {
            return false;
        }
        if def.deprecated && !self.include_deprecated {
            return false;
        }
        if def.experimental && !self.include_experimental {
            return false;
        }
        true
    }
}

/// Options for [`ToolRegistry::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub filter: ToolFilter,
    /// Subsequence matching instead of substring matching.
    pub fuzzy: bool,
    /// Truncate results after sorting.
    pub limit: Option<usize>,
}

/// Registry totals, by category and kind.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<String, usize>,
    pub deprecated: usize,
    pub experimental: usize,
}

impl RegistryStats {
    /// Format the stats for display.
    pub fn format(&self) -> String {
        let categories = self
            .by_category
            .iter()
            .map(|(c, n)| format!("{c}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} tool(s) ({categories}); {} deprecated, {} experimental",
            self.total, self.deprecated, self.experimental
        )
    }
}

/// Registry of available tools.
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register a tool definition with its handler.
    ///
    /// The definition is validated first; a duplicate id is rejected with
    /// `ALREADY_EXISTS`. The primary map and all indexes are updated under
    /// one write lock so the change appears atomic to readers.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        let errors = validate_definition(&definition);
        if !errors.is_empty() {
            return Err(RegistryError::ValidationFailed {
                id: definition.id.clone(),
                errors,
            });
        }

        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.tools.contains_key(&definition.id) {
            return Err(RegistryError::AlreadyExists(definition.id));
        }

        let id = definition.id.clone();
        inner
            .by_category
            .entry(definition.category)
            .or_default()
            .insert(id.clone());
        inner
            .by_kind
            .entry(definition.kind)
            .or_default()
            .insert(id.clone());
        for tag in &definition.tags {
            inner.by_tag.entry(tag.clone()).or_default().insert(id.clone());
        }

        debug!(tool = %id, category = %definition.category, "Registered tool");
        inner.tools.insert(
            id,
            RegisteredTool {
                definition: Arc::new(definition),
                handler,
            },
        );
        Ok(())
    }

    /// Remove a tool from the primary map and every index.
    pub fn unregister(&self, id: &str) -> Result<Arc<ToolDefinition>, RegistryError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let removed = inner
            .tools
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let def = &removed.definition;
        if let Some(ids) = inner.by_category.get_mut(&def.category) {
            ids.remove(id);
            if ids.is_empty() {
                inner.by_category.remove(&def.category);
            }
        }
        if let Some(ids) = inner.by_kind.get_mut(&def.kind) {
            ids.remove(id);
            if ids.is_empty() {
                inner.by_kind.remove(&def.kind);
            }
        }
        for tag in &def.tags {
            if let Some(ids) = inner.by_tag.get_mut(tag) {
                ids.remove(id);
                if ids.is_empty() {
                    inner.by_tag.remove(tag);
                }
            }
        }

        debug!(tool = %id, "Unregistered tool");
        Ok(removed.definition.clone())
    }

    /// Get a tool definition by id.
    pub fn get(&self, id: &str) -> Option<Arc<ToolDefinition>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.get(id).map(|t| t.definition.clone())
    }

    /// Get a tool's handler by id.
    pub fn handler(&self, id: &str) -> Option<Arc<dyn ToolHandler>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.get(id).map(|t| t.handler.clone())
    }

    /// Get a definition together with its handler.
    pub fn entry(&self, id: &str) -> Option<RegisteredTool> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.get(id).cloned()
    }

    /// Check if a tool exists.
    pub fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.contains_key(id)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List tools matching a filter, sorted by id.
    ///
    /// Uses the narrowest available index to seed the candidate set.
    pub fn list(&self, filter: &ToolFilter) -> Vec<Arc<ToolDefinition>> {
        let inner = self.inner.read().expect("registry lock poisoned");

        let seed: Option<&BTreeSet<String>> = if let Some(category) = filter.category {
            Some(inner.by_category.get(&category).unwrap_or(&EMPTY_IDS))
        } else if let Some(kind) = filter.kind {
            Some(inner.by_kind.get(&kind).unwrap_or(&EMPTY_IDS))
        } else if let Some(tag) = filter.tags.first() {
            Some(inner.by_tag.get(tag).unwrap_or(&EMPTY_IDS))
        } else {
            None
        };

        let mut results: Vec<Arc<ToolDefinition>> = match seed {
            Some(ids) => ids
                .iter()
                .filter_map(|id| inner.tools.get(id))
                .map(|t| t.definition.clone())
                .filter(|d| filter.matches(d))
                .collect(),
            None => inner
                .tools
                .values()
                .map(|t| t.definition.clone())
                .filter(|d| filter.matches(d))
                .collect(),
        };

        results.sort_by(|a, b| a.id.cmp(&b.id));
        results
    }

    /// Search tools by query with deterministic ranking.
    ///
    /// An empty query degrades to [`list`](Self::list). Results are sorted
    /// by score descending, then id ascending, so the ordering is stable
    /// under any registration order.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<Arc<ToolDefinition>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            let mut results = self.list(&options.filter);
            if let Some(limit) = options.limit {
                results.truncate(limit);
            }
            return results;
        }

        let mut scored: Vec<(u32, Arc<ToolDefinition>)> = self
            .list(&options.filter)
            .into_iter()
            .filter_map(|def| {
                let score = score_tool(&def, &query);
                let matched = if options.fuzzy {
                    is_subsequence(&query, &def.search_text())
                } else {
                    score > 0
                };
                matched.then_some((score, def))
            })
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.id.cmp(&b.id)));

        let mut results: Vec<Arc<ToolDefinition>> =
            scored.into_iter().map(|(_, def)| def).collect();
        if let Some(limit) = options.limit {
            results.truncate(limit);
        }
        results
    }

    /// Registry totals by category and kind.
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut by_category = BTreeMap::new();
        let mut by_kind = BTreeMap::new();
        let mut deprecated = 0;
        let mut experimental = 0;

        for tool in inner.tools.values() {
            let def = &tool.definition;
            *by_category.entry(def.category.to_string()).or_insert(0) += 1;
            *by_kind.entry(def.kind.to_string()).or_insert(0) += 1;
            if def.deprecated {
                deprecated += 1;
            }
            if def.experimental {
                experimental += 1;
            }
        }

        RegistryStats {
            total: inner.tools.len(),
            by_category,
            by_kind,
            deprecated,
            experimental,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static EMPTY_IDS: Lazy<BTreeSet<String>> = Lazy::new(BTreeSet::new);

/// Ranking per match condition, all case-insensitive.
fn score_tool(def: &ToolDefinition, query: &str) -> u32 {
    let name = def.name.to_lowercase();
    let description = def.description.to_lowercase();
    let id = def.id.to_lowercase();

    let mut score = 0;
    if name == query {
        score += 100;
    }
    if id == query {
        score += 90;
    }
    if name.starts_with(query) {
        score += 50;
    }
    if description.starts_with(query) {
        score += 30;
    }
    if name.contains(query) {
        score += 20;
    }
    if description.contains(query) {
        score += 10;
    }
    for tag in &def.tags {
        if tag.to_lowercase().contains(query) {
            score += 15;
        }
    }
    score
}

/// Check that the characters of `needle` appear in order within `haystack`.
fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut chars = needle.chars();
    let mut current = match chars.next() {
        Some(c) => c,
        None => return true,
    };
    for c in haystack.chars() {
        if c == current {
            match chars.next() {
                Some(next) => current = next,
                None => return true,
            }
        }
    }
    false
}

/// Self-validation run against every definition at registration time.
fn validate_definition(def: &ToolDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |path: &str, code: ValidationCode, message: String| {
        errors.push(ValidationError {
            path: path.to_string(),
            message,
            code,
            value: None,
        });
    };

    if def.id.is_empty() || !ID_PATTERN.is_match(&def.id) {
        push(
            "$.id",
            ValidationCode::PatternMismatch,
            format!("id must be non-empty and match [A-Za-z0-9_-]+, got '{}'", def.id),
        );
    }
    if def.name.trim().is_empty() {
        push(
            "$.name",
            ValidationCode::RequiredField,
            "name must not be empty".to_string(),
        );
    }
    if def.description.trim().is_empty() {
        push(
            "$.description",
            ValidationCode::RequiredField,
            "description must not be empty".to_string(),
        );
    }
    if !SEMVER_PATTERN.is_match(&def.version) {
        push(
            "$.version",
            ValidationCode::PatternMismatch,
            format!("version must be semver (major.minor.patch), got '{}'", def.version),
        );
    }
    for issue in def.input_schema.check_well_formed() {
        push(
            "$.inputSchema",
            ValidationCode::InvalidSchema,
            issue,
        );
    }
    for issue in def.output_schema.check_well_formed() {
        push(
            "$.outputSchema",
            ValidationCode::InvalidSchema,
            issue,
        );
    }
    if def.execution.timeout_ms == 0 {
        push(
            "$.execution.timeoutMs",
            ValidationCode::MinValue,
            "timeoutMs must be positive".to_string(),
        );
    }
    if let Some(limits) = def.execution.resource_limits {
        if limits.max_memory_mb == 0 {
            push(
                "$.execution.resourceLimits.maxMemoryMB",
                ValidationCode::MinValue,
                "maxMemoryMB must be positive".to_string(),
            );
        }
    }

    errors
}
