// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Intent analysis.
//!
//! Classifies a free-text query into a type, keyword multiset, entity list
//! and complexity score. Purely lexical: tokenize on whitespace, drop
//! tokens of length <= 2, lowercase, then match keyword sets in a fixed
//! order (first match wins).

use serde::{Deserialize, Serialize};

const SEARCH_KEYWORDS: &[&str] = &["search", "find", "lookup"];
const CALC_KEYWORDS: &[&str] = &["calculate", "compute", "math"];
const CODE_KEYWORDS: &[&str] = &["code", "program", "script"];
const API_KEYWORDS: &[&str] = &["api", "request", "call"];

/// Classified intent type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Search,
    Calculation,
    Code,
    Api,
    General,
}

impl IntentType {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Calculation => "calculation",
            Self::Code => "code",
            Self::Api => "api",
            Self::General => "general",
        }
    }
}

/// Result of analysing a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Lowercased tokens longer than two characters, in query order.
    pub keywords: Vec<String>,
    /// Tokens that start with an uppercase letter in the original string.
    pub entities: Vec<String>,
    /// `min(1, |keywords| / 5)`.
    pub complexity: f64,
}

/// Analyse a query.
pub fn analyze(query: &str) -> Intent {
    let mut keywords = Vec::new();
    let mut entities = Vec::new();

    for token in query.split_whitespace() {
        if token
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false)
        {
            entities.push(token.to_string());
        }

        let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        if trimmed.chars().count() > 2 {
            keywords.push(trimmed.to_lowercase());
        }
    }

    let intent_type = classify(&keywords);
    let complexity = (keywords.len() as f64 / 5.0).min(1.0);

    Intent {
        intent_type,
        keywords,
        entities,
        complexity,
    }
}

fn classify(keywords: &[String]) -> IntentType {
    let contains_any = |set: &[&str]| keywords.iter().any(|k| set.contains(&k.as_str()));

    if contains_any(SEARCH_KEYWORDS) {
        IntentType::Search
    } else if contains_any(CALC_KEYWORDS) {
        IntentType::Calculation
    } else if contains_any(CODE_KEYWORDS) {
        IntentType::Code
    } else if contains_any(API_KEYWORDS) {
        IntentType::Api
    } else {
        IntentType::General
    }
}
