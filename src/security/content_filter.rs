// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Regex content filtering.
//!
//! An ordered set of named filter rules scanned against inbound and
//! outbound text. Rules carrying a replacement redact in place; any match
//! at high severity marks the scan as blocked.
//!
//! The default rule set is compiled once at process start and treated as
//! read-only afterwards.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::audit::Severity;

/// Marker substituted for content that is blocked without a rule-specific
/// replacement.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Category of content a filter rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCategory {
    Pii,
    Malicious,
    Inappropriate,
}

/// One named filter rule.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pub name: String,
    pub pattern: Regex,
    pub severity: Severity,
    pub category: FilterCategory,
    pub replacement: Option<String>,
}

impl FilterRule {
    /// Compile a new rule. Fails if the pattern is not a valid regex.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        severity: Severity,
        category: FilterCategory,
        replacement: Option<&str>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            severity,
            category,
            replacement: replacement.map(|s| s.to_string()),
        })
    }
}

/// A rule that matched during a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterViolation {
    pub filter: String,
    pub severity: Severity,
    pub category: FilterCategory,
    /// Number of matches; the matched text itself is never carried.
    pub matches: usize,
}

/// Result of scanning a piece of text.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub violations: Vec<FilterViolation>,
    /// The text with all rule replacements applied, in rule order.
    pub filtered: String,
    /// True when any violation is at high severity or above.
    pub blocked: bool,
}

impl ScanReport {
    /// Check whether anything matched.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Whether any replacement changed the text.
    pub fn was_redacted(&self, original: &str) -> bool {
        self.filtered != original
    }
}

// Note: the script-block pattern is expressed with non-greedy dotall rather
// than the lookahead form, which the regex crate does not support.
static DEFAULT_RULES: Lazy<Vec<FilterRule>> = Lazy::new(|| {
    vec![
        FilterRule::new(
            "credit_card",
            r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
            Severity::High,
            FilterCategory::Pii,
            Some("[REDACTED_CREDIT_CARD]"),
        )
        .expect("valid credit_card pattern"),
        FilterRule::new(
            "ssn",
            r"\b\d{3}-\d{2}-\d{4}\b",
            Severity::High,
            FilterCategory::Pii,
            Some("[REDACTED_SSN]"),
        )
        .expect("valid ssn pattern"),
        FilterRule::new(
            "email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            Severity::Medium,
            FilterCategory::Pii,
            Some("[REDACTED_EMAIL]"),
        )
        .expect("valid email pattern"),
        FilterRule::new(
            "phone",
            r"\b\d{3}-\d{3}-\d{4}\b|\(\d{3}\)\s?\d{3}-\d{4}",
            Severity::Medium,
            FilterCategory::Pii,
            Some("[REDACTED_PHONE]"),
        )
        .expect("valid phone pattern"),
        FilterRule::new(
            "sql_injection",
            r"(\b(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER)\b.*\b(FROM|INTO|SET|WHERE|TABLE)\b)",
            Severity::High,
            FilterCategory::Malicious,
            None,
        )
        .expect("valid sql_injection pattern"),
        FilterRule::new(
            "xss",
            r"(?is)<script\b.*?</script>",
            Severity::High,
            FilterCategory::Malicious,
            None,
        )
        .expect("valid xss pattern"),
    ]
});

/// Ordered set of filter rules.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    rules: Vec<FilterRule>,
}

impl ContentFilter {
    /// Create a filter with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a filter with the default rule set.
    pub fn with_defaults() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Append a rule after the existing ones.
    pub fn add_rule(&mut self, rule: FilterRule) {
        self.rules.push(rule);
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Scan text against every rule, in order.
    pub fn scan(&self, text: &str) -> ScanReport {
        let mut violations = Vec::new();
        let mut filtered = text.to_string();
        let mut blocked = false;

        for rule in &self.rules {
            let matches = rule.pattern.find_iter(&filtered).count();
            if matches == 0 {
                continue;
            }

            violations.push(FilterViolation {
                filter: rule.name.clone(),
                severity: rule.severity,
                category: rule.category,
                matches,
            });

            if rule.severity >= Severity::High {
                blocked = true;
            }

            if let Some(ref replacement) = rule.replacement {
                filtered = rule
                    .pattern
                    .replace_all(&filtered, replacement.as_str())
                    .into_owned();
            }
        }

        ScanReport {
            violations,
            filtered,
            blocked,
        }
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> ScanReport {
        ContentFilter::with_defaults().scan(text)
    }

    #[test]
    fn test_clean_text() {
        let report = scan("Search for React best practices");
        assert!(report.is_clean());
        assert!(!report.blocked);
        assert_eq!(report.filtered, "Search for React best practices");
    }

    #[test]
    fn test_ssn_redacted_and_blocked() {
        let report = scan("My SSN is 123-45-6789");
        assert!(report.blocked);
        assert_eq!(report.filtered, "My SSN is [REDACTED_SSN]");
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].filter, "ssn");
        assert_eq!(report.violations[0].severity, Severity::High);
    }

    #[test]
    fn test_credit_card_variants() {
        for input in [
            "card 4111 1111 1111 1111 thanks",
            "card 4111-1111-1111-1111 thanks",
            "card 4111111111111111 thanks",
        ] {
            let report = scan(input);
            assert!(report.blocked, "input: {input}");
            assert!(report.filtered.contains("[REDACTED_CREDIT_CARD]"));
        }
    }

    #[test]
    fn test_email_redacted_not_blocked() {
        let report = scan("contact me at alice@example.com");
        assert!(!report.blocked);
        assert_eq!(report.filtered, "contact me at [REDACTED_EMAIL]");
        assert_eq!(report.violations[0].severity, Severity::Medium);
    }

    #[test]
    fn test_phone_variants() {
        let dashed = scan("call 555-123-4567");
        assert!(dashed.filtered.contains("[REDACTED_PHONE]"));

        let parenthesised = scan("call (555) 123-4567");
        assert!(parenthesised.filtered.contains("[REDACTED_PHONE]"));
    }

    #[test]
    fn test_sql_injection_blocks_without_replacement() {
        let input = "please run SELECT * FROM users WHERE 1=1";
        let report = scan(input);
        assert!(report.blocked);
        assert_eq!(report.violations[0].filter, "sql_injection");
        // No replacement configured: text passes through unchanged.
        assert_eq!(report.filtered, input);
    }

    #[test]
    fn test_script_block_detected() {
        let report = scan("hello <script>alert('x')</script> world");
        assert!(report.blocked);
        assert_eq!(report.violations[0].filter, "xss");
        assert_eq!(report.violations[0].category, FilterCategory::Malicious);
    }

    #[test]
    fn test_rule_order_preserved_in_violations() {
        let report = scan("4111111111111111 and alice@example.com");
        let names: Vec<&str> = report.violations.iter().map(|v| v.filter.as_str()).collect();
        assert_eq!(names, vec!["credit_card", "email"]);
    }

    #[test]
    fn test_match_count() {
        let report = scan("a@b.co and c@d.co");
        assert_eq!(report.violations[0].matches, 2);
    }

    #[test]
    fn test_custom_rule() {
        let mut filter = ContentFilter::empty();
        filter.add_rule(
            FilterRule::new(
                "codename",
                r"\bPROJECT-X\b",
                Severity::High,
                FilterCategory::Inappropriate,
                Some("[CLASSIFIED]"),
            )
            .unwrap(),
        );

        let report = filter.scan("status of PROJECT-X?");
        assert!(report.blocked);
        assert_eq!(report.filtered, "status of [CLASSIFIED]?");
    }
}
