// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security gate.
//!
//! Wraps every tool call with pre- and post-execution checks:
//!
//! - [`RateLimiter`] - windowed request/token budgets per principal
//! - [`ContentFilter`] - regex redaction and blocking
//! - [`ResourceMonitor`] - per-session resource accounting
//! - [`AuditBuffer`] - bounded ring of security events
//!
//! Policy presets fix the budgets per level; the preset table is built once
//! at process start and read-only afterwards.

pub mod audit;
pub mod content_filter;
pub mod rate_limit;
pub mod resources;

pub use audit::{
    AuditBuffer, AuditQuery, SecurityEvent, SecurityEventKind, Severity, DEFAULT_AUDIT_CAPACITY,
};
pub use content_filter::{
    ContentFilter, FilterCategory, FilterRule, FilterViolation, ScanReport, REDACTION_MARKER,
};
pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter};
pub use resources::{ResourceCaps, ResourceCheck, ResourceMonitor, ResourceUsage};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ToolCategory, ToolDefinition};

/// Security policy level presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

/// A resolved security policy. Callers may use a preset or supply their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicy {
    pub level: PolicyLevel,
    pub max_tool_calls: usize,
    pub max_execution_time_ms: u64,
    pub max_memory_mb: u64,
    /// Empty means every category is allowed.
    pub allowed_categories: Vec<String>,
    pub blocked_categories: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub require_approval: bool,
    pub content_filtering: bool,
    pub resource_monitoring: bool,
    pub audit_logging: bool,
}

static DEFAULT_POLICIES: Lazy<HashMap<PolicyLevel, SecurityPolicy>> = Lazy::new(|| {
    let mut presets = HashMap::new();
    presets.insert(
        PolicyLevel::Low,
        SecurityPolicy {
            level: PolicyLevel::Low,
            max_tool_calls: 10,
            max_execution_time_ms: 30_000,
            max_memory_mb: 100,
            allowed_categories: Vec::new(),
            blocked_categories: Vec::new(),
            blocked_domains: Vec::new(),
            require_approval: false,
            content_filtering: true,
            resource_monitoring: false,
            audit_logging: true,
        },
    );
    presets.insert(
        PolicyLevel::Medium,
        SecurityPolicy {
            level: PolicyLevel::Medium,
            max_tool_calls: 5,
            max_execution_time_ms: 15_000,
            max_memory_mb: 50,
            allowed_categories: Vec::new(),
            blocked_categories: Vec::new(),
            blocked_domains: Vec::new(),
            require_approval: false,
            content_filtering: true,
            resource_monitoring: true,
            audit_logging: true,
        },
    );
    presets.insert(
        PolicyLevel::High,
        SecurityPolicy {
            level: PolicyLevel::High,
            max_tool_calls: 3,
            max_execution_time_ms: 10_000,
            max_memory_mb: 25,
            allowed_categories: Vec::new(),
            blocked_categories: vec!["execution".to_string()],
            blocked_domains: Vec::new(),
            require_approval: true,
            content_filtering: true,
            resource_monitoring: true,
            audit_logging: true,
        },
    );
    presets.insert(
        PolicyLevel::Maximum,
        SecurityPolicy {
            level: PolicyLevel::Maximum,
            max_tool_calls: 1,
            max_execution_time_ms: 5_000,
            max_memory_mb: 10,
            allowed_categories: Vec::new(),
            blocked_categories: vec!["execution".to_string(), "integration".to_string()],
            blocked_domains: Vec::new(),
            require_approval: true,
            content_filtering: true,
            resource_monitoring: true,
            audit_logging: true,
        },
    );
    presets
});

impl SecurityPolicy {
    /// Preset policy for a level.
    pub fn preset(level: PolicyLevel) -> Self {
        DEFAULT_POLICIES[&level].clone()
    }

    fn category_allowed(&self, category: ToolCategory) -> bool {
        let name = category.as_str();
        if self.blocked_categories.iter().any(|c| c == name) {
            return false;
        }
        self.allowed_categories.is_empty() || self.allowed_categories.iter().any(|c| c == name)
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::preset(PolicyLevel::Medium)
    }
}

/// One violation found by a gate check.
#[derive(Debug, Clone)]
pub struct GateViolation {
    pub code: String,
    pub message: String,
    pub kind: SecurityEventKind,
    pub severity: Severity,
}

/// Outcome of the message-level check (rate limit + input filtering).
#[derive(Debug, Clone)]
pub struct MessageCheck {
    pub allowed: bool,
    pub violations: Vec<GateViolation>,
    /// Input content with redactions applied; always safe to store.
    pub filtered_content: String,
    pub retry_after_ms: Option<u64>,
}

/// Outcome of the pre-execution check for one tool call.
#[derive(Debug, Clone)]
pub struct PreCheck {
    pub allowed: bool,
    pub violations: Vec<GateViolation>,
    pub filtered_parameters: serde_json::Value,
}

/// Outcome of the post-execution check for one tool call.
#[derive(Debug, Clone)]
pub struct PostCheck {
    /// False when the result was blocked and replaced.
    pub allowed: bool,
    pub violations: Vec<GateViolation>,
    pub filtered_result: serde_json::Value,
}

/// Identifies the call being checked.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub principal: &'a str,
    pub conversation_id: &'a str,
    /// Tool calls already executed this turn.
    pub calls_so_far: usize,
}

/// The security gate invoked by the orchestrator around every tool call.
pub struct SecurityGate {
    policy: SecurityPolicy,
    rate_limiter: RateLimiter,
    content_filter: ContentFilter,
    resource_monitor: ResourceMonitor,
    audit: Arc<AuditBuffer>,
}

impl SecurityGate {
    /// Create a gate with the given policy and rate limiter settings.
    pub fn new(policy: SecurityPolicy, rate_limit: RateLimitConfig) -> Self {
        Self {
            policy,
            rate_limiter: RateLimiter::new(rate_limit),
            content_filter: ContentFilter::with_defaults(),
            resource_monitor: ResourceMonitor::default(),
            audit: Arc::new(AuditBuffer::default()),
        }
    }

    /// Create a gate from a policy level preset.
    pub fn with_level(level: PolicyLevel) -> Self {
        Self::new(SecurityPolicy::preset(level), RateLimitConfig::default())
    }

    /// Replace the content filter.
    pub fn set_content_filter(&mut self, filter: ContentFilter) {
        self.content_filter = filter;
    }

    /// Active policy.
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Audit buffer handle.
    pub fn audit(&self) -> Arc<AuditBuffer> {
        self.audit.clone()
    }

    /// Resource monitor handle.
    pub fn resources(&self) -> &ResourceMonitor {
        &self.resource_monitor
    }

    /// Message-level check: rate limit the principal and redact the input.
    ///
    /// A blocked filter match does not reject the message; the redacted
    /// content is what gets stored and planned over.
    pub fn check_message(
        &self,
        principal: &str,
        conversation_id: &str,
        content: &str,
    ) -> MessageCheck {
        let mut violations = Vec::new();

        let decision = self.rate_limiter.check(principal, content.len() as u64);
        if !decision.allowed {
            let violation = GateViolation {
                code: "RATE_LIMITED".to_string(),
                message: format!(
                    "rate limit exceeded; retry after {}ms",
                    decision.retry_after_ms
                ),
                kind: SecurityEventKind::RateLimit,
                severity: Severity::Medium,
            };
            self.record(&violation, principal, conversation_id);
            return MessageCheck {
                allowed: false,
                violations: vec![violation],
                filtered_content: content.to_string(),
                retry_after_ms: Some(decision.retry_after_ms),
            };
        }

        let filtered_content = if self.policy.content_filtering {
            let report = self.content_filter.scan(content);
            for fv in &report.violations {
                let violation = GateViolation {
                    code: "POLICY_VIOLATION".to_string(),
                    message: format!("content filter '{}' matched {} time(s)", fv.filter, fv.matches),
                    kind: SecurityEventKind::ContentFilter,
                    severity: fv.severity,
                };
                self.record(&violation, principal, conversation_id);
                violations.push(violation);
            }
            report.filtered
        } else {
            content.to_string()
        };

        MessageCheck {
            allowed: true,
            violations,
            filtered_content,
            retry_after_ms: None,
        }
    }

    /// Pre-execution check for one planned tool call.
    pub fn pre_check(
        &self,
        ctx: &CallContext<'_>,
        tool: &ToolDefinition,
        parameters: &serde_json::Value,
    ) -> PreCheck {
        let mut violations = Vec::new();

        if ctx.calls_so_far >= self.policy.max_tool_calls {
            violations.push(GateViolation {
                code: "RESOURCE_LIMIT_EXCEEDED".to_string(),
                message: format!(
                    "tool call budget exhausted ({} allowed per turn)",
                    self.policy.max_tool_calls
                ),
                kind: SecurityEventKind::ResourceLimit,
                severity: Severity::Medium,
            });
        }

        if !self.policy.category_allowed(tool.category) {
            violations.push(GateViolation {
                code: "POLICY_VIOLATION".to_string(),
                message: format!("category '{}' is not allowed by policy", tool.category),
                kind: SecurityEventKind::AccessDenied,
                severity: Severity::Medium,
            });
        }

        if !self.policy.blocked_domains.is_empty() {
            let serialized = parameters.to_string().to_lowercase();
            for domain in &self.policy.blocked_domains {
                if serialized.contains(&domain.to_lowercase()) {
                    violations.push(GateViolation {
                        code: "POLICY_VIOLATION".to_string(),
                        message: format!("parameters reference blocked domain '{domain}'"),
                        kind: SecurityEventKind::AccessDenied,
                        severity: Severity::High,
                    });
                }
            }
        }

        if self.policy.resource_monitoring {
            let check = self.resource_monitor.check(ctx.conversation_id);
            if !check.within_limits {
                violations.push(GateViolation {
                    code: "RESOURCE_LIMIT_EXCEEDED".to_string(),
                    message: check.violations.join("; "),
                    kind: SecurityEventKind::ResourceLimit,
                    severity: Severity::High,
                });
            }
        }

        let mut filtered_parameters = parameters.clone();
        if self.policy.content_filtering {
            let (report, filtered) = self.scan_value(parameters);
            for fv in &report.violations {
                violations.push(GateViolation {
                    code: "POLICY_VIOLATION".to_string(),
                    message: format!("parameter filter '{}' matched {} time(s)", fv.filter, fv.matches),
                    kind: SecurityEventKind::ContentFilter,
                    severity: fv.severity,
                });
            }
            if report.blocked {
                // Blocked parameters never reach the handler.
                filtered_parameters = serde_json::Value::Null;
            } else {
                filtered_parameters = filtered;
            }
        }

        let allowed = !violations
            .iter()
            .any(|v| v.severity >= Severity::High || v.code == "RESOURCE_LIMIT_EXCEEDED" || v.kind == SecurityEventKind::AccessDenied);

        for violation in &violations {
            self.record(violation, ctx.principal, ctx.conversation_id);
        }

        PreCheck {
            allowed,
            violations,
            filtered_parameters,
        }
    }

    /// Post-execution check: filter the result content.
    ///
    /// A blocked match replaces the data with the documented redaction
    /// marker (the rule's replacement where one exists, [`REDACTION_MARKER`]
    /// otherwise).
    pub fn post_check(
        &self,
        ctx: &CallContext<'_>,
        data: &serde_json::Value,
    ) -> PostCheck {
        if !self.policy.content_filtering {
            return PostCheck {
                allowed: true,
                violations: Vec::new(),
                filtered_result: data.clone(),
            };
        }

        let (report, filtered) = self.scan_value(data);
        let mut violations = Vec::new();
        for fv in &report.violations {
            let violation = GateViolation {
                code: "POLICY_VIOLATION".to_string(),
                message: format!("result filter '{}' matched {} time(s)", fv.filter, fv.matches),
                kind: SecurityEventKind::ContentFilter,
                severity: fv.severity,
            };
            self.record(&violation, ctx.principal, ctx.conversation_id);
            violations.push(violation);
        }

        if report.blocked {
            let redacted = if filtered != *data {
                filtered
            } else {
                serde_json::Value::String(REDACTION_MARKER.to_string())
            };
            return PostCheck {
                allowed: false,
                violations,
                filtered_result: redacted,
            };
        }

        PostCheck {
            allowed: true,
            violations,
            filtered_result: filtered,
        }
    }

    /// Account execution time against a session.
    pub fn record_exec(&self, conversation_id: &str, exec_ms: u64) {
        if self.policy.resource_monitoring {
            self.resource_monitor.add_exec_ms(conversation_id, exec_ms);
        }
    }

    fn scan_value(&self, value: &serde_json::Value) -> (ScanReport, serde_json::Value) {
        match value {
            serde_json::Value::String(s) => {
                let report = self.content_filter.scan(s);
                let filtered = serde_json::Value::String(report.filtered.clone());
                (report, filtered)
            }
            other => {
                let serialized = other.to_string();
                let report = self.content_filter.scan(&serialized);
                let filtered = serde_json::from_str(&report.filtered)
                    .unwrap_or_else(|_| serde_json::Value::String(report.filtered.clone()));
                (report, filtered)
            }
        }
    }

    fn record(&self, violation: &GateViolation, principal: &str, conversation_id: &str) {
        if !self.policy.audit_logging {
            return;
        }
        self.audit.record(
            SecurityEvent::new(violation.kind, violation.severity, principal)
                .with_conversation(conversation_id)
                .with_detail("message", serde_json::json!(violation.message))
                .with_detail("code", serde_json::json!(violation.code)),
        );
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(SecurityPolicy::default(), RateLimitConfig::default())
    }
}
