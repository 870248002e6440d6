// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory audit buffer.
//!
//! Bounded ring of security and operational events with FIFO eviction.
//! Events at high severity or above are echoed to the operational log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

/// Default ring capacity.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimit,
    ContentFilter,
    ResourceLimit,
    PolicyViolation,
    AccessDenied,
    SuspiciousActivity,
}

/// Severity of a security event, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recorded security event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub principal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl SecurityEvent {
    /// Create a new event stamped with the current time.
    pub fn new(kind: SecurityEventKind, severity: Severity, principal: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            severity,
            principal: principal.into(),
            conversation_id: None,
            details: serde_json::Map::new(),
        }
    }

    /// Attach the conversation this event belongs to.
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Structured query over the audit buffer.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub principal: Option<String>,
    pub kind: Option<SecurityEventKind>,
    pub min_severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(ref principal) = self.principal {
            if &event.principal != principal {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Bounded ring of security events.
pub struct AuditBuffer {
    events: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl AuditBuffer {
    /// Create a buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record an event, evicting the oldest on overflow.
    pub fn record(&self, event: SecurityEvent) {
        if event.severity >= Severity::High {
            warn!(
                kind = ?event.kind,
                severity = ?event.severity,
                principal = %event.principal,
                "Security event"
            );
        }

        let mut events = self.events.lock().expect("audit lock poisoned");
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Events matching a query, in chronological order.
    pub fn query(&self, query: &AuditQuery) -> Vec<SecurityEvent> {
        let events = self.events.lock().expect("audit lock poisoned");
        let mut matched: Vec<SecurityEvent> =
            events.iter().filter(|e| query.matches(e)).cloned().collect();
        if let Some(limit) = query.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().expect("audit lock poisoned").len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AuditBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
