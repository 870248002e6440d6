// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-session resource accounting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Counters accumulated for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub memory_mb: f64,
    pub cpu_pct: f64,
    pub exec_ms: u64,
    pub net_requests: u64,
    pub disk_mb: f64,
}

/// Caps the monitor checks usage against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceCaps {
    pub max_memory_mb: u64,
    pub max_cpu_pct: f64,
    pub max_exec_ms: u64,
    pub max_net_requests: u64,
    pub max_disk_mb: u64,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_cpu_pct: 90.0,
            max_exec_ms: 300_000,
            max_net_requests: 1_000,
            max_disk_mb: 1_024,
        }
    }
}

/// Outcome of a resource check.
#[derive(Debug, Clone)]
pub struct ResourceCheck {
    pub within_limits: bool,
    pub violations: Vec<String>,
}

/// Tracks resource consumption per session.
pub struct ResourceMonitor {
    caps: ResourceCaps,
    sessions: Mutex<HashMap<String, ResourceUsage>>,
}

impl ResourceMonitor {
    /// Create a monitor with the given caps.
    pub fn new(caps: ResourceCaps) -> Self {
        Self {
            caps,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Add execution time to a session.
    pub fn add_exec_ms(&self, session_id: &str, exec_ms: u64) {
        self.update(session_id, |u| u.exec_ms += exec_ms);
    }

    /// Add memory consumption to a session.
    pub fn add_memory_mb(&self, session_id: &str, memory_mb: f64) {
        self.update(session_id, |u| u.memory_mb += memory_mb);
    }

    /// Count network requests against a session.
    pub fn add_net_requests(&self, session_id: &str, count: u64) {
        self.update(session_id, |u| u.net_requests += count);
    }

    /// Add disk consumption to a session.
    pub fn add_disk_mb(&self, session_id: &str, disk_mb: f64) {
        self.update(session_id, |u| u.disk_mb += disk_mb);
    }

    /// Record the latest CPU reading for a session.
    pub fn set_cpu_pct(&self, session_id: &str, cpu_pct: f64) {
        self.update(session_id, |u| u.cpu_pct = cpu_pct);
    }

    /// Current usage for a session.
    pub fn usage(&self, session_id: &str) -> ResourceUsage {
        self.sessions
            .lock()
            .expect("resource monitor lock poisoned")
            .get(session_id)
            .copied()
            .unwrap_or_default()
    }

    /// Check a session's usage against the caps.
    pub fn check(&self, session_id: &str) -> ResourceCheck {
        let usage = self.usage(session_id);
        let mut violations = Vec::new();

        if usage.memory_mb > self.caps.max_memory_mb as f64 {
            violations.push(format!(
                "memory {:.1}MB exceeds {}MB",
                usage.memory_mb, self.caps.max_memory_mb
            ));
        }
        if usage.cpu_pct > self.caps.max_cpu_pct {
            violations.push(format!(
                "cpu {:.1}% exceeds {:.1}%",
                usage.cpu_pct, self.caps.max_cpu_pct
            ));
        }
        if usage.exec_ms > self.caps.max_exec_ms {
            violations.push(format!(
                "execution time {}ms exceeds {}ms",
                usage.exec_ms, self.caps.max_exec_ms
            ));
        }
        if usage.net_requests > self.caps.max_net_requests {
            violations.push(format!(
                "{} network requests exceed {}",
                usage.net_requests, self.caps.max_net_requests
            ));
        }
        if usage.disk_mb > self.caps.max_disk_mb as f64 {
            violations.push(format!(
                "disk {:.1}MB exceeds {}MB",
                usage.disk_mb, self.caps.max_disk_mb
            ));
        }

        ResourceCheck {
            within_limits: violations.is_empty(),
            violations,
        }
    }

    /// Forget a session's counters.
    pub fn reset(&self, session_id: &str) {
        self.sessions
            .lock()
            .expect("resource monitor lock poisoned")
            .remove(session_id);
    }

    fn update(&self, session_id: &str, apply: impl FnOnce(&mut ResourceUsage)) {
        let mut sessions = self.sessions.lock().expect("resource monitor lock poisoned");
        apply(sessions.entry(session_id.to_string()).or_default());
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(ResourceCaps::default())
    }
}
