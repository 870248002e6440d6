// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-principal rate limiting.
//!
//! Windowed counters keyed by principal. A window opens on the first
//! request and resets once `window_ms` has elapsed, so an idle principal
//! always starts fresh. Denied requests do not consume budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Rate limiter settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    pub max_tokens: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 60,
            max_tokens: 100_000,
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long until the current window resets. Zero when allowed.
    pub retry_after_ms: u64,
    /// Requests left in the current window after this decision.
    pub remaining_requests: u32,
}

struct WindowState {
    window_start: Instant,
    requests: u32,
    tokens: u64,
}

/// Windowed rate limiter keyed by principal.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    /// Create a limiter with the given settings.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter settings.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and account one request carrying `tokens` tokens.
    pub fn check(&self, principal: &str, tokens: u64) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");
        let state = windows.entry(principal.to_string()).or_insert(WindowState {
            window_start: now,
            requests: 0,
            tokens: 0,
        });

        let elapsed_ms = now.duration_since(state.window_start).as_millis() as u64;
        if elapsed_ms >= self.config.window_ms {
            state.window_start = now;
            state.requests = 0;
            state.tokens = 0;
        }

        let over_requests = state.requests + 1 > self.config.max_requests;
        let over_tokens = state.tokens + tokens > self.config.max_tokens;
        if over_requests || over_tokens {
            let elapsed_ms = now.duration_since(state.window_start).as_millis() as u64;
            return RateDecision {
                allowed: false,
                retry_after_ms: self.config.window_ms.saturating_sub(elapsed_ms),
                remaining_requests: self.config.max_requests.saturating_sub(state.requests),
            };
        }

        state.requests += 1;
        state.tokens += tokens;
        RateDecision {
            allowed: true,
            retry_after_ms: 0,
            remaining_requests: self.config.max_requests - state.requests,
        }
    }

    /// Forget a principal's window.
    pub fn reset(&self, principal: &str) {
        self.windows
            .lock()
            .expect("rate limiter lock poisoned")
            .remove(principal);
    }

    /// Forget every window.
    pub fn clear(&self) {
        self.windows
            .lock()
            .expect("rate limiter lock poisoned")
            .clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
