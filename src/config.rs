// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the Crucible runtime.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.crucible/config.yaml
//! - Workspace config: crucible.yaml, .crucible.yaml, or crucible.config.yaml
//! - Caller overrides
//!
//! Configuration is merged with precedence (overrides > workspace > global
//! > defaults). Sections are replaced whole when present in a higher layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::planner::PlannerWeights;
use crate::sandbox::SandboxPolicy;
use crate::security::{PolicyLevel, RateLimitConfig, SecurityPolicy, DEFAULT_AUDIT_CAPACITY};
use crate::types::ResourceLimits;

/// Directory under the home directory holding the global config.
pub const GLOBAL_CONFIG_DIR: &str = ".crucible";

/// File name of the global config.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Workspace config file names, tried in order.
pub const CONFIG_FILES: &[&str] = &["crucible.yaml", ".crucible.yaml", "crucible.config.yaml"];

/// Security section of the runtime config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub level: PolicyLevel,
    pub rate_limit: RateLimitConfig,
    pub audit_capacity: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            level: PolicyLevel::Medium,
            rate_limit: RateLimitConfig::default(),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Sandbox section of the runtime config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    pub default_limits: ResourceLimits,
    pub allow_unsafe_eval: bool,
    pub allow_external_requests: bool,
    pub max_code_length: usize,
    pub blocked_patterns: Vec<String>,
    pub allowed_modules: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        let policy = SandboxPolicy::default();
        Self {
            default_limits: ResourceLimits::default(),
            allow_unsafe_eval: policy.allow_unsafe_eval,
            allow_external_requests: policy.allow_external_requests,
            max_code_length: policy.max_code_length,
            blocked_patterns: policy.blocked_patterns,
            allowed_modules: policy.allowed_modules,
        }
    }
}

impl SandboxConfig {
    /// Convert into the executor's policy type.
    pub fn policy(&self) -> SandboxPolicy {
        SandboxPolicy {
            allow_unsafe_eval: self.allow_unsafe_eval,
            allow_external_requests: self.allow_external_requests,
            max_code_length: self.max_code_length,
            blocked_patterns: self.blocked_patterns.clone(),
            allowed_modules: self.allowed_modules.clone(),
        }
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub security: SecurityConfig,
    pub planner: PlannerWeights,
    pub sandbox: SandboxConfig,
}

impl RuntimeConfig {
    /// Resolved security policy for the configured level.
    pub fn security_policy(&self) -> SecurityPolicy {
        SecurityPolicy::preset(self.security.level)
    }
}

/// Partial config as read from one file; sections replace lower layers
/// wholesale.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialConfig {
    pub security: Option<SecurityConfig>,
    pub planner: Option<PlannerWeights>,
    pub sandbox: Option<SandboxConfig>,
}

impl PartialConfig {
    fn apply(self, config: &mut RuntimeConfig) {
        if let Some(security) = self.security {
            config.security = security;
        }
        if let Some(planner) = self.planner {
            config.planner = planner;
        }
        if let Some(sandbox) = self.sandbox {
            config.sandbox = sandbox;
        }
    }
}

/// Path of the global config file, if a home directory exists.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR).join(GLOBAL_CONFIG_FILE))
}

/// Load one config file. YAML is a superset of JSON, so both parse here.
pub fn load_config_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let parsed = serde_yaml::from_str(&raw)?;
    Ok(parsed)
}

fn load_optional(path: &Path) -> Result<Option<PartialConfig>, ConfigError> {
    match load_config_file(path) {
        Ok(partial) => Ok(Some(partial)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Find the workspace config file under a root, if any.
pub fn find_workspace_config(workspace_root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| workspace_root.join(name))
        .find(|p| p.is_file())
}

/// Load and merge all configuration sources for a workspace.
///
/// This is the main entry point for configuration loading. Missing files
/// are fine; malformed ones are errors.
pub fn load_config(
    workspace_root: &Path,
    overrides: PartialConfig,
) -> Result<RuntimeConfig, ConfigError> {
    let mut config = RuntimeConfig::default();

    if let Some(global_path) = global_config_path() {
        if let Some(global) = load_optional(&global_path)? {
            global.apply(&mut config);
        }
    }

    if let Some(workspace_path) = find_workspace_config(workspace_root) {
        load_config_file(&workspace_path)?.apply(&mut config);
    }

    overrides.apply(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.security.level, PolicyLevel::Medium);
        assert_eq!(config.security.audit_capacity, 10_000);
        assert_eq!(config.sandbox.default_limits.max_memory_mb, 64);
        assert!((config.planner.base - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_load_workspace_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("crucible.yaml"),
            "security:\n  level: high\n  rateLimit:\n    windowMs: 500\n    maxRequests: 2\n    maxTokens: 100\n",
        )
        .unwrap();

        let config = load_config(dir.path(), PartialConfig::default()).unwrap();
        assert_eq!(config.security.level, PolicyLevel::High);
        assert_eq!(config.security.rate_limit.window_ms, 500);
        // Untouched sections keep defaults.
        assert!((config.planner.category_match - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_overrides_beat_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("crucible.yaml"), "security:\n  level: low\n").unwrap();

        let overrides = PartialConfig {
            security: Some(SecurityConfig {
                level: PolicyLevel::Maximum,
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = load_config(dir.path(), overrides).unwrap();
        assert_eq!(config.security.level, PolicyLevel::Maximum);
    }

    #[test]
    fn test_planner_weights_from_yaml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".crucible.yaml"),
            "planner:\n  base: 0.5\n  categoryMatch: 0.2\n",
        )
        .unwrap();

        let config = load_config(dir.path(), PartialConfig::default()).unwrap();
        assert!((config.planner.base - 0.5).abs() < 1e-9);
        assert!((config.planner.category_match - 0.2).abs() < 1e-9);
        // Unlisted weights take their defaults.
        assert!((config.planner.keyword_match - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("crucible.yaml"), "security: [not, a, map]").unwrap();
        assert!(load_config(dir.path(), PartialConfig::default()).is_err());
    }

    #[test]
    fn test_missing_workspace_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(dir.path(), PartialConfig::default()).unwrap();
        assert_eq!(config.security.level, PolicyLevel::Medium);
    }

    #[test]
    fn test_sandbox_policy_conversion() {
        let config = RuntimeConfig::default();
        let policy = config.sandbox.policy();
        assert!(!policy.allow_unsafe_eval);
        assert!(!policy.blocked_patterns.is_empty());
    }
}
