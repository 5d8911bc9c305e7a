use crate::errors::OrchestrationError;
use crate::flow_machine::FlowConfig;
use crate::orchestration_paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding `flow.max_change_requests`.
pub const MAX_CHANGE_REQUESTS_ENV: &str = "PLAN_ORCHESTRATOR_MAX_CHANGE_REQUESTS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub reviewer: ReviewerConfig,
}

/// Reviewer write policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReviewerConfig {
    /// When true, the reviewer may not use write tools or write-shaped shell
    /// commands. Default: false (reviewer has full access)
    #[serde(default)]
    pub read_only: bool,
}

/// Per-call overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowConfigOverrides {
    pub max_change_requests: Option<u32>,
}

impl FlowConfigOverrides {
    pub fn apply(&self, config: &FlowConfig) -> FlowConfig {
        let mut config = config.clone();
        if let Some(max) = self.max_change_requests {
            config.max_change_requests = max;
        }
        config
    }
}

impl OrchestrationConfig {
    /// Parses a YAML config file.
    pub fn load(path: &Path) -> Result<Self, OrchestrationError> {
        let content = fs::read_to_string(path).map_err(|e| OrchestrationError::Config {
            path: path.to_path_buf(),
            message: format!("failed to read: {}", e),
        })?;
        Self::from_yaml(path, &content)
    }

    fn from_yaml(path: &Path, content: &str) -> Result<Self, OrchestrationError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| OrchestrationError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Resolves the configuration for a plan.
    ///
    /// Lookup order: `explicit`, then `<planDir>/.orchestration/config.yaml`,
    /// then `~/.plan-orchestrator/config.yaml`, then defaults. The environment
    /// override is applied last.
    pub fn resolve(plan_path: &Path, explicit: Option<&Path>) -> Result<Self, OrchestrationError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let candidates: Vec<PathBuf> = std::iter::once(
                    orchestration_paths::plan_config_path(plan_path),
                )
                .chain(orchestration_paths::user_config_path())
                .collect();

                match candidates.iter().find(|path| path.is_file()) {
                    Some(path) => {
                        tracing::debug!(config = %path.display(), "Loading orchestration config");
                        Self::load(path)?
                    }
                    None => Self::default(),
                }
            }
        };

        if let Some(max) = max_change_requests_from_env() {
            config.flow.max_change_requests = max;
        }
        Ok(config)
    }
}

/// Reads the max-change-requests override, ignoring invalid values.
pub fn max_change_requests_from_env() -> Option<u32> {
    let raw = std::env::var(MAX_CHANGE_REQUESTS_ENV).ok()?;
    match raw.trim().parse::<u32>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(
                value = %raw,
                "Ignoring invalid {}: expected a positive integer",
                MAX_CHANGE_REQUESTS_ENV
            );
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
