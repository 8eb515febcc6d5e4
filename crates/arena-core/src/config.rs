//! Configuration types for the Arena.
//!
//! Every field is defaulted, so an empty `arena.yml` (or none at all) yields
//! the stock scheduler budgets and the builtin agent catalog.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable that overrides `agents.search_path`.
pub const AGENT_PATH_ENV: &str = "ARENA_AGENT_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArenaConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub agents: AgentsConfig,
}

impl ArenaConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            max_retries = config.scheduler.max_retries,
            max_executions = config.scheduler.max_executions,
            interactive = config.scheduler.interactive,
            definitions = config.agents.definitions.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Directory scanned for agent definition files.
    ///
    /// `ARENA_AGENT_PATH` wins over `agents.search_path`.
    pub fn agent_search_path(&self) -> Option<PathBuf> {
        self.resolve_search_path(std::env::var_os(AGENT_PATH_ENV))
    }

    fn resolve_search_path(&self, env_value: Option<OsString>) -> Option<PathBuf> {
        env_value
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.agents.search_path.clone())
    }
}

/// What the scheduler does when a non-ErrorAgent generation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationFailurePolicy {
    /// Abandon the task to an ErrorAgent child, like any exhausted task.
    #[default]
    RouteToErrorAgent,
    /// Stop the run loop and return the failure to the caller.
    Propagate,
}

/// Scheduler budgets and behavior switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Parse/execution error retries per task.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Total dequeues per task, whatever the outcome.
    #[serde(default = "default_max_executions")]
    pub max_executions: u32,

    /// Continuation agents wait for input instead of finishing.
    #[serde(default)]
    pub interactive: bool,

    #[serde(default)]
    pub generation_failure: GenerationFailurePolicy,

    /// Agents any agent may call, whitelist or not.
    #[serde(default = "default_always_allowed_agents")]
    pub always_allowed_agents: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_executions() -> u32 {
    10
}

fn default_always_allowed_agents() -> Vec<String> {
    vec![crate::error_agent::ERROR_AGENT.to_string()]
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_executions: default_max_executions(),
            interactive: false,
            generation_failure: GenerationFailurePolicy::default(),
            always_allowed_agents: default_always_allowed_agents(),
        }
    }
}

/// Where declarative agents come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Directory of `*.yml` / `*.yaml` definition files.
    #[serde(default)]
    pub search_path: Option<PathBuf>,

    /// Inline definitions keyed by agent name.
    #[serde(default)]
    pub definitions: BTreeMap<String, AgentDefinition>,
}

/// A declaratively defined agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Required in definition files; inline definitions take the map key.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub instructions: String,

    /// Agents this one may call. Empty means any registered agent.
    #[serde(default)]
    pub sub_agents: Vec<String>,

    /// Tool names resolved against the tool catalog.
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub supports_continuation: bool,
}

impl AgentDefinition {
    /// Loads a single definition file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)?;
        let definition: Self = serde_yaml::from_str(&content)?;
        if definition.name.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::MissingAgentName(path_ref.display().to_string()));
        }
        Ok(definition)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("agent definition {0} has no name")]
    MissingAgentName(String),
}
