//! Agent and evaluator registries.
//!
//! Registries are plain values: build one, populate it once, hand copies of
//! its catalog to as many Arenas as needed.

use crate::agent::Agent;
use crate::config::{AgentDefinition, AgentsConfig, ArenaConfig};
use crate::configured_agent::ConfiguredAgent;
use crate::error_agent::ErrorAgent;
use crate::evaluator::Evaluator;
use crate::tool::{EchoTool, Tool, ToolSet};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Catalog of agents available to an Arena.
///
/// `init` populates the catalog once, in this order, later entries winning
/// on name clashes: builtin agents, definitions from configuration,
/// definition files under the search path, then explicitly registered
/// agents.
pub struct AgentManager {
    definitions: AgentsConfig,
    search_path: Option<PathBuf>,
    tools: ToolSet,
    registered: Vec<Arc<dyn Agent>>,
    agents: HashMap<String, Arc<dyn Agent>>,
    initialized: bool,
}

impl fmt::Debug for AgentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.agents.keys().collect();
        names.sort();
        f.debug_struct("AgentManager")
            .field("search_path", &self.search_path)
            .field("tools", &self.tools)
            .field("agents", &names)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl AgentManager {
    /// Creates an empty manager that will load agents described by `config`.
    pub fn new(config: &ArenaConfig) -> Self {
        Self {
            definitions: config.agents.clone(),
            search_path: config.agent_search_path(),
            tools: ToolSet::new().with(Arc::new(EchoTool)),
            registered: Vec::new(),
            agents: HashMap::new(),
            initialized: false,
        }
    }

    /// Overrides the directory scanned for definition files.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Adds a tool that definitions may reference by name.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool);
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Registers an agent implemented in code.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        if self.initialized {
            self.agents.insert(agent.name().to_string(), Arc::clone(&agent));
        }
        self.registered.push(agent);
    }

    /// Populates the catalog. Calling it again does nothing.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        self.insert(Arc::new(ErrorAgent));

        for (name, definition) in &self.definitions.definitions {
            let agent = ConfiguredAgent::from_definition(name, definition, &self.tools);
            self.agents.insert(name.clone(), Arc::new(agent));
        }

        if let Some(dir) = self.search_path.clone() {
            self.load_directory(&dir);
        }

        for agent in self.registered.clone() {
            self.insert(agent);
        }
        debug!(agents = self.agents.len(), "Agent catalog initialized");
    }

    /// Returns a copy of the catalog, initializing it first if needed.
    pub fn agents(&mut self) -> HashMap<String, Arc<dyn Agent>> {
        self.init();
        self.agents.clone()
    }

    /// Sorted agent names, initializing the catalog first if needed.
    pub fn names(&mut self) -> Vec<String> {
        self.init();
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    fn insert(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    /// Loads every `*.yml` / `*.yaml` file in `dir`, skipping files that fail.
    fn load_directory(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "Cannot read agent search path");
                return;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
            })
            .collect();
        files.sort();

        for path in files {
            match AgentDefinition::from_file(&path) {
                Ok(definition) => {
                    let name = definition.name.clone().unwrap_or_default();
                    let agent = ConfiguredAgent::from_definition(&name, &definition, &self.tools);
                    debug!(agent = %name, path = %path.display(), "Loaded agent definition");
                    self.agents.insert(name, Arc::new(agent));
                }
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping agent definition"),
            }
        }
    }
}

/// Catalog of evaluators attached to new Arenas.
#[derive(Default)]
pub struct EvaluatorManager {
    registered: Vec<Arc<dyn Evaluator>>,
    evaluators: Vec<Arc<dyn Evaluator>>,
    initialized: bool,
}

impl fmt::Debug for EvaluatorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fqdns: Vec<&str> = self.evaluators.iter().map(|evaluator| evaluator.fqdn()).collect();
        f.debug_struct("EvaluatorManager")
            .field("evaluators", &fqdns)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl EvaluatorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        if self.initialized {
            Self::insert(&mut self.evaluators, Arc::clone(&evaluator));
        }
        self.registered.push(evaluator);
    }

    /// Populates the catalog. Calling it again does nothing.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        for evaluator in self.registered.clone() {
            Self::insert(&mut self.evaluators, evaluator);
        }
        debug!(evaluators = self.evaluators.len(), "Evaluator catalog initialized");
    }

    /// Returns a copy of the catalog, initializing it first if needed.
    pub fn evaluators(&mut self) -> Vec<Arc<dyn Evaluator>> {
        self.init();
        self.evaluators.clone()
    }

    /// Replaces an evaluator with the same fqdn, or appends.
    fn insert(evaluators: &mut Vec<Arc<dyn Evaluator>>, evaluator: Arc<dyn Evaluator>) {
        match evaluators.iter().position(|existing| existing.fqdn() == evaluator.fqdn()) {
            Some(index) => evaluators[index] = evaluator,
            None => evaluators.push(evaluator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Evaluation, FnEvaluator};
    use arena_proto::ChunkType;
    use std::fs;

    fn config_with_definitions() -> ArenaConfig {
        let yaml = r#"
agents:
  definitions:
    Planner:
      instructions: "Plan the work."
      sub_agents: [Researcher]
      tools: [echo, unknown]
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_init_loads_builtins_and_definitions() {
        let mut manager = AgentManager::new(&config_with_definitions());
        let agents = manager.agents();

        assert!(agents.contains_key("ErrorAgent"));
        let planner = &agents["Planner"];
        assert_eq!(planner.sub_agents(), ["Researcher".to_string()]);
        assert_eq!(planner.tools().len(), 1);
    }

    #[test]
    fn test_search_path_loads_files_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("researcher.yml"),
            "name: Researcher\ninstructions: Find facts.\n",
        )
        .unwrap();
        fs::write(dir.path().join("writer.yaml"), "name: Writer\ninstructions: Write.\n").unwrap();
        fs::write(dir.path().join("broken.yml"), "name: [unclosed\n").unwrap();
        fs::write(dir.path().join("nameless.yml"), "instructions: nobody\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "name: Ignored\n").unwrap();

        let mut manager = AgentManager::new(&ArenaConfig::default()).with_search_path(dir.path());

        assert_eq!(manager.names(), vec!["ErrorAgent", "Researcher", "Writer"]);
    }

    #[test]
    fn test_missing_search_path_is_not_fatal() {
        let mut manager =
            AgentManager::new(&config_with_definitions()).with_search_path("/definitely/not/here");
        assert_eq!(manager.names(), vec!["ErrorAgent", "Planner"]);
    }

    #[test]
    fn test_init_is_idempotent_and_snapshots_are_copies() {
        let mut manager = AgentManager::new(&config_with_definitions());
        manager.init();
        let mut first = manager.agents();
        manager.init();

        first.remove("Planner");
        assert!(manager.agents().contains_key("Planner"));
        assert_eq!(manager.agents().len(), 2);
    }

    #[test]
    fn test_registered_agents_override_configured_ones() {
        let mut manager = AgentManager::new(&config_with_definitions());
        manager.register(Arc::new(ConfiguredAgent::new("Planner", "Code-defined.")));
        manager.register(Arc::new(ConfiguredAgent::new("Late", "Added before init.")));

        let agents = manager.agents();
        assert!(agents["Planner"].sub_agents().is_empty());
        assert!(agents.contains_key("Late"));

        manager.register(Arc::new(ConfiguredAgent::new("AfterInit", "Added later.")));
        assert!(manager.agents().contains_key("AfterInit"));
    }

    #[test]
    fn test_evaluator_manager_dedupes_by_fqdn() {
        let mut manager = EvaluatorManager::new();
        let first = FnEvaluator::new("evaluator.length", vec![ChunkType::LlmOutput], |_: &arena_proto::Chunk| {
            Ok(Evaluation::default())
        });
        let second = FnEvaluator::new("evaluator.length", vec![ChunkType::Input], |_: &arena_proto::Chunk| {
            Ok(Evaluation::default())
        });
        manager.register(Arc::new(first));
        manager.register(Arc::new(second));

        let evaluators = manager.evaluators();
        assert_eq!(evaluators.len(), 1);
        assert!(evaluators[0].supports(ChunkType::Input));
    }
}
