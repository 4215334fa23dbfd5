//! Construct-by-name registry of analysis agents.
//!
//! The registry is an explicit value built at startup and injected into the
//! executor; nothing is registered through global state, so tests register
//! scripted fakes on their own instance.

pub mod command;

pub use command::CommandAgent;

use std::collections::HashMap;
use std::sync::Arc;

use reviewforge_common::Agent;

use crate::config::{AgentSettings, ReviewforgeToml};

/// Builds an agent from its configured settings.
pub type AgentFactory = Arc<dyn Fn(&AgentSettings) -> Arc<dyn Agent> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
    settings: HashMap<String, AgentSettings>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`CommandAgent`] per `[agents.<name>]` table in the config.
    pub fn from_config(toml: &ReviewforgeToml) -> Self {
        let mut registry = Self::new();
        for (name, settings) in &toml.agents {
            registry.settings.insert(name.clone(), settings.clone());
            let agent_name = name.clone();
            registry.register(name, Arc::new(move |s: &AgentSettings| {
                Arc::new(CommandAgent::new(&agent_name, s.clone())) as Arc<dyn Agent>
            }));
        }
        registry
    }

    pub fn register(&mut self, name: &str, factory: AgentFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Register an already constructed agent under its own name.
    pub fn register_agent(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        self.register(&name, Arc::new(move |_: &AgentSettings| agent.clone()));
    }

    pub fn with_settings(mut self, name: &str, settings: AgentSettings) -> Self {
        self.settings.insert(name.to_string(), settings);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct the agent registered as `name`, or `None` if unknown.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Agent>> {
        let factory = self.factories.get(name)?;
        let settings = self
            .settings
            .get(name)
            .cloned()
            .unwrap_or_else(|| AgentSettings::new(name));
        Some(factory(&settings))
    }
}
