//! Parsed review rules.
//!
//! A rule set is an ordered list of [`RuleDefinition`]s read from YAML:
//!
//! ```yaml
//! version: 1
//! rules:
//!   - id: security
//!     description: Look for injection and auth bugs
//!     agent: claude
//!     prompt: |
//!       Review {{repo}} at {{ref}} for security issues.
//!     multi_run:
//!       enabled: true
//!       runs: 3
//!       models: [sonnet, opus]
//!       merge_model: opus
//! ```

pub mod loader;

pub use loader::{RuleSetLoader, RuleSetSource, SourceContext};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Settings for running one rule several times and merging the outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiRunConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Number of runs; falls back to the configured default when unset.
    #[serde(default)]
    pub runs: Option<u32>,
    /// Models cycled through by run index.
    #[serde(default)]
    pub models: Vec<String>,
    /// Model used for the merge call; agent default when unset.
    #[serde(default)]
    pub merge_model: Option<String>,
}

impl MultiRunConfig {
    /// Model for slot `index`, cycling when fewer models than runs are given.
    pub fn model_for_run(&self, index: usize) -> Option<String> {
        if self.models.is_empty() {
            None
        } else {
            Some(self.models[index % self.models.len()].clone())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Channel names the rule's output is published to.
    #[serde(default)]
    pub channels: Vec<String>,
}

/// One declarative unit of analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub multi_run: Option<MultiRunConfig>,
    #[serde(default)]
    pub output: Option<OutputConfig>,
}

impl RuleDefinition {
    pub fn new(id: &str, agent: &str, prompt: &str) -> Self {
        Self {
            id: id.to_string(),
            description: String::new(),
            prompt: prompt.to_string(),
            agent: Some(agent.to_string()),
            model: None,
            multi_run: None,
            output: None,
        }
    }

    pub fn with_multi_run(mut self, multi_run: MultiRunConfig) -> Self {
        self.multi_run = Some(multi_run);
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    /// Number of runs requested, or `None` when multi-run is off.
    pub fn requested_runs(&self, default_runs: u32) -> Option<u32> {
        self.multi_run
            .as_ref()
            .filter(|m| m.enabled)
            .map(|m| m.runs.unwrap_or(default_runs).max(1))
    }

    /// JSON snapshot stored on the rule record for audit.
    pub fn snapshot(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize rule configuration")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

fn default_version() -> u32 {
    1
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self { version: 1, rules }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let set: RuleSet = serde_yaml::from_str(content).context("Failed to parse rule set YAML")?;
        set.validate()?;
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid rule file: {}", path.display()))
    }

    pub fn find(&self, rule_id: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                anyhow::bail!("Rule with empty id");
            }
            if !seen.insert(rule.id.as_str()) {
                anyhow::bail!("Duplicate rule id '{}'", rule.id);
            }
        }
        Ok(())
    }
}
