//! Configuration for reviewforge.
//!
//! Read from `.reviewforge/config.toml` and layered file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = ".reviewforge/reviews.db"
//!
//! [execution]
//! max_retries = 3
//! retry_delay_secs = 5
//! max_retry_delay_secs = 300
//! multi_run_count = 2
//!
//! [recovery]
//! max_retry_count = 3
//! task_timeout_hours = 24
//!
//! [rules]
//! default_file = ".reviewforge/rules.yaml"
//! override_file = ".reviewforge.yaml"
//!
//! [workspace]
//! root = ".reviewforge/workspace"
//!
//! [agents.claude]
//! command = "claude"
//! args = ["--print"]
//! default_model = "sonnet"
//! timeout_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration directory inside a project.
pub const CONFIG_DIR: &str = ".reviewforge";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("reviews.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Retry and multi-run settings for rule execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff delay, doubled after every failed attempt.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Ceiling for the doubled delay.
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
    /// Runs used when a rule enables multi-run without giving a count.
    #[serde(default = "default_multi_run_count")]
    pub multi_run_count: u32,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_retry_delay_secs() -> u64 {
    300
}

fn default_multi_run_count() -> u32 {
    2
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            multi_run_count: default_multi_run_count(),
        }
    }
}

impl ExecutionSection {
    pub fn retry_policy(&self) -> crate::orchestrator::RetryPolicy {
        crate::orchestrator::RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_secs(self.retry_delay_secs),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
        }
    }
}

/// Eviction policy applied to in-flight reviews at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: i32,
    #[serde(default = "default_task_timeout_hours")]
    pub task_timeout_hours: i64,
}

fn default_max_retry_count() -> i32 {
    3
}

fn default_task_timeout_hours() -> i64 {
    24
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            task_timeout_hours: default_task_timeout_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSection {
    /// Global default rule set.
    #[serde(default = "default_rules_file")]
    pub default_file: PathBuf,
    /// Override file looked up at the root of each checkout.
    #[serde(default = "default_override_file")]
    pub override_file: String,
}

fn default_rules_file() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("rules.yaml")
}

fn default_override_file() -> String {
    ".reviewforge.yaml".to_string()
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            default_file: default_rules_file(),
            override_file: default_override_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Checkouts live at `<root>/<owner>/<repo>`.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("workspace")
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

impl WorkspaceSection {
    pub fn checkout_dir(&self, owner: &str, repo: &str) -> PathBuf {
        self.root.join(owner).join(repo)
    }
}

/// Settings handed to an agent constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Flag used to pass a model, e.g. `--model`.
    #[serde(default = "default_model_flag")]
    pub model_flag: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model_flag() -> String {
    "--model".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    600
}

impl AgentSettings {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            model_flag: default_model_flag(),
            default_model: None,
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

/// The complete config.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewforgeToml {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
}

impl ReviewforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `<dir>/config.toml`, or defaults when the file does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `REVIEWFORGE_DB` and `REVIEWFORGE_MAX_RETRIES` overrides.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var("REVIEWFORGE_DB") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var("REVIEWFORGE_MAX_RETRIES") {
            self.execution.max_retries = value
                .parse()
                .with_context(|| format!("Invalid REVIEWFORGE_MAX_RETRIES '{}'", value))?;
        }
        Ok(self)
    }

    /// Settings for a named agent. Unconfigured agents fall back to running
    /// a command of the same name.
    pub fn agent_settings(&self, name: &str) -> AgentSettings {
        self.agents
            .get(name)
            .cloned()
            .unwrap_or_else(|| AgentSettings::new(name))
    }

    /// Validate the configuration and return a list of problems.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.execution.max_retry_delay_secs < self.execution.retry_delay_secs {
            errors.push(format!(
                "execution.max_retry_delay_secs ({}) is below retry_delay_secs ({})",
                self.execution.max_retry_delay_secs, self.execution.retry_delay_secs
            ));
        }
        if self.execution.multi_run_count == 0 {
            errors.push("execution.multi_run_count must be at least 1".to_string());
        }
        if self.recovery.task_timeout_hours <= 0 {
            errors.push("recovery.task_timeout_hours must be positive".to_string());
        }
        if self.recovery.max_retry_count < 0 {
            errors.push("recovery.max_retry_count must not be negative".to_string());
        }
        for (name, agent) in &self.agents {
            if agent.command.trim().is_empty() {
                errors.push(format!("agents.{}.command is empty", name));
            }
        }
        errors
    }
}

/// Runtime configuration: the parsed file plus CLI overrides.
#[derive(Debug, Clone)]
pub struct ReviewforgeConfig {
    pub project_dir: PathBuf,
    pub toml: ReviewforgeToml,
}

impl ReviewforgeConfig {
    /// Load configuration for `project_dir`, optionally from an explicit file.
    pub fn new(project_dir: PathBuf, config_file: Option<&Path>) -> Result<Self> {
        let toml = match config_file {
            Some(path) => ReviewforgeToml::load(path)?,
            None => ReviewforgeToml::load_or_default(&project_dir.join(CONFIG_DIR))?,
        }
        .apply_env()?;
        Ok(Self { project_dir, toml })
    }

    pub fn with_db_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.toml.database.path = path;
        }
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.toml.database.path)
    }

    pub fn default_rules_file(&self) -> PathBuf {
        self.resolve(&self.toml.rules.default_file)
    }

    pub fn workspace(&self) -> WorkspaceSection {
        WorkspaceSection {
            root: self.resolve(&self.toml.workspace.root),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR).join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = ReviewforgeToml::parse("").unwrap();
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.retry_delay_secs, 5);
        assert_eq!(config.execution.max_retry_delay_secs, 300);
        assert_eq!(config.execution.multi_run_count, 2);
        assert_eq!(config.recovery.max_retry_count, 3);
        assert_eq!(config.recovery.task_timeout_hours, 24);
        assert_eq!(config.rules.override_file, ".reviewforge.yaml");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_sections_and_agents() {
        let config = ReviewforgeToml::parse(
            r#"
            [execution]
            max_retries = 5
            retry_delay_secs = 1

            [recovery]
            task_timeout_hours = 6

            [agents.claude]
            command = "claude"
            args = ["--print"]
            default_model = "sonnet"
            "#,
        )
        .unwrap();
        assert_eq!(config.execution.max_retries, 5);
        assert_eq!(config.execution.max_retry_delay_secs, 300);
        assert_eq!(config.recovery.task_timeout_hours, 6);
        let claude = config.agent_settings("claude");
        assert_eq!(claude.args, vec!["--print"]);
        assert_eq!(claude.default_model.as_deref(), Some("sonnet"));
        assert_eq!(claude.model_flag, "--model");
    }

    #[test]
    fn test_unconfigured_agent_falls_back_to_command_name() {
        let config = ReviewforgeToml::default();
        let settings = config.agent_settings("codex");
        assert_eq!(settings.command, "codex");
        assert_eq!(settings.timeout_secs, 600);
    }

    #[test]
    fn test_retry_policy_from_execution_section() {
        let policy = ExecutionSection::default().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(5));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = ReviewforgeToml::default();
        config.execution.retry_delay_secs = 600;
        config.recovery.task_timeout_hours = 0;
        config.agents.insert("x".into(), AgentSettings::new(" "));
        let errors = config.validate();
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("max_retry_delay_secs")));
        assert!(errors.iter().any(|e| e.contains("task_timeout_hours")));
        assert!(errors.iter().any(|e| e.contains("agents.x.command")));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = ReviewforgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.execution.max_retries, 3);
    }

    #[test]
    fn test_load_or_default_with_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[recovery]\nmax_retry_count = 7\n",
        )
        .unwrap();
        let config = ReviewforgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.recovery.max_retry_count, 7);
    }

    #[test]
    fn test_runtime_paths_resolve_against_project_dir() {
        let dir = TempDir::new().unwrap();
        let config = ReviewforgeConfig {
            project_dir: dir.path().to_path_buf(),
            toml: ReviewforgeToml::default(),
        };
        assert_eq!(config.db_path(), dir.path().join(".reviewforge/reviews.db"));
        assert_eq!(
            config.workspace().checkout_dir("acme", "app"),
            dir.path().join(".reviewforge/workspace/acme/app")
        );

        let config = config.with_db_path(Some(PathBuf::from("/tmp/other.db")));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/other.db"));
    }
}
