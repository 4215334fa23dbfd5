//! Rule-set resolution with a fixed priority order.
//!
//! Sources are tried in sequence and the first one that finds a rule set
//! wins:
//!
//! 1. [`RepoOverrideSource`]: an override file at the checkout root
//! 2. [`RepoSettingSource`]: a per-repository file path stored in settings
//! 3. [`DefaultFileSource`]: the global default rule file
//!
//! A source that errors is logged and skipped, so a broken override never
//! blocks the fallback.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use super::RuleSet;
use crate::config::ReviewforgeConfig;
use crate::errors::ReviewError;
use crate::store::DbHandle;

/// Setting key prefix for per-repository rule files.
pub const RULES_FILE_SETTING_PREFIX: &str = "rules_file:";

pub fn rules_file_setting_key(repo_url: &str) -> String {
    format!("{}{}", RULES_FILE_SETTING_PREFIX, repo_url)
}

/// What a source needs to know about the repository being reviewed.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub repo_url: String,
    pub checkout_dir: PathBuf,
}

#[async_trait]
pub trait RuleSetSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "not found here, try the next source".
    async fn resolve(&self, ctx: &SourceContext) -> Result<Option<RuleSet>>;
}

pub struct RepoOverrideSource {
    pub file_name: String,
}

#[async_trait]
impl RuleSetSource for RepoOverrideSource {
    fn name(&self) -> &'static str {
        "repository override"
    }

    async fn resolve(&self, ctx: &SourceContext) -> Result<Option<RuleSet>> {
        let path = ctx.checkout_dir.join(&self.file_name);
        if !path.is_file() {
            return Ok(None);
        }
        RuleSet::load(&path).map(Some)
    }
}

pub struct RepoSettingSource {
    pub db: DbHandle,
}

#[async_trait]
impl RuleSetSource for RepoSettingSource {
    fn name(&self) -> &'static str {
        "repository setting"
    }

    async fn resolve(&self, ctx: &SourceContext) -> Result<Option<RuleSet>> {
        let key = rules_file_setting_key(&ctx.repo_url);
        let Some(value) = self.db.call(move |db| db.get_setting(&key)).await? else {
            return Ok(None);
        };
        let path = PathBuf::from(&value);
        let path = if path.is_absolute() {
            path
        } else {
            ctx.checkout_dir.join(path)
        };
        RuleSet::load(&path).map(Some)
    }
}

pub struct DefaultFileSource {
    pub path: PathBuf,
}

#[async_trait]
impl RuleSetSource for DefaultFileSource {
    fn name(&self) -> &'static str {
        "global default"
    }

    async fn resolve(&self, _ctx: &SourceContext) -> Result<Option<RuleSet>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        RuleSet::load(&self.path).map(Some)
    }
}

pub struct RuleSetLoader {
    sources: Vec<Box<dyn RuleSetSource>>,
}

impl RuleSetLoader {
    pub fn new(sources: Vec<Box<dyn RuleSetSource>>) -> Self {
        Self { sources }
    }

    /// Override file, then repository setting, then global default.
    pub fn standard(config: &ReviewforgeConfig, db: DbHandle) -> Self {
        Self::new(vec![
            Box::new(RepoOverrideSource {
                file_name: config.toml.rules.override_file.clone(),
            }),
            Box::new(RepoSettingSource { db }),
            Box::new(DefaultFileSource {
                path: config.default_rules_file(),
            }),
        ])
    }

    pub async fn load(&self, ctx: &SourceContext) -> Result<RuleSet, ReviewError> {
        for source in &self.sources {
            match source.resolve(ctx).await {
                Ok(Some(set)) => {
                    tracing::debug!(
                        repo_url = %ctx.repo_url,
                        source = source.name(),
                        rules = set.rules.len(),
                        "Loaded rule set"
                    );
                    return Ok(set);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        repo_url = %ctx.repo_url,
                        source = source.name(),
                        "Rule set source failed, trying next: {:#}",
                        e
                    );
                }
            }
        }
        Err(ReviewError::not_found(format!(
            "no rule set found for {}",
            ctx.repo_url
        )))
    }
}
