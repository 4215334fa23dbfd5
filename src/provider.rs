//! Git hosting provider detection and repository path parsing.
//!
//! Only URL handling lives here; no provider API is ever called.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};

pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `host` belongs to this provider.
    fn matches_host(&self, host: &str) -> bool;

    /// `(owner, repo)` for a repository URL.
    fn parse_repo_path(&self, url: &str) -> Result<(String, String)>;
}

pub trait ProviderResolver: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Provider>>;

    /// Name of the provider hosting `url`, if any is recognised.
    fn detect_from_url(&self, url: &str) -> Option<String>;
}

/// Split a repository URL into `(host, path)`.
///
/// Handles `https://host/owner/repo(.git)`, `ssh://git@host/owner/repo` and
/// scp-style `git@host:owner/repo.git`.
pub fn split_repo_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let (host, path) = if let Some((_, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/')?;
        (authority, path)
    } else if let Some((authority, path)) = url.split_once(':') {
        (authority, path)
    } else {
        return None;
    };

    let host = host.rsplit('@').next().unwrap_or(host);
    let host = host.split(':').next().unwrap_or(host).to_lowercase();
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path).to_string();
    if host.is_empty() || path.is_empty() {
        return None;
    }
    Some((host, path))
}

/// A provider recognised by host name.
pub struct HostedProvider {
    name: String,
    host_markers: Vec<String>,
    /// GitLab-style nested groups: everything but the last segment is the owner.
    nested_groups: bool,
}

impl HostedProvider {
    pub fn new(name: &str, host_markers: &[&str], nested_groups: bool) -> Self {
        Self {
            name: name.to_string(),
            host_markers: host_markers.iter().map(|s| s.to_string()).collect(),
            nested_groups,
        }
    }

    pub fn github() -> Self {
        Self::new("github", &["github"], false)
    }

    pub fn gitlab() -> Self {
        Self::new("gitlab", &["gitlab"], true)
    }

    pub fn gitea() -> Self {
        Self::new("gitea", &["gitea", "codeberg.org", "forgejo"], false)
    }
}

impl Provider for HostedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches_host(&self, host: &str) -> bool {
        self.host_markers.iter().any(|m| host.contains(m.as_str()))
    }

    fn parse_repo_path(&self, url: &str) -> Result<(String, String)> {
        let Some((_, path)) = split_repo_url(url) else {
            bail!("Unrecognised repository URL: {}", url);
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            bail!("Repository URL has no owner/repo path: {}", url);
        }
        if self.nested_groups {
            let last = segments.len() - 1;
            Ok((segments[..last].join("/"), segments[last].to_string()))
        } else {
            Ok((segments[0].to_string(), segments[1].to_string()))
        }
    }
}

/// Name-indexed set of providers, detection in registration order.
#[derive(Default)]
pub struct ProviderRegistry {
    order: Vec<String>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// GitHub, GitLab and Gitea.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HostedProvider::github()));
        registry.register(Arc::new(HostedProvider::gitlab()));
        registry.register(Arc::new(HostedProvider::gitea()));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if !self.providers.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.providers.insert(name, provider);
    }
}

impl ProviderResolver for ProviderRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    fn detect_from_url(&self, url: &str) -> Option<String> {
        let (host, _) = split_repo_url(url)?;
        self.order
            .iter()
            .find(|name| {
                self.providers
                    .get(name.as_str())
                    .is_some_and(|p| p.matches_host(&host))
            })
            .cloned()
    }
}
