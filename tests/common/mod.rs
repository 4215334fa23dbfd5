//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use reviewforge::agent::AgentRegistry;
use reviewforge::config::{RecoverySection, WorkspaceSection};
use reviewforge::orchestrator::{BuildContext, ExecutionOutcome, RetryPolicy, ReviewRunner, RuleExecutor};
use reviewforge::provider::ProviderRegistry;
use reviewforge::publish::{OutputPublisher, PublishContext};
use reviewforge::queue::MemoryTaskQueue;
use reviewforge::recovery::RecoveryService;
use reviewforge::retry_handler::RetryHandler;
use reviewforge::rules::{RuleSet, RuleSetLoader, RuleSetSource, SourceContext};
use reviewforge::store::{DbHandle, ReviewDb};
use reviewforge_common::{Agent, AgentError, AgentRequest, AgentResult, Review};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

pub const REPO_URL: &str = "https://github.com/acme/app";

pub const FINDINGS_JSON: &str = r#"{"findings":[{"title":"unchecked input"}],"summary":"one issue"}"#;

/// Replays queued responses in order, then answers with [`FINDINGS_JSON`].
pub struct ScriptedAgent {
    name: String,
    script: Mutex<VecDeque<Result<AgentResult, AgentError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(name: &str, script: Vec<Result<AgentResult, AgentError>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn merge_calls(&self) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains("=== END OF RUNS ==="))
            .count()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        true
    }

    async fn execute_with_prompt(
        &self,
        _cancel: &CancellationToken,
        _request: &AgentRequest,
        prompt: &str,
    ) -> Result<AgentResult, AgentError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AgentResult::text(FINDINGS_JSON)))
    }
}

/// Blocks every call until [`GatedAgent::open`] is called.
pub struct GatedAgent {
    name: String,
    gate: Semaphore,
    started: Notify,
    calls: AtomicUsize,
}

impl GatedAgent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            gate: Semaphore::new(0),
            started: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for GatedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        true
    }

    async fn execute_with_prompt(
        &self,
        cancel: &CancellationToken,
        _request: &AgentRequest,
        _prompt: &str,
    ) -> Result<AgentResult, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::retryable("cancelled")),
            permit = self.gate.acquire() => {
                permit.map_err(|e| AgentError::non_retryable(e.to_string()))?.forget();
                Ok(AgentResult::text(FINDINGS_JSON))
            }
        }
    }
}

/// Records every publication as `(review_id, rule_id)`.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<(i64, String)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(i64, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutputPublisher for RecordingPublisher {
    async fn publish(&self, ctx: &PublishContext, _outcome: &ExecutionOutcome) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((ctx.review_id, ctx.rule_id.clone()));
        Ok(())
    }
}

/// Rule source that always returns the same set.
pub struct StaticSource(pub RuleSet);

#[async_trait]
impl RuleSetSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(&self, _ctx: &SourceContext) -> Result<Option<RuleSet>> {
        Ok(Some(self.0.clone()))
    }
}

pub struct Harness {
    pub db: DbHandle,
    pub executor: Arc<RuleExecutor>,
    pub runner: Arc<ReviewRunner>,
    pub publisher: Arc<RecordingPublisher>,
    pub queue: Arc<MemoryTaskQueue>,
}

impl Harness {
    pub fn new(agents: Vec<Arc<dyn Agent>>, max_retries: u32) -> Self {
        let db = DbHandle::new(ReviewDb::new_in_memory().unwrap());
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry.register_agent(agent);
        }
        let executor = Arc::new(RuleExecutor::new(
            db.clone(),
            Arc::new(registry),
            RetryPolicy::immediate(max_retries),
            2,
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let runner = Arc::new(ReviewRunner::new(
            db.clone(),
            executor.clone(),
            publisher.clone(),
        ));
        Self {
            db,
            executor,
            runner,
            publisher,
            queue: Arc::new(MemoryTaskQueue::new()),
        }
    }

    pub fn create_review(&self) -> Review {
        self.db
            .lock_sync()
            .unwrap()
            .create_review(REPO_URL, "main", Some("abc123"), Some(42))
            .unwrap()
    }

    pub fn review(&self, id: i64) -> Review {
        self.db.lock_sync().unwrap().get_review(id).unwrap().unwrap()
    }

    pub fn context(&self, review: &Review) -> BuildContext {
        BuildContext::for_review(review, "acme", "app", None)
    }

    pub fn recovery(&self, policy: RecoverySection) -> RecoveryService {
        RecoveryService::new(
            self.db.clone(),
            self.queue.clone(),
            Arc::new(ProviderRegistry::with_defaults()),
            policy,
        )
    }

    pub fn retry_handler(&self, rules: RuleSet) -> RetryHandler {
        RetryHandler::new(
            self.db.clone(),
            self.queue.clone(),
            Arc::new(ProviderRegistry::with_defaults()),
            self.runner.clone(),
            Arc::new(RuleSetLoader::new(vec![Box::new(StaticSource(rules))])),
            WorkspaceSection {
                root: PathBuf::from("/nonexistent/reviewforge-workspace"),
            },
        )
    }
}
