//! CLI command implementations.
//!
//! | Module     | Commands handled        |
//! |------------|-------------------------|
//! | `submit`   | `Submit`                |
//! | `recover`  | `Recover`               |
//! | `retry`    | `Retry`, `RetryRule`    |
//! | `status`   | `Status`                |
//! | `worker`   | `Worker`                |
//! | `config`   | `Config`                |

pub mod config;
pub mod recover;
pub mod retry;
pub mod status;
pub mod submit;
pub mod worker;

pub use config::cmd_config;
pub use recover::cmd_recover;
pub use retry::{cmd_retry, cmd_retry_rule};
pub use status::cmd_status;
pub use submit::cmd_submit;
pub use worker::cmd_worker;

use std::sync::Arc;

use anyhow::Result;
use reviewforge::agent::AgentRegistry;
use reviewforge::config::ReviewforgeConfig;
use reviewforge::orchestrator::{ReviewRunner, RuleExecutor};
use reviewforge::provider::ProviderRegistry;
use reviewforge::publish::LogPublisher;
use reviewforge::queue::MemoryTaskQueue;
use reviewforge::recovery::RecoveryService;
use reviewforge::retry_handler::RetryHandler;
use reviewforge::rules::RuleSetLoader;
use reviewforge::store::{DbHandle, ReviewDb};
use reviewforge::worker::WorkerPool;
use tokio_util::sync::CancellationToken;

/// Everything a command needs, wired from the loaded configuration.
pub struct Services {
    pub config: ReviewforgeConfig,
    pub db: DbHandle,
    pub queue: Arc<MemoryTaskQueue>,
    pub providers: Arc<ProviderRegistry>,
    pub runner: Arc<ReviewRunner>,
    pub loader: Arc<RuleSetLoader>,
}

impl Services {
    pub fn open(config: ReviewforgeConfig) -> Result<Self> {
        for problem in config.toml.validate() {
            tracing::warn!("Configuration problem: {}", problem);
        }

        let db = DbHandle::new(ReviewDb::new(&config.db_path())?);
        let agents = Arc::new(AgentRegistry::from_config(&config.toml));
        let executor = Arc::new(RuleExecutor::new(
            db.clone(),
            agents,
            config.toml.execution.retry_policy(),
            config.toml.execution.multi_run_count,
        ));
        let runner = Arc::new(ReviewRunner::new(
            db.clone(),
            executor,
            Arc::new(LogPublisher),
        ));
        let loader = Arc::new(RuleSetLoader::standard(&config, db.clone()));

        Ok(Self {
            config,
            db,
            queue: Arc::new(MemoryTaskQueue::new()),
            providers: Arc::new(ProviderRegistry::with_defaults()),
            runner,
            loader,
        })
    }

    pub fn recovery(&self) -> RecoveryService {
        RecoveryService::new(
            self.db.clone(),
            self.queue.clone(),
            self.providers.clone(),
            self.config.toml.recovery.clone(),
        )
    }

    pub fn retry_handler(&self, cancel: CancellationToken) -> RetryHandler {
        RetryHandler::new(
            self.db.clone(),
            self.queue.clone(),
            self.providers.clone(),
            self.runner.clone(),
            self.loader.clone(),
            self.config.workspace(),
        )
        .with_cancellation(cancel)
    }

    pub fn worker_pool(&self, concurrency: usize) -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(
            self.db.clone(),
            self.queue.clone(),
            self.runner.clone(),
            self.loader.clone(),
            self.config.workspace(),
            concurrency,
        ))
    }
}

/// Token cancelled on Ctrl-C.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            trigger.cancel();
        }
    });
    token
}
