//! In-memory work queue for reviews.
//!
//! At most one review per repository is handed out at a time. A task added
//! with [`TaskQueue::enqueue_as_running`] claims its repository slot at once,
//! because a worker may logically already be inside it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::task::ReviewTask;

pub trait TaskQueue: Send + Sync {
    /// Add a pending task. `false` if the review is already queued.
    fn enqueue(&self, task: ReviewTask) -> bool;

    /// Add a task whose repository slot is marked busy immediately.
    fn enqueue_as_running(&self, task: ReviewTask) -> bool;

    fn has_task(&self, review_id: i64) -> bool;
}

struct Queued {
    task: ReviewTask,
    holds_slot: bool,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Queued>,
    /// review id -> repository URL of every handed-out or slot-holding task.
    running: HashMap<i64, String>,
    /// Slot holders per repository. Recovery can requeue several running
    /// reviews of one repository, and each holds the slot until it completes.
    busy_repos: HashMap<String, usize>,
}

impl QueueState {
    fn claim(&mut self, review_id: i64, repo: String) {
        *self.busy_repos.entry(repo.clone()).or_default() += 1;
        self.running.insert(review_id, repo);
    }

    fn release(&mut self, review_id: i64) {
        let Some(repo) = self.running.remove(&review_id) else {
            return;
        };
        if let Some(holders) = self.busy_repos.get_mut(&repo) {
            *holders -= 1;
            if *holders == 0 {
                self.busy_repos.remove(&repo);
            }
        }
    }

    fn contains(&self, review_id: i64) -> bool {
        self.running.contains_key(&review_id)
            || self.pending.iter().any(|q| q.task.review_id == review_id)
    }
}

/// Snapshot entry used for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub review_id: i64,
    pub repo_url: String,
    pub running: bool,
}

#[derive(Default)]
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned queue is still structurally valid.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the first task whose repository is free (or whose slot it
    /// already holds) and mark it running.
    pub fn dequeue(&self) -> Option<ReviewTask> {
        let mut state = self.lock();
        let pos = state
            .pending
            .iter()
            .position(|q| q.holds_slot || !state.busy_repos.contains_key(q.task.repo_url()))?;
        let queued = state.pending.remove(pos)?;
        if !queued.holds_slot {
            state.claim(queued.task.review_id, queued.task.repo_url().to_string());
        }
        Some(queued.task)
    }

    /// Release the repository slot held by `review_id`.
    pub fn complete(&self, review_id: i64) {
        self.lock().release(review_id);
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.running.is_empty()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        let state = self.lock();
        state
            .pending
            .iter()
            .map(|q| QueueEntry {
                review_id: q.task.review_id,
                repo_url: q.task.repo_url().to_string(),
                running: q.holds_slot,
            })
            .collect()
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn enqueue(&self, task: ReviewTask) -> bool {
        let mut state = self.lock();
        if state.contains(task.review_id) {
            return false;
        }
        state.pending.push_back(Queued {
            task,
            holds_slot: false,
        });
        true
    }

    fn enqueue_as_running(&self, task: ReviewTask) -> bool {
        let mut state = self.lock();
        if state.contains(task.review_id) {
            return false;
        }
        state.claim(task.review_id, task.repo_url().to_string());
        state.pending.push_back(Queued {
            task,
            holds_slot: true,
        });
        true
    }

    fn has_task(&self, review_id: i64) -> bool {
        self.lock().contains(review_id)
    }
}
