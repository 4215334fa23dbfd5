use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use reviewforge_common::{
    Review, ReviewResult, ReviewRule, ReviewRuleRun, ReviewStatus, RuleRunStatus, RuleStatus,
};

/// Async-safe handle to the review database.
///
/// Wraps `ReviewDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads. Every call is a single short critical
/// section; callers must not hold records across calls and expect them to be
/// current.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<ReviewDb>>,
}

impl DbHandle {
    pub fn new(db: ReviewDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ReviewDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup and tests;
    /// never call this from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, ReviewDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct ReviewDb {
    conn: Connection,
}

const REVIEW_COLUMNS: &str = "id, repo_url, ref_name, commit_sha, pr_number, status, retry_count, \
     started_at, completed_at, duration_ms, error_message, created_at";

const RULE_COLUMNS: &str = "id, review_id, rule_id, rule_index, status, retry_count, \
     current_run_index, started_at, completed_at, duration_ms, findings_count, error_message, \
     rule_config, prompt";

const RUN_COLUMNS: &str = "id, review_rule_id, run_index, model, status, duration_ms, \
     findings_count, error_message, output, started_at, completed_at";

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl ReviewDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repo_url TEXT NOT NULL,
                    ref_name TEXT NOT NULL,
                    commit_sha TEXT,
                    pr_number INTEGER,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    started_at TEXT,
                    completed_at TEXT,
                    duration_ms INTEGER,
                    error_message TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS review_rules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    review_id INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
                    rule_id TEXT NOT NULL,
                    rule_index INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    current_run_index INTEGER NOT NULL DEFAULT 0,
                    started_at TEXT,
                    completed_at TEXT,
                    duration_ms INTEGER,
                    findings_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    rule_config TEXT,
                    prompt TEXT,
                    UNIQUE(review_id, rule_id)
                );

                CREATE TABLE IF NOT EXISTS review_rule_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    review_rule_id INTEGER NOT NULL REFERENCES review_rules(id) ON DELETE CASCADE,
                    run_index INTEGER NOT NULL,
                    model TEXT,
                    status TEXT NOT NULL DEFAULT 'running',
                    duration_ms INTEGER,
                    findings_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    output TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    UNIQUE(review_rule_id, run_index)
                );

                CREATE TABLE IF NOT EXISTS review_results (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    review_id INTEGER NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
                    review_rule_id INTEGER NOT NULL REFERENCES review_rules(id) ON DELETE CASCADE,
                    data TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews(status);
                CREATE INDEX IF NOT EXISTS idx_review_rules_review ON review_rules(review_id);
                CREATE INDEX IF NOT EXISTS idx_review_rule_runs_rule ON review_rule_runs(review_rule_id);
                CREATE INDEX IF NOT EXISTS idx_review_results_rule ON review_results(review_rule_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Reviews ───────────────────────────────────────────────────────

    pub fn create_review(
        &self,
        repo_url: &str,
        ref_name: &str,
        commit_sha: Option<&str>,
        pr_number: Option<i64>,
    ) -> Result<Review> {
        self.conn
            .execute(
                "INSERT INTO reviews (repo_url, ref_name, commit_sha, pr_number, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![repo_url, ref_name, commit_sha, pr_number, now()],
            )
            .context("Failed to insert review")?;
        let id = self.conn.last_insert_rowid();
        self.get_review(id)?.context("Review not found after insert")
    }

    pub fn get_review(&self, id: i64) -> Result<Option<Review>> {
        let sql = format!("SELECT {} FROM reviews WHERE id = ?1", REVIEW_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], ReviewRow::from_row)
            .optional()
            .context("Failed to query review")?;
        row.map(ReviewRow::into_review).transpose()
    }

    /// All reviews left `pending` or `running`, oldest first.
    pub fn list_pending_or_running(&self) -> Result<Vec<Review>> {
        let sql = format!(
            "SELECT {} FROM reviews WHERE status IN ('pending', 'running') ORDER BY id",
            REVIEW_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_pending_or_running")?;
        let rows = stmt
            .query_map([], ReviewRow::from_row)
            .context("Failed to query reviews")?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row.context("Failed to read review row")?.into_review()?);
        }
        Ok(reviews)
    }

    /// Move a review to `running`, keeping the first start timestamp.
    pub fn mark_review_running(&self, id: i64) -> Result<Review> {
        self.conn
            .execute(
                "UPDATE reviews SET status = 'running', started_at = COALESCE(started_at, ?1),
                    completed_at = NULL, error_message = NULL
                 WHERE id = ?2",
                params![now(), id],
            )
            .context("Failed to mark review running")?;
        self.get_review(id)?
            .context("Review not found after status update")
    }

    /// Write a status. Terminal statuses also stamp `completed_at`.
    pub fn update_review_status(
        &self,
        id: i64,
        status: ReviewStatus,
        error_message: Option<&str>,
        duration_ms: Option<i64>,
    ) -> Result<Review> {
        if status.is_terminal() {
            self.conn
                .execute(
                    "UPDATE reviews SET status = ?1, error_message = ?2,
                        duration_ms = COALESCE(?3, duration_ms), completed_at = ?4
                     WHERE id = ?5",
                    params![status.as_str(), error_message, duration_ms, now(), id],
                )
                .context("Failed to update review status")?;
        } else {
            self.conn
                .execute(
                    "UPDATE reviews SET status = ?1, error_message = ?2 WHERE id = ?3",
                    params![status.as_str(), error_message, id],
                )
                .context("Failed to update review status")?;
        }
        self.get_review(id)?
            .context("Review not found after status update")
    }

    /// Atomically bump the retry counter and move a `failed` review back to
    /// `pending`. Returns `None` when the row was not `failed` at write time.
    pub fn reset_review_state(&self, id: i64) -> Result<Option<Review>> {
        let changed = self
            .conn
            .execute(
                "UPDATE reviews SET status = 'pending', retry_count = retry_count + 1,
                    error_message = NULL, started_at = NULL, completed_at = NULL, duration_ms = NULL
                 WHERE id = ?1 AND status = 'failed'",
                params![id],
            )
            .context("Failed to reset review state")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_review(id)
    }

    /// Overwrite the start timestamp, e.g. when importing reviews from
    /// another instance.
    pub fn set_review_started_at(&self, id: i64, started_at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE reviews SET started_at = ?1 WHERE id = ?2",
                params![started_at.to_rfc3339(), id],
            )
            .context("Failed to set review started_at")?;
        Ok(())
    }

    pub fn set_review_retry_count(&self, id: i64, retry_count: i32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE reviews SET retry_count = ?1 WHERE id = ?2",
                params![retry_count, id],
            )
            .context("Failed to set review retry_count")?;
        Ok(())
    }

    // ── Review rules ──────────────────────────────────────────────────

    /// Create the tracking record for `(review_id, rule_id)` unless it exists.
    pub fn ensure_review_rule(
        &self,
        review_id: i64,
        rule_id: &str,
        rule_index: i32,
    ) -> Result<ReviewRule> {
        self.conn
            .execute(
                "INSERT INTO review_rules (review_id, rule_id, rule_index) VALUES (?1, ?2, ?3)
                 ON CONFLICT(review_id, rule_id) DO UPDATE SET rule_index = excluded.rule_index",
                params![review_id, rule_id, rule_index],
            )
            .context("Failed to insert review rule")?;
        self.get_rule_by_review_and_rule_id(review_id, rule_id)?
            .context("Review rule not found after insert")
    }

    pub fn get_review_rule(&self, id: i64) -> Result<Option<ReviewRule>> {
        let sql = format!("SELECT {} FROM review_rules WHERE id = ?1", RULE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], RuleRow::from_row)
            .optional()
            .context("Failed to query review rule")?;
        row.map(RuleRow::into_rule).transpose()
    }

    pub fn get_rule_by_review_and_rule_id(
        &self,
        review_id: i64,
        rule_id: &str,
    ) -> Result<Option<ReviewRule>> {
        let sql = format!(
            "SELECT {} FROM review_rules WHERE review_id = ?1 AND rule_id = ?2",
            RULE_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![review_id, rule_id], RuleRow::from_row)
            .optional()
            .context("Failed to query review rule")?;
        row.map(RuleRow::into_rule).transpose()
    }

    pub fn get_rules_by_review_id(&self, review_id: i64) -> Result<Vec<ReviewRule>> {
        let sql = format!(
            "SELECT {} FROM review_rules WHERE review_id = ?1 ORDER BY rule_index, id",
            RULE_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_rules_by_review_id")?;
        let rows = stmt
            .query_map(params![review_id], RuleRow::from_row)
            .context("Failed to query review rules")?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row.context("Failed to read review rule row")?.into_rule()?);
        }
        Ok(rules)
    }

    /// Move a rule to `running` and snapshot its configuration.
    pub fn mark_rule_running(&self, id: i64, rule_config: Option<&str>) -> Result<ReviewRule> {
        self.conn
            .execute(
                "UPDATE review_rules SET status = 'running', started_at = ?1,
                    rule_config = COALESCE(?2, rule_config), completed_at = NULL,
                    duration_ms = NULL, error_message = NULL
                 WHERE id = ?3",
                params![now(), rule_config, id],
            )
            .context("Failed to mark rule running")?;
        self.get_review_rule(id)?
            .context("Review rule not found after status update")
    }

    pub fn update_rule_prompt(&self, id: i64, prompt: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE review_rules SET prompt = ?1 WHERE id = ?2",
                params![prompt, id],
            )
            .context("Failed to update rule prompt")?;
        Ok(())
    }

    pub fn update_rule_run_index(&self, id: i64, run_index: i32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE review_rules SET current_run_index = ?1 WHERE id = ?2",
                params![run_index, id],
            )
            .context("Failed to update rule run index")?;
        Ok(())
    }

    /// Record the outcome of a rule. `completed_at` and `duration_ms` are always set.
    pub fn finish_rule(
        &self,
        id: i64,
        status: RuleStatus,
        findings_count: i32,
        error_message: Option<&str>,
        duration_ms: i64,
    ) -> Result<ReviewRule> {
        self.conn
            .execute(
                "UPDATE review_rules SET status = ?1, findings_count = ?2, error_message = ?3,
                    duration_ms = ?4, completed_at = ?5
                 WHERE id = ?6",
                params![status.as_str(), findings_count, error_message, duration_ms, now(), id],
            )
            .context("Failed to finish review rule")?;
        self.get_review_rule(id)?
            .context("Review rule not found after finish")
    }

    /// Reset a `failed` rule to `running` and bump both the rule and review
    /// retry counters in one transaction. Returns `false` if the rule was no
    /// longer `failed` when the transaction ran.
    pub fn reset_rule_state(&self, review_id: i64, rule_row_id: i64) -> Result<bool> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let changed = tx
            .execute(
                "UPDATE review_rules SET status = 'running', retry_count = retry_count + 1,
                    started_at = ?1, completed_at = NULL, duration_ms = NULL,
                    error_message = NULL, findings_count = 0, current_run_index = 0
                 WHERE id = ?2 AND review_id = ?3 AND status = 'failed'",
                params![now(), rule_row_id, review_id],
            )
            .context("Failed to reset rule state")?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE reviews SET status = 'running', retry_count = retry_count + 1,
                started_at = COALESCE(started_at, ?1), completed_at = NULL, error_message = NULL
             WHERE id = ?2",
            params![now(), review_id],
        )
        .context("Failed to reset review for rule retry")?;
        tx.commit().context("Failed to commit rule reset")?;
        Ok(true)
    }

    /// Delete a rule's stale results and runs in one transaction.
    ///
    /// With `all_runs == false` completed runs are kept so a resumed rule can
    /// reuse their output.
    pub fn purge_rule_outputs(&self, rule_row_id: i64, all_runs: bool) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "DELETE FROM review_results WHERE review_rule_id = ?1",
            params![rule_row_id],
        )
        .context("Failed to delete stale results")?;
        let sql = if all_runs {
            "DELETE FROM review_rule_runs WHERE review_rule_id = ?1"
        } else {
            "DELETE FROM review_rule_runs WHERE review_rule_id = ?1 AND status != 'completed'"
        };
        tx.execute(sql, params![rule_row_id])
            .context("Failed to delete stale runs")?;
        tx.commit().context("Failed to commit purge")?;
        Ok(())
    }

    /// Drop `pending` rows of a review whose rule is not in `keep`.
    ///
    /// Such rows come from an earlier pass over a different rule set and
    /// would otherwise hold the review status open. Returns how many rows
    /// were removed.
    pub fn delete_stale_pending_rules(&self, review_id: i64, keep: &[String]) -> Result<usize> {
        let stale: Vec<i64> = self
            .get_rules_by_review_id(review_id)?
            .into_iter()
            .filter(|r| r.status == RuleStatus::Pending && !keep.contains(&r.rule_id))
            .map(|r| r.id)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for id in &stale {
            tx.execute("DELETE FROM review_results WHERE review_rule_id = ?1", params![id])
                .context("Failed to delete stale rule results")?;
            tx.execute("DELETE FROM review_rule_runs WHERE review_rule_id = ?1", params![id])
                .context("Failed to delete stale rule runs")?;
            tx.execute(
                "DELETE FROM review_rules WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .context("Failed to delete stale review rule")?;
        }
        tx.commit().context("Failed to commit stale rule cleanup")?;
        Ok(stale.len())
    }

    // ── Rule runs ─────────────────────────────────────────────────────

    /// Create or restart the run slot `(rule, run_index)` as `running`.
    pub fn start_rule_run(
        &self,
        rule_row_id: i64,
        run_index: i32,
        model: Option<&str>,
    ) -> Result<ReviewRuleRun> {
        self.conn
            .execute(
                "INSERT INTO review_rule_runs (review_rule_id, run_index, model, status, started_at)
                 VALUES (?1, ?2, ?3, 'running', ?4)
                 ON CONFLICT(review_rule_id, run_index) DO UPDATE SET
                    model = excluded.model, status = 'running', started_at = excluded.started_at,
                    completed_at = NULL, duration_ms = NULL, error_message = NULL, output = NULL,
                    findings_count = 0",
                params![rule_row_id, run_index, model, now()],
            )
            .context("Failed to upsert rule run")?;
        let sql = format!(
            "SELECT {} FROM review_rule_runs WHERE review_rule_id = ?1 AND run_index = ?2",
            RUN_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![rule_row_id, run_index], RunRow::from_row)
            .context("Rule run not found after upsert")?;
        row.into_run()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn finish_rule_run(
        &self,
        id: i64,
        status: RuleRunStatus,
        duration_ms: i64,
        findings_count: i32,
        error_message: Option<&str>,
        output: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE review_rule_runs SET status = ?1, duration_ms = ?2, findings_count = ?3,
                    error_message = ?4, output = ?5, completed_at = ?6
                 WHERE id = ?7",
                params![
                    status.as_str(),
                    duration_ms,
                    findings_count,
                    error_message,
                    output,
                    now(),
                    id
                ],
            )
            .context("Failed to finish rule run")?;
        Ok(())
    }

    pub fn get_runs_by_rule_id(&self, rule_row_id: i64) -> Result<Vec<ReviewRuleRun>> {
        let sql = format!(
            "SELECT {} FROM review_rule_runs WHERE review_rule_id = ?1 ORDER BY run_index",
            RUN_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_runs_by_rule_id")?;
        let rows = stmt
            .query_map(params![rule_row_id], RunRow::from_row)
            .context("Failed to query rule runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read rule run row")?.into_run()?);
        }
        Ok(runs)
    }

    // ── Results ───────────────────────────────────────────────────────

    pub fn create_review_result(
        &self,
        review_id: i64,
        rule_row_id: i64,
        data: &serde_json::Value,
    ) -> Result<ReviewResult> {
        let created_at = Utc::now();
        let json = serde_json::to_string(data).context("Failed to serialize result data")?;
        self.conn
            .execute(
                "INSERT INTO review_results (review_id, review_rule_id, data, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![review_id, rule_row_id, json, created_at.to_rfc3339()],
            )
            .context("Failed to insert review result")?;
        Ok(ReviewResult {
            id: self.conn.last_insert_rowid(),
            review_id,
            review_rule_id: rule_row_id,
            data: data.clone(),
            created_at,
        })
    }

    pub fn get_results_by_rule_id(&self, rule_row_id: i64) -> Result<Vec<ReviewResult>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, review_id, review_rule_id, data, created_at
                 FROM review_results WHERE review_rule_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare get_results_by_rule_id")?;
        let rows = stmt
            .query_map(params![rule_row_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query review results")?;
        let mut results = Vec::new();
        for row in rows {
            let (id, review_id, review_rule_id, data, created_at) =
                row.context("Failed to read review result row")?;
            results.push(ReviewResult {
                id,
                review_id,
                review_rule_id,
                data: serde_json::from_str(&data).context("Failed to parse result data JSON")?,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(results)
    }

    // ── Settings ──────────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query setting")
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .context("Failed to upsert setting")?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .context("Failed to delete setting")?;
        Ok(())
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: '{}'", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Intermediate row struct for reviews before parsing status / timestamps.
struct ReviewRow {
    id: i64,
    repo_url: String,
    ref_name: String,
    commit_sha: Option<String>,
    pr_number: Option<i64>,
    status: String,
    retry_count: i32,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    created_at: String,
}

impl ReviewRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repo_url: row.get(1)?,
            ref_name: row.get(2)?,
            commit_sha: row.get(3)?,
            pr_number: row.get(4)?,
            status: row.get(5)?,
            retry_count: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            duration_ms: row.get(9)?,
            error_message: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_review(self) -> Result<Review> {
        let status = ReviewStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse review status")?;
        Ok(Review {
            id: self.id,
            repo_url: self.repo_url,
            ref_name: self.ref_name,
            commit_sha: self.commit_sha,
            pr_number: self.pr_number,
            status,
            retry_count: self.retry_count,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RuleRow {
    id: i64,
    review_id: i64,
    rule_id: String,
    rule_index: i32,
    status: String,
    retry_count: i32,
    current_run_index: i32,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    findings_count: i32,
    error_message: Option<String>,
    rule_config: Option<String>,
    prompt: Option<String>,
}

impl RuleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            review_id: row.get(1)?,
            rule_id: row.get(2)?,
            rule_index: row.get(3)?,
            status: row.get(4)?,
            retry_count: row.get(5)?,
            current_run_index: row.get(6)?,
            started_at: row.get(7)?,
            completed_at: row.get(8)?,
            duration_ms: row.get(9)?,
            findings_count: row.get(10)?,
            error_message: row.get(11)?,
            rule_config: row.get(12)?,
            prompt: row.get(13)?,
        })
    }

    fn into_rule(self) -> Result<ReviewRule> {
        let status = RuleStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse rule status")?;
        Ok(ReviewRule {
            id: self.id,
            review_id: self.review_id,
            rule_id: self.rule_id,
            rule_index: self.rule_index,
            status,
            retry_count: self.retry_count,
            current_run_index: self.current_run_index,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
            duration_ms: self.duration_ms,
            findings_count: self.findings_count,
            error_message: self.error_message,
            rule_config: self.rule_config,
            prompt: self.prompt,
        })
    }
}

struct RunRow {
    id: i64,
    review_rule_id: i64,
    run_index: i32,
    model: Option<String>,
    status: String,
    duration_ms: Option<i64>,
    findings_count: i32,
    error_message: Option<String>,
    output: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            review_rule_id: row.get(1)?,
            run_index: row.get(2)?,
            model: row.get(3)?,
            status: row.get(4)?,
            duration_ms: row.get(5)?,
            findings_count: row.get(6)?,
            error_message: row.get(7)?,
            output: row.get(8)?,
            started_at: row.get(9)?,
            completed_at: row.get(10)?,
        })
    }

    fn into_run(self) -> Result<ReviewRuleRun> {
        let status = RuleRunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse rule run status")?;
        Ok(ReviewRuleRun {
            id: self.id,
            review_rule_id: self.review_rule_id,
            run_index: self.run_index,
            model: self.model,
            status,
            duration_ms: self.duration_ms,
            findings_count: self.findings_count,
            error_message: self.error_message,
            output: self.output,
            started_at: parse_opt_ts(self.started_at)?,
            completed_at: parse_opt_ts(self.completed_at)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
