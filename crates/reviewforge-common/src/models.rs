use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid review status: {}", s)),
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one rule within a review.
///
/// `Failed -> Running` is only reachable through an explicit rule retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid rule status: {}", s)),
        }
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one slot of a multi-run rule. Runs are created already running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleRunStatus {
    Running,
    Completed,
    Failed,
}

impl RuleRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RuleRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid rule run status: {}", s)),
        }
    }
}

impl std::fmt::Display for RuleRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One review session against a repository / ref / pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub repo_url: String,
    pub ref_name: String,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub status: ReviewStatus,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Execution record of one DSL rule inside a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRule {
    pub id: i64,
    pub review_id: i64,
    pub rule_id: String,
    pub rule_index: i32,
    pub status: RuleStatus,
    pub retry_count: i32,
    pub current_run_index: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub findings_count: i32,
    pub error_message: Option<String>,
    /// Serialized rule configuration snapshot, kept for audit.
    pub rule_config: Option<String>,
    /// Final rendered prompt, persisted before the agent runs.
    pub prompt: Option<String>,
}

/// One attempt of a multi-run rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRuleRun {
    pub id: i64,
    pub review_rule_id: i64,
    pub run_index: i32,
    pub model: Option<String>,
    pub status: RuleRunStatus,
    pub duration_ms: Option<i64>,
    pub findings_count: i32,
    pub error_message: Option<String>,
    /// Raw text output of a completed run, reloaded as merge input on resume.
    pub output: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Structured output attached to a completed rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub id: i64,
    pub review_id: i64,
    pub review_rule_id: i64,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Number of entries in a payload's `findings` array, zero when absent.
pub fn findings_count(data: Option<&serde_json::Value>) -> i32 {
    data.and_then(|d| d.get("findings"))
        .and_then(|f| f.as_array())
        .map(|a| a.len() as i32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_status_roundtrip_strings() {
        for status in [
            ReviewStatus::Pending,
            ReviewStatus::Running,
            ReviewStatus::Completed,
            ReviewStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ReviewStatus>().unwrap(), status);
        }
        assert!("done".parse::<ReviewStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ReviewStatus::Completed.is_terminal());
        assert!(ReviewStatus::Failed.is_terminal());
        assert!(!ReviewStatus::Running.is_terminal());
        assert!(!RuleStatus::Pending.is_terminal());
    }

    #[test]
    fn test_rule_run_status_rejects_pending() {
        assert!("pending".parse::<RuleRunStatus>().is_err());
        assert_eq!("failed".parse::<RuleRunStatus>().unwrap(), RuleRunStatus::Failed);
    }

    #[test]
    fn test_findings_count() {
        let data = serde_json::json!({"findings": [{"a": 1}, {"b": 2}], "summary": "ok"});
        assert_eq!(findings_count(Some(&data)), 2);
        assert_eq!(findings_count(Some(&serde_json::json!({"summary": "x"}))), 0);
        assert_eq!(findings_count(Some(&serde_json::json!({"findings": "nope"}))), 0);
        assert_eq!(findings_count(None), 0);
    }
}
