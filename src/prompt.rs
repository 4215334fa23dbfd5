//! Prompt rendering for rules and multi-run merges.
//!
//! Rule prompts are templates with `{{name}}` placeholders filled from a
//! [`PromptContext`]. Available names:
//!
//! | Placeholder          | Value                                  |
//! |----------------------|----------------------------------------|
//! | `repo_url`           | repository URL                         |
//! | `owner`, `repo`      | parsed repository path                 |
//! | `ref`                | branch or tag under review             |
//! | `commit`             | commit SHA (empty when unknown)        |
//! | `pr_number`          | pull request number (empty when none)  |
//! | `pr_title`           | pull request title (empty when none)   |
//! | `rule_id`            | id of the rule being rendered          |
//! | `rule_description`   | its description                        |
//! | `checkout_dir`       | local checkout path                    |
//!
//! plus anything in [`PromptContext::extra`]. An unknown placeholder is an
//! error rather than an empty substitution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::errors::ReviewError;
use crate::rules::RuleDefinition;

#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub ref_name: String,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_title: Option<String>,
    pub checkout_dir: Option<PathBuf>,
    pub extra: BTreeMap<String, String>,
}

/// One successful run handed to the merge prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeInput {
    pub run_index: u32,
    pub model: Option<String>,
    pub text: String,
}

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").unwrap());

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, rule: &RuleDefinition, ctx: &PromptContext) -> Result<String, ReviewError> {
        let mut unknown = Vec::new();
        let rendered = PLACEHOLDER_REGEX.replace_all(&rule.prompt, |caps: &Captures| {
            let name = &caps[1];
            match lookup(name, rule, ctx) {
                Some(value) => value,
                None => {
                    unknown.push(name.to_string());
                    String::new()
                }
            }
        });

        if !unknown.is_empty() {
            return Err(ReviewError::internal(format!(
                "rule '{}' prompt uses unknown placeholder(s): {}",
                rule.id,
                unknown.join(", ")
            )));
        }
        Ok(rendered.into_owned())
    }
}

fn lookup(name: &str, rule: &RuleDefinition, ctx: &PromptContext) -> Option<String> {
    let value = match name {
        "repo_url" => ctx.repo_url.clone(),
        "owner" => ctx.owner.clone(),
        "repo" => ctx.repo.clone(),
        "ref" => ctx.ref_name.clone(),
        "commit" => ctx.commit_sha.clone().unwrap_or_default(),
        "pr_number" => ctx.pr_number.map(|n| n.to_string()).unwrap_or_default(),
        "pr_title" => ctx.pr_title.clone().unwrap_or_default(),
        "rule_id" => rule.id.clone(),
        "rule_description" => rule.description.clone(),
        "checkout_dir" => ctx
            .checkout_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        other => return ctx.extra.get(other).cloned(),
    };
    Some(value)
}

/// Prompt asking the agent to merge several run outputs into one.
pub fn build_merge_prompt(runs: &[MergeInput]) -> String {
    let mut prompt = String::from(
        "You are given the outputs of several independent reviews of the same code.\n\
         Merge them into a single review:\n\
         - deduplicate findings that describe the same problem\n\
         - keep every distinct finding\n\
         - preserve the markdown structure of the originals\n\
         - if the inputs contain JSON, answer with one JSON object of the same shape\n\n",
    );
    for run in runs {
        prompt.push_str(&format!(
            "=== RUN {} (model: {}) ===\n",
            run.run_index,
            run.model.as_deref().unwrap_or("default")
        ));
        prompt.push_str(run.text.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str("=== END OF RUNS ===\n");
    prompt
}
