//! Agent backed by an external CLI.
//!
//! The rendered prompt is written to the child's stdin and stdout is taken
//! as the review text. A JSON object in stdout becomes the structured
//! payload.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reviewforge_common::{Agent, AgentError, AgentRequest, AgentResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::AgentSettings;
use crate::util::{parse_json_payload, truncate_chars};

/// Exit codes that mean the invocation itself is wrong: usage error,
/// not executable, command not found.
const FATAL_EXIT_CODES: [i32; 3] = [2, 126, 127];

pub struct CommandAgent {
    /// Registry key, e.g. the `<name>` of `[agents.<name>]`.
    name: String,
    settings: AgentSettings,
}

impl CommandAgent {
    pub fn new(name: &str, settings: AgentSettings) -> Self {
        Self {
            name: name.to_string(),
            settings,
        }
    }

    fn build_command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.settings.command);
        cmd.args(&self.settings.args);
        let model = request
            .model
            .as_ref()
            .or(self.settings.default_model.as_ref());
        if let Some(model) = model {
            cmd.arg(&self.settings.model_flag).arg(model);
        }
        if let Some(dir) = request.working_dir.as_ref().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn available(&self) -> bool {
        !self.settings.command.trim().is_empty()
    }

    async fn execute_with_prompt(
        &self,
        cancel: &CancellationToken,
        request: &AgentRequest,
        prompt: &str,
    ) -> Result<AgentResult, AgentError> {
        let mut child = self.build_command(request).spawn().map_err(|e| {
            AgentError::retryable(format!("Failed to spawn '{}': {}", self.settings.command, e))
        })?;

        // The prompt is fed while the child runs, so a child that never
        // drains stdin cannot hold the call past the timeout or cancellation.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let run = async move { tokio::join!(feed, child.wait_with_output()) };

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        // Dropping the wait future kills the child (kill_on_drop).
        let (fed, output) = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AgentError::retryable("agent call cancelled"));
            }
            res = tokio::time::timeout(timeout, run) => match res {
                Err(_) => {
                    return Err(AgentError::retryable(format!(
                        "'{}' timed out after {}s",
                        self.name, self.settings.timeout_secs
                    )));
                }
                Ok((_, Err(e))) => {
                    return Err(AgentError::retryable(format!("Failed to wait for agent: {}", e)));
                }
                Ok((fed, Ok(output))) => (fed, output),
            },
        };

        // A child may exit without reading its whole prompt; only a
        // successful exit makes that safe to ignore.
        if let Err(e) = fed
            && output.status.success()
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(AgentError::retryable(format!("Failed to write prompt: {}", e)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let detail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            let message = format!(
                "'{}' exited with code {}: {}",
                self.name,
                code,
                truncate_chars(detail.trim(), 500)
            );
            let unauthorized = detail.to_lowercase().contains("unauthorized");
            return Err(if FATAL_EXIT_CODES.contains(&code) || unauthorized {
                AgentError::non_retryable(message)
            } else {
                AgentError::retryable(message)
            });
        }

        let data = parse_json_payload(&stdout);
        Ok(AgentResult {
            success: true,
            text: stdout,
            data,
            model: request
                .model
                .clone()
                .or_else(|| self.settings.default_model.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewforge_common::AgentErrorKind;

    fn sh(script: &str) -> CommandAgent {
        let mut settings = AgentSettings::new("sh");
        settings.args = vec!["-c".into(), script.into()];
        CommandAgent::new("sh", settings)
    }

    #[tokio::test]
    async fn test_prompt_goes_to_stdin_and_json_is_extracted() {
        let agent = CommandAgent::new("cat", AgentSettings::new("cat"));
        let result = agent
            .execute_with_prompt(
                &CancellationToken::new(),
                &AgentRequest::default(),
                "Result: {\"findings\": [{\"line\": 3}]}",
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.text.starts_with("Result:"));
        assert_eq!(
            result.data,
            Some(serde_json::json!({"findings": [{"line": 3}]}))
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_retryable() {
        let agent = CommandAgent::new("missing", AgentSettings::new("reviewforge-no-such-binary"));
        let err = agent
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Retryable);
    }

    #[tokio::test]
    async fn test_fatal_exit_codes_are_not_retryable() {
        let err = sh("cat >/dev/null; exit 127")
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::NonRetryable);
        assert!(err.message.contains("exited with code 127"));
    }

    #[tokio::test]
    async fn test_unauthorized_output_is_not_retryable() {
        let err = sh("cat >/dev/null; echo '401 Unauthorized' >&2; exit 1")
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::NonRetryable);
    }

    #[tokio::test]
    async fn test_generic_failure_is_retryable() {
        let err = sh("cat >/dev/null; echo 'rate limited' >&2; exit 1")
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Retryable);
        assert!(err.message.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let mut agent = sh("cat >/dev/null; sleep 5");
        agent.settings.timeout_secs = 1;
        let err = agent
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind, AgentErrorKind::Retryable);
        assert!(err.message.contains("timed out"));
    }

    fn large_prompt() -> String {
        "x".repeat(1024 * 1024)
    }

    #[tokio::test]
    async fn test_timeout_applies_while_child_ignores_stdin() {
        let mut agent = sh("sleep 6");
        agent.settings.timeout_secs = 1;
        let started = std::time::Instant::now();
        let err = agent
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), &large_prompt())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(err.kind, AgentErrorKind::Retryable);
        assert!(err.message.contains("timed out"), "{}", err.message);
    }

    #[tokio::test]
    async fn test_cancel_applies_while_child_ignores_stdin() {
        let agent = sh("sleep 6");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = agent
            .execute_with_prompt(&cancel, &AgentRequest::default(), &large_prompt())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(err.message.contains("cancelled"), "{}", err.message);
    }

    #[tokio::test]
    async fn test_successful_child_that_skips_stdin_is_not_a_failure() {
        let result = sh("printf '{\"findings\": []}'")
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), &large_prompt())
            .await
            .unwrap();
        assert_eq!(result.data, Some(serde_json::json!({"findings": []})));
    }

    #[tokio::test]
    async fn test_exit_code_message_names_registered_agent() {
        let mut settings = AgentSettings::new("sh");
        settings.args = vec!["-c".into(), "cat >/dev/null; exit 3".into()];
        let err = CommandAgent::new("reviewer", settings)
            .execute_with_prompt(&CancellationToken::new(), &AgentRequest::default(), "x")
            .await
            .unwrap_err();
        assert!(err.message.starts_with("'reviewer' exited with code 3"), "{}", err.message);
    }
}
