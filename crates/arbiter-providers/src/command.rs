//! Subprocess-backed target provider.
//!
//! Runs a configured command once per invocation: the rendered prompt goes
//! to the child's stdin and the candidate answer comes back on stdout. A
//! stdout that parses as `{"text": ..., "trace": {...}}` also carries an
//! execution trace; anything else is taken as plain answer text.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use arbiter_core::error::{EvalError, Result};
use arbiter_core::trace::TraceSummary;

use crate::provider_trait::{InvokeRequest, InvokeResponse, Provider};

/// Structured stdout emitted by trace-aware commands.
#[derive(Debug, Deserialize)]
struct CommandOutput {
    text: String,
    #[serde(default)]
    trace: Option<TraceSummary>,
}

/// Provider that reaches the target through a local command.
pub struct CommandProvider {
    id: String,
    program: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            id: "command".to_string(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<InvokeResponse> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        // kill_on_drop reaps the child when cancellation wins the race.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(EvalError::Cancelled),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvalError::Provider(format!(
                "command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        match serde_json::from_str::<CommandOutput>(stdout.trim()) {
            Ok(parsed) => {
                debug!(eval_id = %request.eval_id, "command emitted structured output");
                Ok(InvokeResponse {
                    text: parsed.text,
                    trace: parsed.trace,
                })
            }
            Err(_) => Ok(InvokeResponse::text(stdout.trim_end())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_provider_round_trip() {
        let provider = CommandProvider::new("sh").with_args(["-c", "cat"]);
        let response = provider
            .invoke(
                InvokeRequest::new("case-1", "echo me"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.text, "echo me");
        assert!(response.trace.is_none());
    }

    #[tokio::test]
    async fn test_command_provider_parses_structured_output() {
        let script = r#"cat > /dev/null; printf '{"text":"four","trace":{"events":1,"tool_counts":{"search":1},"calls":[{"name":"search","input":{}}]}}'"#;
        let provider = CommandProvider::new("sh").with_args(["-c", script]);
        let response = provider
            .invoke(
                InvokeRequest::new("case-1", "2+2?"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.text, "four");
        let trace = response.trace.unwrap();
        assert_eq!(trace.tool_counts["search"], 1);
    }

    #[tokio::test]
    async fn test_command_provider_nonzero_exit_is_provider_error() {
        let provider = CommandProvider::new("sh").with_args(["-c", "echo doom >&2; exit 3"]);
        let err = provider
            .invoke(
                InvokeRequest::new("case-1", "hi"),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            EvalError::Provider(message) => assert!(message.contains("doom")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
