//! # Claude CLI Backend
//!
//! Runs the `claude` executable in print mode with `--output-format
//! stream-json` and translates each JSON line on stdout into
//! [`AgentEvent`]s.
//!
//! The prompt goes over stdin; the system prompt is appended to the CLI's
//! own with `--append-system-prompt`.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{AgentEvent, AgentInvoker, EventStream, InvocationRequest};
use crate::error::InvokerError;

const STDERR_TAIL_BYTES: usize = 2048;

/// Agent backend that shells out to the Claude CLI
#[derive(Debug, Clone)]
pub struct ClaudeCliInvoker {
    binary: PathBuf,
}

impl Default for ClaudeCliInvoker {
    fn default() -> Self {
        Self::new("claude")
    }
}

/// Events decoded from one stdout line
#[derive(Debug, Default, PartialEq)]
pub struct ParsedLine {
    pub events: Vec<AgentEvent>,
    /// The line was the terminal `result` record
    pub is_result: bool,
}

impl ClaudeCliInvoker {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command-line arguments for a request
    pub fn build_args(request: &InvocationRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
            "--model".to_string(),
            request.model.api_id().to_string(),
            "--permission-mode".to_string(),
            request.permission_mode.cli_name().to_string(),
        ];

        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }

        if !request.system_prompt.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(request.system_prompt.clone());
        }

        args
    }

    /// Decode one line of stream-json output.
    ///
    /// Lines that are not JSON, or record types the core does not use,
    /// decode to no events.
    pub fn parse_line(line: &str) -> ParsedLine {
        let line = line.trim();
        if line.is_empty() {
            return ParsedLine::default();
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping non-JSON line from claude: {}", e);
                return ParsedLine::default();
            }
        };

        let mut parsed = ParsedLine::default();
        match record.get("type").and_then(|t| t.as_str()) {
            Some("assistant") => {
                let blocks = record
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_array());
                for block in blocks.into_iter().flatten() {
                    match block.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                parsed.events.push(AgentEvent::text(text));
                            }
                        }
                        Some("tool_use") => {
                            let name = block
                                .get("name")
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string();
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            parsed.events.push(AgentEvent::ToolInvocation { name, input });
                        }
                        _ => {}
                    }
                }
            }
            Some("result") => {
                parsed.is_result = true;
                if let Some(usage) = record.get("usage") {
                    let input_tokens = usage
                        .get("input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let output_tokens = usage
                        .get("output_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    parsed.events.push(AgentEvent::Usage {
                        input_tokens,
                        output_tokens,
                    });
                }
                if record.get("is_error").and_then(Value::as_bool) == Some(true) {
                    let message = record
                        .get("result")
                        .and_then(|r| r.as_str())
                        .or_else(|| record.get("subtype").and_then(|s| s.as_str()))
                        .unwrap_or("agent run ended with an error")
                        .to_string();
                    parsed.events.push(AgentEvent::Error { message });
                }
            }
            _ => {}
        }
        parsed
    }
}

fn stderr_tail(stderr: &str, max_bytes: usize) -> String {
    if stderr.len() <= max_bytes {
        stderr.trim().to_string()
    } else {
        let bytes = stderr.as_bytes();
        let start = bytes.len().saturating_sub(max_bytes);
        String::from_utf8_lossy(&bytes[start..]).trim().to_string()
    }
}

#[async_trait]
impl AgentInvoker for ClaudeCliInvoker {
    async fn invoke(&self, request: InvocationRequest) -> Result<EventStream, InvokerError> {
        let args = Self::build_args(&request);
        tracing::debug!(label = %request.label, binary = ?self.binary, "Spawning claude");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&request.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => InvokerError::Unavailable(format!(
                    "'{}' not found on PATH",
                    self.binary.display()
                )),
                _ => InvokerError::Process(format!("Failed to spawn claude: {}", e)),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| InvokerError::Process("claude stdin unavailable".into()))?;
        stdin
            .write_all(request.prompt.as_bytes())
            .await
            .map_err(|e| InvokerError::Process(format!("Failed to send prompt: {}", e)))?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokerError::Process("claude stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(64);
        let label = request.label.clone();

        tokio::spawn(async move {
            let stderr_task = tokio::spawn(async move {
                let mut buf = String::new();
                if let Some(mut stderr) = stderr {
                    let _ = stderr.read_to_string(&mut buf).await;
                }
                buf
            });

            let mut lines = BufReader::new(stdout).lines();
            let mut saw_result = false;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let parsed = Self::parse_line(&line);
                        saw_result |= parsed.is_result;
                        for event in parsed.events {
                            if tx.send(event).await.is_err() {
                                // Consumer went away
                                let _ = child.kill().await;
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(AgentEvent::Error {
                                message: format!("Failed to read claude output: {}", e),
                            })
                            .await;
                        break;
                    }
                }
            }

            let status = child.wait().await;
            let stderr = stderr_task.await.unwrap_or_default();
            match status {
                Ok(status) if !status.success() && !saw_result => {
                    tracing::warn!(label = %label, "claude exited with {}", status);
                    let _ = tx
                        .send(AgentEvent::Error {
                            message: format!(
                                "claude exited with {}: {}",
                                status,
                                stderr_tail(&stderr, STDERR_TAIL_BYTES)
                            ),
                        })
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = tx
                        .send(AgentEvent::Error {
                            message: format!("Failed to wait for claude: {}", e),
                        })
                        .await;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{InvocationKind, PermissionMode, ANALYSIS_TOOLS};
    use crate::models::ClaudeModel;

    #[test]
    fn test_build_args() {
        let request = InvocationRequest::new("architecture", InvocationKind::Architecture)
            .with_prompts("system".into(), "prompt".into())
            .with_tools(ANALYSIS_TOOLS, PermissionMode::BypassPermissions)
            .with_budget(200, ClaudeModel::Claude4Sonnet);

        let args = ClaudeCliInvoker::build_args(&request);
        let joined = args.join(" ");
        assert!(joined.contains("--output-format stream-json"));
        assert!(joined.contains("--max-turns 200"));
        assert!(joined.contains("--permission-mode bypassPermissions"));
        assert!(joined.contains("--allowedTools Read,Glob,LS,Grep,Write"));
        assert!(joined.contains("--model claude-sonnet-4-20250514"));
        assert_eq!(args.last().map(String::as_str), Some("system"));
    }

    #[test]
    fn test_parse_assistant_blocks() {
        let line = r#"{"type":"assistant","message":{"content":[
            {"type":"text","text":"Exploring"},
            {"type":"tool_use","id":"t1","name":"Write","input":{"file_path":"/o/a.md","content":"x"}}
        ]}}"#
            .replace('\n', "");
        let parsed = ClaudeCliInvoker::parse_line(&line);
        assert!(!parsed.is_result);
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.events[0], AgentEvent::text("Exploring"));
        assert_eq!(parsed.events[1].written_path(), Some("/o/a.md"));
    }

    #[test]
    fn test_parse_result_with_error() {
        let line = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"usage":{"input_tokens":120,"output_tokens":30}}"#;
        let parsed = ClaudeCliInvoker::parse_line(line);
        assert!(parsed.is_result);
        assert_eq!(
            parsed.events,
            vec![
                AgentEvent::Usage {
                    input_tokens: 120,
                    output_tokens: 30
                },
                AgentEvent::Error {
                    message: "error_max_turns".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert_eq!(ClaudeCliInvoker::parse_line(""), ParsedLine::default());
        assert_eq!(
            ClaudeCliInvoker::parse_line("not json"),
            ParsedLine::default()
        );
        let init = r#"{"type":"system","subtype":"init","tools":[]}"#;
        assert!(ClaudeCliInvoker::parse_line(init).events.is_empty());
    }

    #[test]
    fn test_stderr_tail() {
        let long = "x".repeat(10) + "tail";
        assert_eq!(stderr_tail(&long, 4), "tail");
        assert_eq!(stderr_tail(" short \n", 100), "short");
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let invoker = ClaudeCliInvoker::new("/definitely/not/a/claude-binary");
        let dir = tempfile::tempdir().unwrap();
        let request = InvocationRequest::new("x", InvocationKind::Component)
            .with_dirs(dir.path().to_path_buf(), dir.path().to_path_buf());
        match invoker.invoke(request).await {
            Err(e) => assert!(e.is_fatal()),
            Ok(_) => panic!("expected spawn failure"),
        }
    }
}
