//! External agent bridge: runs a delegated task in a separate process.
//!
//! Protocol: JSON lines over stdio. The parent writes one config line
//! `{"prompt", "task_id", "config"}`, then reads events from the child:
//!
//! - `{"type":"progress","message","iter"}`
//! - `{"type":"tool","tool_name","summary","files","iter"}`
//! - `{"type":"permission_request","request_id","tool_name","summary"}`
//! - `{"type":"result","answer","tokens","iters","is_error"}`
//! - `{"type":"error","message"}`
//!
//! Permission requests are answered with
//! `{"type":"permission_response","request_id","approved","message"}`.
//! Lines that do not parse are skipped.

use super::manager::{BackgroundExecutor, TaskHandle, UnitReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use taskloop_core::{DispatchRequest, Error, ExecutionContext, InputKind, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Progress {
        #[serde(default)]
        message: String,
        #[serde(default)]
        iter: usize,
    },
    Tool {
        tool_name: String,
        #[serde(default)]
        summary: String,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        iter: usize,
    },
    PermissionRequest {
        request_id: String,
        #[serde(default)]
        tool_name: String,
        #[serde(default)]
        summary: String,
    },
    Result {
        #[serde(default)]
        answer: String,
        #[serde(default)]
        tokens: u64,
        #[serde(default)]
        iters: usize,
        #[serde(default)]
        is_error: bool,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct BridgeConfigLine<'a> {
    prompt: &'a str,
    task_id: &'a str,
    config: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeReply<'a> {
    PermissionResponse {
        request_id: &'a str,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a str>,
    },
}

/// Parse one line from the child. `None` for anything that is not a known message.
pub fn parse_line(line: &str) -> Option<BridgeMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Spawns `program args...` per task and speaks the bridge protocol with it.
#[derive(Debug, Clone)]
pub struct BridgeExecutor {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl BridgeExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

#[async_trait::async_trait]
impl BackgroundExecutor for BridgeExecutor {
    async fn run(
        &self,
        ctx: ExecutionContext,
        request: DispatchRequest,
        handle: TaskHandle,
    ) -> Result<UnitReport> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Background(format!("failed to start `{}`: {}", self.program, e)))?;
        info!(task_id = %request.task_id, program = %self.program, "bridge process started");

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Background("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Background("bridge stdout unavailable".into()))?;

        let config = serde_json::to_string(&BridgeConfigLine {
            prompt: &request.prompt,
            task_id: &request.task_id,
            config: &request.config,
        })?;
        write_line(&mut stdin, &config).await?;

        let mut lines = BufReader::new(stdout).lines();
        let mut report: Option<UnitReport> = None;
        let mut failure: Option<String> = None;
        let mut tool_events = 0usize;

        loop {
            let line = tokio::select! {
                biased;
                _ = ctx.done() => {
                    warn!(task_id = %request.task_id, "bridge cancelled, killing process");
                    let _ = child.kill().await;
                    return Err(Error::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let Some(message) = parse_line(&line) else {
                debug!(task_id = %request.task_id, "skipping unparseable bridge line");
                continue;
            };

            match message {
                BridgeMessage::Progress { message, iter } => {
                    handle.progress(format!("[{}] {}", iter, message));
                }
                BridgeMessage::Tool {
                    tool_name,
                    summary,
                    files,
                    iter,
                } => {
                    tool_events += 1;
                    let files = if files.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", files.join(", "))
                    };
                    handle.progress(format!("[{}] {}: {}{}", iter, tool_name, summary, files));
                }
                BridgeMessage::PermissionRequest {
                    request_id,
                    tool_name,
                    summary,
                } => {
                    let tool = (!tool_name.is_empty()).then(|| tool_name.clone());
                    let response = handle
                        .request_input(
                            &ctx,
                            InputKind::Permission,
                            summary,
                            tool,
                            Some(request_id.clone()),
                        )
                        .await;
                    let reply = serde_json::to_string(&BridgeReply::PermissionResponse {
                        request_id: &request_id,
                        approved: response.approved,
                        message: response.message.as_deref(),
                    })?;
                    if let Err(e) = write_line(&mut stdin, &reply).await {
                        warn!(task_id = %request.task_id, "failed to answer permission request: {}", e);
                    }
                }
                BridgeMessage::Result {
                    answer,
                    tokens,
                    iters,
                    is_error,
                } => {
                    report = Some(UnitReport {
                        error: is_error.then(|| answer.clone()),
                        answer,
                        tokens,
                        iterations: iters,
                        tool_calls: tool_events,
                    });
                }
                BridgeMessage::Error { message } => {
                    failure = Some(message);
                }
            }
        }

        drop(stdin);
        let status = child.wait().await?;
        debug!(task_id = %request.task_id, %status, tool_events, "bridge process exited");

        match (report, failure) {
            (Some(report), _) => Ok(report),
            (None, Some(message)) => Ok(UnitReport {
                error: Some(message),
                tool_calls: tool_events,
                ..Default::default()
            }),
            (None, None) => Err(Error::Background(format!(
                "bridge exited without a result ({})",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_messages_and_skips_noise() {
        assert_eq!(
            parse_line(r#"{"type":"progress","message":"reading","iter":2}"#),
            Some(BridgeMessage::Progress {
                message: "reading".into(),
                iter: 2
            })
        );
        assert!(matches!(
            parse_line(r#"{"type":"permission_request","request_id":"p1","tool_name":"shell","summary":"rm"}"#),
            Some(BridgeMessage::PermissionRequest { .. })
        ));
        assert!(parse_line("starting up...").is_none());
        assert!(parse_line(r#"{"type":"mystery"}"#).is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn permission_response_shape() {
        let line = serde_json::to_string(&BridgeReply::PermissionResponse {
            request_id: "p1",
            approved: false,
            message: Some("timed out"),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "permission_response");
        assert_eq!(value["approved"], false);
        assert_eq!(value["request_id"], "p1");
    }
}
