// ABOUTME: Runs one encoded request on one host and turns the outcome into a HostResult.
// ABOUTME: Transport failures, timeouts, and malformed output all become failed results, never errors.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::protocol::{RemoteField, RemoteResponse, ResultKind};

const STDERR_LOG_LIMIT: usize = 500;

/// Outcome of one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResult {
    pub host: String,
    pub outcome: HostOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOutcome {
    Ok { credential: Vec<RemoteField> },
    Failed { log_msg: String },
}

impl HostResult {
    pub fn ok(host: impl Into<String>, credential: Vec<RemoteField>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Ok { credential },
        }
    }

    pub fn failed(host: impl Into<String>, log_msg: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Failed {
                log_msg: log_msg.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, HostOutcome::Ok { .. })
    }

    /// Interpret the remote handler's stdout.
    pub fn from_stdout(host: &str, stdout: &[u8]) -> Self {
        match serde_json::from_slice::<RemoteResponse>(stdout) {
            Ok(RemoteResponse {
                result: ResultKind::Ok,
                credential,
                ..
            }) => Self::ok(host, credential),
            Ok(RemoteResponse {
                result: ResultKind::Error,
                log_msg,
                ..
            }) => Self::failed(
                host,
                log_msg.unwrap_or_else(|| "remote reported an error without a log message".to_string()),
            ),
            Err(e) => Self::failed(
                host,
                format!(
                    "malformed response from {host}: {e}; output was '{}'",
                    truncate_for_log(&String::from_utf8_lossy(stdout))
                ),
            ),
        }
    }
}

/// Executes an encoded request against a single host.
///
/// Implementations never fail: every problem is reported as a failed
/// `HostResult` whose message names the host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, host: &str, encoded_request: &str) -> HostResult;
}

/// Configuration for the system ssh executor
#[derive(Debug, Clone)]
pub struct SshExecutorConfig {
    /// Path to the ssh binary (defaults to "ssh")
    pub binary: String,
    /// Identity file passed with `-i`
    pub identity: Option<PathBuf>,
    /// Extra `-o` options
    pub options: Vec<String>,
    /// Login user; empty means ssh's default
    pub remote_user: String,
    /// Command run remotely, followed by the encoded request
    pub remote_command: String,
    pub connect_timeout_secs: u64,
    /// Whole-call timeout; the ssh process is killed when it elapses
    pub timeout: Duration,
}

impl Default for SshExecutorConfig {
    fn default() -> Self {
        Self {
            binary: "ssh".to_string(),
            identity: None,
            options: Vec::new(),
            remote_user: String::new(),
            remote_command: String::new(),
            connect_timeout_secs: 15,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Reaches hosts through the system ssh client in batch mode.
pub struct SshExecutor {
    config: SshExecutorConfig,
}

impl SshExecutor {
    pub fn new(config: SshExecutorConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, host: &str, encoded_request: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref identity) = self.config.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push("-o".to_string());
        args.push(format!("ConnectTimeout={}", self.config.connect_timeout_secs));
        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        // A host_list entry must never be read as an ssh option
        args.push("--".to_string());
        if self.config.remote_user.is_empty() {
            args.push(host.to_string());
        } else {
            args.push(format!("{}@{}", self.config.remote_user, host));
        }

        let command = self.config.remote_command.trim();
        if command.is_empty() {
            args.push(encoded_request.to_string());
        } else {
            args.push(format!("{command} {encoded_request}"));
        }
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &str, encoded_request: &str) -> HostResult {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.build_args(host, encoded_request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return HostResult::failed(
                    host,
                    format!("failed to launch {} for {host}: {e}", self.config.binary),
                )
            }
        };

        tracing::debug!(host = %host, pid = ?child.id(), "Remote call started");

        // Dropping the child on timeout kills it (kill_on_drop)
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return HostResult::failed(host, format!("failed to collect output from {host}: {e}"))
            }
            Err(_) => {
                return HostResult::failed(
                    host,
                    format!(
                        "{host} did not answer within {} seconds",
                        self.config.timeout.as_secs_f64()
                    ),
                )
            }
        };

        if !output.status.success() {
            return HostResult::failed(
                host,
                format!(
                    "remote execution on {host} failed with {}: {}",
                    output.status,
                    truncate_for_log(String::from_utf8_lossy(&output.stderr).trim())
                ),
            );
        }

        HostResult::from_stdout(host, &output.stdout)
    }
}

fn truncate_for_log(value: &str) -> String {
    if value.len() <= STDERR_LOG_LIMIT {
        value.to_string()
    } else {
        let mut end = STDERR_LOG_LIMIT;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...(truncated)", &value[..end])
    }
}
