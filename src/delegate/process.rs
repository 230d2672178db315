//! Shell-command adapters for workers and validators.
//!
//! The command runs under `sh -c` in the project directory. The JSON request
//! is written to stdin and the JSON response is read from stdout; anything
//! printed around the JSON object is ignored. On cancellation the process
//! receives SIGTERM and is given a short grace period to exit.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use phasegate_common::{ValidationRequest, ValidationResponse, Validator, Worker, WorkerRequest, WorkerResponse};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::util::extract_json_object;

const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const STDERR_TAIL: usize = 400;

/// Run `command` with `input` on stdin and return its stdout.
async fn run_json_command(
    command: &str,
    working_dir: &Path,
    env: &[(&str, String)],
    input: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn command: {}", command))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A command that ignores its input may close stdin early.
        if let Err(e) = stdin.write_all(input.as_bytes()).await {
            debug!(command, error = %e, "command did not read its input");
        }
    }

    let mut stdout = child.stdout.take().context("Command stdout was not captured")?;
    let mut stderr = child.stderr.take().context("Command stderr was not captured")?;
    let pid = child.id();

    let run = async {
        let mut out = String::new();
        let mut err = String::new();
        let (read_out, read_err, status) = tokio::join!(
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut err),
            child.wait()
        );
        read_out.context("Failed to read command stdout")?;
        read_err.context("Failed to read command stderr")?;
        let status = status.context("Failed to wait for command")?;
        Ok::<_, anyhow::Error>((status, out, err))
    };

    let finished = tokio::select! {
        res = run => Some(res?),
        _ = cancel.cancelled() => None,
    };
    let Some((status, out, err)) = finished else {
        if let Some(pid) = pid {
            terminate(pid).await;
        }
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
            warn!(command, "process ignored SIGTERM; killing");
        }
        bail!("Command cancelled: {}", command);
    };

    if !status.success() {
        let tail: String = err.chars().rev().take(STDERR_TAIL).collect::<Vec<_>>().into_iter().rev().collect();
        bail!(
            "Command exited with {}: {}{}",
            status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
            command,
            if tail.trim().is_empty() { String::new() } else { format!("\n{}", tail.trim()) }
        );
    }
    Ok(out)
}

/// Ask the process to stop, without forcing it.
async fn terminate(pid: u32) {
    let signal = Command::new("kill").arg("-TERM").arg(pid.to_string()).status();
    match tokio::time::timeout(TERMINATE_GRACE, signal).await {
        Ok(Ok(status)) if status.success() => debug!(pid, "sent SIGTERM"),
        Ok(Ok(_)) => debug!(pid, "process already exited"),
        Ok(Err(e)) => warn!(pid, error = %e, "failed to signal process"),
        Err(_) => warn!(pid, "timed out signalling process"),
    }
}

fn parse_stdout(stdout: &str) -> Result<serde_json::Value> {
    let json = extract_json_object(stdout).context("Command printed no JSON object")?;
    serde_json::from_str(json).context("Command printed malformed JSON")
}

/// A worker role backed by a shell command.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    role: String,
    command: String,
    working_dir: PathBuf,
}

impl ProcessWorker {
    pub fn new(role: impl Into<String>, command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: role.into(),
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn execute(&self, request: WorkerRequest, cancel: CancellationToken) -> Result<WorkerResponse> {
        let input = serde_json::to_string(&request).context("Failed to serialize worker request")?;
        let env = [
            ("PHASEGATE_ROLE", self.role.clone()),
            ("PHASEGATE_TASK_ID", request.task_id.to_string()),
            ("PHASEGATE_TASK_TYPE", request.task_type.clone()),
        ];
        let stdout = run_json_command(&self.command, &self.working_dir, &env, &input, &cancel).await?;

        let mut value = parse_stdout(&stdout)?;
        // Commands may omit the task id; it is implied by the request.
        if let Some(obj) = value.as_object_mut() {
            obj.entry("task_id")
                .or_insert_with(|| serde_json::Value::String(request.task_id.to_string()));
        }
        serde_json::from_value(value).context("Worker response does not match the dispatch contract")
    }
}

/// A validator role backed by a shell command.
#[derive(Debug, Clone)]
pub struct ProcessValidator {
    role: String,
    command: String,
    working_dir: PathBuf,
}

impl ProcessValidator {
    pub fn new(role: impl Into<String>, command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: role.into(),
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Validator for ProcessValidator {
    async fn evaluate(&self, request: ValidationRequest) -> Result<ValidationResponse> {
        let input = serde_json::to_string(&request).context("Failed to serialize validation request")?;
        let env = [
            ("PHASEGATE_ROLE", self.role.clone()),
            ("PHASEGATE_GATE", request.gate.clone()),
            ("PHASEGATE_PHASE", request.work_product.phase.to_string()),
        ];
        let stdout = run_json_command(
            &self.command,
            &self.working_dir,
            &env,
            &input,
            &CancellationToken::new(),
        )
        .await?;
        let value = parse_stdout(&stdout)?;
        serde_json::from_value(value).context("Validator response does not match the validator contract")
    }
}
