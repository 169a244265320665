use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

use super::supervisor::supervise;
use super::{RunOutcome, RunSpec, Sandbox, SandboxError, WORKSPACE_DIR};
use crate::config::SandboxConfig;

/// Slack on top of isolate's own wall-time limit before the client is killed.
const CLIENT_GRACE: Duration = Duration::from_secs(2);

const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Runs programs in isolate(1) boxes, one box per concurrent run.
pub struct IsolateSandbox {
    isolate_bin: String,
    pids_limit: u32,
    max_output_bytes: usize,
    boxes: Mutex<VecDeque<u32>>,
    available: Arc<Semaphore>,
}

/// Fields of isolate's meta file that grading needs.
#[derive(Debug, Default, PartialEq)]
struct Meta {
    status: Option<String>,
    exit_code: Option<i32>,
    signal: Option<i32>,
    wall_time: Option<f64>,
    memory_kb: Option<u64>,
    oom_killed: bool,
    message: Option<String>,
}

fn parse_meta(content: &str) -> Meta {
    let mut raw = HashMap::<&str, &str>::new();
    let mut oom_killed = false;

    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            raw.insert(key.trim(), value.trim());
            if key.trim() == "cg-oom-killed" {
                oom_killed = true;
            }
        } else if line.trim() == "cg-oom-killed" {
            oom_killed = true;
        }
    }

    Meta {
        status: raw.get("status").map(|v| v.to_string()),
        exit_code: raw.get("exitcode").and_then(|v| v.parse().ok()),
        signal: raw.get("exitsig").and_then(|v| v.parse().ok()),
        wall_time: raw.get("time-wall").and_then(|v| v.parse().ok()),
        memory_kb: raw
            .get("cg-mem")
            .or(raw.get("max-rss"))
            .and_then(|v| v.parse().ok()),
        oom_killed,
        message: raw.get("message").map(|v| v.to_string()),
    }
}

/// A meta file private to one run, removed on drop.
///
/// Kept outside the scratch directory, which the sandboxed program can write.
fn meta_file() -> std::io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new()
        .prefix("codejudge-isolate-")
        .suffix(".meta")
        .tempfile()
}

impl IsolateSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        let count = config.isolate_boxes.max(1);
        let boxes = (config.isolate_first_box..config.isolate_first_box + count).collect();
        Self {
            isolate_bin: config.isolate_bin.clone(),
            pids_limit: config.pids_limit,
            max_output_bytes: config.max_output_bytes,
            boxes: Mutex::new(boxes),
            available: Arc::new(Semaphore::new(count as usize)),
        }
    }

    async fn init_box(&self, box_id: u32) -> Result<PathBuf, SandboxError> {
        let output = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={box_id}"))
            .arg("--cg")
            .arg("--init")
            .output()
            .await
            .map_err(|err| {
                SandboxError::Launch(format!("failed to execute isolate --init: {err}"))
            })?;

        if !output.status.success() {
            return Err(SandboxError::Launch(format!(
                "isolate --init failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let path_text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if path_text.is_empty() {
            return Err(SandboxError::Launch(
                "isolate --init did not return sandbox path".to_string(),
            ));
        }
        Ok(PathBuf::from(path_text))
    }

    async fn cleanup_box(&self, box_id: u32) {
        let result = Command::new(&self.isolate_bin)
            .arg(format!("--box-id={box_id}"))
            .arg("--cg")
            .arg("--cleanup")
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                box_id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "isolate --cleanup failed"
            ),
            Err(e) => warn!(box_id, error = %e, "Failed to execute isolate --cleanup"),
        }
    }

    fn run_command(&self, box_id: u32, meta_path: &Path, spec: &RunSpec) -> Command {
        let seconds = spec.time_limit.as_secs_f64();
        let mut command = Command::new(&self.isolate_bin);
        command
            .arg(format!("--box-id={box_id}"))
            .arg("--cg")
            .arg(format!("--meta={}", meta_path.to_string_lossy()))
            .arg(format!("--wall-time={seconds:.3}"))
            .arg(format!("--time={seconds:.3}"))
            .arg(format!("--cg-mem={}", u64::from(spec.memory_limit_mb) * 1024))
            .arg(format!("--processes={}", self.pids_limit))
            .arg(format!(
                "--dir={WORKSPACE_DIR}={}:rw",
                spec.workdir.to_string_lossy()
            ))
            .arg(format!("--chdir={WORKSPACE_DIR}"))
            .arg(format!("--env=PATH={SANDBOX_PATH}"))
            .arg("--env=HOME=/tmp")
            .arg("--run")
            .arg("--")
            .args(&spec.argv);
        command
    }

    async fn run_in_box(&self, box_id: u32, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        self.init_box(box_id).await?;

        let meta_out = meta_file()?;
        let run = supervise(
            self.run_command(box_id, meta_out.path(), spec),
            &spec.stdin,
            spec.time_limit + CLIENT_GRACE,
            self.max_output_bytes,
        )
        .await?;

        if run.timed_out {
            return Ok(RunOutcome {
                elapsed: spec.time_limit,
                timed_out: true,
                ..RunOutcome::default()
            });
        }

        // 0: program exited cleanly, 1: program failed; anything else is isolate's own error.
        match run.exit_code() {
            Some(0) | Some(1) => {}
            _ => {
                return Err(SandboxError::Internal(format!(
                    "isolate internal error: {}",
                    run.stderr.trim()
                )));
            }
        }

        let content = fs::read_to_string(meta_out.path()).await?;
        let meta = parse_meta(&content);

        let timed_out = meta.status.as_deref() == Some("TO");
        let mut stderr = run.stderr;
        if let (Some("XX"), Some(message)) = (meta.status.as_deref(), &meta.message) {
            stderr.push_str(message);
        }

        Ok(RunOutcome {
            exit_code: if meta.signal.is_some() {
                None
            } else {
                Some(meta.exit_code.unwrap_or(0))
            },
            signal: meta.signal,
            stdout: run.stdout,
            stderr,
            elapsed: meta
                .wall_time
                .map(Duration::from_secs_f64)
                .unwrap_or(run.elapsed),
            memory_kb: meta.memory_kb,
            timed_out,
            oom_killed: meta.oom_killed,
            output_truncated: run.stdout_truncated,
        })
    }
}

#[async_trait]
impl Sandbox for IsolateSandbox {
    fn name(&self) -> &'static str {
        "isolate"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        if spec.argv.is_empty() {
            return Err(SandboxError::Launch(
                "isolate --run requires at least one program argument".to_string(),
            ));
        }

        let _permit = self
            .available
            .acquire()
            .await
            .map_err(|e| SandboxError::Internal(e.to_string()))?;
        let box_id = self
            .boxes
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| SandboxError::Internal("no free isolate box".to_string()))?;

        let outcome = self.run_in_box(box_id, spec).await;
        self.cleanup_box(box_id).await;
        self.boxes.lock().await.push_back(box_id);
        outcome
    }
}
