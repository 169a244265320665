use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::supervisor::supervise;
use super::{RunOutcome, RunSpec, Sandbox, SandboxError, WORKSPACE_DIR};
use crate::config::SandboxConfig;

/// Exit status docker reports when the kernel OOM killer ended the container.
const OOM_EXIT_CODE: i32 = 137;

/// Runs each program in a throwaway container via the docker CLI.
///
/// The container has no network, a read-only root filesystem, a small tmpfs
/// at /tmp and the scratch directory mounted read-write at /workspace.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    docker_bin: String,
    cpus: f64,
    pids_limit: u32,
    tmpfs_mb: u32,
    max_output_bytes: usize,
}

impl DockerSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            cpus: config.cpus,
            pids_limit: config.pids_limit,
            tmpfs_mb: config.tmpfs_mb,
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn command(&self, name: &str, spec: &RunSpec) -> Command {
        let memory = format!("{}m", spec.memory_limit_mb);
        let mut command = Command::new(&self.docker_bin);
        command
            .arg("run")
            .arg("--rm")
            .arg("-i")
            .arg(format!("--name={name}"))
            .arg("--network=none")
            .arg("--read-only")
            .arg(format!("--tmpfs=/tmp:rw,exec,size={}m", self.tmpfs_mb))
            .arg(format!("--cpus={}", self.cpus))
            .arg(format!("--memory={memory}"))
            .arg(format!("--memory-swap={memory}"))
            .arg(format!("--pids-limit={}", self.pids_limit))
            .arg("--security-opt=no-new-privileges")
            .arg(format!(
                "--volume={}:{WORKSPACE_DIR}:rw",
                spec.workdir.to_string_lossy()
            ))
            .arg(format!("--workdir={WORKSPACE_DIR}"))
            .arg(&spec.image)
            .args(&spec.argv);
        command
    }

    async fn remove_container(&self, name: &str) {
        match Command::new(&self.docker_bin)
            .args(["rm", "-f", name])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!(container = name, "Removed timed out container");
            }
            Ok(output) => warn!(
                container = name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker rm -f failed"
            ),
            Err(e) => warn!(container = name, error = %e, "Failed to execute docker rm"),
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        if spec.argv.is_empty() {
            return Err(SandboxError::Launch("empty command line".into()));
        }

        let name = container_name();
        let run = supervise(
            self.command(&name, spec),
            &spec.stdin,
            spec.time_limit,
            self.max_output_bytes,
        )
        .await?;

        if run.timed_out {
            // Killing the client does not stop the container.
            self.remove_container(&name).await;
        }

        let exit_code = run.exit_code();
        // 125: docker itself failed, e.g. missing image or unreachable daemon.
        if matches!(exit_code, Some(125)) {
            return Err(SandboxError::Launch(run.stderr.trim().to_string()));
        }

        Ok(RunOutcome {
            exit_code,
            signal: run.signal(),
            oom_killed: !run.timed_out && exit_code == Some(OOM_EXIT_CODE),
            stdout: run.stdout,
            stderr: run.stderr,
            elapsed: run.elapsed,
            memory_kb: None,
            timed_out: run.timed_out,
            output_truncated: run.stdout_truncated,
        })
    }
}

/// Unique container name, so a timed out run can be removed by name.
fn container_name() -> String {
    format!("codejudge-{}", Uuid::new_v4().simple())
}
