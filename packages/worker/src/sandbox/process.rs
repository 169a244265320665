use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use super::supervisor::supervise;
use super::{RunOutcome, RunSpec, Sandbox, SandboxError};
use crate::config::SandboxConfig;

const HOST_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Host processes capped with rlimits.
///
/// There is no filesystem or network isolation, so this backend is only fit
/// for development machines and tests.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    max_output_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        warn!("Process sandbox selected: submissions run unisolated on the host");
        Self {
            max_output_bytes: config.max_output_bytes,
        }
    }

    fn command(&self, spec: &RunSpec) -> Command {
        let mut command = Command::new(&spec.argv[0]);
        command
            .args(&spec.argv[1..])
            .current_dir(&spec.workdir)
            .env_clear()
            .env("PATH", HOST_PATH)
            .env("HOME", &spec.workdir);

        let memory_bytes = u64::from(spec.memory_limit_mb) * 1024 * 1024;
        // CPU seconds, rounded up, as a backstop behind the wall-clock deadline.
        let cpu_secs = spec.time_limit.as_secs() + 1;
        unsafe {
            command.pre_exec(move || {
                set_rlimit(libc::RLIMIT_AS, memory_bytes)?;
                set_rlimit(libc::RLIMIT_CPU, cpu_secs)?;
                set_rlimit(libc::RLIMIT_CORE, 0)?;
                Ok(())
            });
        }
        command
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError> {
        if spec.argv.is_empty() {
            return Err(SandboxError::Launch("empty command line".into()));
        }

        let run = supervise(
            self.command(spec),
            &spec.stdin,
            spec.time_limit,
            self.max_output_bytes,
        )
        .await?;

        Ok(RunOutcome {
            exit_code: run.exit_code(),
            signal: run.signal(),
            stdout: run.stdout,
            stderr: run.stderr,
            elapsed: run.elapsed,
            memory_kb: None,
            timed_out: run.timed_out,
            oom_killed: false,
            output_truncated: run.stdout_truncated,
        })
    }
}
