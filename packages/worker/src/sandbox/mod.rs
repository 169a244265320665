pub mod docker;
pub mod error;
pub mod isolate;
pub mod process;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use docker::DockerSandbox;
pub use error::SandboxError;
pub use isolate::IsolateSandbox;
pub use process::ProcessSandbox;

use crate::config::{SandboxBackend, SandboxConfig};

/// Directory the scratch area is mounted at inside container-style sandboxes.
pub const WORKSPACE_DIR: &str = "/workspace";

/// One program invocation inside a sandbox.
#[derive(Debug, Clone)]
pub struct RunSpec {
    /// Host scratch directory, the program's working directory.
    pub workdir: PathBuf,
    /// Container image or toolchain hint. Ignored by backends without images.
    pub image: String,
    pub argv: Vec<String>,
    pub stdin: String,
    /// Wall-clock deadline.
    pub time_limit: Duration,
    pub memory_limit_mb: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// Peak memory when the backend can measure it.
    pub memory_kb: Option<u64>,
    pub timed_out: bool,
    pub oom_killed: bool,
    /// Stdout hit the capture limit, so `stdout` is only a prefix.
    pub output_truncated: bool,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.oom_killed && self.exit_code == Some(0)
    }

    /// Short description of why the program did not exit cleanly.
    pub fn failure_summary(&self) -> String {
        match (self.exit_code, self.signal) {
            (_, Some(signal)) => format!("Killed by signal {signal}"),
            (Some(code), None) => format!("Exited with code {code}"),
            (None, None) => "Exited abnormally".to_string(),
        }
    }
}

/// Isolated, resource-capped execution of a single program.
///
/// Implementations must enforce `time_limit` as a hard deadline, kill the
/// whole process tree on expiry, and never leave the program running once
/// `run` returns.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, spec: &RunSpec) -> Result<RunOutcome, SandboxError>;
}

/// Build the backend selected in config.
pub fn from_config(config: &SandboxConfig) -> Arc<dyn Sandbox> {
    match config.backend {
        SandboxBackend::Docker => Arc::new(DockerSandbox::new(config)),
        SandboxBackend::Isolate => Arc::new(IsolateSandbox::new(config)),
        SandboxBackend::Process => Arc::new(ProcessSandbox::new(config)),
    }
}
