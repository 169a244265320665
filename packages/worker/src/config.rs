use std::path::PathBuf;
use std::time::Duration;

use common::Language;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::MqAppConfig;

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Prefix for worker task names in logs. Default: "worker".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Number of concurrent grading workers. Default: 2.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Longest single wait on the queue before re-checking for shutdown. Default: 5.
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// How often expired leases are reclaimed. Default: 30.
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
}

fn default_worker_id() -> String {
    "worker".into()
}
fn default_concurrency() -> usize {
    2
}
fn default_poll_timeout_secs() -> u64 {
    5
}
fn default_reclaim_interval_secs() -> u64 {
    30
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            concurrency: default_concurrency(),
            poll_timeout_secs: default_poll_timeout_secs(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
        }
    }
}

/// Which isolation mechanism runs untrusted code.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    #[default]
    Docker,
    Isolate,
    /// Plain host processes with rlimits. Development only.
    Process,
}

/// Container image per language, used by the docker backend.
#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_python_image")]
    pub python: String,
    #[serde(default = "default_javascript_image")]
    pub javascript: String,
    #[serde(default = "default_cpp_image")]
    pub cpp: String,
    #[serde(default = "default_java_image")]
    pub java: String,
}

fn default_python_image() -> String {
    "python:3.12-slim".into()
}
fn default_javascript_image() -> String {
    "node:20-slim".into()
}
fn default_cpp_image() -> String {
    "gcc:13".into()
}
fn default_java_image() -> String {
    "eclipse-temurin:21-jdk".into()
}

impl ImageConfig {
    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::Javascript => &self.javascript,
            Language::Cpp => &self.cpp,
            Language::Java => &self.java,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: default_python_image(),
            javascript: default_javascript_image(),
            cpp: default_cpp_image(),
            java: default_java_image(),
        }
    }
}

/// Sandbox configuration shared by every backend.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: SandboxBackend,
    /// Docker CLI path. Default: "docker".
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Isolate executable path. Default: "isolate".
    #[serde(default = "default_isolate_bin")]
    pub isolate_bin: String,
    /// First isolate box id handed out. Default: 0.
    #[serde(default)]
    pub isolate_first_box: u32,
    /// Number of isolate boxes, and so of concurrent isolate runs. Default: 16.
    #[serde(default = "default_isolate_boxes")]
    pub isolate_boxes: u32,
    /// CPU share per run. Default: 1.0.
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    /// Process/thread cap per run. Default: 64.
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
    /// Size of the writable /tmp inside the sandbox in MB. Default: 64.
    #[serde(default = "default_tmpfs_mb")]
    pub tmpfs_mb: u32,
    /// Captured bytes per output stream; the rest is discarded. Default: 1 MiB.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Wall-clock budget for compiling. Default: 30000.
    #[serde(default = "default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,
    /// Memory ceiling for compiling in MB. Default: 1024.
    #[serde(default = "default_compile_memory_mb")]
    pub compile_memory_mb: u32,
    /// Parent directory for per-case scratch directories. Default: system temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    #[serde(default)]
    pub images: ImageConfig,
}

fn default_docker_bin() -> String {
    "docker".into()
}
fn default_isolate_bin() -> String {
    "isolate".into()
}
fn default_isolate_boxes() -> u32 {
    16
}
fn default_cpus() -> f64 {
    1.0
}
fn default_pids_limit() -> u32 {
    64
}
fn default_tmpfs_mb() -> u32 {
    64
}
fn default_max_output_bytes() -> usize {
    1024 * 1024
}
fn default_compile_timeout_ms() -> u64 {
    30_000
}
fn default_compile_memory_mb() -> u32 {
    1024
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            docker_bin: default_docker_bin(),
            isolate_bin: default_isolate_bin(),
            isolate_first_box: 0,
            isolate_boxes: default_isolate_boxes(),
            cpus: default_cpus(),
            pids_limit: default_pids_limit(),
            tmpfs_mb: default_tmpfs_mb(),
            max_output_bytes: default_max_output_bytes(),
            compile_timeout_ms: default_compile_timeout_ms(),
            compile_memory_mb: default_compile_memory_mb(),
            scratch_root: None,
            images: ImageConfig::default(),
        }
    }
}

/// Periodic recovery of submissions that lost their job.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconcileConfig {
    /// Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// Default: 60.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// QUEUED submissions older than this with no live job are re-enqueued. Default: 300.
    #[serde(default = "default_queued_timeout_secs")]
    pub queued_timeout_secs: u64,
    /// RUNNING submissions older than this with no live job are reset. Default: 900.
    #[serde(default = "default_running_timeout_secs")]
    pub running_timeout_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    60
}
fn default_queued_timeout_secs() -> u64 {
    300
}
fn default_running_timeout_secs() -> u64 {
    900
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_reconcile_interval_secs(),
            queued_timeout_secs: default_queued_timeout_secs(),
            running_timeout_secs: default_running_timeout_secs(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub mq: MqAppConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CODEJUDGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", "worker")?
            .set_default("worker.concurrency", 2_i64)?
            .set_default("mq.url", "redis://localhost:6379")?
            .set_default("mq.namespace", "codejudge")?
            .set_default("mq.queue_name", "submissions")?
            .set_default("sandbox.backend", "docker")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("CODEJUDGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
