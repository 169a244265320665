use serde::Deserialize;

use crate::retry::RetryPolicy;

/// App-level queue configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Key prefix for every queue key. Default: "codejudge".
    #[serde(default = "default_mq_namespace")]
    pub namespace: String,
    /// Queue carrying submission grading jobs. Default: "submissions".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
    /// Total deliveries per job, including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base in milliseconds. Default: 2000.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds. Default: 60000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How long a delivered job stays owned before it is handed out again. Default: 300.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Completed job records kept for inspection. Default: 10.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,
    /// Failed job records kept for inspection and manual retry. Default: 1000.
    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_namespace() -> String {
    "codejudge".into()
}
fn default_mq_queue_name() -> String {
    "submissions".into()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_visibility_timeout_secs() -> u64 {
    300
}
fn default_keep_completed() -> usize {
    10
}
fn default_keep_failed() -> usize {
    1000
}

impl MqAppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            namespace: default_mq_namespace(),
            queue_name: default_mq_queue_name(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        }
    }
}
