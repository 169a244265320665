use std::time::Duration;

use common::MqAppConfig;
use common::retry::RetryPolicy;

/// Backend-independent queue behaviour.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    /// How long a delivery stays owned before `requeue_expired` reclaims it.
    pub visibility_timeout: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig::from(&MqAppConfig::default())
    }
}

impl From<&MqAppConfig> for QueueConfig {
    fn from(config: &MqAppConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_secs),
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }
}
