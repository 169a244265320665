pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod redis_queue;

pub use config::QueueConfig;
pub use error::MqError;
pub use memory::MemoryQueue;
pub use models::{Delivery, JobId, JobQueue, JobRecord, JobState, QueueStats};
pub use redis_queue::RedisQueue;
