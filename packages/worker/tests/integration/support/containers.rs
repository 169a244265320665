use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use redis::aio::MultiplexedConnection;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

/// Redis container shared across all tests in this binary.
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

/// Monotonic counter for unique key namespaces.
static NAMESPACE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Container ID for atexit cleanup.
static CONTAINER_ID: OnceLock<String> = OnceLock::new();

extern "C" fn cleanup_container() {
    if let Some(id) = CONTAINER_ID.get() {
        let _ = std::process::Command::new("docker")
            .args(["rm", "-f", "-v", id])
            .output();
    }
}

async fn redis_port() -> u16 {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .with_tag("7.2-alpine")
                .start()
                .await
                .expect("Failed to start Redis container");
            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("Failed to get Redis port");

            let _ = CONTAINER_ID.set(container.id().to_string());
            // Statics are never dropped, so remove the container on normal exit.
            unsafe { libc::atexit(cleanup_container) };

            (container, port)
        })
        .await;
    *port
}

/// A connection to the shared Redis plus a namespace no other test uses.
pub async fn redis_namespace() -> (MultiplexedConnection, String) {
    let url = format!("redis://127.0.0.1:{}", redis_port().await);
    let con = redis::Client::open(url)
        .expect("Invalid Redis URL")
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let n = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    (con, format!("test{n}"))
}
