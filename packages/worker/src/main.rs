use std::sync::Arc;

use anyhow::Context;
use mq::{QueueConfig, RedisQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use worker::store::{RedisChallengeStore, RedisLeaderboard, RedisSubmissionStore};
use worker::{
    ExecutorRegistry, Grader, Reconciler, SubmissionStateMachine, WorkerAppConfig, WorkerContext,
    WorkerPool, sandbox,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!(worker_id = %config.worker.id, "Worker starting");

    let client = redis::Client::open(config.mq.url.as_str()).context("Invalid Redis URL")?;
    let con = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    let queue = Arc::new(RedisQueue::with_connection(
        con.clone(),
        &config.mq.namespace,
        &config.mq.queue_name,
        QueueConfig::from(&config.mq),
    ));
    info!(
        namespace = %config.mq.namespace,
        queue_name = %config.mq.queue_name,
        max_attempts = config.mq.max_attempts,
        "MQ connected"
    );

    let submissions = Arc::new(RedisSubmissionStore::new(con.clone(), &config.mq.namespace));
    let challenges = Arc::new(RedisChallengeStore::new(con.clone(), &config.mq.namespace));
    let leaderboard = Arc::new(RedisLeaderboard::new(con, &config.mq.namespace));

    let sandbox = sandbox::from_config(&config.sandbox);
    info!(backend = sandbox.name(), "Sandbox ready");
    let registry = ExecutorRegistry::with_sandbox(sandbox, &config.sandbox);
    let states = SubmissionStateMachine::new(submissions);

    let ctx = WorkerContext {
        queue: queue.clone(),
        grader: Grader::new(registry),
        states: states.clone(),
        leaderboard,
    };

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::start(ctx, &config.worker, shutdown.clone());

    let reconciler = config.reconcile.enabled.then(|| {
        let reconciler = Reconciler::new(queue, states, challenges, config.reconcile.clone());
        let token = shutdown.clone();
        tokio::spawn(async move { reconciler.run(token).await })
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");

    pool.stop().await;
    if let Some(handle) = reconciler
        && let Err(e) = handle.await
    {
        error!(error = %e, "Reconciler task panicked");
    }

    info!("Worker stopped");
    Ok(())
}
