mod grading;
mod reconcile;
mod redis_store;
mod service;
mod support;
mod worker_loop;
