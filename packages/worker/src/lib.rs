pub mod config;
pub mod error;
pub mod grader;
pub mod language;
pub mod reconcile;
pub mod sandbox;
pub mod service;
pub mod state;
pub mod store;
pub mod worker;

pub use config::{ReconcileConfig, SandboxConfig, WorkerAppConfig, WorkerConfig};
pub use error::{Result, WorkerError};
pub use grader::{GradeError, Grader};
pub use language::{ExecutorRegistry, LanguageExecutor, SandboxExecutor, Toolchain};
pub use reconcile::{Reconciler, SweepReport};
pub use sandbox::{RunOutcome, RunSpec, Sandbox, SandboxError};
pub use service::{JudgeService, SubmitOutcome};
pub use state::{StateError, SubmissionStateMachine};
pub use worker::{Worker, WorkerContext, WorkerPool};
