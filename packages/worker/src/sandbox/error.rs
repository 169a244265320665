use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    /// The sandbox or the program inside it could not be started.
    #[error("Sandbox failed to start: {0}")]
    Launch(String),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sandbox tool itself reported a failure unrelated to the program.
    #[error("Sandbox internal error: {0}")]
    Internal(String),
}
