pub mod toolchains;

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ExecutionLimits, Language, TestCase, TestCaseResult, Verdict};
use tracing::{debug, warn};

pub use toolchains::{Cpp, Java, JavaScript, Python};

use crate::config::SandboxConfig;
use crate::sandbox::{RunOutcome, RunSpec, Sandbox};

/// How one language builds and runs a program.
pub trait Toolchain: Send + Sync + 'static {
    fn language(&self) -> Language;

    /// File name the submitted code is written to.
    fn source_file(&self) -> &str;

    fn image(&self) -> &str;

    /// `None` for interpreted languages.
    fn compile_command(&self) -> Option<Vec<String>> {
        None
    }

    fn run_command(&self) -> Vec<String>;

    /// Whether a failed compile step reported a compile-time error.
    fn is_compile_failure(&self, stderr: &str) -> bool {
        stderr.contains("error:")
            || stderr.contains("Error:")
            || stderr.contains("compilation failed")
    }

    fn outputs_match(&self, actual: &str, expected: &str) -> bool {
        actual.trim() == expected.trim()
    }
}

/// Runs one test case of one language.
#[async_trait]
pub trait LanguageExecutor: Send + Sync {
    fn language(&self) -> Language;

    fn is_compiled(&self) -> bool;

    /// Never fails: every problem is reported through the result's status.
    async fn execute(
        &self,
        code: &str,
        test_case: &TestCase,
        limits: &ExecutionLimits,
    ) -> TestCaseResult;
}

/// Budget and placement shared by every executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub compile_timeout: Duration,
    pub compile_memory_mb: u32,
    pub scratch_root: Option<PathBuf>,
}

impl From<&SandboxConfig> for ExecutorSettings {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            compile_timeout: Duration::from_millis(config.compile_timeout_ms),
            compile_memory_mb: config.compile_memory_mb,
            scratch_root: config.scratch_root.clone(),
        }
    }
}

/// A `Toolchain` driven through a `Sandbox`, with a fresh scratch directory per case.
pub struct SandboxExecutor<T> {
    toolchain: T,
    sandbox: Arc<dyn Sandbox>,
    settings: ExecutorSettings,
}

impl<T: Toolchain> SandboxExecutor<T> {
    pub fn new(toolchain: T, sandbox: Arc<dyn Sandbox>, settings: ExecutorSettings) -> Self {
        Self {
            toolchain,
            sandbox,
            settings,
        }
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codejudge-");
        let dir = match &self.settings.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        // Sandboxed programs may run as another user.
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o777))?;
        Ok(dir)
    }

    fn spec(&self, workdir: &Path, argv: Vec<String>, stdin: &str) -> RunSpec {
        RunSpec {
            workdir: workdir.to_path_buf(),
            image: self.toolchain.image().to_string(),
            argv,
            stdin: stdin.to_string(),
            time_limit: self.settings.compile_timeout,
            memory_limit_mb: self.settings.compile_memory_mb,
        }
    }

    /// Build the program. `Some` carries the failed case result.
    async fn compile(&self, workdir: &Path, case_id: &str) -> Option<TestCaseResult> {
        let argv = self.toolchain.compile_command()?;
        let spec = self.spec(workdir, argv, "");

        let outcome = match self.sandbox.run(&spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return Some(TestCaseResult::failed(
                    case_id,
                    Verdict::RuntimeError,
                    e.to_string(),
                ));
            }
        };

        if outcome.timed_out {
            return Some(TestCaseResult::failed(
                case_id,
                Verdict::CompilationError,
                format!(
                    "Compilation timed out after {} ms",
                    self.settings.compile_timeout.as_millis()
                ),
            ));
        }
        if outcome.succeeded() {
            return None;
        }

        let diagnostics = if outcome.stderr.trim().is_empty() {
            outcome.stdout.clone()
        } else {
            outcome.stderr.clone()
        };
        let verdict = if self.toolchain.is_compile_failure(&diagnostics) {
            Verdict::CompilationError
        } else {
            Verdict::RuntimeError
        };
        let message = if diagnostics.trim().is_empty() {
            outcome.failure_summary()
        } else {
            diagnostics
        };
        Some(TestCaseResult::failed(case_id, verdict, message))
    }

    fn classify(
        &self,
        test_case: &TestCase,
        limits: &ExecutionLimits,
        outcome: RunOutcome,
    ) -> TestCaseResult {
        let memory_kb = outcome.memory_kb.unwrap_or(0);

        if outcome.timed_out {
            return TestCaseResult {
                time_ms: limits.time_limit_ms,
                memory_kb,
                ..TestCaseResult::failed(
                    &test_case.id,
                    Verdict::TimeLimitExceeded,
                    format!("Time limit exceeded ({} ms)", limits.time_limit_ms),
                )
            };
        }

        let time_ms = outcome.elapsed.as_millis() as u64;
        if outcome.oom_killed {
            return TestCaseResult {
                time_ms,
                memory_kb,
                ..TestCaseResult::failed(
                    &test_case.id,
                    Verdict::RuntimeError,
                    format!("Memory limit exceeded ({} MB)", limits.memory_limit_mb),
                )
            };
        }
        if !outcome.succeeded() {
            let message = if outcome.stderr.trim().is_empty() {
                outcome.failure_summary()
            } else {
                outcome.stderr
            };
            return TestCaseResult {
                time_ms,
                memory_kb,
                ..TestCaseResult::failed(&test_case.id, Verdict::RuntimeError, message)
            };
        }
        // Only a prefix was captured, so it cannot be compared.
        if outcome.output_truncated {
            return TestCaseResult {
                time_ms,
                memory_kb,
                ..TestCaseResult::failed(
                    &test_case.id,
                    Verdict::WrongAnswer,
                    "Output limit exceeded",
                )
            };
        }

        let status = if self
            .toolchain
            .outputs_match(&outcome.stdout, &test_case.expected_output)
        {
            Verdict::Ok
        } else {
            Verdict::WrongAnswer
        };
        TestCaseResult {
            case_id: test_case.id.clone(),
            status,
            time_ms,
            memory_kb,
            actual_output: Some(outcome.stdout.trim().to_string()),
            expected_output: Some(test_case.expected_output.trim().to_string()),
            error_message: None,
        }
    }

    async fn execute_in(
        &self,
        workdir: &Path,
        code: &str,
        test_case: &TestCase,
        limits: &ExecutionLimits,
    ) -> TestCaseResult {
        let source = workdir.join(self.toolchain.source_file());
        if let Err(e) = tokio::fs::write(&source, code).await {
            return TestCaseResult::failed(
                &test_case.id,
                Verdict::RuntimeError,
                format!("Failed to write source file: {e}"),
            );
        }

        if let Some(failed) = self.compile(workdir, &test_case.id).await {
            return failed;
        }

        let spec = RunSpec {
            time_limit: Duration::from_millis(limits.time_limit_ms),
            memory_limit_mb: limits.memory_limit_mb,
            ..self.spec(workdir, self.toolchain.run_command(), &test_case.input)
        };
        match self.sandbox.run(&spec).await {
            Ok(outcome) => self.classify(test_case, limits, outcome),
            Err(e) => TestCaseResult::failed(&test_case.id, Verdict::RuntimeError, e.to_string()),
        }
    }
}

#[async_trait]
impl<T: Toolchain> LanguageExecutor for SandboxExecutor<T> {
    fn language(&self) -> Language {
        self.toolchain.language()
    }

    fn is_compiled(&self) -> bool {
        self.toolchain.compile_command().is_some()
    }

    async fn execute(
        &self,
        code: &str,
        test_case: &TestCase,
        limits: &ExecutionLimits,
    ) -> TestCaseResult {
        let dir = match self.scratch_dir() {
            Ok(dir) => dir,
            Err(e) => {
                return TestCaseResult::failed(
                    &test_case.id,
                    Verdict::RuntimeError,
                    format!("Failed to prepare scratch directory: {e}"),
                );
            }
        };

        let result = self.execute_in(dir.path(), code, test_case, limits).await;
        debug!(
            language = %self.toolchain.language(),
            case_id = %test_case.id,
            status = %result.status,
            time_ms = result.time_ms,
            "Test case executed"
        );

        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
        result
    }
}

/// Lookup table from language to its executor.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Language, Arc<dyn LanguageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a sandboxed executor for every supported language.
    pub fn with_sandbox(sandbox: Arc<dyn Sandbox>, config: &SandboxConfig) -> Self {
        let settings = ExecutorSettings::from(config);
        let image = |language: Language| config.images.for_language(language).to_string();
        let mut registry = Self::new();
        registry.register(Arc::new(SandboxExecutor::new(
            Python::new(image(Language::Python)),
            sandbox.clone(),
            settings.clone(),
        )));
        registry.register(Arc::new(SandboxExecutor::new(
            JavaScript::new(image(Language::Javascript)),
            sandbox.clone(),
            settings.clone(),
        )));
        registry.register(Arc::new(SandboxExecutor::new(
            Cpp::new(image(Language::Cpp)),
            sandbox.clone(),
            settings.clone(),
        )));
        registry.register(Arc::new(SandboxExecutor::new(
            Java::new(image(Language::Java)),
            sandbox,
            settings,
        )));
        registry
    }

    /// Add or replace the executor for its language.
    pub fn register(&mut self, executor: Arc<dyn LanguageExecutor>) {
        self.executors.insert(executor.language(), executor);
    }

    pub fn get(&self, language: Language) -> Option<Arc<dyn LanguageExecutor>> {
        self.executors.get(&language).cloned()
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.executors.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}
