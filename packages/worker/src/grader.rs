use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use common::judge_job::LimitsError;
use common::{
    ExecutionLimits, GradeReport, Language, SubmissionStatus, TestCase, TestCaseResult, Verdict,
};
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::language::{ExecutorRegistry, LanguageExecutor};

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("No executor registered for language '{0}'")]
    UnsupportedLanguage(Language),

    #[error("Invalid execution limits: {0}")]
    InvalidLimits(#[from] LimitsError),
}

/// Runs every test case of a submission and rolls the results up.
#[derive(Clone)]
pub struct Grader {
    registry: Arc<ExecutorRegistry>,
}

impl Grader {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Grade `code` against `test_cases`, in case order, without stopping at the first failure.
    #[instrument(skip(self, code, test_cases), fields(cases = test_cases.len()))]
    pub async fn grade(
        &self,
        language: Language,
        code: &str,
        test_cases: &[TestCase],
        limits: ExecutionLimits,
    ) -> Result<GradeReport, GradeError> {
        limits.validate()?;
        let executor = self
            .registry
            .get(language)
            .ok_or(GradeError::UnsupportedLanguage(language))?;

        let mut ordered: Vec<&TestCase> = test_cases.iter().collect();
        ordered.sort_by_key(|tc| tc.order);

        let mut results = Vec::with_capacity(ordered.len());
        for test_case in ordered {
            results.push(run_case(executor.as_ref(), code, test_case, &limits).await);
        }

        let report = aggregate(results);
        info!(
            status = %report.status,
            score = report.score,
            time_ms_total = report.time_ms_total,
            "Submission graded"
        );
        Ok(report)
    }
}

/// Run one case, turning a panic inside the executor into a runtime error.
async fn run_case(
    executor: &dyn LanguageExecutor,
    code: &str,
    test_case: &TestCase,
    limits: &ExecutionLimits,
) -> TestCaseResult {
    match AssertUnwindSafe(executor.execute(code, test_case, limits))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(case_id = %test_case.id, %message, "Executor panicked");
            TestCaseResult::failed(
                &test_case.id,
                Verdict::RuntimeError,
                format!("Internal error while grading: {message}"),
            )
        }
    }
}

/// Roll per-case results up into the submission verdict.
///
/// The overall status is the most severe verdict seen. Score is the share of
/// passed cases, so `100` only ever pairs with `ACCEPTED`.
pub fn aggregate(results: Vec<TestCaseResult>) -> GradeReport {
    if results.is_empty() {
        return GradeReport {
            status: SubmissionStatus::RuntimeError,
            score: 0.0,
            time_ms_total: 0,
            memory_kb_total: 0,
            test_case_results: results,
            error_message: Some("No test cases to grade".to_string()),
        };
    }

    let passed = results.iter().filter(|r| r.passed()).count();
    let score = 100.0 * passed as f64 / results.len() as f64;
    let time_ms_total = results.iter().map(|r| r.time_ms).sum();
    let memory_kb_total = results.iter().map(|r| r.memory_kb).sum();

    let worst = results
        .iter()
        .map(|r| r.status)
        .max_by_key(Verdict::severity)
        .unwrap_or(Verdict::Ok);

    let error_message = match worst {
        Verdict::CompilationError | Verdict::RuntimeError | Verdict::TimeLimitExceeded => results
            .iter()
            .find(|r| r.status == worst)
            .map(|r| match &r.error_message {
                Some(message) => format!("{}: {message}", r.case_id),
                None => format!("{}: {worst}", r.case_id),
            }),
        Verdict::Ok | Verdict::WrongAnswer => None,
    };

    GradeReport {
        status: worst.as_status(),
        score,
        time_ms_total,
        memory_kb_total,
        test_case_results: results,
        error_message,
    }
}
