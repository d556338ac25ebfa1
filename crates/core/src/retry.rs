//! Bounded automatic retry of failed tests.

use crate::run::TestRunResult;
use crate::status::TestStatus;

/// Per-suite retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// Use the suite's configured budget as is.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether another attempt is allowed after `retries_used` retries
    /// produced `status`.
    pub fn should_retry(&self, status: TestStatus, retries_used: u32) -> bool {
        status.is_failure() && retries_used < self.max_retries
    }
}

/// Stamp retry accounting onto the final attempt's result.
///
/// `passed_on_retry` is true only when at least one retry was consumed and
/// the last attempt passed.
pub fn finalize_attempts(mut result: TestRunResult, retries_used: u32) -> TestRunResult {
    result.retry_count = retries_used;
    result.passed_on_retry = retries_used > 0 && result.status == TestStatus::Passed;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestStatus) -> TestRunResult {
        TestRunResult {
            test_id: 7,
            test_name: "search".into(),
            status,
            duration_ms: 5,
            retry_count: 0,
            passed_on_retry: false,
            error: None,
            steps: serde_json::Value::Null,
        }
    }

    #[test]
    fn zero_budget_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(TestStatus::Failed, 0));
    }

    #[test]
    fn retries_failures_until_budget_exhausted() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(TestStatus::Failed, 0));
        assert!(policy.should_retry(TestStatus::Error, 1));
        assert!(!policy.should_retry(TestStatus::Failed, 2));
    }

    #[test]
    fn never_retries_passes_or_skips() {
        let policy = RetryPolicy::new(3);
        assert!(!policy.should_retry(TestStatus::Passed, 0));
        assert!(!policy.should_retry(TestStatus::Skipped, 0));
    }

    #[test]
    fn large_budget_is_honored() {
        let policy = RetryPolicy::new(7);
        assert_eq!(policy.max_retries(), 7);
        assert!(policy.should_retry(TestStatus::Failed, 6));
        assert!(!policy.should_retry(TestStatus::Failed, 7));
    }

    #[test]
    fn passed_on_retry_requires_a_retry() {
        let first_try = finalize_attempts(result(TestStatus::Passed), 0);
        assert_eq!(first_try.retry_count, 0);
        assert!(!first_try.passed_on_retry);

        let flaky = finalize_attempts(result(TestStatus::Passed), 1);
        assert_eq!(flaky.retry_count, 1);
        assert!(flaky.passed_on_retry);

        let exhausted = finalize_attempts(result(TestStatus::Failed), 2);
        assert_eq!(exhausted.retry_count, 2);
        assert!(!exhausted.passed_on_retry);
    }
}
