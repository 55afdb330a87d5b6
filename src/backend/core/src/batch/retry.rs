//! Retry policy around conversion calls.
//!
//! Attempts run back to back on the same worker with a fixed pause between
//! them. Only transient errors are retried; a fatal error ends the job on the
//! attempt that raised it.

use std::time::Duration;

use tracing::{debug, warn};

use crate::batch::{ConversionInput, ConversionOutput, JobFailure};
use crate::error::{Result, TransmuteError};
use crate::service::{ConversionError, ConversionService};

/// How a job ended after all the attempts it was allowed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(ConversionOutput),
    /// Carries the error of the last attempt
    Failed(JobFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Bound on a single conversion call unless configured otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Retry parameters shared by every job in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_delay: Duration,
    call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(2500),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt. Calls are bounded by
    /// [`DEFAULT_CALL_TIMEOUT`].
    pub fn new(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_delay,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Bound each conversion call; an expired call counts as a transient error.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff_delay
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TransmuteError::invalid_batch(
                "max attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether a failure on attempt number `attempt` earns another try.
    pub fn should_retry(&self, attempt: u32, error: &ConversionError) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Run the conversion until it succeeds, fails fatally or runs out of
    /// attempts.
    ///
    /// `on_attempt` is called with the 1-based attempt number before each call.
    pub async fn execute<F>(
        &self,
        service: &dyn ConversionService,
        input: &ConversionInput,
        mut on_attempt: F,
    ) -> Outcome
    where
        F: FnMut(u32) + Send,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            on_attempt(attempt);

            let error = match self.call(service, input).await {
                Ok(output) => {
                    debug!(file_name = %input.file_name, attempt, "Conversion succeeded");
                    return Outcome::Succeeded(output);
                }
                Err(error) => error,
            };

            if !self.should_retry(attempt, &error) {
                warn!(
                    file_name = %input.file_name,
                    attempt,
                    max_attempts = self.max_attempts,
                    class = %error.class(),
                    error = %error,
                    "Conversion failed"
                );
                return Outcome::Failed(error.into());
            }

            warn!(
                file_name = %input.file_name,
                attempt,
                max_attempts = self.max_attempts,
                backoff_ms = self.backoff_delay.as_millis() as u64,
                error = %error,
                "Transient conversion failure, retrying"
            );

            if !self.backoff_delay.is_zero() {
                tokio::time::sleep(self.backoff_delay).await;
            }
        }
    }

    async fn call(
        &self,
        service: &dyn ConversionService,
        input: &ConversionInput,
    ) -> std::result::Result<ConversionOutput, ConversionError> {
        let limit = self.call_timeout;
        tokio::time::timeout(limit, service.convert(input))
            .await
            .unwrap_or(Err(ConversionError::Timeout(limit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ErrorClass;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted results, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<std::result::Result<ConversionOutput, ConversionError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(
            script: Vec<std::result::Result<ConversionOutput, ConversionError>>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl ConversionService for Scripted {
        async fn convert(
            &self,
            input: &ConversionInput,
        ) -> std::result::Result<ConversionOutput, ConversionError> {
            *self.calls.lock() += 1;
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ConversionOutput::new(input.content.to_uppercase())))
        }
    }

    fn input() -> ConversionInput {
        ConversionInput::new("main.pas", "begin end.")
    }

    fn network() -> ConversionError {
        ConversionError::Network("connection reset".into())
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert!(policy.should_retry(1, &network()));
        assert!(policy.should_retry(2, &network()));
        assert!(!policy.should_retry(3, &network()));
        assert!(!policy.should_retry(1, &ConversionError::Rejected("no".into())));
    }

    #[test]
    fn test_calls_are_bounded_by_default() {
        assert_eq!(RetryPolicy::default().call_timeout(), DEFAULT_CALL_TIMEOUT);
        assert_eq!(
            RetryPolicy::new(1, Duration::ZERO).call_timeout(),
            DEFAULT_CALL_TIMEOUT
        );
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::new(1, Duration::ZERO).validate().is_ok());
        assert!(RetryPolicy::new(0, Duration::ZERO).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let service = Scripted::new(vec![Err(network()), Err(network())]);
        let policy = RetryPolicy::new(3, Duration::from_millis(2500));

        let mut attempts = Vec::new();
        let started = tokio::time::Instant::now();
        let outcome = policy
            .execute(&service, &input(), |n| attempts.push(n))
            .await;

        assert!(outcome.is_success());
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(service.calls(), 3);
        assert!(started.elapsed() >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_last_error() {
        let service = Scripted::new(vec![
            Err(network()),
            Err(ConversionError::Unavailable("503".into())),
            Err(ConversionError::RateLimited("429".into())),
        ]);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let mut last = 0;
        let outcome = policy.execute(&service, &input(), |n| last = n).await;

        assert_eq!(last, 3);
        match outcome {
            Outcome::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Transient);
                assert_eq!(failure.code, "rate_limited");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let service = Scripted::new(vec![Err(ConversionError::MalformedInput(
            "unexpected token".into(),
        ))]);
        let policy = RetryPolicy::new(5, Duration::from_secs(60));

        let mut last = 0;
        let outcome = policy.execute(&service, &input(), |n| last = n).await;

        assert_eq!(last, 1);
        assert_eq!(service.calls(), 1);
        assert!(matches!(
            outcome,
            Outcome::Failed(JobFailure { class: ErrorClass::Fatal, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_stops_stalled_call() {
        struct Hung;

        #[async_trait]
        impl ConversionService for Hung {
            async fn convert(
                &self,
                _input: &ConversionInput,
            ) -> std::result::Result<ConversionOutput, ConversionError> {
                std::future::pending().await
            }
        }

        let started = tokio::time::Instant::now();
        let outcome = RetryPolicy::new(1, Duration::ZERO)
            .execute(&Hung, &input(), |_| {})
            .await;

        assert!(!outcome.is_success());
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_CALL_TIMEOUT);
        assert!(elapsed < DEFAULT_CALL_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_transient() {
        struct Stalled;

        #[async_trait]
        impl ConversionService for Stalled {
            async fn convert(
                &self,
                _input: &ConversionInput,
            ) -> std::result::Result<ConversionOutput, ConversionError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ConversionOutput::new("late"))
            }
        }

        let policy = RetryPolicy::new(2, Duration::ZERO).with_call_timeout(Duration::from_secs(1));

        let mut last = 0;
        let outcome = policy.execute(&Stalled, &input(), |n| last = n).await;

        assert_eq!(last, 2);
        match outcome {
            Outcome::Failed(failure) => {
                assert_eq!(failure.class, ErrorClass::Transient);
                assert_eq!(failure.code, "timeout");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
