//! Retry discipline around an [`AnalysisService`].
//!
//! ## Retry Strategy
//!
//! Each attempt submits the document afresh and waits for the result under
//! the polling timeout. What happens after a failed attempt depends on why it
//! failed:
//!
//! | Failure | Delay before next attempt |
//! |---------|---------------------------|
//! | polling timeout | `base_delay × (attempt + 1)` (linear) |
//! | rate limited (429) | `base_delay × 2^attempt` (exponential), or the server's `Retry-After` when longer |
//! | other transient failure | `base_delay` (fixed) |
//! | rejected / malformed | no retry, fail immediately |
//!
//! `attempt` is 0-based. With `base_delay = 5s` and 3 attempts, two timeouts
//! wait 5 s then 10 s; two rate limits wait 5 s then 10 s as well, but a
//! fourth attempt would wait 20 s instead of 15 s.

use super::{AnalysisService, RawResult};
use crate::error::{AnalysisError, ServiceError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Attempt budget and timing for the analysis gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub attempts: u32,
    /// Unit of every backoff delay.
    pub base_delay: Duration,
    /// Upper bound on waiting for one submitted analysis.
    pub polling_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(5),
            polling_timeout: Duration::from_secs(300),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone)]
enum AttemptFailure {
    Timeout,
    Service(ServiceError),
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (0-based).
    fn backoff(&self, failure: &AttemptFailure, attempt: u32) -> Duration {
        match failure {
            AttemptFailure::Timeout => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            AttemptFailure::Service(ServiceError::RateLimited { retry_after }) => {
                let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                match retry_after {
                    Some(server) if *server > exponential => *server,
                    _ => exponential,
                }
            }
            AttemptFailure::Service(_) => self.base_delay,
        }
    }
}

/// Submits documents for layout analysis with timeout and retry handling.
pub struct AnalysisGateway {
    service: Arc<dyn AnalysisService>,
    policy: RetryPolicy,
}

impl AnalysisGateway {
    pub fn new(service: Arc<dyn AnalysisService>, policy: RetryPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Analyse `document`, retrying according to the [`RetryPolicy`].
    ///
    /// # Errors
    /// - [`AnalysisError::Timeout`] when the last attempt hit the polling timeout.
    /// - [`AnalysisError::Failed`] when a non-retryable failure occurred, or the
    ///   last attempt failed for any other reason.
    pub async fn analyze(&self, document: &[u8], model_id: &str) -> Result<RawResult, AnalysisError> {
        let attempts = self.policy.attempts.max(1);
        let mut last_failure = AttemptFailure::Timeout;

        for attempt in 0..attempts {
            info!(
                "Starting layout analysis with model '{}' (attempt {}/{})",
                model_id,
                attempt + 1,
                attempts
            );
            let start = Instant::now();

            let failure = match self.attempt(document, model_id).await {
                Ok(result) => {
                    info!(
                        "Layout analysis completed in {:?}: {} pages, {} paragraphs, {} tables, {} figures",
                        start.elapsed(),
                        result.pages.len(),
                        result.paragraphs.len(),
                        result.tables.len(),
                        result.figures.len()
                    );
                    return Ok(result);
                }
                Err(failure) => failure,
            };

            match &failure {
                AttemptFailure::Timeout => warn!(
                    "Layout analysis timed out after {}s (attempt {})",
                    self.policy.polling_timeout.as_secs(),
                    attempt + 1
                ),
                AttemptFailure::Service(e) if !e.is_retryable() => {
                    warn!("Layout analysis rejected, not retrying: {}", e);
                    return Err(AnalysisError::Failed {
                        attempts: attempt + 1,
                        source: e.clone(),
                    });
                }
                AttemptFailure::Service(e) => {
                    warn!("Layout analysis attempt {} failed: {}", attempt + 1, e)
                }
            }

            if attempt + 1 < attempts {
                let delay = self.policy.backoff(&failure, attempt);
                debug!("Retrying layout analysis in {:?}", delay);
                sleep(delay).await;
            }
            last_failure = failure;
        }

        Err(match last_failure {
            AttemptFailure::Timeout => AnalysisError::Timeout {
                attempts,
                secs: self.policy.polling_timeout.as_secs(),
            },
            AttemptFailure::Service(source) => AnalysisError::Failed { attempts, source },
        })
    }

    /// One submit + bounded wait.
    async fn attempt(&self, document: &[u8], model_id: &str) -> Result<RawResult, AttemptFailure> {
        let pending = self
            .service
            .submit(document, model_id)
            .await
            .map_err(AttemptFailure::Service)?;
        debug!("Analysis submitted: {}", pending.operation);

        let polling_timeout = self.policy.polling_timeout;
        match timeout(
            polling_timeout,
            self.service.await_result(&pending, polling_timeout),
        )
        .await
        {
            Ok(result) => result.map_err(AttemptFailure::Service),
            Err(_) => Err(AttemptFailure::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PendingAnalysis;
    use crate::analysis::result::RawPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// What the mock does on one `await_result` call.
    #[derive(Clone, Debug)]
    enum Step {
        Succeed,
        Hang,
        Fail(ServiceError),
    }

    /// Mock service that plays back one [`Step`] per attempt, repeating the last.
    struct SequencedService {
        steps: Mutex<Vec<Step>>,
        submits: AtomicUsize,
    }

    impl SequencedService {
        fn new(mut steps: Vec<Step>) -> Arc<Self> {
            steps.reverse();
            Arc::new(Self {
                steps: Mutex::new(steps),
                submits: AtomicUsize::new(0),
            })
        }

        fn submits(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisService for SequencedService {
        async fn submit(&self, _document: &[u8], _model_id: &str) -> Result<PendingAnalysis, ServiceError> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(PendingAnalysis {
                operation: format!("op-{n}"),
            })
        }

        async fn await_result(
            &self,
            pending: &PendingAnalysis,
            _timeout: Duration,
        ) -> Result<RawResult, ServiceError> {
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.len() > 1 {
                    steps.pop().unwrap()
                } else {
                    steps[0].clone()
                }
            };
            match step {
                Step::Succeed => Ok(RawResult {
                    pages: vec![RawPage {
                        page_number: 1,
                        width: 8.5,
                        height: 11.0,
                        ..Default::default()
                    }],
                    paragraphs: vec![crate::analysis::result::RawParagraph {
                        content: pending.operation.clone(),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                Step::Hang => {
                    sleep(Duration::from_secs(3600)).await;
                    unreachable!("gateway should have timed out")
                }
                Step::Fail(e) => Err(e),
            }
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_secs(2),
            polling_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_timeouts() {
        let service = SequencedService::new(vec![Step::Hang, Step::Hang, Step::Succeed]);
        let gateway = AnalysisGateway::new(service.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let result = gateway.analyze(b"%PDF-1.7", "prebuilt-layout").await.unwrap();

        assert_eq!(service.submits(), 3);
        assert_eq!(result.paragraphs[0].content, "op-3");
        // 2 × 30s timeouts + linear backoff 2s + 4s.
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(66) && elapsed < Duration::from_secs(67),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_exhaust_into_timeout_error() {
        let service = SequencedService::new(vec![Step::Hang]);
        let gateway = AnalysisGateway::new(service.clone(), policy(2));

        let err = gateway.analyze(b"%PDF", "prebuilt-layout").await.unwrap_err();
        assert!(
            matches!(err, AnalysisError::Timeout { attempts: 2, secs: 30 }),
            "got: {err:?}"
        );
        assert_eq!(service.submits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_request_is_not_retried() {
        let service = SequencedService::new(vec![Step::Fail(ServiceError::Rejected {
            status: 400,
            message: "InvalidContent".into(),
        })]);
        let gateway = AnalysisGateway::new(service.clone(), policy(5));

        let err = gateway.analyze(b"junk", "prebuilt-layout").await.unwrap_err();
        match err {
            AnalysisError::Failed { attempts, source } => {
                assert_eq!(attempts, 1);
                assert!(matches!(source, ServiceError::Rejected { status: 400, .. }));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(service.submits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_with_last_cause() {
        let service = SequencedService::new(vec![
            Step::Fail(ServiceError::Transient("502".into())),
            Step::Fail(ServiceError::Transient("503".into())),
        ]);
        let gateway = AnalysisGateway::new(service.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let err = gateway.analyze(b"%PDF", "prebuilt-layout").await.unwrap_err();
        match err {
            AnalysisError::Failed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, ServiceError::Transient(ref m) if m == "503"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        // Fixed backoff: 2s + 2s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let service = SequencedService::new(vec![
            Step::Fail(ServiceError::RateLimited { retry_after: None }),
            Step::Fail(ServiceError::RateLimited { retry_after: None }),
            Step::Succeed,
        ]);
        let gateway = AnalysisGateway::new(service.clone(), policy(3));

        let started = tokio::time::Instant::now();
        gateway.analyze(b"%PDF", "prebuilt-layout").await.unwrap();
        // Exponential backoff: 2s × 2^0 + 2s × 2^1.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_response_is_retried_with_fixed_delay() {
        let service = SequencedService::new(vec![
            Step::Fail(ServiceError::Malformed("expected value at line 1 column 1".into())),
            Step::Succeed,
        ]);
        let gateway = AnalysisGateway::new(service.clone(), policy(3));

        let started = tokio::time::Instant::now();
        let result = gateway.analyze(b"%PDF", "prebuilt-layout").await.unwrap();

        assert_eq!(service.submits(), 2);
        assert_eq!(result.paragraphs[0].content, "op-2");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[test]
    fn backoff_schedule() {
        let p = policy(5);
        let timeout = AttemptFailure::Timeout;
        let limited = AttemptFailure::Service(ServiceError::RateLimited { retry_after: None });
        let transient = AttemptFailure::Service(ServiceError::Transient("x".into()));

        assert_eq!(p.backoff(&timeout, 0), Duration::from_secs(2));
        assert_eq!(p.backoff(&timeout, 2), Duration::from_secs(6));
        assert_eq!(p.backoff(&limited, 0), Duration::from_secs(2));
        assert_eq!(p.backoff(&limited, 3), Duration::from_secs(16));
        assert_eq!(p.backoff(&transient, 3), Duration::from_secs(2));
        assert_eq!(p.backoff(&limited, 40), Duration::from_secs(2) * u32::MAX);
    }

    #[test]
    fn server_retry_after_wins_when_longer() {
        let p = policy(3);
        let limited = AttemptFailure::Service(ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        });
        assert_eq!(p.backoff(&limited, 0), Duration::from_secs(60));

        let short = AttemptFailure::Service(ServiceError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        });
        assert_eq!(p.backoff(&short, 1), Duration::from_secs(4));
    }
}
