//! Observer hooks for the vision stage.
//!
//! Inject an [`Arc<dyn VisionObserver>`] through
//! [`crate::parser::DocumentParserBuilder::observer`] to receive token usage
//! and latency for every vision request (for cost tracking), plus per-image
//! progress. Nothing is registered process-wide; each parser carries its own
//! observer.
//!
//! # Example
//!
//! ```rust
//! use docenrich::{TokenUsage, VisionObserver};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct TokenMeter {
//!     total: AtomicU64,
//! }
//!
//! impl VisionObserver for TokenMeter {
//!     fn on_request_complete(&self, usage: &TokenUsage, _latency: Duration) {
//!         self.total.fetch_add(usage.total_tokens as u64, Ordering::Relaxed);
//!     }
//! }
//!
//! let meter = TokenMeter::default();
//! meter.on_request_complete(
//!     &TokenUsage { prompt_tokens: 900, completion_tokens: 100, total_tokens: 1000 },
//!     Duration::from_millis(1500),
//! );
//! assert_eq!(meter.total.load(Ordering::Relaxed), 1000);
//! ```

use crate::error::VisionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Token accounting reported by the vision model.
///
/// All zero when the provider does not report usage (common for streamed
/// responses).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Called by the vision stage as it processes each cropped image.
///
/// All methods default to no-ops, so implementations only override what
/// they need. Images are processed one at a time, so calls never overlap for
/// a single parse, but one observer may be shared across parsers running
/// concurrently.
pub trait VisionObserver: Send + Sync {
    /// Before the first request for image `index` (0-based) of `total`.
    fn on_image_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// A request returned content. `latency` covers the whole request,
    /// including stream consumption.
    fn on_request_complete(&self, usage: &TokenUsage, latency: Duration) {
        let _ = (usage, latency);
    }

    /// A single request attempt failed. Called once per attempt, retries included.
    fn on_request_failed(&self, error: &VisionError, latency: Duration) {
        let _ = (error, latency);
    }

    /// Image `index` is finished; `extracted` is false when it was skipped.
    fn on_image_complete(&self, index: usize, total: usize, extracted: bool) {
        let _ = (index, total, extracted);
    }
}

/// Default observer: ignores every event.
pub struct NoopObserver;

impl VisionObserver for NoopObserver {}

/// Logs every request through `tracing`.
pub struct TracingObserver;

impl VisionObserver for TracingObserver {
    fn on_request_complete(&self, usage: &TokenUsage, latency: Duration) {
        info!(
            "Vision request: {} prompt + {} completion tokens in {:?}",
            usage.prompt_tokens, usage.completion_tokens, latency
        );
    }

    fn on_request_failed(&self, error: &VisionError, latency: Duration) {
        warn!("Vision request failed after {:?}: {}", latency, error);
    }
}

/// Shared observer handle as stored by the parser.
pub type SharedObserver = Arc<dyn VisionObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        completes: AtomicUsize,
        failures: AtomicUsize,
        tokens: AtomicUsize,
    }

    impl VisionObserver for Counting {
        fn on_request_complete(&self, usage: &TokenUsage, _latency: Duration) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.tokens.fetch_add(usage.total_tokens, Ordering::SeqCst);
        }

        fn on_request_failed(&self, _error: &VisionError, _latency: Duration) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_do_not_panic() {
        let observers: Vec<SharedObserver> = vec![Arc::new(NoopObserver), Arc::new(TracingObserver)];
        for o in observers {
            o.on_image_start(0, 2);
            o.on_request_complete(&TokenUsage::default(), Duration::from_millis(5));
            o.on_request_failed(&VisionError::RateLimited, Duration::from_millis(5));
            o.on_image_complete(0, 2, true);
        }
    }

    #[test]
    fn overridden_methods_receive_events() {
        let c = Counting::default();
        c.on_request_complete(
            &TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            Duration::ZERO,
        );
        c.on_request_failed(&VisionError::EmptyResponse, Duration::ZERO);
        c.on_image_complete(0, 1, false);
        assert_eq!(c.completes.load(Ordering::SeqCst), 1);
        assert_eq!(c.failures.load(Ordering::SeqCst), 1);
        assert_eq!(c.tokens.load(Ordering::SeqCst), 15);
    }
}
