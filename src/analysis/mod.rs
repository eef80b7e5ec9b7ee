//! Remote layout analysis.
//!
//! ```text
//! document bytes ──▶ AnalysisService::submit ──▶ PendingAnalysis
//!                          │                         │
//!                          └── AnalysisGateway ◀─────┴─ await_result (bounded by polling timeout)
//!                                (retry / backoff)
//! ```
//!
//! [`AnalysisService`] is the narrow contract a layout-analysis backend must
//! fulfil; [`azure::LayoutClient`] is the REST implementation. The
//! [`gateway::AnalysisGateway`] wraps any service with the attempt budget,
//! polling timeout, and backoff schedule.

pub mod azure;
pub mod gateway;
pub mod result;

use crate::error::ServiceError;
use async_trait::async_trait;
use std::time::Duration;

pub use gateway::{AnalysisGateway, RetryPolicy};
pub use result::RawResult;

/// Handle for a submitted, not yet completed analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnalysis {
    /// Opaque operation identifier (for REST backends, the polling URL).
    pub operation: String,
}

/// A remote layout-analysis backend.
///
/// Each `submit` is a fresh request, so the gateway may resubmit the same
/// document after a failure.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Start analysing `document` with the given model.
    async fn submit(&self, document: &[u8], model_id: &str)
        -> Result<PendingAnalysis, ServiceError>;

    /// Wait for a submitted analysis to finish.
    ///
    /// `timeout` is the budget the gateway will enforce; implementations may
    /// use it to size their polling but need not stop on their own, the
    /// gateway cancels the future once it elapses.
    async fn await_result(
        &self,
        pending: &PendingAnalysis,
        timeout: Duration,
    ) -> Result<RawResult, ServiceError>;
}
