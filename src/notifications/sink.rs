//! Sink abstraction for lifecycle events.
//!
//! A sink receives every event the engine emits. Sinks are best effort:
//! a failing sink is logged by the hub and never changes execution state.

use async_trait::async_trait;

use crate::jobs::JobResult;
use crate::notifications::event::JobEvent;

/// Destination for job lifecycle events (UI gateway, log, webhook, ...)
///
/// # Example Implementation
/// ```ignore
/// struct Counter(AtomicUsize);
///
/// #[async_trait]
/// impl NotificationSink for Counter {
///     async fn publish(&self, _event: &JobEvent) -> JobResult<()> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "counter"
///     }
/// }
/// ```
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Delivers one event
    ///
    /// Implementations that talk to remote systems should not hold the
    /// caller for the full round trip.
    async fn publish(&self, event: &JobEvent) -> JobResult<()>;

    /// Sink name for logging
    fn name(&self) -> &'static str;
}
