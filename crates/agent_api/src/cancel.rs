use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared abort flag checked at every suspension point of a turn.
pub type CancelSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Marker returned when a cancellable wait observed the abort flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Drives `future` to completion unless `cancel` flips first.
///
/// The flag is polled every 25ms, so cancellation latency is bounded by the
/// poll interval rather than by the wrapped future.
pub async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, Cancelled>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(Cancelled);
            }
            return Ok(output);
        }
    }
}
