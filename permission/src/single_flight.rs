use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};

/// Coalesces concurrent callers into one in-flight operation.
///
/// The first caller starts the operation; callers arriving while it is still
/// pending join it and receive the same result. Only a weak reference to the
/// operation is retained, so once every waiter has been dropped the operation
/// itself is dropped (cancelling whatever it was awaiting) and the next call
/// starts a fresh attempt.
pub struct SingleFlight<T: Clone> {
    slot: Mutex<Option<WeakShared<BoxFuture<'static, T>>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an idle coalescer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Join the in-flight operation, or start one with `start`.
    ///
    /// `start` is only invoked when nothing is pending.
    pub fn run<F, Fut>(&self, start: F) -> Shared<BoxFuture<'static, T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = slot.as_ref().and_then(WeakShared::upgrade) {
            if pending.peek().is_none() {
                return pending;
            }
        }

        let operation = start().boxed().shared();
        *slot = operation.downgrade();
        operation
    }

    /// Whether an operation is currently pending and still has waiters.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref()
            .and_then(WeakShared::upgrade)
            .is_some_and(|pending| pending.peek().is_none())
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::channel::oneshot;

    use super::SingleFlight;

    #[tokio::test]
    async fn concurrent_callers_share_one_operation() {
        let flight = SingleFlight::<u32>::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<u32>();

        let counter = Arc::clone(&starts);
        let first = flight.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { rx.await.unwrap_or(0) }
        });
        let counter = Arc::clone(&starts);
        let second = flight.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { 99 }
        });

        assert!(flight.in_flight());
        tx.send(7).unwrap();
        assert_eq!(first.await, 7);
        assert_eq!(second.await, 7);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_operation_is_not_reused() {
        let flight = SingleFlight::<u32>::new();
        let first = flight.run(|| async { 1 });
        assert_eq!(first.clone().await, 1);

        // `first` is still alive but finished, so a new attempt starts.
        let second = flight.run(|| async { 2 });
        assert_eq!(second.await, 2);
    }

    #[tokio::test]
    async fn dropping_every_waiter_cancels_the_operation() {
        let flight = SingleFlight::<u32>::new();
        let (tx, rx) = oneshot::channel::<u32>();

        let pending = flight.run(move || async move { rx.await.unwrap_or(0) });
        drop(pending);

        assert!(!flight.in_flight());
        assert!(tx.is_canceled());

        let fresh = flight.run(|| async { 5 });
        assert_eq!(fresh.await, 5);
    }
}
