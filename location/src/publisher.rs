use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::{Stream, stream};
use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{
    CapabilityFailures, Lifecycle, LifecycleState, LocationError, LocationFix, PipelineOutcome,
};

/// Write side of the replayed outcome, handed to each pipeline run.
#[derive(Debug, Clone)]
pub struct Publication {
    outcome: Arc<watch::Sender<Option<PipelineOutcome>>>,
}

impl Publication {
    /// Publish an accepted fix. Every fix notifies subscribers.
    pub fn fix(&self, fix: LocationFix) {
        self.outcome.send_replace(Some(Ok(fix)));
    }

    /// Publish failures. Repeating the current failures is a no-op.
    pub fn fail(&self, failures: CapabilityFailures) {
        self.outcome.send_if_modified(|current| {
            let next = Some(Err(failures));
            if *current == next {
                false
            } else {
                debug!("publishing {next:?}");
                *current = next;
                true
            }
        });
    }

    /// Publish `outcome` unless it is already the current one.
    pub(crate) fn replace(&self, outcome: PipelineOutcome) {
        self.outcome.send_if_modified(|current| {
            let next = Some(outcome);
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// The outcome currently replayed to new subscribers.
    #[must_use]
    pub fn latest(&self) -> Option<PipelineOutcome> {
        self.outcome.borrow().clone()
    }

    /// A receiver replaying the latest outcome.
    #[must_use]
    pub fn subscribe(&self) -> OutcomeReceiver {
        OutcomeReceiver::new(self.outcome.subscribe())
    }
}

/// An empty publication and a receiver for it.
pub(crate) fn channel() -> (Publication, OutcomeReceiver) {
    let (outcome, receiver) = watch::channel(None);
    let publication = Publication {
        outcome: Arc::new(outcome),
    };
    (publication, OutcomeReceiver::new(receiver))
}

/// Read side of a [`LifecyclePublisher`].
///
/// A fresh receiver first yields the latest outcome, if any, then every
/// later one. Slow receivers skip intermediate outcomes and only observe the
/// most recent. Clones start over with the latest outcome.
#[derive(Debug)]
pub struct OutcomeReceiver {
    receiver: watch::Receiver<Option<PipelineOutcome>>,
    replay: bool,
}

impl OutcomeReceiver {
    fn new(receiver: watch::Receiver<Option<PipelineOutcome>>) -> Self {
        let replay = receiver.borrow().is_some();
        Self { receiver, replay }
    }

    /// The latest outcome, without waiting.
    #[must_use]
    pub fn latest(&self) -> Option<PipelineOutcome> {
        self.receiver.borrow().clone()
    }

    /// Wait for the outcome to change and return it.
    ///
    /// # Errors
    /// Returns [`LocationError::Closed`] once the publisher is gone.
    pub async fn changed(&mut self) -> Result<Option<PipelineOutcome>, LocationError> {
        self.replay = false;
        self.receiver
            .changed()
            .await
            .map_err(|_| LocationError::Closed)?;
        let latest = self.receiver.borrow_and_update().clone();
        Ok(latest)
    }

    /// The next outcome: the replayed one first, then each new one. `None`
    /// once the publisher is gone.
    pub async fn next(&mut self) -> Option<PipelineOutcome> {
        if std::mem::take(&mut self.replay) {
            let latest = self.receiver.borrow_and_update().clone();
            if latest.is_some() {
                return latest;
            }
        }
        loop {
            self.receiver.changed().await.ok()?;
            let latest = self.receiver.borrow_and_update().clone();
            if latest.is_some() {
                return latest;
            }
        }
    }

    /// Turn the receiver into a stream of outcomes.
    pub fn into_stream(self) -> impl Stream<Item = PipelineOutcome> + Send + 'static {
        stream::unfold(self, |mut receiver| async move {
            let outcome = receiver.next().await?;
            Some((outcome, receiver))
        })
    }
}

impl Clone for OutcomeReceiver {
    fn clone(&self) -> Self {
        Self::new(self.receiver.clone())
    }
}

struct PublisherInner {
    publication: Publication,
    active: AtomicBool,
    activations: AtomicUsize,
}

/// Runs a pipeline only while a lifecycle is inside its activation window,
/// and replays the latest outcome to every subscriber.
///
/// Entering the window (state at least `activation`) starts a fresh run;
/// leaving it drops the run, which releases everything it holds. The last
/// outcome survives deactivation and is replayed to later subscribers.
/// Destroying the lifecycle or dropping the publisher stops it for good.
pub struct LifecyclePublisher {
    inner: Arc<PublisherInner>,
    driver: JoinHandle<()>,
}

impl LifecyclePublisher {
    /// Start following `lifecycle`, calling `factory` for each activation.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(lifecycle: &Lifecycle, activation: LifecycleState, factory: F) -> Self
    where
        F: FnMut(Publication) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (publication, _) = channel();
        let inner = Arc::new(PublisherInner {
            publication,
            active: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
        });
        let driver = tokio::spawn(drive(
            lifecycle.subscribe(),
            activation,
            Arc::clone(&inner),
            factory,
        ));
        Self { inner, driver }
    }

    /// A receiver that replays the latest outcome.
    #[must_use]
    pub fn subscribe(&self) -> OutcomeReceiver {
        self.inner.publication.subscribe()
    }

    /// The latest outcome, if any.
    #[must_use]
    pub fn latest(&self) -> Option<PipelineOutcome> {
        self.inner.publication.latest()
    }

    /// Whether a run is currently in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// How many runs have been started so far.
    #[must_use]
    pub fn activations(&self) -> usize {
        self.inner.activations.load(Ordering::Acquire)
    }
}

impl Drop for LifecyclePublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl std::fmt::Debug for LifecyclePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecyclePublisher")
            .field("active", &self.is_active())
            .field("activations", &self.activations())
            .field("latest", &self.latest())
            .finish_non_exhaustive()
    }
}

async fn wait_until(
    lifecycle: &mut watch::Receiver<LifecycleState>,
    predicate: impl FnMut(&LifecycleState) -> bool,
) -> Option<LifecycleState> {
    lifecycle.wait_for(predicate).await.ok().map(|state| *state)
}

async fn drive<F, Fut>(
    mut lifecycle: watch::Receiver<LifecycleState>,
    activation: LifecycleState,
    inner: Arc<PublisherInner>,
    mut factory: F,
) where
    F: FnMut(Publication) -> Fut,
    Fut: Future<Output = ()>,
{
    let inside = move |state: &LifecycleState| state.is_at_least(activation);

    loop {
        let entered = wait_until(&mut lifecycle, |state| {
            inside(state) || *state == LifecycleState::Destroyed
        })
        .await;
        let Some(state) = entered else { break };
        if state == LifecycleState::Destroyed {
            break;
        }

        let run = inner.activations.fetch_add(1, Ordering::AcqRel) + 1;
        inner.active.store(true, Ordering::Release);
        debug!("activation {run} at {state:?}");

        let pipeline = factory(inner.publication.clone());
        let finished = tokio::select! {
            () = pipeline => true,
            _ = wait_until(&mut lifecycle, |state| !inside(state)) => false,
        };
        // The pipeline future is gone from here on.
        inner.active.store(false, Ordering::Release);
        debug!("deactivated run {run}");

        if finished && wait_until(&mut lifecycle, |state| !inside(state)).await.is_none() {
            break;
        }
    }
    debug!("lifecycle publisher stopped");
}
