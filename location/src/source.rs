use futures::future;
use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::publisher::{self, Publication};
use crate::{LocationFix, OutcomeReceiver, PipelineOutcome};

/// Which location a [`LocationSource`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Source {
    /// Fixes from the device providers.
    #[default]
    Real,
    /// The manually set custom location.
    Custom,
}

/// A location feed that can be switched to a manually set position.
///
/// Wraps the outcomes of a fetcher and replays the selected one. While
/// [`Source::Custom`] is selected and no custom location has been set,
/// nothing new is reported.
#[derive(Debug)]
pub struct LocationSource {
    real: OutcomeReceiver,
    custom: watch::Sender<Option<LocationFix>>,
    preferred: watch::Sender<Source>,
    selected: Publication,
    task: JoinHandle<()>,
}

impl LocationSource {
    /// Follow `real`, reporting it until another source is preferred.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(real: OutcomeReceiver) -> Self {
        let (custom, _) = watch::channel(None);
        let (preferred, _) = watch::channel(Source::Real);
        let (selected, _) = publisher::channel();
        let task = tokio::spawn(forward(
            real.clone(),
            custom.subscribe(),
            preferred.subscribe(),
            selected.clone(),
        ));
        Self {
            real,
            custom,
            preferred,
            selected,
            task,
        }
    }

    /// Set the custom location.
    pub fn set_custom_location(&self, fix: LocationFix) {
        self.custom.send_replace(Some(fix));
    }

    /// The custom location, if set.
    #[must_use]
    pub fn custom_location(&self) -> Option<LocationFix> {
        self.custom.borrow().clone()
    }

    /// Choose which location is reported.
    pub fn set_preferred_source(&self, source: Source) {
        self.preferred.send_if_modified(|current| {
            let changed = *current != source;
            *current = source;
            changed
        });
    }

    /// The currently selected source.
    #[must_use]
    pub fn preferred_source(&self) -> Source {
        *self.preferred.borrow()
    }

    /// Outcomes from the device providers, regardless of preference.
    #[must_use]
    pub fn real_location(&self) -> OutcomeReceiver {
        self.real.clone()
    }

    /// Outcomes from the selected source.
    #[must_use]
    pub fn location(&self) -> OutcomeReceiver {
        self.selected.subscribe()
    }
}

impl Drop for LocationSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn changed<T>(receiver: &mut watch::Receiver<T>) {
    if receiver.changed().await.is_err() {
        future::pending::<()>().await;
    }
}

fn publish(selected: &Publication, outcome: PipelineOutcome) {
    match outcome {
        Ok(fix) => selected.fix(fix),
        Err(failures) => selected.fail(failures),
    }
}

async fn forward(
    mut real: OutcomeReceiver,
    mut custom: watch::Receiver<Option<LocationFix>>,
    mut preferred: watch::Receiver<Source>,
    selected: Publication,
) {
    let mut real_open = true;
    loop {
        tokio::select! {
            outcome = real.next(), if real_open => match outcome {
                Some(outcome) => {
                    let source = *preferred.borrow();
                    if source == Source::Real {
                        publish(&selected, outcome);
                    }
                }
                None => {
                    debug!("real location feed closed");
                    real_open = false;
                }
            },
            () = changed(&mut custom) => {
                let fix = custom.borrow_and_update().clone();
                let source = *preferred.borrow();
                if let (Source::Custom, Some(fix)) = (source, fix) {
                    selected.replace(Ok(fix));
                }
            }
            () = changed(&mut preferred) => {
                let source = *preferred.borrow_and_update();
                debug!("location source switched to {source:?}");
                let outcome = match source {
                    Source::Real => real.latest(),
                    Source::Custom => custom.borrow().clone().map(Ok),
                };
                if let Some(outcome) = outcome {
                    selected.replace(outcome);
                }
            }
        }
    }
}
