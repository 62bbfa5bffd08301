use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{PermissionAuthority, ProviderRegistry, SettingsAuthority};

/// Lifecycle state of the host screen, ordered from dead to fully active.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// The host is gone for good.
    Destroyed,
    /// The host exists but has not been created yet.
    #[default]
    Initialized,
    /// Created, not visible.
    Created,
    /// Visible.
    Started,
    /// Visible and in the foreground.
    Resumed,
}

impl LifecycleState {
    /// Whether this state is `state` or a more active one.
    #[must_use]
    pub const fn is_at_least(self, state: Self) -> bool {
        self as u8 >= state as u8
    }
}

/// A lifecycle transition reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Entered [`LifecycleState::Created`].
    Create,
    /// Entered [`LifecycleState::Started`].
    Start,
    /// Entered [`LifecycleState::Resumed`].
    Resume,
    /// Left [`LifecycleState::Resumed`].
    Pause,
    /// Left [`LifecycleState::Started`].
    Stop,
    /// Entered [`LifecycleState::Destroyed`].
    Destroy,
}

impl LifecycleEvent {
    /// The state the host is in right after this event.
    #[must_use]
    pub const fn target_state(self) -> LifecycleState {
        match self {
            Self::Create | Self::Stop => LifecycleState::Created,
            Self::Start | Self::Pause => LifecycleState::Started,
            Self::Resume => LifecycleState::Resumed,
            Self::Destroy => LifecycleState::Destroyed,
        }
    }
}

/// Observable lifecycle of a host screen.
///
/// The host feeds events in; the fetcher watches the resulting state. Clones
/// share the same state. Once destroyed, further events are ignored.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    /// A lifecycle in [`LifecycleState::Initialized`].
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Initialized);
        Self {
            state: Arc::new(state),
        }
    }

    /// Apply a host event.
    pub fn handle_event(&self, event: LifecycleEvent) {
        self.state.send_if_modified(|state| {
            let next = event.target_state();
            if *state == LifecycleState::Destroyed || *state == next {
                return false;
            }
            debug!("lifecycle {state:?} -> {next:?} on {event:?}");
            *state = next;
            true
        });
    }

    /// The current state.
    #[must_use]
    pub fn current_state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// A live receiver of the state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// The host a fetcher is attached to.
///
/// Bundles the platform collaborators the pipeline needs. A fetcher resolves
/// them once at construction.
pub trait Host: Send + Sync {
    /// The permission subsystem.
    fn permissions(&self) -> Arc<dyn PermissionAuthority>;

    /// The settings-resolution service.
    fn settings(&self) -> Arc<dyn SettingsAuthority>;

    /// The location providers.
    fn providers(&self) -> Arc<dyn ProviderRegistry>;

    /// The lifecycle of the owning screen.
    fn lifecycle(&self) -> Lifecycle;

    /// Explain why location access is needed; completes once dismissed.
    fn show_rationale(&self, _rationale: &str) -> BoxFuture<'static, ()> {
        future::ready(()).boxed()
    }
}
