use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_channel::{Sender, unbounded};
use futures::stream::{self, BoxStream, SelectAll};
use futures::{Stream, StreamExt};
use log::{debug, warn};

use crate::{CapabilityFailure, LocationFix, Provider, RequestConfig};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one provider registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Push endpoint handed to a provider registration.
///
/// Platform callbacks call [`FixSink::send`] from whatever thread they run
/// on; the fix is queued for the consuming stream. Sending never blocks.
#[derive(Clone)]
pub struct FixSink {
    sender: Sender<LocationFix>,
    provider: Provider,
}

impl FixSink {
    /// Queue a fix. Returns `false` if the consumer is gone and the fix was
    /// dropped.
    pub fn send(&self, fix: LocationFix) -> bool {
        match self.sender.try_send(fix) {
            Ok(()) => true,
            Err(err) => {
                warn!("dropping {} location fix: {err}", self.provider);
                false
            }
        }
    }

    /// Whether the consuming stream has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// The provider this sink belongs to.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }
}

impl fmt::Debug for FixSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixSink")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Errors raised when registering with a provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The platform refused the registration for lack of permission.
    #[error("location permission missing at registration")]
    PermissionDenied,
    /// The provider does not exist on this device.
    #[error("provider {0} is not supported on this device")]
    Unsupported(Provider),
    /// Any other platform failure.
    #[error("provider failure: {0}")]
    Other(String),
}

/// The platform location providers.
pub trait ProviderRegistry: Send + Sync {
    /// Start delivering fixes from `provider` into `sink`.
    ///
    /// `handle` identifies the registration; it is passed to
    /// [`ProviderRegistry::stop_updates`] exactly once, whether or not this
    /// call succeeds.
    ///
    /// # Errors
    /// Returns a [`ProviderError`] if the registration was refused.
    fn start_updates(
        &self,
        handle: SubscriptionHandle,
        provider: Provider,
        config: &RequestConfig,
        sink: FixSink,
    ) -> Result<(), ProviderError>;

    /// Stop the registration identified by `handle`. Must tolerate handles
    /// whose registration failed.
    fn stop_updates(&self, handle: SubscriptionHandle);
}

struct Registration {
    registry: Arc<dyn ProviderRegistry>,
    handle: SubscriptionHandle,
    provider: Provider,
}

impl Drop for Registration {
    fn drop(&mut self) {
        debug!("stopping {} updates ({:?})", self.provider, self.handle);
        self.registry.stop_updates(self.handle);
    }
}

/// Fixes from a single provider.
///
/// Creating the stream registers with the provider; dropping it unregisters,
/// on every path. A registration refused for lack of permission yields a
/// single [`CapabilityFailure::PermissionDenied`] and ends; any other
/// refusal yields an empty stream.
pub struct ProviderStream {
    provider: Provider,
    fixes: BoxStream<'static, Result<LocationFix, CapabilityFailure>>,
    registration: Registration,
}

impl ProviderStream {
    /// Register with `provider` using `config`.
    pub fn start(
        registry: Arc<dyn ProviderRegistry>,
        provider: Provider,
        config: &RequestConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let handle = SubscriptionHandle::next();
        // Armed before registering so a failed or panicking registration is
        // still released.
        let registration = Registration {
            registry: Arc::clone(&registry),
            handle,
            provider,
        };

        let sink = FixSink { sender, provider };
        let fixes = match registry.start_updates(handle, provider, config, sink) {
            Ok(()) => {
                debug!("started {provider} updates ({handle:?})");
                receiver.map(Ok).boxed()
            }
            Err(ProviderError::PermissionDenied) => {
                warn!("{provider} registration refused: permission missing");
                stream::iter([Err(CapabilityFailure::PermissionDenied)]).boxed()
            }
            Err(err) => {
                warn!("{provider} contributes no fixes: {err}");
                stream::empty().boxed()
            }
        };

        Self {
            provider,
            fixes,
            registration,
        }
    }

    /// The provider behind this stream.
    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }
}

impl Stream for ProviderStream {
    type Item = Result<LocationFix, CapabilityFailure>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.fixes.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ProviderStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderStream")
            .field("provider", &self.provider)
            .field("handle", &self.registration.handle)
            .finish_non_exhaustive()
    }
}

/// Register with every provider in `config` and interleave their fixes by
/// arrival. An empty provider list yields a stream that ends immediately.
pub fn merged_stream(
    registry: &Arc<dyn ProviderRegistry>,
    config: &RequestConfig,
) -> SelectAll<ProviderStream> {
    stream::select_all(
        config
            .providers
            .iter()
            .map(|provider| ProviderStream::start(Arc::clone(registry), *provider, config)),
    )
}
