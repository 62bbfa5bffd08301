use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::{Permission, PermissionAuthority, PermissionStatus, SingleFlight};

/// Process-wide gatekeeper for the location permission set.
///
/// Clones share the same status and the same in-flight prompt, so a gate is
/// created once and handed to every consumer that needs it.
#[derive(Clone)]
pub struct PermissionGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    authority: Arc<dyn PermissionAuthority>,
    permissions: Vec<Permission>,
    status: watch::Sender<PermissionStatus>,
    flight: SingleFlight<PermissionStatus>,
}

impl GateInner {
    fn publish(&self, status: PermissionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!("permission status {current:?} -> {status:?}");
                *current = status;
                true
            }
        });
    }

    fn refresh(&self) -> PermissionStatus {
        let status = PermissionStatus::from(self.authority.has_permissions(&self.permissions));
        self.publish(status);
        status
    }
}

impl PermissionGate {
    /// Create a gate over [`Permission::LOCATION`].
    pub fn new(authority: Arc<dyn PermissionAuthority>) -> Self {
        Self::with_permissions(authority, Permission::LOCATION.to_vec())
    }

    /// Create a gate over a custom permission set.
    pub fn with_permissions(
        authority: Arc<dyn PermissionAuthority>,
        permissions: Vec<Permission>,
    ) -> Self {
        let (status, _) = watch::channel(PermissionStatus::Unknown);
        Self {
            inner: Arc::new(GateInner {
                authority,
                permissions,
                status,
                flight: SingleFlight::new(),
            }),
        }
    }

    /// The permission set this gate guards.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        &self.inner.permissions
    }

    /// Whether the authority currently grants every permission. Does not
    /// touch the published status.
    #[must_use]
    pub fn has_permissions(&self) -> bool {
        self.inner.authority.has_permissions(&self.inner.permissions)
    }

    /// Query the authority and publish the result.
    pub fn check(&self) -> PermissionStatus {
        self.inner.refresh()
    }

    /// Prompt the user for the permission set.
    ///
    /// Concurrent callers share one prompt. A prompt error is logged and the
    /// status is re-read from the authority, which usually yields
    /// [`PermissionStatus::Denied`]. Dropping every waiter cancels the prompt
    /// and leaves the status untouched.
    pub async fn request(&self) -> PermissionStatus {
        let inner = Arc::clone(&self.inner);
        let pending = self.inner.flight.run(move || async move {
            debug!("requesting permissions {:?}", inner.permissions);
            match inner.authority.request_permissions(&inner.permissions).await {
                Ok(results) => debug!("permission results {results:?}"),
                Err(err) => warn!("permission request failed: {err}"),
            }
            inner.refresh()
        });
        pending.await
    }

    /// Whether the host should explain the request before prompting.
    #[must_use]
    pub fn should_show_rationale(&self) -> bool {
        self.inner
            .authority
            .should_show_rationale(&self.inner.permissions)
    }

    /// Whether a prompt is currently pending.
    #[must_use]
    pub fn is_requesting(&self) -> bool {
        self.inner.flight.in_flight()
    }

    /// The last published status.
    #[must_use]
    pub fn status(&self) -> PermissionStatus {
        *self.inner.status.borrow()
    }

    /// A live receiver of the published status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PermissionStatus> {
        self.inner.status.subscribe()
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("permissions", &self.inner.permissions)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
