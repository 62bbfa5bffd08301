use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use locationkit_permission::SingleFlight;
use log::{debug, warn};
use tokio::sync::watch;

use crate::RequestConfig;

/// Whether the device location setting satisfies the active request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SettingsStatus {
    /// Nothing has been checked yet.
    #[default]
    Unknown,
    /// The setting satisfies the request.
    Satisfied,
    /// The setting does not satisfy the request.
    Unsatisfied,
}

impl SettingsStatus {
    /// Map an optional check result to a status. `None` means "not checked".
    #[must_use]
    pub const fn from_satisfied(satisfied: Option<bool>) -> Self {
        match satisfied {
            None => Self::Unknown,
            Some(true) => Self::Satisfied,
            Some(false) => Self::Unsatisfied,
        }
    }

    /// Returns `true` for [`SettingsStatus::Satisfied`].
    #[must_use]
    pub const fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// Satisfied if either side is, otherwise unsatisfied if either side is,
    /// otherwise unknown.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Satisfied, _) | (_, Self::Satisfied) => Self::Satisfied,
            (Self::Unsatisfied, _) | (_, Self::Unsatisfied) => Self::Unsatisfied,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
        }
    }

    /// Satisfied only if both sides are, unknown if both are unknown,
    /// unsatisfied otherwise.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Satisfied, Self::Satisfied) => Self::Satisfied,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
            _ => Self::Unsatisfied,
        }
    }
}

/// Opaque token that lets the settings authority show its resolution flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolutionHandle {
    id: u64,
    description: Option<String>,
}

impl ResolutionHandle {
    /// Wrap an authority-specific identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            description: None,
        }
    }

    /// Attach a human readable description, used in logs.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The authority-specific identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Result of checking the device settings against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsCheck {
    /// The request can be served as is.
    Satisfied,
    /// The user can fix the settings through the given resolution flow.
    Resolvable(ResolutionHandle),
    /// The settings cannot be fixed from the app.
    Unsatisfiable,
}

/// What the user did with a resolution flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionOutcome {
    /// The user enabled the setting.
    Accepted,
    /// The user declined or dismissed the flow.
    Refused,
}

/// Platform failures of the settings authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// The check reported a resolvable failure that cannot actually be
    /// resolved.
    #[error("unexpected resolution shape: {0}")]
    UnexpectedResolution(String),
    /// The settings service could not be reached.
    #[error("settings service unavailable: {0}")]
    Unavailable(String),
}

/// The platform settings-resolution service.
pub trait SettingsAuthority: Send + Sync {
    /// Check whether the current settings satisfy `config`.
    fn check_settings(
        &self,
        config: &RequestConfig,
    ) -> BoxFuture<'static, Result<SettingsCheck, SettingsError>>;

    /// Show the resolution flow behind `handle` and wait for the user.
    /// Dropping the future must release the pending flow callback.
    fn resolve(
        &self,
        handle: ResolutionHandle,
    ) -> BoxFuture<'static, Result<ResolutionOutcome, SettingsError>>;
}

/// Process-wide gatekeeper for the location setting.
///
/// Clones share the same status and the same in-flight resolution. Platform
/// failures never escape: they are logged and reported as
/// [`SettingsStatus::Unsatisfied`].
#[derive(Clone)]
pub struct SettingsGate {
    inner: Arc<SettingsInner>,
}

struct SettingsInner {
    authority: Arc<dyn SettingsAuthority>,
    status: watch::Sender<SettingsStatus>,
    flight: SingleFlight<SettingsStatus>,
}

impl SettingsInner {
    fn publish(&self, status: SettingsStatus) -> SettingsStatus {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                debug!("settings status {current:?} -> {status:?}");
                *current = status;
                true
            }
        });
        status
    }

    async fn query(&self, config: &RequestConfig) -> Result<SettingsCheck, SettingsError> {
        self.authority.check_settings(config).await
    }
}

impl SettingsGate {
    /// Create a gate over `authority`.
    pub fn new(authority: Arc<dyn SettingsAuthority>) -> Self {
        let (status, _) = watch::channel(SettingsStatus::Unknown);
        Self {
            inner: Arc::new(SettingsInner {
                authority,
                status,
                flight: SingleFlight::new(),
            }),
        }
    }

    /// Check the settings for `config` without prompting and publish the
    /// result.
    pub async fn check(&self, config: &RequestConfig) -> SettingsStatus {
        let status = match self.inner.query(config).await {
            Ok(SettingsCheck::Satisfied) => SettingsStatus::Satisfied,
            Ok(SettingsCheck::Resolvable(_) | SettingsCheck::Unsatisfiable) => {
                SettingsStatus::Unsatisfied
            }
            Err(err) => {
                warn!("settings check failed: {err}");
                SettingsStatus::Unsatisfied
            }
        };
        self.inner.publish(status)
    }

    /// Make the settings satisfy `config`, prompting when the platform offers
    /// a resolution flow.
    ///
    /// Unresolvable settings report [`SettingsStatus::Unsatisfied`] without
    /// prompting. Concurrent callers share one flow; dropping every waiter
    /// cancels it and leaves the status untouched.
    pub async fn request_enable(&self, config: &RequestConfig) -> SettingsStatus {
        let inner = Arc::clone(&self.inner);
        let config = config.clone();
        let pending = self.inner.flight.run(move || async move {
            let status = match inner.query(&config).await {
                Ok(SettingsCheck::Satisfied) => SettingsStatus::Satisfied,
                Ok(SettingsCheck::Resolvable(handle)) => {
                    debug!("settings resolution required: {handle:?}");
                    match inner.authority.resolve(handle).await {
                        Ok(ResolutionOutcome::Accepted) => SettingsStatus::Satisfied,
                        Ok(ResolutionOutcome::Refused) => SettingsStatus::Unsatisfied,
                        Err(err) => {
                            warn!("settings resolution failed: {err}");
                            SettingsStatus::Unsatisfied
                        }
                    }
                }
                Ok(SettingsCheck::Unsatisfiable) => SettingsStatus::Unsatisfied,
                Err(err) => {
                    warn!("settings check failed: {err}");
                    SettingsStatus::Unsatisfied
                }
            };
            inner.publish(status)
        });
        pending.await
    }

    /// Record that the setting stopped satisfying the request, e.g. after
    /// the user switched location off.
    pub fn mark_unsatisfied(&self) {
        self.inner.publish(SettingsStatus::Unsatisfied);
    }

    /// Whether a resolution flow is currently pending.
    #[must_use]
    pub fn is_resolving(&self) -> bool {
        self.inner.flight.in_flight()
    }

    /// The last published status.
    #[must_use]
    pub fn status(&self) -> SettingsStatus {
        *self.inner.status.borrow()
    }

    /// A live receiver of the published status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SettingsStatus> {
        self.inner.status.subscribe()
    }
}

impl fmt::Debug for SettingsGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsGate")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;

    struct ScriptedAuthority {
        check: Result<SettingsCheck, SettingsError>,
        resolution: Mutex<Option<Result<ResolutionOutcome, SettingsError>>>,
        resolves: AtomicUsize,
    }

    impl ScriptedAuthority {
        fn new(
            check: Result<SettingsCheck, SettingsError>,
            resolution: Option<Result<ResolutionOutcome, SettingsError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                check,
                resolution: Mutex::new(resolution),
                resolves: AtomicUsize::new(0),
            })
        }
    }

    impl SettingsAuthority for ScriptedAuthority {
        fn check_settings(
            &self,
            _config: &RequestConfig,
        ) -> BoxFuture<'static, Result<SettingsCheck, SettingsError>> {
            futures::future::ready(self.check.clone()).boxed()
        }

        fn resolve(
            &self,
            _handle: ResolutionHandle,
        ) -> BoxFuture<'static, Result<ResolutionOutcome, SettingsError>> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .resolution
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(Ok(ResolutionOutcome::Refused));
            futures::future::ready(outcome).boxed()
        }
    }

    fn resolvable() -> Result<SettingsCheck, SettingsError> {
        Ok(SettingsCheck::Resolvable(
            ResolutionHandle::new(1).with_description("enable gps"),
        ))
    }

    #[tokio::test]
    async fn satisfied_settings_never_prompt() {
        let authority = ScriptedAuthority::new(Ok(SettingsCheck::Satisfied), None);
        let gate = SettingsGate::new(authority.clone());
        let config = RequestConfig::default();

        assert_eq!(gate.request_enable(&config).await, SettingsStatus::Satisfied);
        assert_eq!(gate.status(), SettingsStatus::Satisfied);
        assert_eq!(authority.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accepted_resolution_satisfies() {
        let authority = ScriptedAuthority::new(resolvable(), Some(Ok(ResolutionOutcome::Accepted)));
        let gate = SettingsGate::new(authority.clone());
        let config = RequestConfig::default();

        assert_eq!(gate.check(&config).await, SettingsStatus::Unsatisfied);
        assert_eq!(authority.resolves.load(Ordering::SeqCst), 0);

        assert_eq!(gate.request_enable(&config).await, SettingsStatus::Satisfied);
        assert_eq!(authority.resolves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refused_resolution_is_unsatisfied() {
        let authority = ScriptedAuthority::new(resolvable(), Some(Ok(ResolutionOutcome::Refused)));
        let gate = SettingsGate::new(authority);
        let status = gate.request_enable(&RequestConfig::default()).await;
        assert_eq!(status, SettingsStatus::Unsatisfied);
    }

    #[tokio::test]
    async fn unresolvable_settings_skip_the_prompt() {
        let authority = ScriptedAuthority::new(Ok(SettingsCheck::Unsatisfiable), None);
        let gate = SettingsGate::new(authority.clone());
        let status = gate.request_enable(&RequestConfig::default()).await;
        assert_eq!(status, SettingsStatus::Unsatisfied);
        assert_eq!(authority.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn platform_failures_degrade_to_unsatisfied() {
        let shape = ScriptedAuthority::new(
            resolvable(),
            Some(Err(SettingsError::UnexpectedResolution(
                "not a resolvable exception".into(),
            ))),
        );
        let gate = SettingsGate::new(shape);
        assert_eq!(
            gate.request_enable(&RequestConfig::default()).await,
            SettingsStatus::Unsatisfied
        );

        let offline = ScriptedAuthority::new(Err(SettingsError::Unavailable("no service".into())), None);
        let gate = SettingsGate::new(offline);
        assert_eq!(
            gate.check(&RequestConfig::default()).await,
            SettingsStatus::Unsatisfied
        );
    }

    #[test]
    fn mark_unsatisfied_notifies_subscribers() {
        let gate = SettingsGate::new(ScriptedAuthority::new(Ok(SettingsCheck::Satisfied), None));
        let mut receiver = gate.subscribe();
        gate.mark_unsatisfied();
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), SettingsStatus::Unsatisfied);
    }

    #[test]
    fn status_combinators() {
        use SettingsStatus::{Satisfied, Unknown, Unsatisfied};
        assert_eq!(Satisfied.or(Unsatisfied), Satisfied);
        assert_eq!(Unknown.or(Unsatisfied), Unsatisfied);
        assert_eq!(Satisfied.and(Unknown), Unsatisfied);
        assert_eq!(Unknown.and(Unknown), Unknown);
        assert_eq!(SettingsStatus::from_satisfied(Some(true)), Satisfied);
    }
}
