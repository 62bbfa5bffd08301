use std::sync::Arc;

use log::debug;
use tokio::sync::watch;

use crate::{
    Host, LifecyclePublisher, LocationError, OutcomeReceiver, PermissionAuthority, PermissionGate,
    PermissionStatus, Pipeline, PipelineContext, PipelineOutcome, PipelineState, RequestConfig,
    SettingsAuthority, SettingsGate, SettingsStatus,
};

/// The process-wide capability state shared by every fetcher.
///
/// Build it once and hand clones to each [`LocationFetcher`]; fetchers built
/// from the same gates share one permission prompt and one settings flow at
/// a time, and observe each other's results.
#[derive(Debug, Clone)]
pub struct SharedGates {
    permission: PermissionGate,
    settings: SettingsGate,
}

impl SharedGates {
    /// Gates over the given authorities.
    pub fn new(
        permissions: Arc<dyn PermissionAuthority>,
        settings: Arc<dyn SettingsAuthority>,
    ) -> Self {
        Self {
            permission: PermissionGate::new(permissions),
            settings: SettingsGate::new(settings),
        }
    }

    /// Gates over the authorities of `host`.
    pub fn for_host(host: &dyn Host) -> Self {
        Self::new(host.permissions(), host.settings())
    }

    /// The permission gate.
    #[must_use]
    pub const fn permission(&self) -> &PermissionGate {
        &self.permission
    }

    /// The settings gate.
    #[must_use]
    pub const fn settings(&self) -> &SettingsGate {
        &self.settings
    }
}

/// Lifecycle-aware location updates for one host screen.
///
/// The fetcher starts its pipeline whenever the host lifecycle reaches
/// [`RequestConfig::activation`] and stops it when the host falls below it.
/// Every subscriber of [`LocationFetcher::location`] sees the same outcomes
/// and immediately receives the latest one.
#[derive(Debug)]
pub struct LocationFetcher {
    ctx: PipelineContext,
    publisher: LifecyclePublisher,
}

impl LocationFetcher {
    /// Attach a fetcher to `host`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns [`LocationError::Config`] if `config` is invalid.
    pub fn new(
        host: Arc<dyn Host>,
        shared: &SharedGates,
        config: RequestConfig,
    ) -> Result<Self, LocationError> {
        let config = Arc::new(config.validated()?);
        let lifecycle = host.lifecycle();
        let activation = config.activation;
        debug!("location fetcher active from {activation:?}: {config:?}");

        let ctx = PipelineContext::new(
            config,
            shared.permission.clone(),
            shared.settings.clone(),
            host,
        );
        let factory_ctx = ctx.clone();
        let publisher = LifecyclePublisher::spawn(&lifecycle, activation, move |publication| {
            Pipeline::new(factory_ctx.clone()).run(publication)
        });

        Ok(Self { ctx, publisher })
    }

    /// Location outcomes, starting with the latest one.
    #[must_use]
    pub fn location(&self) -> OutcomeReceiver {
        self.publisher.subscribe()
    }

    /// The latest outcome, if any.
    #[must_use]
    pub fn latest(&self) -> Option<PipelineOutcome> {
        self.publisher.latest()
    }

    /// Live permission status.
    #[must_use]
    pub fn permission_status(&self) -> watch::Receiver<PermissionStatus> {
        self.ctx.permission().subscribe()
    }

    /// Live settings status.
    #[must_use]
    pub fn settings_status(&self) -> watch::Receiver<SettingsStatus> {
        self.ctx.settings().subscribe()
    }

    /// Live pipeline state.
    #[must_use]
    pub fn pipeline_state(&self) -> watch::Receiver<PipelineState> {
        self.ctx.subscribe_state()
    }

    /// Prompt for the location permissions, sharing any prompt in flight.
    pub async fn request_location_permissions(&self) -> PermissionStatus {
        self.ctx.permission().request().await
    }

    /// Prompt to fix the location setting for this fetcher's request,
    /// sharing any flow in flight.
    pub async fn request_enable_location_settings(&self) -> SettingsStatus {
        self.ctx.settings().request_enable(self.ctx.config()).await
    }

    /// Whether the platform recommends explaining the permission first.
    #[must_use]
    pub fn should_show_rationale(&self) -> bool {
        self.ctx.permission().should_show_rationale()
    }

    /// Whether the pipeline is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.publisher.is_active()
    }

    /// How many times the pipeline has been started.
    #[must_use]
    pub fn activations(&self) -> usize {
        self.publisher.activations()
    }

    /// The validated request configuration.
    #[must_use]
    pub fn config(&self) -> &RequestConfig {
        self.ctx.config()
    }
}
