use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use futures::future;
use log::debug;
use tokio::sync::watch;

use crate::publisher::Publication;
use crate::{
    CapabilityFailure, CapabilityFailures, DisplacementFilter, Host, PermissionGate,
    PermissionStatus, ProviderRegistry, RequestConfig, SettingsGate, SettingsStatus,
    merged_stream,
};

/// Where the reconciliation state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipelineState {
    /// Not running: the host is outside its activation window.
    #[default]
    Idle,
    /// Checking or requesting permission, or waiting for it to change.
    AwaitingPermission,
    /// Checking or resolving the location setting, or waiting for it to
    /// change.
    AwaitingSettings,
    /// Registered with the providers and publishing fixes.
    Streaming,
    /// The configured number of fixes has been published.
    Completed,
}

/// Everything a pipeline run needs. Cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    config: Arc<RequestConfig>,
    permission: PermissionGate,
    settings: SettingsGate,
    providers: Arc<dyn ProviderRegistry>,
    host: Arc<dyn Host>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl PipelineContext {
    /// Bundle the gates, the host's providers and the configuration.
    pub fn new(
        config: Arc<RequestConfig>,
        permission: PermissionGate,
        settings: SettingsGate,
        host: Arc<dyn Host>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            config,
            permission,
            settings,
            providers: host.providers(),
            host,
            state: Arc::new(state),
        }
    }

    /// The request configuration.
    #[must_use]
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// The shared permission gate.
    #[must_use]
    pub const fn permission(&self) -> &PermissionGate {
        &self.permission
    }

    /// The shared settings gate.
    #[must_use]
    pub const fn settings(&self) -> &SettingsGate {
        &self.settings
    }

    /// A live receiver of the pipeline state.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: PipelineState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                debug!("pipeline {state:?} -> {next:?}");
                *state = next;
                true
            }
        });
    }
}

impl fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("permission", &self.permission)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

enum StreamEnd {
    Regressed,
    Completed,
}

/// Resets the published state when a run ends, including when it is
/// dropped mid-await.
struct IdleOnDrop(Arc<watch::Sender<PipelineState>>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(PipelineState::Idle);
    }
}

/// One activation of the reconciliation state machine.
///
/// A run walks `AwaitingPermission -> AwaitingSettings -> Streaming`, and
/// falls back to the matching awaiting state whenever a gate regresses. A
/// gate may prompt only the first time the run evaluates it; afterwards the
/// run only reacts to the gates' published status. Dropping the run releases
/// every provider registration and abandons any pending prompt.
pub struct Pipeline {
    ctx: PipelineContext,
    filter: DisplacementFilter,
    permission_evaluated: bool,
    settings_evaluated: bool,
    published: u32,
}

impl Pipeline {
    /// Prepare a fresh run.
    #[must_use]
    pub fn new(ctx: PipelineContext) -> Self {
        let filter = DisplacementFilter::from_config(&ctx.config);
        Self {
            ctx,
            filter,
            permission_evaluated: false,
            settings_evaluated: false,
            published: 0,
        }
    }

    /// Drive the state machine, publishing outcomes into `publication`.
    ///
    /// Never returns on its own; the owner stops it by dropping the future.
    pub async fn run(mut self, publication: Publication) {
        let _idle = IdleOnDrop(Arc::clone(&self.ctx.state));
        let mut permission_rx = self.ctx.permission.subscribe();
        let mut settings_rx = self.ctx.settings.subscribe();

        loop {
            self.ctx.set_state(PipelineState::AwaitingPermission);
            self.resolve_permission().await;
            let permission = *permission_rx.borrow_and_update();
            if !permission.is_granted() {
                let mut failures = CapabilityFailures::new(CapabilityFailure::PermissionDenied);
                if *settings_rx.borrow_and_update() == SettingsStatus::Unsatisfied {
                    failures = failures.with(CapabilityFailure::SettingsUnsatisfied);
                }
                publication.fail(failures);
                wait_for_change(&mut permission_rx, &mut settings_rx).await;
                continue;
            }

            self.ctx.set_state(PipelineState::AwaitingSettings);
            self.resolve_settings().await;
            let settings = *settings_rx.borrow_and_update();
            if !settings.is_satisfied() {
                publication.fail(CapabilityFailure::SettingsUnsatisfied.into());
                wait_for_change(&mut permission_rx, &mut settings_rx).await;
                continue;
            }

            self.ctx.set_state(PipelineState::Streaming);
            match self
                .stream(&publication, &mut permission_rx, &mut settings_rx)
                .await
            {
                StreamEnd::Regressed => {}
                StreamEnd::Completed => {
                    self.ctx.set_state(PipelineState::Completed);
                    future::pending::<()>().await;
                }
            }
        }
    }

    async fn resolve_permission(&mut self) -> PermissionStatus {
        let may_prompt = self.ctx.config.request_permissions && !self.permission_evaluated;
        self.permission_evaluated = true;

        let gate = &self.ctx.permission;
        if !may_prompt || gate.has_permissions() {
            return gate.check();
        }
        if gate.should_show_rationale() {
            debug!("showing permission rationale");
            self.ctx.host.show_rationale(&self.ctx.config.rationale).await;
        }
        gate.request().await
    }

    async fn resolve_settings(&mut self) -> SettingsStatus {
        let may_prompt = self.ctx.config.request_enable_settings && !self.settings_evaluated;
        self.settings_evaluated = true;

        let gate = &self.ctx.settings;
        if may_prompt {
            gate.request_enable(&self.ctx.config).await
        } else {
            gate.check(&self.ctx.config).await
        }
    }

    async fn stream(
        &mut self,
        publication: &Publication,
        permission_rx: &mut watch::Receiver<PermissionStatus>,
        settings_rx: &mut watch::Receiver<SettingsStatus>,
    ) -> StreamEnd {
        let mut fixes = merged_stream(&self.ctx.providers, &self.ctx.config);
        let mut exhausted = false;
        self.filter.reset();

        loop {
            // Gate changes are polled before fixes, so a fix queued behind a
            // regression is never published.
            tokio::select! {
                biased;

                () = changed(permission_rx) => {
                    if !permission_rx.borrow_and_update().is_granted() {
                        return StreamEnd::Regressed;
                    }
                }
                () = changed(settings_rx) => {
                    if !settings_rx.borrow_and_update().is_satisfied() {
                        return StreamEnd::Regressed;
                    }
                }
                next = fixes.next(), if !exhausted => match next {
                    Some(Ok(fix)) => {
                        if !self.gates_hold() {
                            return StreamEnd::Regressed;
                        }
                        if !self.filter.accept(&fix) {
                            continue;
                        }
                        publication.fix(fix);
                        self.published = self.published.saturating_add(1);
                        if self.published >= self.ctx.config.num_updates {
                            debug!("published {} fixes, releasing providers", self.published);
                            return StreamEnd::Completed;
                        }
                    }
                    Some(Err(failure)) => {
                        debug!("provider reported {failure}");
                        if !self.ctx.permission.check().is_granted() {
                            return StreamEnd::Regressed;
                        }
                    }
                    None => {
                        debug!("every provider stream ended");
                        exhausted = true;
                    }
                },
            }
        }
    }

    /// Both gates currently report the capability as available.
    fn gates_hold(&self) -> bool {
        self.ctx.permission.status().is_granted() && self.ctx.settings.status().is_satisfied()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("published", &self.published)
            .field("last", &self.filter.last())
            .finish_non_exhaustive()
    }
}

/// Resolves on the next change; never resolves once the sender is gone.
async fn changed<T>(receiver: &mut watch::Receiver<T>) {
    if receiver.changed().await.is_err() {
        future::pending::<()>().await;
    }
}

async fn wait_for_change(
    permission_rx: &mut watch::Receiver<PermissionStatus>,
    settings_rx: &mut watch::Receiver<SettingsStatus>,
) {
    tokio::select! {
        () = changed(permission_rx) => {}
        () = changed(settings_rx) => {}
    }
}
