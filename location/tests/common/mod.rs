//! Scriptable platform fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::watch;

use locationkit_location::{
    FixSink, Host, Lifecycle, LifecycleEvent, LocationFix, OutcomeReceiver, Permission,
    PermissionAuthority, PermissionError, PipelineOutcome, Provider, ProviderError,
    ProviderRegistry, RequestConfig, ResolutionHandle, ResolutionOutcome, SettingsAuthority,
    SettingsCheck, SettingsError, SubscriptionHandle,
};

/// Metres per degree of latitude on the mean Earth sphere.
pub const METRES_PER_DEGREE: f64 = 111_194.93;

// ============================================================================
// Permissions
// ============================================================================

pub struct FakePermissions {
    granted: Arc<AtomicBool>,
    rationale: AtomicBool,
    answer: watch::Sender<Option<bool>>,
    pub prompts: AtomicUsize,
}

impl FakePermissions {
    /// Permissions currently `granted`; prompts answer with `answer` unless
    /// held.
    pub fn new(granted: bool, answer: bool) -> Arc<Self> {
        let (answer, _) = watch::channel(Some(answer));
        Arc::new(Self {
            granted: Arc::new(AtomicBool::new(granted)),
            rationale: AtomicBool::new(false),
            answer,
            prompts: AtomicUsize::new(0),
        })
    }

    /// Keep prompts pending until [`FakePermissions::answer_with`].
    pub fn hold_answers(&self) {
        self.answer.send_replace(None);
    }

    pub fn answer_with(&self, grant: bool) {
        self.answer.send_replace(Some(grant));
    }

    /// Change the platform grant without going through a prompt.
    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn set_rationale(&self, show: bool) {
        self.rationale.store(show, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl PermissionAuthority for FakePermissions {
    fn has_permissions(&self, _permissions: &[Permission]) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request_permissions(
        &self,
        permissions: &[Permission],
    ) -> BoxFuture<'static, Result<HashMap<Permission, bool>, PermissionError>> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut answer = self.answer.subscribe();
        let granted = Arc::clone(&self.granted);
        let permissions = permissions.to_vec();
        async move {
            let answered = answer.wait_for(Option::is_some).await;
            let Some(grant) = answered.ok().and_then(|answer| *answer) else {
                return Err(PermissionError::Cancelled);
            };
            granted.store(grant, Ordering::SeqCst);
            let results: HashMap<Permission, bool> =
                permissions.into_iter().map(|p| (p, grant)).collect();
            Ok(results)
        }
        .boxed()
    }

    fn should_show_rationale(&self, _permissions: &[Permission]) -> bool {
        self.rationale.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Settings
// ============================================================================

pub struct FakeSettings {
    enabled: Arc<AtomicBool>,
    resolvable: AtomicBool,
    resolution: Mutex<ResolutionOutcome>,
    pub checks: AtomicUsize,
    pub resolves: AtomicUsize,
}

impl FakeSettings {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            resolvable: AtomicBool::new(true),
            resolution: Mutex::new(ResolutionOutcome::Accepted),
            checks: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_resolvable(&self, resolvable: bool) {
        self.resolvable.store(resolvable, Ordering::SeqCst);
    }

    pub fn set_resolution(&self, outcome: ResolutionOutcome) {
        *self.resolution.lock().unwrap() = outcome;
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

impl SettingsAuthority for FakeSettings {
    fn check_settings(
        &self,
        _config: &RequestConfig,
    ) -> BoxFuture<'static, Result<SettingsCheck, SettingsError>> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let check = if self.enabled.load(Ordering::SeqCst) {
            SettingsCheck::Satisfied
        } else if self.resolvable.load(Ordering::SeqCst) {
            SettingsCheck::Resolvable(ResolutionHandle::new(7).with_description("enable location"))
        } else {
            SettingsCheck::Unsatisfiable
        };
        future::ready(Ok(check)).boxed()
    }

    fn resolve(
        &self,
        _handle: ResolutionHandle,
    ) -> BoxFuture<'static, Result<ResolutionOutcome, SettingsError>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.resolution.lock().unwrap();
        if outcome == ResolutionOutcome::Accepted {
            self.enabled.store(true, Ordering::SeqCst);
        }
        future::ready(Ok(outcome)).boxed()
    }
}

// ============================================================================
// Providers
// ============================================================================

pub struct FakeRegistry {
    sinks: Mutex<HashMap<SubscriptionHandle, FixSink>>,
    stopped: Mutex<Vec<SubscriptionHandle>>,
    started: AtomicUsize,
    /// Revokes the permission right before refusing registration.
    revoke: Mutex<Option<Arc<FakePermissions>>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sinks: Mutex::new(HashMap::new()),
            stopped: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            revoke: Mutex::new(None),
        })
    }

    /// Deliver `fix` to every live registration of its provider. Returns how
    /// many registrations accepted it.
    pub fn push(&self, fix: &LocationFix) -> usize {
        let sinks = self.sinks.lock().unwrap();
        sinks
            .values()
            .filter(|sink| sink.provider() == fix.provider)
            .filter(|sink| sink.send(fix.clone()))
            .count()
    }

    /// Refuse the next registrations for lack of permission, revoking it on
    /// `permissions` first.
    pub fn revoke_on_register(&self, permissions: Arc<FakePermissions>) {
        *self.revoke.lock().unwrap() = Some(permissions);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> Vec<SubscriptionHandle> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn active(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

impl ProviderRegistry for FakeRegistry {
    fn start_updates(
        &self,
        handle: SubscriptionHandle,
        _provider: Provider,
        _config: &RequestConfig,
        sink: FixSink,
    ) -> Result<(), ProviderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(permissions) = self.revoke.lock().unwrap().as_ref() {
            permissions.set_granted(false);
            return Err(ProviderError::PermissionDenied);
        }
        self.sinks.lock().unwrap().insert(handle, sink);
        Ok(())
    }

    fn stop_updates(&self, handle: SubscriptionHandle) {
        self.sinks.lock().unwrap().remove(&handle);
        self.stopped.lock().unwrap().push(handle);
    }
}

// ============================================================================
// Host
// ============================================================================

pub struct FakeHost {
    pub permissions: Arc<FakePermissions>,
    pub settings: Arc<FakeSettings>,
    pub providers: Arc<FakeRegistry>,
    pub lifecycle: Lifecycle,
    pub rationales: AtomicUsize,
}

impl FakeHost {
    /// A created host whose permission and setting start as given.
    pub fn new(granted: bool, enabled: bool) -> Arc<Self> {
        let lifecycle = Lifecycle::new();
        lifecycle.handle_event(LifecycleEvent::Create);
        Arc::new(Self {
            permissions: FakePermissions::new(granted, true),
            settings: FakeSettings::new(enabled),
            providers: FakeRegistry::new(),
            lifecycle,
            rationales: AtomicUsize::new(0),
        })
    }

    pub fn rationales(&self) -> usize {
        self.rationales.load(Ordering::SeqCst)
    }
}

impl Host for FakeHost {
    fn permissions(&self) -> Arc<dyn PermissionAuthority> {
        self.permissions.clone()
    }

    fn settings(&self) -> Arc<dyn SettingsAuthority> {
        self.settings.clone()
    }

    fn providers(&self) -> Arc<dyn ProviderRegistry> {
        self.providers.clone()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    fn show_rationale(&self, _rationale: &str) -> BoxFuture<'static, ()> {
        self.rationales.fetch_add(1, Ordering::SeqCst);
        future::ready(()).boxed()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A fix `metres_north` of the origin taken `secs` after boot.
pub fn fix_at(secs: u64, metres_north: f64, provider: Provider) -> LocationFix {
    LocationFix::new(
        metres_north / METRES_PER_DEGREE,
        0.0,
        Duration::from_secs(secs),
        provider,
    )
}

/// Let spawned tasks run for a while.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `condition` holds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {what}");
}

/// The next outcome, failing the test if none arrives in time.
pub async fn next_outcome(receiver: &mut OutcomeReceiver) -> PipelineOutcome {
    tokio::time::timeout(Duration::from_secs(5), receiver.next())
        .await
        .expect("timed out waiting for an outcome")
        .expect("publication closed")
}
