//! Lifecycle-aware location fetching.
//!
//! The crate reconciles three independently changing inputs into a single
//! stream of [`PipelineOutcome`]s:
//!
//! - the location permission status ([`PermissionGate`]),
//! - whether the device location setting satisfies the active
//!   [`RequestConfig`] ([`SettingsGate`]),
//! - raw fixes pushed by the fused, GPS and network providers
//!   ([`ProviderRegistry`]).
//!
//! Fixes only flow while both gates are satisfied, and only when they moved
//! far enough, late enough after the previous one ([`DisplacementFilter`]).
//! The [`LocationFetcher`] runs that pipeline only while its host is in the
//! configured lifecycle window and multicasts the latest outcome to every
//! subscriber.

#![warn(missing_docs)]

mod config;
mod fetcher;
mod filter;
mod lifecycle;
mod pipeline;
mod provider;
mod publisher;
mod settings;
mod source;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use config::{ConfigError, Priority, RequestConfig};
pub use fetcher::{LocationFetcher, SharedGates};
pub use filter::DisplacementFilter;
pub use lifecycle::{Host, Lifecycle, LifecycleEvent, LifecycleState};
pub use locationkit_permission::{
    Permission, PermissionAuthority, PermissionError, PermissionGate, PermissionStatus,
};
pub use pipeline::{Pipeline, PipelineContext, PipelineState};
pub use provider::{
    FixSink, ProviderError, ProviderRegistry, ProviderStream, SubscriptionHandle, merged_stream,
};
pub use publisher::{LifecyclePublisher, OutcomeReceiver, Publication};
pub use settings::{
    ResolutionHandle, ResolutionOutcome, SettingsAuthority, SettingsCheck, SettingsError,
    SettingsGate, SettingsStatus,
};
pub use source::{LocationSource, Source};

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A location provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// The platform aggregating provider blending GPS, network and sensors.
    Fused,
    /// Satellite positioning.
    Gps,
    /// Cell and Wi-Fi positioning.
    Network,
}

impl Provider {
    /// The platform provider name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fused => "fused",
            Self::Gps => "gps",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
    /// Horizontal accuracy radius in metres, if reported.
    pub accuracy: Option<f32>,
    /// Monotonic time since boot at which the fix was taken.
    pub elapsed_realtime: Duration,
    /// The provider that produced the fix.
    pub provider: Provider,
}

impl LocationFix {
    /// Create a fix without accuracy information.
    #[must_use]
    pub const fn new(
        latitude: f64,
        longitude: f64,
        elapsed_realtime: Duration,
        provider: Provider,
    ) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            elapsed_realtime,
            provider,
        }
    }

    /// Attach an accuracy radius in metres.
    #[must_use]
    pub const fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Great-circle distance to `other` in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

/// An unmet precondition that keeps fixes from flowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CapabilityFailure {
    /// Location permission is not granted.
    #[error("location permission denied")]
    PermissionDenied,
    /// The device location setting does not satisfy the request.
    #[error("location setting disabled")]
    SettingsUnsatisfied,
}

/// A non-empty set of capability failures, in the order they were found.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityFailures(Vec<CapabilityFailure>);

impl CapabilityFailures {
    /// A set holding a single failure.
    #[must_use]
    pub fn new(failure: CapabilityFailure) -> Self {
        Self(vec![failure])
    }

    /// Add a failure unless it is already present.
    #[must_use]
    pub fn with(mut self, failure: CapabilityFailure) -> Self {
        if !self.0.contains(&failure) {
            self.0.push(failure);
        }
        self
    }

    /// The first failure found.
    #[must_use]
    pub fn first(&self) -> CapabilityFailure {
        self.0[0]
    }

    /// Whether `failure` is part of the set.
    #[must_use]
    pub fn contains(&self, failure: CapabilityFailure) -> bool {
        self.0.contains(&failure)
    }

    /// The failures as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[CapabilityFailure] {
        &self.0
    }

    /// Iterate over the failures.
    pub fn iter(&self) -> impl Iterator<Item = CapabilityFailure> + '_ {
        self.0.iter().copied()
    }
}

impl From<CapabilityFailure> for CapabilityFailures {
    fn from(failure: CapabilityFailure) -> Self {
        Self::new(failure)
    }
}

impl fmt::Display for CapabilityFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CapabilityFailures {}

/// What subscribers receive: a fix, or every reason why there is none.
pub type PipelineOutcome = Result<LocationFix, CapabilityFailures>;

/// Errors returned by the fallible parts of the API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    /// The request configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The publication was torn down.
    #[error("location publication closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_of_one_degree_of_latitude() {
        let a = LocationFix::new(0.0, 0.0, Duration::ZERO, Provider::Gps);
        let b = LocationFix::new(1.0, 0.0, Duration::ZERO, Provider::Gps);
        let distance = a.distance_to(&b);
        assert!((distance - 111_195.0).abs() < 1.0, "{distance}");
        assert!((b.distance_to(&a) - distance).abs() < f64::EPSILON);
        assert!(a.distance_to(&a).abs() < f64::EPSILON);
    }

    #[test]
    fn failures_keep_order_without_duplicates() {
        let failures = CapabilityFailures::new(CapabilityFailure::PermissionDenied)
            .with(CapabilityFailure::SettingsUnsatisfied)
            .with(CapabilityFailure::PermissionDenied);
        assert_eq!(
            failures.as_slice(),
            &[
                CapabilityFailure::PermissionDenied,
                CapabilityFailure::SettingsUnsatisfied
            ]
        );
        assert_eq!(failures.first(), CapabilityFailure::PermissionDenied);
        assert_eq!(
            failures.to_string(),
            "location permission denied, location setting disabled"
        );
    }

    #[test]
    fn provider_names() {
        assert_eq!(Provider::Fused.to_string(), "fused");
        assert_eq!(Provider::Gps.as_str(), "gps");
        assert_eq!(
            serde_json::to_string(&Provider::Network).unwrap(),
            "\"network\""
        );
    }
}
