//! Location permission gatekeeping.
//!
//! This crate models the runtime location permissions, the platform
//! authority that grants them, and a [`PermissionGate`] that publishes the
//! process-wide permission status as a live signal while making sure only one
//! permission prompt is ever in flight.

#![warn(missing_docs)]

mod gate;
mod single_flight;

use std::collections::HashMap;

use futures::future::BoxFuture;

pub use gate::PermissionGate;
pub use single_flight::SingleFlight;

/// Runtime permissions relevant to location access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Permission {
    /// Approximate location (network based).
    CoarseLocation,
    /// Precise location (GPS based).
    FineLocation,
}

impl Permission {
    /// The permission set requested together for location updates.
    pub const LOCATION: [Self; 2] = [Self::CoarseLocation, Self::FineLocation];

    /// The platform identifier of this permission.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            Self::FineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

/// The last known status of a permission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PermissionStatus {
    /// Nothing has been checked yet.
    #[default]
    Unknown,
    /// Every permission in the set has been granted.
    Granted,
    /// At least one permission in the set is not granted.
    Denied,
}

impl PermissionStatus {
    /// Map an optional grant result to a status. `None` means "not checked".
    #[must_use]
    pub const fn from_grant(granted: Option<bool>) -> Self {
        match granted {
            None => Self::Unknown,
            Some(true) => Self::Granted,
            Some(false) => Self::Denied,
        }
    }

    /// Returns `true` for [`PermissionStatus::Granted`].
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Granted if either side is granted, otherwise denied if either side is
    /// denied, otherwise unknown.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::Granted, _) | (_, Self::Granted) => Self::Granted,
            (Self::Denied, _) | (_, Self::Denied) => Self::Denied,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
        }
    }

    /// Granted only if both sides are granted, unknown if both are unknown,
    /// denied otherwise.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Granted, Self::Granted) => Self::Granted,
            (Self::Unknown, Self::Unknown) => Self::Unknown,
            _ => Self::Denied,
        }
    }
}

impl From<bool> for PermissionStatus {
    fn from(granted: bool) -> Self {
        Self::from_grant(Some(granted))
    }
}

/// Errors reported by a [`PermissionAuthority`] while prompting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    /// The prompt could not be shown (no foreground host, detached screen).
    #[error("permission prompt unavailable: {0}")]
    Unavailable(String),
    /// The prompt was dismissed without a result.
    #[error("permission prompt cancelled")]
    Cancelled,
}

/// The platform permission subsystem.
///
/// Implementations wrap the host's permission checks and its permission
/// prompt. The prompt future may stay pending for as long as the user takes
/// to answer; dropping it must cancel the pending prompt callback.
pub trait PermissionAuthority: Send + Sync {
    /// Whether every permission in `permissions` is currently granted.
    fn has_permissions(&self, permissions: &[Permission]) -> bool;

    /// Show the permission prompt and report the per-permission result.
    fn request_permissions(
        &self,
        permissions: &[Permission],
    ) -> BoxFuture<'static, Result<HashMap<Permission, bool>, PermissionError>>;

    /// Whether the host should explain why the permissions are needed before
    /// prompting.
    fn should_show_rationale(&self, permissions: &[Permission]) -> bool;
}
