use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LifecycleState, Provider};

/// Power/accuracy tier of a location request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Most accurate fixes available, typically GPS.
    HighAccuracy,
    /// Block-level accuracy at moderate power cost.
    #[default]
    BalancedPowerAccuracy,
    /// City-level accuracy at low power cost.
    LowPower,
    /// Only fixes requested by other apps.
    NoPower,
}

impl Priority {
    /// The platform priority constant.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::HighAccuracy => 100,
            Self::BalancedPowerAccuracy => 102,
            Self::LowPower => 104,
            Self::NoPower => 105,
        }
    }
}

/// Errors raised while loading or validating a [`RequestConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The configuration is well formed but contradictory.
    #[error("invalid request configuration: {0}")]
    Invalid(String),
    /// The configuration could not be parsed.
    #[error("malformed request configuration: {0}")]
    Parse(String),
}

/// Desired cadence and behaviour of location updates.
///
/// A fetcher copies its configuration once at construction; changing the
/// cadence means building a new fetcher. Durations are serialized as
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Desired interval between fixes. Also the minimum time between two
    /// published fixes.
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Fastest interval the app can handle.
    #[serde(with = "millis")]
    pub fastest_interval: Duration,
    /// Maximum time fixes may be batched before delivery.
    #[serde(with = "millis")]
    pub max_wait_time: Duration,
    /// Power/accuracy tier.
    pub priority: Priority,
    /// Minimum distance in metres between two published fixes.
    pub smallest_displacement: f32,
    /// Number of fixes to publish before the providers are released.
    pub num_updates: u32,
    /// Delay the first fix until an accurate one is available.
    pub wait_for_accurate_location: bool,
    /// Providers to merge, in order. May be empty.
    pub providers: Vec<Provider>,
    /// Prompt for permission when the pipeline activates without it.
    pub request_permissions: bool,
    /// Prompt for the location setting when the pipeline activates without it.
    pub request_enable_settings: bool,
    /// Text shown before the permission prompt when the host asks for a
    /// rationale.
    pub rationale: String,
    /// Lifecycle state at and above which the pipeline runs.
    pub activation: LifecycleState,
    /// Log every filter decision.
    pub debug: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            fastest_interval: Duration::from_secs(10 * 60),
            max_wait_time: Duration::ZERO,
            priority: Priority::BalancedPowerAccuracy,
            smallest_displacement: 0.0,
            num_updates: u32::MAX,
            wait_for_accurate_location: false,
            providers: vec![Provider::Fused, Provider::Network, Provider::Gps],
            request_permissions: true,
            request_enable_settings: true,
            rationale: String::new(),
            activation: LifecycleState::Started,
            debug: false,
        }
    }
}

impl RequestConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the JSON is malformed or the result does
    /// not pass [`RequestConfig::validated`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<Self>(json)
            .map_err(|err| ConfigError::Parse(err.to_string()))?
            .validated()
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Check the configuration for contradictions and drop duplicate
    /// providers, keeping the first occurrence.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when the fastest interval exceeds the
    /// interval, the displacement is negative or not finite, no update is
    /// allowed, or the activation state can never be entered.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.fastest_interval > self.interval {
            return Err(ConfigError::Invalid(format!(
                "fastest interval {:?} exceeds interval {:?}",
                self.fastest_interval, self.interval
            )));
        }
        if !self.smallest_displacement.is_finite() || self.smallest_displacement < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "smallest displacement must be a non-negative distance, got {}",
                self.smallest_displacement
            )));
        }
        if self.num_updates == 0 {
            return Err(ConfigError::Invalid("num_updates must be at least 1".into()));
        }
        if !self.activation.is_at_least(LifecycleState::Created) {
            return Err(ConfigError::Invalid(format!(
                "activation state {:?} is never entered",
                self.activation
            )));
        }

        let mut seen = Vec::with_capacity(self.providers.len());
        self.providers.retain(|provider| {
            if seen.contains(provider) {
                false
            } else {
                seen.push(*provider);
                true
            }
        });
        Ok(self)
    }

    /// Set the desired interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the fastest interval.
    #[must_use]
    pub const fn with_fastest_interval(mut self, interval: Duration) -> Self {
        self.fastest_interval = interval;
        self
    }

    /// Set the maximum batching wait.
    #[must_use]
    pub const fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the minimum displacement in metres.
    #[must_use]
    pub const fn with_smallest_displacement(mut self, metres: f32) -> Self {
        self.smallest_displacement = metres;
        self
    }

    /// Set the number of fixes to publish.
    #[must_use]
    pub const fn with_num_updates(mut self, count: u32) -> Self {
        self.num_updates = count;
        self
    }

    /// Wait for an accurate first fix.
    #[must_use]
    pub const fn with_wait_for_accurate_location(mut self, wait: bool) -> Self {
        self.wait_for_accurate_location = wait;
        self
    }

    /// Set the providers to merge.
    #[must_use]
    pub fn with_providers(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.providers = providers.into_iter().collect();
        self
    }

    /// Whether to prompt for permission on activation.
    #[must_use]
    pub const fn with_request_permissions(mut self, request: bool) -> Self {
        self.request_permissions = request;
        self
    }

    /// Whether to prompt for the location setting on activation.
    #[must_use]
    pub const fn with_request_enable_settings(mut self, request: bool) -> Self {
        self.request_enable_settings = request;
        self
    }

    /// Set the rationale shown before prompting.
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Set the lifecycle state at which the pipeline runs.
    #[must_use]
    pub const fn with_activation(mut self, state: LifecycleState) -> Self {
        self.activation = state;
        self
    }

    /// Log filter decisions.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
