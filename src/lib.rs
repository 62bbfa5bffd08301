//! # Locationkit
//!
//! Lifecycle-aware, reactive location fetching.
//!
//! Locationkit reconciles three independently changing conditions into one
//! coherent stream: whether location permission is granted, whether the
//! device location setting satisfies the current request, and the raw fixes
//! reported by the fused, GPS and network providers. Work only runs while the
//! owning screen is in its active lifecycle window.
//!
//! ## Features
//!
//! - `permission`: Permission model and the single-flight permission gate.
//! - `location`: Settings gate, provider adapter, reconciliation pipeline and
//!   the lifecycle-scoped publisher. Implies `permission`.
//!
//! Use the `full` feature to enable everything.
//!
//! ## Example
//!
//! ```toml
//! [dependencies]
//! locationkit = { version = "0.1", features = ["location"] }
//! ```
//!
//! ```rust,ignore
//! use locationkit::location::{LocationFetcher, RequestConfig, SharedGates};
//!
//! async fn track(host: std::sync::Arc<dyn locationkit::location::Host>) {
//!     let shared = SharedGates::for_host(host.as_ref());
//!     let config = RequestConfig::default().with_smallest_displacement(25.0);
//!     let fetcher = LocationFetcher::new(host, &shared, config).unwrap();
//!     let mut location = fetcher.location();
//!     while let Some(outcome) = location.next().await {
//!         match outcome {
//!             Ok(fix) => println!("{}, {}", fix.latitude, fix.longitude),
//!             Err(failures) => println!("unavailable: {failures}"),
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "location")]
pub use locationkit_location as location;

#[cfg(feature = "permission")]
pub use locationkit_permission as permission;
