//! Common types for hub switchover: errors, retrying cluster client,
//! fleet resource catalogue, contexts and configuration.

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{CallError, ClusterClient};
pub use config::{ClientSettings, DiscoverySettings, StateLocation, SwitchoverConfig};
pub use context::{ClientFactory, ClusterContext};
pub use error::{Error, ErrorKind};
pub use resources::FleetKind;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
