//! Core pinset types and traits.
//!
//! This crate defines what every other pinset crate agrees on:
//!
//! - Content identifiers (`cid::Cid`), parsed from and rendered to the
//!   usual CIDv0/CIDv1 string forms.
//! - Desired-state records (`pin::Pin`, `pin::PinDepth`, `pin::PinKind`)
//!   as handed out by the cluster's consensus layer.
//! - The externally observable tracker projection (`status::TrackerStatus`,
//!   `status::PinInfo`) and the daemon's own view of a pin
//!   (`status::DaemonPinStatus`).
//! - The `PinConnector` trait, the boundary to the storage daemon that
//!   actually holds the content.
//!
//! The reconciliation engine lives in `pinset_tracker`; daemon connector
//! implementations live under `connectors/`.

pub mod cid;
pub mod connector;
pub mod pin;
pub mod status;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use cid::{Cid, CidError};
pub use connector::{ConnectorResult, PinConnector, RepoStat, lookup_config_path};
pub use pin::{Pin, PinDepth, PinKind};
pub use status::{DaemonPinStatus, PinInfo, PinTypeFilter, TrackerStatus};
