//! Hub role discovery
//!
//! Reads backup, restore and managed-cluster signals from every candidate
//! context, classifies each fleet-management hub with a fixed decision table
//! and proposes a (primary, secondary) pair. A klusterlet connection verifier
//! disambiguates the window where two hubs both report the same clusters as
//! available.

#![deny(missing_docs)]

pub mod engine;
pub mod report;
pub mod roles;
pub mod signals;
pub mod verifier;

pub use engine::DiscoveryEngine;
pub use report::{
    propose_pair, Confidence, DiscoveryReport, HubReport, PairProposal, SkipReason, SkippedContext,
};
pub use roles::{classify, Classification, HubRole};
pub use signals::{BackupScheduleState, HubSignals, ManagedClusterCount, RestoreState};
pub use verifier::{ConnectionVerification, KlusterletVerifier};
