//! Wallet Synchronization Module
//!
//! Core services for keeping session state in step with the signing
//! device and the remote chain-data service:
//!
//! - `discovery`: batched, gap-limit-aware address derivation against the device.
//! - `state_machine`: reconciles branch snapshots into session caches and
//!   drives the main/change branch-switching logic.
//! - `poller`: the fixed-interval background sweep over all tracked currencies.
//! - `messages`: the closed set of typed messages exchanged between the
//!   session and the poller; the only way the two sides communicate.

/// Batched address derivation against the signing device
pub mod discovery;
/// Typed messages between session and poller
pub mod messages;
/// Fixed-interval background sweep
pub mod poller;
/// Snapshot reconciliation and branch switching
pub mod state_machine;

pub use discovery::AddressDiscoveryEngine;
pub use messages::{PollerCommand, SyncSignal};
pub use poller::BackgroundPoller;
pub use state_machine::{Decision, SyncPhase, SyncStateMachine};
