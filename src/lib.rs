//! State-synchronization engine for a hardware-backed, multi-currency
//! wallet client.
//!
//! The engine discovers hierarchical-deterministic addresses for each
//! tracked currency, polls a remote chain-data service for the state tied
//! to those addresses, reconciles the results into aggregated per-currency
//! caches, and persists discovered address lists so they never have to be
//! re-requested from the signing hardware.
//!
//! Modules:
//! - `device`: the signing-device boundary (trait only; no wire protocol here)
//! - `chain`: client for the remote chain-data service
//! - `storage`: deep-merging persistent store for discovered addresses
//! - `wallet`: the session orchestrator and its sync services

pub mod chain;
pub mod device;
pub mod storage;
pub mod wallet;

pub use chain::{BranchSnapshot, ChainDataService, ChainError, HttpChainClient};
pub use device::{DeviceError, SignRequest, SignedPayload, SigningDevice};
pub use storage::AddressStore;
pub use wallet::{
	AddressRecord, Branch, Currency, CurrencyBranch, Session, SessionConfig, SyncError,
};
