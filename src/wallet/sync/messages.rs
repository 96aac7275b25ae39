//! Message types for cross-task communication during sync.
//!
//! The background poller and the session never share mutable state: the
//! session sends [`PollerCommand`]s down one channel and receives
//! [`SyncSignal`]s on another. The poller only schedules work; every chain
//! fetch runs in a session-spawned task gated by the session's per-branch
//! in-flight set, so at most one fetch is ever outstanding per branch. All
//! session-cache mutation happens when the session processes an incoming
//! signal.

use crate::chain::BranchSnapshot;
use crate::wallet::types::{AddressBook, AddressRecord, CurrencyBranch, SyncError};

/// Commands the session sends to the background poller.
#[derive(Debug)]
pub enum PollerCommand {
	/// Replace the poller's view of the discovered address book. Sent
	/// after every successful discovery so subsequent ticks cover the new
	/// addresses.
	SetAddresses(AddressBook),
	/// Stop polling and exit the task.
	Stop,
}

/// Signals emitted by the poller and by per-branch fetch tasks.
///
/// Every signal carries the session generation it was produced under; the
/// session discards signals from a superseded generation so a response
/// arriving after disconnect can never resurrect state.
#[derive(Debug)]
pub enum SyncSignal {
	/// The poller's sweep reached a branch with known addresses. The
	/// session starts a fetch for it unless one is already in flight, in
	/// which case the branch simply waits for the next tick.
	FetchDue {
		branch: CurrencyBranch,
		generation: u64,
	},
	/// The branch's fetch task resolved. Exactly one such task exists per
	/// branch at a time.
	DataResponse {
		branch: CurrencyBranch,
		snapshot: BranchSnapshot,
		/// Addresses derived immediately before this fetch, if the fetch
		/// was preceded by a discovery request. Appended to the session's
		/// book when the signal is processed.
		discovered: Vec<AddressRecord>,
		generation: u64,
	},
	/// The branch's fetch task failed, during discovery or during the
	/// fetch itself. Isolated: other branches and future ticks are
	/// unaffected.
	Error {
		branch: CurrencyBranch,
		error: SyncError,
		/// Addresses derived before the failure. Discovery succeeded, so
		/// these are still appended and persisted; only the fetch is
		/// retried on the next tick.
		discovered: Vec<AddressRecord>,
		generation: u64,
	},
	/// A full sweep over all tracked currencies completed.
	IterationDone { generation: u64 },
}
