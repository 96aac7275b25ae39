//! Branch-switching reconciliation state machine.
//!
//! Each chain-state snapshot for a branch is reconciled into the session
//! caches, and a [`Decision`] tells the caller what the branch needs next:
//! more addresses on the same branch, a switch to the change branch, or
//! nothing. Bitcoin walks main until the gap limit converges, then checks
//! change at least once per session; single-branch currencies settle after
//! their first snapshot.

use crate::chain::BranchSnapshot;
use crate::wallet::types::{Branch, Currency, CurrencyBranch, SessionCaches};

use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What the poller should schedule next for a currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	/// The branch needs more addresses: derive the next block (forced),
	/// then fetch again.
	ContinueSync,
	/// Move to the change branch. With `force_discovery` the change branch
	/// has no addresses yet and must derive its first block; without it,
	/// existing change addresses just need a fetch.
	SwitchBranch { force_discovery: bool },
	/// Nothing further this tick; the fixed poll interval takes over.
	Settled,
}

/// Per-currency synchronization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	SyncingMain,
	SyncingChange,
	Settled,
}

/// Reconciles branch snapshots into session caches and decides whether a
/// currency needs more addresses or a branch switch.
#[derive(Debug, Default)]
pub struct SyncStateMachine {
	phases: HashMap<Currency, SyncPhase>,
	/// Currencies whose change branch has been checked this session.
	checked_change: HashSet<Currency>,
}

/// Gap-limit test: the last address is unused, and the unused run is still
/// shorter than the gap limit allows.
pub fn need_more_addresses(snapshot: &BranchSnapshot, address_count: usize, gap_limit: usize) -> bool {
	snapshot.last_unused == address_count as i64 - 1
		&& snapshot.last_unused - snapshot.first_unused < gap_limit as i64 - 1
}

impl SyncStateMachine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn phase(&self, currency: Currency) -> SyncPhase {
		self.phases
			.get(&currency)
			.copied()
			.unwrap_or(SyncPhase::SyncingMain)
	}

	/// Whether the change branch has been checked this session.
	pub fn has_checked_change(&self, currency: Currency) -> bool {
		self.checked_change.contains(&currency)
	}

	/// Merge one branch snapshot into the caches and decide the next step.
	///
	/// The snapshot fully replaces the branch's cached state; aggregated
	/// per-currency totals are recomputed at query time from the branch
	/// states, so nothing is ever double-counted.
	pub fn reconcile(
		&mut self,
		branch: CurrencyBranch,
		snapshot: &BranchSnapshot,
		caches: &mut SessionCaches,
	) -> Decision {
		// Capture the first switch to change for this session.
		if branch.branch == Branch::Change {
			self.checked_change.insert(branch.currency);
		}

		let address_count = caches.addresses.get(&branch).map_or(0, Vec::len);

		// Next receive address for the branch, recomputed on every fetch.
		if snapshot.first_unused >= 0 {
			if let Some(record) = caches
				.addresses
				.get(&branch)
				.and_then(|list| list.get(snapshot.first_unused as usize))
			{
				caches
					.first_unused
					.insert(branch, record.address.clone());
			}
		}

		if !branch.currency.has_change_branch() {
			// Account-model currency: keep the sequence counter around for
			// future signing requests.
			caches
				.sequence_counters
				.insert(branch.currency, snapshot.transaction_count);
		}

		caches.branch_states.insert(branch, snapshot.clone());

		let decision = if branch.currency.has_change_branch() {
			self.decide_utxo_branch(branch, snapshot, caches, address_count)
		} else {
			Decision::Settled
		};

		self.phases.insert(
			branch.currency,
			match decision {
				Decision::ContinueSync => match branch.branch {
					Branch::Main => SyncPhase::SyncingMain,
					Branch::Change => SyncPhase::SyncingChange,
				},
				Decision::SwitchBranch { .. } => SyncPhase::SyncingChange,
				Decision::Settled => SyncPhase::Settled,
			},
		);

		debug!("{}: reconciled, decision {:?}", branch, decision);
		decision
	}

	fn decide_utxo_branch(
		&self,
		branch: CurrencyBranch,
		snapshot: &BranchSnapshot,
		caches: &SessionCaches,
		address_count: usize,
	) -> Decision {
		if need_more_addresses(snapshot, address_count, branch.gap_limit()) {
			// More addresses needed on this same branch, main or change.
			return Decision::ContinueSync;
		}

		if branch.branch == Branch::Change {
			return Decision::Settled;
		}

		let change = CurrencyBranch::change(branch.currency);
		let change_is_empty = caches.addresses.get(&change).is_none_or(Vec::is_empty);

		if change_is_empty {
			// Main converged but change has never been derived.
			Decision::SwitchBranch {
				force_discovery: true,
			}
		} else if !self.has_checked_change(branch.currency) {
			// Change addresses exist from a prior session; their state
			// still has to be fetched once.
			Decision::SwitchBranch {
				force_discovery: false,
			}
		} else {
			Decision::Settled
		}
	}

	/// Forget all per-session state. Called on connect so the change
	/// branch is re-checked at least once per session lifetime.
	pub fn reset(&mut self) {
		self.phases.clear();
		self.checked_change.clear();
	}
}
