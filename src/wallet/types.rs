use crate::chain::{BranchSnapshot, ChainError, TxRecord, Utxo};
use crate::device::DeviceError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// BIP-32 hardened derivation offset.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Mark a path segment as hardened.
pub const fn harden(index: u32) -> u32 {
	index | HARDENED_OFFSET
}

/// Currencies the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
	Btc,
	Eth,
}

impl Currency {
	/// All tracked currencies, in sync order.
	pub const ALL: [Currency; 2] = [Currency::Btc, Currency::Eth];

	pub fn code(&self) -> &'static str {
		match self {
			Currency::Btc => "BTC",
			Currency::Eth => "ETH",
		}
	}

	/// BIP-44 coin type (unhardened).
	pub fn coin_type(&self) -> u32 {
		match self {
			Currency::Btc => 0,
			Currency::Eth => 60,
		}
	}

	/// Only Bitcoin splits derivation into main and change branches.
	pub fn has_change_branch(&self) -> bool {
		matches!(self, Currency::Btc)
	}
}

/// Derivation branch: receiving addresses vs internal change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
	Main,
	Change,
}

impl Branch {
	/// Unhardened path segment for this branch.
	pub fn index(&self) -> u32 {
		match self {
			Branch::Main => 0,
			Branch::Change => 1,
		}
	}
}

/// A (currency, branch) pair, the unit the sync engine operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyBranch {
	pub currency: Currency,
	pub branch: Branch,
}

impl CurrencyBranch {
	pub fn main(currency: Currency) -> Self {
		Self {
			currency,
			branch: Branch::Main,
		}
	}

	pub fn change(currency: Currency) -> Self {
		Self {
			currency,
			branch: Branch::Change,
		}
	}

	/// Maximum run of consecutive unused addresses tolerated before
	/// discovery halts for this branch.
	pub fn gap_limit(&self) -> usize {
		match (self.currency, self.branch) {
			(Currency::Btc, Branch::Main) => 20,
			(Currency::Btc, Branch::Change) => 1,
			_ => 1,
		}
	}

	/// Key under which this branch's address list is persisted. Matches
	/// the on-disk layout: `BTC`, `BTC_CHANGE`, `ETH`.
	pub fn storage_key(&self) -> String {
		match self.branch {
			Branch::Main => self.currency.code().to_string(),
			Branch::Change => format!("{}_CHANGE", self.currency.code()),
		}
	}
}

impl fmt::Display for CurrencyBranch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.storage_key())
	}
}

/// A derived address, immutable once created: a fixed wallet identity
/// always yields the same address at a given index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
	/// Derivation index within the branch.
	pub index: u32,
	/// Full path segments, hardened offsets applied.
	pub path: Vec<u32>,
	pub address: String,
}

/// Address lists per branch, ordered by index and append-only.
pub type AddressBook = HashMap<CurrencyBranch, Vec<AddressRecord>>;

/// In-memory caches owned by the session.
///
/// Branch states are ephemeral: each is fully replaced by the next
/// successful fetch and cleared on disconnect. Only the address book is
/// ever persisted.
#[derive(Debug, Default)]
pub struct SessionCaches {
	pub addresses: AddressBook,
	/// Latest snapshot per branch, replaced wholesale on each fetch.
	pub branch_states: HashMap<CurrencyBranch, BranchSnapshot>,
	/// Next receive address per branch.
	pub first_unused: HashMap<CurrencyBranch, String>,
	/// Per-currency sequence counter captured for future signing requests
	/// (account-model currencies only).
	pub sequence_counters: HashMap<Currency, u64>,
}

impl SessionCaches {
	/// Drop everything, including discovered addresses. Used on
	/// disconnect; the addresses survive in the persistent store.
	pub fn clear(&mut self) {
		self.addresses.clear();
		self.branch_states.clear();
		self.first_unused.clear();
		self.sequence_counters.clear();
	}

	fn main_and_change(
		&self,
		currency: Currency,
	) -> (Option<&BranchSnapshot>, Option<&BranchSnapshot>) {
		(
			self.branch_states.get(&CurrencyBranch::main(currency)),
			self.branch_states.get(&CurrencyBranch::change(currency)),
		)
	}

	/// Aggregated balance: main plus change, a missing branch counting as
	/// zero.
	pub fn balance(&self, currency: Currency) -> u64 {
		let (main, change) = self.main_and_change(currency);
		main.map(|s| s.balance.value).unwrap_or(0) + change.map(|s| s.balance.value).unwrap_or(0)
	}

	/// Aggregated USD value, same law as [`SessionCaches::balance`].
	pub fn usd_value(&self, currency: Currency) -> f64 {
		let (main, change) = self.main_and_change(currency);
		main.map(|s| s.balance.usd_amount).unwrap_or(0.0)
			+ change.map(|s| s.balance.usd_amount).unwrap_or(0.0)
	}

	/// Main-branch transactions followed by change-branch transactions.
	pub fn transactions(&self, currency: Currency) -> Vec<TxRecord> {
		let (main, change) = self.main_and_change(currency);
		let mut txs: Vec<TxRecord> = main.map(|s| s.transactions.clone()).unwrap_or_default();
		if let Some(change) = change {
			txs.extend(change.transactions.iter().cloned());
		}
		txs
	}

	/// Main-branch UTXOs followed by change-branch UTXOs.
	pub fn utxos(&self, currency: Currency) -> Vec<Utxo> {
		let (main, change) = self.main_and_change(currency);
		let mut utxos: Vec<Utxo> = main.map(|s| s.utxos.clone()).unwrap_or_default();
		if let Some(change) = change {
			utxos.extend(change.utxos.iter().cloned());
		}
		utxos
	}
}

/// Error taxonomy for the sync engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	/// No active device session. Surfaced immediately, never retried
	/// automatically.
	#[error("no active device session")]
	DeviceUnavailable,

	/// The device rejected or timed out a batch address request. The
	/// poller retries on its next scheduled tick, not before.
	#[error("device request failed: {0}")]
	DeviceRequest(#[from] DeviceError),

	/// A chain-data fetch failed. Isolated per branch; other currencies
	/// and future ticks proceed.
	#[error("chain service error: {0}")]
	ChainService(#[from] ChainError),

	/// A response arrived after disconnect. Dropped, never surfaced.
	#[error("response arrived after session ended")]
	StaleSession,

	/// Unsupported currency or branch. Fails immediately, no retry.
	#[error("unsupported currency or branch: {0}")]
	InvalidCurrency(String),
}
