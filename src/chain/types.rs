//! Types for the remote chain-data service boundary.

use serde::{Deserialize, Serialize};

/// Balance for one branch, in base units plus a USD equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
	/// Balance in the currency's base unit (e.g. satoshis).
	pub value: u64,
	/// USD-equivalent value as reported by the service.
	#[serde(rename = "usdAmount")]
	pub usd_amount: f64,
}

/// A transaction touching one of the queried addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
	pub hash: String,
	/// Transaction value in base units.
	pub value: u64,
	pub incoming: bool,
	pub recipient: String,
	/// Block height, or -1 while the transaction is pending.
	pub height: i64,
	/// Unix timestamp in milliseconds.
	pub timestamp: i64,
}

/// An unspent output usable as an input for a future transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
	#[serde(rename = "txHash")]
	pub tx_hash: String,
	pub vout: u32,
	pub value: u64,
}

/// Aggregated chain state for one branch's address list.
///
/// Snapshots are ephemeral: each successful fetch fully replaces the prior
/// snapshot for the branch, nothing is merged incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSnapshot {
	pub balance: Balance,
	pub transactions: Vec<TxRecord>,
	#[serde(default)]
	pub utxos: Vec<Utxo>,
	/// Index of the first address the service saw no activity on, or -1.
	pub first_unused: i64,
	/// Index of the last address the service saw no activity on, or -1.
	pub last_unused: i64,
	pub transaction_count: u64,
}

/// Error types for chain-data service operations
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("service error: {0}")]
	Service(String),

	#[error("no data returned")]
	NoData,

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}
