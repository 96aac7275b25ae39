//! Address discovery against the signing device.
//!
//! Derivation on real hardware is slow and must be requested in bounded
//! consecutive blocks. The engine computes where the next block starts
//! from the addresses it already holds; because a wallet identity always
//! yields the same address at a given index, previously discovered
//! addresses never need to be re-requested.

use crate::device::SigningDevice;
use crate::wallet::types::{
	AddressRecord, Branch, Currency, CurrencyBranch, SyncError, harden,
};

use std::sync::Arc;
use tracing::{debug, info};

/// Build the full derivation path for one address:
/// `[purpose', coin_type', account', branch_index, address_index]`.
pub fn derivation_path(branch: CurrencyBranch, index: u32) -> Vec<u32> {
	vec![
		harden(44),
		harden(branch.currency.coin_type()),
		harden(0),
		branch.branch.index(),
		index,
	]
}

/// Requests batches of derived addresses from the signing device.
pub struct AddressDiscoveryEngine<D> {
	device: Arc<D>,
	/// Block length for Bitcoin main-branch requests.
	btc_block_len: usize,
}

impl<D: SigningDevice> AddressDiscoveryEngine<D> {
	pub fn new(device: Arc<D>, btc_block_len: usize) -> Self {
		Self {
			device,
			btc_block_len,
		}
	}

	/// Number of consecutive addresses requested per device call.
	pub fn block_size(&self, branch: CurrencyBranch) -> usize {
		match (branch.currency, branch.branch) {
			(Currency::Btc, Branch::Main) => self.btc_block_len,
			_ => 1,
		}
	}

	/// Request the next block of addresses for `branch`.
	///
	/// `existing` is the branch's current address list; the next index is
	/// its length. When `force` is false and the branch already holds at
	/// least `gap_limit` addresses, discovery is assumed complete and the
	/// request is skipped. Single-address currencies never derive past
	/// index zero, forced or not.
	pub async fn discover(
		&self,
		branch: CurrencyBranch,
		existing: &[AddressRecord],
		force: bool,
	) -> Result<Vec<AddressRecord>, SyncError> {
		if branch.branch == Branch::Change && !branch.currency.has_change_branch() {
			return Err(SyncError::InvalidCurrency(branch.to_string()));
		}

		let next_index = existing.len() as u32;

		if !branch.currency.has_change_branch() && next_index > 0 {
			// Single-address currency already holds its only address.
			return Ok(Vec::new());
		}
		if !force && next_index as usize >= branch.gap_limit() {
			debug!("{} already holds {} addresses, skipping discovery", branch, next_index);
			return Ok(Vec::new());
		}

		let count = self.block_size(branch);
		let start_path = derivation_path(branch, next_index);
		debug!(
			"Requesting {} addresses for {} starting at index {}",
			count, branch, next_index
		);

		let addresses = self.device.get_addresses(&start_path, count).await?;

		let records: Vec<AddressRecord> = addresses
			.into_iter()
			.enumerate()
			.map(|(offset, address)| {
				let index = next_index + offset as u32;
				AddressRecord {
					index,
					path: derivation_path(branch, index),
					address,
				}
			})
			.collect();

		info!("Discovered {} new addresses for {}", records.len(), branch);
		Ok(records)
	}
}
