//! Persistent address store.
//!
//! A single JSON snapshot on disk holds every (device, wallet) partition:
//! `device_id -> wallet_id -> { "addresses": { "BTC": [...], ... } }`.
//! Only discovered address lists are stored; balances, transactions and
//! UTXOs are always re-fetchable and never persisted.
//!
//! Storage failures are tolerated everywhere: an unreadable store opens
//! empty, an unwritable store turns saves into no-ops. The engine keeps
//! running either way and simply loses durability until storage recovers.

use crate::storage::merge::deep_merge;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing::{info, warn};

/// Deep-merging key/value store for discovered address lists.
pub struct AddressStore {
	path: PathBuf,
	root: Value,
}

impl AddressStore {
	/// Open the store at `path`, loading the existing snapshot if one is
	/// readable and starting empty otherwise.
	pub async fn open(path: PathBuf) -> Self {
		let root = match tokio::fs::read_to_string(&path).await {
			Ok(content) => match serde_json::from_str::<Value>(&content) {
				Ok(snapshot) if snapshot.get("store").is_some_and(Value::is_object) => {
					info!("Loaded address store from {:?}", path);
					snapshot["store"].clone()
				}
				Ok(_) | Err(_) => {
					warn!(
						"Address store at {:?} has an unexpected format, starting empty",
						path
					);
					Value::Object(Map::new())
				}
			},
			Err(_) => Value::Object(Map::new()),
		};

		Self { path, root }
	}

	/// Current record for the (device, wallet) partition.
	///
	/// Returns an empty mapping when the partition does not exist yet;
	/// never fails.
	pub fn get(&self, device_id: &str, wallet_id: &str) -> Value {
		self.root
			.get(device_id)
			.and_then(|d| d.get(wallet_id))
			.cloned()
			.unwrap_or_else(|| Value::Object(Map::new()))
	}

	/// Deep-merge `partial` into the (device, wallet) partition and rewrite
	/// the entire backing snapshot.
	pub async fn save(&mut self, device_id: &str, wallet_id: &str, partial: Value) {
		let partition = json!({ device_id: { wallet_id: partial } });
		deep_merge(&mut self.root, &partition);
		self.flush().await;
	}

	/// Rewrite the whole snapshot. Every save touches the full store, not
	/// just the partition it changed.
	async fn flush(&self) {
		let snapshot = json!({
			"saved_at": chrono::Utc::now().to_rfc3339(),
			"store": &self.root,
		});

		match serde_json::to_string_pretty(&snapshot) {
			Ok(content) => {
				if let Err(e) = tokio::fs::write(&self.path, content).await {
					warn!("Failed to write address store to {:?}: {}", self.path, e);
				}
			}
			Err(e) => warn!("Failed to serialize address store: {}", e),
		}
	}
}
