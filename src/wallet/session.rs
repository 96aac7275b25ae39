//! Session orchestrator.
//!
//! The session owns every in-memory cache and is the only component that
//! mutates them. The background poller and per-branch fetch tasks
//! communicate with it exclusively through the typed signal channel; each
//! signal is applied here, under the connection-state and generation
//! guards, so a response arriving after disconnect is discarded instead of
//! resurrecting state.
//!
//! Every chain fetch is spawned here, behind the per-branch in-flight set:
//! poller ticks and gap-scan continuations alike go through
//! [`Session::schedule_fetch`], so at most one request is outstanding per
//! branch and a continuation only starts once the prior fetch resolved.

use crate::chain::ChainDataService;
use crate::device::{DeviceError, SignRequest, SigningDevice};
use crate::storage::AddressStore;
use crate::wallet::sync::discovery::derivation_path;
use crate::wallet::sync::{
	AddressDiscoveryEngine, BackgroundPoller, Decision, PollerCommand, SyncSignal,
	SyncStateMachine,
};
use crate::wallet::types::{
	AddressBook, AddressRecord, Branch, Currency, CurrencyBranch, SessionCaches, SyncError,
};

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables for the sync loop.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Fixed interval between background sweeps.
	pub poll_interval: Duration,
	/// Recovery time the signing device needs per derived address before
	/// it can serve the next request.
	pub per_address_recovery_delay: Duration,
	/// Block length for Bitcoin main-branch address requests.
	pub btc_address_block_len: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(30),
			per_address_recovery_delay: Duration::from_secs(2),
			btc_address_block_len: 10,
		}
	}
}

/// Connection lifecycle, consulted before applying any asynchronous
/// continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
	Disconnected,
	Connected {
		device_id: String,
		/// Identity of the active seed-backed wallet on the device, if the
		/// device currently exposes one.
		wallet_id: Option<String>,
	},
}

/// Top-level orchestrator: wires discovery, reconciliation, polling and
/// persistence together and serves queries to the presentation layer.
pub struct Session<D, C> {
	device: Arc<D>,
	chain: Arc<C>,
	store: AddressStore,
	config: SessionConfig,

	connection: ConnectionState,
	machine: SyncStateMachine,
	caches: SessionCaches,

	/// Bumped on every connect and wallet re-partition; signals carrying
	/// an older generation are stale and dropped.
	generation: u64,

	poller_commands: Option<mpsc::Sender<PollerCommand>>,
	poller_handle: Option<JoinHandle<()>>,
	signal_tx: mpsc::Sender<SyncSignal>,
	signal_rx: mpsc::Receiver<SyncSignal>,

	/// Branches with a fetch task in flight. At most one per branch:
	/// poller ticks and decision-driven continuations both pass through
	/// this gate, and a branch is only released when its task reports
	/// back.
	in_flight: HashSet<CurrencyBranch>,
	last_errors: HashMap<CurrencyBranch, String>,

	last_synced_at: Option<DateTime<Utc>>,
	syncing: bool,
}

impl<D, C> Session<D, C>
where
	D: SigningDevice + 'static,
	C: ChainDataService + 'static,
{
	pub fn new(device: Arc<D>, chain: Arc<C>, store: AddressStore, config: SessionConfig) -> Self {
		let (signal_tx, signal_rx) = mpsc::channel(64);

		Self {
			device,
			chain,
			store,
			config,
			connection: ConnectionState::Disconnected,
			machine: SyncStateMachine::new(),
			caches: SessionCaches::default(),
			generation: 0,
			poller_commands: None,
			poller_handle: None,
			signal_tx,
			signal_rx,
			in_flight: HashSet::new(),
			last_errors: HashMap::new(),
			last_synced_at: None,
			syncing: false,
		}
	}

	// ----- connection lifecycle -----

	/// Open a session with the device, rehydrate persisted addresses for
	/// its active wallet, start the background poller and kick off initial
	/// discovery. Returns the device's pairing status.
	pub async fn connect(&mut self, device_id: &str) -> Result<bool, SyncError> {
		self.device.connect(device_id).await?;

		// A reconnect supersedes any previous poller.
		if let Some(commands) = self.poller_commands.take() {
			let _ = commands.send(PollerCommand::Stop).await;
		}
		self.poller_handle.take();

		self.generation += 1;
		self.machine.reset();
		self.caches.clear();
		self.in_flight.clear();
		self.last_errors.clear();
		self.syncing = true;

		let wallet_id = self.device.active_wallet();
		if let Some(wid) = &wallet_id {
			self.caches.addresses = self.load_addresses(device_id, wid);
		}
		self.connection = ConnectionState::Connected {
			device_id: device_id.to_string(),
			wallet_id,
		};

		info!(
			"Session connected to device {} (generation {})",
			device_id, self.generation
		);

		self.start_poller();

		// Initial discovery for every tracked currency. Branches restored
		// from the store at or past their gap limit skip the device request
		// and go straight to a fetch.
		for currency in Currency::ALL {
			self.schedule_fetch(CurrencyBranch::main(currency), true, false);
		}

		Ok(self.device.is_paired())
	}

	/// Stop the poller and tear down all in-memory state. Responses still
	/// in flight will be discarded by the generation guard when they land.
	pub async fn disconnect(&mut self) {
		info!("Disconnecting session");

		if let Some(commands) = self.poller_commands.take() {
			let _ = commands.send(PollerCommand::Stop).await;
		}
		self.poller_handle.take();

		self.connection = ConnectionState::Disconnected;
		self.caches.clear();
		self.machine.reset();
		self.in_flight.clear();
		self.last_errors.clear();
		self.last_synced_at = None;
		self.syncing = false;
	}

	/// Complete pairing with the device.
	pub async fn pair(&self, secret: &str) -> Result<(), SyncError> {
		if !self.is_connected() {
			return Err(SyncError::DeviceUnavailable);
		}
		self.device.pair(secret).await?;
		Ok(())
	}

	/// Re-query the device for its active wallet; on a change, re-partition
	/// the persistent store, reset caches and restart synchronization.
	/// Called automatically after every completed sweep.
	pub async fn refresh_active_wallet(&mut self) {
		if let Err(e) = self.device.refresh_wallets().await {
			warn!("Wallet refresh failed: {}", e);
			return;
		}
		let active = self.device.active_wallet();

		let ConnectionState::Connected {
			device_id,
			wallet_id,
		} = &self.connection
		else {
			return;
		};
		if *wallet_id == active {
			return;
		}

		info!("Active wallet changed on device, re-partitioning session state");
		let device_id = device_id.clone();

		// Everything still in flight belongs to the old wallet.
		self.generation += 1;
		self.machine.reset();
		self.caches.clear();
		self.in_flight.clear();
		self.last_errors.clear();

		if let Some(wid) = &active {
			self.caches.addresses = self.load_addresses(&device_id, wid);
		}
		self.connection = ConnectionState::Connected {
			device_id,
			wallet_id: active.clone(),
		};

		if let Some(commands) = self.poller_commands.take() {
			let _ = commands.send(PollerCommand::Stop).await;
		}
		self.poller_handle.take();
		self.start_poller();

		if active.is_some() {
			self.syncing = true;
			for currency in Currency::ALL {
				self.schedule_fetch(CurrencyBranch::main(currency), true, false);
			}
		} else {
			// No active wallet means nothing to synchronize.
			self.syncing = false;
		}
	}

	pub fn is_connected(&self) -> bool {
		matches!(self.connection, ConnectionState::Connected { .. })
	}

	pub fn is_paired(&self) -> bool {
		self.device.is_paired()
	}

	// ----- signal pump -----

	/// Receive the next signal from the poller or a fetch task.
	pub async fn next_signal(&mut self) -> Option<SyncSignal> {
		self.signal_rx.recv().await
	}

	/// Apply one signal to session state. This is the only place caches
	/// are mutated.
	pub async fn handle_signal(&mut self, signal: SyncSignal) {
		match signal {
			SyncSignal::FetchDue { branch, generation } => {
				if !self.is_live(generation) {
					return;
				}
				if self.in_flight.contains(&branch) {
					// The previous fetch has not resolved; the branch
					// waits for the next tick.
					debug!("{}: fetch still in flight, deferring", branch);
					return;
				}
				self.schedule_fetch(branch, false, false);
			}
			SyncSignal::DataResponse {
				branch,
				snapshot,
				discovered,
				generation,
			} => {
				if !self.is_live(generation) {
					debug!("{}: dropping stale data response", branch);
					return;
				}
				self.in_flight.remove(&branch);
				if !discovered.is_empty() {
					self.append_discovered(branch, discovered).await;
				}

				let decision = self.machine.reconcile(branch, &snapshot, &mut self.caches);
				self.last_errors.remove(&branch);
				self.last_synced_at = Some(Utc::now());
				self.syncing = decision != Decision::Settled;

				match decision {
					Decision::ContinueSync => {
						self.schedule_fetch(branch, true, true);
					}
					Decision::SwitchBranch { force_discovery } => {
						let change = CurrencyBranch::change(branch.currency);
						self.schedule_fetch(change, force_discovery, force_discovery);
					}
					Decision::Settled => {}
				}
			}
			SyncSignal::Error {
				branch,
				error,
				discovered,
				generation,
			} => {
				if !self.is_live(generation) {
					debug!("{}: dropping stale error", branch);
					return;
				}
				self.in_flight.remove(&branch);
				if !discovered.is_empty() {
					self.append_discovered(branch, discovered).await;
				}
				warn!("{}: sync error: {}", branch, error);
				self.last_errors.insert(branch, error.to_string());
			}
			SyncSignal::IterationDone { generation } => {
				if !self.is_live(generation) {
					return;
				}
				self.refresh_active_wallet().await;
			}
		}
	}

	/// Drive the session until the signal channel closes. Embedders that
	/// need to interleave queries should call [`Session::next_signal`] and
	/// [`Session::handle_signal`] from their own loop instead.
	pub async fn run(&mut self) {
		while let Some(signal) = self.signal_rx.recv().await {
			self.handle_signal(signal).await;
		}
	}

	// ----- queries -----

	/// Aggregated balance in base units: main plus change, a missing
	/// change branch counting as zero.
	pub fn balance(&self, currency: Currency) -> u64 {
		self.caches.balance(currency)
	}

	/// Aggregated USD-equivalent value.
	pub fn usd_value(&self, currency: Currency) -> f64 {
		self.caches.usd_value(currency)
	}

	/// Main-branch transactions followed by change-branch transactions.
	pub fn transactions(&self, currency: Currency) -> Vec<crate::chain::TxRecord> {
		self.caches.transactions(currency)
	}

	pub fn utxos(&self, currency: Currency) -> Vec<crate::chain::Utxo> {
		self.caches.utxos(currency)
	}

	/// Next unused receive address, falling back to the first known
	/// address if none is marked unused yet.
	pub fn display_address(&self, currency: Currency) -> Option<String> {
		let main = CurrencyBranch::main(currency);
		self.caches.first_unused.get(&main).cloned().or_else(|| {
			self.caches
				.addresses
				.get(&main)
				.and_then(|list| list.first())
				.map(|record| record.address.clone())
		})
	}

	/// Sequence counter captured for account-model currencies, used by
	/// future signing requests.
	pub fn sequence_counter(&self, currency: Currency) -> Option<u64> {
		self.caches.sequence_counters.get(&currency).copied()
	}

	/// Last error reported for a branch, if its most recent fetch failed.
	pub fn last_error(&self, branch: CurrencyBranch) -> Option<&str> {
		self.last_errors.get(&branch).map(String::as_str)
	}

	pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
		self.last_synced_at
	}

	/// Whether the engine is still discovering addresses or switching
	/// branches, as of the most recently processed response.
	pub fn is_syncing(&self) -> bool {
		self.syncing
	}

	/// Discovered addresses for a branch, ordered by derivation index.
	pub fn addresses(&self, branch: CurrencyBranch) -> &[AddressRecord] {
		self.caches
			.addresses
			.get(&branch)
			.map_or(&[], Vec::as_slice)
	}

	// ----- signing -----

	/// Delegate a signing request to the device and broadcast the signed
	/// payload, returning the transaction hash.
	pub async fn sign_and_broadcast(&self, request: &SignRequest) -> Result<String, SyncError> {
		if !self.is_connected() {
			return Err(SyncError::DeviceUnavailable);
		}
		let payload = self.device.sign(request).await?;
		let tx_hash = self
			.chain
			.broadcast(request.currency, &payload.raw_hex)
			.await?;
		Ok(tx_hash)
	}

	// ----- internals -----

	fn is_live(&self, generation: u64) -> bool {
		self.is_connected() && generation == self.generation
	}

	fn start_poller(&mut self) {
		let (commands, handle) = BackgroundPoller::spawn(
			self.caches.addresses.clone(),
			self.config.poll_interval,
			self.signal_tx.clone(),
			self.generation,
		);
		self.poller_commands = Some(commands);
		self.poller_handle = Some(handle);
	}

	/// Spawn the branch's fetch task: optionally derive the next address
	/// block, wait out the device's recovery delay, then fetch chain state
	/// for the combined list. The in-flight guard serializes all fetches
	/// per branch; other branches proceed concurrently.
	fn schedule_fetch(&mut self, branch: CurrencyBranch, discover: bool, force: bool) {
		if !self.is_connected() {
			return;
		}
		if self.in_flight.contains(&branch) {
			debug!("{}: fetch already in flight, skipping", branch);
			return;
		}
		self.in_flight.insert(branch);

		let engine =
			AddressDiscoveryEngine::new(self.device.clone(), self.config.btc_address_block_len);
		let chain = self.chain.clone();
		let signals = self.signal_tx.clone();
		let generation = self.generation;
		let recovery_delay = self.config.per_address_recovery_delay;
		let existing: Vec<AddressRecord> = self
			.caches
			.addresses
			.get(&branch)
			.cloned()
			.unwrap_or_default();

		tokio::spawn(async move {
			let discovered = if discover {
				match engine.discover(branch, &existing, force).await {
					Ok(records) => records,
					Err(error) => {
						let _ = signals
							.send(SyncSignal::Error {
								branch,
								error,
								discovered: Vec::new(),
								generation,
							})
							.await;
						return;
					}
				}
			} else {
				Vec::new()
			};

			if !discovered.is_empty() {
				// The device needs recovery time per derived address before
				// the next request can be serviced.
				tokio::time::sleep(recovery_delay * discovered.len() as u32).await;
			}

			let mut addresses: Vec<String> =
				existing.iter().map(|r| r.address.clone()).collect();
			addresses.extend(discovered.iter().map(|r| r.address.clone()));

			if addresses.is_empty() {
				// The branch held nothing and the device produced nothing;
				// report it so the in-flight slot is released.
				let error = DeviceError::Request("device returned no addresses".to_string());
				let _ = signals
					.send(SyncSignal::Error {
						branch,
						error: error.into(),
						discovered: Vec::new(),
						generation,
					})
					.await;
				return;
			}

			let signal = match chain.get_state(branch.currency, &addresses).await {
				Ok(snapshot) => SyncSignal::DataResponse {
					branch,
					snapshot,
					discovered,
					generation,
				},
				Err(e) => SyncSignal::Error {
					branch,
					error: e.into(),
					discovered,
					generation,
				},
			};
			let _ = signals.send(signal).await;
		});
	}

	/// Append newly discovered records, persist the branch's full list and
	/// hand the updated book to the poller. Address lists only ever grow.
	async fn append_discovered(&mut self, branch: CurrencyBranch, discovered: Vec<AddressRecord>) {
		let list = self.caches.addresses.entry(branch).or_default();
		for record in discovered {
			// Append-only: a record must land exactly at the tail.
			if record.index as usize == list.len() {
				list.push(record);
			} else {
				debug!(
					"{}: ignoring out-of-order discovered address at index {}",
					branch, record.index
				);
			}
		}

		self.persist_addresses(branch).await;

		if let Some(commands) = &self.poller_commands {
			let _ = commands
				.send(PollerCommand::SetAddresses(self.caches.addresses.clone()))
				.await;
		}
	}

	/// Persist one branch's full address list under the current
	/// (device, wallet) partition. Storage failures are tolerated.
	async fn persist_addresses(&mut self, branch: CurrencyBranch) {
		let ConnectionState::Connected {
			device_id,
			wallet_id: Some(wallet_id),
		} = &self.connection
		else {
			return;
		};
		let (device_id, wallet_id) = (device_id.clone(), wallet_id.clone());

		let addresses: Vec<&str> = self
			.caches
			.addresses
			.get(&branch)
			.map(|list| list.iter().map(|r| r.address.as_str()).collect())
			.unwrap_or_default();

		let partial = json!({
			"addresses": { branch.storage_key(): addresses }
		});
		self.store.save(&device_id, &wallet_id, partial).await;
	}

	/// Rehydrate the address book from the store for one (device, wallet)
	/// partition. Derivation paths are rebuilt from the branch and index;
	/// a wallet identity always yields the same address at a given index,
	/// so the stored strings are authoritative.
	fn load_addresses(&self, device_id: &str, wallet_id: &str) -> AddressBook {
		let mut book = AddressBook::new();
		let record = self.store.get(device_id, wallet_id);
		let Some(map) = record.get("addresses").and_then(|a| a.as_object()) else {
			return book;
		};

		for currency in Currency::ALL {
			for branch_tag in [Branch::Main, Branch::Change] {
				if branch_tag == Branch::Change && !currency.has_change_branch() {
					continue;
				}
				let branch = CurrencyBranch {
					currency,
					branch: branch_tag,
				};
				let Some(list) = map.get(&branch.storage_key()).and_then(|v| v.as_array())
				else {
					continue;
				};

				let records: Vec<AddressRecord> = list
					.iter()
					.filter_map(|v| v.as_str())
					.enumerate()
					.map(|(index, address)| AddressRecord {
						index: index as u32,
						path: derivation_path(branch, index as u32),
						address: address.to_string(),
					})
					.collect();

				if !records.is_empty() {
					info!("Restored {} addresses for {}", records.len(), branch);
					book.insert(branch, records);
				}
			}
		}

		book
	}
}
