//! Shared test doubles: a deterministic in-memory signing device and a
//! scripted chain-data service.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use wallet_state_sync::chain::{Balance, BranchSnapshot, ChainDataService, ChainError, TxRecord};
use wallet_state_sync::device::{DeviceError, SignRequest, SignedPayload, SigningDevice};
use wallet_state_sync::wallet::types::{Currency, HARDENED_OFFSET};

/// Opt-in log output for debugging test runs, driven by `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Deterministic mock device: the address at (branch, index) is a pure
/// function of the derivation path, so re-deriving always returns the same
/// strings. Every address request is logged for assertions.
pub struct MockDevice {
	paired: bool,
	active_wallet: Mutex<Option<String>>,
	fail_requests: AtomicBool,
	/// (start_path, count) per get_addresses call.
	pub address_requests: Mutex<Vec<(Vec<u32>, usize)>>,
}

impl MockDevice {
	pub fn new(wallet_id: &str) -> Self {
		Self {
			paired: true,
			active_wallet: Mutex::new(Some(wallet_id.to_string())),
			fail_requests: AtomicBool::new(false),
			address_requests: Mutex::new(Vec::new()),
		}
	}

	pub fn set_active_wallet(&self, wallet_id: Option<&str>) {
		*self.active_wallet.lock().unwrap() = wallet_id.map(str::to_string);
	}

	pub fn fail_address_requests(&self, fail: bool) {
		self.fail_requests.store(fail, Ordering::SeqCst);
	}

	pub fn request_count(&self) -> usize {
		self.address_requests.lock().unwrap().len()
	}

	/// Branch tag encoded in mock addresses, e.g. `btc-main`.
	pub fn branch_tag(path: &[u32]) -> &'static str {
		let coin = path[1] & !HARDENED_OFFSET;
		match (coin, path[3]) {
			(0, 0) => "btc-main",
			(0, 1) => "btc-change",
			(60, 0) => "eth-main",
			_ => "unknown",
		}
	}
}

#[async_trait::async_trait]
impl SigningDevice for MockDevice {
	async fn connect(&self, _device_id: &str) -> Result<(), DeviceError> {
		Ok(())
	}

	async fn get_addresses(
		&self,
		start_path: &[u32],
		count: usize,
	) -> Result<Vec<String>, DeviceError> {
		if self.fail_requests.load(Ordering::SeqCst) {
			return Err(DeviceError::Request("mock device timeout".to_string()));
		}

		self.address_requests
			.lock()
			.unwrap()
			.push((start_path.to_vec(), count));

		let tag = Self::branch_tag(start_path);
		let start = start_path[4];
		Ok((0..count as u32)
			.map(|offset| format!("{}-{}", tag, start + offset))
			.collect())
	}

	async fn sign(&self, _request: &SignRequest) -> Result<SignedPayload, DeviceError> {
		Ok(SignedPayload {
			raw_hex: "deadbeef".to_string(),
		})
	}

	async fn pair(&self, _secret: &str) -> Result<(), DeviceError> {
		Ok(())
	}

	fn is_paired(&self) -> bool {
		self.paired
	}

	async fn refresh_wallets(&self) -> Result<(), DeviceError> {
		Ok(())
	}

	fn active_wallet(&self) -> Option<String> {
		self.active_wallet.lock().unwrap().clone()
	}
}

/// Scripted chain-data service. Responses are queued per branch tag (the
/// prefix of the first queried address); the last response in a queue is
/// sticky so the fixed-interval poller can keep fetching after a script
/// runs out. An optional latency is applied to every fetch, and the peak
/// number of simultaneous fetches is recorded per branch tag.
pub struct MockChain {
	scripts: Mutex<HashMap<String, VecDeque<BranchSnapshot>>>,
	delay: Mutex<Duration>,
	in_flight: Mutex<HashMap<String, usize>>,
	max_in_flight: Mutex<HashMap<String, usize>>,
	/// (branch tag, address count) per get_state call.
	pub fetch_log: Mutex<Vec<(String, usize)>>,
	pub broadcasts: Mutex<Vec<(Currency, String)>>,
}

impl MockChain {
	pub fn new() -> Self {
		Self {
			scripts: Mutex::new(HashMap::new()),
			delay: Mutex::new(Duration::ZERO),
			in_flight: Mutex::new(HashMap::new()),
			max_in_flight: Mutex::new(HashMap::new()),
			fetch_log: Mutex::new(Vec::new()),
			broadcasts: Mutex::new(Vec::new()),
		}
	}

	pub fn script(&self, tag: &str, responses: Vec<BranchSnapshot>) {
		self.scripts
			.lock()
			.unwrap()
			.entry(tag.to_string())
			.or_default()
			.extend(responses);
	}

	/// Latency applied to every subsequent fetch.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = delay;
	}

	/// Peak number of fetches that were in flight at once for a branch tag.
	pub fn max_concurrent_fetches(&self, tag: &str) -> usize {
		self.max_in_flight
			.lock()
			.unwrap()
			.get(tag)
			.copied()
			.unwrap_or(0)
	}

	fn tag_of(address: &str) -> String {
		// "btc-main-7" -> "btc-main"
		address.rsplit_once('-').map(|(tag, _)| tag.to_string()).unwrap_or_default()
	}
}

#[async_trait::async_trait]
impl ChainDataService for MockChain {
	async fn get_state(
		&self,
		_currency: Currency,
		addresses: &[String],
	) -> Result<BranchSnapshot, ChainError> {
		let tag = Self::tag_of(&addresses[0]);
		self.fetch_log
			.lock()
			.unwrap()
			.push((tag.clone(), addresses.len()));

		let delay = *self.delay.lock().unwrap();
		{
			let mut current = self.in_flight.lock().unwrap();
			let count = current.entry(tag.clone()).or_insert(0);
			*count += 1;
			let mut peaks = self.max_in_flight.lock().unwrap();
			let peak = peaks.entry(tag.clone()).or_insert(0);
			*peak = (*peak).max(*count);
		}
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		if let Some(count) = self.in_flight.lock().unwrap().get_mut(&tag) {
			*count -= 1;
		}

		let mut scripts = self.scripts.lock().unwrap();
		let queue = scripts
			.get_mut(&tag)
			.ok_or_else(|| ChainError::Service(format!("no script for {}", tag)))?;
		if queue.is_empty() {
			return Err(ChainError::Service(format!("script exhausted for {}", tag)));
		}
		if queue.len() > 1 {
			Ok(queue.pop_front().unwrap())
		} else {
			Ok(queue.front().unwrap().clone())
		}
	}

	async fn broadcast(&self, currency: Currency, signed_hex: &str) -> Result<String, ChainError> {
		self.broadcasts
			.lock()
			.unwrap()
			.push((currency, signed_hex.to_string()));
		Ok("txhash0".to_string())
	}
}

/// Snapshot builder used by the scripts.
pub fn snapshot(
	value: u64,
	usd_amount: f64,
	first_unused: i64,
	last_unused: i64,
	transaction_count: u64,
) -> BranchSnapshot {
	BranchSnapshot {
		balance: Balance { value, usd_amount },
		transactions: Vec::new(),
		utxos: Vec::new(),
		first_unused,
		last_unused,
		transaction_count,
	}
}

pub fn tx(hash: &str, value: u64) -> TxRecord {
	TxRecord {
		hash: hash.to_string(),
		value,
		incoming: true,
		recipient: "recipient".to_string(),
		height: 100,
		timestamp: 1_700_000_000_000,
	}
}
