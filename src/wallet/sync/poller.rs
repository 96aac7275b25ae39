//! Background polling loop.
//!
//! The poller runs as its own Tokio task on a fixed interval, independent
//! of request latency. Each tick sweeps every tracked branch that has
//! addresses and emits [`SyncSignal::FetchDue`] for it; the session owns
//! the actual fetch and skips branches whose previous fetch has not
//! resolved yet, keeping at most one request in flight per branch. The
//! poller never touches the network or the session caches: the address
//! book it sweeps is its own copy, replaced via
//! [`PollerCommand::SetAddresses`].
//!
//! There is no backoff anywhere; the fixed interval is the sole retry
//! mechanism.

use crate::wallet::sync::messages::{PollerCommand, SyncSignal};
use crate::wallet::types::{AddressBook, Branch, Currency, CurrencyBranch};

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Periodic sweep task over all tracked currencies.
pub struct BackgroundPoller {
	addresses: AddressBook,
	interval: Duration,
	commands: mpsc::Receiver<PollerCommand>,
	signals: mpsc::Sender<SyncSignal>,
	generation: u64,
}

impl BackgroundPoller {
	/// Spawn the poller task. Returns the command channel and the task
	/// handle; the task exits on [`PollerCommand::Stop`] or when the
	/// command channel closes.
	pub fn spawn(
		addresses: AddressBook,
		interval: Duration,
		signals: mpsc::Sender<SyncSignal>,
		generation: u64,
	) -> (mpsc::Sender<PollerCommand>, JoinHandle<()>) {
		let (command_tx, command_rx) = mpsc::channel(16);

		let poller = Self {
			addresses,
			interval,
			commands: command_rx,
			signals,
			generation,
		};

		let handle = tokio::spawn(poller.run());
		(command_tx, handle)
	}

	async fn run(mut self) {
		info!(
			"Background poller started (interval {:?}, generation {})",
			self.interval, self.generation
		);

		let mut ticker = tokio::time::interval(self.interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				command = self.commands.recv() => {
					match command {
						Some(PollerCommand::SetAddresses(book)) => {
							debug!("Poller address book replaced ({} branches)", book.len());
							self.addresses = book;
						}
						Some(PollerCommand::Stop) | None => {
							info!("Background poller stopping");
							return;
						}
					}
				}
				_ = ticker.tick() => {
					if !self.sweep().await {
						// Session side went away; no one is listening.
						return;
					}
				}
			}
		}
	}

	/// One full iteration over the tracked currency set. Returns false
	/// when the signal channel has closed.
	async fn sweep(&self) -> bool {
		for currency in Currency::ALL {
			for branch_tag in [Branch::Main, Branch::Change] {
				if branch_tag == Branch::Change && !currency.has_change_branch() {
					continue;
				}
				let branch = CurrencyBranch {
					currency,
					branch: branch_tag,
				};

				let Some(records) = self.addresses.get(&branch) else {
					continue;
				};
				if records.is_empty() {
					continue;
				}

				let due = SyncSignal::FetchDue {
					branch,
					generation: self.generation,
				};
				if self.signals.send(due).await.is_err() {
					return false;
				}
			}
		}

		self.signals
			.send(SyncSignal::IterationDone {
				generation: self.generation,
			})
			.await
			.is_ok()
	}
}
