//!
//! HTTP client for the remote chain-data service.
//!
//! The service aggregates balances, transactions and UTXOs over a list of
//! addresses in a single call, and accepts signed transaction payloads for
//! broadcast. All methods are async and designed for use with Tokio.

use super::types::*;
use crate::wallet::types::Currency;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Abstraction over the chain-data service, so the sync engine can be
/// driven by a scripted implementation in tests.
#[async_trait::async_trait]
pub trait ChainDataService: Send + Sync {
	/// Fetch the aggregated state for the given address list.
	async fn get_state(
		&self,
		currency: Currency,
		addresses: &[String],
	) -> Result<BranchSnapshot, ChainError>;

	/// Broadcast a signed transaction, returning its hash.
	async fn broadcast(&self, currency: Currency, signed_hex: &str) -> Result<String, ChainError>;
}

/// Chain-data service client backed by the hosted JSON API.
#[derive(Clone)]
pub struct HttpChainClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the chain-data API.
	base_url: String,
}

impl HttpChainClient {
	/// Create a new chain-data client for the given API base URL.
	pub fn new(base_url: String) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http_client,
			base_url,
		}
	}

	/// Execute a POST request and unwrap the service's `{data, error}` envelope.
	async fn execute(
		&self,
		endpoint: &str,
		body: serde_json::Value,
	) -> Result<serde_json::Value, ChainError> {
		let url = format!("{}{}", self.base_url, endpoint);
		debug!("POST {}", url);

		let response = self
			.http_client
			.post(&url)
			.json(&body)
			.send()
			.await?
			.json::<serde_json::Value>()
			.await?;

		if let Some(err) = response.get("error").and_then(|e| e.as_str()) {
			return Err(ChainError::Service(err.to_string()));
		}

		response
			.get("data")
			.cloned()
			.ok_or(ChainError::NoData)
	}
}

#[async_trait::async_trait]
impl ChainDataService for HttpChainClient {
	async fn get_state(
		&self,
		currency: Currency,
		addresses: &[String],
	) -> Result<BranchSnapshot, ChainError> {
		debug!(
			"Fetching chain state for {} over {} addresses",
			currency.code(),
			addresses.len()
		);

		let body = json!({
			"currency": currency.code(),
			"addresses": addresses,
		});

		let data = self.execute("/v2/accounts/state", body).await?;
		let snapshot: BranchSnapshot = serde_json::from_value(data)?;
		Ok(snapshot)
	}

	async fn broadcast(&self, currency: Currency, signed_hex: &str) -> Result<String, ChainError> {
		let body = json!({
			"currency": currency.code(),
			"hex": signed_hex,
		});

		let data = self.execute("/v2/accounts/broadcast", body).await?;
		let tx_hash = data.as_str().ok_or(ChainError::NoData)?.to_string();

		info!("Broadcast accepted, tx hash {}", tx_hash);
		Ok(tx_hash)
	}
}
