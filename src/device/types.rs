//! Types for the signing-device boundary.

use crate::wallet::types::Currency;

/// A request for the device to sign, paired with the currency it belongs
/// to so the resulting payload can be routed to the right broadcast
/// endpoint.
#[derive(Debug, Clone)]
pub struct SignRequest {
	pub currency: Currency,
	/// Serialized unsigned transaction, hex encoded.
	pub payload_hex: String,
}

/// A signed transaction payload ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedPayload {
	/// Fully serialized transaction including signatures, hex encoded.
	pub raw_hex: String,
}

/// Error types for signing-device operations
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
	#[error("device not connected")]
	NotConnected,

	#[error("device request failed: {0}")]
	Request(String),

	#[error("pairing rejected: {0}")]
	Pairing(String),

	#[error("signing failed: {0}")]
	Signing(String),
}
