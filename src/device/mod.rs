//! Signing-device boundary.
//!
//! The engine never talks to device hardware directly; everything it needs
//! from the signer is expressed through the [`SigningDevice`] trait. A real
//! transport (USB, HTTP relay, ...) implements the trait outside this
//! crate; tests drive the engine with a deterministic in-memory device.

pub mod types;

pub use types::*;

/// Contract the sync engine requires from a signing device.
///
/// Address derivation is slow and stateful on real hardware: addresses must
/// be requested in bounded consecutive blocks, and the device needs time to
/// recover between blocks. The engine owns that pacing; implementations
/// only execute individual requests.
#[async_trait::async_trait]
pub trait SigningDevice: Send + Sync {
	/// Open a session with the device identified by `device_id`.
	async fn connect(&self, device_id: &str) -> Result<(), DeviceError>;

	/// Request `count` consecutive addresses starting at the derivation
	/// path `start_path`. The last path segment is the starting index.
	async fn get_addresses(
		&self,
		start_path: &[u32],
		count: usize,
	) -> Result<Vec<String>, DeviceError>;

	/// Sign a transaction payload.
	async fn sign(&self, request: &SignRequest) -> Result<SignedPayload, DeviceError>;

	/// Complete pairing with the device using an out-of-band secret.
	async fn pair(&self, secret: &str) -> Result<(), DeviceError>;

	/// Whether this client is paired with the device.
	fn is_paired(&self) -> bool;

	/// Re-query the device for its wallet set. Call before reading
	/// [`SigningDevice::active_wallet`] when freshness matters.
	async fn refresh_wallets(&self) -> Result<(), DeviceError>;

	/// Identity of the seed-backed wallet currently active on the device,
	/// if any. Stable across devices holding the same seed.
	fn active_wallet(&self) -> Option<String>;
}
