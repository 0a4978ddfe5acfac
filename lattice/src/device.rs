//! Boundary to the signing device SDK.
//!
//! The provider never talks to the device directly. It drives a
//! [`DeviceClient`] built by a [`DeviceConnector`] from a [`ClientConfig`],
//! and every call goes through a [`SessionHandle`](crate::session::SessionHandle)
//! so failures are normalized in one place.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DeviceFault, Result};

/// Application name used when none is configured.
pub const DEFAULT_APP_NAME: &str = "Liquality";

/// Private key authenticating the client to the device backend.
///
/// Derived as `SHA-256(password ‖ device_id ‖ app_name)`. The byte order is
/// fixed by the device firmware and must not change.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Derive the session key from pairing credentials.
    #[must_use]
    pub fn derive(password: &str, device_id: &str, app_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(device_id.as_bytes());
        hasher.update(app_name.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// Options used to construct a [`DeviceClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application name presented to the device.
    pub name: String,
    /// Signing endpoint the client talks to.
    pub base_url: String,
    /// Session key.
    pub private_key: SessionKey,
    /// Per-request timeout for device round-trips.
    pub timeout: Duration,
}

/// Request for `n` consecutive addresses starting at `start_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    /// First path to derive; the device increments the last index.
    pub start_path: Vec<u32>,
    /// Number of addresses.
    pub n: u32,
}

/// Chain-specific payload inside a [`SigningRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningData {
    /// Signing protocol tag, e.g. `signPersonal`.
    pub protocol: String,
    /// Hex-encoded payload.
    pub payload: String,
    /// Path of the signing key.
    pub signer_path: Vec<u32>,
}

/// Envelope submitted to the device for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// Currency tag, e.g. `ETH_MSG`.
    pub currency: String,
    /// Chain-specific data.
    pub data: SigningData,
}

/// Signature components as returned by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSignature {
    /// Hex-encoded `r`.
    pub r: String,
    /// Hex-encoded `s`.
    pub s: String,
    /// Recovery id, when the chain has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<u64>,
}

/// Device response to a [`SigningRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// The signature.
    pub sig: DeviceSignature,
}

/// Operations exposed by the device SDK client.
///
/// Implementations report failures as raw [`DeviceFault`]s.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Connect to the device. Returns whether this application is paired.
    async fn connect(&self, device_id: &str) -> std::result::Result<bool, DeviceFault>;

    /// Pair with a code shown on the device. Returns whether a wallet is active.
    async fn pair(&self, pairing_code: &str) -> std::result::Result<bool, DeviceFault>;

    /// Derive consecutive addresses.
    async fn get_addresses(
        &self,
        request: &AddressRequest,
    ) -> std::result::Result<Vec<String>, DeviceFault>;

    /// Ask the device to sign.
    async fn sign(&self, request: &SigningRequest) -> std::result::Result<SignResponse, DeviceFault>;
}

/// Factory for [`DeviceClient`]s, one per session.
pub trait DeviceConnector: Send + Sync {
    /// Build a client for the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] if the client cannot be constructed.
    fn client(&self, config: ClientConfig) -> std::result::Result<Arc<dyn DeviceClient>, DeviceFault>;
}

/// Supplies the pairing code shown on the device screen.
///
/// Consulted only when the device reports that this application is not yet
/// paired.
#[async_trait]
pub trait PairingCodeProvider: Send + Sync {
    /// Obtain the pairing code from the user.
    async fn pairing_code(&self) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_order() {
        let key = SessionKey::derive("hunter2", "dev-1", "Liquality");
        let expected: [u8; 32] = Sha256::digest(b"hunter2dev-1Liquality").into();
        assert_eq!(key.as_bytes(), &expected);

        let swapped = SessionKey::derive("dev-1", "hunter2", "Liquality");
        assert_ne!(key, swapped);
    }

    #[test]
    fn test_session_key_debug_is_redacted() {
        let key = SessionKey::derive("pw", "id", "app");
        assert_eq!(format!("{key:?}"), "SessionKey(<redacted>)");
    }

    #[test]
    fn test_wire_shapes() {
        let request = AddressRequest {
            start_path: vec![0x8000_002c, 0x8000_003c, 0x8000_0000, 0, 0],
            n: 5,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"startPath": [2147483692u32, 2147483708u32, 2147483648u32, 0, 0], "n": 5})
        );

        let signing = SigningRequest {
            currency: "ETH_MSG".into(),
            data: SigningData {
                protocol: "signPersonal".into(),
                payload: "0x6869".into(),
                signer_path: vec![1, 2],
            },
        };
        let value = serde_json::to_value(&signing).unwrap();
        assert_eq!(value["data"]["signerPath"], serde_json::json!([1, 2]));

        let response: SignResponse =
            serde_json::from_str(r#"{"sig":{"r":"aa","s":"bb"}}"#).unwrap();
        assert_eq!(response.sig.v, None);
    }
}
