//! Chain adapters for signing.
//!
//! A [`Chain`] decides which derivation paths are acceptable, how a message is
//! wrapped into a device [`SigningRequest`], and how the device's signature is
//! encoded for the caller.
//!
//! # Supported Chains
//!
//! - [`Ethereum`]: personal-message signing, recoverable `r ‖ s ‖ v`
//! - [`Bitcoin`]: address derivation only

use alloy::primitives::{Signature, U256, hex};

use crate::address::AddressRecord;
use crate::config::Network;
use crate::device::{DeviceSignature, SigningRequest};
use crate::error::{DeviceFault, Result};
use crate::path::AssetPathPolicy;

pub mod bitcoin;
pub mod ethereum;

pub use bitcoin::Bitcoin;
pub use ethereum::Ethereum;

/// How a device signature is presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureEncoding {
    /// `r ‖ s`, 64 bytes, hex without prefix.
    Raw,
    /// `r ‖ s ‖ v` with `v ∈ {27, 28}`, 65 bytes, hex without prefix.
    Recoverable,
}

impl SignatureEncoding {
    /// Encode a device signature.
    ///
    /// `r` and `s` may carry a `0x` prefix and are left-padded to 32 bytes.
    /// `v` may be a parity bit, `27`/`28`, or an EIP-155 value.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceFault`] if the components are not valid hex, exceed
    /// 32 bytes, or `v` is missing or out of range for a recoverable encoding.
    pub fn encode(self, sig: &DeviceSignature) -> std::result::Result<String, DeviceFault> {
        let r = scalar("r", &sig.r)?;
        let s = scalar("s", &sig.s)?;
        match self {
            Self::Raw => {
                let mut bytes = [0u8; 64];
                bytes[..32].copy_from_slice(&r);
                bytes[32..].copy_from_slice(&s);
                Ok(hex::encode(bytes))
            }
            Self::Recoverable => {
                let v = sig
                    .v
                    .ok_or_else(|| DeviceFault::new("device signature has no recovery id"))?;
                let signature = Signature::new(
                    U256::from_be_bytes(r),
                    U256::from_be_bytes(s),
                    parity(v)?,
                );
                Ok(hex::encode(signature.as_bytes()))
            }
        }
    }
}

fn scalar(name: &str, value: &str) -> std::result::Result<[u8; 32], DeviceFault> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
    .map_err(|e| DeviceFault::new(format!("signature component {name} is not hex: {e}")))?;

    if decoded.len() > 32 {
        return Err(DeviceFault::new(format!(
            "signature component {name} is {} bytes",
            decoded.len()
        )));
    }
    let mut out = [0u8; 32];
    out[32 - decoded.len()..].copy_from_slice(&decoded);
    Ok(out)
}

fn parity(v: u64) -> std::result::Result<bool, DeviceFault> {
    match v {
        0 | 1 => Ok(v == 1),
        27 | 28 => Ok(v == 28),
        v if v >= 35 => Ok((v - 35) % 2 == 1),
        v => Err(DeviceFault::new(format!("invalid recovery id {v}"))),
    }
}

/// Trait for chain adapters.
///
/// Implement this trait to add signing support for another chain.
pub trait Chain: Send + Sync {
    /// Chain name used in logs (e.g., "ethereum").
    fn name(&self) -> &'static str;

    /// Currency tag of signing requests.
    fn currency(&self) -> &'static str;

    /// Derivation paths this chain accepts on `network`.
    fn policy(&self, network: Network) -> AssetPathPolicy;

    /// Wrap `message` into a signing request for the key behind `record`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unimplemented`](crate::error::WalletError::Unimplemented)
    /// if the chain does not support message signing, or
    /// [`WalletError::InvalidPathSyntax`](crate::error::WalletError::InvalidPathSyntax)
    /// if the record's path is malformed.
    fn signing_request(&self, message: &[u8], record: &AddressRecord) -> Result<SigningRequest>;

    /// Encoding applied to the device signature.
    fn signature_encoding(&self) -> SignatureEncoding;
}
