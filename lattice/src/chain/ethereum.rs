//! Ethereum adapter.
//!
//! Messages are signed with the device's `signPersonal` protocol, so the
//! device applies the `"\x19Ethereum Signed Message:\n"` prefix itself.

use alloy::primitives::hex;

use super::{Chain, SignatureEncoding};
use crate::address::AddressRecord;
use crate::config::Network;
use crate::device::{SigningData, SigningRequest};
use crate::error::Result;
use crate::path::{AssetPathPolicy, hardened};

/// Ethereum personal-message signing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ethereum;

impl Ethereum {
    /// Currency tag for personal messages.
    pub const CURRENCY: &'static str = "ETH_MSG";
    /// Device signing protocol.
    pub const PROTOCOL: &'static str = "signPersonal";
}

impl Chain for Ethereum {
    fn name(&self) -> &'static str {
        "ethereum"
    }

    fn currency(&self) -> &'static str {
        Self::CURRENCY
    }

    fn policy(&self, network: Network) -> AssetPathPolicy {
        let coins = if network.is_testnet() {
            vec![hardened(60), hardened(1)]
        } else {
            vec![hardened(60)]
        };
        AssetPathPolicy::new([hardened(44)], coins, [hardened(0)], [0, 1])
    }

    fn signing_request(&self, message: &[u8], record: &AddressRecord) -> Result<SigningRequest> {
        let signer_path = record.path()?;
        Ok(SigningRequest {
            currency: self.currency().into(),
            data: SigningData {
                protocol: Self::PROTOCOL.into(),
                payload: hex::encode_prefixed(message),
                signer_path: signer_path.indices().to_vec(),
            },
        })
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Recoverable
    }
}
