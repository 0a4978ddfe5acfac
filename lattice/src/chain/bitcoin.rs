//! Bitcoin adapter.
//!
//! Only address derivation goes through the device. Message signing is not
//! supported by the device firmware for this chain.

use super::{Chain, SignatureEncoding};
use crate::address::AddressRecord;
use crate::config::Network;
use crate::device::SigningRequest;
use crate::error::{Result, WalletError};
use crate::path::{AssetPathPolicy, hardened};

/// Bitcoin legacy and wrapped-segwit accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bitcoin;

impl Chain for Bitcoin {
    fn name(&self) -> &'static str {
        "bitcoin"
    }

    fn currency(&self) -> &'static str {
        "BTC"
    }

    fn policy(&self, network: Network) -> AssetPathPolicy {
        let coin = if network.is_testnet() { 1 } else { 0 };
        AssetPathPolicy::new(
            [hardened(44), hardened(49)],
            [hardened(coin)],
            [hardened(0)],
            [0, 1],
        )
    }

    fn signing_request(&self, _message: &[u8], _record: &AddressRecord) -> Result<SigningRequest> {
        Err(WalletError::unimplemented("bitcoin message signing"))
    }

    fn signature_encoding(&self) -> SignatureEncoding {
        SignatureEncoding::Raw
    }
}
