//! Common re-exports.

pub use crate::address::AddressRecord;
pub use crate::chain::{Bitcoin, Chain, Ethereum, SignatureEncoding};
pub use crate::config::{Network, ProviderConfig};
pub use crate::credential::{CredentialAgent, Delivery, StaticCredentialAgent};
pub use crate::device::{DeviceClient, DeviceConnector, PairingCodeProvider};
pub use crate::error::{ErrorKind, Result, WalletError};
pub use crate::path::DerivationPath;
pub use crate::provider::{Backend, LatticeProvider};
pub use crate::rpc::{JsonRpcClient, RpcSubmit};
pub use crate::session::SessionState;
