//! The provider façade.
//!
//! [`LatticeProvider`] owns one device session, one address cache and one
//! [`Chain`] adapter. Every device round-trip goes through
//! [`SessionHandle::call`](crate::session::SessionHandle::call).
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice::prelude::*;
//!
//! let backend = Backend::new(agent, connector);
//! let provider = LatticeProvider::new(Ethereum, ProviderConfig::default(), backend)?;
//!
//! let addresses = provider.get_addresses(0, 5, false).await?;
//! let signature = provider.sign_message("hello", &addresses[0].address).await?;
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, debug, info};

use crate::address::{AddressCache, AddressDeriver, AddressRecord};
use crate::chain::Chain;
use crate::config::{Network, ProviderConfig};
use crate::credential::{CredentialAgent, CredentialChannel};
use crate::device::{DeviceConnector, PairingCodeProvider};
use crate::error::{DeviceFault, Result, WalletError};
use crate::session::{SessionManager, SessionSettings};
use crate::telemetry::provider_span;

/// External collaborators a provider needs.
#[derive(Clone)]
pub struct Backend {
    /// Opens the pairing agent.
    pub agent: Arc<dyn CredentialAgent>,
    /// Builds device clients.
    pub connector: Arc<dyn DeviceConnector>,
    /// Supplies pairing codes for unpaired devices.
    pub pairing_codes: Option<Arc<dyn PairingCodeProvider>>,
}

impl Backend {
    /// Create a backend without a pairing code source.
    #[must_use]
    pub fn new(agent: Arc<dyn CredentialAgent>, connector: Arc<dyn DeviceConnector>) -> Self {
        Self {
            agent,
            connector,
            pairing_codes: None,
        }
    }

    /// Set the pairing code source.
    #[must_use]
    pub fn with_pairing_codes(mut self, codes: Arc<dyn PairingCodeProvider>) -> Self {
        self.pairing_codes = Some(codes);
        self
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("pairing_codes", &self.pairing_codes.is_some())
            .finish_non_exhaustive()
    }
}

/// Hardware signer provider for one chain.
#[derive(Debug)]
pub struct LatticeProvider<C: Chain> {
    chain: C,
    config: ProviderConfig,
    deriver: AddressDeriver,
    sessions: SessionManager,
    cache: AddressCache,
}

impl<C: Chain> LatticeProvider<C> {
    /// Create a provider. No device contact happens until the first
    /// operation that needs it.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] if the configuration is invalid.
    pub fn new(chain: C, config: ProviderConfig, backend: Backend) -> Result<Self> {
        config.validate()?;
        let deriver = AddressDeriver::new(config.derivation_path.as_str())
            .map_err(|e| WalletError::config(e.to_string()))?;

        let channel = CredentialChannel::new(backend.agent, config.agent_url()?)
            .with_timeout(config.credential_timeout())
            .with_message(config.request_message.as_str());
        let settings = SessionSettings {
            app_name: config.app_name.clone(),
            signing_endpoint: config.signing_endpoint().to_owned(),
            client_timeout: config.client_timeout(),
        };
        let sessions = SessionManager::new(
            channel,
            backend.connector,
            backend.pairing_codes,
            settings,
        );

        info!(
            chain = chain.name(),
            network = ?config.network,
            path = %config.derivation_path,
            "lattice provider created"
        );
        Ok(Self {
            chain,
            config,
            deriver,
            sessions,
            cache: AddressCache::new(),
        })
    }

    /// The chain adapter.
    pub const fn chain(&self) -> &C {
        &self.chain
    }

    /// The configuration.
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The session manager.
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The credential channel, for hosts that route agent messages by token.
    pub fn credential_channel(&self) -> &CredentialChannel {
        self.sessions.channel()
    }

    /// Network kind this provider was configured for.
    pub const fn get_connected_network(&self) -> Network {
        self.config.network
    }

    /// Pair with the device if needed.
    ///
    /// # Errors
    ///
    /// Returns the pairing error if no session can be established.
    pub async fn is_wallet_available(&self) -> Result<bool> {
        self.sessions
            .ensure_session()
            .instrument(provider_span("is_wallet_available", self.chain.name()))
            .await?;
        Ok(true)
    }

    /// Derive `count` addresses starting at index `start` on the receive
    /// (`change = false`) or change branch.
    ///
    /// Every derived record is added to the cache.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidArgument`] if `count` is zero or above
    ///   [`MAX_ADDRESSES_PER_REQUEST`](crate::address::MAX_ADDRESSES_PER_REQUEST),
    ///   or the range overflows; checked before any device contact.
    /// - [`WalletError::PolicyViolation`] if the path is not acceptable for
    ///   this chain.
    /// - Pairing errors from [`SessionManager::ensure_session`].
    /// - [`WalletError::TransportFailure`] if the device call fails or
    ///   returns the wrong number of addresses.
    pub async fn get_addresses(
        &self,
        start: u32,
        count: u32,
        change: bool,
    ) -> Result<Vec<AddressRecord>> {
        self.derive(start, count, change)
            .instrument(provider_span("get_addresses", self.chain.name()))
            .await
    }

    async fn derive(&self, start: u32, count: u32, change: bool) -> Result<Vec<AddressRecord>> {
        let plan = self.deriver.plan(start, count, change)?;
        if !self.chain.policy(self.config.network).validate(plan.start_path()) {
            return Err(WalletError::PolicyViolation(plan.start_path().to_string()));
        }

        let handle = self.sessions.ensure_session().await?;
        let request = plan.request();
        let expected = plan.len();
        let raw = handle
            .call("get_addresses", |client| async move {
                let raw = client.get_addresses(&request).await?;
                if raw.len() != expected {
                    return Err(DeviceFault::new(format!(
                        "device returned {} addresses, expected {expected}",
                        raw.len()
                    )));
                }
                Ok(raw)
            })
            .await?;

        let records = plan.into_records(raw);
        let mut added = 0usize;
        for record in &records {
            if self.cache.insert(record.clone()).await {
                added += 1;
            }
        }
        debug!(derived = records.len(), added, "addresses derived");
        Ok(records)
    }

    /// Addresses with on-chain history.
    ///
    /// # Errors
    ///
    /// Always [`WalletError::Unimplemented`]; enumeration needs a chain
    /// indexer this provider does not have.
    #[allow(clippy::unused_async)]
    pub async fn get_used_addresses(&self) -> Result<Vec<AddressRecord>> {
        Err(WalletError::unimplemented("get_used_addresses"))
    }

    /// First address without on-chain history.
    ///
    /// # Errors
    ///
    /// Always [`WalletError::Unimplemented`].
    #[allow(clippy::unused_async)]
    pub async fn get_unused_address(&self, _change: bool) -> Result<AddressRecord> {
        Err(WalletError::unimplemented("get_unused_address"))
    }

    /// Sign `message` with the key behind the cached address `from`.
    ///
    /// Returns the signature in the chain's [`SignatureEncoding`](crate::chain::SignatureEncoding).
    ///
    /// # Errors
    ///
    /// - [`WalletError::UnknownAddress`] if `from` was never derived by this
    ///   provider; the device is not contacted.
    /// - [`WalletError::Unimplemented`] if the chain cannot sign messages.
    /// - Pairing errors from [`SessionManager::ensure_session`].
    /// - [`WalletError::TransportFailure`] if signing fails or the signature
    ///   is malformed.
    pub async fn sign_message(&self, message: impl AsRef<[u8]>, from: &str) -> Result<String> {
        self.sign(message.as_ref(), from)
            .instrument(provider_span("sign_message", self.chain.name()))
            .await
    }

    async fn sign(&self, message: &[u8], from: &str) -> Result<String> {
        let record = self
            .cache
            .find(from)
            .await
            .ok_or_else(|| WalletError::UnknownAddress(from.to_owned()))?;
        let request = self.chain.signing_request(message, &record)?;
        let encoding = self.chain.signature_encoding();

        let handle = self.sessions.ensure_session().await?;
        let signature = handle
            .call("sign", |client| async move {
                let response = client.sign(&request).await?;
                encoding.encode(&response.sig)
            })
            .await?;
        info!(
            address = %record.address,
            path = %record.derivation_path,
            currency = self.chain.currency(),
            "message signed"
        );
        Ok(signature)
    }

    /// Look up a cached address.
    pub async fn find_cached(&self, address: &str) -> Option<AddressRecord> {
        self.cache.find(address).await
    }

    /// All cached addresses in derivation order.
    pub async fn cached_addresses(&self) -> Vec<AddressRecord> {
        self.cache.records().await
    }
}
