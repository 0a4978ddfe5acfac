//! Provider configuration.
//!
//! [`ProviderConfig`] can be deserialized from any serde format or assembled
//! with [`ProviderConfig::builder`]. Endpoints default per [`Network`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::credential::CREDENTIAL_REQUEST_MESSAGE;
use crate::device::DEFAULT_APP_NAME;
use crate::error::{Result, WalletError};
use crate::path::DerivationPath;

/// Pairing agent for production devices.
pub const AGENT_URL_MAINNET: &str = "https://lattice.gridplus.io";
/// Pairing agent for development devices.
pub const AGENT_URL_TESTNET: &str = "https://gridplus-web-wallet-dev.herokuapp.com";
/// Production signing endpoint.
pub const SIGNING_ENDPOINT_MAINNET: &str = "https://signing.gridpl.us";
/// Staging signing endpoint.
pub const SIGNING_ENDPOINT_TESTNET: &str = "https://signing.staging-gridpl.us";

/// Network kind, selecting default endpoints and chain policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    #[default]
    Mainnet,
    /// Test network.
    Testnet,
}

impl Network {
    /// Default pairing agent URL.
    #[must_use]
    pub const fn agent_url(self) -> &'static str {
        match self {
            Self::Mainnet => AGENT_URL_MAINNET,
            Self::Testnet => AGENT_URL_TESTNET,
        }
    }

    /// Default signing endpoint.
    #[must_use]
    pub const fn signing_endpoint(self) -> &'static str {
        match self {
            Self::Mainnet => SIGNING_ENDPOINT_MAINNET,
            Self::Testnet => SIGNING_ENDPOINT_TESTNET,
        }
    }

    /// Whether this is a test network.
    #[must_use]
    pub const fn is_testnet(self) -> bool {
        matches!(self, Self::Testnet)
    }
}

/// Configuration for a [`LatticeProvider`](crate::provider::LatticeProvider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Network kind.
    pub network: Network,
    /// Full derivation path of the first address; the last two components
    /// are replaced by change and index.
    pub derivation_path: String,
    /// Application name presented to the device and mixed into the session key.
    pub app_name: String,
    /// Pairing agent URL override.
    pub agent_url: Option<String>,
    /// Signing endpoint override. A credential's own endpoint still wins.
    pub signing_endpoint: Option<String>,
    /// Bound on the credential exchange, in milliseconds. Unbounded when unset.
    pub credential_timeout_ms: Option<u64>,
    /// Timeout for each device round-trip, in milliseconds.
    pub client_timeout_ms: u64,
    /// Request message sent to the pairing agent.
    pub request_message: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            derivation_path: "m/44'/60'/0'/0/0".into(),
            app_name: DEFAULT_APP_NAME.into(),
            agent_url: None,
            signing_endpoint: None,
            credential_timeout_ms: None,
            client_timeout_ms: 180_000,
            request_message: CREDENTIAL_REQUEST_MESSAGE.into(),
        }
    }
}

impl ProviderConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Check that the path and URLs are well formed.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let path = DerivationPath::parse(&self.derivation_path)
            .map_err(|e| WalletError::config(e.to_string()))?;
        if path.len() < 2 {
            return Err(WalletError::config(format!(
                "derivation path {} has no change/index components",
                self.derivation_path
            )));
        }
        if self.credential_timeout_ms == Some(0) {
            return Err(WalletError::config("credential timeout must be positive"));
        }
        if self.client_timeout_ms == 0 {
            return Err(WalletError::config("client timeout must be positive"));
        }
        if self.app_name.is_empty() {
            return Err(WalletError::config("app_name must not be empty"));
        }
        self.agent_url()?;
        Url::parse(self.signing_endpoint()).map_err(|e| {
            WalletError::config(format!("invalid signing endpoint '{}': {e}", self.signing_endpoint()))
        })?;
        Ok(())
    }

    /// Effective pairing agent URL.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] if the override does not parse.
    pub fn agent_url(&self) -> Result<Url> {
        let raw = self
            .agent_url
            .as_deref()
            .unwrap_or_else(|| self.network.agent_url());
        Url::parse(raw).map_err(|e| WalletError::config(format!("invalid agent url '{raw}': {e}")))
    }

    /// Effective signing endpoint.
    #[must_use]
    pub fn signing_endpoint(&self) -> &str {
        self.signing_endpoint
            .as_deref()
            .unwrap_or_else(|| self.network.signing_endpoint())
    }

    /// Credential exchange bound.
    #[must_use]
    pub fn credential_timeout(&self) -> Option<Duration> {
        self.credential_timeout_ms.map(Duration::from_millis)
    }

    /// Per-request device timeout.
    #[must_use]
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

/// Builder for [`ProviderConfig`].
///
/// ```rust,ignore
/// let config = ProviderConfig::builder()
///     .network(Network::Testnet)
///     .derivation_path("m/84'/1'/0'/0/0")
///     .credential_timeout(Duration::from_secs(120))
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Set the network kind.
    #[must_use]
    pub const fn network(mut self, network: Network) -> Self {
        self.config.network = network;
        self
    }

    /// Set the derivation path of the first address.
    #[must_use]
    pub fn derivation_path(mut self, path: impl Into<String>) -> Self {
        self.config.derivation_path = path.into();
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Override the pairing agent URL.
    #[must_use]
    pub fn agent_url(mut self, url: impl Into<String>) -> Self {
        self.config.agent_url = Some(url.into());
        self
    }

    /// Override the signing endpoint.
    #[must_use]
    pub fn signing_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.signing_endpoint = Some(url.into());
        self
    }

    /// Bound the credential exchange.
    #[must_use]
    pub fn credential_timeout(mut self, timeout: Duration) -> Self {
        self.config.credential_timeout_ms = Some(millis(timeout));
        self
    }

    /// Set the per-request device timeout.
    #[must_use]
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.config.client_timeout_ms = millis(timeout);
        self
    }

    /// Set the request message sent to the pairing agent.
    #[must_use]
    pub fn request_message(mut self, message: impl Into<String>) -> Self {
        self.config.request_message = message.into();
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Config`] if validation fails.
    pub fn build(self) -> Result<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
