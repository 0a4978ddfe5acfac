//! Address derivation planning and the per-provider address cache.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::device::AddressRequest;
use crate::error::{Result, WalletError};
use crate::path::{DerivationPath, HARDENED_OFFSET, with_change_and_index};

/// Most addresses the device returns for one request.
pub const MAX_ADDRESSES_PER_REQUEST: u32 = 10;

/// An address derived by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    /// Address string as returned by the device.
    pub address: String,
    /// Concrete derivation path of this address.
    pub derivation_path: String,
    /// Key material reported by the device for this address.
    pub public_key: String,
}

impl AddressRecord {
    /// Parsed derivation path.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidPathSyntax`] if the stored path is malformed.
    pub fn path(&self) -> Result<DerivationPath> {
        DerivationPath::parse(&self.derivation_path)
    }
}

/// Plans device requests along a configured path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDeriver {
    template: String,
}

impl AddressDeriver {
    /// Create a deriver for a full path template such as `m/44'/60'/0'/0/0`.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidPathSyntax`] if the template does not
    /// parse or lacks change/index components.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        with_change_and_index(&template, 0, 0)?;
        Ok(Self { template })
    }

    /// The configured template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Plan the derivation of `count` addresses from `start`.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidArgument`] if `count` is zero or above
    /// [`MAX_ADDRESSES_PER_REQUEST`], or the index range leaves the
    /// non-hardened space.
    pub fn plan(&self, start: u32, count: u32, change: bool) -> Result<DerivationPlan> {
        if count < 1 {
            return Err(WalletError::invalid_argument(
                "at least one address must be requested",
            ));
        }
        if count > MAX_ADDRESSES_PER_REQUEST {
            return Err(WalletError::invalid_argument(format!(
                "at most {MAX_ADDRESSES_PER_REQUEST} addresses can be requested at once, got {count}"
            )));
        }
        let last = start
            .checked_add(count - 1)
            .filter(|&last| last < HARDENED_OFFSET)
            .ok_or_else(|| {
                WalletError::invalid_argument(format!("index range {start}+{count} overflows"))
            })?;
        let change = u32::from(change);

        let paths = (start..=last)
            .map(|index| with_change_and_index(&self.template, change, index))
            .collect::<Result<Vec<_>>>()?;
        let start_path = DerivationPath::parse(&paths[0])?;

        Ok(DerivationPlan { start_path, paths })
    }
}

/// A planned derivation: the device request plus the expected paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPlan {
    start_path: DerivationPath,
    paths: Vec<String>,
}

impl DerivationPlan {
    /// Path of the first address.
    #[must_use]
    pub const fn start_path(&self) -> &DerivationPath {
        &self.start_path
    }

    /// Concrete path strings, one per requested address.
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Number of addresses requested.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Always `false`; plans hold at least one address.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// The request sent to the device.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn request(&self) -> AddressRequest {
        AddressRequest {
            start_path: self.start_path.indices().to_vec(),
            n: self.paths.len() as u32,
        }
    }

    /// Pair raw device addresses with their paths.
    ///
    /// `raw` must hold exactly [`len`](Self::len) entries, in order.
    #[must_use]
    pub fn into_records(self, raw: Vec<String>) -> Vec<AddressRecord> {
        self.paths
            .into_iter()
            .zip(raw)
            .map(|(derivation_path, address)| AddressRecord {
                public_key: address.clone(),
                address,
                derivation_path,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    records: Vec<AddressRecord>,
    by_address: HashMap<String, usize>,
}

/// Derived addresses, keyed by exact address string.
#[derive(Debug, Default)]
pub struct AddressCache {
    inner: RwLock<CacheInner>,
}

impl AddressCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless one with the same address is already cached.
    ///
    /// Returns `true` if the record was inserted.
    pub async fn insert(&self, record: AddressRecord) -> bool {
        let mut inner = self.inner.write().await;
        if inner.by_address.contains_key(&record.address) {
            return false;
        }
        let position = inner.records.len();
        inner.by_address.insert(record.address.clone(), position);
        inner.records.push(record);
        true
    }

    /// Look up a record by exact address string.
    pub async fn find(&self, address: &str) -> Option<AddressRecord> {
        let inner = self.inner.read().await;
        inner
            .by_address
            .get(address)
            .map(|&position| inner.records[position].clone())
    }

    /// All cached records in insertion order.
    pub async fn records(&self) -> Vec<AddressRecord> {
        self.inner.read().await.records.clone()
    }

    /// Number of cached records.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
