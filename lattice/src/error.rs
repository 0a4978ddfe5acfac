//! Unified error type for the provider.
//!
//! Every failure surfaced by this crate is a [`WalletError`]. Raw device and
//! transport failures arrive as [`DeviceFault`]s and are normalized here:
//! only the message and an allow-listed subset of fields survive, so internal
//! device state carried by the SDK error (its `name`, stack, request echo)
//! never reaches the caller.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, WalletError>;

/// Transport fields that are kept when a [`DeviceFault`] is normalized.
pub const ALLOWED_DETAIL_FIELDS: &[&str] =
    &["code", "status", "statusCode", "responseCode", "retryable"];

/// Sanitized key/value details attached to a normalized error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorDetails(BTreeMap<String, Value>);

impl ErrorDetails {
    /// Create an empty detail map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Keep only the allow-listed entries of a raw field map.
    #[must_use]
    pub fn sanitize(fields: &Map<String, Value>) -> Self {
        Self(
            fields
                .iter()
                .filter(|(key, _)| ALLOWED_DETAIL_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    /// Look up a detail by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of retained details.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no details were retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the retained details in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// A raw failure reported by the device client or its transport.
///
/// This is what [`DeviceClient`](crate::device::DeviceClient) implementations
/// return. It is never handed to callers as-is; see
/// [`WalletError::from_fault`].
#[derive(Debug, Clone, Default)]
pub struct DeviceFault {
    /// SDK-level error name. Dropped on normalization.
    pub name: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary fields attached by the SDK.
    pub fields: Map<String, Value>,
}

impl DeviceFault {
    /// Create a fault with a message and no extra fields.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attach the SDK error name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a raw field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DeviceFault {}

/// Categories of [`WalletError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A derivation path string could not be parsed.
    InvalidPathSyntax,
    /// An argument was out of range.
    InvalidArgument,
    /// A path failed asset-path validation.
    PolicyViolation,
    /// Pairing or connecting to the device failed.
    DeviceUnavailable,
    /// The credential payload was malformed.
    InvalidCredential,
    /// Signing was requested for an address that was never derived.
    UnknownAddress,
    /// A device round-trip failed.
    TransportFailure,
    /// The operation is not supported.
    Unimplemented,
    /// The RPC collaborator returned an error.
    Rpc,
    /// The provider configuration is invalid.
    Config,
}

/// The error type for every provider operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum WalletError {
    /// A derivation path string could not be parsed.
    #[error("invalid derivation path: {0}")]
    InvalidPathSyntax(String),

    /// An argument was out of range (e.g. requesting zero addresses).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A derivation path is not an allowed wallet path.
    #[error("derivation path {0} is not an allowed asset path")]
    PolicyViolation(String),

    /// Pairing or connecting to the device could not complete.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The credential payload was missing fields or not valid JSON.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Signing was requested for an address not present in the cache.
    #[error("unknown address: {0}")]
    UnknownAddress(String),

    /// A device round-trip failed.
    #[error("transport failure: {message}")]
    TransportFailure {
        /// Stable message text.
        message: String,
        /// Allow-listed transport fields.
        details: ErrorDetails,
    },

    /// The operation is intentionally not supported.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The RPC collaborator reported an error.
    #[error("rpc: {0}")]
    Rpc(String),

    /// The provider configuration is invalid.
    #[error("config: {0}")]
    Config(String),
}

impl WalletError {
    /// Normalize a raw device fault into a [`WalletError::TransportFailure`].
    ///
    /// The fault's `name` and every field outside [`ALLOWED_DETAIL_FIELDS`]
    /// are discarded.
    #[must_use]
    pub fn from_fault(fault: DeviceFault) -> Self {
        let details = ErrorDetails::sanitize(&fault.fields);
        Self::TransportFailure {
            message: fault.message,
            details,
        }
    }

    /// Create an invalid path syntax error.
    #[must_use]
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPathSyntax(msg.into())
    }

    /// Create an invalid argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a device unavailable error.
    #[must_use]
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Create an invalid credential error.
    #[must_use]
    pub fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::InvalidCredential(msg.into())
    }

    /// Create an unimplemented error.
    #[must_use]
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented(operation.into())
    }

    /// Create a config error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPathSyntax(_) => ErrorKind::InvalidPathSyntax,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::InvalidCredential(_) => ErrorKind::InvalidCredential,
            Self::UnknownAddress(_) => ErrorKind::UnknownAddress,
            Self::TransportFailure { .. } => ErrorKind::TransportFailure,
            Self::Unimplemented(_) => ErrorKind::Unimplemented,
            Self::Rpc(_) => ErrorKind::Rpc,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether this error came from a failed device round-trip.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }

    /// Sanitized details, if any were retained.
    #[must_use]
    pub const fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Self::TransportFailure { details, .. } => Some(details),
            _ => None,
        }
    }
}

impl From<DeviceFault> for WalletError {
    fn from(fault: DeviceFault) -> Self {
        Self::from_fault(fault)
    }
}
