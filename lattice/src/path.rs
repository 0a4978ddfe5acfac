//! HD derivation path codec and asset-path policy.
//!
//! Paths use the usual `m/p'/c'/a'/change/index` notation. A trailing `'`
//! (or `h`/`H`) marks a hardened index, stored with [`HARDENED_OFFSET`] added.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// Offset added to hardened indices.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

const HARDENED_MARKERS: [char; 3] = ['\'', 'h', 'H'];

/// Return the hardened form of `index`.
#[must_use]
pub const fn hardened(index: u32) -> u32 {
    index | HARDENED_OFFSET
}

/// An ordered sequence of BIP32 child indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// Create a path from raw indices (hardening offset already applied).
    #[must_use]
    pub const fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// Parse a path string.
    ///
    /// A leading `m` segment is discarded. Every other segment must be a
    /// decimal index below [`HARDENED_OFFSET`], optionally followed by a
    /// hardening marker.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidPathSyntax`] for empty paths, empty
    /// segments and non-numeric or out-of-range components.
    pub fn parse(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(WalletError::invalid_path("empty derivation path"));
        }

        let mut indices = Vec::new();
        for (position, segment) in path.split('/').enumerate() {
            if position == 0 && segment == "m" {
                continue;
            }
            indices.push(parse_segment(segment).map_err(|reason| {
                WalletError::invalid_path(format!("{path}: segment '{segment}' {reason}"))
            })?);
        }
        Ok(Self(indices))
    }

    /// The raw indices, hardening offset applied.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the first `base_len` components as `m/...`.
    ///
    /// `render(self.len())` reproduces every segment of the parsed string.
    #[must_use]
    pub fn render(&self, base_len: usize) -> String {
        let mut out = String::from("m");
        for &index in self.0.iter().take(base_len) {
            if index >= HARDENED_OFFSET {
                out.push_str(&format!("/{}'", index - HARDENED_OFFSET));
            } else {
                out.push_str(&format!("/{index}"));
            }
        }
        out
    }
}

fn parse_segment(segment: &str) -> std::result::Result<u32, &'static str> {
    let (digits, is_hardened) = segment
        .strip_suffix(HARDENED_MARKERS)
        .map_or((segment, false), |digits| (digits, true));

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("is not a decimal index");
    }
    let index: u32 = digits.parse().map_err(|_| "is out of range")?;
    if index >= HARDENED_OFFSET {
        return Err("is out of range");
    }
    Ok(if is_hardened { hardened(index) } else { index })
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(self.len()))
    }
}

impl FromStr for DerivationPath {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DerivationPath {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DerivationPath> for String {
    fn from(path: DerivationPath) -> Self {
        path.to_string()
    }
}

/// Substitute the last two components (change and index) of a path string.
///
/// Each replaced component keeps its hardening marker and is zero-padded to
/// the digit width it had in `template`, so `m/44'/60'/0'/00/000` with
/// change 1 and index 7 becomes `m/44'/60'/0'/01/007`.
///
/// # Errors
///
/// Returns [`WalletError::InvalidPathSyntax`] if `template` does not parse or
/// has fewer than two components, and [`WalletError::InvalidArgument`] if a
/// value does not fit below [`HARDENED_OFFSET`].
pub fn with_change_and_index(template: &str, change: u32, index: u32) -> Result<String> {
    let parsed = DerivationPath::parse(template)?;
    if parsed.len() < 2 {
        return Err(WalletError::invalid_path(format!(
            "{template}: expected change and index components"
        )));
    }
    for value in [change, index] {
        if value >= HARDENED_OFFSET {
            return Err(WalletError::invalid_argument(format!(
                "index {value} does not fit in a derivation path"
            )));
        }
    }

    let mut segments: Vec<String> = template.split('/').map(str::to_owned).collect();
    let last = segments.len() - 1;
    segments[last - 1] = substitute(&segments[last - 1], change);
    segments[last] = substitute(&segments[last], index);
    Ok(segments.join("/"))
}

fn substitute(segment: &str, value: u32) -> String {
    let marker_len = segment.len() - segment.trim_end_matches(HARDENED_MARKERS).len();
    let (digits, marker) = segment.split_at(segment.len() - marker_len);
    format!("{value:0width$}{marker}", width = digits.len())
}

/// Positional allow-lists for purpose, coin type, account and change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPathPolicy {
    purposes: Vec<u32>,
    coin_types: Vec<u32>,
    accounts: Vec<u32>,
    changes: Vec<u32>,
}

impl Default for AssetPathPolicy {
    /// Every path the device accepts: purpose 44'/49', coin 0'/1'/60',
    /// account 0', change 0/1.
    fn default() -> Self {
        Self {
            purposes: vec![hardened(44), hardened(49)],
            coin_types: vec![hardened(0), hardened(1), hardened(60)],
            accounts: vec![hardened(0)],
            changes: vec![0, 1],
        }
    }
}

impl AssetPathPolicy {
    /// Create a policy from explicit allow-lists.
    #[must_use]
    pub fn new(
        purposes: impl IntoIterator<Item = u32>,
        coin_types: impl IntoIterator<Item = u32>,
        accounts: impl IntoIterator<Item = u32>,
        changes: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            purposes: purposes.into_iter().collect(),
            coin_types: coin_types.into_iter().collect(),
            accounts: accounts.into_iter().collect(),
            changes: changes.into_iter().collect(),
        }
    }

    /// Check a path against the allow-lists.
    ///
    /// Returns `false` rather than failing, so callers can try several
    /// policies. Paths with fewer than four components never match.
    #[must_use]
    pub fn validate(&self, path: &DerivationPath) -> bool {
        match path.indices() {
            [purpose, coin, account, change, ..] => {
                self.purposes.contains(purpose)
                    && self.coin_types.contains(coin)
                    && self.accounts.contains(account)
                    && self.changes.contains(change)
            }
            _ => false,
        }
    }
}
