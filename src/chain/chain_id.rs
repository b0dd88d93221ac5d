//! CAIP-2 chain identifiers and the closed set of signature namespaces.
//!
//! A [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2) chain ID is a
//! `namespace:reference` pair naming a blockchain, e.g. `eip155:8453` for Base
//! or `solana:5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp` for Solana mainnet. Chain IDs
//! parse openly — any non-empty namespace and reference are accepted on the
//! wire — while [`Namespace`] is the closed set of chain families this crate
//! can actually verify signatures for. Routing an unknown namespace fails with
//! a stable, user-facing error.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// A CAIP-2 compliant blockchain identifier.
///
/// # Serialization
///
/// Serializes to/from a colon-separated string: `"eip155:8453"`.
///
/// # Example
///
/// ```
/// use x402_agentkit::chain::ChainId;
///
/// let base: ChainId = "eip155:8453".parse().unwrap();
/// assert_eq!(base.namespace, "eip155");
/// assert_eq!(base.reference, "8453");
/// assert_eq!(base.to_string(), "eip155:8453");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainId {
    /// The blockchain family (e.g. `eip155` for EVM chains, `solana` for Solana).
    pub namespace: String,
    /// The chain-specific reference (decimal chain id for EVM, genesis-hash
    /// prefix for Solana).
    pub reference: String,
}

impl ChainId {
    /// Creates a chain ID from namespace and reference components.
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    /// Creates an `eip155` chain ID from a numeric EVM chain id.
    ///
    /// ```
    /// use x402_agentkit::chain::ChainId;
    ///
    /// assert_eq!(ChainId::eip155(8453).to_string(), "eip155:8453");
    /// ```
    pub fn eip155(chain_id: u64) -> Self {
        Self::new(Namespace::Eip155.as_str(), chain_id.to_string())
    }

    /// Creates a `solana` chain ID from a genesis-hash prefix.
    pub fn solana<R: Into<String>>(reference: R) -> Self {
        Self::new(Namespace::Solana.as_str(), reference)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Error returned when parsing an invalid chain ID string.
///
/// A valid chain ID is `namespace:reference` with both components non-empty.
#[derive(Debug, thiserror::Error)]
#[error("Invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, reference) = s.split_once(':').ok_or(ChainIdFormatError(s.into()))?;
        if namespace.is_empty() || reference.is_empty() {
            return Err(ChainIdFormatError(s.into()));
        }
        Ok(ChainId {
            namespace: namespace.into(),
            reference: reference.into(),
        })
    }
}

impl Serialize for ChainId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

/// The chain families this crate can verify challenge signatures for.
///
/// The set is closed over the two known namespaces. New chains are added by
/// extending the codec set and the deployment table, never by letting unknown
/// `chainId` values through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Eip155,
    Solana,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Eip155 => "eip155",
            Namespace::Solana => "solana",
        }
    }

    /// Resolves the signature family of a chain ID.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedChainNamespace`] for any namespace outside the
    /// closed set, carrying the offending chain ID for the client-facing
    /// message.
    pub fn of(chain_id: &ChainId) -> Result<Self, UnsupportedChainNamespace> {
        match chain_id.namespace.as_str() {
            "eip155" => Ok(Namespace::Eip155),
            "solana" => Ok(Namespace::Solana),
            _ => Err(UnsupportedChainNamespace(chain_id.clone())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chain ID whose namespace is outside the supported set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unsupported chain namespace: {0}")]
pub struct UnsupportedChainNamespace(pub ChainId);
