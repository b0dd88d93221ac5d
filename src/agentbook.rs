//! Client for the on-chain AgentBook registry.
//!
//! The AgentBook maps wallet addresses to anonymous human identifiers,
//! populated out-of-band through a World ID proof of personhood. The core
//! consumes exactly one view function, `lookupHuman`; the registration entry
//! point is declared in the bindings for interface completeness but nothing
//! here calls it.
//!
//! Lookup is deliberately lossy: any RPC error, revert, unparseable address,
//! or unconfigured chain resolves to "not registered", so a flaky node can
//! never grant spurious access. The real failure is logged, never propagated
//! to the client.

use alloy::primitives::{Address, U256};
use alloy::providers::RootProvider;
use alloy::sol;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use url::Url;

use crate::chain::{ChainId, Namespace};

sol! {
    #[sol(rpc)]
    contract AgentBook {
        function lookupHuman(address agent) external view returns (uint256);
        function register(address agent, uint256 root, uint256 nonce, uint256 nullifierHash, uint256[8] calldata proof) external;
    }
}

/// An anonymous human identifier from the AgentBook.
///
/// Non-zero by construction: the contract returns `0` for unregistered
/// wallets, which maps to `None` at the lookup boundary. Renders as lowercase
/// `0x…` hex, the form used for usage-counter keys and observability events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HumanId(U256);

impl HumanId {
    /// Wraps a registry return value; `None` for the zero sentinel.
    pub fn from_registry(value: U256) -> Option<Self> {
        if value.is_zero() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl fmt::Display for HumanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for HumanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Resolves a wallet address to the human identifier behind it, if any.
///
/// [`AgentBookClient`] is the on-chain implementation; tests and registries on
/// chains without an AgentBook deployment substitute their own.
#[async_trait]
pub trait HumanRegistry: Send + Sync {
    /// `None` means unregistered — or unknowable right now, which the access
    /// policy must treat the same way.
    async fn lookup_human(&self, wallet: &str, chain_id: &ChainId) -> Option<HumanId>;
}

/// Registry deployment address for a chain, if one is known.
///
/// TODO: add the Base mainnet address once the registry contract is deployed.
pub fn deployed_registry(_chain_id: &ChainId) -> Option<Address> {
    None
}

/// Default public RPC endpoint for well-known chains.
pub fn default_rpc_url(chain_id: &ChainId) -> Option<&'static str> {
    match (chain_id.namespace.as_str(), chain_id.reference.as_str()) {
        ("eip155", "1") => Some("https://eth.merkle.io"),
        ("eip155", "137") => Some("https://polygon-rpc.com"),
        ("eip155", "8453") => Some("https://mainnet.base.org"),
        ("eip155", "84532") => Some("https://sepolia.base.org"),
        _ => None,
    }
}

/// Per-chain overrides for the registry client.
#[derive(Debug, Clone, Default)]
pub struct AgentBookConfig {
    /// Registry contract address per chain. Required for any chain the
    /// built-in deployment table does not cover.
    pub contract_overrides: HashMap<ChainId, Address>,
    /// RPC endpoint per chain. Falls back to [`default_rpc_url`].
    pub rpc_overrides: HashMap<ChainId, Url>,
}

/// A chain was configured that the client cannot serve.
#[derive(Debug, thiserror::Error)]
pub enum AgentBookConfigError {
    #[error("No AgentBook deployment known for {0}; provide a contract address")]
    NoRegistryDeployment(ChainId),
    #[error("No RPC endpoint known for {0}; provide an RPC URL")]
    NoRpcUrl(ChainId),
}

/// On-chain [`HumanRegistry`] backed by `AgentBook.lookupHuman`.
///
/// RPC providers are constructed lazily and cached per chain for the lifetime
/// of the client. Concurrent initializers for the same chain may race; the
/// last writer wins, which is fine because providers are stateless.
#[derive(Debug)]
pub struct AgentBookClient {
    contracts: HashMap<ChainId, Address>,
    rpc_overrides: HashMap<ChainId, Url>,
    providers: RwLock<HashMap<ChainId, RootProvider>>,
}

impl AgentBookClient {
    /// Builds a client able to serve every chain in `chains`.
    ///
    /// Only `eip155` chains carry an AgentBook deployment; lookups on other
    /// namespaces resolve to `None` (hosts that run a registry elsewhere
    /// implement [`HumanRegistry`] directly). A configured EVM chain with
    /// neither a deployment-table entry nor a contract override — or with no
    /// resolvable RPC endpoint — is a configuration error here, not at
    /// request time.
    pub fn new(config: AgentBookConfig, chains: &[ChainId]) -> Result<Self, AgentBookConfigError> {
        let mut contracts = HashMap::new();
        for chain in chains {
            if !matches!(Namespace::of(chain), Ok(Namespace::Eip155)) {
                continue;
            }
            let contract = config
                .contract_overrides
                .get(chain)
                .copied()
                .or_else(|| deployed_registry(chain))
                .ok_or_else(|| AgentBookConfigError::NoRegistryDeployment(chain.clone()))?;
            if !config.rpc_overrides.contains_key(chain) && default_rpc_url(chain).is_none() {
                return Err(AgentBookConfigError::NoRpcUrl(chain.clone()));
            }
            contracts.insert(chain.clone(), contract);
        }
        Ok(Self {
            contracts,
            rpc_overrides: config.rpc_overrides,
            providers: RwLock::new(HashMap::new()),
        })
    }

    fn provider(&self, chain_id: &ChainId) -> Option<RootProvider> {
        if let Some(provider) = self
            .providers
            .read()
            .expect("provider cache lock poisoned")
            .get(chain_id)
        {
            return Some(provider.clone());
        }

        let url = match self.rpc_overrides.get(chain_id).cloned() {
            Some(url) => url,
            None => default_rpc_url(chain_id)?
                .parse()
                .expect("built-in RPC URL parses"),
        };
        let provider = RootProvider::new_http(url);
        self.providers
            .write()
            .expect("provider cache lock poisoned")
            .insert(chain_id.clone(), provider.clone());
        Some(provider)
    }
}

#[async_trait]
impl HumanRegistry for AgentBookClient {
    async fn lookup_human(&self, wallet: &str, chain_id: &ChainId) -> Option<HumanId> {
        let Some(contract_address) = self.contracts.get(chain_id).copied() else {
            tracing::warn!(%chain_id, "no AgentBook configured for chain, treating agent as unregistered");
            return None;
        };
        let agent: Address = match wallet.parse() {
            Ok(address) => address,
            Err(_) => {
                tracing::warn!(%chain_id, wallet, "wallet address does not parse, treating agent as unregistered");
                return None;
            }
        };
        let Some(provider) = self.provider(chain_id) else {
            tracing::warn!(%chain_id, "no RPC endpoint for chain, treating agent as unregistered");
            return None;
        };

        let registry = AgentBook::new(contract_address, provider);
        match registry.lookupHuman(agent).call().await {
            Ok(value) => HumanId::from_registry(value),
            Err(error) => {
                tracing::warn!(%chain_id, wallet, %error, "AgentBook lookup failed, treating agent as unregistered");
                None
            }
        }
    }
}
