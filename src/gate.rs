//! The policy state machine: request hook and discount verify-failure hook.
//!
//! [`AgentGate`] is the piece the enclosing server wires in. On every
//! protected request it runs the full pipeline — header decode, message
//! validation, signature verification, nonce burn, AgentBook lookup, policy
//! dispatch — and answers with a [`RequestDecision`]: grant access, or stand
//! aside and let the normal payment flow proceed. Under discount mode it also
//! handles the facilitator's verify-failure callback, recovering settlements
//! that were short-paid within the permitted discount.
//!
//! The two hooks cannot share request scope: the facilitator invokes the
//! failure path in a separate call with no access to the original HTTP
//! headers. A bounded-TTL map keyed by `(resource path, wallet)` bridges the
//! phases; entries are consumed single-use and swept after five minutes.
//!
//! Everything fails closed. A hook never panics across the adapter boundary
//! and never surfaces an internal error to the client; the worst outcome of
//! any failure is "no decision".

use alloy::primitives::U256;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

use crate::agentbook::{HumanId, HumanRegistry};
use crate::chain::evm::{Eip191Verifier, EvmSignatureVerifier};
use crate::chain::{ChainId, SignatureVerificationError, UnsupportedChainNamespace};
use crate::challenge::{AgentKitExtension, ChallengeOptions, declare_challenge};
use crate::events::{EventSink, HookEvent, TracingSink};
use crate::proto::{
    AGENTKIT_HEADER, AccessMode, HeaderCodecError, SupportedChain, parse_header,
};
use crate::store::UsageStore;
use crate::validate::{DEFAULT_MAX_AGE, MessageValidationError, ValidationOptions, validate_message};

/// Pending-discount entries older than this are swept on the next insert.
const PENDING_TTL: Duration = Duration::from_secs(300);

/// Facilitator reason codes that qualify as underpayment.
///
/// Only these make a failed settlement a candidate for discount recovery;
/// every other reason means something else went wrong and the facilitator's
/// original error should stand.
pub const UNDERPAYMENT_REASONS: [&str; 3] = [
    "invalid_exact_evm_payload_authorization_value",
    "permit2_insufficient_amount",
    "insufficient_funds",
];

/// Outcome of the request hook.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestDecision {
    /// Serve the resource without payment.
    Grant(VerifiedAgent),
    /// No decision: let the normal payment flow proceed.
    Pass,
}

impl RequestDecision {
    pub fn is_grant(&self) -> bool {
        matches!(self, RequestDecision::Grant(_))
    }
}

/// The agent a grant was issued to.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAgent {
    /// Wallet address as asserted in the payload.
    pub address: String,
    pub human_id: HumanId,
}

/// Outcome of the verify-failure hook.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyFailureDecision {
    /// The underpayment was accepted; the facilitator re-runs settlement
    /// against the mutated requirements.
    Recovered(RecoveredPayment),
    /// No decision: the facilitator's original error stands.
    Pass,
}

/// Result handed back to the facilitator on recovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredPayment {
    pub is_valid: bool,
    pub payer: String,
}

/// The declared payment requirement the facilitator verified against.
///
/// Only `amount` (an integer string in token base units) is interpreted here;
/// everything else rides along untouched so the mutated requirement can be
/// handed straight back to the facilitator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequirements {
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Url>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Gate configuration, validated at construction.
#[derive(Debug, Clone)]
pub struct AgentGateConfig {
    pub mode: AccessMode,
    /// Chains advertised in the 402 response and accepted in payloads.
    pub supported_chains: Vec<ChainId>,
    /// Maximum accepted age of a challenge's `issuedAt`.
    pub max_age: Duration,
    pub challenge: ChallengeOptions,
}

impl AgentGateConfig {
    pub fn new(mode: AccessMode, supported_chains: Vec<ChainId>) -> Self {
        Self {
            mode,
            supported_chains,
            max_age: DEFAULT_MAX_AGE,
            challenge: ChallengeOptions::default(),
        }
    }
}

/// Configuration rejected at gate construction. These are the only fatal
/// errors in the crate; everything at request time fails closed instead.
#[derive(Debug, thiserror::Error)]
pub enum AgentGateConfigError {
    #[error("At least one supported chain is required")]
    NoSupportedChains,
    #[error(transparent)]
    UnsupportedChain(#[from] UnsupportedChainNamespace),
    #[error("Discount percent must be within 1..=100, got {0}")]
    InvalidDiscountPercent(u8),
    #[error("{0} mode requires a positive number of uses")]
    ZeroUses(&'static str),
    #[error("{0} mode requires a usage store")]
    StoreRequired(&'static str),
}

#[derive(Debug, thiserror::Error)]
enum GateRequestError {
    #[error(transparent)]
    Header(#[from] HeaderCodecError),
    #[error(transparent)]
    Validation(#[from] MessageValidationError),
    #[error(transparent)]
    Signature(#[from] SignatureVerificationError),
}

struct PendingDiscount {
    human_id: HumanId,
    address: String,
    created_at: Instant,
}

/// The request-boundary orchestrator for one protected route.
///
/// Cheap to share: wrap it in an `Arc` and call the hooks from as many
/// concurrent requests as the server carries.
pub struct AgentGate {
    config: AgentGateConfig,
    supported: Vec<SupportedChain>,
    registry: Arc<dyn HumanRegistry>,
    store: Option<Arc<dyn UsageStore>>,
    evm_verifier: Arc<dyn EvmSignatureVerifier>,
    events: Arc<dyn EventSink>,
    pending: Mutex<HashMap<(String, String), PendingDiscount>>,
}

impl AgentGate {
    /// Validates the configuration and builds a gate.
    ///
    /// `store` is required for `free-trial` and `discount` modes; `free` mode
    /// works without one (a store still adds nonce replay protection).
    pub fn new(
        config: AgentGateConfig,
        registry: Arc<dyn HumanRegistry>,
        store: Option<Arc<dyn UsageStore>>,
    ) -> Result<Self, AgentGateConfigError> {
        if config.supported_chains.is_empty() {
            return Err(AgentGateConfigError::NoSupportedChains);
        }
        let supported = config
            .supported_chains
            .iter()
            .map(|chain| SupportedChain::for_chain(chain.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        match &config.mode {
            AccessMode::Free => {}
            AccessMode::FreeTrial { uses } => {
                if *uses == 0 {
                    return Err(AgentGateConfigError::ZeroUses("free-trial"));
                }
                if store.is_none() {
                    return Err(AgentGateConfigError::StoreRequired("free-trial"));
                }
            }
            AccessMode::Discount { percent, uses } => {
                if !(1..=100).contains(percent) {
                    return Err(AgentGateConfigError::InvalidDiscountPercent(*percent));
                }
                if *uses == Some(0) {
                    return Err(AgentGateConfigError::ZeroUses("discount"));
                }
                if store.is_none() {
                    return Err(AgentGateConfigError::StoreRequired("discount"));
                }
            }
        }

        Ok(Self {
            config,
            supported,
            registry,
            store,
            evm_verifier: Arc::new(Eip191Verifier),
            events: Arc::new(TracingSink),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the EVM signature verifier.
    ///
    /// The default verifies EIP-191 offline; inject an RPC-backed verifier to
    /// also honour EIP-1271 and EIP-6492 smart-wallet signatures.
    pub fn with_evm_verifier(mut self, verifier: Arc<dyn EvmSignatureVerifier>) -> Self {
        self.evm_verifier = verifier;
        self
    }

    /// Replaces the observability sink (default: `tracing`).
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Builds the `agentkit` block for this route's 402 response.
    pub fn challenge_extension(&self, request_url: &Url) -> AgentKitExtension {
        declare_challenge(
            request_url,
            &self.supported,
            Some(&self.config.mode),
            &self.config.challenge,
        )
    }

    /// Request hook: runs on every protected request, before payment handling.
    ///
    /// `resource` is the full URL of the protected resource as served. Without
    /// an `agentkit` header this is a no-op returning
    /// [`RequestDecision::Pass`]. Any failure along the pipeline emits a
    /// `validation_failed` event and also returns `Pass` — the caller's
    /// payment flow is the fallback for everything.
    pub async fn on_request(&self, headers: &HeaderMap, resource: &Url) -> RequestDecision {
        // HeaderMap lookup is case-insensitive, covering `Agentkit` senders.
        let Some(header) = headers.get(AGENTKIT_HEADER) else {
            return RequestDecision::Pass;
        };
        match self.process_request(header.as_bytes(), resource).await {
            Ok(decision) => decision,
            Err(error) => {
                self.events.emit(HookEvent::ValidationFailed {
                    resource: resource.path().to_string(),
                    error: Some(error.to_string()),
                });
                RequestDecision::Pass
            }
        }
    }

    async fn process_request(
        &self,
        raw_header: &[u8],
        resource: &Url,
    ) -> Result<RequestDecision, GateRequestError> {
        let payload = parse_header(raw_header)?;

        let options = ValidationOptions {
            max_age: self.config.max_age,
            supported_chains: self.config.supported_chains.clone(),
        };
        let store = self.store.clone();
        let check_nonce = move |nonce: String| async move {
            match store {
                Some(store) => !store.has_used_nonce(&nonce).await,
                None => true,
            }
        };
        validate_message(&payload, resource, &options, check_nonce).await?;

        crate::chain::verify_payload_signature(&payload, self.evm_verifier.as_ref()).await?;

        // Burn the nonce only after the signature held: failed attempts must
        // not consume nonces, or adversaries could starve legitimate ones.
        // Burning before the AgentBook lookup means at most one of two
        // identical replays can proceed past this point.
        if let Some(store) = &self.store {
            store.record_nonce(&payload.nonce).await;
        }

        let resource_path = resource.path().to_string();
        let Some(human_id) = self
            .registry
            .lookup_human(&payload.address, &payload.chain_id)
            .await
        else {
            self.events.emit(HookEvent::AgentNotVerified {
                resource: resource_path,
                address: payload.address.clone(),
            });
            return Ok(RequestDecision::Pass);
        };

        match &self.config.mode {
            AccessMode::Free => {
                self.events.emit(HookEvent::AgentVerified {
                    resource: resource_path,
                    address: payload.address.clone(),
                    human_id: human_id.to_string(),
                });
                Ok(RequestDecision::Grant(VerifiedAgent {
                    address: payload.address,
                    human_id,
                }))
            }
            AccessMode::FreeTrial { uses } => {
                let Some(store) = self.store.as_deref() else {
                    return Ok(RequestDecision::Pass);
                };
                if store
                    .increment_usage_below(&resource_path, &human_id, *uses)
                    .await
                {
                    self.events.emit(HookEvent::AgentVerified {
                        resource: resource_path,
                        address: payload.address.clone(),
                        human_id: human_id.to_string(),
                    });
                    Ok(RequestDecision::Grant(VerifiedAgent {
                        address: payload.address,
                        human_id,
                    }))
                } else {
                    // Trial exhausted: the normal payment flow charges.
                    Ok(RequestDecision::Pass)
                }
            }
            AccessMode::Discount { .. } => {
                // The agent is expected to short-pay the discounted amount;
                // recovery happens in the verify-failure hook.
                self.remember_pending(&resource_path, &payload.address, human_id);
                Ok(RequestDecision::Pass)
            }
        }
    }

    /// Verify-failure hook: invoked by the facilitator when payment
    /// verification fails. Only meaningful under discount mode.
    ///
    /// `payment_payload` is the facilitator's original payment payload,
    /// `requirements` the declared requirement it verified against, `error`
    /// the verification error. On recovery the requirement's `amount` is
    /// mutated to the amount actually paid and the facilitator is expected to
    /// re-run settlement against it; in every other case the original error
    /// stands.
    pub async fn on_verify_failure(
        &self,
        payment_payload: &serde_json::Value,
        requirements: &mut SettlementRequirements,
        error: &str,
    ) -> VerifyFailureDecision {
        let AccessMode::Discount { percent, uses } = &self.config.mode else {
            return VerifyFailureDecision::Pass;
        };
        let Some(store) = self.store.as_deref() else {
            return VerifyFailureDecision::Pass;
        };

        let Some(resource_path) = resource_path_of(payment_payload, requirements) else {
            return VerifyFailureDecision::Pass;
        };
        let Some((payer, paid)) = payer_and_amount(payment_payload) else {
            return VerifyFailureDecision::Pass;
        };

        // Single-use: consumed even when recovery is declined below, so one
        // failed verify cannot be replayed against the same record.
        let Some(pending) = self.take_pending(&resource_path, &payer) else {
            return VerifyFailureDecision::Pass;
        };

        if !UNDERPAYMENT_REASONS.contains(&reason_code(error)) {
            return VerifyFailureDecision::Pass;
        }

        let Ok(required) = requirements.amount.parse::<U256>() else {
            return VerifyFailureDecision::Pass;
        };

        if let Some(cap) = uses
            && store.usage_count(&resource_path, &pending.human_id).await >= *cap
        {
            self.events.emit(HookEvent::DiscountExhausted {
                resource: resource_path,
                address: pending.address,
                human_id: pending.human_id.to_string(),
            });
            return VerifyFailureDecision::Pass;
        }

        let Some(discounted) = discounted_amount(required, *percent) else {
            return VerifyFailureDecision::Pass;
        };
        if paid < discounted {
            // Short-paid beyond the permitted discount.
            return VerifyFailureDecision::Pass;
        }
        if paid >= required {
            // Not an underpayment in substance; the error has another cause.
            return VerifyFailureDecision::Pass;
        }

        store.increment_usage(&resource_path, &pending.human_id).await;
        self.events.emit(HookEvent::DiscountApplied {
            resource: resource_path,
            address: pending.address,
            human_id: pending.human_id.to_string(),
        });
        requirements.amount = paid.to_string();
        VerifyFailureDecision::Recovered(RecoveredPayment {
            is_valid: true,
            payer,
        })
    }

    fn remember_pending(&self, resource_path: &str, address: &str, human_id: HumanId) {
        let mut pending = self.pending.lock().expect("pending map lock poisoned");
        let now = Instant::now();
        pending.retain(|_, entry| now.duration_since(entry.created_at) < PENDING_TTL);
        pending.insert(
            (resource_path.to_string(), address.to_lowercase()),
            PendingDiscount {
                human_id,
                address: address.to_string(),
                created_at: now,
            },
        );
    }

    fn take_pending(&self, resource_path: &str, address: &str) -> Option<PendingDiscount> {
        let mut pending = self.pending.lock().expect("pending map lock poisoned");
        pending.remove(&(resource_path.to_string(), address.to_lowercase()))
    }
}

/// Reason code of a facilitator error: the substring before the first colon.
///
/// This mirrors how upstream facilitators format their error strings and is a
/// wire contract with them.
fn reason_code(error: &str) -> &str {
    error.split(':').next().unwrap_or(error).trim()
}

/// `floor(required * (100 - percent) / 100)`; `None` on overflow.
fn discounted_amount(required: U256, percent: u8) -> Option<U256> {
    required
        .checked_mul(U256::from(100u8 - percent))
        .map(|scaled| scaled / U256::from(100u8))
}

/// Resource path for pending-record and counter keys.
///
/// The payment payload's declared resource URL is authoritative; the
/// requirement's `resource` is consulted only for payloads that do not
/// restate it (older clients omit the resource block from the payload).
fn resource_path_of(
    payment_payload: &serde_json::Value,
    requirements: &SettlementRequirements,
) -> Option<String> {
    let declared = payment_payload
        .get("resource")
        .and_then(|resource| resource.get("url").or(Some(resource)))
        .and_then(|url| url.as_str())
        .and_then(|url| Url::parse(url).ok());
    declared
        .or_else(|| requirements.resource.clone())
        .map(|url| url.path().to_string())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Eip3009Authorization {
    from: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Permit2Permitted {
    amount: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Permit2Authorization {
    from: String,
    permitted: Permit2Permitted,
}

/// Extracts `(payer, paid amount)` from a payment payload.
///
/// Recognizes the EIP-3009 shape (`authorization.from` / `authorization.value`)
/// and the Permit2 shape (`permit2Authorization.from` /
/// `permit2Authorization.permitted.amount`), at the payload top level or
/// nested under `payload`.
fn payer_and_amount(payment_payload: &serde_json::Value) -> Option<(String, U256)> {
    let candidates = [
        Some(payment_payload),
        payment_payload.get("payload"),
    ];
    for value in candidates.into_iter().flatten() {
        if let Some(authorization) = value.get("authorization")
            && let Ok(authorization) =
                serde_json::from_value::<Eip3009Authorization>(authorization.clone())
            && let Ok(amount) = authorization.value.parse::<U256>()
        {
            return Some((authorization.from, amount));
        }
        if let Some(authorization) = value.get("permit2Authorization")
            && let Ok(authorization) =
                serde_json::from_value::<Permit2Authorization>(authorization.clone())
            && let Ok(amount) = authorization.permitted.amount.parse::<U256>()
        {
            return Some((authorization.from, amount));
        }
    }
    None
}
