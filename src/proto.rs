//! Wire types for the `agentkit` extension and the base64 header codec.
//!
//! The signed challenge travels in a single HTTP request header, `agentkit`,
//! whose value is base64 of a UTF-8 JSON object matching [`AgentPayload`].
//! Header names are case-insensitive per HTTP, so `Agentkit` is accepted too.
//!
//! Timestamps (`issuedAt`, `expirationTime`, `notBefore`) stay `String` on the
//! wire: a malformed timestamp is a message-validation failure (see
//! [`validate`](crate::validate)), not a schema failure, and keeping them
//! opaque preserves the byte-for-byte encode/parse round trip.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use url::Url;

use crate::chain::{ChainId, Namespace, UnsupportedChainNamespace};

/// Name of the request header carrying the signed challenge payload.
pub const AGENTKIT_HEADER: &str = "agentkit";

/// Challenge schema version marker, the literal string `"1"`.
///
/// Serializes as `"1"` and deserializes only from `"1"`, so a payload with any
/// other version fails schema validation at the codec.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ChallengeVersion1;

impl ChallengeVersion1 {
    pub const VALUE: &'static str = "1";
}

impl Serialize for ChallengeVersion1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for ChallengeVersion1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == Self::VALUE {
            Ok(ChallengeVersion1)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected challenge version '{}', got '{s}'",
                Self::VALUE
            )))
        }
    }
}

impl Display for ChallengeVersion1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(Self::VALUE)
    }
}

/// The signature family asserted by the payload's `type` field.
///
/// Must pair with the chain namespace: `eip191` goes with `eip155:*` chains,
/// `ed25519` with `solana:*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureKind {
    Eip191,
    Ed25519,
}

impl SignatureKind {
    /// The signature family native to a chain namespace.
    pub fn for_namespace(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Eip155 => SignatureKind::Eip191,
            Namespace::Solana => SignatureKind::Ed25519,
        }
    }
}

impl Display for SignatureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SignatureKind::Eip191 => f.write_str("eip191"),
            SignatureKind::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Optional refinement of how the signature was produced.
///
/// `eip1271` (contract wallets) and `eip6492` (counterfactually deployed
/// wallets) require an RPC-backed verifier; see
/// [`EvmSignatureVerifier`](crate::chain::evm::EvmSignatureVerifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    Eip191,
    Eip1271,
    Eip6492,
    Siws,
}

/// The CAIP-122 challenge payload an agent signs and returns.
///
/// This is the logical message both challenge issuance (the 402 response
/// advertises its schema) and verification (the `agentkit` header carries a
/// signed instance) agree on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    /// Server hostname the agent is authenticating to.
    pub domain: String,
    /// Wallet address: hex `0x…` for EVM, base58 pubkey for Solana.
    pub address: String,
    /// Full URI of the protected resource.
    pub uri: Url,
    /// Challenge schema version, the literal `"1"`.
    pub version: ChallengeVersion1,
    /// CAIP-2 chain the agent selected from the server's `supportedChains`.
    pub chain_id: ChainId,
    /// Signature family.
    #[serde(rename = "type")]
    pub kind: SignatureKind,
    /// Server-issued random nonce bound to this challenge.
    pub nonce: String,
    /// ISO-8601 issuance timestamp set by the server.
    pub issued_at: String,
    /// ISO-8601 timestamp after which the message is invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    /// ISO-8601 timestamp before which the message is invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Must contain the resource URI when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_scheme: Option<SignatureScheme>,
    /// `0x`-prefixed hex (EVM) or base58 of a 64-byte Ed25519 signature (Solana).
    pub signature: String,
}

/// One chain a protected route accepts, advertised in the 402 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedChain {
    pub chain_id: ChainId,
    #[serde(rename = "type")]
    pub kind: SignatureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_scheme: Option<SignatureScheme>,
}

impl SupportedChain {
    /// Builds the descriptor for a chain with its namespace-native signature
    /// family.
    ///
    /// # Errors
    ///
    /// Fails for chain IDs outside the supported namespaces.
    pub fn for_chain(chain_id: ChainId) -> Result<Self, UnsupportedChainNamespace> {
        let namespace = Namespace::of(&chain_id)?;
        Ok(Self {
            chain_id,
            kind: SignatureKind::for_namespace(namespace),
            signature_scheme: None,
        })
    }
}

/// Access policy applied to human-verified agents.
///
/// Echoed verbatim in the 402 response so agents know what the verification
/// buys them:
///
/// ```json
/// {"mode": "free-trial", "uses": 2}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AccessMode {
    /// Verified agents bypass payment entirely.
    Free,
    /// Verified agents get `uses` free requests per human per endpoint, then
    /// fall back to the normal payment flow.
    FreeTrial {
        #[serde(default = "default_trial_uses")]
        uses: u64,
    },
    /// Verified agents may short-pay by `percent`; the shortfall is recovered
    /// through the facilitator's verify-failure callback, up to `uses` times
    /// per human per endpoint (`None` = unbounded).
    Discount {
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uses: Option<u64>,
    },
}

fn default_trial_uses() -> u64 {
    1
}

/// Why an `agentkit` header failed to parse.
///
/// One variant per failure class so observability events can tell a
/// transport-mangled header from a schema-violating payload.
#[derive(Debug, thiserror::Error)]
pub enum HeaderCodecError {
    #[error("agentkit header is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("agentkit header is not valid JSON")]
    Json(#[source] serde_json::Error),
    #[error("agentkit payload does not match the challenge schema: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Decodes and validates an `agentkit` header value.
///
/// The value must be standard-alphabet base64 of a UTF-8 JSON object matching
/// the [`AgentPayload`] schema (required fields present, enum fields within
/// range). Each failure class maps to its own [`HeaderCodecError`] variant.
pub fn parse_header(value: &[u8]) -> Result<AgentPayload, HeaderCodecError> {
    let decoded = b64.decode(value)?;
    let json: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(HeaderCodecError::Json)?;
    serde_json::from_value(json).map_err(HeaderCodecError::Schema)
}

/// Encodes a payload into an `agentkit` header value.
///
/// Inverse of [`parse_header`]: `parse_header(encode_header(p)) == p`.
pub fn encode_header(payload: &AgentPayload) -> String {
    let json = serde_json::to_vec(payload).expect("serialization failed");
    b64.encode(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AgentPayload {
        AgentPayload {
            domain: "api.example.com".into(),
            address: "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".into(),
            uri: "https://api.example.com/data".parse().unwrap(),
            version: ChallengeVersion1,
            chain_id: ChainId::eip155(8453),
            kind: SignatureKind::Eip191,
            nonce: "a1b2c3d4e5f60718293a4b5c6d7e8f90".into(),
            issued_at: "2026-08-02T10:00:00Z".into(),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: Some(vec!["https://api.example.com/data".into()]),
            statement: None,
            signature_scheme: None,
            signature: "0xdeadbeef".into(),
        }
    }

    #[test]
    fn header_roundtrips() {
        let original = payload();
        let encoded = encode_header(&original);
        let parsed = parse_header(encoded.as_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn rejects_non_base64_input() {
        let err = parse_header(b"not base64 at all!!!").unwrap_err();
        assert!(matches!(err, HeaderCodecError::Base64(_)));
    }

    #[test]
    fn rejects_non_json_content() {
        let encoded = b64.encode(b"plain text");
        let err = parse_header(encoded.as_bytes()).unwrap_err();
        assert!(matches!(err, HeaderCodecError::Json(_)));
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut value = serde_json::to_value(payload()).unwrap();
        value.as_object_mut().unwrap().remove("nonce");
        let encoded = b64.encode(serde_json::to_vec(&value).unwrap());
        let err = parse_header(encoded.as_bytes()).unwrap_err();
        assert!(matches!(err, HeaderCodecError::Schema(_)));
    }

    #[test]
    fn rejects_unknown_signature_type() {
        let mut value = serde_json::to_value(payload()).unwrap();
        value["type"] = serde_json::json!("secp256r1");
        let encoded = b64.encode(serde_json::to_vec(&value).unwrap());
        let err = parse_header(encoded.as_bytes()).unwrap_err();
        assert!(matches!(err, HeaderCodecError::Schema(_)));
    }

    #[test]
    fn rejects_wrong_version_literal() {
        let mut value = serde_json::to_value(payload()).unwrap();
        value["version"] = serde_json::json!("2");
        let encoded = b64.encode(serde_json::to_vec(&value).unwrap());
        assert!(matches!(
            parse_header(encoded.as_bytes()),
            Err(HeaderCodecError::Schema(_))
        ));
    }

    #[test]
    fn access_mode_echo_shape() {
        let mode = AccessMode::FreeTrial { uses: 2 };
        assert_eq!(
            serde_json::to_value(&mode).unwrap(),
            serde_json::json!({"mode": "free-trial", "uses": 2})
        );

        let discount: AccessMode =
            serde_json::from_value(serde_json::json!({"mode": "discount", "percent": 50}))
                .unwrap();
        assert_eq!(
            discount,
            AccessMode::Discount {
                percent: 50,
                uses: None
            }
        );
    }

    #[test]
    fn free_trial_uses_defaults_to_one() {
        let mode: AccessMode =
            serde_json::from_value(serde_json::json!({"mode": "free-trial"})).unwrap();
        assert_eq!(mode, AccessMode::FreeTrial { uses: 1 });
    }
}
