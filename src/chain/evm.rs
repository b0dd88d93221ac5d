//! EVM (`eip155:*`) challenge codec: SIWE message formatting and EIP-191
//! signature verification.
//!
//! Formatting follows [EIP-4361](https://eips.ethereum.org/EIPS/eip-4361)
//! ("Sign-In With Ethereum") canonical text order. Verification defaults to
//! offline ECDSA recover-and-compare over the EIP-191 personal-sign hash; smart
//! wallets (EIP-1271, EIP-6492) need an RPC call to validate, so callers plug
//! in their own [`EvmSignatureVerifier`] for those schemes.

use alloy::primitives::{Address, Signature};
use async_trait::async_trait;

use crate::chain::ChainId;
use crate::proto::AgentPayload;

/// Failures specific to the EVM codec.
#[derive(Debug, thiserror::Error)]
pub enum EvmCodecError {
    /// The `eip155` reference was not a decimal chain id.
    #[error("Invalid eip155 chain id: {0}")]
    InvalidChainReference(String),
    #[error("Invalid signer address: {0}")]
    InvalidAddress(String),
    #[error("Invalid signature: {0}")]
    MalformedSignature(String),
    #[error("Signature recovery failed: {0}")]
    Recovery(String),
}

/// Extracts the decimal chain id from an `eip155:*` chain ID.
pub fn eip155_reference(chain_id: &ChainId) -> Result<u64, EvmCodecError> {
    chain_id
        .reference
        .parse::<u64>()
        .map_err(|_| EvmCodecError::InvalidChainReference(chain_id.to_string()))
}

/// Renders the canonical SIWE (EIP-4361) message for a challenge payload.
///
/// The numeric `Chain ID` line carries the decimal suffix of the payload's
/// CAIP-2 chain id; a non-decimal reference is rejected.
pub fn format_siwe_message(payload: &AgentPayload) -> Result<String, EvmCodecError> {
    let chain_reference = eip155_reference(&payload.chain_id)?;

    let prefix = match &payload.statement {
        Some(statement) => format!(
            "{} wants you to sign in with your Ethereum account:\n{}\n\n{statement}",
            payload.domain, payload.address
        ),
        None => format!(
            "{} wants you to sign in with your Ethereum account:\n{}",
            payload.domain, payload.address
        ),
    };

    let mut fields = vec![
        format!("URI: {}", payload.uri),
        format!("Version: {}", payload.version),
        format!("Chain ID: {chain_reference}"),
        format!("Nonce: {}", payload.nonce),
        format!("Issued At: {}", payload.issued_at),
    ];
    if let Some(expiration_time) = &payload.expiration_time {
        fields.push(format!("Expiration Time: {expiration_time}"));
    }
    if let Some(not_before) = &payload.not_before {
        fields.push(format!("Not Before: {not_before}"));
    }
    if let Some(request_id) = &payload.request_id {
        fields.push(format!("Request ID: {request_id}"));
    }
    if let Some(resources) = &payload.resources
        && !resources.is_empty()
    {
        let list: String = resources.iter().map(|r| format!("\n- {r}")).collect();
        fields.push(format!("Resources:{list}"));
    }

    Ok(format!("{prefix}\n\n{}", fields.join("\n")))
}

/// Verifies an EVM signature over a canonical SIWE message.
///
/// The default implementation, [`Eip191Verifier`], recovers the signer from an
/// EIP-191 personal-sign signature and compares it to the asserted address.
/// Implementations backed by an RPC client can additionally honour EIP-1271
/// (`isValidSignature` on a deployed contract wallet) and EIP-6492
/// (counterfactual wallets); when such a verifier is supplied it is used
/// verbatim for every EVM payload.
#[async_trait]
pub trait EvmSignatureVerifier: Send + Sync {
    /// Returns `Ok(true)` when `signature` over `message` was produced by
    /// `address`, `Ok(false)` on a well-formed mismatch, and an error for
    /// malformed inputs.
    async fn verify(
        &self,
        message: &str,
        address: &str,
        signature: &str,
    ) -> Result<bool, EvmCodecError>;
}

/// Offline EIP-191 ECDSA recover-and-compare verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eip191Verifier;

#[async_trait]
impl EvmSignatureVerifier for Eip191Verifier {
    async fn verify(
        &self,
        message: &str,
        address: &str,
        signature: &str,
    ) -> Result<bool, EvmCodecError> {
        let hex = signature
            .strip_prefix("0x")
            .ok_or_else(|| EvmCodecError::MalformedSignature("missing 0x prefix".into()))?;
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EvmCodecError::MalformedSignature(
                "signature is not hex".into(),
            ));
        }
        if hex.chars().all(|c| c == '0') {
            return Err(EvmCodecError::MalformedSignature("signature is zero".into()));
        }

        let signature: Signature = signature
            .parse()
            .map_err(|e| EvmCodecError::MalformedSignature(format!("{e}")))?;
        let expected: Address = address
            .parse()
            .map_err(|_| EvmCodecError::InvalidAddress(address.to_string()))?;
        let recovered = signature
            .recover_address_from_msg(message.as_bytes())
            .map_err(|e| EvmCodecError::Recovery(format!("{e}")))?;
        Ok(recovered == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ChallengeVersion1, SignatureKind};
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;

    fn payload(statement: Option<&str>) -> AgentPayload {
        AgentPayload {
            domain: "api.example.com".into(),
            address: "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".into(),
            uri: "https://api.example.com/data".parse().unwrap(),
            version: ChallengeVersion1,
            chain_id: ChainId::eip155(8453),
            kind: SignatureKind::Eip191,
            nonce: "32891756".into(),
            issued_at: "2026-08-02T10:00:00Z".into(),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: None,
            statement: statement.map(Into::into),
            signature_scheme: None,
            signature: "0x".into(),
        }
    }

    #[test]
    fn formats_minimal_message() {
        let message = format_siwe_message(&payload(None)).unwrap();
        assert_eq!(
            message,
            "api.example.com wants you to sign in with your Ethereum account:\n\
             0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045\n\
             \n\
             URI: https://api.example.com/data\n\
             Version: 1\n\
             Chain ID: 8453\n\
             Nonce: 32891756\n\
             Issued At: 2026-08-02T10:00:00Z"
        );
    }

    #[test]
    fn formats_statement_and_optional_fields() {
        let mut p = payload(Some("I accept the Terms of Service"));
        p.expiration_time = Some("2026-08-02T10:05:00Z".into());
        p.resources = Some(vec![
            "https://api.example.com/data".into(),
            "https://api.example.com/other".into(),
        ]);
        let message = format_siwe_message(&p).unwrap();
        assert!(message.contains(
            "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045\n\nI accept the Terms of Service\n\nURI:"
        ));
        assert!(message.contains("Issued At: 2026-08-02T10:00:00Z\nExpiration Time:"));
        assert!(message.ends_with(
            "Resources:\n- https://api.example.com/data\n- https://api.example.com/other"
        ));
    }

    #[test]
    fn rejects_non_decimal_chain_reference() {
        let mut p = payload(None);
        p.chain_id = ChainId::new("eip155", "base");
        let err = format_siwe_message(&p).unwrap_err();
        assert_eq!(err.to_string(), "Invalid eip155 chain id: eip155:base");
    }

    #[tokio::test]
    async fn recovers_and_matches_real_signature() {
        let signer = PrivateKeySigner::random();
        let mut p = payload(None);
        p.address = signer.address().to_string();
        let message = format_siwe_message(&p).unwrap();
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        let signature_hex = format!("0x{}", alloy::hex::encode(signature.as_bytes()));

        let ok = Eip191Verifier
            .verify(&message, &p.address, &signature_hex)
            .await
            .unwrap();
        assert!(ok);

        let other = PrivateKeySigner::random();
        let mismatch = Eip191Verifier
            .verify(&message, &other.address().to_string(), &signature_hex)
            .await
            .unwrap();
        assert!(!mismatch);
    }

    #[tokio::test]
    async fn rejects_lexically_invalid_signatures() {
        let message = "irrelevant";
        let address = "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        for bad in ["", "0x", "deadbeef", "0xnothex", "0x0000"] {
            assert!(Eip191Verifier.verify(message, address, bad).await.is_err());
        }
    }
}
