//! Solana (`solana:*`) challenge codec: SIWS message formatting and Ed25519
//! signature verification.
//!
//! The Sign-In-With-Solana message mirrors the SIWE layout with a
//! Solana-specific header line and the CAIP-2 reference (base58 genesis-hash
//! prefix) on the `Chain ID` line. Signatures are 64-byte Ed25519 detached
//! signatures over the UTF-8 bytes of the message; addresses are 32-byte
//! Ed25519 public keys. Both travel base58-encoded.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::proto::AgentPayload;

/// Failures specific to the Solana codec.
///
/// Length mismatches get their own variants with stable messages so a client
/// can tell a truncated signature from a garbled one.
#[derive(Debug, thiserror::Error)]
pub enum SolanaCodecError {
    #[error("Invalid signature encoding")]
    SignatureEncoding,
    #[error("Invalid signature length")]
    SignatureLength,
    #[error("Invalid public key encoding")]
    PublicKeyEncoding,
    #[error("Invalid public key length")]
    PublicKeyLength,
    #[error("Invalid public key")]
    PublicKey,
}

/// Renders the canonical SIWS message for a challenge payload.
pub fn format_siws_message(payload: &AgentPayload) -> String {
    let prefix = match &payload.statement {
        Some(statement) => format!(
            "{} wants you to sign in with your Solana account:\n{}\n\n{statement}",
            payload.domain, payload.address
        ),
        None => format!(
            "{} wants you to sign in with your Solana account:\n{}",
            payload.domain, payload.address
        ),
    };

    let mut fields = vec![
        format!("URI: {}", payload.uri),
        format!("Version: {}", payload.version),
        format!("Chain ID: {}", payload.chain_id.reference),
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

    format!("{prefix}\n\n{}", fields.join("\n"))
}

/// Verifies a detached Ed25519 signature over the UTF-8 bytes of `message`.
///
/// `signature` must base58-decode to exactly 64 bytes and `address` to exactly
/// 32 bytes. Returns `Ok(false)` on a well-formed cryptographic mismatch.
pub fn verify_ed25519(
    message: &str,
    address: &str,
    signature: &str,
) -> Result<bool, SolanaCodecError> {
    let signature_bytes = bs58::decode(signature)
        .into_vec()
        .map_err(|_| SolanaCodecError::SignatureEncoding)?;
    let signature_bytes: [u8; 64] = signature_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SolanaCodecError::SignatureLength)?;

    let key_bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| SolanaCodecError::PublicKeyEncoding)?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SolanaCodecError::PublicKeyLength)?;

    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SolanaCodecError::PublicKey)?;
    let signature = Signature::from_bytes(&signature_bytes);
    Ok(verifying_key.verify(message.as_bytes(), &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::proto::{ChallengeVersion1, SignatureKind};
    use ed25519_dalek::{Signer, SigningKey};

    const MAINNET_REFERENCE: &str = "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp";

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn payload(address: String) -> AgentPayload {
        AgentPayload {
            domain: "api.example.com".into(),
            address,
            uri: "https://api.example.com/data".parse().unwrap(),
            version: ChallengeVersion1,
            chain_id: ChainId::solana(MAINNET_REFERENCE),
            kind: SignatureKind::Ed25519,
            nonce: "32891756".into(),
            issued_at: "2026-08-02T10:00:00Z".into(),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: None,
            statement: None,
            signature_scheme: None,
            signature: String::new(),
        }
    }

    #[test]
    fn formats_with_solana_header_and_reference() {
        let address = bs58::encode(signing_key().verifying_key().as_bytes()).into_string();
        let message = format_siws_message(&payload(address.clone()));
        assert!(message.starts_with(&format!(
            "api.example.com wants you to sign in with your Solana account:\n{address}\n\nURI:"
        )));
        assert!(message.contains(&format!("Chain ID: {MAINNET_REFERENCE}")));
    }

    #[test]
    fn verifies_detached_signature() {
        let key = signing_key();
        let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
        let message = format_siws_message(&payload(address.clone()));
        let signature = bs58::encode(key.sign(message.as_bytes()).to_bytes()).into_string();

        assert!(verify_ed25519(&message, &address, &signature).unwrap());
        assert!(!verify_ed25519("tampered message", &address, &signature).unwrap());
    }

    #[test]
    fn rejects_signature_with_wrong_length() {
        let key = signing_key();
        let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
        let short = bs58::encode(&[1u8; 32]).into_string();
        let err = verify_ed25519("message", &address, &short).unwrap_err();
        assert_eq!(err.to_string(), "Invalid signature length");
    }

    #[test]
    fn rejects_public_key_with_wrong_length() {
        let signature = bs58::encode(&[1u8; 64]).into_string();
        let short_key = bs58::encode(&[1u8; 16]).into_string();
        let err = verify_ed25519("message", &short_key, &signature).unwrap_err();
        assert_eq!(err.to_string(), "Invalid public key length");
    }

    #[test]
    fn rejects_non_base58_inputs() {
        let key = signing_key();
        let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
        assert!(matches!(
            verify_ed25519("message", &address, "not-base58-0OIl"),
            Err(SolanaCodecError::SignatureEncoding)
        ));
        let signature = bs58::encode(&[1u8; 64]).into_string();
        assert!(matches!(
            verify_ed25519("message", "not-base58-0OIl", &signature),
            Err(SolanaCodecError::PublicKeyEncoding)
        ));
    }
}
