//! Chain identifiers and per-family challenge codecs.
//!
//! Each supported chain family exposes a codec: [`evm`] formats SIWE (EIP-4361)
//! messages and verifies EIP-191 signatures, [`solana`] formats SIWS messages
//! and verifies detached Ed25519 signatures. [`verify_payload_signature`] is
//! the routing layer on top: it selects the codec by the payload's CAIP-2
//! namespace, enforces the `type`↔namespace pairing, assembles the canonical
//! message, and confirms the asserted signer.

pub mod chain_id;
pub mod evm;
pub mod solana;

pub use chain_id::{ChainId, ChainIdFormatError, Namespace, UnsupportedChainNamespace};

use crate::proto::{AgentPayload, SignatureKind};
use evm::{EvmCodecError, EvmSignatureVerifier};
use solana::SolanaCodecError;

/// Why a payload's signature failed to verify.
#[derive(Debug, thiserror::Error)]
pub enum SignatureVerificationError {
    #[error(transparent)]
    UnsupportedNamespace(#[from] UnsupportedChainNamespace),
    /// The asserted signature family does not belong to the payload's chain.
    #[error("Signature type {kind} does not match chain {chain_id}")]
    KindMismatch {
        kind: SignatureKind,
        chain_id: ChainId,
    },
    #[error(transparent)]
    Evm(#[from] EvmCodecError),
    #[error(transparent)]
    Solana(#[from] SolanaCodecError),
    /// Well-formed signature, wrong signer.
    #[error("Signature does not match address {0}")]
    SignerMismatch(String),
}

/// Verifies the signature of a parsed challenge payload.
///
/// Routing is closed over the two known namespaces: `eip155:*` assembles the
/// SIWE message and verifies through `evm_verifier` (EIP-191 recovery by
/// default, RPC-backed EIP-1271/6492 when the caller supplied one);
/// `solana:*` assembles the SIWS message and verifies Ed25519 offline.
///
/// Both families verify an *asserted* address: success confirms that
/// `payload.address` produced the signature, it never recovers an unknown
/// signer for the caller.
pub async fn verify_payload_signature(
    payload: &AgentPayload,
    evm_verifier: &dyn EvmSignatureVerifier,
) -> Result<(), SignatureVerificationError> {
    let namespace = Namespace::of(&payload.chain_id)?;
    let expected_kind = SignatureKind::for_namespace(namespace);
    if payload.kind != expected_kind {
        return Err(SignatureVerificationError::KindMismatch {
            kind: payload.kind,
            chain_id: payload.chain_id.clone(),
        });
    }

    let valid = match namespace {
        Namespace::Eip155 => {
            let message = evm::format_siwe_message(payload)?;
            evm_verifier
                .verify(&message, &payload.address, &payload.signature)
                .await?
        }
        Namespace::Solana => {
            let message = solana::format_siws_message(payload);
            solana::verify_ed25519(&message, &payload.address, &payload.signature)?
        }
    };

    if valid {
        Ok(())
    } else {
        Err(SignatureVerificationError::SignerMismatch(
            payload.address.clone(),
        ))
    }
}
