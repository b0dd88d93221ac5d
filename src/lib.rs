//! Human-verified agent access for [x402](https://www.x402.org)-protected endpoints.
//!
//! This crate implements the server side of the `agentkit` extension to the x402
//! payment protocol. It lets a payment-gated service tell apart automated traffic
//! that is backed by a verified human from anonymous bots, and apply a configurable
//! access policy to the verified kind: free bypass, an N-use free trial, or a
//! percentage discount recovered through the payment facilitator.
//!
//! # Overview
//!
//! An agent proves personhood by signing a [CAIP-122](https://chainagnostic.org/CAIPs/caip-122)
//! challenge (Sign-In With Ethereum on EVM chains, Sign-In With Solana on Solana)
//! with a wallet that has been registered against an anonymous human identifier in
//! the on-chain AgentBook registry. The server embeds the challenge parameters in
//! its `402 Payment Required` response; the agent returns the signed payload in the
//! `agentkit` request header on its next attempt.
//!
//! On a protected request the flow is: decode the header ([`proto`]) → validate
//! domain binding and temporal bounds ([`validate`]) → verify the signature for
//! the payload's chain family ([`chain`]) → resolve the wallet to a human
//! identifier ([`agentbook`]) → consult usage counters ([`store`]) and apply the
//! configured [`AccessMode`](proto::AccessMode) ([`gate`]).
//!
//! # Modules
//!
//! - [`agentbook`] — On-chain registry client resolving wallets to human identifiers.
//! - [`chain`] — CAIP-2 chain identifiers and per-family challenge codecs (SIWE / SIWS).
//! - [`challenge`] — Builds the `agentkit` block embedded in 402 responses.
//! - [`events`] — Observability events emitted by the hooks.
//! - [`gate`] — The request hook and the discount verify-failure hook.
//! - [`proto`] — Wire types and the base64 header codec.
//! - [`store`] — Usage counters and the nonce replay guard.
//! - [`validate`] — Domain, origin, and temporal validation of parsed payloads.
//!
//! # Integration
//!
//! The crate is framework-agnostic: the hooks consume `http::HeaderMap` and
//! `url::Url`, so any tower/axum/hyper server can host them. The enclosing server
//! calls [`AgentGate::on_request`](gate::AgentGate::on_request) before its normal
//! payment handling and, in discount mode only, forwards facilitator verification
//! failures to [`AgentGate::on_verify_failure`](gate::AgentGate::on_verify_failure).
//!
//! # Failure posture
//!
//! Every internal failure — malformed headers, stale challenges, bad signatures,
//! RPC errors — resolves to "no decision", letting the normal payment flow
//! proceed. The extension never produces a 5xx and never grants access on error.

pub mod agentbook;
pub mod chain;
pub mod challenge;
pub mod events;
pub mod gate;
pub mod proto;
pub mod store;
pub mod validate;

pub use agentbook::{AgentBookClient, HumanId, HumanRegistry};
pub use chain::{ChainId, Namespace};
pub use challenge::AgentKitExtension;
pub use gate::{AgentGate, AgentGateConfig, RequestDecision, VerifyFailureDecision};
pub use proto::{AccessMode, AgentPayload, SignatureKind, AGENTKIT_HEADER};
pub use store::{InMemoryUsageStore, UsageStore};
