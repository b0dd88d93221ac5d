//! Builds the `agentkit` block a server embeds in its 402 response.
//!
//! The block tells an agent everything it needs to come back with a signed
//! challenge: the message parameters to sign (`info`, including a
//! per-response server-minted nonce), the chains the route accepts, a JSON
//! Schema of the expected header payload, and the configured access mode so
//! the agent knows what verification buys.

use chrono::{SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::proto::{AccessMode, ChallengeVersion1, SupportedChain};

/// Key of the extension block inside the 402 response.
pub const EXTENSION_KEY: &str = "agentkit";

/// Challenge parameters the agent signs back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInfo {
    pub domain: String,
    pub uri: Url,
    pub version: ChallengeVersion1,
    /// 16 random bytes, hex-encoded, fresh per response.
    pub nonce: String,
    pub issued_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    pub resources: Vec<String>,
}

/// The full `agentkit` extension block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentKitExtension {
    pub info: ChallengeInfo,
    pub supported_chains: Vec<SupportedChain>,
    /// JSON Schema (draft 2020-12) of the expected header payload.
    pub schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AccessMode>,
}

/// Optional overrides for challenge construction.
///
/// `domain` and `uri` default from the request URL; `expires_in` adds an
/// `expirationTime` relative to issuance.
#[derive(Debug, Clone, Default)]
pub struct ChallengeOptions {
    pub domain: Option<String>,
    pub uri: Option<Url>,
    pub statement: Option<String>,
    pub expires_in: Option<Duration>,
}

/// Mints a fresh challenge nonce: 16 random bytes, hex-encoded.
pub fn mint_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    alloy::hex::encode(bytes)
}

/// Builds the extension block for one 402 response.
pub fn declare_challenge(
    request_url: &Url,
    supported_chains: &[SupportedChain],
    mode: Option<&AccessMode>,
    options: &ChallengeOptions,
) -> AgentKitExtension {
    let uri = options.uri.clone().unwrap_or_else(|| request_url.clone());
    let domain = options
        .domain
        .clone()
        .or_else(|| uri.host_str().map(ToOwned::to_owned))
        .unwrap_or_default();
    let issued = Utc::now();
    let expiration_time = options.expires_in.map(|ttl| {
        (issued + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero()))
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    });

    AgentKitExtension {
        info: ChallengeInfo {
            domain,
            resources: vec![uri.to_string()],
            uri,
            version: ChallengeVersion1,
            nonce: mint_nonce(),
            issued_at: issued.to_rfc3339_opts(SecondsFormat::Millis, true),
            expiration_time,
            statement: options.statement.clone(),
        },
        supported_chains: supported_chains.to_vec(),
        schema: payload_schema(),
        mode: mode.cloned(),
    }
}

/// JSON Schema (draft 2020-12) describing the expected header payload.
pub fn payload_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "type": "object",
        "properties": {
            "domain": { "type": "string" },
            "address": { "type": "string" },
            "uri": { "type": "string", "format": "uri" },
            "version": { "const": "1" },
            "chainId": { "type": "string" },
            "type": { "enum": ["eip191", "ed25519"] },
            "nonce": { "type": "string" },
            "issuedAt": { "type": "string" },
            "expirationTime": { "type": "string" },
            "notBefore": { "type": "string" },
            "requestId": { "type": "string" },
            "resources": { "type": "array", "items": { "type": "string" } },
            "statement": { "type": "string" },
            "signatureScheme": { "enum": ["eip191", "eip1271", "eip6492", "siws"] },
            "signature": { "type": "string" }
        },
        "required": [
            "domain", "address", "uri", "version", "chainId",
            "type", "nonce", "issuedAt", "signature"
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainId;
    use crate::proto::SignatureKind;

    fn supported() -> Vec<SupportedChain> {
        vec![
            SupportedChain::for_chain(ChainId::eip155(8453)).unwrap(),
            SupportedChain::for_chain(ChainId::solana("5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp"))
                .unwrap(),
        ]
    }

    #[test]
    fn nonce_is_sixteen_random_bytes_hex() {
        let nonce = mint_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, mint_nonce());
    }

    #[test]
    fn defaults_domain_and_uri_from_request_url() {
        let url: Url = "https://api.example.com/data?q=1".parse().unwrap();
        let block = declare_challenge(&url, &supported(), None, &ChallengeOptions::default());
        assert_eq!(block.info.domain, "api.example.com");
        assert_eq!(block.info.uri, url);
        assert_eq!(block.info.resources, vec![url.to_string()]);
        assert!(block.info.expiration_time.is_none());
    }

    #[test]
    fn honours_overrides_and_ttl() {
        let url: Url = "http://127.0.0.1:8080/data".parse().unwrap();
        let options = ChallengeOptions {
            domain: Some("api.example.com".into()),
            uri: Some("https://api.example.com/data".parse().unwrap()),
            statement: Some("Verified humans ride free".into()),
            expires_in: Some(Duration::from_secs(120)),
        };
        let block = declare_challenge(&url, &supported(), None, &options);
        assert_eq!(block.info.domain, "api.example.com");
        assert_eq!(block.info.uri.as_str(), "https://api.example.com/data");
        assert!(block.info.expiration_time.is_some());
        assert_eq!(block.info.statement.as_deref(), Some("Verified humans ride free"));
    }

    #[test]
    fn advertises_chain_appropriate_signature_types() {
        let url: Url = "https://api.example.com/data".parse().unwrap();
        let block = declare_challenge(&url, &supported(), None, &ChallengeOptions::default());
        assert_eq!(block.supported_chains[0].kind, SignatureKind::Eip191);
        assert_eq!(block.supported_chains[1].kind, SignatureKind::Ed25519);
    }

    #[test]
    fn echoes_access_mode_and_schema_requireds() {
        let url: Url = "https://api.example.com/data".parse().unwrap();
        let mode = AccessMode::Discount {
            percent: 50,
            uses: Some(10),
        };
        let block = declare_challenge(&url, &supported(), Some(&mode), &ChallengeOptions::default());
        assert_eq!(block.mode, Some(mode));

        let required = block.schema["required"].as_array().unwrap();
        for field in [
            "domain", "address", "uri", "version", "chainId", "type", "nonce", "issuedAt",
            "signature",
        ] {
            assert!(required.contains(&json!(field)), "missing {field}");
        }
        let json = serde_json::to_value(&block).unwrap();
        assert!(json["supportedChains"][0]["chainId"].is_string());
    }
}
