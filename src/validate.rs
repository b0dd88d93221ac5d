//! Domain-binding, origin, temporal, and nonce validation of parsed payloads.
//!
//! Validation runs before any cryptography: a payload that fails here is never
//! worth a signature check, let alone an RPC round trip. The checks bind the
//! message to this server (domain and origin), to the advertised chains, to a
//! bounded time window, and to a fresh nonce.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::chain::ChainId;
use crate::proto::AgentPayload;

/// Issued-at messages older than this are rejected.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Knobs for [`validate_message`].
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Maximum accepted age of `issuedAt`.
    pub max_age: Duration,
    /// Chains this resource advertised in its 402 response. An empty list
    /// disables the advertisement check (standalone validator use); the
    /// request hook always passes its configured set.
    pub supported_chains: Vec<ChainId>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            supported_chains: Vec::new(),
        }
    }
}

/// Why a payload failed message validation.
#[derive(Debug, thiserror::Error)]
pub enum MessageValidationError {
    #[error("Domain mismatch: expected {expected}, got {actual}")]
    DomainMismatch { expected: String, actual: String },
    #[error("URI origin mismatch: expected {expected}, got {actual}")]
    OriginMismatch { expected: String, actual: String },
    #[error("Resource URL has no hostname: {0}")]
    NoHostname(Url),
    #[error("Chain {0} is not supported by this resource")]
    ChainNotSupported(ChainId),
    #[error("Malformed {field} timestamp: {value}")]
    MalformedTimestamp { field: &'static str, value: String },
    #[error("Message is issued in the future")]
    IssuedInFuture,
    #[error("Message is too old")]
    TooOld,
    #[error("Message has expired")]
    Expired,
    #[error("Message is not yet valid")]
    NotYetValid,
    #[error("Resources list does not include the resource URI")]
    ResourcesMissingUri,
    #[error("Nonce has already been used")]
    NonceReplayed,
}

fn parse_timestamp(
    field: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, MessageValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| MessageValidationError::MalformedTimestamp {
            field,
            value: value.to_string(),
        })
}

/// Validates a parsed payload against the resource it claims to unlock.
///
/// Checks, in order: `domain` equals the hostname of `resource`; the payload
/// URI's origin equals the resource origin; `chainId` is among the advertised
/// chains; `issuedAt` parses, is not in the future, and is no older than
/// `max_age`; `expirationTime` (if present) parses and lies in the future;
/// `notBefore` (if present) parses and lies in the past; `check_nonce` accepts
/// the nonce. The nonce callback may suspend on I/O (a remote seen-set);
/// everything else is pure CPU.
///
/// Never panics; every failure is a typed [`MessageValidationError`].
pub async fn validate_message<F, Fut>(
    payload: &AgentPayload,
    resource: &Url,
    options: &ValidationOptions,
    check_nonce: F,
) -> Result<(), MessageValidationError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let expected_host = resource
        .host_str()
        .ok_or_else(|| MessageValidationError::NoHostname(resource.clone()))?;
    if payload.domain != expected_host {
        return Err(MessageValidationError::DomainMismatch {
            expected: expected_host.to_string(),
            actual: payload.domain.clone(),
        });
    }

    let expected_origin = resource.origin();
    if payload.uri.origin() != expected_origin {
        return Err(MessageValidationError::OriginMismatch {
            expected: expected_origin.ascii_serialization(),
            actual: payload.uri.origin().ascii_serialization(),
        });
    }

    if !options.supported_chains.is_empty()
        && !options.supported_chains.contains(&payload.chain_id)
    {
        return Err(MessageValidationError::ChainNotSupported(
            payload.chain_id.clone(),
        ));
    }

    let now = Utc::now();
    let issued_at = parse_timestamp("issuedAt", &payload.issued_at)?;
    if issued_at > now {
        return Err(MessageValidationError::IssuedInFuture);
    }
    let max_age = ChronoDuration::from_std(options.max_age).unwrap_or(ChronoDuration::MAX);
    if now - issued_at > max_age {
        return Err(MessageValidationError::TooOld);
    }

    if let Some(expiration_time) = &payload.expiration_time {
        let expiration = parse_timestamp("expirationTime", expiration_time)?;
        if expiration < now {
            return Err(MessageValidationError::Expired);
        }
    }

    if let Some(not_before) = &payload.not_before {
        let not_before = parse_timestamp("notBefore", not_before)?;
        if not_before > now {
            return Err(MessageValidationError::NotYetValid);
        }
    }

    if let Some(resources) = &payload.resources
        && !resources.iter().any(|r| r == payload.uri.as_str())
    {
        return Err(MessageValidationError::ResourcesMissingUri);
    }

    if !check_nonce(payload.nonce.clone()).await {
        return Err(MessageValidationError::NonceReplayed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{ChallengeVersion1, SignatureKind};
    use chrono::SecondsFormat;

    fn fresh_nonce(_: String) -> std::future::Ready<bool> {
        std::future::ready(true)
    }

    fn payload() -> AgentPayload {
        AgentPayload {
            domain: "api.example.com".into(),
            address: "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".into(),
            uri: "https://api.example.com/data".parse().unwrap(),
            version: ChallengeVersion1,
            chain_id: ChainId::eip155(8453),
            kind: SignatureKind::Eip191,
            nonce: "32891756".into(),
            issued_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: None,
            statement: None,
            signature_scheme: None,
            signature: "0x".into(),
        }
    }

    fn resource() -> Url {
        "https://api.example.com/data".parse().unwrap()
    }

    #[tokio::test]
    async fn accepts_fresh_bound_payload() {
        let options = ValidationOptions {
            supported_chains: vec![ChainId::eip155(8453)],
            ..Default::default()
        };
        validate_message(&payload(), &resource(), &options, fresh_nonce)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_domain_mismatch() {
        let mut p = payload();
        p.domain = "evil.example.com".into();
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::DomainMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_origin_mismatch() {
        // Same hostname, different scheme: the origin check has to catch it.
        let mut p = payload();
        p.uri = "http://api.example.com/data".parse().unwrap();
        p.domain = "api.example.com".into();
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::OriginMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_unadvertised_chain() {
        let options = ValidationOptions {
            supported_chains: vec![ChainId::eip155(1)],
            ..Default::default()
        };
        let err = validate_message(&payload(), &resource(), &options, fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::ChainNotSupported(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_issued_at() {
        let mut p = payload();
        p.issued_at = "last tuesday".into();
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MessageValidationError::MalformedTimestamp {
                field: "issuedAt",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejects_future_issued_at() {
        let mut p = payload();
        p.issued_at =
            (Utc::now() + ChronoDuration::minutes(10)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::IssuedInFuture));
    }

    #[tokio::test]
    async fn rejects_stale_issued_at() {
        let mut p = payload();
        p.issued_at =
            (Utc::now() - ChronoDuration::minutes(6)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::TooOld));
    }

    #[tokio::test]
    async fn honours_custom_max_age() {
        let mut p = payload();
        p.issued_at =
            (Utc::now() - ChronoDuration::minutes(6)).to_rfc3339_opts(SecondsFormat::Millis, true);
        let options = ValidationOptions {
            max_age: Duration::from_secs(3600),
            ..Default::default()
        };
        validate_message(&p, &resource(), &options, fresh_nonce)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_expired_message() {
        let mut p = payload();
        p.expiration_time = Some(
            (Utc::now() - ChronoDuration::seconds(1)).to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::Expired));
    }

    #[tokio::test]
    async fn rejects_not_yet_valid_message() {
        let mut p = payload();
        p.not_before = Some(
            (Utc::now() + ChronoDuration::minutes(1)).to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::NotYetValid));
    }

    #[tokio::test]
    async fn resources_must_carry_the_resource_uri() {
        let mut p = payload();
        p.resources = Some(vec!["https://api.example.com/other".into()]);
        let err = validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap_err();
        assert!(matches!(err, MessageValidationError::ResourcesMissingUri));

        p.resources = Some(vec![
            "https://api.example.com/other".into(),
            "https://api.example.com/data".into(),
        ]);
        validate_message(&p, &resource(), &Default::default(), fresh_nonce)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_replayed_nonce() {
        let err = validate_message(&payload(), &resource(), &Default::default(), |_| {
            std::future::ready(false)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, MessageValidationError::NonceReplayed));
    }
}
