//! Observability events emitted by the hooks.
//!
//! Events are strictly informational: nothing in the access decision depends
//! on a sink observing them, and a panicking sink would be a host bug, not a
//! protocol concern. The default sink forwards to `tracing`; hosts with a
//! metrics pipeline register their own.

use serde::Serialize;

/// What the hooks observed about a request or a settlement callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum HookEvent {
    /// A human-backed agent passed verification on `resource`.
    AgentVerified {
        resource: String,
        address: String,
        human_id: String,
    },
    /// Signature checked out but the wallet is not registered in the AgentBook.
    AgentNotVerified { resource: String, address: String },
    /// The agentkit header was missing a valid, fresh, well-bound payload.
    ValidationFailed {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// An underpaid settlement was recovered at the discounted amount.
    DiscountApplied {
        resource: String,
        address: String,
        human_id: String,
    },
    /// The per-human discount cap was already spent.
    DiscountExhausted {
        resource: String,
        address: String,
        human_id: String,
    },
}

impl HookEvent {
    /// Stable event name, as emitted on the wire and in logs.
    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::AgentVerified { .. } => "agent_verified",
            HookEvent::AgentNotVerified { .. } => "agent_not_verified",
            HookEvent::ValidationFailed { .. } => "validation_failed",
            HookEvent::DiscountApplied { .. } => "discount_applied",
            HookEvent::DiscountExhausted { .. } => "discount_exhausted",
        }
    }
}

/// Receives hook events. Implementations must be cheap and non-blocking;
/// the hooks call [`emit`](EventSink::emit) inline on the request path.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: HookEvent);
}

/// Default sink: structured `tracing` records, one per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: HookEvent) {
        match &event {
            HookEvent::AgentVerified {
                resource,
                address,
                human_id,
            } => tracing::info!(%resource, %address, %human_id, "agent_verified"),
            HookEvent::AgentNotVerified { resource, address } => {
                tracing::info!(%resource, %address, "agent_not_verified")
            }
            HookEvent::ValidationFailed { resource, error } => {
                tracing::debug!(%resource, ?error, "validation_failed")
            }
            HookEvent::DiscountApplied {
                resource,
                address,
                human_id,
            } => tracing::info!(%resource, %address, %human_id, "discount_applied"),
            HookEvent::DiscountExhausted {
                resource,
                address,
                human_id,
            } => tracing::info!(%resource, %address, %human_id, "discount_exhausted"),
        }
    }
}
