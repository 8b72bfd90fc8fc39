//! Change-bus event types
//!
//! Events carry the post-mutation totals snapshot of the affected aggregate,
//! not a diff. Delivery is best-effort, at-least-once, ordered per topic by
//! `sequence`; consumers treat events as hints and re-fetch authoritative
//! state on reconnect or lag.

use serde::{Deserialize, Serialize};

use crate::models::SessionStatus;

/// Subscription topic
///
/// A terminal subscribes to its own operator's draft topic plus the session
/// topics it is actively viewing; station displays subscribe to everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topic {
    Draft { operator_id: String },
    Session { session_id: String },
}

impl Topic {
    pub fn draft(operator_id: impl Into<String>) -> Self {
        Topic::Draft {
            operator_id: operator_id.into(),
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Topic::Session {
            session_id: session_id.into(),
        }
    }
}

/// Row-level mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Post-mutation totals of a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftTotals {
    pub draft_id: String,
    pub operator_id: String,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    pub item_count: usize,
    pub on_hold: bool,
}

/// Post-mutation totals of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTotals {
    pub session_id: String,
    pub status: SessionStatus,
    pub total: f64,
    pub order_count: usize,
}

/// Aggregate snapshot carried by an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "aggregate", rename_all = "snake_case")]
pub enum ChangePayload {
    Draft(DraftTotals),
    Session(SessionTotals),
}

/// A single change event published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Engine-wide monotonic sequence; per-topic ordering follows from it
    pub sequence: u64,
    pub topic: Topic,
    pub kind: ChangeKind,
    pub payload: ChangePayload,
    pub timestamp: i64,
}
