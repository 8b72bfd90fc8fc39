//! Order session ("tab") model

use serde::{Deserialize, Serialize};

use crate::util::{new_id, now_millis};

/// Session state machine: `Open -> Closing -> Closed`, with `Abandoned`
/// reachable from `Open` on timeout or explicit void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    /// Internal settling step persisted mid-close so a crash is observable
    Closing,
    Closed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Closed | SessionStatus::Abandoned)
    }
}

/// Long-lived grouping of confirmed orders against one table/service period
///
/// Invariant: `total` equals the sum of attached non-voided orders' totals
/// after every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSession {
    pub id: String,
    /// Daily sequential number for display ("tab 14")
    pub session_number: u64,
    pub table_id: String,
    pub status: SessionStatus,
    pub total: f64,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
    pub updated_at: i64,
}

impl OrderSession {
    pub fn new(session_number: u64, table_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            session_number,
            table_id: table_id.into(),
            status: SessionStatus::Open,
            total: 0.0,
            opened_at: now,
            closed_at: None,
            updated_at: now,
        }
    }
}
