//! Durable order model (post-confirmation)

use serde::{Deserialize, Serialize};

use super::draft::DraftItem;

/// Order lifecycle after confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Stock committed, awaiting settlement
    Confirmed,
    /// Settled/paid - terminal state
    Completed,
    /// Voided after confirmation - terminal state, excluded from aggregates
    Voided,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Voided)
    }
}

/// Confirmed order
///
/// Created by freezing a draft at confirmation; the draft row is deleted in
/// the same transaction. Belongs to at most one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub session_id: Option<String>,
    pub operator_id: String,
    pub status: OrderStatus,
    /// Line items frozen from the draft at confirmation
    pub items: Vec<DraftItem>,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    pub receipt_number: String,
    pub confirmed_at: i64,
}
