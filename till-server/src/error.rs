//! Engine error taxonomy
//!
//! Every component failure is returned as a typed result to the caller;
//! nothing is swallowed. Authorization failures are distinct and
//! non-retryable without administrative action; stock failures are retryable
//! after the caller re-checks availability and never leave partial state;
//! storage failures are transient and safe to retry because every
//! recomputation is idempotent from current state.

use shared::models::Role;
use thiserror::Error;

use crate::storage::StorageError;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operator not found: {0}")]
    UserNotFound(String),

    #[error("role {role:?} is not authorized for {action}")]
    RoleNotAuthorized { role: Role, action: &'static str },

    #[error("operator is deactivated: {0}")]
    UserInactive(String),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("stock conflict: durable stock changed under reservation for product {0}")]
    StockConflict(i64),

    #[error("draft not found: {0}")]
    DraftNotFound(String),

    #[error("operator has no active draft: {0}")]
    NoActiveDraft(String),

    #[error("draft is on hold: {0}")]
    DraftHeld(String),

    #[error("operator {0} already has an active draft")]
    ActiveDraftExists(String),

    #[error("draft has no items: {0}")]
    EmptyDraft(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("product not found: {0}")]
    ProductNotFound(i64),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session is not settleable: {0}")]
    SessionNotSettleable(String),

    #[error("session already terminal: {0}")]
    SessionClosed(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Whether the caller may retry the whole mutation as-is
    ///
    /// Stock failures are retryable after re-checking availability; storage
    /// failures are transient and the mutation is idempotent from current
    /// state. Authorization and caller-logic errors are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientStock { .. }
                | EngineError::StockConflict(_)
                | EngineError::CatalogUnavailable(_)
                | EngineError::Storage(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            EngineError::InsufficientStock {
                product_id: 1,
                requested: 3,
                available: 1
            }
            .is_retryable()
        );
        assert!(EngineError::StockConflict(1).is_retryable());
        assert!(!EngineError::UserInactive("op".into()).is_retryable());
        assert!(!EngineError::DraftNotFound("d".into()).is_retryable());
    }
}
