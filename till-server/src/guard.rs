//! Access Guard
//!
//! Explicit authorization layer preceding every mutation and cross-operator
//! read. Row visibility is enforced here, not by the storage layer, so
//! callers get a typed failure instead of a silently empty result set.
//!
//! Failure taxonomy, surfaced distinctly:
//! - `UserNotFound`: operator id unresolvable
//! - `RoleNotAuthorized`: resolved, but role outside the allowed set
//! - `UserInactive`: resolved, allowed role, but deactivated

use std::sync::Arc;

use shared::models::Operator;

use crate::directory::UserDirectory;
use crate::error::{EngineError, EngineResult};

/// Action being authorized
#[derive(Debug, Clone)]
pub enum Action {
    /// Create or mutate a draft (add/update/remove items, hold, discard)
    MutateDraft,
    /// Read a draft owned by `owner_id`
    ViewDraft { owner_id: String },
    /// Read a session and its attached orders
    ViewSession,
    /// Confirm a draft into a durable order
    ConfirmOrder,
    /// Close or abandon a session
    SettleSession,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::MutateDraft => "draft mutation",
            Action::ViewDraft { .. } => "draft view",
            Action::ViewSession => "session view",
            Action::ConfirmOrder => "order confirmation",
            Action::SettleSession => "session settlement",
        }
    }
}

/// Authorizes requests against operator role and active status
#[derive(Clone)]
pub struct AccessGuard {
    directory: Arc<dyn UserDirectory>,
}

impl AccessGuard {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Authorize `operator_id` for `action`, returning the resolved operator
    ///
    /// Inactive operators are denied every mutation regardless of role.
    pub async fn authorize(&self, operator_id: &str, action: &Action) -> EngineResult<Operator> {
        let operator = self
            .directory
            .get_operator(operator_id)
            .await
            .ok_or_else(|| EngineError::UserNotFound(operator_id.to_string()))?;

        if !operator.is_active {
            tracing::warn!(operator_id = %operator_id, action = action.name(), "Denied: operator inactive");
            return Err(EngineError::UserInactive(operator_id.to_string()));
        }

        let allowed = match action {
            Action::MutateDraft | Action::ConfirmOrder | Action::SettleSession => {
                operator.role.can_mutate_drafts()
            }
            Action::ViewDraft { owner_id } => {
                owner_id == &operator.id || operator.role.can_view_all_drafts()
            }
            // Any active operator may view sessions (tabs are table-scoped,
            // not operator-scoped)
            Action::ViewSession => true,
        };

        if !allowed {
            tracing::warn!(
                operator_id = %operator_id,
                role = ?operator.role,
                action = action.name(),
                "Denied: role not authorized"
            );
            return Err(EngineError::RoleNotAuthorized {
                role: operator.role,
                action: action.name(),
            });
        }

        Ok(operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use shared::models::Role;

    fn guard_with(ops: Vec<Operator>) -> AccessGuard {
        AccessGuard::new(Arc::new(MemoryDirectory::with_operators(ops)))
    }

    #[tokio::test]
    async fn unknown_operator_is_user_not_found() {
        let guard = guard_with(vec![]);
        let err = guard.authorize("ghost", &Action::MutateDraft).await.unwrap_err();
        assert!(matches!(err, EngineError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn kitchen_role_cannot_mutate_drafts() {
        let guard = guard_with(vec![Operator::new("k1", "Kitchen", Role::Kitchen)]);
        let err = guard.authorize("k1", &Action::MutateDraft).await.unwrap_err();
        assert!(matches!(err, EngineError::RoleNotAuthorized { .. }));
    }

    #[tokio::test]
    async fn inactive_admin_is_denied_before_role_check() {
        let mut admin = Operator::new("a1", "Admin", Role::Admin);
        admin.is_active = false;
        let guard = guard_with(vec![admin]);
        let err = guard.authorize("a1", &Action::MutateDraft).await.unwrap_err();
        assert!(matches!(err, EngineError::UserInactive(_)));
    }

    #[tokio::test]
    async fn cashier_views_own_draft_but_not_others() {
        let guard = guard_with(vec![
            Operator::new("c1", "Ana", Role::Cashier),
            Operator::new("m1", "Marta", Role::Manager),
        ]);

        guard
            .authorize("c1", &Action::ViewDraft { owner_id: "c1".into() })
            .await
            .unwrap();
        let err = guard
            .authorize("c1", &Action::ViewDraft { owner_id: "m1".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RoleNotAuthorized { .. }));

        // Manager sees everything
        guard
            .authorize("m1", &Action::ViewDraft { owner_id: "c1".into() })
            .await
            .unwrap();
    }
}
