//! Operator Model
//!
//! Operators come from the external user directory; the engine only reads
//! role and active flag to authorize mutations.

use serde::{Deserialize, Serialize};

/// Operator role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Cashier,
    Manager,
    Admin,
    Kitchen,
    Waiter,
}

impl Role {
    /// Roles allowed to create and mutate drafts and confirm orders
    pub fn can_mutate_drafts(&self) -> bool {
        matches!(self, Role::Cashier | Role::Manager | Role::Admin)
    }

    /// Roles allowed to view drafts owned by other operators
    pub fn can_view_all_drafts(&self) -> bool {
        matches!(self, Role::Manager | Role::Admin)
    }
}

/// Operator entity (user directory row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
}

impl Operator {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_roles() {
        assert!(Role::Cashier.can_mutate_drafts());
        assert!(Role::Manager.can_mutate_drafts());
        assert!(Role::Admin.can_mutate_drafts());
        assert!(!Role::Kitchen.can_mutate_drafts());
        assert!(!Role::Waiter.can_mutate_drafts());
    }

    #[test]
    fn cross_visibility_roles() {
        assert!(!Role::Cashier.can_view_all_drafts());
        assert!(Role::Manager.can_view_all_drafts());
        assert!(Role::Admin.can_view_all_drafts());
    }
}
