//! User directory collaborator
//!
//! Operator identity lives outside the engine; the access guard only needs
//! role and active flag per operator id.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::models::Operator;
use std::collections::HashMap;

/// External user directory
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve an operator; `None` when the id is unknown
    async fn get_operator(&self, id: &str) -> Option<Operator>;
}

/// In-memory directory implementation
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    operators: RwLock<HashMap<String, Operator>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operators(operators: impl IntoIterator<Item = Operator>) -> Self {
        let directory = Self::new();
        {
            let mut map = directory.operators.write();
            for op in operators {
                map.insert(op.id.clone(), op);
            }
        }
        directory
    }

    pub fn upsert(&self, operator: Operator) {
        self.operators.write().insert(operator.id.clone(), operator);
    }

    pub fn deactivate(&self, id: &str) {
        if let Some(op) = self.operators.write().get_mut(id) {
            op.is_active = false;
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_operator(&self, id: &str) -> Option<Operator> {
        self.operators.read().get(id).cloned()
    }
}
