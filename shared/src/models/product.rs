//! Product Model

use serde::{Deserialize, Serialize};

/// Cached snapshot of a catalog product
///
/// The engine never mutates catalog rows directly; durable stock changes go
/// through the catalog collaborator at reservation commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub unit_price: f64,
    /// Optional member price, used when an item is added VIP-priced
    pub vip_price: Option<f64>,
    /// Durable stock count as last seen from the catalog
    pub stock: i64,
    pub is_active: bool,
}

impl Product {
    pub fn new(id: i64, name: impl Into<String>, unit_price: f64, stock: i64) -> Self {
        Self {
            id,
            name: name.into(),
            unit_price,
            vip_price: None,
            stock,
            is_active: true,
        }
    }

    pub fn with_vip_price(mut self, vip_price: f64) -> Self {
        self.vip_price = Some(vip_price);
        self
    }

    /// Effective unit price for the given pricing tier
    pub fn price_for(&self, vip: bool) -> f64 {
        if vip {
            self.vip_price.unwrap_or(self.unit_price)
        } else {
            self.unit_price
        }
    }
}
