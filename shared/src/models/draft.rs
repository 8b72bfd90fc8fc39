//! Draft order models (operator cart)
//!
//! A draft is one operator's in-progress cart: header + line items + per-item
//! add-ons. Header totals are a pure function of the current item set and are
//! only ever written by the engine's recompute pass.

use serde::{Deserialize, Serialize};

use crate::util::{new_id, now_millis};

/// Draft order header
///
/// Invariant: at most one non-held draft exists per operator at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftOrder {
    pub id: String,
    pub operator_id: String,
    pub customer_id: Option<String>,
    pub table_id: Option<String>,
    /// Session the draft will attach to on confirmation, if pre-selected
    pub session_id: Option<String>,
    pub subtotal: f64,
    /// Manual order-level discount
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    /// Held drafts are parked and excluded from the active lookup
    pub on_hold: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DraftOrder {
    pub fn new(
        operator_id: impl Into<String>,
        customer_id: Option<String>,
        table_id: Option<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: new_id(),
            operator_id: operator_id.into(),
            customer_id,
            table_id,
            session_id: None,
            subtotal: 0.0,
            discount: 0.0,
            tax: 0.0,
            total: 0.0,
            on_hold: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Draft line item
///
/// Invariants: `total = subtotal - discount`; `subtotal` is consistent with
/// `quantity * unit_price` plus add-on lines, unless complimentary (then the
/// discount absorbs the full subtotal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub id: String,
    pub draft_id: String,
    /// None for composite packages without a single backing product
    pub product_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub subtotal: f64,
    pub discount: f64,
    pub total: f64,
    pub is_vip_priced: bool,
    pub is_complimentary: bool,
    pub note: Option<String>,
}

/// Add-on attached to a draft item (pure child, same lifecycle)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemAddon {
    pub id: String,
    pub item_id: String,
    pub addon_id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

/// Input payload for adding an item to a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItemInput {
    pub product_id: Option<i64>,
    pub name: String,
    pub quantity: i64,
    pub unit_price: f64,
    #[serde(default)]
    pub is_vip_priced: bool,
    #[serde(default)]
    pub is_complimentary: bool,
    pub note: Option<String>,
    #[serde(default)]
    pub addons: Vec<AddonInput>,
}

/// Input payload for an item add-on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonInput {
    pub addon_id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

/// Partial update for a draft item; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemChanges {
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
    pub note: Option<String>,
    pub is_complimentary: Option<bool>,
}
