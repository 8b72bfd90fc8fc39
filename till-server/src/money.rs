//! Money calculation utilities using rust_decimal for precision
//!
//! All arithmetic is done in `Decimal` and rounded half-up to 2 decimal
//! places before conversion back to `f64` for storage/serialization. Totals
//! are always recomputed from the full current item set, never incrementally
//! drifted.

use rust_decimal::prelude::*;
use shared::models::{AddonInput, DraftItem, DraftItemInput, ItemAddon, Order, OrderStatus};

use crate::error::{EngineError, EngineResult};

/// Rounding: 2 decimal places, half-up
const DECIMAL_PLACES: u32 = 2;

/// Maximum allowed unit price per item
const MAX_PRICE: f64 = 1_000_000.0;
/// Maximum allowed quantity per line
const MAX_QUANTITY: i64 = 9999;

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Round a decimal to money precision and convert for storage
pub fn to_money(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(0.0)
}

fn require_finite(value: f64, field: &str) -> EngineResult<()> {
    if !value.is_finite() {
        tracing::warn!(field, value, "Rejected non-finite amount");
        return Err(EngineError::InvalidAmount(value));
    }
    Ok(())
}

fn validate_price(value: f64) -> EngineResult<()> {
    require_finite(value, "price")?;
    if !(0.0..=MAX_PRICE).contains(&value) {
        return Err(EngineError::InvalidAmount(value));
    }
    Ok(())
}

fn validate_quantity(qty: i64) -> EngineResult<()> {
    if qty <= 0 || qty > MAX_QUANTITY {
        return Err(EngineError::InvalidQuantity(qty));
    }
    Ok(())
}

fn validate_addon(addon: &AddonInput) -> EngineResult<()> {
    validate_price(addon.price)?;
    validate_quantity(addon.quantity)
}

/// Validate an item input before it touches the reservation tracker
pub fn validate_item_input(input: &DraftItemInput) -> EngineResult<()> {
    validate_price(input.unit_price)?;
    validate_quantity(input.quantity)?;
    for addon in &input.addons {
        validate_addon(addon)?;
    }
    Ok(())
}

/// Validate a manual order-level discount against the current subtotal
pub fn validate_discount(discount: f64, subtotal: f64) -> EngineResult<()> {
    require_finite(discount, "discount")?;
    if discount < 0.0 || dec(discount) > dec(subtotal) {
        return Err(EngineError::InvalidAmount(discount));
    }
    Ok(())
}

/// Recompute a line item's monetary fields from quantity, price and add-ons
///
/// `subtotal = quantity * unit_price + sum(addon.price * addon.quantity)`;
/// complimentary items keep their computed subtotal but the discount absorbs
/// it, so `total = subtotal - discount` holds in both cases.
pub fn recompute_item(item: &mut DraftItem, addons: &[ItemAddon]) {
    let base = dec(item.unit_price) * Decimal::from(item.quantity);
    let addon_sum: Decimal = addons
        .iter()
        .map(|a| dec(a.price) * Decimal::from(a.quantity))
        .sum();

    let subtotal = base + addon_sum;
    let discount = if item.is_complimentary {
        subtotal
    } else {
        Decimal::ZERO
    };

    item.subtotal = to_money(subtotal);
    item.discount = to_money(discount);
    item.total = to_money(subtotal - discount);
}

/// Deterministic draft-level totals from the full current item set
///
/// `subtotal = sum(item.subtotal)`, `total = subtotal - discount + tax`.
/// Returns `(subtotal, total)`.
pub fn recompute_draft_totals(items: &[DraftItem], discount: f64, tax: f64) -> (f64, f64) {
    let subtotal: Decimal = items.iter().map(|i| dec(i.subtotal)).sum();
    let item_discounts: Decimal = items.iter().map(|i| dec(i.discount)).sum();
    let total = subtotal - item_discounts - dec(discount) + dec(tax);
    (to_money(subtotal), to_money(total.max(Decimal::ZERO)))
}

/// Session aggregate: sum of totals over non-voided orders
pub fn sum_order_totals(orders: &[Order]) -> f64 {
    let total: Decimal = orders
        .iter()
        .filter(|o| o.status != OrderStatus::Voided)
        .map(|o| dec(o.total))
        .sum();
    to_money(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i64, unit_price: f64) -> DraftItem {
        DraftItem {
            id: "i".into(),
            draft_id: "d".into(),
            product_id: Some(1),
            name: "X".into(),
            quantity,
            unit_price,
            subtotal: 0.0,
            discount: 0.0,
            total: 0.0,
            is_vip_priced: false,
            is_complimentary: false,
            note: None,
        }
    }

    #[test]
    fn item_totals_follow_quantity_times_price() {
        let mut x = item(2, 50.0);
        recompute_item(&mut x, &[]);
        assert_eq!(x.subtotal, 100.0);
        assert_eq!(x.total, 100.0);
    }

    #[test]
    fn addons_are_part_of_the_line_subtotal() {
        let mut x = item(2, 10.0);
        let addons = vec![ItemAddon {
            id: "a".into(),
            item_id: "i".into(),
            addon_id: 9,
            name: "Extra cheese".into(),
            price: 1.5,
            quantity: 2,
        }];
        recompute_item(&mut x, &addons);
        assert_eq!(x.subtotal, 23.0);
        assert_eq!(x.total, 23.0);
    }

    #[test]
    fn complimentary_item_totals_zero() {
        let mut x = item(3, 4.0);
        x.is_complimentary = true;
        recompute_item(&mut x, &[]);
        assert_eq!(x.subtotal, 12.0);
        assert_eq!(x.discount, 12.0);
        assert_eq!(x.total, 0.0);
    }

    #[test]
    fn draft_totals_follow_item_set_changes() {
        // item X (qty 2, price 50) + item Y (qty 1, price 30) -> subtotal 130
        let mut x = item(2, 50.0);
        let mut y = item(1, 30.0);
        recompute_item(&mut x, &[]);
        recompute_item(&mut y, &[]);

        let (subtotal, total) = recompute_draft_totals(&[x.clone(), y.clone()], 0.0, 0.0);
        assert_eq!(subtotal, 130.0);
        assert_eq!(total, 130.0);

        // discount 10 -> total 120
        let (_, total) = recompute_draft_totals(&[x, y.clone()], 10.0, 0.0);
        assert_eq!(total, 120.0);

        // remove X -> total 30
        let (_, total) = recompute_draft_totals(&[y], 0.0, 0.0);
        assert_eq!(total, 30.0);
    }

    #[test]
    fn recompute_does_not_accumulate_float_drift() {
        // 0.1 * 3 classic: decimal arithmetic keeps it exact at 2dp
        let mut x = item(3, 0.1);
        recompute_item(&mut x, &[]);
        assert_eq!(x.subtotal, 0.3);
        let (subtotal, total) = recompute_draft_totals(&[x], 0.0, 0.0);
        assert_eq!(subtotal, 0.3);
        assert_eq!(total, 0.3);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let bad_qty = DraftItemInput {
            product_id: Some(1),
            name: "X".into(),
            quantity: 0,
            unit_price: 1.0,
            is_vip_priced: false,
            is_complimentary: false,
            note: None,
            addons: vec![],
        };
        assert!(matches!(
            validate_item_input(&bad_qty),
            Err(EngineError::InvalidQuantity(0))
        ));

        let bad_price = DraftItemInput {
            unit_price: -1.0,
            quantity: 1,
            ..bad_qty
        };
        assert!(matches!(
            validate_item_input(&bad_price),
            Err(EngineError::InvalidAmount(_))
        ));

        assert!(validate_discount(-5.0, 100.0).is_err());
        assert!(validate_discount(101.0, 100.0).is_err());
        assert!(validate_discount(100.0, 100.0).is_ok());
    }
}
