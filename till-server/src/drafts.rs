//! Draft Order Store
//!
//! One mutable cart per operator: header + line items + add-ons. Header
//! totals are recomputed from the full item set on every mutation, inside
//! the same write transaction, never adjusted incrementally.
//!
//! Stock interaction contract: product-backed items reserve before their row
//! is written and the whole operation fails with no partial state if the
//! tracker rejects the claim. If storage fails after a successful
//! reservation, the claim is compensated before the error propagates.

use std::sync::Arc;

use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use shared::models::{DraftItem, DraftItemInput, DraftOrder, ItemAddon, ItemChanges};
use shared::util::{new_id, now_millis};

use crate::error::{EngineError, EngineResult};
use crate::money;
use crate::stock::StockTracker;
use crate::storage::StagingStorage;

/// Full draft detail for rendering and receipt generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftDetail {
    pub draft: DraftOrder,
    pub items: Vec<(DraftItem, Vec<ItemAddon>)>,
}

/// Persists drafts and keeps their totals consistent with the item set
#[derive(Clone)]
pub struct DraftStore {
    storage: StagingStorage,
    stock: Arc<StockTracker>,
}

impl DraftStore {
    pub fn new(storage: StagingStorage, stock: Arc<StockTracker>) -> Self {
        Self { storage, stock }
    }

    /// Return the operator's existing non-held draft, or create one
    ///
    /// Lookup and creation share one write transaction, so concurrent calls
    /// for the same operator observe the same draft. Returns `(draft,
    /// created)`.
    pub fn ensure_draft(
        &self,
        operator_id: &str,
        customer_id: Option<String>,
        table_id: Option<String>,
    ) -> EngineResult<(DraftOrder, bool)> {
        let txn = self.storage.begin_write()?;
        if let Some(draft_id) = self.storage.get_active_draft_id_txn(&txn, operator_id)?
            && let Some(draft) = self.storage.get_draft_txn(&txn, &draft_id)?
            && !draft.on_hold
        {
            return Ok((draft, false));
        }

        let draft = DraftOrder::new(operator_id, customer_id, table_id);
        self.storage.store_draft(&txn, &draft)?;
        self.storage.set_active_draft(&txn, operator_id, &draft.id)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        tracing::info!(draft_id = %draft.id, operator_id, "Draft created");
        Ok((draft, true))
    }

    /// Load a draft or fail with `DraftNotFound`
    pub fn load(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        self.storage
            .get_draft(draft_id)?
            .ok_or_else(|| EngineError::DraftNotFound(draft_id.to_string()))
    }

    /// Full detail: header plus items with their add-ons
    pub fn detail(&self, draft_id: &str) -> EngineResult<DraftDetail> {
        let draft = self.load(draft_id)?;
        let mut items = Vec::new();
        for item in self.storage.get_items(draft_id)? {
            let addons = self.storage.get_addons(&item.id)?;
            items.push((item, addons));
        }
        Ok(DraftDetail { draft, items })
    }

    /// Number of line items currently in the draft
    pub fn item_count(&self, draft_id: &str) -> EngineResult<usize> {
        Ok(self.storage.get_items(draft_id)?.len())
    }

    fn load_mutable(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        let draft = self.load(draft_id)?;
        if draft.on_hold {
            return Err(EngineError::DraftHeld(draft_id.to_string()));
        }
        Ok(draft)
    }

    /// Add an item (and its add-ons) to a draft
    ///
    /// Reserves stock for product-backed items first; inserts the rows and
    /// recomputes the draft totals in one transaction.
    pub fn add_item(
        &self,
        draft_id: &str,
        input: DraftItemInput,
    ) -> EngineResult<(DraftOrder, DraftItem)> {
        let mut draft = self.load_mutable(draft_id)?;
        money::validate_item_input(&input)?;

        // Reservation precedes the row write (optimistic claim against
        // shared stock); complimentary items still consume stock.
        if let Some(product_id) = input.product_id {
            self.stock.reserve(draft_id, product_id, input.quantity)?;
        }

        let mut item = DraftItem {
            id: new_id(),
            draft_id: draft_id.to_string(),
            product_id: input.product_id,
            name: input.name,
            quantity: input.quantity,
            unit_price: input.unit_price,
            subtotal: 0.0,
            discount: 0.0,
            total: 0.0,
            is_vip_priced: input.is_vip_priced,
            is_complimentary: input.is_complimentary,
            note: input.note,
        };
        let addons: Vec<ItemAddon> = input
            .addons
            .into_iter()
            .map(|a| ItemAddon {
                id: new_id(),
                item_id: item.id.clone(),
                addon_id: a.addon_id,
                name: a.name,
                price: a.price,
                quantity: a.quantity,
            })
            .collect();
        money::recompute_item(&mut item, &addons);

        let result = (|| -> EngineResult<()> {
            let txn = self.storage.begin_write()?;
            self.storage.store_item(&txn, &item)?;
            for addon in &addons {
                self.storage.store_addon(&txn, addon)?;
            }
            self.recompute_and_store(&txn, &mut draft)?;
            txn.commit().map_err(crate::storage::StorageError::from)?;
            Ok(())
        })();

        if let Err(err) = result {
            // Undo the claim so a failed write cannot leak availability
            if let Some(product_id) = item.product_id {
                self.stock.release(draft_id, product_id, item.quantity);
            }
            return Err(err);
        }
        Ok((draft, item))
    }

    /// Adjust quantity/price/note of an item
    ///
    /// A quantity change adjusts the reservation by the delta; if the
    /// tracker rejects it the whole operation fails with nothing changed.
    pub fn update_item(
        &self,
        draft_id: &str,
        item_id: &str,
        changes: ItemChanges,
    ) -> EngineResult<(DraftOrder, DraftItem)> {
        let mut draft = self.load_mutable(draft_id)?;

        // The item is read and rewritten under one transaction; the
        // reservation delta is the only side effect outside it and is rolled
        // back on any failure.
        let txn = self.storage.begin_write()?;
        let mut item = self
            .storage
            .get_item_txn(&txn, draft_id, item_id)?
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;

        let mut reserved_delta: i64 = 0;
        if let Some(new_qty) = changes.quantity {
            if new_qty <= 0 {
                return Err(EngineError::InvalidQuantity(new_qty));
            }
            let delta = new_qty - item.quantity;
            if let Some(product_id) = item.product_id
                && delta != 0
            {
                if delta > 0 {
                    self.stock.reserve(draft_id, product_id, delta)?;
                } else {
                    self.stock.release(draft_id, product_id, -delta);
                }
                reserved_delta = delta;
            }
            item.quantity = new_qty;
        }
        if let Some(price) = changes.unit_price {
            if !(price.is_finite() && price >= 0.0) {
                self.rollback_reservation(draft_id, item.product_id, reserved_delta);
                return Err(EngineError::InvalidAmount(price));
            }
            item.unit_price = price;
        }
        if let Some(note) = changes.note {
            item.note = Some(note);
        }
        if let Some(comp) = changes.is_complimentary {
            item.is_complimentary = comp;
        }

        let result = (|| -> EngineResult<DraftItem> {
            let addons = self.storage.get_addons_txn(&txn, &item.id)?;
            money::recompute_item(&mut item, &addons);
            self.storage.store_item(&txn, &item)?;
            self.recompute_and_store(&txn, &mut draft)?;
            txn.commit().map_err(crate::storage::StorageError::from)?;
            Ok(item.clone())
        })();

        match result {
            Ok(item) => Ok((draft, item)),
            Err(err) => {
                self.rollback_reservation(draft_id, item.product_id, reserved_delta);
                Err(err)
            }
        }
    }

    fn rollback_reservation(&self, draft_id: &str, product_id: Option<i64>, delta: i64) {
        let Some(product_id) = product_id else { return };
        if delta > 0 {
            self.stock.release(draft_id, product_id, delta);
        } else if delta < 0 {
            // The release already happened; put the claim back verbatim
            self.stock.restore_reservation(draft_id, product_id, -delta);
        }
    }

    /// Remove an item, releasing its full reservation
    pub fn remove_item(&self, draft_id: &str, item_id: &str) -> EngineResult<DraftOrder> {
        let mut draft = self.load_mutable(draft_id)?;

        let txn = self.storage.begin_write()?;
        let item = self
            .storage
            .get_item_txn(&txn, draft_id, item_id)?
            .ok_or_else(|| EngineError::ItemNotFound(item_id.to_string()))?;
        self.storage.remove_item(&txn, draft_id, item_id)?;
        self.recompute_and_store(&txn, &mut draft)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;

        // Release after the delete is durable; a crash in between leaves the
        // claim held, which a restart rebuild corrects (never oversells).
        if let Some(product_id) = item.product_id {
            self.stock.release(draft_id, product_id, item.quantity);
        }
        Ok(draft)
    }

    /// Delete all items and add-ons, release every reservation, zero totals
    pub fn clear(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        let mut draft = self.load_mutable(draft_id)?;

        let txn = self.storage.begin_write()?;
        for item in self.storage.get_items_txn(&txn, draft_id)? {
            self.storage.remove_item(&txn, draft_id, &item.id)?;
        }
        draft.discount = 0.0;
        draft.tax = 0.0;
        self.recompute_and_store(&txn, &mut draft)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;

        self.stock.release_all(draft_id);
        Ok(draft)
    }

    /// Park a draft: kept with its reservations, excluded from `ensure_draft`
    pub fn hold(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        let mut draft = self.load(draft_id)?;
        if draft.on_hold {
            return Ok(draft);
        }
        draft.on_hold = true;
        draft.updated_at = now_millis();

        let txn = self.storage.begin_write()?;
        self.storage.store_draft(&txn, &draft)?;
        self.storage.clear_active_draft(&txn, &draft.operator_id)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        Ok(draft)
    }

    /// Bring a held draft back as the operator's active draft
    ///
    /// Fails with `ActiveDraftExists` if another non-held draft occupies the
    /// operator's slot.
    pub fn resume(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        let mut draft = self.load(draft_id)?;
        if !draft.on_hold {
            return Ok(draft);
        }

        let txn = self.storage.begin_write()?;
        if let Some(active_id) = self.storage.get_active_draft_id_txn(&txn, &draft.operator_id)?
            && active_id != draft_id
        {
            return Err(EngineError::ActiveDraftExists(draft.operator_id.clone()));
        }
        draft.on_hold = false;
        draft.updated_at = now_millis();
        self.storage.store_draft(&txn, &draft)?;
        self.storage
            .set_active_draft(&txn, &draft.operator_id, draft_id)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        Ok(draft)
    }

    /// Delete the draft entirely (logout, explicit cancel, idle sweep)
    ///
    /// Releases all reservations and cascades to items and add-ons.
    /// Confirmation does not come through here; it cascades inside its own
    /// transaction after the claims are committed.
    pub fn discard(&self, draft_id: &str) -> EngineResult<DraftOrder> {
        let draft = self.load(draft_id)?;

        let txn = self.storage.begin_write()?;
        self.storage.remove_draft_cascade(&txn, &draft)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;

        self.stock.release_all(draft_id);
        tracing::info!(draft_id, operator_id = %draft.operator_id, "Draft discarded");
        Ok(draft)
    }

    /// Pre-select (or clear) the session the draft attaches to on confirmation
    pub fn set_session(
        &self,
        draft_id: &str,
        session_id: Option<String>,
    ) -> EngineResult<DraftOrder> {
        let mut draft = self.load_mutable(draft_id)?;
        draft.session_id = session_id;
        draft.updated_at = now_millis();

        let txn = self.storage.begin_write()?;
        self.storage.store_draft(&txn, &draft)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        Ok(draft)
    }

    /// Set the manual order-level discount
    pub fn set_discount(&self, draft_id: &str, discount: f64) -> EngineResult<DraftOrder> {
        let mut draft = self.load_mutable(draft_id)?;
        money::validate_discount(discount, draft.subtotal)?;
        draft.discount = discount;

        let txn = self.storage.begin_write()?;
        self.recompute_and_store(&txn, &mut draft)?;
        txn.commit().map_err(crate::storage::StorageError::from)?;
        Ok(draft)
    }

    /// Recompute header totals from the full current item set and persist
    ///
    /// Deterministic, never incrementally drifted: every mutation funnels
    /// through here within its own transaction.
    fn recompute_and_store(
        &self,
        txn: &WriteTransaction,
        draft: &mut DraftOrder,
    ) -> EngineResult<()> {
        let items = self.storage.get_items_txn(txn, &draft.id)?;
        let (subtotal, total) = money::recompute_draft_totals(&items, draft.discount, draft.tax);
        draft.subtotal = subtotal;
        draft.total = total;
        draft.updated_at = now_millis();
        self.storage.store_draft(txn, draft)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{AddonInput, Product};

    fn store_with_stock(products: &[Product]) -> DraftStore {
        let storage = StagingStorage::open_in_memory().unwrap();
        let stock = Arc::new(StockTracker::new());
        stock.initialize(products);
        DraftStore::new(storage, stock)
    }

    fn beer_input(quantity: i64) -> DraftItemInput {
        DraftItemInput {
            product_id: Some(1),
            name: "Beer".into(),
            quantity,
            unit_price: 3.5,
            is_vip_priced: false,
            is_complimentary: false,
            note: None,
            addons: vec![],
        }
    }

    #[test]
    fn ensure_draft_is_idempotent_per_operator() {
        let store = store_with_stock(&[]);
        let (first, created) = store.ensure_draft("op-1", None, None).unwrap();
        assert!(created);
        let (second, created) = store.ensure_draft("op-1", None, None).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        // Different operator gets a different draft
        let (other, created) = store.ensure_draft("op-2", None, None).unwrap();
        assert!(created);
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn add_item_reserves_and_recomputes() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();

        let (draft, item) = store.add_item(&draft.id, beer_input(4)).unwrap();
        assert_eq!(item.total, 14.0);
        assert_eq!(draft.subtotal, 14.0);
        assert_eq!(draft.total, 14.0);
        assert_eq!(store.stock.current_available(1), 6);
    }

    #[test]
    fn add_item_fails_cleanly_on_insufficient_stock() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 3)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();

        let err = store.add_item(&draft.id, beer_input(4)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));
        assert!(store.storage.get_items(&draft.id).unwrap().is_empty());
        assert_eq!(store.stock.current_available(1), 3);
    }

    #[test]
    fn update_item_quantity_adjusts_reservation_by_delta() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        let (_, item) = store.add_item(&draft.id, beer_input(4)).unwrap();

        // 4 -> 6 consumes two more units
        let changes = ItemChanges {
            quantity: Some(6),
            ..Default::default()
        };
        let (draft, item) = store.update_item(&draft.id, &item.id, changes).unwrap();
        assert_eq!(item.quantity, 6);
        assert_eq!(draft.total, 21.0);
        assert_eq!(store.stock.current_available(1), 4);

        // 6 -> 2 gives four back
        let changes = ItemChanges {
            quantity: Some(2),
            ..Default::default()
        };
        let (draft, _) = store.update_item(&draft.id, &item.id, changes).unwrap();
        assert_eq!(draft.total, 7.0);
        assert_eq!(store.stock.current_available(1), 8);
    }

    #[test]
    fn update_item_rejected_delta_changes_nothing() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 5)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        let (_, item) = store.add_item(&draft.id, beer_input(4)).unwrap();

        let changes = ItemChanges {
            quantity: Some(9),
            ..Default::default()
        };
        let err = store.update_item(&draft.id, &item.id, changes).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientStock { .. }));

        let unchanged = store.storage.get_item(&draft.id, &item.id).unwrap().unwrap();
        assert_eq!(unchanged.quantity, 4);
        assert_eq!(store.stock.current_available(1), 1);
    }

    #[test]
    fn mutations_on_a_missing_item_are_item_not_found() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        store.add_item(&draft.id, beer_input(2)).unwrap();

        let changes = ItemChanges {
            quantity: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            store.update_item(&draft.id, "missing", changes),
            Err(EngineError::ItemNotFound(_))
        ));
        assert!(matches!(
            store.remove_item(&draft.id, "missing"),
            Err(EngineError::ItemNotFound(_))
        ));
        // Nothing was reserved or released along the way
        assert_eq!(store.stock.current_available(1), 8);
    }

    #[test]
    fn set_session_survives_on_the_header() {
        let store = store_with_stock(&[]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        assert!(draft.session_id.is_none());

        let draft = store.set_session(&draft.id, Some("sess-1".into())).unwrap();
        assert_eq!(draft.session_id.as_deref(), Some("sess-1"));
        let loaded = store.load(&draft.id).unwrap();
        assert_eq!(loaded.session_id.as_deref(), Some("sess-1"));

        let draft = store.set_session(&draft.id, None).unwrap();
        assert!(draft.session_id.is_none());
    }

    #[test]
    fn remove_item_releases_full_reservation() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        let (_, item) = store.add_item(&draft.id, beer_input(4)).unwrap();

        let draft = store.remove_item(&draft.id, &item.id).unwrap();
        assert_eq!(draft.subtotal, 0.0);
        assert_eq!(draft.total, 0.0);
        assert_eq!(store.stock.current_available(1), 10);
    }

    #[test]
    fn clear_releases_everything_and_zeroes_totals() {
        let store = store_with_stock(&[
            Product::new(1, "Beer", 3.5, 10),
            Product::new(2, "Wine", 12.0, 4),
        ]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        store.add_item(&draft.id, beer_input(2)).unwrap();
        store
            .add_item(
                &draft.id,
                DraftItemInput {
                    product_id: Some(2),
                    name: "Wine".into(),
                    quantity: 1,
                    unit_price: 12.0,
                    is_vip_priced: false,
                    is_complimentary: false,
                    note: None,
                    addons: vec![],
                },
            )
            .unwrap();
        store.set_discount(&draft.id, 5.0).unwrap();

        let draft = store.clear(&draft.id).unwrap();
        assert_eq!(draft.subtotal, 0.0);
        assert_eq!(draft.discount, 0.0);
        assert_eq!(draft.total, 0.0);
        assert_eq!(store.stock.current_available(1), 10);
        assert_eq!(store.stock.current_available(2), 4);
    }

    #[test]
    fn hold_and_resume_toggle_the_active_slot() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        store.add_item(&draft.id, beer_input(2)).unwrap();

        let held = store.hold(&draft.id).unwrap();
        assert!(held.on_hold);
        // Held drafts keep their reservations
        assert_eq!(store.stock.current_available(1), 8);
        // Held drafts reject mutation
        assert!(matches!(
            store.add_item(&draft.id, beer_input(1)),
            Err(EngineError::DraftHeld(_))
        ));

        // ensure_draft now creates a fresh draft for the operator
        let (fresh, created) = store.ensure_draft("op-1", None, None).unwrap();
        assert!(created);
        assert_ne!(fresh.id, draft.id);

        // Can't resume while the fresh draft occupies the slot
        assert!(matches!(
            store.resume(&draft.id),
            Err(EngineError::ActiveDraftExists(_))
        ));

        store.discard(&fresh.id).unwrap();
        let resumed = store.resume(&draft.id).unwrap();
        assert!(!resumed.on_hold);
    }

    #[test]
    fn discard_releases_reservations_and_cascades() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        store
            .add_item(
                &draft.id,
                DraftItemInput {
                    addons: vec![AddonInput {
                        addon_id: 7,
                        name: "Lime".into(),
                        price: 0.5,
                        quantity: 2,
                    }],
                    ..beer_input(3)
                },
            )
            .unwrap();
        assert_eq!(store.stock.current_available(1), 7);

        store.discard(&draft.id).unwrap();
        assert!(matches!(
            store.load(&draft.id),
            Err(EngineError::DraftNotFound(_))
        ));
        assert_eq!(store.stock.current_available(1), 10);
    }

    #[test]
    fn totals_include_addons_and_manual_discount() {
        let store = store_with_stock(&[Product::new(1, "Beer", 3.5, 10)]);
        let (draft, _) = store.ensure_draft("op-1", None, None).unwrap();
        store
            .add_item(
                &draft.id,
                DraftItemInput {
                    addons: vec![AddonInput {
                        addon_id: 7,
                        name: "Lime".into(),
                        price: 0.5,
                        quantity: 1,
                    }],
                    ..beer_input(2)
                },
            )
            .unwrap();

        // 2 * 3.5 + 0.5 = 7.5
        let draft = store.set_discount(&draft.id, 2.5).unwrap();
        assert_eq!(draft.subtotal, 7.5);
        assert_eq!(draft.total, 5.0);

        // Discount above subtotal is rejected
        assert!(matches!(
            store.set_discount(&draft.id, 100.0),
            Err(EngineError::InvalidAmount(_))
        ));
    }
}
