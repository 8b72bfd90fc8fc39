//! Stock Reservation Tracker
//!
//! Server-owned, holder-keyed reservation ledger. Each draft holds its own
//! tentative claims against shared stock; claims are summed globally for
//! availability checks. Reservation is deliberately optimistic: the catalog
//! is never locked while a cart is being built, and oversell is prevented at
//! the two points that matter - reserve and commit.
//!
//! Holders are draft ids, so a held draft keeps its reservations and a
//! discard releases exactly what that draft claimed.
//!
//! # Invariants
//!
//! - `sum(reservations for product) <= durable stock` (enforced at reserve)
//! - release floors at zero and is idempotent; a double release never
//!   under-reports availability
//! - commit is all-or-nothing: on a mid-flight catalog conflict, already
//!   applied decrements are compensated and the ledger is left untouched

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use shared::models::Product;

use crate::catalog::{Catalog, CatalogError};
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Default)]
struct ProductStock {
    /// Durable count as last seen from the catalog
    durable: i64,
    /// holder (draft id) -> reserved quantity
    reservations: HashMap<String, i64>,
}

impl ProductStock {
    fn reserved_total(&self) -> i64 {
        self.reservations.values().sum()
    }

    fn available(&self) -> i64 {
        (self.durable - self.reserved_total()).max(0)
    }
}

/// Holder-keyed stock reservation ledger
///
/// Per-product mutations are serialized by the ledger map entry; unrelated
/// products proceed fully in parallel.
#[derive(Default)]
pub struct StockTracker {
    ledger: DashMap<i64, ProductStock>,
}

impl StockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or refresh the tracker's view of durable stock counts
    ///
    /// Idempotent; existing reservations are preserved on re-seed.
    pub fn initialize(&self, products: &[Product]) {
        for product in products {
            self.ledger
                .entry(product.id)
                .and_modify(|entry| entry.durable = product.stock)
                .or_insert_with(|| ProductStock {
                    durable: product.stock,
                    reservations: HashMap::new(),
                });
        }
        tracing::debug!(products = products.len(), "Stock tracker seeded");
    }

    /// True iff `qty` more units of the product can be reserved right now
    pub fn has_stock(&self, product_id: i64, qty: i64) -> bool {
        self.ledger
            .get(&product_id)
            .map(|entry| entry.available() >= qty)
            .unwrap_or(false)
    }

    /// Durable stock minus aggregate reservations, for display; never negative
    pub fn current_available(&self, product_id: i64) -> i64 {
        self.ledger
            .get(&product_id)
            .map(|entry| entry.available())
            .unwrap_or(0)
    }

    /// Atomically reserve `qty` units for `holder`
    ///
    /// Increments the holder's claim iff availability covers it; otherwise
    /// fails with `InsufficientStock` and changes nothing.
    pub fn reserve(&self, holder: &str, product_id: i64, qty: i64) -> EngineResult<()> {
        if qty <= 0 {
            return Err(EngineError::InvalidQuantity(qty));
        }
        let mut entry = self
            .ledger
            .get_mut(&product_id)
            .ok_or(EngineError::ProductNotFound(product_id))?;

        let available = entry.available();
        if available < qty {
            return Err(EngineError::InsufficientStock {
                product_id,
                requested: qty,
                available,
            });
        }
        *entry.reservations.entry(holder.to_string()).or_insert(0) += qty;
        Ok(())
    }

    /// Release up to `qty` units of the holder's claim
    ///
    /// Floors at zero and never errors: releasing more than held (or a
    /// product never reserved) is a no-op, so a retried release cannot
    /// double-credit availability.
    pub fn release(&self, holder: &str, product_id: i64, qty: i64) {
        let Some(mut entry) = self.ledger.get_mut(&product_id) else {
            tracing::debug!(product_id, holder, "Release on unknown product ignored");
            return;
        };
        if let Some(held) = entry.reservations.get_mut(holder) {
            *held -= qty.max(0);
            if *held <= 0 {
                entry.reservations.remove(holder);
            }
        }
    }

    /// Release every reservation held by `holder`, returning what was freed
    pub fn release_all(&self, holder: &str) -> Vec<(i64, i64)> {
        let mut released = Vec::new();
        for mut entry in self.ledger.iter_mut() {
            if let Some(qty) = entry.reservations.remove(holder) {
                released.push((*entry.key(), qty));
            }
        }
        released
    }

    /// Current claims held by `holder`
    pub fn reserved_for(&self, holder: &str) -> Vec<(i64, i64)> {
        self.ledger
            .iter()
            .filter_map(|entry| {
                entry
                    .reservations
                    .get(holder)
                    .map(|qty| (*entry.key(), *qty))
            })
            .collect()
    }

    /// Re-add a claim without an availability check
    ///
    /// Startup-only: rebuilds the ledger from drafts that survived a restart.
    /// A claim that no longer fits durable stock is kept and logged; it will
    /// surface as `StockConflict` at commit.
    pub fn restore_reservation(&self, holder: &str, product_id: i64, qty: i64) {
        let mut entry = self.ledger.entry(product_id).or_default();
        *entry.reservations.entry(holder.to_string()).or_insert(0) += qty;
        if entry.reserved_total() > entry.durable {
            tracing::warn!(
                product_id,
                holder,
                reserved = entry.reserved_total(),
                durable = entry.durable,
                "Restored reservations exceed durable stock"
            );
        }
    }

    /// Convert every claim held by `holder` into a durable stock decrement
    ///
    /// Called exactly once, at order confirmation, while the caller holds the
    /// draft's mutation lock (so the holder's claims cannot change under us).
    /// All-or-nothing: a mid-flight catalog conflict rolls back the already
    /// applied decrements and surfaces `StockConflict` with the ledger and
    /// durable stock unchanged.
    pub async fn commit(&self, holder: &str, catalog: &Arc<dyn Catalog>) -> EngineResult<()> {
        let holdings = self.reserved_for(holder);
        if holdings.is_empty() {
            return Ok(());
        }

        let mut applied: Vec<(i64, i64)> = Vec::with_capacity(holdings.len());
        for &(product_id, qty) in &holdings {
            match catalog.decrement_stock(product_id, qty).await {
                Ok(()) => applied.push((product_id, qty)),
                Err(err) => {
                    tracing::warn!(
                        product_id,
                        qty,
                        holder,
                        error = %err,
                        "Commit decrement failed, compensating"
                    );
                    for &(pid, restored_qty) in &applied {
                        if let Err(e) = catalog.restore_stock(pid, restored_qty).await {
                            tracing::error!(product_id = pid, error = %e, "Compensation failed");
                        }
                    }
                    return Err(match err {
                        CatalogError::Conflict(id) => EngineError::StockConflict(id),
                        CatalogError::NotFound(id) => EngineError::ProductNotFound(id),
                        CatalogError::Unavailable(_) => EngineError::StockConflict(product_id),
                    });
                }
            }
        }

        // Durable decrements succeeded; clear the claims and mirror the new
        // durable counts locally.
        for (product_id, qty) in holdings {
            if let Some(mut entry) = self.ledger.get_mut(&product_id) {
                entry.reservations.remove(holder);
                entry.durable -= qty;
            }
        }
        tracing::debug!(holder, "Reservations committed to durable stock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    fn tracker_with(product_id: i64, stock: i64) -> StockTracker {
        let tracker = StockTracker::new();
        tracker.initialize(&[Product::new(product_id, "P", 1.0, stock)]);
        tracker
    }

    #[test]
    fn reserve_then_release_conserves_availability() {
        let tracker = tracker_with(1, 10);
        tracker.reserve("d1", 1, 4).unwrap();
        tracker.reserve("d2", 1, 3).unwrap();
        assert_eq!(tracker.current_available(1), 3);

        tracker.release("d1", 1, 4);
        tracker.release("d2", 1, 3);
        assert_eq!(tracker.current_available(1), 10);
    }

    #[test]
    fn reserve_fails_without_state_change() {
        let tracker = tracker_with(1, 5);
        tracker.reserve("d1", 1, 3).unwrap();

        let err = tracker.reserve("d2", 1, 3).unwrap_err();
        match err {
            EngineError::InsufficientStock {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failed reserve must not consume anything
        assert_eq!(tracker.current_available(1), 2);
        tracker.reserve("d2", 1, 2).unwrap();
        assert_eq!(tracker.current_available(1), 0);
    }

    #[test]
    fn two_terminals_share_the_last_units() {
        // stock 5: A reserves 3, B fails at 3, B reserves 2, A releases 1
        let tracker = tracker_with(7, 5);
        assert!(tracker.has_stock(7, 3));
        tracker.reserve("a", 7, 3).unwrap();
        assert!(tracker.reserve("b", 7, 3).is_err());
        tracker.reserve("b", 7, 2).unwrap();
        tracker.release("a", 7, 1);
        assert_eq!(tracker.current_available(7), 1);
    }

    #[test]
    fn double_release_does_not_double_credit() {
        let tracker = tracker_with(1, 5);
        tracker.reserve("d1", 1, 2).unwrap();
        tracker.release("d1", 1, 2);
        tracker.release("d1", 1, 2);
        assert_eq!(tracker.current_available(1), 5);
        // A release can never push availability past durable stock
        tracker.release("other", 1, 99);
        assert_eq!(tracker.current_available(1), 5);
    }

    #[test]
    fn reserve_on_unknown_product_fails() {
        let tracker = StockTracker::new();
        assert!(matches!(
            tracker.reserve("d1", 42, 1),
            Err(EngineError::ProductNotFound(42))
        ));
        assert!(!tracker.has_stock(42, 1));
    }

    #[test]
    fn reseed_preserves_reservations() {
        let tracker = tracker_with(1, 5);
        tracker.reserve("d1", 1, 2).unwrap();
        tracker.initialize(&[Product::new(1, "P", 1.0, 8)]);
        assert_eq!(tracker.current_available(1), 6);
        assert_eq!(tracker.reserved_for("d1"), vec![(1, 2)]);
    }

    #[test]
    fn no_oversell_under_concurrent_reserves() {
        let tracker = Arc::new(tracker_with(1, 50));
        let mut handles = Vec::new();
        for t in 0..10 {
            let tracker = Arc::clone(&tracker);
            handles.push(std::thread::spawn(move || {
                let mut won = 0;
                for _ in 0..10 {
                    if tracker.reserve(&format!("terminal-{t}"), 1, 1).is_ok() {
                        won += 1;
                    }
                }
                won
            }));
        }
        let total: i64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 100 attempts against 50 units: exactly 50 wins, nothing negative
        assert_eq!(total, 50);
        assert_eq!(tracker.current_available(1), 0);
    }

    #[tokio::test]
    async fn commit_decrements_durable_and_clears_claims() {
        let catalog: Arc<dyn Catalog> =
            Arc::new(MemoryCatalog::with_products([Product::new(1, "P", 1.0, 5)]));
        let tracker = tracker_with(1, 5);
        tracker.reserve("d1", 1, 3).unwrap();

        tracker.commit("d1", &catalog).await.unwrap();
        assert!(tracker.reserved_for("d1").is_empty());
        // durable dropped, availability reflects it
        assert_eq!(tracker.current_available(1), 2);
    }

    #[tokio::test]
    async fn failed_commit_is_all_or_nothing() {
        // Catalog only has 1 unit of product 2; the tracker (seeded earlier,
        // then diverged by an external adjustment) thinks there are 3.
        let memory = MemoryCatalog::with_products([
            Product::new(1, "A", 1.0, 5),
            Product::new(2, "B", 1.0, 1),
        ]);
        let catalog: Arc<dyn Catalog> = Arc::new(memory);

        let tracker = StockTracker::new();
        tracker.initialize(&[Product::new(1, "A", 1.0, 5), Product::new(2, "B", 1.0, 3)]);
        tracker.reserve("d1", 1, 2).unwrap();
        tracker.reserve("d1", 2, 3).unwrap();

        let err = tracker.commit("d1", &catalog).await.unwrap_err();
        assert!(matches!(err, EngineError::StockConflict(2)));

        // Ledger untouched, durable stock compensated back
        assert_eq!(tracker.reserved_for("d1").len(), 2);
        let snapshot = catalog.get_product(1).await.unwrap().unwrap();
        assert_eq!(snapshot.stock, 5);
    }

    #[test]
    fn restore_rebuilds_claims_without_check() {
        let tracker = tracker_with(1, 2);
        tracker.restore_reservation("d1", 1, 5);
        assert_eq!(tracker.reserved_for("d1"), vec![(1, 5)]);
        assert_eq!(tracker.current_available(1), 0);
    }
}
