//! Staging engine facade
//!
//! Single entry point for terminals: every request passes the access guard,
//! takes the owning entity's mutation lock, mutates storage and the stock
//! tracker, and publishes the post-mutation snapshot on the change bus.
//!
//! # Lock discipline
//!
//! One in-flight mutation per draft id, per operator (draft creation) and
//! per session id; unrelated entities proceed fully in parallel. Cross-entity
//! operations acquire locks in a fixed order, draft before session, and the
//! stock tracker serializes per product internally, so no lock cycle exists.

use std::sync::Arc;

use dashmap::DashMap;
use shared::event::{ChangeKind, ChangePayload, DraftTotals, SessionTotals, Topic};
use shared::models::{
    DraftItem, DraftItemInput, DraftOrder, ItemChanges, Order, OrderSession, OrderStatus,
};
use shared::util::{new_id, now_millis};
use tokio::sync::Mutex;

use crate::bus::ChangeBus;
use crate::catalog::{Catalog, CatalogError};
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::drafts::{DraftDetail, DraftStore};
use crate::error::{EngineError, EngineResult};
use crate::guard::{AccessGuard, Action};
use crate::sessions::{SessionAggregator, SessionDetail};
use crate::stock::StockTracker;
use crate::storage::{StagingStorage, StorageError};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

fn lock_for(map: &LockMap, key: &str) -> Arc<Mutex<()>> {
    map.entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

fn catalog_err(err: CatalogError) -> EngineError {
    match err {
        CatalogError::NotFound(id) => EngineError::ProductNotFound(id),
        CatalogError::Conflict(id) => EngineError::StockConflict(id),
        CatalogError::Unavailable(msg) => EngineError::CatalogUnavailable(msg),
    }
}

/// Order-staging and stock-reservation engine
pub struct StagingEngine {
    config: EngineConfig,
    storage: StagingStorage,
    guard: AccessGuard,
    catalog: Arc<dyn Catalog>,
    stock: Arc<StockTracker>,
    drafts: DraftStore,
    sessions: SessionAggregator,
    bus: ChangeBus,
    draft_locks: LockMap,
    operator_locks: LockMap,
    session_locks: LockMap,
}

impl StagingEngine {
    /// Open (or create) the engine database under the configured work dir
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn Catalog>,
        directory: Arc<dyn UserDirectory>,
    ) -> EngineResult<Self> {
        let storage = StagingStorage::open(config.db_path())?;
        Ok(Self::with_storage(config, storage, catalog, directory))
    }

    /// Build on an already-open storage (tests, ephemeral deployments)
    pub fn with_storage(
        config: EngineConfig,
        storage: StagingStorage,
        catalog: Arc<dyn Catalog>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        let stock = Arc::new(StockTracker::new());
        let drafts = DraftStore::new(storage.clone(), Arc::clone(&stock));
        let sessions = SessionAggregator::new(storage.clone());
        let bus = ChangeBus::new(config.bus_capacity);
        Self {
            config,
            storage,
            guard: AccessGuard::new(directory),
            catalog,
            stock,
            drafts,
            sessions,
            bus,
            draft_locks: DashMap::new(),
            operator_locks: DashMap::new(),
            session_locks: DashMap::new(),
        }
    }

    /// Seed the stock tracker from the catalog and rebuild reservations from
    /// drafts that survived a restart
    ///
    /// Restored claims are re-added unchecked; one that no longer fits
    /// durable stock surfaces as `StockConflict` at that draft's commit.
    pub async fn initialize(&self) -> EngineResult<()> {
        let products = self.catalog.get_products().await.map_err(catalog_err)?;
        self.stock.initialize(&products);

        let drafts = self.storage.get_all_drafts()?;
        let mut restored = 0usize;
        for draft in &drafts {
            for item in self.storage.get_items(&draft.id)? {
                if let Some(product_id) = item.product_id {
                    self.stock
                        .restore_reservation(&draft.id, product_id, item.quantity);
                    restored += 1;
                }
            }
        }
        tracing::info!(
            products = products.len(),
            drafts = drafts.len(),
            restored_claims = restored,
            "Engine initialized"
        );
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========== Drafts ==========

    /// Return the operator's active draft, creating one if none exists
    ///
    /// Idempotent: two terminals racing on the same operator id observe the
    /// same draft.
    pub async fn ensure_draft(
        &self,
        operator_id: &str,
        customer_id: Option<String>,
        table_id: Option<String>,
    ) -> EngineResult<DraftOrder> {
        self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.operator_locks, operator_id);
        let _held = lock.lock().await;

        let (draft, created) = self.drafts.ensure_draft(operator_id, customer_id, table_id)?;
        if created {
            self.publish_draft(ChangeKind::Created, &draft, 0);
        }
        Ok(draft)
    }

    /// Full detail of an operator's active draft
    ///
    /// Any operator sees their own draft; manager roles see everyone's.
    pub async fn get_draft(&self, viewer_id: &str, operator_id: &str) -> EngineResult<DraftDetail> {
        self.guard
            .authorize(
                viewer_id,
                &Action::ViewDraft {
                    owner_id: operator_id.to_string(),
                },
            )
            .await?;
        let draft_id = self
            .storage
            .get_active_draft_id(operator_id)?
            .ok_or_else(|| EngineError::NoActiveDraft(operator_id.to_string()))?;
        self.drafts.detail(&draft_id)
    }

    /// Add an item to a draft, reserving stock for product-backed lines
    ///
    /// Lines flagged VIP-priced take their unit price from the catalog's
    /// member price, never from the terminal.
    pub async fn add_item(
        &self,
        operator_id: &str,
        draft_id: &str,
        mut input: DraftItemInput,
    ) -> EngineResult<DraftItem> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        if input.is_vip_priced && let Some(product_id) = input.product_id {
            let product = self
                .catalog
                .get_product(product_id)
                .await
                .map_err(catalog_err)?
                .ok_or(EngineError::ProductNotFound(product_id))?;
            input.unit_price = product.price_for(true);
        }

        let (draft, item) = self.drafts.add_item(draft_id, input)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(item)
    }

    /// Update quantity/price/note of a draft item
    pub async fn update_item(
        &self,
        operator_id: &str,
        draft_id: &str,
        item_id: &str,
        changes: ItemChanges,
    ) -> EngineResult<DraftItem> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let (draft, item) = self.drafts.update_item(draft_id, item_id, changes)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(item)
    }

    /// Remove an item, releasing its reservation
    pub async fn remove_item(
        &self,
        operator_id: &str,
        draft_id: &str,
        item_id: &str,
    ) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.remove_item(draft_id, item_id)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(draft)
    }

    /// Remove every item and reset discounts, keeping the draft itself
    pub async fn clear_draft(&self, operator_id: &str, draft_id: &str) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.clear(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, 0);
        Ok(draft)
    }

    /// Pre-select the session the draft will attach to on confirmation
    ///
    /// `confirm` falls back to this when called without an explicit session.
    /// Only an open session can be pre-selected; `None` clears the choice.
    pub async fn assign_draft_session(
        &self,
        operator_id: &str,
        draft_id: &str,
        session_id: Option<String>,
    ) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        if let Some(sid) = &session_id {
            let session = self.sessions.load(sid)?;
            if session.status != shared::models::SessionStatus::Open {
                return Err(EngineError::SessionClosed(sid.clone()));
            }
        }

        let draft = self.drafts.set_session(draft_id, session_id)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(draft)
    }

    /// Set the manual order-level discount
    pub async fn set_discount(
        &self,
        operator_id: &str,
        draft_id: &str,
        discount: f64,
    ) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.set_discount(draft_id, discount)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(draft)
    }

    /// Park the draft; reservations stay held, the operator's slot frees up
    pub async fn hold_draft(&self, operator_id: &str, draft_id: &str) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.hold(draft_id)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(draft)
    }

    /// Bring a held draft back as the operator's active draft
    pub async fn resume_draft(&self, operator_id: &str, draft_id: &str) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        // Resume races with ensure_draft on the operator slot
        let op_lock = lock_for(&self.operator_locks, operator_id);
        let _op_held = op_lock.lock().await;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.resume(draft_id)?;
        let count = self.drafts.item_count(draft_id)?;
        self.publish_draft(ChangeKind::Updated, &draft, count);
        Ok(draft)
    }

    /// Delete a draft outright, releasing every reservation it held
    pub async fn discard_draft(&self, operator_id: &str, draft_id: &str) -> EngineResult<DraftOrder> {
        let operator = self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let lock = lock_for(&self.draft_locks, draft_id);
        let _held = lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let draft = self.drafts.discard(draft_id)?;
        self.publish_draft(ChangeKind::Deleted, &draft, 0);
        drop(_held);
        self.draft_locks.remove(draft_id);
        Ok(draft)
    }

    fn check_draft_ownership(
        &self,
        draft_id: &str,
        operator_id: &str,
        can_view_all: bool,
    ) -> EngineResult<()> {
        let draft = self.drafts.load(draft_id)?;
        if draft.operator_id != operator_id && !can_view_all {
            // Rows outside the caller's visibility read as absent
            return Err(EngineError::DraftNotFound(draft_id.to_string()));
        }
        Ok(())
    }

    // ========== Confirmation ==========

    /// Confirm a draft into a durable order, optionally attaching it to a
    /// session
    ///
    /// Sequence: commit the draft's reservations against the catalog
    /// (all-or-nothing), then in one write transaction freeze the items into
    /// an `Order`, attach it to the session and recompute the aggregate, and
    /// cascade-delete the draft. The receipt number is drawn before any of
    /// this so the counter transaction never nests inside the main one.
    pub async fn confirm(
        &self,
        operator_id: &str,
        draft_id: &str,
        session_id: Option<String>,
    ) -> EngineResult<Order> {
        let operator = self.guard.authorize(operator_id, &Action::ConfirmOrder).await?;
        let draft_lock = lock_for(&self.draft_locks, draft_id);
        let _draft_held = draft_lock.lock().await;
        self.check_draft_ownership(draft_id, operator_id, operator.role.can_view_all_drafts())?;

        let detail = self.drafts.detail(draft_id)?;
        let draft = detail.draft;
        if detail.items.is_empty() {
            return Err(EngineError::EmptyDraft(draft_id.to_string()));
        }
        let target_session = session_id.or_else(|| draft.session_id.clone());
        // Session lock is always taken after the draft lock
        let _session_held = match &target_session {
            Some(sid) => {
                let lock = lock_for(&self.session_locks, sid);
                Some(lock.lock_owned().await)
            }
            None => None,
        };
        // Validate the session before touching stock
        if let Some(sid) = &target_session {
            let session = self.sessions.load(sid)?;
            if session.status != shared::models::SessionStatus::Open {
                return Err(EngineError::SessionClosed(sid.clone()));
            }
        }

        let receipt_number = self.next_receipt_number()?;
        let holdings = self.stock.reserved_for(draft_id);
        self.stock.commit(draft_id, &self.catalog).await?;

        let order = Order {
            id: new_id(),
            session_id: target_session.clone(),
            operator_id: draft.operator_id.clone(),
            status: OrderStatus::Confirmed,
            items: detail.items.iter().map(|(item, _)| item.clone()).collect(),
            subtotal: draft.subtotal,
            discount: draft.discount,
            tax: draft.tax,
            total: draft.total,
            receipt_number,
            confirmed_at: now_millis(),
        };

        let persisted: EngineResult<Option<OrderSession>> = (|| {
            let txn = self.storage.begin_write()?;
            self.storage.store_order(&txn, &order)?;
            let session = match &target_session {
                Some(sid) => Some(self.sessions.attach_txn(&txn, sid, &order)?),
                None => None,
            };
            self.storage.remove_draft_cascade(&txn, &draft)?;
            txn.commit().map_err(StorageError::from)?;
            Ok(session)
        })();

        let session = match persisted {
            Ok(session) => session,
            Err(err) => {
                // Stock is already durably decremented; put it back and
                // rebuild the claims so a retry starts from the same state.
                tracing::error!(draft_id, error = %err, "Confirm persistence failed, compensating stock");
                for &(product_id, qty) in &holdings {
                    if let Err(e) = self.catalog.restore_stock(product_id, qty).await {
                        tracing::error!(product_id, qty, error = %e, "Stock compensation failed");
                    }
                    self.stock.restore_reservation(draft_id, product_id, qty);
                }
                let products = self.catalog.get_products().await.map_err(catalog_err)?;
                self.stock.initialize(&products);
                return Err(err);
            }
        };

        tracing::info!(
            order_id = %order.id,
            draft_id,
            receipt = %order.receipt_number,
            total = order.total,
            "Order confirmed"
        );
        self.publish_draft(ChangeKind::Deleted, &draft, 0);
        if let Some(session) = &session {
            let count = self.sessions.order_count(&session.id)?;
            self.publish_session(ChangeKind::Updated, session, count);
        }
        drop(_draft_held);
        self.draft_locks.remove(draft_id);
        Ok(order)
    }

    /// Receipt number: `FAC` + date + daily-unique suffix
    fn next_receipt_number(&self) -> EngineResult<String> {
        let count = self.storage.next_order_count()?;
        let date = chrono::Utc::now().format("%Y%m%d");
        Ok(format!("FAC{date}{}", 10_000 + count))
    }

    /// Look up a confirmed order
    pub async fn get_order(&self, viewer_id: &str, order_id: &str) -> EngineResult<Order> {
        self.guard.authorize(viewer_id, &Action::ViewSession).await?;
        self.storage
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))
    }

    // ========== Sessions ==========

    /// Open a new table session
    pub async fn open_session(&self, operator_id: &str, table_id: &str) -> EngineResult<OrderSession> {
        self.guard.authorize(operator_id, &Action::MutateDraft).await?;
        let session = self.sessions.open(table_id)?;
        self.publish_session(ChangeKind::Created, &session, 0);
        Ok(session)
    }

    /// Session with all attached orders
    pub async fn get_session(&self, viewer_id: &str, session_id: &str) -> EngineResult<SessionDetail> {
        self.guard.authorize(viewer_id, &Action::ViewSession).await?;
        self.sessions.detail(session_id)
    }

    /// Attach an already-confirmed, session-less order to an open session
    pub async fn attach_order(
        &self,
        operator_id: &str,
        session_id: &str,
        order_id: &str,
    ) -> EngineResult<OrderSession> {
        self.guard.authorize(operator_id, &Action::ConfirmOrder).await?;
        let lock = lock_for(&self.session_locks, session_id);
        let _held = lock.lock().await;

        let mut order = self
            .storage
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if order.session_id.is_some() {
            return Err(EngineError::OrderNotFound(order_id.to_string()));
        }
        order.session_id = Some(session_id.to_string());

        let txn = self.storage.begin_write()?;
        self.storage.store_order(&txn, &order)?;
        let session = self.sessions.attach_txn(&txn, session_id, &order)?;
        txn.commit().map_err(StorageError::from)?;

        let count = self.sessions.order_count(session_id)?;
        self.publish_session(ChangeKind::Updated, &session, count);
        Ok(session)
    }

    /// Mark an order settled; the owning session's aggregate is recomputed
    pub async fn complete_order(&self, operator_id: &str, order_id: &str) -> EngineResult<Order> {
        self.guard.authorize(operator_id, &Action::SettleSession).await?;
        let (order, session) = self.with_order_session_lock(order_id, |s| s.complete_order(order_id)).await?;
        self.publish_session_if(session).await?;
        Ok(order)
    }

    /// Void an order, removing it from its session's aggregate
    pub async fn void_order(&self, operator_id: &str, order_id: &str) -> EngineResult<Order> {
        self.guard.authorize(operator_id, &Action::SettleSession).await?;
        let (order, session) = self.with_order_session_lock(order_id, |s| s.void_order(order_id)).await?;
        self.publish_session_if(session).await?;
        Ok(order)
    }

    async fn with_order_session_lock<F>(
        &self,
        order_id: &str,
        op: F,
    ) -> EngineResult<(Order, Option<OrderSession>)>
    where
        F: FnOnce(&SessionAggregator) -> EngineResult<(Order, Option<OrderSession>)>,
    {
        let existing = self
            .storage
            .get_order(order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        let _held = match &existing.session_id {
            Some(sid) => {
                let lock = lock_for(&self.session_locks, sid);
                Some(lock.lock_owned().await)
            }
            None => None,
        };
        op(&self.sessions)
    }

    async fn publish_session_if(&self, session: Option<OrderSession>) -> EngineResult<()> {
        if let Some(session) = session {
            let count = self.sessions.order_count(&session.id)?;
            self.publish_session(ChangeKind::Updated, &session, count);
        }
        Ok(())
    }

    /// Step an open session into settlement; new attachments are rejected
    pub async fn begin_settlement(
        &self,
        operator_id: &str,
        session_id: &str,
    ) -> EngineResult<OrderSession> {
        self.guard.authorize(operator_id, &Action::SettleSession).await?;
        let lock = lock_for(&self.session_locks, session_id);
        let _held = lock.lock().await;

        let session = self.sessions.begin_settlement(session_id)?;
        let count = self.sessions.order_count(session_id)?;
        self.publish_session(ChangeKind::Updated, &session, count);
        Ok(session)
    }

    /// Close a session; requires every attached order to be terminal
    pub async fn close_session(
        &self,
        operator_id: &str,
        session_id: &str,
    ) -> EngineResult<OrderSession> {
        self.guard.authorize(operator_id, &Action::SettleSession).await?;
        let lock = lock_for(&self.session_locks, session_id);
        let _held = lock.lock().await;

        let session = self.sessions.close(session_id)?;
        let count = self.sessions.order_count(session_id)?;
        self.publish_session(ChangeKind::Updated, &session, count);
        drop(_held);
        self.session_locks.remove(session_id);
        Ok(session)
    }

    /// Abandon an open session (explicit void)
    pub async fn abandon_session(
        &self,
        operator_id: &str,
        session_id: &str,
    ) -> EngineResult<OrderSession> {
        self.guard.authorize(operator_id, &Action::SettleSession).await?;
        let lock = lock_for(&self.session_locks, session_id);
        let _held = lock.lock().await;

        let session = self.sessions.abandon(session_id)?;
        let count = self.sessions.order_count(session_id)?;
        self.publish_session(ChangeKind::Updated, &session, count);
        drop(_held);
        self.session_locks.remove(session_id);
        Ok(session)
    }

    // ========== Stock reads ==========

    /// Availability hint for terminals: durable stock minus reservations
    pub fn available_stock(&self, product_id: i64) -> i64 {
        self.stock.current_available(product_id)
    }

    pub fn has_stock(&self, product_id: i64, qty: i64) -> bool {
        self.stock.has_stock(product_id, qty)
    }

    // ========== Bus ==========

    /// Subscribe to one topic's change events
    pub fn subscribe(&self, topic: Topic) -> crate::bus::Subscription {
        self.bus.subscribe(topic)
    }

    /// Subscribe to every change event (station displays)
    pub fn subscribe_all(&self) -> crate::bus::Subscription {
        self.bus.subscribe_all()
    }

    fn publish_draft(&self, kind: ChangeKind, draft: &DraftOrder, item_count: usize) {
        self.bus.publish(
            Topic::draft(draft.operator_id.clone()),
            kind,
            ChangePayload::Draft(DraftTotals {
                draft_id: draft.id.clone(),
                operator_id: draft.operator_id.clone(),
                subtotal: draft.subtotal,
                discount: draft.discount,
                tax: draft.tax,
                total: draft.total,
                item_count,
                on_hold: draft.on_hold,
            }),
        );
    }

    fn publish_session(&self, kind: ChangeKind, session: &OrderSession, order_count: usize) {
        self.bus.publish(
            Topic::session(session.id.clone()),
            kind,
            ChangePayload::Session(SessionTotals {
                session_id: session.id.clone(),
                status: session.status,
                total: session.total,
                order_count,
            }),
        );
    }

    // ========== Idle sweeps ==========

    /// Discard drafts idle beyond the configured window, releasing stock
    ///
    /// Held drafts are swept too; their reservations would otherwise pin
    /// shared stock indefinitely.
    pub async fn sweep_idle_drafts(&self) -> EngineResult<usize> {
        let cutoff = now_millis() - self.config.draft_idle_ms;
        let stale: Vec<DraftOrder> = self
            .storage
            .get_all_drafts()?
            .into_iter()
            .filter(|d| d.updated_at < cutoff)
            .collect();

        let mut swept = 0;
        for draft in stale {
            let lock = lock_for(&self.draft_locks, &draft.id);
            let _held = lock.lock().await;
            // Re-check under the lock; a mutation may have landed meanwhile
            match self.drafts.load(&draft.id) {
                Ok(current) if current.updated_at < cutoff => {
                    let discarded = self.drafts.discard(&draft.id)?;
                    self.publish_draft(ChangeKind::Deleted, &discarded, 0);
                    swept += 1;
                }
                _ => {}
            }
            drop(_held);
            self.draft_locks.remove(&draft.id);
        }
        if swept > 0 {
            tracing::info!(swept, "Idle drafts discarded");
        }
        Ok(swept)
    }

    /// Abandon open sessions idle beyond the configured window
    pub async fn sweep_idle_sessions(&self) -> EngineResult<usize> {
        let stale = self.sessions.idle_open_sessions(self.config.session_idle_ms)?;
        let mut swept = 0;
        for session in stale {
            let lock = lock_for(&self.session_locks, &session.id);
            let _held = lock.lock().await;
            match self.sessions.abandon(&session.id) {
                Ok(abandoned) => {
                    let count = self.sessions.order_count(&abandoned.id)?;
                    self.publish_session(ChangeKind::Updated, &abandoned, count);
                    swept += 1;
                }
                // Lost the race to a close; nothing to do
                Err(EngineError::SessionClosed(_)) => {}
                Err(err) => return Err(err),
            }
            drop(_held);
            self.session_locks.remove(&session.id);
        }
        if swept > 0 {
            tracing::info!(swept, "Idle sessions abandoned");
        }
        Ok(swept)
    }
}
