//! redb-based storage layer for drafts, sessions and confirmed orders
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `drafts` | `draft_id` | `DraftOrder` | Draft headers |
//! | `draft_items` | `(draft_id, item_id)` | `DraftItem` | Line items |
//! | `item_addons` | `(item_id, addon_id)` | `ItemAddon` | Item add-ons |
//! | `active_drafts` | `operator_id` | `draft_id` | Non-held draft index |
//! | `sessions` | `session_id` | `OrderSession` | Tabs |
//! | `orders` | `order_id` | `Order` | Confirmed orders |
//! | `session_orders` | `(session_id, order_id)` | `()` | Attachment index |
//! | `counters` | name | `u64` | Receipt/session counters |
//!
//! Parent totals columns are pure functions of their children and are only
//! written by a recompute pass; cascade deletes are explicit and happen
//! inside one write transaction.
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`: copy-on-write with an atomic
//! pointer swap, so the database file is always in a consistent state even
//! across power loss on till hardware.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use shared::models::{DraftItem, DraftOrder, ItemAddon, Order, OrderSession};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Draft headers: key = draft_id, value = JSON-serialized DraftOrder
const DRAFTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("drafts");

/// Line items: key = (draft_id, item_id), value = JSON-serialized DraftItem
const DRAFT_ITEMS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("draft_items");

/// Item add-ons: key = (item_id, addon_id), value = JSON-serialized ItemAddon
const ITEM_ADDONS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("item_addons");

/// Active (non-held) draft per operator: key = operator_id, value = draft_id
const ACTIVE_DRAFTS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("active_drafts");

/// Sessions: key = session_id, value = JSON-serialized OrderSession
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Confirmed orders: key = order_id, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Session attachment index: key = (session_id, order_id), value = ()
const SESSION_ORDERS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("session_orders");

/// Counters: key = counter name (or date key), value = u64
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const ORDER_COUNT_KEY: &str = "order_count";
const SESSION_NUMBER_KEY: &str = "session_number";
const SESSION_DATE_KEY: &str = "session_date";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Engine storage backed by redb
#[derive(Clone)]
pub struct StagingStorage {
    db: Arc<Database>,
}

impl StagingStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (tests, ephemeral deployments)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let _ = txn.open_table(DRAFTS_TABLE)?;
            let _ = txn.open_table(DRAFT_ITEMS_TABLE)?;
            let _ = txn.open_table(ITEM_ADDONS_TABLE)?;
            let _ = txn.open_table(ACTIVE_DRAFTS_TABLE)?;
            let _ = txn.open_table(SESSIONS_TABLE)?;
            let _ = txn.open_table(ORDERS_TABLE)?;
            let _ = txn.open_table(SESSION_ORDERS_TABLE)?;
            let _ = txn.open_table(COUNTERS_TABLE)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Draft Headers ==========

    /// Store (insert or overwrite) a draft header
    pub fn store_draft(&self, txn: &WriteTransaction, draft: &DraftOrder) -> StorageResult<()> {
        let mut table = txn.open_table(DRAFTS_TABLE)?;
        let value = serde_json::to_vec(draft)?;
        table.insert(draft.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get a draft header by id
    pub fn get_draft(&self, draft_id: &str) -> StorageResult<Option<DraftOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRAFTS_TABLE)?;
        match table.get(draft_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get a draft header by id (within transaction)
    pub fn get_draft_txn(
        &self,
        txn: &WriteTransaction,
        draft_id: &str,
    ) -> StorageResult<Option<DraftOrder>> {
        let table = txn.open_table(DRAFTS_TABLE)?;
        match table.get(draft_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All draft headers (sweeper scan)
    pub fn get_all_drafts(&self) -> StorageResult<Vec<DraftOrder>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRAFTS_TABLE)?;
        let mut drafts = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            drafts.push(serde_json::from_slice(value.value())?);
        }
        Ok(drafts)
    }

    /// Delete a draft with its items and add-ons, and clear the active index
    /// if it points at this draft. One transaction, explicit cascade.
    pub fn remove_draft_cascade(
        &self,
        txn: &WriteTransaction,
        draft: &DraftOrder,
    ) -> StorageResult<()> {
        let items = self.get_items_txn(txn, &draft.id)?;
        for item in &items {
            self.remove_addons_for_item(txn, &item.id)?;
        }
        {
            let mut table = txn.open_table(DRAFT_ITEMS_TABLE)?;
            for item in &items {
                table.remove((draft.id.as_str(), item.id.as_str()))?;
            }
        }
        {
            let mut table = txn.open_table(DRAFTS_TABLE)?;
            table.remove(draft.id.as_str())?;
        }
        {
            let mut table = txn.open_table(ACTIVE_DRAFTS_TABLE)?;
            let points_here = table
                .get(draft.operator_id.as_str())?
                .map(|v| v.value() == draft.id)
                .unwrap_or(false);
            if points_here {
                table.remove(draft.operator_id.as_str())?;
            }
        }
        Ok(())
    }

    // ========== Active Draft Index ==========

    /// Point the operator's active-draft index at `draft_id`
    pub fn set_active_draft(
        &self,
        txn: &WriteTransaction,
        operator_id: &str,
        draft_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ACTIVE_DRAFTS_TABLE)?;
        table.insert(operator_id, draft_id)?;
        Ok(())
    }

    /// Clear the operator's active-draft index
    pub fn clear_active_draft(
        &self,
        txn: &WriteTransaction,
        operator_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ACTIVE_DRAFTS_TABLE)?;
        table.remove(operator_id)?;
        Ok(())
    }

    /// Current active draft id for an operator, if any
    pub fn get_active_draft_id(&self, operator_id: &str) -> StorageResult<Option<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTIVE_DRAFTS_TABLE)?;
        Ok(table.get(operator_id)?.map(|v| v.value().to_string()))
    }

    /// Current active draft id for an operator (within transaction)
    pub fn get_active_draft_id_txn(
        &self,
        txn: &WriteTransaction,
        operator_id: &str,
    ) -> StorageResult<Option<String>> {
        let table = txn.open_table(ACTIVE_DRAFTS_TABLE)?;
        Ok(table.get(operator_id)?.map(|v| v.value().to_string()))
    }

    // ========== Draft Items ==========

    /// Store (insert or overwrite) a line item
    pub fn store_item(&self, txn: &WriteTransaction, item: &DraftItem) -> StorageResult<()> {
        let mut table = txn.open_table(DRAFT_ITEMS_TABLE)?;
        let value = serde_json::to_vec(item)?;
        table.insert((item.draft_id.as_str(), item.id.as_str()), value.as_slice())?;
        Ok(())
    }

    /// Get one line item
    pub fn get_item(&self, draft_id: &str, item_id: &str) -> StorageResult<Option<DraftItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRAFT_ITEMS_TABLE)?;
        match table.get((draft_id, item_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get one line item (within transaction)
    pub fn get_item_txn(
        &self,
        txn: &WriteTransaction,
        draft_id: &str,
        item_id: &str,
    ) -> StorageResult<Option<DraftItem>> {
        let table = txn.open_table(DRAFT_ITEMS_TABLE)?;
        match table.get((draft_id, item_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All line items of a draft
    pub fn get_items(&self, draft_id: &str) -> StorageResult<Vec<DraftItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DRAFT_ITEMS_TABLE)?;
        let mut items = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().0 == draft_id {
                items.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(items)
    }

    /// All line items of a draft (within transaction)
    pub fn get_items_txn(
        &self,
        txn: &WriteTransaction,
        draft_id: &str,
    ) -> StorageResult<Vec<DraftItem>> {
        let table = txn.open_table(DRAFT_ITEMS_TABLE)?;
        let mut items = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().0 == draft_id {
                items.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(items)
    }

    /// Remove one line item and its add-ons
    pub fn remove_item(
        &self,
        txn: &WriteTransaction,
        draft_id: &str,
        item_id: &str,
    ) -> StorageResult<()> {
        self.remove_addons_for_item(txn, item_id)?;
        let mut table = txn.open_table(DRAFT_ITEMS_TABLE)?;
        table.remove((draft_id, item_id))?;
        Ok(())
    }

    // ========== Item Add-ons ==========

    /// Store an add-on row
    pub fn store_addon(&self, txn: &WriteTransaction, addon: &ItemAddon) -> StorageResult<()> {
        let mut table = txn.open_table(ITEM_ADDONS_TABLE)?;
        let value = serde_json::to_vec(addon)?;
        table.insert((addon.item_id.as_str(), addon.id.as_str()), value.as_slice())?;
        Ok(())
    }

    /// All add-ons of an item
    pub fn get_addons(&self, item_id: &str) -> StorageResult<Vec<ItemAddon>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ITEM_ADDONS_TABLE)?;
        let mut addons = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().0 == item_id {
                addons.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(addons)
    }

    /// All add-ons of an item (within transaction)
    pub fn get_addons_txn(
        &self,
        txn: &WriteTransaction,
        item_id: &str,
    ) -> StorageResult<Vec<ItemAddon>> {
        let table = txn.open_table(ITEM_ADDONS_TABLE)?;
        let mut addons = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            if key.value().0 == item_id {
                addons.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(addons)
    }

    /// Remove all add-ons of an item (cascade helper)
    pub fn remove_addons_for_item(
        &self,
        txn: &WriteTransaction,
        item_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ITEM_ADDONS_TABLE)?;
        let mut keys: Vec<(String, String)> = Vec::new();
        for result in table.iter()? {
            let (key, _value) = result?;
            let (iid, aid) = key.value();
            if iid == item_id {
                keys.push((iid.to_string(), aid.to_string()));
            }
        }
        for (iid, aid) in &keys {
            table.remove((iid.as_str(), aid.as_str()))?;
        }
        Ok(())
    }

    // ========== Sessions ==========

    /// Store (insert or overwrite) a session
    pub fn store_session(
        &self,
        txn: &WriteTransaction,
        session: &OrderSession,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(SESSIONS_TABLE)?;
        let value = serde_json::to_vec(session)?;
        table.insert(session.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get a session by id
    pub fn get_session(&self, session_id: &str) -> StorageResult<Option<OrderSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        match table.get(session_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get a session by id (within transaction)
    pub fn get_session_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
    ) -> StorageResult<Option<OrderSession>> {
        let table = txn.open_table(SESSIONS_TABLE)?;
        match table.get(session_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All sessions (sweeper scan)
    pub fn get_all_sessions(&self) -> StorageResult<Vec<OrderSession>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS_TABLE)?;
        let mut sessions = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            sessions.push(serde_json::from_slice(value.value())?);
        }
        Ok(sessions)
    }

    // ========== Confirmed Orders ==========

    /// Store (insert or overwrite) a confirmed order
    pub fn store_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.id.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Get a confirmed order by id
    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Get a confirmed order by id (within transaction)
    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Record the session attachment of an order
    pub fn link_order_to_session(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
        order_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(SESSION_ORDERS_TABLE)?;
        table.insert((session_id, order_id), ())?;
        Ok(())
    }

    /// All orders attached to a session (within transaction)
    ///
    /// Used by the synchronous aggregate recompute, which must observe the
    /// same transaction it is part of.
    pub fn orders_for_session_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
    ) -> StorageResult<Vec<Order>> {
        let index = txn.open_table(SESSION_ORDERS_TABLE)?;
        let mut order_ids = Vec::new();
        for result in index.iter()? {
            let (key, _value) = result?;
            if key.value().0 == session_id {
                order_ids.push(key.value().1.to_string());
            }
        }

        let orders_table = txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for order_id in &order_ids {
            if let Some(value) = orders_table.get(order_id.as_str())? {
                orders.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(orders)
    }

    /// All orders attached to a session (read-only)
    pub fn orders_for_session(&self, session_id: &str) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(SESSION_ORDERS_TABLE)?;
        let mut order_ids = Vec::new();
        for result in index.iter()? {
            let (key, _value) = result?;
            if key.value().0 == session_id {
                order_ids.push(key.value().1.to_string());
            }
        }

        let orders_table = read_txn.open_table(ORDERS_TABLE)?;
        let mut orders = Vec::new();
        for order_id in &order_ids {
            if let Some(value) = orders_table.get(order_id.as_str())? {
                orders.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(orders)
    }

    // ========== Counters ==========

    /// Get and increment the order counter atomically (receipt numbers)
    ///
    /// Opens its own write transaction; call before, never inside, another
    /// write transaction (redb serializes writers).
    pub fn next_order_count(&self) -> StorageResult<u64> {
        let txn = self.db.begin_write()?;
        let next = {
            let mut table = txn.open_table(COUNTERS_TABLE)?;
            let current = table.get(ORDER_COUNT_KEY)?.map(|g| g.value()).unwrap_or(0);
            let next = current + 1;
            table.insert(ORDER_COUNT_KEY, next)?;
            next
        };
        txn.commit()?;
        Ok(next)
    }

    /// Next daily session number, resetting to 1 on date change (UTC)
    pub fn next_session_number(&self) -> StorageResult<u64> {
        let today: u64 = chrono::Utc::now()
            .format("%Y%m%d")
            .to_string()
            .parse()
            .unwrap_or(0);

        let txn = self.db.begin_write()?;
        let number = {
            let mut table = txn.open_table(COUNTERS_TABLE)?;
            let stored_date = table.get(SESSION_DATE_KEY)?.map(|g| g.value()).unwrap_or(0);
            let number = if stored_date != today {
                table.insert(SESSION_DATE_KEY, today)?;
                1
            } else {
                table
                    .get(SESSION_NUMBER_KEY)?
                    .map(|g| g.value())
                    .unwrap_or(0)
                    + 1
            };
            table.insert(SESSION_NUMBER_KEY, number)?;
            number
        };
        txn.commit()?;
        Ok(number)
    }
}
