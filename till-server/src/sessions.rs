//! Session Aggregator
//!
//! Groups confirmed orders under a long-lived tab and keeps the tab's
//! aggregate total equal to the sum of its non-voided orders. Recomputation
//! is synchronous and runs inside the same write transaction as the mutation
//! that triggered it, so the invariant holds at every commit point, never
//! eventually.

use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use shared::models::{Order, OrderSession, OrderStatus, SessionStatus};
use shared::util::now_millis;

use crate::error::{EngineError, EngineResult};
use crate::money;
use crate::storage::{StagingStorage, StorageError};

/// Full session detail for rendering and bill generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: OrderSession,
    pub orders: Vec<Order>,
}

/// Owns the session/order tables and the aggregate-total invariant
#[derive(Clone)]
pub struct SessionAggregator {
    storage: StagingStorage,
}

impl SessionAggregator {
    pub fn new(storage: StagingStorage) -> Self {
        Self { storage }
    }

    /// Open a new session for a table
    ///
    /// The daily session number is drawn from its own counter transaction
    /// before the session row is written.
    pub fn open(&self, table_id: &str) -> EngineResult<OrderSession> {
        let number = self.storage.next_session_number()?;
        let session = OrderSession::new(number, table_id);

        let txn = self.storage.begin_write()?;
        self.storage.store_session(&txn, &session)?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(session_id = %session.id, table_id, number, "Session opened");
        Ok(session)
    }

    /// Load a session or fail with `SessionNotFound`
    pub fn load(&self, session_id: &str) -> EngineResult<OrderSession> {
        self.storage
            .get_session(session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Session with all attached orders
    pub fn detail(&self, session_id: &str) -> EngineResult<SessionDetail> {
        let session = self.load(session_id)?;
        let orders = self.storage.orders_for_session(session_id)?;
        Ok(SessionDetail { session, orders })
    }

    /// Number of orders attached to a session
    pub fn order_count(&self, session_id: &str) -> EngineResult<usize> {
        Ok(self.storage.orders_for_session(session_id)?.len())
    }

    /// Attach a confirmed order to a session, within the caller's transaction
    ///
    /// Only `Open` sessions accept orders. Returns the session with its
    /// recomputed total.
    pub fn attach_txn(
        &self,
        txn: &WriteTransaction,
        session_id: &str,
        order: &Order,
    ) -> EngineResult<OrderSession> {
        let session = self
            .storage
            .get_session_txn(txn, session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Open {
            return Err(EngineError::SessionClosed(session_id.to_string()));
        }

        self.storage.link_order_to_session(txn, session_id, &order.id)?;
        self.recompute_txn(txn, session)
    }

    /// Recompute the aggregate total from the attached order set and persist
    ///
    /// `total = Σ total` over non-voided orders. Deterministic from current
    /// state, so a retried recompute converges to the same value.
    pub fn recompute_txn(
        &self,
        txn: &WriteTransaction,
        mut session: OrderSession,
    ) -> EngineResult<OrderSession> {
        let orders = self.storage.orders_for_session_txn(txn, &session.id)?;
        session.total = money::sum_order_totals(&orders);
        session.updated_at = now_millis();
        self.storage.store_session(txn, &session)?;
        Ok(session)
    }

    /// Mark an attached order settled (`Confirmed -> Completed`)
    ///
    /// Completed orders stay in the aggregate; the owning session's total is
    /// unchanged but still recomputed to keep the invariant path uniform.
    pub fn complete_order(&self, order_id: &str) -> EngineResult<(Order, Option<OrderSession>)> {
        self.transition_order(order_id, OrderStatus::Completed)
    }

    /// Void an attached order, excluding it from the aggregate
    pub fn void_order(&self, order_id: &str) -> EngineResult<(Order, Option<OrderSession>)> {
        self.transition_order(order_id, OrderStatus::Voided)
    }

    fn transition_order(
        &self,
        order_id: &str,
        to: OrderStatus,
    ) -> EngineResult<(Order, Option<OrderSession>)> {
        let txn = self.storage.begin_write()?;
        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)?
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;
        if order.status.is_terminal() {
            return Err(EngineError::OrderNotFound(order_id.to_string()));
        }
        order.status = to;
        self.storage.store_order(&txn, &order)?;

        let session = match &order.session_id {
            Some(session_id) => {
                let session = self
                    .storage
                    .get_session_txn(&txn, session_id)?
                    .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
                Some(self.recompute_txn(&txn, session)?)
            }
            None => None,
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(order_id, status = ?to, "Order transitioned");
        Ok((order, session))
    }

    /// Step an open session into settlement (`Open -> Closing`)
    ///
    /// A `Closing` session rejects new attachments; its orders can still be
    /// completed or voided.
    pub fn begin_settlement(&self, session_id: &str) -> EngineResult<OrderSession> {
        let txn = self.storage.begin_write()?;
        let mut session = self
            .storage
            .get_session_txn(&txn, session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Open {
            return Err(EngineError::SessionClosed(session_id.to_string()));
        }
        session.status = SessionStatus::Closing;
        session.updated_at = now_millis();
        self.storage.store_session(&txn, &session)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(session)
    }

    /// Close a session once every attached order is terminal
    ///
    /// Rejects with `SessionNotSettleable` while any order is still
    /// `Confirmed`. Valid from `Open` or `Closing`.
    pub fn close(&self, session_id: &str) -> EngineResult<OrderSession> {
        let txn = self.storage.begin_write()?;
        let mut session = self
            .storage
            .get_session_txn(&txn, session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status.is_terminal() {
            return Err(EngineError::SessionClosed(session_id.to_string()));
        }

        let orders = self.storage.orders_for_session_txn(&txn, session_id)?;
        if orders.iter().any(|o| !o.status.is_terminal()) {
            return Err(EngineError::SessionNotSettleable(session_id.to_string()));
        }

        let now = now_millis();
        session.status = SessionStatus::Closed;
        session.total = money::sum_order_totals(&orders);
        session.closed_at = Some(now);
        session.updated_at = now;
        self.storage.store_session(&txn, &session)?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(session_id, total = session.total, "Session closed");
        Ok(session)
    }

    /// Abandon an open session (timeout sweep or explicit void)
    pub fn abandon(&self, session_id: &str) -> EngineResult<OrderSession> {
        let txn = self.storage.begin_write()?;
        let mut session = self
            .storage
            .get_session_txn(&txn, session_id)?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Open {
            return Err(EngineError::SessionClosed(session_id.to_string()));
        }
        let now = now_millis();
        session.status = SessionStatus::Abandoned;
        session.closed_at = Some(now);
        session.updated_at = now;
        self.storage.store_session(&txn, &session)?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(session_id, "Session abandoned");
        Ok(session)
    }

    /// Sessions idle longer than `idle_ms` and still open (sweeper scan)
    pub fn idle_open_sessions(&self, idle_ms: i64) -> EngineResult<Vec<OrderSession>> {
        let cutoff = now_millis() - idle_ms;
        Ok(self
            .storage
            .get_all_sessions()?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Open && s.updated_at < cutoff)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::util::new_id;

    fn aggregator() -> SessionAggregator {
        SessionAggregator::new(StagingStorage::open_in_memory().unwrap())
    }

    fn order(session_id: &str, total: f64) -> Order {
        Order {
            id: new_id(),
            session_id: Some(session_id.to_string()),
            operator_id: "op-1".into(),
            status: OrderStatus::Confirmed,
            items: vec![],
            subtotal: total,
            discount: 0.0,
            tax: 0.0,
            total,
            receipt_number: "FAC2025010110001".into(),
            confirmed_at: now_millis(),
        }
    }

    fn attach(agg: &SessionAggregator, order: &Order) -> OrderSession {
        let session_id = order.session_id.clone().unwrap();
        let txn = agg.storage.begin_write().unwrap();
        agg.storage.store_order(&txn, order).unwrap();
        let session = agg.attach_txn(&txn, &session_id, order).unwrap();
        txn.commit().unwrap();
        session
    }

    #[test]
    fn attach_recomputes_the_running_total() {
        let agg = aggregator();
        let session = agg.open("T1").unwrap();

        let session = attach(&agg, &order(&session.id, 100.0));
        assert_eq!(session.total, 100.0);
        let session = attach(&agg, &order(&session.id, 50.0));
        assert_eq!(session.total, 150.0);
        assert_eq!(agg.order_count(&session.id).unwrap(), 2);
    }

    #[test]
    fn order_mutation_updates_only_its_session() {
        let agg = aggregator();
        let s1 = agg.open("T1").unwrap();
        let s2 = agg.open("T2").unwrap();

        let o1 = order(&s1.id, 100.0);
        attach(&agg, &o1);
        attach(&agg, &order(&s1.id, 50.0));
        attach(&agg, &order(&s2.id, 70.0));

        // Growing O1 from 100 to 130 raises S1 to 180 without touching S2
        let mut grown = o1.clone();
        grown.total = 130.0;
        let txn = agg.storage.begin_write().unwrap();
        agg.storage.store_order(&txn, &grown).unwrap();
        let session = agg.load(&s1.id).unwrap();
        let session = agg.recompute_txn(&txn, session).unwrap();
        txn.commit().unwrap();

        assert_eq!(session.total, 180.0);
        assert_eq!(agg.load(&s2.id).unwrap().total, 70.0);
    }

    #[test]
    fn voided_orders_leave_the_aggregate() {
        let agg = aggregator();
        let session = agg.open("T1").unwrap();
        let o1 = order(&session.id, 100.0);
        attach(&agg, &o1);
        attach(&agg, &order(&session.id, 50.0));

        let (voided, updated) = agg.void_order(&o1.id).unwrap();
        assert_eq!(voided.status, OrderStatus::Voided);
        assert_eq!(updated.unwrap().total, 50.0);
    }

    #[test]
    fn close_requires_terminal_orders() {
        let agg = aggregator();
        let session = agg.open("T1").unwrap();
        let o1 = order(&session.id, 100.0);
        attach(&agg, &o1);

        assert!(matches!(
            agg.close(&session.id),
            Err(EngineError::SessionNotSettleable(_))
        ));

        agg.complete_order(&o1.id).unwrap();
        let closed = agg.close(&session.id).unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert_eq!(closed.total, 100.0);
        assert!(closed.closed_at.is_some());

        // Terminal sessions reject further transitions
        assert!(matches!(
            agg.close(&session.id),
            Err(EngineError::SessionClosed(_))
        ));
    }

    #[test]
    fn closing_session_rejects_new_attachments() {
        let agg = aggregator();
        let session = agg.open("T1").unwrap();
        agg.begin_settlement(&session.id).unwrap();

        let o = order(&session.id, 10.0);
        let txn = agg.storage.begin_write().unwrap();
        agg.storage.store_order(&txn, &o).unwrap();
        let err = agg.attach_txn(&txn, &session.id, &o).unwrap_err();
        assert!(matches!(err, EngineError::SessionClosed(_)));
    }

    #[test]
    fn abandon_only_from_open() {
        let agg = aggregator();
        let session = agg.open("T1").unwrap();
        let abandoned = agg.abandon(&session.id).unwrap();
        assert_eq!(abandoned.status, SessionStatus::Abandoned);
        assert!(matches!(
            agg.abandon(&session.id),
            Err(EngineError::SessionClosed(_))
        ));
    }

    #[test]
    fn idle_scan_only_returns_stale_open_sessions() {
        let agg = aggregator();
        let stale = agg.open("T1").unwrap();
        let fresh = agg.open("T2").unwrap();
        let closed = agg.open("T3").unwrap();
        agg.abandon(&closed.id).unwrap();

        // Backdate the stale session
        let txn = agg.storage.begin_write().unwrap();
        let mut old = agg.load(&stale.id).unwrap();
        old.updated_at = now_millis() - 10_000;
        agg.storage.store_session(&txn, &old).unwrap();
        txn.commit().unwrap();

        let idle = agg.idle_open_sessions(5_000).unwrap();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id, stale.id);
        assert_ne!(idle[0].id, fresh.id);
    }
}
