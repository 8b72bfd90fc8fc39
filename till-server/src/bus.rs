//! Change Propagation Bus
//!
//! Single broadcast channel with server-side topic filtering. Publish is
//! fire-and-forget from the mutation path: a mutation never fails or blocks
//! because a subscriber is slow or absent. Delivery is best-effort; a lagged
//! subscriber is told how much it missed and is expected to re-fetch
//! authoritative state.
//!
//! Per-topic ordering follows from the engine-wide monotonic sequence: all
//! events for one draft or session are published under that entity's
//! mutation lock, so their sequence numbers are strictly increasing.

use std::sync::atomic::{AtomicU64, Ordering};

use shared::event::{BusEvent, ChangeKind, ChangePayload, Topic};
use shared::util::now_millis;
use tokio::sync::broadcast;

/// Broadcast hub for draft and session change events
pub struct ChangeBus {
    sender: broadcast::Sender<BusEvent>,
    sequence: AtomicU64,
}

impl ChangeBus {
    /// `capacity` bounds the per-subscriber backlog before lag kicks in
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a change event; never fails, never blocks
    pub fn publish(&self, topic: Topic, kind: ChangeKind, payload: ChangePayload) -> BusEvent {
        let event = BusEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            topic,
            kind,
            payload,
            timestamp: now_millis(),
        };
        // Err just means no subscriber is listening right now
        if self.sender.send(event.clone()).is_err() {
            tracing::trace!(sequence = event.sequence, "No subscribers for event");
        }
        event
    }

    /// Subscribe to a single topic; other topics are filtered out server-side
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: Some(topic),
        }
    }

    /// Subscribe to every topic (station displays, audit taps)
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One subscriber's filtered view of the event stream
pub struct Subscription {
    receiver: broadcast::Receiver<BusEvent>,
    filter: Option<Topic>,
}

impl Subscription {
    /// Next event matching the filter, or `None` once the bus is gone
    ///
    /// Lag is absorbed here: the subscriber keeps receiving from the oldest
    /// retained event and should treat the gap as a cue to re-fetch.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when no matching event is buffered
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, event: &BusEvent) -> bool {
        self.filter.as_ref().is_none_or(|topic| topic == &event.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::event::DraftTotals;

    fn draft_payload(operator_id: &str, total: f64) -> ChangePayload {
        ChangePayload::Draft(DraftTotals {
            draft_id: "d1".into(),
            operator_id: operator_id.into(),
            subtotal: total,
            discount: 0.0,
            tax: 0.0,
            total,
            item_count: 1,
            on_hold: false,
        })
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let bus = ChangeBus::new(16);
        let mut own = bus.subscribe(Topic::draft("op-1"));
        let mut other = bus.subscribe(Topic::draft("op-2"));

        bus.publish(Topic::draft("op-1"), ChangeKind::Updated, draft_payload("op-1", 10.0));
        bus.publish(Topic::draft("op-2"), ChangeKind::Updated, draft_payload("op-2", 20.0));

        let event = own.recv().await.unwrap();
        assert_eq!(event.topic, Topic::draft("op-1"));
        let event = other.recv().await.unwrap();
        assert_eq!(event.topic, Topic::draft("op-2"));
        // Nothing else buffered for either
        assert!(own.try_recv().is_none());
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn sequence_is_monotonic_across_topics() {
        let bus = ChangeBus::new(16);
        let mut all = bus.subscribe_all();

        for i in 0..5 {
            bus.publish(
                Topic::draft("op-1"),
                ChangeKind::Updated,
                draft_payload("op-1", i as f64),
            );
        }

        let mut last = 0;
        for _ in 0..5 {
            let event = all.recv().await.unwrap();
            assert!(event.sequence > last);
            last = event.sequence;
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_fail() {
        let bus = ChangeBus::new(4);
        let event = bus.publish(
            Topic::session("s1"),
            ChangeKind::Created,
            draft_payload("op-1", 0.0),
        );
        assert_eq!(event.sequence, 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_keeps_receiving() {
        let bus = ChangeBus::new(2);
        let mut sub = bus.subscribe(Topic::draft("op-1"));

        // Overflow the 2-slot buffer; oldest events are dropped
        for i in 0..6 {
            bus.publish(
                Topic::draft("op-1"),
                ChangeKind::Updated,
                draft_payload("op-1", i as f64),
            );
        }

        let event = sub.recv().await.unwrap();
        assert!(event.sequence >= 5);
    }
}
