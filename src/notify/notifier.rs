//! Ordered change delivery
//!
//! Commits publish their events after applying them, possibly out of order
//! across threads. A reorder buffer keyed by sequence releases events only
//! once every earlier sequence has been released, so each subscriber sees
//! changes in WAL order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::document::Document;
use crate::errors::DbResult;
use crate::observability::Event;
use crate::sync::lock;

use super::event::ChangeEvent;
use super::subscription::{EventSender, Subscription, SubscriptionFilter, SubscriptionId};

/// State handed to a new subscriber
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    /// Matching documents with the sequence of each version
    pub documents: Vec<(Arc<Document>, u64)>,
    /// Last WAL sequence whose effect is included
    pub through_sequence: u64,
}

/// Result of a publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Events released from the reorder buffer
    pub released: usize,
    /// Subscriptions dropped because their channel was closed
    pub dropped: usize,
}

#[derive(Debug)]
struct NotifierState {
    next_sequence: u64,
    pending: BTreeMap<u64, ChangeEvent>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

/// Fans committed changes out to subscribers
#[derive(Debug)]
pub struct ChangeNotifier {
    state: Mutex<NotifierState>,
}

impl ChangeNotifier {
    /// `next_sequence` is the first sequence that will be published
    pub fn new(next_sequence: u64) -> Self {
        Self {
            state: Mutex::new(NotifierState {
                next_sequence,
                pending: BTreeMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    /// Register a subscriber. `snapshot` returns the documents currently
    /// matching, each with the sequence of the version returned, plus the
    /// WAL sequence the state was taken at. The documents are sent as
    /// `Current` events before any live event; live events at or below that
    /// sequence are already part of the state and are never sent. Runs with
    /// publishing paused.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        filter: SubscriptionFilter,
        connection: impl Into<String>,
        sender: EventSender,
        snapshot: F,
    ) -> DbResult<SubscriptionHandle>
    where
        F: FnOnce(&SubscriptionFilter) -> DbResult<CurrentState>,
    {
        let mut state = lock(&self.state);
        let current = snapshot(&filter)?;

        let id = SubscriptionId::new();
        let mut open = true;
        for (doc, sequence) in &current.documents {
            if !filter.matches_document(doc) {
                continue;
            }
            if sender.send(ChangeEvent::current(*sequence, doc)).is_err() {
                open = false;
                break;
            }
        }

        if open {
            let floor = current.through_sequence;
            let last_delivered = floor.max(state.next_sequence.saturating_sub(1));
            state.subscriptions.insert(
                id,
                Subscription {
                    connection: connection.into(),
                    filter,
                    sender,
                    last_delivered,
                    floor,
                },
            );
            debug!(
                subscription = %id,
                synthetic = current.documents.len(),
                floor,
                "subscribed"
            );
        }

        Ok(SubscriptionHandle {
            id,
            notifier: Arc::downgrade(self),
        })
    }

    /// Remove one subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        lock(&self.state).subscriptions.remove(id).is_some()
    }

    /// Remove every subscription owned by `connection`
    pub fn disconnect(&self, connection: &str) -> usize {
        let mut state = lock(&self.state);
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|_, sub| sub.connection != connection);
        before - state.subscriptions.len()
    }

    /// Hand over events of a commit. Events are released to subscribers
    /// once all earlier sequences have been published.
    pub fn publish(&self, events: Vec<ChangeEvent>) -> PublishOutcome {
        let mut state = lock(&self.state);
        for event in events {
            if event.sequence >= state.next_sequence {
                state.pending.insert(event.sequence, event);
            }
        }

        let mut outcome = PublishOutcome::default();
        loop {
            let next = state.next_sequence;
            let Some(event) = state.pending.remove(&next) else {
                break;
            };
            state.next_sequence += 1;
            outcome.released += 1;
            outcome.dropped += deliver(&mut state.subscriptions, &event);
        }
        outcome
    }

    /// Skip sequences that will never be published (replayed history)
    pub fn advance_to(&self, next_sequence: u64) {
        let mut state = lock(&self.state);
        if next_sequence > state.next_sequence {
            state.next_sequence = next_sequence;
            state.pending = state.pending.split_off(&next_sequence);
        }
    }

    /// Sequence of the last live event delivered to `id`
    pub fn last_delivered(&self, id: &SubscriptionId) -> Option<u64> {
        lock(&self.state).subscriptions.get(id).map(|s| s.last_delivered)
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }

    /// Events waiting for an earlier sequence
    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn next_sequence(&self) -> u64 {
        lock(&self.state).next_sequence
    }
}

/// Send `event` to every interested subscriber; returns how many were
/// dropped for a closed channel
fn deliver(subscriptions: &mut HashMap<SubscriptionId, Subscription>, event: &ChangeEvent) -> usize {
    let mut closed = Vec::new();
    for (id, sub) in subscriptions.iter_mut() {
        if !sub.wants(event) {
            continue;
        }
        if sub.sender.send(event.clone()).is_err() {
            closed.push(*id);
        } else {
            sub.last_delivered = event.sequence;
        }
    }
    for id in &closed {
        subscriptions.remove(id);
        warn!(
            event = Event::SubscriptionDropped.as_str(),
            subscription = %id,
            "delivery channel closed; subscription dropped"
        );
    }
    closed.len()
}

/// Returned by `subscribe`; unsubscribes on request
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    notifier: Weak<ChangeNotifier>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. Returns false if already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.notifier.upgrade() {
            Some(notifier) => notifier.unsubscribe(&self.id),
            None => false,
        }
    }
}
