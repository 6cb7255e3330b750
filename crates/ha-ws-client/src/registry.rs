//! Correlation registry: maps a correlation id to whoever is waiting on it.
//!
//! An entry is either a one-shot waiter (resolved by the first `result` for
//! its id, then removed) or a subscription (first `result` completes the
//! subscribe ack, every `event` goes to the callback until removal).
//!
//! Each subscription gets its own delivery task fed by an unbounded queue, so
//! events for one id arrive in transport order and a slow callback never
//! holds up other ids. The callback sits in a swappable slot: delivery holds
//! the slot lock while invoking, removal takes the lock and empties the slot.
//! Once [`Registry::remove`] returns, the callback is never invoked again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace};

use ha_ws_core::error::{HaError, HaResult};

/// Subscription callback. Invoked once per event, never concurrently with
/// itself.
pub type Callback = Box<dyn FnMut(Value) + Send + 'static>;

/// Receiving end of a one-shot resolution (call reply or subscribe ack).
pub type ReplyReceiver = oneshot::Receiver<HaResult<Value>>;

type CallbackSlot = Arc<Mutex<Option<Callback>>>;

/// An inbound payload routed to a registry entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer to a call (or to a subscribe request).
    Result(HaResult<Value>),
    /// Push on a subscription.
    Event(Value),
}

enum Entry {
    Waiter(oneshot::Sender<HaResult<Value>>),
    Subscription {
        ack: Option<oneshot::Sender<HaResult<Value>>>,
        events: mpsc::UnboundedSender<Value>,
        slot: CallbackSlot,
    },
}

/// Concurrency-safe table of outstanding correlation ids.
pub struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Hand out a fresh id. Ids start at 1 and are never reused.
    pub fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Install a one-shot waiter for `id`.
    pub async fn register_waiter(&self, id: u64) -> HaResult<ReplyReceiver> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return Err(HaError::AlreadyRegistered(id));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id, Entry::Waiter(tx));
        Ok(rx)
    }

    /// Install a subscription for `id`. The returned receiver completes with
    /// the hub's reply to the subscribe request itself.
    pub async fn register_subscription(
        &self,
        id: u64,
        callback: Callback,
    ) -> HaResult<ReplyReceiver> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&id) {
            return Err(HaError::AlreadyRegistered(id));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callback)));

        tokio::spawn(deliver(id, events_rx, slot.clone()));

        entries.insert(
            id,
            Entry::Subscription {
                ack: Some(ack_tx),
                events: events_tx,
                slot,
            },
        );
        Ok(ack_rx)
    }

    /// Route a reply to the entry for `id`.
    ///
    /// Returns `false` when nothing accepted it (an orphan).
    pub async fn resolve(&self, id: u64, reply: Reply) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };

        match entry {
            Entry::Waiter(_) => match reply {
                Reply::Result(outcome) => {
                    if let Some(Entry::Waiter(tx)) = entries.remove(&id) {
                        // The caller may have given up already.
                        let _ = tx.send(outcome);
                    }
                    true
                }
                Reply::Event(_) => {
                    debug!(id, "event addressed to a one-shot call");
                    false
                }
            },
            Entry::Subscription { ack, events, .. } => match reply {
                Reply::Result(outcome) => {
                    match ack.take() {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => debug!(id, "extra result on an acknowledged subscription"),
                    }
                    true
                }
                Reply::Event(event) => {
                    if events.send(event).is_err() {
                        debug!(id, "subscription delivery task is gone");
                    }
                    true
                }
            },
        }
    }

    /// Drop the entry for `id`. For a subscription, waits until any callback
    /// invocation in progress has returned. Returns whether an entry existed.
    pub async fn remove(&self, id: u64) -> bool {
        let entry = self.entries.lock().await.remove(&id);
        match entry {
            Some(Entry::Subscription { slot, .. }) => {
                slot.lock().await.take();
                true
            }
            Some(Entry::Waiter(_)) => true,
            None => false,
        }
    }

    /// Fail every pending waiter and ack with `err` and silence every
    /// subscription. Returns the number of entries released.
    pub async fn drain_all(&self, err: HaError) -> usize {
        let drained: Vec<(u64, Entry)> = self.entries.lock().await.drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            match entry {
                Entry::Waiter(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                Entry::Subscription { ack, slot, .. } => {
                    if let Some(tx) = ack {
                        let _ = tx.send(Err(err.clone()));
                    }
                    slot.lock().await.take();
                }
            }
            trace!(id, "drained");
        }

        count
    }

    /// Whether `id` has a live entry.
    pub async fn contains(&self, id: u64) -> bool {
        self.entries.lock().await.contains_key(&id)
    }

    /// Number of outstanding entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Per-subscription delivery task.
async fn deliver(id: u64, mut events: mpsc::UnboundedReceiver<Value>, slot: CallbackSlot) {
    while let Some(event) = events.recv().await {
        let mut callback = slot.lock().await;
        match callback.as_mut() {
            Some(cb) => cb(event),
            None => break,
        }
    }
    trace!(id, "subscription delivery ended");
}
