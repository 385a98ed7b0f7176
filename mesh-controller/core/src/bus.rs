use crate::announcement::{Kind, Message};
use ahash::AHashSet as HashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A publish/subscribe bus of announcements, filtered by kind.
///
/// Handles are cheap to clone and share one set of subscribers. Every
/// subscriber has its own unbounded queue, so a slow subscriber never
/// blocks publishers or other subscribers.
#[derive(Clone, Debug, Default)]
pub struct EventBus(Arc<Mutex<State>>);

#[derive(Debug, Default)]
struct State {
    subscribers: Vec<Subscriber>,
    closed: bool,
}

#[derive(Debug)]
struct Subscriber {
    kinds: HashSet<Kind>,
    tx: mpsc::UnboundedSender<Message>,
}

pub type Subscription = mpsc::UnboundedReceiver<Message>;

// === impl EventBus ===

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to announcements of the given kinds. Once the bus is closed
    /// the returned receiver yields `None`.
    pub fn subscribe(&self, kinds: impl IntoIterator<Item = Kind>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.0.lock();
        if !state.closed {
            state.subscribers.push(Subscriber {
                kinds: kinds.into_iter().collect(),
                tx,
            });
        }
        rx
    }

    /// Delivers the message to every subscriber of its kind. Subscribers that
    /// have gone away are dropped.
    pub fn publish(&self, msg: Message) {
        let mut state = self.0.lock();
        state.subscribers.retain(|sub| {
            if !sub.kinds.contains(&msg.kind) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(msg.clone()).is_ok()
        });
    }

    /// Ends every subscription. Later publishes are discarded.
    pub fn close(&self) {
        let mut state = self.0.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.lock().subscribers.len()
    }
}
