//! Live operator connections of one control listener.
//!
//! Each registered connection owns an unbounded queue drained by its own
//! writer task, so a slow or dead operator never blocks delivery to the
//! others. Broadcasts snapshot the queues under the lock and send after
//! releasing it; queues found closed are pruned at the end of the pass.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::protocol::ServerEvent;

/// Identity of one operator connection.
pub type SubscriberId = Uuid;

/// Item queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send an event as a text frame.
    Event(ServerEvent),
    /// Send a close frame and stop writing.
    Close,
}

/// Set of live operator connections.
#[derive(Debug, Default)]
pub struct SubscriberSet {
    inner: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<Outbound>>>,
}

impl SubscriberSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriberId, mpsc::UnboundedSender<Outbound>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection and return its id and outbound queue.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Unregister a connection. Removing an absent id is a no-op.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Queue `event` for one connection. Returns `false` if it is gone.
    pub fn send_to(&self, id: SubscriberId, event: ServerEvent) -> bool {
        let sender = self.lock().get(&id).cloned();
        match sender {
            Some(tx) if tx.send(Outbound::Event(event)).is_ok() => true,
            Some(_) => {
                self.remove(id);
                false
            }
            None => false,
        }
    }

    /// Queue `event` for every open connection. Returns how many accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let snapshot: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            if tx.is_closed() {
                closed.push(id);
                continue;
            }
            if tx.send(Outbound::Event(event.clone())).is_ok() {
                delivered += 1;
            } else {
                closed.push(id);
            }
        }

        if !closed.is_empty() {
            debug!(count = closed.len(), "pruning closed subscribers");
            let mut guard = self.lock();
            for id in closed {
                guard.remove(&id);
            }
        }

        delivered
    }

    /// Send `notice` then a close frame to every open connection and empty
    /// the set. Returns how many connections received the notice.
    pub fn close_all(&self, notice: &ServerEvent) -> usize {
        let drained: Vec<_> = self.lock().drain().map(|(_, tx)| tx).collect();
        drained
            .into_iter()
            .filter(|tx| {
                let open = tx.send(Outbound::Event(notice.clone())).is_ok();
                let _ = tx.send(Outbound::Close);
                open
            })
            .count()
    }
}
