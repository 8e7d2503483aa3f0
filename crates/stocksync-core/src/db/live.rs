//! Live queries over the local store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::query::Query;
use super::store::run_query;
use crate::models::{Collection, Document};

struct Subscriber {
    collection: Collection,
    query: Query,
    sender: UnboundedSender<Vec<Document>>,
    active: Arc<AtomicBool>,
}

/// Subscribers of every collection, re-evaluated after each committed write.
#[derive(Default)]
pub(crate) struct LiveRegistry {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LiveRegistry {
    pub(crate) fn register(
        &self,
        collection: Collection,
        query: Query,
        initial: Vec<Document>,
    ) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        // Receiver is held right here, so the initial send cannot fail
        let _ = sender.send(initial);

        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                collection,
                query,
                sender,
                active: Arc::clone(&active),
            });

        Subscription {
            handle: SubscriptionHandle { active },
            receiver,
        }
    }

    /// Push a fresh snapshot to each live subscriber of `collection`.
    ///
    /// Called with the store connection held, right after a commit.
    pub(crate) fn notify(&self, conn: &Connection, collection: Collection) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| {
            subscriber.active.load(Ordering::Acquire) && !subscriber.sender.is_closed()
        });

        for subscriber in subscribers.iter().filter(|s| s.collection == collection) {
            match run_query(conn, collection, &subscriber.query) {
                Ok(snapshot) => {
                    let _ = subscriber.sender.send(snapshot);
                }
                Err(error) => {
                    tracing::warn!("Live query on {collection} failed: {error}");
                }
            }
        }
    }

    /// Drop every subscriber; their streams end.
    pub(crate) fn close_all(&self) {
        let drained: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for subscriber in &drained {
            subscriber.active.store(false, Ordering::Release);
        }
    }
}

/// Stream of result sets for one query.
///
/// The current set is available immediately; a new set follows every
/// committed change to the collection. Dropping the subscription cancels it.
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: UnboundedReceiver<Vec<Document>>,
}

impl Subscription {
    /// Wait for the next result set. Returns `None` once cancelled or once the
    /// store is closed.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        if !self.handle.is_active() {
            return None;
        }
        let snapshot = self.receiver.recv().await?;
        self.handle.is_active().then_some(snapshot)
    }

    /// Take an already delivered result set without waiting.
    pub fn try_next(&mut self) -> Option<Vec<Document>> {
        if !self.handle.is_active() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// A clonable handle that can cancel this subscription from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Cancels a [`Subscription`] without owning it.
///
/// Cancelling only flips a flag; it never waits on the store.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
