//! In-process remote store

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{RemoteDocument, RemoteEntry, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{Collection, Document, Fields};

/// A [`RemoteStore`] held entirely in memory.
///
/// Revisions follow the `{generation}-{nonce}` shape CouchDB uses and
/// tombstones are kept after deletion. Faults and latency can be injected to
/// exercise the sync engine without a server. Clones share state, so one
/// instance can serve several simulated devices.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    reachable: AtomicBool,
    auth_rejected: AtomicBool,
    latency_ms: AtomicU64,
    fetch_calls: AtomicUsize,
    active_fetches: AtomicUsize,
    max_concurrent_fetches: AtomicUsize,
    put_calls: AtomicUsize,
}

#[derive(Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<String, Stored>>,
    outages: HashSet<Collection>,
    interference: HashMap<(Collection, String), VecDeque<Fields>>,
}

struct Stored {
    generation: u64,
    revision: String,
    fields: Fields,
    deleted: bool,
}

impl Stored {
    fn next(previous: Option<&Self>, fields: Fields, deleted: bool) -> Self {
        let generation = previous.map_or(1, |stored| stored.generation + 1);
        let nonce = Uuid::now_v7().simple().to_string();
        Self {
            generation,
            revision: format!("{generation}-{nonce}"),
            fields,
            deleted,
        }
    }

    fn entry(&self, id: &str) -> RemoteEntry {
        if self.deleted {
            RemoteEntry::Tombstone {
                id: id.to_string(),
                revision: self.revision.clone(),
            }
        } else {
            RemoteEntry::Live(RemoteDocument {
                id: id.to_string(),
                revision: self.revision.clone(),
                fields: self.fields.clone(),
            })
        }
    }
}

impl State {
    fn docs(&mut self, collection: Collection) -> &mut BTreeMap<String, Stored> {
        self.collections.entry(collection).or_default()
    }

    fn write(&mut self, collection: Collection, id: &str, fields: Fields, deleted: bool) -> String {
        let docs = self.docs(collection);
        let stored = Stored::next(docs.get(id), fields, deleted);
        let revision = stored.revision.clone();
        docs.insert(id.to_string(), stored);
        revision
    }

    /// Apply a write queued by [`MemoryRemote::inject_concurrent_write`].
    fn interfere(&mut self, collection: Collection, id: &str) -> bool {
        let queued = self
            .interference
            .get_mut(&(collection, id.to_string()))
            .and_then(VecDeque::pop_front);
        match queued {
            Some(fields) => {
                self.write(collection, id, fields, false);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                reachable: AtomicBool::new(true),
                auth_rejected: AtomicBool::new(false),
                latency_ms: AtomicU64::new(0),
                fetch_calls: AtomicUsize::new(0),
                active_fetches: AtomicUsize::new(0),
                max_concurrent_fetches: AtomicUsize::new(0),
                put_calls: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_auth_rejected(&self, rejected: bool) {
        self.inner.auth_rejected.store(rejected, Ordering::SeqCst);
    }

    /// Make one collection fail as unreachable while the others keep working.
    pub fn set_collection_outage(&self, collection: Collection, down: bool) {
        let mut state = self.state();
        if down {
            state.outages.insert(collection);
        } else {
            state.outages.remove(&collection);
        }
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Write `document` as another client would, ignoring revisions.
    pub fn write_direct(&self, collection: Collection, document: &Document) -> String {
        self.state()
            .write(collection, &document.id, document.fields.clone(), false)
    }

    /// Tombstone `id` as another client would. Returns `false` if unknown.
    pub fn delete_direct(&self, collection: Collection, id: &str) -> bool {
        let mut state = self.state();
        if !state.docs(collection).contains_key(id) {
            return false;
        }
        state.write(collection, id, Fields::new(), true);
        true
    }

    /// Have another client write `fields` to `id` right before the next write
    /// this remote receives for it, so that write hits a stale revision.
    /// Injected writes queue up; each one spoils one later write.
    pub fn inject_concurrent_write(&self, collection: Collection, id: &str, fields: Fields) {
        self.state()
            .interference
            .entry((collection, id.to_string()))
            .or_default()
            .push_back(fields);
    }

    /// Stored entry for `id`, tombstones included.
    pub fn entry(&self, collection: Collection, id: &str) -> Option<RemoteEntry> {
        self.state()
            .docs(collection)
            .get(id)
            .map(|stored| stored.entry(id))
    }

    /// Live documents ordered by id.
    pub fn live_documents(&self, collection: Collection) -> Vec<Document> {
        self.state()
            .docs(collection)
            .iter()
            .filter(|(_, stored)| !stored.deleted)
            .map(|(id, stored)| Document::new(id.clone(), stored.fields.clone()))
            .collect()
    }

    pub fn fetch_all_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `fetch_all` calls observed in flight at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.inner.max_concurrent_fetches.load(Ordering::SeqCst)
    }

    /// Successful `put` calls made through [`RemoteStore`].
    pub fn put_calls(&self) -> usize {
        self.inner.put_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let millis = self.inner.latency_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn check(&self, collection: Option<Collection>) -> Result<()> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(Error::Unreachable("memory remote is offline".into()));
        }
        if self.inner.auth_rejected.load(Ordering::SeqCst) {
            return Err(Error::AuthFailed("credentials rejected".into()));
        }
        if let Some(collection) = collection {
            if self.state().outages.contains(&collection) {
                return Err(Error::Unreachable(format!("{collection} is unavailable")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ensure_collection(&self, collection: Collection) -> Result<()> {
        self.delay().await;
        self.check(Some(collection))?;
        self.state().docs(collection);
        Ok(())
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntry>> {
        let inner = &self.inner;
        inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let active = inner.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        inner
            .max_concurrent_fetches
            .fetch_max(active, Ordering::SeqCst);

        self.delay().await;
        let result = self.check(Some(collection)).map(|()| {
            self.state()
                .docs(collection)
                .iter()
                .map(|(id, stored)| stored.entry(id))
                .collect()
        });

        inner.active_fetches.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<RemoteDocument>> {
        self.delay().await;
        self.check(Some(collection))?;
        Ok(match self.entry(collection, id) {
            Some(RemoteEntry::Live(document)) => Some(document),
            _ => None,
        })
    }

    async fn put(
        &self,
        collection: Collection,
        document: &Document,
        revision: Option<&str>,
    ) -> Result<String> {
        self.delay().await;
        self.check(Some(collection))?;

        let mut state = self.state();
        state.interfere(collection, &document.id);

        let accepted = match state.docs(collection).get(&document.id) {
            None => revision.is_none(),
            Some(stored) if stored.deleted => {
                revision.is_none() || revision == Some(stored.revision.as_str())
            }
            Some(stored) => revision == Some(stored.revision.as_str()),
        };
        if !accepted {
            return Err(Error::Conflict(format!("{collection}/{}", document.id)));
        }

        let mut fields = document.fields.clone();
        fields.retain(|key, _| !key.starts_with('_'));
        let revision = state.write(collection, &document.id, fields, false);
        self.inner.put_calls.fetch_add(1, Ordering::SeqCst);
        Ok(revision)
    }

    async fn mark_deleted(&self, collection: Collection, id: &str) -> Result<()> {
        self.delay().await;
        self.check(Some(collection))?;

        let mut state = self.state();
        if state.interfere(collection, id) {
            return Err(Error::Conflict(format!("{collection}/{id}")));
        }
        match state.docs(collection).get(id) {
            None => Err(Error::NotFound(format!("{collection}/{id}"))),
            Some(stored) if stored.deleted => Ok(()),
            Some(_) => {
                state.write(collection, id, Fields::new(), true);
                Ok(())
            }
        }
    }

    async fn ping(&self) -> bool {
        self.delay().await;
        self.inner.reachable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn business(id: &str, name: &str) -> Document {
        let mut fields = Fields::new();
        fields.insert("name".into(), json!(name));
        Document::new(id, fields)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn revisions_guard_writes() {
        let remote = MemoryRemote::new();
        let first = remote
            .put(Collection::Businesses, &business("b1", "Acme"), None)
            .await
            .unwrap();
        assert!(first.starts_with("1-"));

        let stale = remote
            .put(Collection::Businesses, &business("b1", "Other"), None)
            .await;
        assert!(matches!(stale, Err(Error::Conflict(_))));

        let second = remote
            .put(Collection::Businesses, &business("b1", "Acme Ltd"), Some(&first))
            .await
            .unwrap();
        assert!(second.starts_with("2-"));
        assert_eq!(remote.put_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstones_are_listed_and_can_be_resurrected() {
        let remote = MemoryRemote::new();
        remote.write_direct(Collection::Businesses, &business("b1", "Acme"));
        remote.mark_deleted(Collection::Businesses, "b1").await.unwrap();
        remote.mark_deleted(Collection::Businesses, "b1").await.unwrap();

        let entries = remote.fetch_all(Collection::Businesses).await.unwrap();
        assert!(matches!(&entries[..], [RemoteEntry::Tombstone { id, .. }] if id == "b1"));
        assert!(remote.get(Collection::Businesses, "b1").await.unwrap().is_none());

        remote
            .put(Collection::Businesses, &business("b1", "Acme again"), None)
            .await
            .unwrap();
        assert_eq!(remote.live_documents(Collection::Businesses).len(), 1);

        let missing = remote.mark_deleted(Collection::Businesses, "zz").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_faults_map_to_errors() {
        let remote = MemoryRemote::new();

        remote.set_collection_outage(Collection::Articles, true);
        assert!(remote.fetch_all(Collection::Businesses).await.is_ok());
        let down = remote.fetch_all(Collection::Articles).await;
        assert!(matches!(down, Err(Error::Unreachable(_))));

        remote.set_auth_rejected(true);
        let denied = remote.fetch_all(Collection::Businesses).await;
        assert!(matches!(denied, Err(Error::AuthFailed(_))));

        remote.set_reachable(false);
        assert!(!remote.ping().await);
        assert_eq!(remote.fetch_all_calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_write_makes_next_put_conflict() {
        let remote = MemoryRemote::new();
        let revision = remote.write_direct(Collection::Businesses, &business("b1", "Acme"));

        let mut fields = Fields::new();
        fields.insert("name".into(), json!("Renamed elsewhere"));
        remote.inject_concurrent_write(Collection::Businesses, "b1", fields);

        let result = remote
            .put(Collection::Businesses, &business("b1", "Mine"), Some(&revision))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        let current = remote.get(Collection::Businesses, "b1").await.unwrap().unwrap();
        assert_eq!(current.fields.get("name"), Some(&json!("Renamed elsewhere")));
    }
}
