//! Pull-then-push reconciliation between the local store and the remote
//!
//! Each collection is synced independently. A pass first makes sure the
//! remote database exists, then pulls remote changes (local entries win over
//! remote copies of the same id) and finally pushes every local document with
//! a revision read immediately before the write.

mod gate;
mod report;


use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use gate::{Admission, LeaderGuard, RunGate};
pub use report::{CollectionReport, DocumentFailure, SyncPhase, SyncReport};

use crate::db::{LocalStore, Query};
use crate::error::{Error, Result};
use crate::models::{Collection, Document};
use crate::remote::{RemoteDocument, RemoteEntry, RemoteStore};

/// Reconciles the local store with a [`RemoteStore`].
///
/// Cheap to clone; clones share the per-collection run gates, so concurrent
/// calls for one collection never overlap.
#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    gates: Arc<HashMap<Collection, RunGate>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>) -> Self {
        let gates = Collection::ALL
            .into_iter()
            .map(|collection| (collection, RunGate::new()))
            .collect();
        Self {
            store,
            remote,
            gates: Arc::new(gates),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// Sync every collection, parents first. A failing collection does not
    /// stop the others.
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for collection in Collection::ALL {
            report.collections.push(self.sync_collection(collection).await);
        }
        report
    }

    /// Sync one collection.
    ///
    /// If a pass for `collection` is already running, this waits for one
    /// follow-up pass instead of starting a parallel one; the returned report
    /// is that pass's, marked `deferred`.
    pub async fn sync_collection(&self, collection: Collection) -> CollectionReport {
        let Some(gate) = self.gates.get(&collection) else {
            return self.run_pass(collection).await;
        };

        match gate.enter() {
            Admission::Follower { target } => {
                tracing::debug!("{collection}: sync in progress, follow-up pass queued");
                let mut report = gate
                    .wait_for(target)
                    .await
                    .unwrap_or_else(|| CollectionReport::interrupted(collection));
                report.deferred = true;
                report
            }
            Admission::Leader => {
                let mut guard = LeaderGuard::new(gate);
                let mut passes = 0;
                loop {
                    let mut report = self.run_pass(collection).await;
                    passes += 1;
                    report.passes = passes;
                    if !gate.finish_pass(&report) {
                        guard.disarm();
                        return report;
                    }
                }
            }
        }
    }

    /// Run [`SyncEngine::sync_all`] in the background.
    pub fn spawn_sync_all(&self) -> JoinHandle<SyncReport> {
        let engine = self.clone();
        tokio::spawn(async move { engine.sync_all().await })
    }

    /// Run [`SyncEngine::sync_collection`] in the background.
    pub fn spawn_sync_collection(&self, collection: Collection) -> JoinHandle<CollectionReport> {
        let engine = self.clone();
        tokio::spawn(async move { engine.sync_collection(collection).await })
    }

    async fn run_pass(&self, collection: Collection) -> CollectionReport {
        let mut report = CollectionReport::new(collection);

        if let Err(error) = self.remote.ensure_collection(collection).await {
            abort(&mut report, "remote database unavailable", &error);
            return report;
        }
        if let Err(error) = self.pull(collection, &mut report).await {
            abort(&mut report, "pull failed", &error);
            return report;
        }
        self.push(collection, &mut report).await;

        tracing::info!(
            "{collection}: pulled {}, removed {}, pushed {}, unchanged {}, tombstoned {}",
            report.pulled,
            report.removed,
            report.pushed,
            report.unchanged,
            report.tombstoned
        );
        report
    }

    async fn pull(&self, collection: Collection, report: &mut CollectionReport) -> Result<()> {
        let entries = self.remote.fetch_all(collection).await?;

        for entry in entries {
            let outcome = match &entry {
                RemoteEntry::Tombstone { id, .. } => self
                    .store
                    .apply_remote_tombstone(collection, id)
                    .await
                    .map(|removed| report.removed += usize::from(removed)),
                RemoteEntry::Live(document) => self
                    .store
                    .apply_remote_insert(collection, document.to_document())
                    .await
                    .map(|inserted| report.pulled += usize::from(inserted)),
            };

            if let Err(error) = outcome {
                tracing::warn!("{collection}/{}: pull failed: {error}", entry.id());
                report.fail(SyncPhase::Pull, entry.id(), &error);
            }
        }
        Ok(())
    }

    async fn push(&self, collection: Collection, report: &mut CollectionReport) {
        self.flush_deletions(collection, report).await;

        let documents = match self.store.find(collection, &Query::all()).await {
            Ok(documents) => documents,
            Err(error) => {
                abort(report, "reading local documents failed", &error);
                return;
            }
        };

        for document in &documents {
            match self.push_document(collection, document).await {
                Ok(PushOutcome::Written) => report.pushed += 1,
                Ok(PushOutcome::Unchanged) => report.unchanged += 1,
                Err(error) if error.is_conflict() => {
                    tracing::warn!(
                        "{collection}/{}: still conflicting after retry, skipped until next sync",
                        document.id
                    );
                    report.conflicts.push(document.id.clone());
                }
                Err(error) => {
                    tracing::warn!("{collection}/{}: push failed: {error}", document.id);
                    report.fail(SyncPhase::Push, &document.id, &error);
                }
            }
        }
    }

    /// Write tombstones for entries removed locally since the last sync.
    async fn flush_deletions(&self, collection: Collection, report: &mut CollectionReport) {
        let ids = match self.store.pending_deletions(collection).await {
            Ok(ids) => ids,
            Err(error) => {
                tracing::warn!("{collection}: reading queued deletions failed: {error}");
                report.fail(SyncPhase::Delete, "*", &error);
                return;
            }
        };

        for id in ids {
            let mut result = self.remote.mark_deleted(collection, &id).await;
            if result.as_ref().is_err_and(Error::is_conflict) {
                result = self.remote.mark_deleted(collection, &id).await;
            }

            let result = match result {
                Ok(()) => {
                    report.tombstoned += 1;
                    Ok(())
                }
                Err(Error::NotFound(_)) => {
                    tracing::debug!("{collection}/{id}: never reached the remote, nothing to delete");
                    Ok(())
                }
                Err(error) => Err(error),
            };

            let result = match result {
                Ok(()) => self.store.clear_pending_deletion(collection, &id).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                tracing::warn!("{collection}/{id}: delete failed, kept queued: {error}");
                report.fail(SyncPhase::Delete, id, &error);
            }
        }
    }

    async fn push_document(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<PushOutcome> {
        let current = self.remote.get(collection, &document.id).await?;

        if let Some(remote) = &current {
            if same_fields(collection, remote, document) {
                self.store.record_synced(collection, document).await?;
                return Ok(PushOutcome::Unchanged);
            }
            let synced = self
                .store
                .synced_fingerprint(collection, &document.id)
                .await?;
            if synced.as_deref() == Some(document.fingerprint().as_str()) {
                // Not edited locally since the last exchange; the remote edit stays.
                tracing::debug!(
                    "{collection}/{}: remote changed, local copy untouched, not pushing",
                    document.id
                );
                return Ok(PushOutcome::Unchanged);
            }
        }

        let revision = current.as_ref().map(|remote| remote.revision.as_str());
        match self.remote.put(collection, document, revision).await {
            Ok(_) => {}
            Err(error) if error.is_conflict() => {
                tracing::debug!("{collection}/{}: revision conflict, retrying", document.id);
                self.retry_put(collection, document).await?;
            }
            Err(error) => return Err(error),
        }

        self.store.record_synced(collection, document).await?;
        tracing::debug!("{collection}/{}: pushed", document.id);
        Ok(PushOutcome::Written)
    }

    /// Re-read the remote and write its latest fields overlaid with ours.
    async fn retry_put(&self, collection: Collection, document: &Document) -> Result<()> {
        let latest = self.remote.get(collection, &document.id).await?;
        let (merged, revision) = match latest {
            Some(latest) => {
                let mut fields = latest.fields;
                fields.extend(document.fields.clone());
                (
                    Document::new(document.id.clone(), fields),
                    Some(latest.revision),
                )
            }
            None => (document.clone(), None),
        };
        self.remote
            .put(collection, &merged, revision.as_deref())
            .await?;
        Ok(())
    }
}

enum PushOutcome {
    Written,
    Unchanged,
}

fn same_fields(collection: Collection, remote: &RemoteDocument, local: &Document) -> bool {
    collection
        .schema()
        .normalize(&remote.fields)
        .is_ok_and(|fields| fields == local.fields)
}

fn abort(report: &mut CollectionReport, stage: &str, error: &Error) {
    tracing::warn!("{}: {stage}, skipping this pass: {error}", report.collection);
    report.aborted = Some(format!("{stage}: {error}"));
}
