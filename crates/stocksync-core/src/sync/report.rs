//! Sync pass outcomes

use serde::Serialize;

use crate::models::Collection;

/// Stage of a pass in which a document failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Pull,
    Push,
    Delete,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub phase: SyncPhase,
    pub id: String,
    pub error: String,
}

/// What one reconciliation of a collection did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collection: Collection,
    /// Passes run back to back by the caller that led this sync
    pub passes: u32,
    /// Remote documents inserted locally
    pub pulled: usize,
    /// Local entries removed because of remote tombstones
    pub removed: usize,
    /// Local documents written to the remote
    pub pushed: usize,
    /// Local documents that needed no write
    pub unchanged: usize,
    /// Queued local deletions written to the remote as tombstones
    pub tombstoned: usize,
    /// Documents skipped after a second revision conflict
    pub conflicts: Vec<String>,
    pub failures: Vec<DocumentFailure>,
    /// Set when the pass stopped before pushing
    pub aborted: Option<String>,
    /// Set when this caller waited for a pass started on its behalf
    pub deferred: bool,
}

impl CollectionReport {
    pub const fn new(collection: Collection) -> Self {
        Self {
            collection,
            passes: 0,
            pulled: 0,
            removed: 0,
            pushed: 0,
            unchanged: 0,
            tombstoned: 0,
            conflicts: Vec::new(),
            failures: Vec::new(),
            aborted: None,
            deferred: false,
        }
    }

    pub(crate) fn interrupted(collection: Collection) -> Self {
        let mut report = Self::new(collection);
        report.aborted = Some("sync pass was interrupted".to_string());
        report
    }

    pub(crate) fn fail(&mut self, phase: SyncPhase, id: impl Into<String>, error: impl ToString) {
        self.failures.push(DocumentFailure {
            phase,
            id: id.into(),
            error: error.to_string(),
        });
    }

    /// No abort, conflict or failure.
    pub fn is_clean(&self) -> bool {
        self.aborted.is_none() && self.conflicts.is_empty() && self.failures.is_empty()
    }
}

/// Reports for every collection of one `sync_all` call, in sync order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub collections: Vec<CollectionReport>,
}

impl SyncReport {
    pub fn collection(&self, collection: Collection) -> Option<&CollectionReport> {
        self.collections
            .iter()
            .find(|report| report.collection == collection)
    }

    pub fn is_clean(&self) -> bool {
        self.collections.iter().all(CollectionReport::is_clean)
    }
}
