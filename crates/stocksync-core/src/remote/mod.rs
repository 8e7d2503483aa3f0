//! Remote document store access
//!
//! [`RemoteStore`] is the seam between the sync engine and the remote
//! database. [`CouchClient`] talks to a CouchDB-compatible server over HTTP;
//! [`MemoryRemote`] keeps everything in process.

mod couch;
mod memory;

use async_trait::async_trait;

pub use couch::CouchClient;
pub use memory::MemoryRemote;

use crate::error::Result;
use crate::models::{Collection, Document, Fields};

/// A live document as stored on the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub revision: String,
    /// Domain fields only; reserved `_`-prefixed keys are stripped.
    pub fields: Fields,
}

impl RemoteDocument {
    pub fn to_document(&self) -> Document {
        Document::new(self.id.clone(), self.fields.clone())
    }
}

/// One row of a remote listing.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEntry {
    Live(RemoteDocument),
    Tombstone { id: String, revision: String },
}

impl RemoteEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::Live(document) => &document.id,
            Self::Tombstone { id, .. } => id,
        }
    }

    pub fn revision(&self) -> &str {
        match self {
            Self::Live(document) => &document.revision,
            Self::Tombstone { revision, .. } => revision,
        }
    }

    pub const fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }
}

/// Versioned document storage with optimistic concurrency.
///
/// Every write carries the revision the caller last read; a stale or missing
/// revision on an existing document fails with [`crate::Error::Conflict`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Make sure the backing database for `collection` exists.
    async fn ensure_collection(&self, _collection: Collection) -> Result<()> {
        Ok(())
    }

    /// Every live document and tombstone in the collection, in no particular
    /// order.
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<RemoteEntry>>;

    /// Current live document, `None` if absent or deleted.
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<RemoteDocument>>;

    /// Create or update a document and return its new revision.
    ///
    /// `revision` must be `None` to create and the current revision to update.
    async fn put(
        &self,
        collection: Collection,
        document: &Document,
        revision: Option<&str>,
    ) -> Result<String>;

    /// Replace the document with a tombstone at its current revision.
    ///
    /// Fails with [`crate::Error::NotFound`] when the remote has never seen `id`.
    async fn mark_deleted(&self, collection: Collection, id: &str) -> Result<()>;

    /// Cheap liveness check; `false` on any failure.
    async fn ping(&self) -> bool;
}
