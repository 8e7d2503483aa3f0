//! Business model

use serde::{Deserialize, Serialize};

use super::document::{new_document_id, Collection};
use super::record::Record;

/// A business owning a set of articles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    /// Client-assigned identifier, stable across replicas
    pub id: String,
    pub name: String,
}

impl Business {
    /// Create a new business with a freshly generated id
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_document_id(),
            name: name.into(),
        }
    }
}

impl Record for Business {
    const COLLECTION: Collection = Collection::Businesses;

    fn id(&self) -> &str {
        &self.id
    }
}
