//! Typed views over documents

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::document::{Collection, Document, Fields};
use crate::error::{Error, Result};

/// A typed record stored in one collection.
///
/// The record serializes to a flat JSON object whose `id` key becomes the
/// document id and whose remaining keys become the document fields.
pub trait Record: Serialize + DeserializeOwned + Sized {
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    fn into_document(self) -> Result<Document> {
        let Value::Object(mut fields) = serde_json::to_value(&self)? else {
            return Err(Error::InvalidInput(format!(
                "{} record must serialize to an object",
                Self::COLLECTION
            )));
        };
        let id = match fields.remove("id") {
            Some(Value::String(id)) => id,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{} record is missing a string id",
                    Self::COLLECTION
                )))
            }
        };
        Document::new(id, fields).normalized(Self::COLLECTION)
    }

    fn from_document(document: Document) -> Result<Self> {
        let mut fields: Fields = document.fields;
        fields.insert("id".into(), Value::String(document.id));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}
