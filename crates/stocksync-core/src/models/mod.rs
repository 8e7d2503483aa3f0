//! Data models for Stocksync

mod article;
mod business;
mod document;
mod record;

pub use article::{Article, ArticleChanges};
pub use business::Business;
pub use document::{
    new_document_id, validate_document_id, Collection, CollectionSchema, Document, FieldKind,
    FieldSpec, Fields,
};
pub use record::Record;

pub(crate) use document::fingerprint_fields;
