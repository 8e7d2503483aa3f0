//! Generic document model shared by the local store and the remote client

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Field map of a document, without its id.
pub type Fields = Map<String, Value>;

/// A named, independent namespace of documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Businesses,
    Articles,
}

impl Collection {
    /// Every collection, parents before children.
    pub const ALL: [Self; 2] = [Self::Businesses, Self::Articles];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Businesses => "businesses",
            Self::Articles => "articles",
        }
    }

    pub const fn schema(self) -> &'static CollectionSchema {
        match self {
            Self::Businesses => &BUSINESS_SCHEMA,
            Self::Articles => &ARTICLE_SCHEMA,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection '{s}'")))
    }
}

/// Storage type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Per-collection schema: table name plus ordered domain fields (the `id` key is implicit).
#[derive(Debug, PartialEq, Eq)]
pub struct CollectionSchema {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

static BUSINESS_SCHEMA: CollectionSchema = CollectionSchema {
    table: "businesses",
    fields: &[FieldSpec {
        name: "name",
        kind: FieldKind::Text,
    }],
};

static ARTICLE_SCHEMA: CollectionSchema = CollectionSchema {
    table: "articles",
    fields: &[
        FieldSpec {
            name: "name",
            kind: FieldKind::Text,
        },
        FieldSpec {
            name: "qty",
            kind: FieldKind::Integer,
        },
        FieldSpec {
            name: "selling_price",
            kind: FieldKind::Real,
        },
        FieldSpec {
            name: "business_id",
            kind: FieldKind::Text,
        },
    ],
};

impl CollectionSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Check `fields` against the schema and keep only schema fields.
    ///
    /// Integers are accepted for `Real` fields and stored as floats, so a value
    /// written as `10` and read back as `10.0` compares equal after normalization.
    pub fn normalize(&self, fields: &Fields) -> Result<Fields> {
        let mut normalized = Fields::new();
        for spec in self.fields {
            let value = fields.get(spec.name).ok_or_else(|| {
                Error::InvalidInput(format!("{}: missing field '{}'", self.table, spec.name))
            })?;
            normalized.insert(spec.name.to_string(), self.normalize_value(spec, value)?);
        }
        Ok(normalized)
    }

    pub(crate) fn normalize_value(&self, spec: &FieldSpec, value: &Value) -> Result<Value> {
        let invalid = || {
            Error::InvalidInput(format!(
                "{}: field '{}' expects {:?}, got {value}",
                self.table, spec.name, spec.kind
            ))
        };

        match spec.kind {
            FieldKind::Text => value
                .as_str()
                .map(|text| Value::String(text.to_string()))
                .ok_or_else(invalid),
            FieldKind::Integer => value.as_i64().map(Value::from).ok_or_else(invalid),
            FieldKind::Real => value
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
        }
    }
}

/// Generate a new client-side document id (UUID v7, time-sortable).
pub fn new_document_id() -> String {
    Uuid::now_v7().to_string()
}

/// Reject ids the remote cannot store as plain documents.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::InvalidInput("document id must not be empty".into()));
    }
    if id.starts_with('_') {
        return Err(Error::InvalidInput(format!(
            "document id '{id}' must not start with '_'"
        )));
    }
    Ok(())
}

/// A domain record as seen by the store and the sync layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Canonical key-sorted JSON rendering of the fields.
    pub fn fingerprint(&self) -> String {
        fingerprint_fields(&self.fields)
    }

    /// Validate id and fields against the collection schema.
    pub fn normalized(self, collection: Collection) -> Result<Self> {
        validate_document_id(&self.id)?;
        let fields = collection.schema().normalize(&self.fields)?;
        Ok(Self {
            id: self.id,
            fields,
        })
    }
}

pub(crate) fn fingerprint_fields(fields: &Fields) -> String {
    let sorted: BTreeMap<&String, &Value> = fields.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn collection_parses_names() {
        assert_eq!("businesses".parse::<Collection>().unwrap(), Collection::Businesses);
        assert_eq!(" Articles ".parse::<Collection>().unwrap(), Collection::Articles);
        assert!("widgets".parse::<Collection>().is_err());
    }

    #[test]
    fn normalize_drops_unknown_and_reserved_fields() {
        let raw = fields(json!({"name": "Acme", "_rev": "1-abc", "owner": "x"}));
        let normalized = Collection::Businesses.schema().normalize(&raw).unwrap();
        assert_eq!(normalized, fields(json!({"name": "Acme"})));
    }

    #[test]
    fn normalize_rejects_missing_and_mistyped_fields() {
        let schema = Collection::Articles.schema();
        let missing = fields(json!({"name": "Bolt", "qty": 1, "selling_price": 2.5}));
        assert!(schema.normalize(&missing).is_err());

        let mistyped = fields(json!({
            "name": "Bolt", "qty": "one", "selling_price": 2.5, "business_id": "b1"
        }));
        assert!(schema.normalize(&mistyped).is_err());
    }

    #[test]
    fn normalize_widens_integer_prices() {
        let raw = fields(json!({
            "name": "Bolt", "qty": 3, "selling_price": 10, "business_id": "b1"
        }));
        let normalized = Collection::Articles.schema().normalize(&raw).unwrap();
        assert_eq!(normalized.get("selling_price"), Some(&json!(10.0)));
    }

    #[test]
    fn fingerprint_is_order_independent() {
        let a = Document::new("a1", fields(json!({"name": "Bolt", "qty": 1})));
        let mut reordered = Fields::new();
        reordered.insert("qty".into(), json!(1));
        reordered.insert("name".into(), json!("Bolt"));
        let b = Document::new("a1", reordered);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn document_ids_are_validated() {
        assert!(validate_document_id("b1").is_ok());
        assert!(validate_document_id("  ").is_err());
        assert!(validate_document_id("_design/x").is_err());
        assert_ne!(new_document_id(), new_document_id());
    }
}
