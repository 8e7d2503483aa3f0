//! Query values for `find` and `subscribe`

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{CollectionSchema, FieldKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A re-executable selection over one collection.
///
/// Filters are equality tests combined with AND. Results are ordered by the
/// sort field (default `id`) with ties broken by `id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<(String, Value)>,
    sort: Option<(String, SortOrder)>,
}

impl Query {
    /// Match every document in the collection.
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    /// Build the SQL statement and parameters for this query.
    pub(crate) fn to_sql(&self, schema: &CollectionSchema) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = format!("SELECT {} FROM {}", select_columns(schema), schema.table);
        let mut params = Vec::with_capacity(self.filters.len());

        for (index, (field, value)) in self.filters.iter().enumerate() {
            let kind = column_kind(schema, field)?;
            sql.push_str(if index == 0 { " WHERE " } else { " AND " });
            sql.push_str(field);
            sql.push_str(" = ?");
            params.push(filter_value(schema, field, kind, value)?);
        }

        let (sort_field, order) = self
            .sort
            .as_ref()
            .map_or(("id", SortOrder::Asc), |(field, order)| (field.as_str(), *order));
        column_kind(schema, sort_field)?;
        sql.push_str(&format!(" ORDER BY {sort_field} {}", order.sql()));
        if sort_field != "id" {
            sql.push_str(", id ASC");
        }

        Ok((sql, params))
    }
}

/// `id` followed by the schema fields, in schema order.
pub(crate) fn select_columns(schema: &CollectionSchema) -> String {
    std::iter::once("id")
        .chain(schema.fields.iter().map(|field| field.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_kind(schema: &CollectionSchema, field: &str) -> Result<FieldKind> {
    if field == "id" {
        return Ok(FieldKind::Text);
    }
    schema
        .field(field)
        .map(|spec| spec.kind)
        .ok_or_else(|| Error::InvalidInput(format!("{}: unknown field '{field}'", schema.table)))
}

fn filter_value(
    schema: &CollectionSchema,
    field: &str,
    kind: FieldKind,
    value: &Value,
) -> Result<SqlValue> {
    let converted = match kind {
        FieldKind::Text => value.as_str().map(|text| SqlValue::Text(text.to_string())),
        FieldKind::Integer => value.as_i64().map(SqlValue::Integer),
        FieldKind::Real => value.as_f64().map(SqlValue::Real),
    };
    converted.ok_or_else(|| {
        Error::InvalidInput(format!(
            "{}: cannot compare field '{field}' with {value}",
            schema.table
        ))
    })
}
