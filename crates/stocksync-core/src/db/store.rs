//! Document operations and sync bookkeeping on the local store

use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde_json::{Number, Value};

use super::connection::LocalStore;
use super::live::Subscription;
use super::query::{select_columns, Query};
use crate::error::{Error, Result};
use crate::models::{Collection, CollectionSchema, Document, FieldKind, Fields};
use crate::util::unix_timestamp_millis;

impl LocalStore {
    /// Insert a new document.
    ///
    /// Fails with [`Error::ConstraintViolation`] if the id already exists.
    pub async fn insert(&self, collection: Collection, document: Document) -> Result<Document> {
        let document = document.normalized(collection)?;
        self.write(collection, move |conn| {
            insert_row(conn, collection, &document)?;
            tracing::debug!("Inserted {collection}/{}", document.id);
            Ok((document, true))
        })
        .await
    }

    /// Replace the fields of an existing document.
    pub async fn update(&self, collection: Collection, document: Document) -> Result<Document> {
        let document = document.normalized(collection)?;
        self.write(collection, move |conn| {
            let schema = collection.schema();
            let assignments = schema
                .fields
                .iter()
                .map(|field| format!("{} = ?", field.name))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE {} SET {assignments} WHERE id = ?", schema.table);

            let mut values = field_values(schema, &document)?;
            values.push(SqlValue::Text(document.id.clone()));
            let updated = conn.execute(&sql, params_from_iter(values))?;
            if updated == 0 {
                return Err(Error::NotFound(format!("{collection}/{}", document.id)));
            }
            Ok((document, true))
        })
        .await
    }

    /// Remove a document. Returns `false` if nothing was stored under `id`.
    ///
    /// The removal is queued for the remote in the same transaction.
    pub async fn remove(&self, collection: Collection, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.write(collection, move |conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = delete_row(&tx, collection, &id)?;
            if removed {
                tx.execute(
                    "INSERT OR REPLACE INTO pending_deletions (collection, doc_id, queued_at)
                     VALUES (?1, ?2, ?3)",
                    params![collection.name(), id, unix_timestamp_millis()],
                )?;
                clear_sync_state(&tx, collection, &id)?;
            }
            tx.commit()?;
            if removed {
                tracing::debug!("Removed {collection}/{id}, tombstone queued");
            }
            Ok((removed, removed))
        })
        .await
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
        self.read(|conn| get_row(conn, collection, id)).await
    }

    pub async fn contains(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.get(collection, id).await?.is_some())
    }

    /// Current snapshot of the documents matching `query`.
    pub async fn find(&self, collection: Collection, query: &Query) -> Result<Vec<Document>> {
        self.read(|conn| run_query(conn, collection, query)).await
    }

    /// Start a live query. The first result set is available immediately.
    pub async fn subscribe(&self, collection: Collection, query: Query) -> Result<Subscription> {
        let live = Arc::clone(self.live());
        self.read(move |conn| {
            let initial = run_query(conn, collection, &query)?;
            Ok(live.register(collection, query, initial))
        })
        .await
    }

    /// Ids removed locally whose tombstone has not reached the remote yet,
    /// oldest first.
    pub async fn pending_deletions(&self, collection: Collection) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT doc_id FROM pending_deletions
                 WHERE collection = ?1 ORDER BY queued_at, doc_id",
            )?;
            let ids = stmt
                .query_map([collection.name()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .await
    }

    pub async fn is_pending_deletion(&self, collection: Collection, id: &str) -> Result<bool> {
        self.read(|conn| is_pending(conn, collection, id)).await
    }

    pub async fn clear_pending_deletion(&self, collection: Collection, id: &str) -> Result<()> {
        self.read(|conn| {
            conn.execute(
                "DELETE FROM pending_deletions WHERE collection = ?1 AND doc_id = ?2",
                params![collection.name(), id],
            )?;
            Ok(())
        })
        .await
    }

    /// Fingerprint recorded at the last successful exchange of this document.
    pub async fn synced_fingerprint(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<String>> {
        self.read(|conn| {
            let fingerprint = conn
                .query_row(
                    "SELECT fingerprint FROM sync_state WHERE collection = ?1 AND doc_id = ?2",
                    params![collection.name(), id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fingerprint)
        })
        .await
    }

    /// Record `document` as agreed with the remote. Ignored if the document
    /// was removed locally in the meantime.
    pub async fn record_synced(&self, collection: Collection, document: &Document) -> Result<()> {
        self.read(|conn| record_sync_state(conn, collection, &document.id, &document.fingerprint()))
            .await
    }

    /// Insert a document pulled from the remote.
    ///
    /// Local entries win: nothing happens if the id exists locally or is
    /// queued for deletion. Returns whether the document was inserted.
    pub async fn apply_remote_insert(
        &self,
        collection: Collection,
        document: Document,
    ) -> Result<bool> {
        let document = document.normalized(collection)?;
        self.write(collection, move |conn| {
            if get_row(conn, collection, &document.id)?.is_some()
                || is_pending(conn, collection, &document.id)?
            {
                return Ok((false, false));
            }
            let tx = conn.unchecked_transaction()?;
            insert_row(&tx, collection, &document)?;
            record_sync_state(&tx, collection, &document.id, &document.fingerprint())?;
            tx.commit()?;
            Ok((true, true))
        })
        .await
    }

    /// Apply a remote deletion. Unlike [`LocalStore::remove`] no tombstone is
    /// queued. Returns whether a local entry was removed.
    pub async fn apply_remote_tombstone(&self, collection: Collection, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.write(collection, move |conn| {
            let tx = conn.unchecked_transaction()?;
            let removed = delete_row(&tx, collection, &id)?;
            clear_sync_state(&tx, collection, &id)?;
            tx.commit()?;
            Ok((removed, removed))
        })
        .await
    }
}

/// Execute `query` against `collection`.
pub(crate) fn run_query(
    conn: &Connection,
    collection: Collection,
    query: &Query,
) -> Result<Vec<Document>> {
    let schema = collection.schema();
    let (sql, values) = query.to_sql(schema)?;
    let mut stmt = conn.prepare(&sql)?;
    let documents = stmt
        .query_map(params_from_iter(values), |row| parse_row(schema, row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(documents)
}

fn get_row(conn: &Connection, collection: Collection, id: &str) -> Result<Option<Document>> {
    let schema = collection.schema();
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns(schema),
        schema.table
    );
    let document = conn
        .query_row(&sql, [id], |row| parse_row(schema, row))
        .optional()?;
    Ok(document)
}

fn insert_row(conn: &Connection, collection: Collection, document: &Document) -> Result<()> {
    let schema = collection.schema();
    let placeholders = vec!["?"; schema.fields.len() + 1].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        schema.table,
        select_columns(schema)
    );

    let mut values = vec![SqlValue::Text(document.id.clone())];
    values.extend(field_values(schema, document)?);

    match conn.execute(&sql, params_from_iter(values)) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Err(Error::ConstraintViolation(format!("{collection}/{}", document.id)))
        }
        Err(error) => Err(error.into()),
    }
}

fn delete_row(conn: &Connection, collection: Collection, id: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", collection.schema().table);
    Ok(conn.execute(&sql, [id])? > 0)
}

fn is_pending(conn: &Connection, collection: Collection, id: &str) -> Result<bool> {
    let pending = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pending_deletions WHERE collection = ?1 AND doc_id = ?2)",
        params![collection.name(), id],
        |row| row.get(0),
    )?;
    Ok(pending)
}

fn record_sync_state(
    conn: &Connection,
    collection: Collection,
    id: &str,
    fingerprint: &str,
) -> Result<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO sync_state (collection, doc_id, fingerprint, synced_at)
         SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM {} WHERE id = ?2)",
        collection.schema().table
    );
    conn.execute(
        &sql,
        params![collection.name(), id, fingerprint, unix_timestamp_millis()],
    )?;
    Ok(())
}

fn clear_sync_state(conn: &Connection, collection: Collection, id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM sync_state WHERE collection = ?1 AND doc_id = ?2",
        params![collection.name(), id],
    )?;
    Ok(())
}

/// Field values in schema order, ready to bind.
fn field_values(schema: &CollectionSchema, document: &Document) -> Result<Vec<SqlValue>> {
    schema
        .fields
        .iter()
        .map(|spec| {
            let value = document.get(spec.name);
            let converted = match spec.kind {
                FieldKind::Text => value
                    .and_then(Value::as_str)
                    .map(|text| SqlValue::Text(text.to_string())),
                FieldKind::Integer => value.and_then(Value::as_i64).map(SqlValue::Integer),
                FieldKind::Real => value.and_then(Value::as_f64).map(SqlValue::Real),
            };
            converted.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{}/{}: bad value for '{}'",
                    schema.table, document.id, spec.name
                ))
            })
        })
        .collect()
}

/// Parse a row selected with [`select_columns`].
fn parse_row(schema: &CollectionSchema, row: &Row<'_>) -> rusqlite::Result<Document> {
    let id: String = row.get(0)?;
    let mut fields = Fields::new();
    for (index, spec) in schema.fields.iter().enumerate() {
        let column = index + 1;
        let value = match spec.kind {
            FieldKind::Text => Value::String(row.get(column)?),
            FieldKind::Integer => Value::from(row.get::<_, i64>(column)?),
            FieldKind::Real => {
                Number::from_f64(row.get(column)?).map_or(Value::Null, Value::Number)
            }
        };
        fields.insert(spec.name.to_string(), value);
    }
    Ok(Document::new(id, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SortOrder;
    use crate::models::{Article, Business, Record};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    async fn store_with_business(name: &str) -> (LocalStore, Document) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let business = store
            .insert(
                Collection::Businesses,
                Business::new(name).into_document().unwrap(),
            )
            .await
            .unwrap();
        (store, business)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let (store, business) = store_with_business("Acme").await;
        let fetched = store
            .get(Collection::Businesses, &business.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, business);
        assert!(store.contains(Collection::Businesses, &business.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_insert_is_a_constraint_violation() {
        let (store, business) = store_with_business("Acme").await;
        let result = store.insert(Collection::Businesses, business).await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_requires_existing_document() {
        let (store, mut business) = store_with_business("Acme").await;
        business.fields.insert("name".into(), json!("Acme Ltd"));
        store
            .update(Collection::Businesses, business.clone())
            .await
            .unwrap();
        let fetched = store.get(Collection::Businesses, &business.id).await.unwrap();
        assert_eq!(fetched.unwrap().get("name"), Some(&json!("Acme Ltd")));

        let missing = Document::new("nope", business.fields.clone());
        let result = store.update(Collection::Businesses, missing).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_queues_a_pending_deletion() {
        let (store, business) = store_with_business("Acme").await;

        assert!(store.remove(Collection::Businesses, &business.id).await.unwrap());
        assert!(!store.remove(Collection::Businesses, &business.id).await.unwrap());
        assert!(!store.remove(Collection::Businesses, "never-existed").await.unwrap());

        assert_eq!(
            store.pending_deletions(Collection::Businesses).await.unwrap(),
            vec![business.id.clone()]
        );
        store
            .clear_pending_deletion(Collection::Businesses, &business.id)
            .await
            .unwrap();
        assert!(!store
            .is_pending_deletion(Collection::Businesses, &business.id)
            .await
            .unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_filters_and_sorts() {
        let store = LocalStore::open_in_memory().await.unwrap();
        for (business, name, qty) in [("b1", "Nut", 5), ("b1", "Bolt", 2), ("b2", "Gear", 9)] {
            let article = Article::new(business, name, qty, 1.5);
            store
                .insert(Collection::Articles, article.into_document().unwrap())
                .await
                .unwrap();
        }

        let query = Query::all()
            .where_eq("business_id", "b1")
            .sort_by("name", SortOrder::Asc);
        let found = store.find(Collection::Articles, &query).await.unwrap();
        let names: Vec<_> = found.iter().map(|doc| doc.get("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("Bolt")), Some(json!("Nut"))]);

        let article = Article::from_document(found[0].clone()).unwrap();
        assert_eq!(article.qty, 2);
        assert!((article.selling_price - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_insert_never_overwrites_local_entries() {
        let (store, business) = store_with_business("Local name").await;

        let mut remote = business.clone();
        remote.fields.insert("name".into(), json!("Remote name"));
        assert!(!store
            .apply_remote_insert(Collection::Businesses, remote)
            .await
            .unwrap());
        let kept = store.get(Collection::Businesses, &business.id).await.unwrap();
        assert_eq!(kept.unwrap().get("name"), Some(&json!("Local name")));

        let fresh = Document::new("b9", business.fields.clone());
        assert!(store
            .apply_remote_insert(Collection::Businesses, fresh.clone())
            .await
            .unwrap());
        assert_eq!(
            store
                .synced_fingerprint(Collection::Businesses, "b9")
                .await
                .unwrap(),
            Some(fresh.fingerprint())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_insert_skips_ids_pending_deletion() {
        let (store, business) = store_with_business("Acme").await;
        store.remove(Collection::Businesses, &business.id).await.unwrap();

        assert!(!store
            .apply_remote_insert(Collection::Businesses, business.clone())
            .await
            .unwrap());
        assert!(!store.contains(Collection::Businesses, &business.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_tombstone_does_not_queue_deletion() {
        let (store, business) = store_with_business("Acme").await;
        store
            .record_synced(Collection::Businesses, &business)
            .await
            .unwrap();

        assert!(store
            .apply_remote_tombstone(Collection::Businesses, &business.id)
            .await
            .unwrap());
        assert!(store
            .pending_deletions(Collection::Businesses)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .synced_fingerprint(Collection::Businesses, &business.id)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_synced_ignores_removed_documents() {
        let (store, business) = store_with_business("Acme").await;
        store.remove(Collection::Businesses, &business.id).await.unwrap();
        store
            .record_synced(Collection::Businesses, &business)
            .await
            .unwrap();
        assert_eq!(
            store
                .synced_fingerprint(Collection::Businesses, &business.id)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn documents_survive_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("inventory.db");

        let store = LocalStore::open(&path).await.unwrap();
        let business = store
            .insert(
                Collection::Businesses,
                Business::new("Acme").into_document().unwrap(),
            )
            .await
            .unwrap();
        store.close().await.unwrap();

        let reopened = LocalStore::open(&path).await.unwrap();
        assert_eq!(
            reopened
                .get(Collection::Businesses, &business.id)
                .await
                .unwrap(),
            Some(business)
        );
    }
}
