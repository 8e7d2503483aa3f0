//! Business and article operations with background sync.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;

use crate::db::{LocalStore, Query, SortOrder, Subscription};
use crate::error::{Error, Result};
use crate::models::{Article, ArticleChanges, Business, Collection, Document, Record};
use crate::sync::{CollectionReport, SyncEngine};

/// Inventory operations over the local store.
///
/// Every mutation is written locally first. When a sync engine is attached the
/// touched collections are then synced in the background; failures there are
/// logged by the engine and never fail the mutation.
#[derive(Clone)]
pub struct InventoryService {
    store: LocalStore,
    engine: Option<SyncEngine>,
    background: Arc<Mutex<Vec<JoinHandle<CollectionReport>>>>,
}

impl InventoryService {
    /// Local-only service; nothing is sent to a remote.
    pub fn local(store: LocalStore) -> Self {
        tracing::info!("Running in local-only mode, changes stay on this device");
        Self {
            store,
            engine: None,
            background: Arc::default(),
        }
    }

    /// Service that syncs after each mutation through `engine`.
    pub fn with_sync(engine: SyncEngine) -> Self {
        Self {
            store: engine.store().clone(),
            engine: Some(engine),
            background: Arc::default(),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn engine(&self) -> Option<&SyncEngine> {
        self.engine.as_ref()
    }

    pub async fn create_business(&self, name: &str) -> Result<Business> {
        let business = Business::new(required_name(name)?);
        self.store
            .insert(Collection::Businesses, business.clone().into_document()?)
            .await?;
        tracing::info!("Created business {}", business.id);
        self.sync_in_background(&[Collection::Businesses]);
        Ok(business)
    }

    pub async fn business(&self, id: &str) -> Result<Business> {
        self.record(id).await
    }

    pub async fn rename_business(&self, id: &str, name: &str) -> Result<Business> {
        let mut business: Business = self.record(id).await?;
        business.name = required_name(name)?;
        self.store
            .update(Collection::Businesses, business.clone().into_document()?)
            .await?;
        self.sync_in_background(&[Collection::Businesses]);
        Ok(business)
    }

    /// All businesses, by name.
    pub async fn list_businesses(&self) -> Result<Vec<Business>> {
        let documents = self
            .store
            .find(Collection::Businesses, &business_query())
            .await?;
        decode_records(documents)
    }

    /// Delete a business and, before it, every article it owns. Returns the
    /// number of articles deleted.
    pub async fn delete_business(&self, id: &str) -> Result<usize> {
        if !self.store.contains(Collection::Businesses, id).await? {
            return Err(Error::NotFound(format!("{}/{id}", Collection::Businesses)));
        }

        let articles = self
            .store
            .find(Collection::Articles, &article_query(id))
            .await?;
        for article in &articles {
            self.store.remove(Collection::Articles, &article.id).await?;
        }
        self.store.remove(Collection::Businesses, id).await?;
        tracing::info!("Deleted business {id} and {} articles", articles.len());

        self.sync_in_background(&[Collection::Businesses, Collection::Articles]);
        Ok(articles.len())
    }

    /// Live list of businesses, by name.
    pub async fn watch_businesses(&self) -> Result<Subscription> {
        self.store
            .subscribe(Collection::Businesses, business_query())
            .await
    }

    pub async fn create_article(
        &self,
        business_id: &str,
        name: &str,
        qty: i64,
        selling_price: f64,
    ) -> Result<Article> {
        if !self.store.contains(Collection::Businesses, business_id).await? {
            return Err(Error::NotFound(format!(
                "{}/{business_id}",
                Collection::Businesses
            )));
        }

        let article = Article::new(business_id, required_name(name)?, qty, selling_price);
        validate_article(&article)?;
        self.store
            .insert(Collection::Articles, article.clone().into_document()?)
            .await?;
        self.sync_in_background(&[Collection::Articles]);
        Ok(article)
    }

    pub async fn article(&self, id: &str) -> Result<Article> {
        self.record(id).await
    }

    /// Apply `changes` to an article. Empty changes return it untouched.
    pub async fn update_article(&self, id: &str, changes: ArticleChanges) -> Result<Article> {
        let mut article: Article = self.record(id).await?;
        if changes.is_empty() {
            return Ok(article);
        }

        let changes = ArticleChanges {
            name: changes.name.as_deref().map(required_name).transpose()?,
            ..changes
        };
        changes.apply(&mut article);
        validate_article(&article)?;

        self.store
            .update(Collection::Articles, article.clone().into_document()?)
            .await?;
        self.sync_in_background(&[Collection::Articles]);
        Ok(article)
    }

    /// Articles of one business, by name.
    pub async fn list_articles(&self, business_id: &str) -> Result<Vec<Article>> {
        let documents = self
            .store
            .find(Collection::Articles, &article_query(business_id))
            .await?;
        decode_records(documents)
    }

    pub async fn delete_article(&self, id: &str) -> Result<()> {
        if !self.store.remove(Collection::Articles, id).await? {
            return Err(Error::NotFound(format!("{}/{id}", Collection::Articles)));
        }
        self.sync_in_background(&[Collection::Articles]);
        Ok(())
    }

    /// Live list of one business's articles, by name.
    pub async fn watch_articles(&self, business_id: &str) -> Result<Subscription> {
        self.store
            .subscribe(Collection::Articles, article_query(business_id))
            .await
    }

    /// Wait for background syncs that are still outstanding and return their
    /// reports.
    pub async fn wait_for_background_sync(&self) -> Vec<CollectionReport> {
        let handles = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(error) => tracing::warn!("Background sync task failed: {error}"),
            }
        }
        reports
    }

    async fn record<R: Record>(&self, id: &str) -> Result<R> {
        let document = self
            .store
            .get(R::COLLECTION, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{}/{id}", R::COLLECTION)))?;
        R::from_document(document)
    }

    fn sync_in_background(&self, collections: &[Collection]) {
        let Some(engine) = &self.engine else {
            return;
        };
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        background.retain(|handle| !handle.is_finished());
        for collection in collections {
            background.push(engine.spawn_sync_collection(*collection));
        }
    }
}

/// Convert store documents into typed records.
pub fn decode_records<R: Record>(documents: Vec<Document>) -> Result<Vec<R>> {
    documents.into_iter().map(R::from_document).collect()
}

fn business_query() -> Query {
    Query::all().sort_by("name", SortOrder::Asc)
}

fn article_query(business_id: &str) -> Query {
    Query::all()
        .where_eq("business_id", business_id)
        .sort_by("name", SortOrder::Asc)
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn validate_article(article: &Article) -> Result<()> {
    if article.qty < 0 {
        return Err(Error::InvalidInput(format!(
            "quantity must not be negative, got {}",
            article.qty
        )));
    }
    if !article.selling_price.is_finite() || article.selling_price < 0.0 {
        return Err(Error::InvalidInput(format!(
            "selling price must be a non-negative number, got {}",
            article.selling_price
        )));
    }
    Ok(())
}
