//! Article model

use serde::{Deserialize, Serialize};

use super::document::{new_document_id, Collection};
use super::record::Record;

/// A stock item belonging to a business
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub name: String,
    pub qty: i64,
    pub selling_price: f64,
    /// Id of the owning business
    pub business_id: String,
}

impl Article {
    #[must_use]
    pub fn new(
        business_id: impl Into<String>,
        name: impl Into<String>,
        qty: i64,
        selling_price: f64,
    ) -> Self {
        Self {
            id: new_document_id(),
            name: name.into(),
            qty,
            selling_price,
            business_id: business_id.into(),
        }
    }
}

/// Partial update applied by `InventoryService::update_article`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleChanges {
    pub name: Option<String>,
    pub qty: Option<i64>,
    pub selling_price: Option<f64>,
}

impl ArticleChanges {
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.qty.is_none() && self.selling_price.is_none()
    }

    pub(crate) fn apply(self, article: &mut Article) {
        if let Some(name) = self.name {
            article.name = name;
        }
        if let Some(qty) = self.qty {
            article.qty = qty;
        }
        if let Some(selling_price) = self.selling_price {
            article.selling_price = selling_price;
        }
    }
}

impl Record for Article {
    const COLLECTION: Collection = Collection::Articles;

    fn id(&self) -> &str {
        &self.id
    }
}
