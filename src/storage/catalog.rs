//! Read-only product lookup. Product CRUD lives outside the ledger core; this is the only view
//! of it the core needs.

use crate::domain::error::LedgerResult;
use crate::domain::model::Product;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: &str) -> LedgerResult<Option<Product>>;
}

/// Reads the `products` table maintained by the catalog service.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn get_product(&self, id: &str) -> LedgerResult<Option<Product>> {
        let row = sqlx::query("SELECT id, name, price, file FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Product {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                price: row.try_get("price")?,
                file: row.try_get("file")?,
            })),
            None => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.insert(product);
        }
        catalog
    }

    pub fn insert(&self, product: Product) {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        products.insert(product.id.clone(), product);
    }

    pub fn remove(&self, id: &str) -> Option<Product> {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        products.remove(id)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, id: &str) -> LedgerResult<Option<Product>> {
        let products = self.products.read().unwrap_or_else(|e| e.into_inner());
        Ok(products.get(id).cloned())
    }
}
