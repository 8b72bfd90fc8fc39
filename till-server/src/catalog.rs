//! Catalog collaborator
//!
//! The product catalog is external: the engine reads product snapshots from
//! it and pushes durable stock decrements back at reservation commit. The
//! trait keeps the engine independent of whatever store actually backs the
//! catalog; `MemoryCatalog` serves tests and embedded deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::models::Product;
use std::collections::HashMap;
use thiserror::Error;

/// Catalog collaborator errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("product not found: {0}")]
    NotFound(i64),

    /// Durable stock would go negative: a concurrent external adjustment
    /// dropped stock below the committed reservation.
    #[error("stock conflict for product {0}")]
    Conflict(i64),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// External product catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a single product snapshot
    async fn get_product(&self, id: i64) -> CatalogResult<Option<Product>>;

    /// Fetch all active products (engine startup seed)
    async fn get_products(&self) -> CatalogResult<Vec<Product>>;

    /// Durably decrement stock; fails with `Conflict` if the count would go
    /// negative. Called only at reservation commit.
    async fn decrement_stock(&self, id: i64, qty: i64) -> CatalogResult<()>;

    /// Compensating increment for a commit that failed mid-flight. Must not
    /// fail for counts the engine previously decremented.
    async fn restore_stock(&self, id: i64, qty: i64) -> CatalogResult<()>;
}

/// In-memory catalog implementation
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<i64, Product>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::new();
        catalog.upsert_all(products);
        catalog
    }

    pub fn upsert(&self, product: Product) {
        self.products.write().insert(product.id, product);
    }

    pub fn upsert_all(&self, products: impl IntoIterator<Item = Product>) {
        let mut map = self.products.write();
        for product in products {
            map.insert(product.id, product);
        }
    }

    /// Current durable stock, for test assertions
    pub fn stock_of(&self, id: i64) -> Option<i64> {
        self.products.read().get(&id).map(|p| p.stock)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_product(&self, id: i64) -> CatalogResult<Option<Product>> {
        Ok(self.products.read().get(&id).cloned())
    }

    async fn get_products(&self) -> CatalogResult<Vec<Product>> {
        Ok(self
            .products
            .read()
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn decrement_stock(&self, id: i64, qty: i64) -> CatalogResult<()> {
        let mut map = self.products.write();
        let product = map.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        if product.stock < qty {
            return Err(CatalogError::Conflict(id));
        }
        product.stock -= qty;
        Ok(())
    }

    async fn restore_stock(&self, id: i64, qty: i64) -> CatalogResult<()> {
        let mut map = self.products.write();
        let product = map.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        product.stock += qty;
        Ok(())
    }
}
