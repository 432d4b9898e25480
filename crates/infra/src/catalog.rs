//! Catalog collaborator port.
//!
//! Products and suppliers are owned elsewhere; stock only needs to know that
//! they exist and where a product's reorder threshold sits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use stockflow_core::{DomainError, ProductId, SupplierId};

pub trait Catalog: Send + Sync {
    fn product_exists(&self, product_id: ProductId) -> bool;

    fn reorder_level(&self, product_id: ProductId) -> Option<i64>;

    fn supplier_exists(&self, supplier_id: SupplierId) -> bool;

    /// Every known product (alert scans walk this list).
    fn products(&self) -> Vec<ProductId>;

    fn require_product(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.product_exists(product_id) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("product {product_id}")))
        }
    }

    fn require_supplier(&self, supplier_id: SupplierId) -> Result<(), DomainError> {
        if self.supplier_exists(supplier_id) {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("supplier {supplier_id}")))
        }
    }
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product_exists(&self, product_id: ProductId) -> bool {
        (**self).product_exists(product_id)
    }

    fn reorder_level(&self, product_id: ProductId) -> Option<i64> {
        (**self).reorder_level(product_id)
    }

    fn supplier_exists(&self, supplier_id: SupplierId) -> bool {
        (**self).supplier_exists(supplier_id)
    }

    fn products(&self) -> Vec<ProductId> {
        (**self).products()
    }
}

#[derive(Debug, Default)]
struct CatalogEntries {
    products: HashMap<ProductId, Option<i64>>,
    suppliers: HashSet<SupplierId>,
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    inner: RwLock<CatalogEntries>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product_id: ProductId, reorder_level: Option<i64>) {
        if let Ok(mut c) = self.inner.write() {
            c.products.insert(product_id, reorder_level);
        }
    }

    pub fn add_supplier(&self, supplier_id: SupplierId) {
        if let Ok(mut c) = self.inner.write() {
            c.suppliers.insert(supplier_id);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn product_exists(&self, product_id: ProductId) -> bool {
        self.inner
            .read()
            .is_ok_and(|c| c.products.contains_key(&product_id))
    }

    fn reorder_level(&self, product_id: ProductId) -> Option<i64> {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.products.get(&product_id).copied().flatten())
    }

    fn supplier_exists(&self, supplier_id: SupplierId) -> bool {
        self.inner
            .read()
            .is_ok_and(|c| c.suppliers.contains(&supplier_id))
    }

    fn products(&self) -> Vec<ProductId> {
        self.inner
            .read()
            .map(|c| c.products.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_core::AggregateId;

    #[test]
    fn unknown_references_are_not_found() {
        let catalog = InMemoryCatalog::new();
        let p = ProductId::new(AggregateId::new());
        assert!(matches!(catalog.require_product(p), Err(DomainError::NotFound(_))));

        catalog.add_product(p, Some(5));
        assert!(catalog.require_product(p).is_ok());
        assert_eq!(catalog.reorder_level(p), Some(5));
        assert_eq!(catalog.products(), vec![p]);
    }
}
