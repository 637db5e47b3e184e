//! Supplier -> eligible products index.
//!
//! Purchase lines may only pair a product with a supplier listed in the
//! product's `supplier_ids`. The index is rebuilt only when the content
//! version of the `(id, supplier_ids)` projection changes; a list-length
//! check alone misses same-length replacements.

use std::collections::HashMap;

use tracing::trace;

use crate::models::Product;

/// Upper bound on purchase-line product suggestions.
pub const MAX_CANDIDATES: usize = 80;

/// Order-dependent fingerprint of the product list's eligibility data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentVersion {
    pub len: usize,
    pub hash: u32,
}

/// Rolling hash over each product's id and raw supplier-id string. Prices,
/// names and stock do not participate.
pub fn content_version(products: &[Product]) -> ContentVersion {
    let mut h: u32 = 0;
    for p in products {
        for c in p.id.chars() {
            h = h.wrapping_mul(17).wrapping_add(c as u32);
        }
        for c in p.supplier_ids.raw().chars() {
            h = h.wrapping_mul(31).wrapping_add(c as u32);
        }
    }
    ContentVersion {
        len: products.len(),
        hash: h,
    }
}

/// Exact id membership. Supplier names never participate.
pub fn has_supplier(product: &Product, supplier_id: &str) -> bool {
    product.supplier_ids.contains(supplier_id)
}

#[derive(Debug, Default)]
pub struct SupplierIndex {
    version: Option<ContentVersion>,
    buckets: HashMap<String, Vec<String>>,
}

impl SupplierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from `products` unless the content version is unchanged and
    /// `force` is false. Returns whether a rebuild happened.
    pub fn build(&mut self, products: &[Product], force: bool) -> bool {
        let version = content_version(products);
        if !force && self.version == Some(version) {
            return false;
        }

        let mut buckets: HashMap<String, Vec<String>> = HashMap::new();
        for p in products {
            for sid in p.supplier_ids.iter() {
                buckets.entry(sid.to_string()).or_default().push(p.id.clone());
            }
        }
        trace!(
            products = products.len(),
            suppliers = buckets.len(),
            hash = version.hash,
            "supplier index rebuilt"
        );
        self.buckets = buckets;
        self.version = Some(version);
        true
    }

    pub fn version(&self) -> Option<ContentVersion> {
        self.version
    }

    /// Product ids eligible for `supplier_id`, in product-list order.
    pub fn product_ids(&self, supplier_id: &str) -> &[String] {
        self.buckets
            .get(supplier_id.trim())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn supplier_ids(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Resolve the bucket against the current product list.
    pub fn products_for<'a>(&self, supplier_id: &str, products: &'a [Product]) -> Vec<&'a Product> {
        let ids = self.product_ids(supplier_id);
        if ids.is_empty() {
            return Vec::new();
        }
        let by_id: HashMap<&str, &Product> =
            products.iter().map(|p| (p.id.as_str(), p)).collect();
        ids.iter().filter_map(|id| by_id.get(id.as_str()).copied()).collect()
    }

    /// Eligible products for a purchase line, filtered by SKU or name
    /// keyword and capped at `limit`.
    pub fn candidates<'a>(
        &self,
        supplier_id: &str,
        keyword: &str,
        products: &'a [Product],
        limit: usize,
    ) -> Vec<&'a Product> {
        let needle = keyword.trim().to_lowercase();
        self.products_for(supplier_id, products)
            .into_iter()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p
                        .sku
                        .as_deref()
                        .is_some_and(|sku| sku.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SupplierIds;

    fn product(id: &str, suppliers: &str) -> Product {
        Product {
            id: id.into(),
            sku: None,
            name: format!("Product {id}"),
            unit: "pcs".into(),
            price: 10.0,
            cost: 5.0,
            stock: 0,
            safety_stock: 0,
            category: String::new(),
            supplier_ids: SupplierIds::new(suppliers),
            expiry_date: None,
            last_purchase_date: None,
        }
    }

    #[test]
    fn test_same_length_replacement_rebuilds() {
        let mut index = SupplierIndex::new();
        let first = vec![product("P1", "S1,S2")];
        assert!(index.build(&first, false));
        assert_eq!(index.product_ids("S1"), ["P1"]);
        assert_eq!(index.product_ids("S2"), ["P1"]);

        let replaced = vec![product("P2", "S1")];
        assert_ne!(content_version(&first), content_version(&replaced));
        assert!(index.build(&replaced, false));
        assert_eq!(index.product_ids("S1"), ["P2"]);
        assert!(index.product_ids("S2").is_empty());
    }

    #[test]
    fn test_unchanged_content_skips_rebuild() {
        let mut index = SupplierIndex::new();
        let list = vec![product("P1", "S1"), product("P2", "S1,S3")];
        assert!(index.build(&list, false));
        assert!(!index.build(&list, false));
        assert!(index.build(&list, true));
    }

    #[test]
    fn test_unrelated_fields_do_not_change_index() {
        let a = vec![product("P1", "S1"), product("P2", "S2,S1")];
        let mut b = a.clone();
        b[0].price = 99.0;
        b[1].name = "Renamed".into();
        b[1].stock = 40;
        assert_eq!(content_version(&a), content_version(&b));

        let mut ia = SupplierIndex::new();
        let mut ib = SupplierIndex::new();
        ia.build(&a, true);
        ib.build(&b, true);
        for sid in ["S1", "S2", "S3"] {
            assert_eq!(ia.product_ids(sid), ib.product_ids(sid));
        }
    }

    #[test]
    fn test_products_without_suppliers_are_ineligible() {
        let mut index = SupplierIndex::new();
        index.build(&[product("P1", " , "), product("P2", "")], false);
        assert_eq!(index.supplier_ids().count(), 0);
    }

    #[test]
    fn test_has_supplier_is_exact_id_membership() {
        let p = product("P1", "S1, S12");
        assert!(has_supplier(&p, "S1"));
        assert!(has_supplier(&p, "S12"));
        assert!(!has_supplier(&p, "S"));
        assert!(!has_supplier(&p, "s1"));
        // A supplier *named* like an id is not an id.
        assert!(!has_supplier(&p, "Product P1"));
        assert!(!has_supplier(&p, ""));
    }

    #[test]
    fn test_candidates_filter_and_cap() {
        let mut list: Vec<Product> = (0..100).map(|i| product(&format!("P{i}"), "S1")).collect();
        list[3].sku = Some("CAB-3".into());
        let mut index = SupplierIndex::new();
        index.build(&list, false);

        assert_eq!(index.candidates("S1", "", &list, MAX_CANDIDATES).len(), MAX_CANDIDATES);
        let hits = index.candidates("S1", "cab", &list, MAX_CANDIDATES);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "P3");
        assert!(index.candidates("S9", "", &list, MAX_CANDIDATES).is_empty());
    }
}
