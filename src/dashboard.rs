//! Derived dashboard metrics, recomputed on a trailing debounce so a burst
//! of confirmed writes costs one recomputation.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::models::{Order, Product, Purchase, Supplier};
use crate::normalize::today;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowStockRow {
    pub product_id: String,
    pub name: String,
    pub stock: i64,
    pub safety_stock: i64,
    /// Name of the first listed supplier, or its id when unknown.
    pub supplier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    /// Number of recomputations so far; 0 is the initial snapshot.
    pub revision: u64,
    pub today: String,
    pub today_sales: f64,
    pub today_purchases: f64,
    pub sku_count: usize,
    pub low_stock: Vec<LowStockRow>,
}

impl DashboardSnapshot {
    pub fn low_stock_count(&self) -> usize {
        self.low_stock.len()
    }
}

pub fn compute(
    revision: u64,
    today: &str,
    products: &[Product],
    suppliers: &[Supplier],
    orders: &[Order],
    purchases: &[Purchase],
) -> DashboardSnapshot {
    let names: HashMap<&str, &str> = suppliers
        .iter()
        .map(|s| (s.id.as_str(), s.name.as_str()))
        .collect();

    let low_stock = products
        .iter()
        .filter(|p| p.is_low_stock())
        .map(|p| {
            let supplier = p
                .supplier_ids
                .iter()
                .next()
                .map(|sid| {
                    names
                        .get(sid)
                        .filter(|n| !n.is_empty())
                        .copied()
                        .unwrap_or(sid)
                        .to_string()
                })
                .unwrap_or_default();
            LowStockRow {
                product_id: p.id.clone(),
                name: p.name.clone(),
                stock: p.stock,
                safety_stock: p.safety_stock,
                supplier,
            }
        })
        .collect();

    DashboardSnapshot {
        revision,
        today: today.to_string(),
        today_sales: orders
            .iter()
            .filter(|o| o.0.date == today)
            .map(|o| o.0.total)
            .sum(),
        today_purchases: purchases
            .iter()
            .filter(|p| p.0.date == today)
            .map(|p| p.0.total)
            .sum(),
        sku_count: products.len(),
        low_stock,
    }
}

fn compute_from(store: &Store, revision: u64) -> DashboardSnapshot {
    compute(
        revision,
        &today(),
        &store.snapshot::<Product>(),
        &store.snapshot::<Supplier>(),
        &store.snapshot::<Order>(),
        &store.snapshot::<Purchase>(),
    )
}

/// Publish dashboard snapshots. Collection changes arriving within
/// `debounce` of each other are coalesced; the task ends once every
/// receiver is dropped.
pub fn spawn_dashboard(store: Arc<Store>, debounce: Duration) -> watch::Receiver<DashboardSnapshot> {
    let mut changes = store.subscribe_changes();
    let (tx, rx) = watch::channel(compute_from(&store, 0));

    tokio::spawn(async move {
        let mut revision = 0;
        'outer: loop {
            tokio::select! {
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = tx.closed() => break,
            }
            loop {
                tokio::select! {
                    res = changes.changed() => {
                        if res.is_err() {
                            break 'outer;
                        }
                        trace!("dashboard change coalesced");
                    }
                    _ = tokio::time::sleep(debounce) => break,
                }
            }
            revision += 1;
            let snapshot = compute_from(&store, revision);
            debug!(
                revision,
                skus = snapshot.sku_count,
                low_stock = snapshot.low_stock_count(),
                "dashboard recomputed"
            );
            if tx.send(snapshot).is_err() {
                break;
            }
        }
        debug!("dashboard task stopped");
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::test_support::{product, store_with, FakeRemote};

    fn doc(id: &str, date: &str, total: f64) -> Document {
        Document {
            id: id.into(),
            date: date.into(),
            operator: String::new(),
            counterparty: String::new(),
            note: String::new(),
            lines: Vec::new(),
            total,
        }
    }

    #[test]
    fn test_compute_metrics() {
        let mut low = product("P1", 1, "S2,S1");
        low.name = "Cable".into();
        let products = vec![low, product("P2", 30, "S1"), product("P3", 2, "S9")];
        let suppliers = vec![Supplier {
            id: "S2".into(),
            name: "Acme".into(),
            phone: String::new(),
            address: String::new(),
        }];
        let orders = vec![
            Order(doc("O1", "2024-05-01", 120.0)),
            Order(doc("O2", "2024-04-30", 99.0)),
            Order(doc("O3", "2024-05-01", 30.5)),
        ];
        let purchases = vec![Purchase(doc("PO1", "2024-05-01", 40.0))];

        let snap = compute(3, "2024-05-01", &products, &suppliers, &orders, &purchases);
        assert_eq!(snap.revision, 3);
        assert_eq!(snap.today_sales, 150.5);
        assert_eq!(snap.today_purchases, 40.0);
        assert_eq!(snap.sku_count, 3);
        assert_eq!(snap.low_stock_count(), 2);
        assert_eq!(snap.low_stock[0].supplier, "Acme");
        // Unknown supplier falls back to the id.
        assert_eq!(snap.low_stock[1].supplier, "S9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_mutations_recomputes_once() {
        let store = store_with(Arc::new(FakeRemote::new()));
        let rx = spawn_dashboard(store.clone(), Duration::from_millis(80));
        assert_eq!(rx.borrow().revision, 0);

        for i in 0..5 {
            store
                .mutate::<Product, _>(|items| items.push(product(&format!("P{i}"), 0, "S1")))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snap = rx.borrow().clone();
        assert_eq!(snap.revision, 1);
        assert_eq!(snap.sku_count, 5);
        assert_eq!(snap.low_stock_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_mutations_recompute_each_time() {
        let store = store_with(Arc::new(FakeRemote::new()));
        let rx = spawn_dashboard(store.clone(), Duration::from_millis(80));

        store
            .mutate::<Product, _>(|items| items.push(product("P1", 10, "S1")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        store
            .mutate::<Order, _>(|items| items.push(Order(doc("O1", &today(), 25.0))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snap = rx.borrow().clone();
        assert_eq!(snap.revision, 2);
        assert_eq!(snap.today_sales, 25.0);
    }
}
