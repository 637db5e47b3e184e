//! Stock ledger projection.
//!
//! A confirmed transaction becomes one signed ledger entry per line and the
//! same signed quantity lands on the product's stock. Running stock for a
//! product is always its starting stock plus the signed sum of its entries.

use tracing::{debug, warn};

use crate::models::{Direction, LedgerEntry, Product, Transaction, TransactionKind};

/// Project a remote-acknowledged transaction onto `products` and return the
/// ledger entries it produced, in line order.
///
/// Lines with a zero quantity produce nothing. Lines referencing a product
/// that is not cached still produce an entry; the next refresh brings the
/// product in with the server's figures.
pub fn apply_confirmed_transaction(
    tx: &Transaction,
    products: &mut [Product],
    ts: &str,
) -> Vec<LedgerEntry> {
    let direction = tx.kind.direction();
    let doc_ref = match (&tx.doc_id, tx.kind) {
        (Some(id), _) => id.clone(),
        (None, TransactionKind::Adjustment) => "ADJ".to_string(),
        (None, _) => String::new(),
    };

    let mut entries = Vec::with_capacity(tx.lines.len());
    for line in &tx.lines {
        let signed = line.signed_qty(tx.kind);
        if signed == 0 {
            continue;
        }

        let mut product_name = line.product_name.clone();
        match products.iter_mut().find(|p| p.id == line.product_id) {
            Some(product) => {
                product.stock += signed;
                if direction == Direction::In && line.unit_amount > 0.0 {
                    product.cost = line.unit_amount;
                }
                if tx.kind == TransactionKind::Purchase {
                    advance_purchase_date(product, &tx.date);
                    if let Some(expiry) = line.expiry_date.as_deref().filter(|d| !d.is_empty()) {
                        product.expiry_date = Some(expiry.to_string());
                    }
                }
                if product_name.is_empty() {
                    product_name = product.name.clone();
                }
            }
            None => warn!(
                product = %line.product_id,
                "confirmed line references a product missing from the cache"
            ),
        }

        entries.push(LedgerEntry {
            ts: ts.to_string(),
            direction,
            doc_ref: doc_ref.clone(),
            product_id: line.product_id.clone(),
            product_name,
            qty: signed,
            unit_amount: (line.unit_amount > 0.0).then_some(line.unit_amount),
            operator: tx.operator.clone(),
            counterparty: if tx.counterparty.is_empty() {
                tx.note.clone()
            } else {
                tx.counterparty.clone()
            },
        });
    }

    debug!(
        kind = ?tx.kind,
        lines = tx.lines.len(),
        entries = entries.len(),
        "ledger entries projected"
    );
    entries
}

/// Canonical dates compare lexicographically; the date only moves forward.
fn advance_purchase_date(product: &mut Product, date: &str) {
    if date.is_empty() {
        return;
    }
    let newer = product
        .last_purchase_date
        .as_deref()
        .map_or(true, |current| date > current);
    if newer {
        product.last_purchase_date = Some(date.to_string());
    }
}

/// Figures replayed from a starting point and a run of ledger entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub stock: i64,
    pub cost: f64,
    pub movements: usize,
}

/// Replay `entries` (oldest first) for `product_id` on top of a starting
/// stock and cost. Cost follows the latest IN entry with a positive unit
/// amount; it is never averaged.
pub fn project<'a>(
    product_id: &str,
    initial_stock: i64,
    initial_cost: f64,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> Projection {
    let mut projection = Projection {
        stock: initial_stock,
        cost: initial_cost,
        movements: 0,
    };
    for entry in entries.into_iter().filter(|e| e.product_id == product_id) {
        projection.stock += entry.qty;
        projection.movements += 1;
        if entry.direction == Direction::In {
            if let Some(amount) = entry.unit_amount.filter(|a| *a > 0.0) {
                projection.cost = amount;
            }
        }
    }
    projection
}

/// Net signed movement per product, for reconciling a cached ledger
/// against cached stock.
pub fn net_movement<'a>(
    product_id: &str,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
) -> i64 {
    entries
        .into_iter()
        .filter(|e| e.product_id == product_id)
        .map(|e| e.qty)
        .sum()
}
