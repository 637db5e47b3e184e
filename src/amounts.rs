//! Monetary totals for orders, purchases and pickups.
//!
//! A stored `total` wins when it is numeric. Older rows lack it (or carry
//! text), so the total is rebuilt from line items; missing or non-numeric
//! quantities and amounts count as zero rather than failing the record.

use serde_json::Value;

use crate::normalize::FieldChain;

pub const TOTAL: FieldChain = FieldChain(&["total"]);
pub const QTY: FieldChain = FieldChain(&["qty", "quantity"]);
/// Unit amount precedence for sale lines.
pub const SALE_UNIT_AMOUNT: FieldChain = FieldChain(&["price", "unit_price"]);
/// Unit amount precedence for purchase and pickup lines.
pub const PURCHASE_UNIT_AMOUNT: FieldChain = FieldChain(&["cost", "price", "unit_cost"]);

/// Line items of a record. `items` may be an array or a JSON-encoded string;
/// anything else yields no items.
pub fn line_items(record: &Value) -> Vec<Value> {
    match record.get("items") {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Sum of `qty × unit amount` over the record's line items.
pub fn items_total(record: &Value, unit_amount: FieldChain) -> f64 {
    line_items(record)
        .iter()
        .map(|item| QTY.num(item).unwrap_or(0.0) * unit_amount.num(item).unwrap_or(0.0))
        .sum()
}

/// The record's total: stored value when numeric, else rebuilt from items.
pub fn resolve_total(record: &Value, unit_amount: FieldChain) -> f64 {
    TOTAL
        .num(record)
        .unwrap_or_else(|| items_total(record, unit_amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_total_sums_items() {
        let po = json!({ "items": [{ "qty": 3, "cost": 10 }, { "qty": 2, "cost": 5 }] });
        assert_eq!(resolve_total(&po, PURCHASE_UNIT_AMOUNT), 40.0);
    }

    #[test]
    fn test_stored_total_preferred() {
        let order = json!({ "total": "$1,250", "items": [{ "qty": 1, "price": 1 }] });
        assert_eq!(resolve_total(&order, SALE_UNIT_AMOUNT), 1250.0);
    }

    #[test]
    fn test_non_numeric_total_falls_back() {
        let order = json!({ "total": "pending", "items": [{ "qty": 2, "unit_price": "7.5" }] });
        assert_eq!(resolve_total(&order, SALE_UNIT_AMOUNT), 15.0);
    }

    #[test]
    fn test_items_as_json_string() {
        let order = json!({ "items": "[{\"qty\":4,\"price\":2.5}]" });
        assert_eq!(resolve_total(&order, SALE_UNIT_AMOUNT), 10.0);
        let broken = json!({ "items": "[{oops" });
        assert_eq!(resolve_total(&broken, SALE_UNIT_AMOUNT), 0.0);
    }

    #[test]
    fn test_bad_line_values_count_as_zero() {
        let po = json!({ "items": [
            { "qty": "x", "cost": 10 },
            { "qty": 2 },
            { "qty": 1, "price": 4, "unit_cost": 99 },
        ] });
        // cost missing on the last line, price comes before unit_cost
        assert_eq!(resolve_total(&po, PURCHASE_UNIT_AMOUNT), 4.0);
    }

    #[test]
    fn test_resolving_resolved_record_is_stable() {
        let mut po = json!({ "items": [{ "qty": 3, "cost": 1.1 }, { "qty": 7, "cost": 0.3 }] });
        let from_items = resolve_total(&po, PURCHASE_UNIT_AMOUNT);
        po["total"] = json!(from_items);
        let again = resolve_total(&po, PURCHASE_UNIT_AMOUNT);
        assert!((again - from_items).abs() < 1e-9);
        assert!((again - items_total(&po, PURCHASE_UNIT_AMOUNT)).abs() < 1e-9);
    }
}
