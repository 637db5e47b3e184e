//! Domain records: products, suppliers, transaction documents and ledger
//! entries, plus the decoders that lift heterogeneous remote rows into them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::amounts::{self, PURCHASE_UNIT_AMOUNT, SALE_UNIT_AMOUNT};
use crate::normalize::{safe_num, to_canonical_date, to_display_datetime, FieldChain};

const ID: FieldChain = FieldChain(&["id"]);
const SKU: FieldChain = FieldChain(&["sku", "part_no", "code"]);
const NAME: FieldChain = FieldChain(&["name"]);
const UNIT: FieldChain = FieldChain(&["unit"]);
const PRICE: FieldChain = FieldChain(&["price"]);
const COST: FieldChain = FieldChain(&["cost", "purchase_price", "in_price"]);
const STOCK: FieldChain = FieldChain(&["stock"]);
const SAFETY_STOCK: FieldChain = FieldChain(&["safety_stock", "safety"]);
const CATEGORY: FieldChain = FieldChain(&["category"]);
const SUPPLIER_IDS: FieldChain = FieldChain(&["supplier_ids", "supplier_id"]);
const EXPIRY_DATE: FieldChain = FieldChain(&["expiry_date"]);
const LAST_PURCHASE_DATE: FieldChain = FieldChain(&["last_purchase_date"]);

const SUPPLIER_ID: FieldChain = FieldChain(&["id", "supplier_id"]);
const SUPPLIER_NAME: FieldChain = FieldChain(&["name", "supplier_name"]);

const DOC_DATE: FieldChain = FieldChain(&["date", "created_at", "createdAt"]);
const OPERATOR: FieldChain = FieldChain(&["operator", "user", "member_id"]);
const NOTE: FieldChain = FieldChain(&["note", "address"]);

const LINE_PRODUCT_ID: FieldChain = FieldChain(&["product_id", "id"]);
const LINE_PRODUCT_NAME: FieldChain = FieldChain(&["product_name", "name"]);
const LINE_SUPPLIER_ID: FieldChain = FieldChain(&["supplier_id"]);

const LEDGER_TS: FieldChain = FieldChain(&["ts", "timestamp", "date", "created_at"]);
const LEDGER_CODE: FieldChain = FieldChain(&["type_code", "type", "direction"]);
const LEDGER_REF: FieldChain = FieldChain(&["ref", "ref_id", "doc_no"]);
const LEDGER_PRODUCT_NAME: FieldChain = FieldChain(&["product_name", "product", "name"]);
const LEDGER_QTY: FieldChain = FieldChain(&["qty", "quantity", "delta"]);
const LEDGER_UNIT_AMOUNT: FieldChain = FieldChain(&["cost", "price", "unit_cost"]);
const LEDGER_COUNTERPARTY: FieldChain = FieldChain(&["target", "counterparty", "note"]);

/// Every cached collection, keyed by the name the remote store and the
/// persisted cache both use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Products,
    Suppliers,
    Orders,
    Purchases,
    Pickups,
    Ledger,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Products,
        EntityKind::Suppliers,
        EntityKind::Orders,
        EntityKind::Purchases,
        EntityKind::Pickups,
        EntityKind::Ledger,
    ];

    /// Remote request `type` and persisted cache key.
    pub fn cache_key(self) -> &'static str {
        match self {
            EntityKind::Products => "products",
            EntityKind::Suppliers => "suppliers",
            EntityKind::Orders => "orders",
            EntityKind::Purchases => "purchases",
            EntityKind::Pickups => "pickups",
            EntityKind::Ledger => "stockLedger",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cache_key())
    }
}

/// A row type that can live in a reconciled collection.
pub trait Record:
    Clone + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// Decode one normalised remote row; `None` drops the row.
    fn from_remote(row: &Value) -> Option<Self>;
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Who performed a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub name: String,
}

impl Operator {
    /// Wire form: `"{id}|{name}"`.
    pub fn attribution(&self) -> String {
        format!("{}|{}", self.id, self.name)
    }
}

/// The display part of an attribution string (`"m1|Alice"` -> `"Alice"`).
pub fn operator_display_name(raw: &str) -> &str {
    match raw.split_once('|') {
        Some((_, name)) => name,
        None => raw,
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// Supplier identifiers eligible for a product. Stored comma-joined on the
/// wire; compared as a set of trimmed, non-empty ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierIds(String);

impl SupplierIds {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn from_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let joined = ids
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    pub fn raw(&self) -> &str {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.split(',').map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn contains(&self, supplier_id: &str) -> bool {
        let wanted = supplier_id.trim();
        !wanted.is_empty() && self.iter().any(|id| id == wanted)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub safety_stock: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub supplier_ids: SupplierIds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_purchase_date: Option<String>,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.safety_stock
    }
}

fn whole(n: f64) -> i64 {
    n.round() as i64
}

fn opt_date(chain: FieldChain, row: &Value) -> Option<String> {
    chain
        .first(row)
        .map(to_canonical_date)
        .filter(|d| !d.is_empty())
}

impl Record for Product {
    const KIND: EntityKind = EntityKind::Products;

    fn from_remote(row: &Value) -> Option<Self> {
        let id = ID.text(row)?;
        Some(Product {
            id,
            sku: SKU.text(row),
            name: NAME.text(row).unwrap_or_default(),
            unit: UNIT.text(row).unwrap_or_default(),
            price: PRICE.num(row).unwrap_or(0.0),
            cost: COST.num(row).unwrap_or(0.0),
            stock: STOCK.num(row).map(whole).unwrap_or(0),
            safety_stock: SAFETY_STOCK.num(row).map(whole).unwrap_or(0),
            category: CATEGORY.text(row).unwrap_or_default(),
            supplier_ids: SupplierIds::new(SUPPLIER_IDS.text(row).unwrap_or_default()),
            expiry_date: opt_date(EXPIRY_DATE, row),
            last_purchase_date: opt_date(LAST_PURCHASE_DATE, row),
        })
    }
}

// ---------------------------------------------------------------------------
// Supplier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

impl Record for Supplier {
    const KIND: EntityKind = EntityKind::Suppliers;

    fn from_remote(row: &Value) -> Option<Self> {
        Some(Supplier {
            id: SUPPLIER_ID.text(row)?,
            name: SUPPLIER_NAME.text(row).unwrap_or_default(),
            phone: FieldChain(&["phone"]).text(row).unwrap_or_default(),
            address: FieldChain(&["address"]).text(row).unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Sale,
    Pickup,
    /// Stock returned by deleting a pickup.
    PickupReversal,
    Adjustment,
}

impl TransactionKind {
    pub fn direction(self) -> Direction {
        match self {
            TransactionKind::Purchase | TransactionKind::PickupReversal => Direction::In,
            TransactionKind::Sale | TransactionKind::Pickup => Direction::Out,
            TransactionKind::Adjustment => Direction::Adj,
        }
    }

    /// Outbound movements are checked against locally known stock.
    pub fn is_outbound(self) -> bool {
        self.direction() == Direction::Out
    }
}

/// One product movement inside a transaction. `qty` is the magnitude for
/// purchases, sales and pickups, and the signed delta for adjustments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    pub qty: i64,
    /// Unit cost for purchases and pickups, unit price for sales.
    #[serde(default)]
    pub unit_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

impl LineItem {
    pub fn new(product_id: impl Into<String>, qty: i64, unit_amount: f64) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: String::new(),
            qty,
            unit_amount,
            supplier_id: None,
            expiry_date: None,
        }
    }

    pub fn with_supplier(mut self, supplier_id: impl Into<String>) -> Self {
        self.supplier_id = Some(supplier_id.into());
        self
    }

    /// Quantity with the transaction's direction applied.
    pub fn signed_qty(&self, kind: TransactionKind) -> i64 {
        match kind.direction() {
            Direction::In => self.qty.abs(),
            Direction::Out => -self.qty.abs(),
            Direction::Adj => self.qty,
        }
    }
}

/// A remote-acknowledged transaction ready to be projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    /// Server-assigned document id, when the store returned one.
    pub doc_id: Option<String>,
    /// Canonical `YYYY-MM-DD`.
    pub date: String,
    /// Attribution string (`"{id}|{name}"`).
    pub operator: String,
    pub counterparty: String,
    pub note: String,
    pub lines: Vec<LineItem>,
}

impl Transaction {
    pub fn total(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| l.qty.abs() as f64 * l.unit_amount)
            .sum()
    }
}

/// A cached order/purchase/pickup document as the remote store lists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Canonical `YYYY-MM-DD`, empty when the source date was unparseable.
    pub date: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub counterparty: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub lines: Vec<LineItem>,
    /// Stored total, or the line-item reconstruction when absent.
    pub total: f64,
}

fn decode_document(
    row: &Value,
    id_keys: FieldChain,
    counterparty: FieldChain,
    unit_amount: FieldChain,
) -> Option<Document> {
    let id = id_keys.text(row)?;
    let lines = amounts::line_items(row)
        .iter()
        .filter_map(|item| {
            Some(LineItem {
                product_id: LINE_PRODUCT_ID.text(item)?,
                product_name: LINE_PRODUCT_NAME.text(item).unwrap_or_default(),
                qty: amounts::QTY.num(item).map(whole).unwrap_or(0),
                unit_amount: unit_amount.num(item).unwrap_or(0.0),
                supplier_id: LINE_SUPPLIER_ID.text(item),
                expiry_date: opt_date(EXPIRY_DATE, item),
            })
        })
        .collect();
    Some(Document {
        id,
        date: DOC_DATE
            .first(row)
            .map(to_canonical_date)
            .unwrap_or_default(),
        operator: OPERATOR.text(row).unwrap_or_default(),
        counterparty: counterparty.text(row).unwrap_or_default(),
        note: NOTE.text(row).unwrap_or_default(),
        lines,
        total: amounts::resolve_total(row, unit_amount),
    })
}

/// Sales orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Order(pub Document);

impl Record for Order {
    const KIND: EntityKind = EntityKind::Orders;

    fn from_remote(row: &Value) -> Option<Self> {
        decode_document(
            row,
            FieldChain(&["order_id", "id"]),
            FieldChain(&["name", "customer", "customer_name"]),
            SALE_UNIT_AMOUNT,
        )
        .map(Order)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Purchase(pub Document);

impl Record for Purchase {
    const KIND: EntityKind = EntityKind::Purchases;

    fn from_remote(row: &Value) -> Option<Self> {
        decode_document(
            row,
            FieldChain(&["po_id", "id"]),
            FieldChain(&["supplier_name", "supplier_id"]),
            PURCHASE_UNIT_AMOUNT,
        )
        .map(Purchase)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pickup(pub Document);

impl Record for Pickup {
    const KIND: EntityKind = EntityKind::Pickups;

    fn from_remote(row: &Value) -> Option<Self> {
        decode_document(
            row,
            FieldChain(&["pickup_id", "id"]),
            FieldChain(&["department", "dept"]),
            PURCHASE_UNIT_AMOUNT,
        )
        .map(Pickup)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
    #[serde(rename = "ADJ")]
    Adj,
}

impl Direction {
    pub fn code(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
            Direction::Adj => "ADJ",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "IN" => Some(Direction::In),
            "OUT" => Some(Direction::Out),
            "ADJ" => Some(Direction::Adj),
            _ => None,
        }
    }

    /// Classify a remote ledger row that may predate explicit codes.
    fn classify(row: &Value) -> Option<Self> {
        if let Some(dir) = LEDGER_CODE.text(row).as_deref().and_then(Self::from_code) {
            return Some(dir);
        }
        let reason = FieldChain(&["reason"])
            .text(row)
            .unwrap_or_default()
            .to_lowercase();
        if reason.contains("purchase") {
            return Some(Direction::In);
        }
        if reason.contains("sale") {
            return Some(Direction::Out);
        }
        if LEDGER_REF.text(row).as_deref() == Some("ADJ") {
            return Some(Direction::Adj);
        }
        None
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One signed stock movement for one product. Appended, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub ts: String,
    pub direction: Direction,
    #[serde(default)]
    pub doc_ref: String,
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    /// Positive for IN, negative for OUT, either sign for ADJ.
    pub qty: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_amount: Option<f64>,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub counterparty: String,
}

impl Record for LedgerEntry {
    const KIND: EntityKind = EntityKind::Ledger;

    fn from_remote(row: &Value) -> Option<Self> {
        let direction = Direction::classify(row)?;
        let magnitude = LEDGER_QTY.num(row).map(whole).unwrap_or(0);
        let qty = match direction {
            Direction::In => magnitude.abs(),
            Direction::Out => -magnitude.abs(),
            Direction::Adj => magnitude,
        };
        Some(LedgerEntry {
            ts: LEDGER_TS
                .first(row)
                .map(to_display_datetime)
                .unwrap_or_default(),
            direction,
            doc_ref: LEDGER_REF.text(row).unwrap_or_default(),
            product_id: FieldChain(&["product_id"]).text(row)?,
            product_name: LEDGER_PRODUCT_NAME.text(row).unwrap_or_default(),
            qty,
            unit_amount: LEDGER_UNIT_AMOUNT.first(row).and_then(safe_num),
            operator: OPERATOR.text(row).unwrap_or_default(),
            counterparty: LEDGER_COUNTERPARTY.text(row).unwrap_or_default(),
        })
    }
}

impl LedgerEntry {
    /// Case-insensitive keyword match over the searchable text fields.
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [
            self.product_name.as_str(),
            self.product_id.as_str(),
            self.doc_ref.as_str(),
            self.operator.as_str(),
            self.counterparty.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Ledger view filter: optional direction plus keyword.
pub fn filter_ledger<'a>(
    entries: &'a [LedgerEntry],
    direction: Option<Direction>,
    keyword: &str,
) -> Vec<&'a LedgerEntry> {
    entries
        .iter()
        .filter(|e| direction.map_or(true, |d| e.direction == d))
        .filter(|e| e.matches_keyword(keyword))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_product_from_remote_with_fallbacks() {
        let row = json!({
            "id": 17,
            "part_no": "A-17",
            "name": "Cable",
            "purchase_price": "$12",
            "stock": "8",
            "safety": 3,
            "supplier_id": "S9",
            "expiry_date": "113/12/31"
        });
        let p = Product::from_remote(&row).unwrap();
        assert_eq!(p.id, "17");
        assert_eq!(p.sku.as_deref(), Some("A-17"));
        assert_eq!(p.cost, 12.0);
        assert_eq!(p.stock, 8);
        assert_eq!(p.safety_stock, 3);
        assert!(p.supplier_ids.contains("S9"));
        assert_eq!(p.expiry_date.as_deref(), Some("2024-12-31"));
        assert!(Product::from_remote(&json!({ "name": "no id" })).is_none());
    }

    #[test]
    fn test_supplier_ids_set_semantics() {
        let ids = SupplierIds::new(" S1, ,S2 ,");
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec!["S1", "S2"]);
        assert!(ids.contains("S2"));
        assert!(ids.contains(" S1 "));
        assert!(!ids.contains("S"));
        assert!(!ids.contains(""));
        assert!(SupplierIds::new(" , ").is_empty());
        assert_eq!(SupplierIds::from_ids(["S1", " S3 ", ""]).raw(), "S1,S3");
    }

    #[test]
    fn test_purchase_document_total_falls_back_to_items() {
        let row = json!({
            "po_id": "PO1",
            "date": "2024/5/1",
            "supplier_name": "Acme",
            "items": "[{\"product_id\":\"P1\",\"qty\":3,\"cost\":10},{\"product_id\":\"P2\",\"qty\":2,\"cost\":5}]"
        });
        let Purchase(doc) = Purchase::from_remote(&row).unwrap();
        assert_eq!(doc.id, "PO1");
        assert_eq!(doc.date, "2024-05-01");
        assert_eq!(doc.counterparty, "Acme");
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.total, 40.0);
    }

    #[test]
    fn test_ledger_direction_classification() {
        let coded = json!({ "type": "out", "product_id": "P1", "qty": 4 });
        assert_eq!(LedgerEntry::from_remote(&coded).unwrap().qty, -4);

        let by_reason = json!({ "reason": "purchase:PO1", "product_id": "P1", "qty": 2 });
        let entry = LedgerEntry::from_remote(&by_reason).unwrap();
        assert_eq!(entry.direction, Direction::In);
        assert_eq!(entry.qty, 2);

        let adj = json!({ "ref": "ADJ", "product_id": "P1", "delta": -3 });
        let entry = LedgerEntry::from_remote(&adj).unwrap();
        assert_eq!(entry.direction, Direction::Adj);
        assert_eq!(entry.qty, -3);

        assert!(LedgerEntry::from_remote(&json!({ "product_id": "P1", "qty": 1 })).is_none());
    }

    #[test]
    fn test_signed_qty_by_kind() {
        let line = LineItem::new("P1", 5, 1.0);
        assert_eq!(line.signed_qty(TransactionKind::Purchase), 5);
        assert_eq!(line.signed_qty(TransactionKind::Sale), -5);
        assert_eq!(line.signed_qty(TransactionKind::Pickup), -5);
        assert_eq!(line.signed_qty(TransactionKind::PickupReversal), 5);
        let delta = LineItem::new("P1", -2, 0.0);
        assert_eq!(delta.signed_qty(TransactionKind::Adjustment), -2);
    }

    #[test]
    fn test_filter_ledger() {
        let entry = |dir, name: &str| LedgerEntry {
            ts: String::new(),
            direction: dir,
            doc_ref: "PO1".into(),
            product_id: "P1".into(),
            product_name: name.into(),
            qty: 1,
            unit_amount: None,
            operator: "m1|Alice".into(),
            counterparty: String::new(),
        };
        let entries = vec![entry(Direction::In, "Cable"), entry(Direction::Out, "Plug")];
        assert_eq!(filter_ledger(&entries, Some(Direction::Out), "").len(), 1);
        assert_eq!(filter_ledger(&entries, None, "cab").len(), 1);
        assert_eq!(filter_ledger(&entries, None, "alice").len(), 2);
        assert_eq!(operator_display_name("m1|Alice"), "Alice");
        assert_eq!(operator_display_name("Bob"), "Bob");
    }
}
