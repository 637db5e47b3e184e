//! Write path: validate, submit, and project only after the remote store
//! confirms.
//!
//! Every submission walks `Draft -> Validating -> Submitting` and ends in
//! `Confirmed`, `Rejected` or `TimedOut`. Validation failures return
//! `Err(StockError::Validation)` before any network activity. Rejections and
//! timeouts come back as [`SubmitOutcome`] values and leave every local
//! collection exactly as it was.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{RemoteRequest, RemoteResponse, RemoteStatus};
use crate::error::{Result, StockError, Transient};
use crate::models::{
    LedgerEntry, LineItem, Operator, Order, Pickup, Product, Purchase, Supplier, SupplierIds,
    Transaction, TransactionKind,
};
use crate::normalize::{to_canonical_date, today};
use crate::store::Store;
use crate::supplier_index::has_supplier;

/// Header supplier id for purchases whose lines span several suppliers.
pub const MULTI_SUPPLIER: &str = "MULTI";

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Draft,
    Validating,
    Submitting,
    Confirmed,
    Rejected,
    TimedOut,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionState::Confirmed | SubmissionState::Rejected | SubmissionState::TimedOut
        )
    }

    pub fn can_advance_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Draft, Validating)
                | (Validating, Submitting)
                | (Validating, Rejected)
                | (Submitting, Confirmed)
                | (Submitting, Rejected)
                | (Submitting, TimedOut)
        )
    }
}

/// One write in flight, tracked for logging.
#[derive(Debug)]
pub struct Submission {
    id: String,
    request: &'static str,
    state: SubmissionState,
}

impl Submission {
    pub fn new(request: &'static str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            state: SubmissionState::Draft,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn advance(&mut self, next: SubmissionState) {
        if !self.state.can_advance_to(next) {
            warn!(
                submission = %self.id,
                request = self.request,
                from = ?self.state,
                to = ?next,
                "unexpected submission transition"
            );
        }
        debug!(submission = %self.id, request = self.request, state = ?next, "submission state");
        self.state = next;
    }

    fn reject(&mut self, message: impl Into<String>) -> StockError {
        self.advance(SubmissionState::Rejected);
        StockError::validation(message)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    /// Server-assigned document or record id, when returned.
    pub doc_id: Option<String>,
    /// Ledger entries projected locally for this write.
    pub entries: Vec<LedgerEntry>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Confirmed(Confirmation),
    /// Non-ok status from the remote store, message verbatim.
    Rejected(String),
    TimedOut,
    /// Nothing to send (e.g. a zero stock delta).
    NoChange,
}

impl SubmitOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmitOutcome::Confirmed(_))
    }

    /// Collapse into a `Result` for callers that treat every
    /// non-confirmation as failure.
    pub fn into_result(self, timeout_ms: u64) -> Result<Option<Confirmation>> {
        match self {
            SubmitOutcome::Confirmed(c) => Ok(Some(c)),
            SubmitOutcome::NoChange => Ok(None),
            SubmitOutcome::Rejected(msg) => Err(StockError::Rejected(msg)),
            SubmitOutcome::TimedOut => Err(Transient::Timeout(timeout_ms).into()),
        }
    }
}

/// Result of a product edit: the catalogue update, then the stock
/// adjustment when a new stock level was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductEditOutcome {
    pub catalogue: SubmitOutcome,
    pub stock: Option<SubmitOutcome>,
}

// ---------------------------------------------------------------------------
// Operator identity
// ---------------------------------------------------------------------------

/// Supplies the operator to attribute writes to.
pub trait OperatorProvider: Send + Sync {
    fn current(&self) -> Operator;
}

pub struct FixedOperator(pub Operator);

impl OperatorProvider for FixedOperator {
    fn current(&self) -> Operator {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Drafts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PurchaseDraft {
    /// Any accepted date form; empty means today.
    pub date: String,
    pub note: String,
    /// Every line carries its own supplier id.
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Clone, Default)]
pub struct SaleDraft {
    pub date: String,
    pub customer: String,
    pub phone: String,
    pub note: String,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Clone, Default)]
pub struct PickupDraft {
    pub date: String,
    pub department: String,
    pub receiver: String,
    pub note: String,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProductDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub name: String,
    pub unit: String,
    pub price: f64,
    pub cost: f64,
    pub safety_stock: i64,
    pub category: String,
    pub supplier_ids: SupplierIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SupplierDraft {
    pub name: String,
    pub phone: String,
    pub address: String,
}

fn canonical_or_today(raw: &str) -> Result<String> {
    if raw.trim().is_empty() {
        return Ok(today());
    }
    let date = to_canonical_date(&Value::String(raw.to_string()));
    if date.is_empty() {
        return Err(StockError::validation(format!("unrecognised date: {raw}")));
    }
    Ok(date)
}

/// Header supplier: the single distinct line supplier, else [`MULTI_SUPPLIER`].
pub fn header_supplier(lines: &[LineItem]) -> String {
    let distinct: BTreeSet<&str> = lines
        .iter()
        .filter_map(|l| l.supplier_id.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    match distinct.len() {
        1 => distinct.into_iter().next().unwrap_or_default().to_string(),
        _ => MULTI_SUPPLIER.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    store: Arc<Store>,
    operator: Arc<dyn OperatorProvider>,
}

impl Pipeline {
    pub fn new(store: Arc<Store>, operator: Arc<dyn OperatorProvider>) -> Self {
        Self { store, operator }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // -- validation helpers -------------------------------------------------

    fn check_lines(&self, sub: &mut Submission, lines: &mut [LineItem]) -> Result<()> {
        if lines.is_empty() {
            return Err(sub.reject("at least one line item is required"));
        }
        for line in lines.iter_mut() {
            line.product_id = line.product_id.trim().to_string();
            if line.product_id.is_empty() {
                return Err(sub.reject("line item without a product"));
            }
            if line.qty <= 0 {
                return Err(sub.reject(format!(
                    "quantity for {} must be positive",
                    line.product_id
                )));
            }
            if line.product_name.is_empty() {
                if let Some(p) = self.store.product(&line.product_id) {
                    line.product_name = p.name;
                }
            }
        }
        Ok(())
    }

    /// Outbound quantities, summed per product, may not exceed locally
    /// known stock. Unknown products count as zero stock.
    fn check_outbound_stock(&self, sub: &mut Submission, lines: &[LineItem]) -> Result<()> {
        let mut requested: BTreeMap<&str, i64> = BTreeMap::new();
        for line in lines {
            *requested.entry(line.product_id.as_str()).or_default() += line.qty;
        }
        for (product_id, qty) in requested {
            let (name, stock) = match self.store.product(product_id) {
                Some(p) => (p.name, p.stock),
                None => (product_id.to_string(), 0),
            };
            if qty > stock {
                return Err(sub.reject(format!(
                    "insufficient stock for {name}: {stock} on hand, {qty} requested"
                )));
            }
        }
        Ok(())
    }

    fn check_purchase_suppliers(&self, sub: &mut Submission, lines: &[LineItem]) -> Result<()> {
        for line in lines {
            let Some(supplier_id) = line
                .supplier_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
            else {
                return Err(sub.reject(format!("line for {} has no supplier", line.product_id)));
            };
            let Some(product) = self.store.product(&line.product_id) else {
                return Err(sub.reject(format!("unknown product {}", line.product_id)));
            };
            if !has_supplier(&product, supplier_id) {
                return Err(sub.reject(format!(
                    "product {} is not supplied by {supplier_id}",
                    product.id
                )));
            }
        }
        Ok(())
    }

    // -- transport ----------------------------------------------------------

    /// Send and classify. `Ok` only for an explicit ok status.
    async fn send(
        &self,
        sub: &mut Submission,
        request: &RemoteRequest,
    ) -> std::result::Result<RemoteResponse, SubmitOutcome> {
        sub.advance(SubmissionState::Submitting);
        let response = self.store.call(request).await;
        match response.status {
            RemoteStatus::Ok => Ok(response),
            RemoteStatus::Timeout => {
                sub.advance(SubmissionState::TimedOut);
                warn!(request = %request.kind, "write timed out, nothing applied locally");
                Err(SubmitOutcome::TimedOut)
            }
            RemoteStatus::Error | RemoteStatus::Unspecified => {
                sub.advance(SubmissionState::Rejected);
                let message = response
                    .message
                    .unwrap_or_else(|| format!("{} was not confirmed", request.kind));
                warn!(request = %request.kind, reason = %message, "write rejected");
                Err(SubmitOutcome::Rejected(message))
            }
        }
    }

    fn confirmed(
        &self,
        sub: &mut Submission,
        response: &RemoteResponse,
        doc_id: Option<String>,
        entries: Vec<LedgerEntry>,
    ) -> SubmitOutcome {
        sub.advance(SubmissionState::Confirmed);
        SubmitOutcome::Confirmed(Confirmation {
            doc_id,
            entries,
            message: response.message.clone(),
        })
    }

    fn refresh_stock_views(&self) {
        self.store.schedule_refresh::<Product>();
        self.store.schedule_refresh::<LedgerEntry>();
    }

    // -- transactions -------------------------------------------------------

    pub async fn add_purchase(&self, draft: PurchaseDraft) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("managePurchase");
        sub.advance(SubmissionState::Validating);
        let mut lines = draft.lines;
        self.check_lines(&mut sub, &mut lines)?;
        self.check_purchase_suppliers(&mut sub, &lines)?;
        let date = canonical_or_today(&draft.date).map_err(|e| {
            sub.advance(SubmissionState::Rejected);
            e
        })?;

        let operator = self.operator.current().attribution();
        let supplier_id = header_supplier(&lines);
        let items: Vec<Value> = lines
            .iter()
            .map(|l| {
                json!({
                    "product_id": l.product_id,
                    "product_name": l.product_name,
                    "qty": l.qty,
                    "cost": l.unit_amount,
                    "supplier_id": l.supplier_id,
                    "expiry_date": l.expiry_date,
                })
            })
            .collect();
        let mut tx = Transaction {
            kind: TransactionKind::Purchase,
            doc_id: None,
            date,
            operator,
            counterparty: supplier_id,
            note: draft.note,
            lines,
        };
        let request = RemoteRequest::new("managePurchase").action("add").field(
            "purchase",
            json!({
                "date": tx.date,
                "supplier_id": tx.counterparty,
                "note": tx.note,
                "total": tx.total(),
                "items": items,
                "operator": tx.operator,
            }),
        );

        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        tx.doc_id = response.str_field(&["po_id", "id"]);
        let entries = self.store.apply_confirmed(&tx)?;
        self.refresh_stock_views();
        self.store.schedule_refresh::<Purchase>();
        info!(po = tx.doc_id.as_deref().unwrap_or(""), "purchase confirmed");
        Ok(self.confirmed(&mut sub, &response, tx.doc_id.clone(), entries))
    }

    pub async fn add_sale(&self, draft: SaleDraft) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageSale");
        sub.advance(SubmissionState::Validating);
        let mut lines = draft.lines;
        self.check_lines(&mut sub, &mut lines)?;
        self.check_outbound_stock(&mut sub, &lines)?;
        let date = canonical_or_today(&draft.date).map_err(|e| {
            sub.advance(SubmissionState::Rejected);
            e
        })?;

        let items: Vec<Value> = lines
            .iter()
            .map(|l| {
                json!({
                    "product_id": l.product_id,
                    "product_name": l.product_name,
                    "qty": l.qty,
                    "price": l.unit_amount,
                })
            })
            .collect();
        let mut tx = Transaction {
            kind: TransactionKind::Sale,
            doc_id: None,
            date,
            operator: self.operator.current().attribution(),
            counterparty: draft.customer,
            note: draft.note,
            lines,
        };
        let request = RemoteRequest::new("manageSale").action("add").field(
            "sale",
            json!({
                "date": tx.date,
                "name": tx.counterparty,
                "phone": draft.phone,
                "address": tx.note,
                "total": tx.total(),
                "items": items,
                "operator": tx.operator,
            }),
        );

        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        tx.doc_id = response.str_field(&["order_id", "id"]);
        let entries = self.store.apply_confirmed(&tx)?;
        self.refresh_stock_views();
        self.store.schedule_refresh::<Order>();
        info!(order = tx.doc_id.as_deref().unwrap_or(""), "sale confirmed");
        Ok(self.confirmed(&mut sub, &response, tx.doc_id.clone(), entries))
    }

    pub async fn add_pickup(&self, draft: PickupDraft) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("managePickup");
        sub.advance(SubmissionState::Validating);
        let department = draft.department.trim().to_string();
        if department.is_empty() {
            return Err(sub.reject("pickup requires a department"));
        }
        let mut lines = draft.lines;
        self.check_lines(&mut sub, &mut lines)?;
        self.check_outbound_stock(&mut sub, &lines)?;
        let date = canonical_or_today(&draft.date).map_err(|e| {
            sub.advance(SubmissionState::Rejected);
            e
        })?;

        let items: Vec<Value> = lines
            .iter()
            .map(|l| {
                json!({
                    "product_id": l.product_id,
                    "product_name": l.product_name,
                    "qty": l.qty,
                    "cost": l.unit_amount,
                })
            })
            .collect();
        let mut tx = Transaction {
            kind: TransactionKind::Pickup,
            doc_id: None,
            date,
            operator: self.operator.current().attribution(),
            counterparty: department,
            note: draft.note,
            lines,
        };
        let request = RemoteRequest::new("managePickup").action("add").field(
            "pickup",
            json!({
                "date": tx.date,
                "department": tx.counterparty,
                "receiver": draft.receiver,
                "note": tx.note,
                "total": tx.total(),
                "items": items,
                "operator": tx.operator,
            }),
        );

        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        tx.doc_id = response.str_field(&["pickup_id", "id"]);
        let entries = self.store.apply_confirmed(&tx)?;
        self.refresh_stock_views();
        self.store.schedule_refresh::<Pickup>();
        Ok(self.confirmed(&mut sub, &response, tx.doc_id.clone(), entries))
    }

    /// Delete a pickup and return its lines to stock.
    pub async fn delete_pickup(&self, pickup_id: &str) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("managePickup");
        sub.advance(SubmissionState::Validating);
        let Some(Pickup(doc)) = self.store.pickup(pickup_id) else {
            return Err(sub.reject(format!("unknown pickup {pickup_id}")));
        };

        let request = RemoteRequest::new("managePickup")
            .action("delete")
            .field("pickup_id", doc.id.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };

        let tx = Transaction {
            kind: TransactionKind::PickupReversal,
            doc_id: Some(doc.id.clone()),
            date: today(),
            operator: self.operator.current().attribution(),
            counterparty: doc.counterparty,
            note: format!("reversal of {}", doc.id),
            lines: doc.lines,
        };
        let entries = self.store.apply_confirmed(&tx)?;
        self.refresh_stock_views();
        self.store.schedule_refresh::<Pickup>();
        Ok(self.confirmed(&mut sub, &response, Some(doc.id), entries))
    }

    /// Delete a purchase document. Stock is not rolled back; use an
    /// adjustment for that.
    pub async fn delete_purchase(&self, po_id: &str) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("managePurchase");
        sub.advance(SubmissionState::Validating);
        let po_id = po_id.trim().to_string();
        if po_id.is_empty() {
            return Err(sub.reject("purchase id is required"));
        }

        let request = RemoteRequest::new("managePurchase")
            .action("delete")
            .field("po_id", po_id.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        self.store
            .mutate::<Purchase, _>(|docs| docs.retain(|p| p.0.id != po_id))?;
        self.store.schedule_refresh::<Purchase>();
        self.store.schedule_refresh::<LedgerEntry>();
        Ok(self.confirmed(&mut sub, &response, Some(po_id), Vec::new()))
    }

    /// Manual correction by a signed delta.
    pub async fn adjust_stock(&self, product_id: &str, delta: i64, note: &str) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("stockAdjust");
        sub.advance(SubmissionState::Validating);
        let Some(product) = self.store.product(product_id) else {
            return Err(sub.reject(format!("unknown product {product_id}")));
        };
        if delta == 0 {
            debug!(product = %product.id, "zero stock delta, nothing to submit");
            return Ok(SubmitOutcome::NoChange);
        }

        let operator = self.operator.current().attribution();
        let request = RemoteRequest::new("stockAdjust")
            .field("product_id", product.id.clone())
            .field("delta", delta)
            .field("reason", note)
            .field("operator", operator.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };

        let mut line = LineItem::new(product.id.clone(), delta, 0.0);
        line.product_name = product.name;
        let tx = Transaction {
            kind: TransactionKind::Adjustment,
            doc_id: response.str_field(&["ref", "ref_id"]),
            date: today(),
            operator,
            counterparty: String::new(),
            note: note.to_string(),
            lines: vec![line],
        };
        let entries = self.store.apply_confirmed(&tx)?;
        self.refresh_stock_views();
        Ok(self.confirmed(&mut sub, &response, tx.doc_id.clone(), entries))
    }

    /// Adjust towards an absolute stock level.
    pub async fn set_stock(&self, product_id: &str, desired: i64) -> Result<SubmitOutcome> {
        let Some(product) = self.store.product(product_id) else {
            return Err(StockError::validation(format!("unknown product {product_id}")));
        };
        self.adjust_stock(&product.id, desired - product.stock, "admin:setStock")
            .await
    }

    // -- catalogue ----------------------------------------------------------

    fn check_product_draft(sub: &mut Submission, draft: &ProductDraft) -> Result<()> {
        if draft.name.trim().is_empty() {
            return Err(sub.reject("product name is required"));
        }
        if draft.supplier_ids.is_empty() {
            return Err(sub.reject("product needs at least one supplier id"));
        }
        Ok(())
    }

    pub async fn add_product(&self, draft: ProductDraft) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageProduct");
        sub.advance(SubmissionState::Validating);
        Self::check_product_draft(&mut sub, &draft)?;

        let request = RemoteRequest::new("manageProduct")
            .action("add")
            .field("product", serde_json::to_value(&draft)?);
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };

        let id = response.str_field(&["id", "product_id"]);
        if let Some(id) = &id {
            let product = Product {
                id: id.clone(),
                sku: draft.sku,
                name: draft.name.trim().to_string(),
                unit: draft.unit,
                price: draft.price,
                cost: draft.cost,
                stock: 0,
                safety_stock: draft.safety_stock,
                category: draft.category,
                supplier_ids: draft.supplier_ids,
                expiry_date: draft.expiry_date,
                last_purchase_date: None,
            };
            self.store.mutate::<Product, _>(|items| items.push(product))?;
        }
        self.store.schedule_refresh::<Product>();
        Ok(self.confirmed(&mut sub, &response, id, Vec::new()))
    }

    /// Update catalogue fields. Stock is never written here; when
    /// `desired_stock` differs from the cached stock a `stockAdjust`
    /// follows the confirmed update.
    pub async fn update_product(
        &self,
        product: Product,
        desired_stock: Option<i64>,
    ) -> Result<ProductEditOutcome> {
        let mut sub = Submission::new("manageProduct");
        sub.advance(SubmissionState::Validating);
        let Some(current) = self.store.product(&product.id) else {
            return Err(sub.reject(format!("unknown product {}", product.id)));
        };
        if product.name.trim().is_empty() {
            return Err(sub.reject("product name is required"));
        }
        if product.supplier_ids.is_empty() {
            return Err(sub.reject("product needs at least one supplier id"));
        }

        let request = RemoteRequest::new("manageProduct")
            .action("update")
            .field("id", product.id.clone())
            .field("sku", product.sku.clone().unwrap_or_default())
            .field("name", product.name.trim())
            .field("category", product.category.clone())
            .field("unit", product.unit.clone())
            .field("price", product.price)
            .field("safety_stock", product.safety_stock)
            .field("supplier_ids", product.supplier_ids.raw())
            .field("expiry_date", product.expiry_date.clone().unwrap_or_default());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => {
                return Ok(ProductEditOutcome {
                    catalogue: outcome,
                    stock: None,
                })
            }
        };

        let updated = Product {
            stock: current.stock,
            cost: current.cost,
            last_purchase_date: current.last_purchase_date.clone(),
            name: product.name.trim().to_string(),
            ..product
        };
        self.store.mutate::<Product, _>(|items| {
            if let Some(slot) = items.iter_mut().find(|p| p.id == updated.id) {
                *slot = updated.clone();
            }
        })?;
        self.store.schedule_refresh::<Product>();
        let catalogue = self.confirmed(&mut sub, &response, Some(updated.id.clone()), Vec::new());

        let stock = match desired_stock {
            Some(desired) if desired != current.stock => {
                Some(self.set_stock(&updated.id, desired).await?)
            }
            Some(_) => Some(SubmitOutcome::NoChange),
            None => None,
        };
        Ok(ProductEditOutcome { catalogue, stock })
    }

    /// Remove a product record. Its ledger history stays.
    pub async fn delete_product(&self, product_id: &str) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageProduct");
        sub.advance(SubmissionState::Validating);
        let id = product_id.trim().to_string();
        if id.is_empty() {
            return Err(sub.reject("product id is required"));
        }
        let request = RemoteRequest::new("manageProduct")
            .action("delete")
            .field("id", id.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        self.store.mutate::<Product, _>(|items| items.retain(|p| p.id != id))?;
        self.store.schedule_refresh::<Product>();
        Ok(self.confirmed(&mut sub, &response, Some(id), Vec::new()))
    }

    pub async fn add_supplier(&self, draft: SupplierDraft) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageSupplier");
        sub.advance(SubmissionState::Validating);
        if draft.name.trim().is_empty() {
            return Err(sub.reject("supplier name is required"));
        }
        let request = RemoteRequest::new("manageSupplier")
            .action("add")
            .field("supplier", serde_json::to_value(&draft)?);
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        let id = response.str_field(&["id", "supplier_id"]);
        if let Some(id) = &id {
            let supplier = Supplier {
                id: id.clone(),
                name: draft.name.trim().to_string(),
                phone: draft.phone,
                address: draft.address,
            };
            self.store.mutate::<Supplier, _>(|items| items.push(supplier))?;
        }
        self.store.schedule_refresh::<Supplier>();
        Ok(self.confirmed(&mut sub, &response, id, Vec::new()))
    }

    pub async fn update_supplier(&self, supplier: Supplier) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageSupplier");
        sub.advance(SubmissionState::Validating);
        if supplier.id.trim().is_empty() {
            return Err(sub.reject("supplier id is required"));
        }
        if supplier.name.trim().is_empty() {
            return Err(sub.reject("supplier name is required"));
        }
        let request = RemoteRequest::new("manageSupplier")
            .action("update")
            .field("id", supplier.id.clone())
            .field("name", supplier.name.trim())
            .field("phone", supplier.phone.clone())
            .field("address", supplier.address.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        self.store.mutate::<Supplier, _>(|items| {
            if let Some(slot) = items.iter_mut().find(|s| s.id == supplier.id) {
                *slot = supplier.clone();
            }
        })?;
        self.store.schedule_refresh::<Supplier>();
        Ok(self.confirmed(&mut sub, &response, Some(supplier.id), Vec::new()))
    }

    /// Remove a supplier record. Products keep the id in `supplier_ids`
    /// until edited; eligibility is by id, so nothing else changes.
    pub async fn delete_supplier(&self, supplier_id: &str) -> Result<SubmitOutcome> {
        let mut sub = Submission::new("manageSupplier");
        sub.advance(SubmissionState::Validating);
        let id = supplier_id.trim().to_string();
        if id.is_empty() {
            return Err(sub.reject("supplier id is required"));
        }
        let request = RemoteRequest::new("manageSupplier")
            .action("delete")
            .field("id", id.clone());
        let response = match self.send(&mut sub, &request).await {
            Ok(r) => r,
            Err(outcome) => return Ok(outcome),
        };
        self.store.mutate::<Supplier, _>(|items| items.retain(|s| s.id != id))?;
        self.store.schedule_refresh::<Supplier>();
        Ok(self.confirmed(&mut sub, &response, Some(id), Vec::new()))
    }
}
