//! Reconciling repository.
//!
//! Owns the in-memory collections, the persisted cache, the supplier index
//! and the in-flight refresh table. Loads are cache-first: a populated cache
//! answers immediately while a refresh runs behind it. A refresh that comes
//! back empty, errors or times out leaves the cache untouched. Concurrent
//! refreshes of one entity type share a single remote round trip.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{call_with_timeout, RemoteRequest, RemoteResponse, RemoteStatus, RemoteStore};
use crate::db::{self, DbState};
use crate::error::{Result, StockError, Transient};
use crate::ledger;
use crate::models::{
    Document, LedgerEntry, Order, Pickup, Product, Purchase, Record, Supplier,
    Transaction, TransactionKind,
};
use crate::normalize::{normalize_list, now_display};
use crate::supplier_index::{has_supplier, SupplierIndex, MAX_CANDIDATES};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a refresh settled.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The remote list replaced the cache.
    Applied(usize),
    /// The remote answered but the list was empty; cache retained.
    Empty(RemoteStatus),
    /// Error or timeout; cache retained.
    Failed(Transient),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Remote,
}

/// Result of [`Store::load`].
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub items: Vec<T>,
    pub origin: Origin,
    /// Set when the remote leg failed and the cache answered instead.
    pub transient: Option<Transient>,
}

/// One reconciled collection.
pub struct Collection<T> {
    items: Mutex<Vec<T>>,
    hydrated: AtomicBool,
    in_flight: Mutex<Option<watch::Receiver<Option<RefreshOutcome>>>>,
    mutation_seq: AtomicU64,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            hydrated: AtomicBool::new(false),
            in_flight: Mutex::new(None),
            mutation_seq: AtomicU64::new(0),
        }
    }
}

/// Record types the store keeps a collection for.
pub trait Cached: Record {
    fn collection(store: &Store) -> &Collection<Self>;

    /// Runs after the collection changed (refresh or local mutation).
    fn after_change(_store: &Store, _items: &[Self]) {}
}

impl Cached for Product {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.products
    }

    fn after_change(store: &Store, items: &[Self]) {
        lock(&store.index).build(items, false);
    }
}

impl Cached for Supplier {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.suppliers
    }
}

impl Cached for Order {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.orders
    }
}

impl Cached for Purchase {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.purchases
    }
}

impl Cached for Pickup {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.pickups
    }
}

impl Cached for LedgerEntry {
    fn collection(store: &Store) -> &Collection<Self> {
        &store.ledger
    }
}

pub struct Store {
    db: Arc<DbState>,
    remote: Arc<dyn RemoteStore>,
    call_timeout: Duration,
    products: Collection<Product>,
    suppliers: Collection<Supplier>,
    orders: Collection<Order>,
    purchases: Collection<Purchase>,
    pickups: Collection<Pickup>,
    ledger: Collection<LedgerEntry>,
    index: Mutex<SupplierIndex>,
    changes: watch::Sender<u64>,
}

impl Store {
    pub fn new(db: Arc<DbState>, remote: Arc<dyn RemoteStore>, call_timeout: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            db,
            remote,
            call_timeout,
            products: Collection::default(),
            suppliers: Collection::default(),
            orders: Collection::default(),
            purchases: Collection::default(),
            pickups: Collection::default(),
            ledger: Collection::default(),
            index: Mutex::new(SupplierIndex::new()),
            changes,
        }
    }

    pub fn remote(&self) -> &dyn RemoteStore {
        self.remote.as_ref()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn db(&self) -> &DbState {
        &self.db
    }

    /// Ticks once per collection change; used to debounce derived metrics.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Issue a remote call with the configured deadline.
    pub async fn call(&self, request: &RemoteRequest) -> RemoteResponse {
        call_with_timeout(self.remote.as_ref(), request, self.call_timeout).await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current in-memory copy, hydrated from the persisted cache on first use.
    pub fn snapshot<T: Cached>(&self) -> Vec<T> {
        self.hydrate::<T>();
        lock(&T::collection(self).items).clone()
    }

    fn hydrate<T: Cached>(&self) {
        let coll = T::collection(self);
        if coll.hydrated.load(Ordering::Acquire) {
            return;
        }
        // Read under the items lock so a concurrent mutation cannot slip in
        // ahead of the persisted rows and overwrite them.
        let mut items = lock(&coll.items);
        if coll.hydrated.load(Ordering::Acquire) {
            return;
        }
        let rows = db::read_cache(&self.db.lock_conn(), T::KIND);
        let decoded: Vec<T> = rows
            .into_iter()
            .filter_map(|row| serde_json::from_value(row).ok())
            .collect();
        if !decoded.is_empty() && items.is_empty() {
            debug!(entity = %T::KIND, count = decoded.len(), "hydrated from local cache");
            *items = decoded;
            T::after_change(self, &items);
        }
        coll.hydrated.store(true, Ordering::Release);
    }

    /// Cache-first load.
    ///
    /// With `force == false` and a populated cache, answers from the cache
    /// and refreshes in the background. Otherwise waits for the refresh; a
    /// failed refresh still answers from the cache when one exists, and is
    /// only an error when there is nothing to fall back on.
    pub async fn load<T: Cached>(self: &Arc<Self>, force: bool) -> Result<Loaded<T>> {
        let cached = self.snapshot::<T>();
        if !force && !cached.is_empty() {
            self.schedule_refresh::<T>();
            return Ok(Loaded {
                items: cached,
                origin: Origin::Cache,
                transient: None,
            });
        }

        match self.refresh::<T>().await {
            RefreshOutcome::Applied(_) => Ok(Loaded {
                items: self.snapshot::<T>(),
                origin: Origin::Remote,
                transient: None,
            }),
            outcome => {
                let current = self.snapshot::<T>();
                let (answered, reason) = match outcome {
                    RefreshOutcome::Failed(reason) => (false, reason),
                    _ => (true, Transient::Empty),
                };
                if !current.is_empty() {
                    debug!(entity = %T::KIND, reason = %reason, "serving cached copy");
                    return Ok(Loaded {
                        items: current,
                        origin: Origin::Cache,
                        transient: Some(reason),
                    });
                }
                if answered {
                    // The store answered and has nothing: legitimately empty.
                    return Ok(Loaded {
                        items: current,
                        origin: Origin::Remote,
                        transient: Some(reason),
                    });
                }
                warn!(entity = %T::KIND, reason = %reason, "no cache and remote unavailable");
                Err(StockError::Unrecoverable {
                    entity: T::KIND,
                    reason,
                })
            }
        }
    }

    /// Warm every collection; failures are logged, not returned.
    pub async fn load_all(self: &Arc<Self>, force: bool) {
        macro_rules! warm {
            ($t:ty) => {
                match self.load::<$t>(force).await {
                    Ok(loaded) => info!(
                        entity = %<$t as Record>::KIND,
                        count = loaded.items.len(),
                        origin = ?loaded.origin,
                        "collection ready"
                    ),
                    Err(e) => warn!("{e}"),
                }
            };
        }
        warm!(Supplier);
        warm!(Product);
        warm!(Order);
        warm!(Purchase);
        warm!(Pickup);
        warm!(LedgerEntry);
    }

    /// Refresh in the background without waiting.
    pub fn schedule_refresh<T: Cached>(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let _ = store.refresh::<T>().await;
        });
    }

    /// Fetch and merge `T`. Callers arriving while a refresh is in flight
    /// wait for that one instead of issuing another request.
    pub async fn refresh<T: Cached>(self: &Arc<Self>) -> RefreshOutcome {
        let coll = T::collection(self);
        let mut rx = {
            let mut slot = lock(&coll.in_flight);
            match slot.as_ref() {
                Some(rx) => {
                    debug!(entity = %T::KIND, "joining in-flight refresh");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    let store = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = store.fetch_and_apply::<T>().await;
                        *lock(&T::collection(&store).in_flight) = None;
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let settled = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| {
            RefreshOutcome::Failed(Transient::Remote("refresh task ended without a result".into()))
        })
    }

    async fn fetch_and_apply<T: Cached>(&self) -> RefreshOutcome {
        let coll = T::collection(self);
        let seq_at_start = coll.mutation_seq.load(Ordering::SeqCst);
        let response = self.call(&RemoteRequest::read(T::KIND)).await;

        if let Some(reason) = response.transient(self.call_timeout) {
            return RefreshOutcome::Failed(reason);
        }

        let rows = normalize_list(&response.body);
        let items: Vec<T> = rows.iter().filter_map(T::from_remote).collect();
        if items.is_empty() {
            debug!(
                entity = %T::KIND,
                raw_rows = rows.len(),
                "remote returned no usable rows, keeping cache"
            );
            return RefreshOutcome::Empty(response.status);
        }

        if coll.mutation_seq.load(Ordering::SeqCst) != seq_at_start {
            // The authoritative list wins over a mutation made mid-read.
            debug!(entity = %T::KIND, "refresh overlapped a local mutation, remote copy wins");
        }

        let count = items.len();
        if let Err(e) = self.replace(items) {
            warn!(entity = %T::KIND, error = %e, "failed to persist refreshed collection");
        }
        debug!(entity = %T::KIND, count, "refresh applied");
        RefreshOutcome::Applied(count)
    }

    fn replace<T: Cached>(&self, items: Vec<T>) -> Result<()> {
        self.hydrate::<T>();
        let coll = T::collection(self);
        let persisted = {
            let mut current = lock(&coll.items);
            *current = items;
            T::after_change(self, &current);
            to_rows(&current)?
        };
        db::write_cache(&self.db.lock_conn(), T::KIND, &persisted)?;
        self.changes.send_modify(|v| *v += 1);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes (optimistic, after remote confirmation only)
    // -----------------------------------------------------------------------

    /// Apply a local mutation to `T`, persist it and notify subscribers.
    pub fn mutate<T: Cached, R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R> {
        self.hydrate::<T>();
        let coll = T::collection(self);
        let (out, persisted) = {
            let mut items = lock(&coll.items);
            let out = f(&mut items);
            coll.mutation_seq.fetch_add(1, Ordering::SeqCst);
            T::after_change(self, &items);
            (out, to_rows(&items)?)
        };
        db::store_cache(&self.db.lock_conn(), T::KIND, &persisted)?;
        self.changes.send_modify(|v| *v += 1);
        Ok(out)
    }

    /// Project a confirmed transaction into products and the ledger, and
    /// record the document locally until the next refresh replaces it.
    pub fn apply_confirmed(&self, tx: &Transaction) -> Result<Vec<LedgerEntry>> {
        let ts = now_display();
        let entries =
            self.mutate::<Product, _>(|products| ledger::apply_confirmed_transaction(tx, products, &ts))?;
        self.mutate::<LedgerEntry, _>(|ledger| {
            let older = std::mem::take(ledger);
            ledger.extend(entries.iter().cloned());
            ledger.extend(older);
        })?;

        let doc = Document {
            id: tx
                .doc_id
                .clone()
                .unwrap_or_else(|| format!("pending-{}", uuid::Uuid::new_v4())),
            date: tx.date.clone(),
            operator: tx.operator.clone(),
            counterparty: tx.counterparty.clone(),
            note: tx.note.clone(),
            lines: tx.lines.clone(),
            total: tx.total(),
        };
        match tx.kind {
            TransactionKind::Purchase => {
                self.mutate::<Purchase, _>(|docs| docs.insert(0, Purchase(doc)))?;
            }
            TransactionKind::Sale => {
                self.mutate::<Order, _>(|docs| docs.insert(0, Order(doc)))?;
            }
            TransactionKind::Pickup => {
                self.mutate::<Pickup, _>(|docs| docs.insert(0, Pickup(doc)))?;
            }
            TransactionKind::PickupReversal => {
                self.mutate::<Pickup, _>(|docs| docs.retain(|p| p.0.id != doc.id))?;
            }
            TransactionKind::Adjustment => {}
        }

        info!(
            kind = ?tx.kind,
            doc = tx.doc_id.as_deref().unwrap_or(""),
            entries = entries.len(),
            "transaction projected"
        );
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn product(&self, id: &str) -> Option<Product> {
        self.hydrate::<Product>();
        lock(&self.products.items)
            .iter()
            .find(|p| p.id == id.trim())
            .cloned()
    }

    pub fn supplier(&self, id: &str) -> Option<Supplier> {
        self.hydrate::<Supplier>();
        lock(&self.suppliers.items)
            .iter()
            .find(|s| s.id == id.trim())
            .cloned()
    }

    pub fn pickup(&self, id: &str) -> Option<Pickup> {
        self.hydrate::<Pickup>();
        lock(&self.pickups.items)
            .iter()
            .find(|p| p.0.id == id.trim())
            .cloned()
    }

    /// Whether `product_id` lists `supplier_id` as eligible, by exact id.
    pub fn is_eligible(&self, product_id: &str, supplier_id: &str) -> bool {
        self.product(product_id)
            .is_some_and(|p| has_supplier(&p, supplier_id))
    }

    /// Rebuild the supplier index, optionally ignoring the content version.
    pub fn rebuild_index(&self, force: bool) -> bool {
        let products = self.snapshot::<Product>();
        lock(&self.index).build(&products, force)
    }

    /// Products a purchase line for `supplier_id` may use, filtered by keyword.
    pub fn eligible_products(&self, supplier_id: &str, keyword: &str) -> Vec<Product> {
        let products = self.snapshot::<Product>();
        let mut index = lock(&self.index);
        index.build(&products, false);
        index
            .candidates(supplier_id, keyword, &products, MAX_CANDIDATES)
            .into_iter()
            .cloned()
            .collect()
    }
}

fn to_rows<T: Record>(items: &[T]) -> Result<Vec<Value>> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(StockError::from))
        .collect()
}
