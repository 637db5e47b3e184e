//! Scripted remote store and fixtures shared by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{RemoteRequest, RemoteStore};
use crate::db;
use crate::models::{Operator, Product, SupplierIds};
use crate::store::Store;

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Delayed(Duration, Value),
    Fail(String),
    /// Never answers; only a timeout ends the call.
    Hang,
}

/// Replies are looked up by request `type`: queued one-shot replies first,
/// then the standing reply set with [`FakeRemote::script`].
#[derive(Default)]
pub struct FakeRemote {
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    standing: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<RemoteRequest>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, kind: &str, reply: Reply) {
        self.standing.lock().unwrap().insert(kind.to_string(), reply);
    }

    pub fn push(&self, kind: &str, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(kind.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_request(&self, kind: &str) -> Option<RemoteRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.kind == kind)
            .cloned()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn call(&self, request: &RemoteRequest) -> Result<Value, String> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = {
            let queued = self
                .queued
                .lock()
                .unwrap()
                .get_mut(&request.kind)
                .and_then(VecDeque::pop_front);
            queued.or_else(|| self.standing.lock().unwrap().get(&request.kind).cloned())
        };
        match reply {
            Some(Reply::Json(v)) => Ok(v),
            Some(Reply::Delayed(d, v)) => {
                tokio::time::sleep(d).await;
                Ok(v)
            }
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(json!({ "status": "error", "message": "unscripted request" })),
        }
    }
}

pub fn product(id: &str, stock: i64, suppliers: &str) -> Product {
    Product {
        id: id.into(),
        sku: None,
        name: format!("Product {id}"),
        unit: "pcs".into(),
        price: 20.0,
        cost: 10.0,
        stock,
        safety_stock: 2,
        category: "general".into(),
        supplier_ids: SupplierIds::new(suppliers),
        expiry_date: None,
        last_purchase_date: None,
    }
}

pub fn operator() -> Operator {
    Operator {
        id: "m1".into(),
        name: "Alice".into(),
    }
}

pub fn store_with(remote: Arc<FakeRemote>) -> Arc<Store> {
    let db = db::open_in_memory().expect("in-memory db");
    Arc::new(Store::new(
        Arc::new(db),
        remote,
        Duration::from_millis(8000),
    ))
}
