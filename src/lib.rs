//! Small Stockroom - inventory back office core.
//!
//! Keeps a local SQLite-backed cache of products, suppliers, documents and
//! the stock ledger consistent with an authoritative remote store, projects
//! confirmed transactions into running stock, and maintains the
//! supplier -> eligible products index used to validate purchase lines.

use std::sync::Arc;
use tracing::info;

pub mod amounts;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod store;
pub mod submit;
pub mod supplier_index;

#[cfg(test)]
mod test_support;

pub use api::{HttpRemote, RemoteRequest, RemoteResponse, RemoteStatus, RemoteStore};
pub use config::Config;
pub use dashboard::{spawn_dashboard, DashboardSnapshot};
pub use db::DbState;
pub use error::{Result, StockError, Transient};
pub use models::{
    Direction, EntityKind, LedgerEntry, LineItem, Operator, Order, Pickup, Product, Purchase,
    Supplier, SupplierIds,
};
pub use store::{Loaded, Origin, Store};
pub use submit::{FixedOperator, OperatorProvider, Pipeline, SubmitOutcome};

/// Everything a front end needs, wired from a [`Config`].
pub struct App {
    pub config: Config,
    pub db: Arc<DbState>,
    pub store: Arc<Store>,
    pub pipeline: Pipeline,
}

impl App {
    /// Open the local database, apply persisted overrides and connect the
    /// HTTP remote. Does not touch the network.
    pub fn open(mut config: Config, operator: Arc<dyn OperatorProvider>) -> Result<Self> {
        let db = Arc::new(db::init(&config.data_dir)?);
        {
            let conn = db.lock_conn();
            config.apply_overrides(&conn);
        }
        if !config.is_configured() {
            return Err(StockError::Config(
                "no remote endpoint; set STOCKROOM_REMOTE_URL or save one with set-endpoint".into(),
            ));
        }

        let remote = HttpRemote::new(&config.remote_url, config.api_key.clone(), config.call_timeout)?;
        info!(endpoint = remote.endpoint(), "remote store configured");
        let store = Arc::new(Store::new(db.clone(), Arc::new(remote), config.call_timeout));
        let pipeline = Pipeline::new(store.clone(), operator);
        Ok(Self {
            config,
            db,
            store,
            pipeline,
        })
    }
}
