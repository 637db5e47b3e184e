//! `stockroom` - command line front end for the stockroom core.
//!
//! ```text
//! stockroom status
//! stockroom ledger --direction OUT --keyword cable
//! stockroom candidates --supplier S1 --keyword tape
//! stockroom set-stock --product P1 --stock 12 --operator "m1|Alice"
//! stockroom set-endpoint https://script.example/exec
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use small_stockroom_lib::{
    config, db, diagnostics, models::filter_ledger, spawn_dashboard, App, Config, Direction,
    FixedOperator, LedgerEntry, Operator, Product, SubmitOutcome,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "stockroom", version, about = "Inventory back office: stock ledger and cache")]
struct Args {
    /// Attribution for writes, as `id|name`.
    #[arg(long, global = true, default_value = "cli|stockroom")]
    operator: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh every collection and print the dashboard.
    Status {
        /// Serve from the local cache only.
        #[arg(long)]
        offline: bool,
    },
    /// Print ledger entries, newest first.
    Ledger {
        #[arg(long)]
        direction: Option<String>,
        #[arg(long, default_value = "")]
        keyword: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Products a supplier may deliver.
    Candidates {
        #[arg(long)]
        supplier: String,
        #[arg(long, default_value = "")]
        keyword: String,
    },
    /// Adjust a product's stock by a signed delta.
    Adjust {
        #[arg(long)]
        product: String,
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Adjust a product's stock to an absolute level.
    SetStock {
        #[arg(long)]
        product: String,
        #[arg(long)]
        stock: i64,
    },
    /// Persist the remote endpoint URL in local settings.
    SetEndpoint { url: String },
    /// Local cache and schema statistics.
    Health,
}

fn parse_operator(raw: &str) -> Operator {
    match raw.split_once('|') {
        Some((id, name)) => Operator {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
        },
        None => Operator {
            id: raw.trim().to_string(),
            name: raw.trim().to_string(),
        },
    }
}

fn report(outcome: SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Confirmed(c) => {
            println!(
                "confirmed{} ({} ledger entries)",
                c.doc_id.map(|id| format!(" {id}")).unwrap_or_default(),
                c.entries.len()
            );
            Ok(())
        }
        SubmitOutcome::NoChange => {
            println!("no change");
            Ok(())
        }
        SubmitOutcome::Rejected(msg) => bail!("rejected by remote store: {msg}"),
        SubmitOutcome::TimedOut => bail!("remote store did not answer in time; nothing was applied"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env().context("reading configuration")?;
    let _guard = diagnostics::init_logging(&config.log_filter);
    info!("Starting Small Stockroom v{}", env!("CARGO_PKG_VERSION"));

    match &args.command {
        Command::SetEndpoint { url } => {
            let db = db::init(&config.data_dir).context("opening local database")?;
            let conn = db.lock_conn();
            let saved = config::save_endpoint(&conn, url)?;
            println!("endpoint saved: {saved}");
            return Ok(());
        }
        Command::Health => {
            let db = db::init(&config.data_dir).context("opening local database")?;
            let health = diagnostics::get_cache_health(&db)?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            return Ok(());
        }
        _ => {}
    }

    let operator = Arc::new(FixedOperator(parse_operator(&args.operator)));
    let app = App::open(config, operator).context("starting stockroom")?;

    match args.command {
        Command::Status { offline } => {
            if !offline {
                app.store.load_all(true).await;
            }
            let dashboard = spawn_dashboard(app.store.clone(), app.config.dashboard_debounce);
            let snapshot = dashboard.borrow().clone();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Ledger {
            direction,
            keyword,
            limit,
        } => {
            let direction = match direction.as_deref() {
                None => None,
                Some(code) => match Direction::from_code(code) {
                    Some(d) => Some(d),
                    None => bail!("unknown direction {code:?}; expected IN, OUT or ADJ"),
                },
            };
            let entries = match app.store.load::<LedgerEntry>(true).await {
                Ok(loaded) => loaded.items,
                Err(e) => {
                    warn!("{e}");
                    return Err(e.into());
                }
            };
            for e in filter_ledger(&entries, direction, &keyword).into_iter().take(limit) {
                println!(
                    "{}  {:<3}  {:<12} {:<24} {:>6}  {}",
                    e.ts,
                    e.direction.code(),
                    e.doc_ref,
                    e.product_name,
                    e.qty,
                    small_stockroom_lib::models::operator_display_name(&e.operator)
                );
            }
        }
        Command::Candidates { supplier, keyword } => {
            app.store.load::<Product>(true).await?;
            for p in app.store.eligible_products(&supplier, &keyword) {
                println!(
                    "{:<10} {:<12} {:<32} stock {}",
                    p.id,
                    p.sku.as_deref().unwrap_or("-"),
                    p.name,
                    p.stock
                );
            }
        }
        Command::Adjust {
            product,
            delta,
            note,
        } => {
            app.store.load::<Product>(true).await?;
            report(app.pipeline.adjust_stock(&product, delta, &note).await?)?;
        }
        Command::SetStock { product, stock } => {
            app.store.load::<Product>(true).await?;
            report(app.pipeline.set_stock(&product, stock).await?)?;
        }
        Command::SetEndpoint { .. } | Command::Health => {}
    }

    Ok(())
}
