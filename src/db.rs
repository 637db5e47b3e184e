//! Local SQLite layer for the stockroom.
//!
//! Holds the persisted read-through cache (one JSON array per entity type)
//! and the `local_settings` overrides. The cache is never the system of
//! record: it only ever holds the last non-empty collection the remote store
//! returned, plus optimistic mutations applied after confirmed writes.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::error::{Result, StockError};
use crate::models::EntityKind;

/// Shared database handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection. A panic in another holder leaves SQLite itself
    /// consistent, so a poisoned lock is taken over rather than reported.
    pub fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/stockroom.db`.
///
/// On open failure the file is deleted and opened again once; the cache is
/// rebuildable from the remote store so losing it only costs a refresh.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| StockError::Config(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join("stockroom.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory database with the full schema, for tests and dry runs.
pub fn open_in_memory() -> Result<DbState> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        debug!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings and the entity cache.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE TABLE IF NOT EXISTS entity_cache (
            cache_key TEXT PRIMARY KEY,
            data TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )?;
    Ok(())
}

/// Migration v2: row counts on the cache, for diagnostics without parsing.
fn migrate_v2(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "entity_cache", "item_count")? {
        conn.execute_batch("ALTER TABLE entity_cache ADD COLUMN item_count INTEGER NOT NULL DEFAULT 0;")?;
    }
    conn.execute_batch("INSERT INTO schema_version (version) VALUES (2);")?;
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect::<Vec<_>>();
    Ok(names.iter().any(|n| n == column))
}

// ---------------------------------------------------------------------------
// Entity cache
// ---------------------------------------------------------------------------

/// Read the cached JSON array for `kind`. Returns an empty vec on miss or
/// on a corrupt row.
pub fn read_cache(conn: &Connection, kind: EntityKind) -> Vec<serde_json::Value> {
    let key = kind.cache_key();
    let json_str: Option<String> = conn
        .query_row(
            "SELECT data FROM entity_cache WHERE cache_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .ok();

    match json_str {
        Some(s) => match serde_json::from_str::<serde_json::Value>(&s) {
            Ok(serde_json::Value::Array(arr)) => arr,
            Ok(_) => {
                warn!("entity_cache[{key}] is not an array, ignoring");
                vec![]
            }
            Err(e) => {
                error!("entity_cache[{key}] JSON parse error: {e}");
                vec![]
            }
        },
        None => vec![],
    }
}

/// Replace the cached array for `kind` with a refreshed copy. Empty arrays
/// are refused so a blank remote answer can never wipe a populated cache.
pub fn write_cache(conn: &Connection, kind: EntityKind, items: &[serde_json::Value]) -> Result<bool> {
    if items.is_empty() {
        debug!(entity = %kind, "refusing to persist empty collection");
        return Ok(false);
    }
    store_cache(conn, kind, items)?;
    Ok(true)
}

/// Persist a confirmed local change. Unlike [`write_cache`] this accepts
/// an empty array: deleting the last record must stick across restarts.
pub fn store_cache(conn: &Connection, kind: EntityKind, items: &[serde_json::Value]) -> Result<()> {
    let json_str = serde_json::to_string(items)?;
    conn.execute(
        "INSERT INTO entity_cache (cache_key, data, item_count, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(cache_key) DO UPDATE SET
            data = excluded.data,
            item_count = excluded.item_count,
            updated_at = excluded.updated_at",
        params![kind.cache_key(), json_str, items.len() as i64],
    )?;
    Ok(())
}

/// `(cache_key, item_count, updated_at)` for every cached collection.
pub fn cache_summary(conn: &Connection) -> Result<Vec<(String, i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT cache_key, item_count, COALESCE(updated_at, '') FROM entity_cache ORDER BY cache_key",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_migrations_to_latest() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let tables = table_names(&conn);
        assert!(tables.contains(&"local_settings".to_string()));
        assert!(tables.contains(&"entity_cache".to_string()));
        assert!(column_exists(&conn, "entity_cache", "item_count").unwrap());

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).expect("second run");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_cache_roundtrip_and_empty_refusal() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        assert!(read_cache(&conn, EntityKind::Products).is_empty());

        let items = vec![json!({ "id": "P1" }), json!({ "id": "P2" })];
        assert!(write_cache(&conn, EntityKind::Products, &items).unwrap());
        assert_eq!(read_cache(&conn, EntityKind::Products), items);

        assert!(!write_cache(&conn, EntityKind::Products, &[]).unwrap());
        assert_eq!(read_cache(&conn, EntityKind::Products).len(), 2);

        let summary = cache_summary(&conn).unwrap();
        assert_eq!(summary[0].0, "products");
        assert_eq!(summary[0].1, 2);
    }

    #[test]
    fn test_store_cache_persists_empty_collection() {
        let db = open_in_memory().unwrap();
        let conn = db.lock_conn();
        store_cache(&conn, EntityKind::Pickups, &[json!({ "id": "K1" })]).unwrap();
        store_cache(&conn, EntityKind::Pickups, &[]).unwrap();
        assert!(read_cache(&conn, EntityKind::Pickups).is_empty());
        assert_eq!(cache_summary(&conn).unwrap()[0].1, 0);
    }

    #[test]
    fn test_corrupt_cache_row_reads_empty() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entity_cache (cache_key, data) VALUES ('suppliers', '{broken')",
            [],
        )
        .unwrap();
        assert!(read_cache(&conn, EntityKind::Suppliers).is_empty());
    }

    #[test]
    fn test_settings_upsert() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        assert_eq!(get_setting(&conn, "remote", "endpoint_url"), None);
        set_setting(&conn, "remote", "endpoint_url", "https://a.example").unwrap();
        set_setting(&conn, "remote", "endpoint_url", "https://b.example").unwrap();
        assert_eq!(
            get_setting(&conn, "remote", "endpoint_url").as_deref(),
            Some("https://b.example")
        );
    }
}
