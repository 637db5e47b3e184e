//! Diagnostics for the stockroom.
//!
//! Provides:
//! - **About info**: version, platform
//! - **Cache health**: schema version, per-collection row counts and
//!   last-write times from the persisted cache
//! - **Logging**: console + daily rolling file subscriber, log retention

use crate::db::{self, DbState};
use crate::error::Result;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Daily log files are named `stockroom.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "stockroom";

const APP_DIR_NAME: &str = "com.thesmall.stockroom";

pub const DEFAULT_LOG_FILTER: &str = "info,small_stockroom_lib=debug";

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

// ---------------------------------------------------------------------------
// Cache health
// ---------------------------------------------------------------------------

/// Schema version and per-collection cache stats.
pub fn get_cache_health(db: &DbState) -> Result<Value> {
    let conn = db.lock_conn();

    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let collections: Vec<Value> = db::cache_summary(&conn)?
        .into_iter()
        .map(|(key, count, updated_at)| {
            json!({
                "collection": key,
                "items": count,
                "updatedAt": updated_at,
            })
        })
        .collect();

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "collections": collections,
        "dbSizeBytes": db_size,
    }))
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Platform data directory for the stockroom (`.../com.thesmall.stockroom`).
pub fn app_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join(APP_DIR_NAME)
}

pub fn get_log_dir() -> PathBuf {
    app_data_dir().join("logs")
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber: `RUST_LOG` (or `default_filter`), a console
/// layer and a daily rolling file layer. Keep the returned guard alive for
/// the life of the process; dropping it flushes the file writer.
pub fn init_logging(default_filter: &str) -> WorkerGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    prune_old_logs();

    let log_dir = get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

fn is_log_file(name: &str) -> bool {
    name.starts_with(&format!("{LOG_FILE_PREFIX}.")) || name == "stockroom.log"
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    prune_logs_in(&get_log_dir(), MAX_LOG_FILES);
}

fn prune_logs_in(log_dir: &std::path::Path, keep: usize) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if is_log_file(name) {
                    let modified = entry
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(std::time::UNIX_EPOCH);
                    log_files.push((path, modified));
                }
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_log_dir_is_stable() {
        let d1 = get_log_dir();
        assert_eq!(d1, get_log_dir());
        assert!(d1.to_string_lossy().contains(APP_DIR_NAME));
    }

    #[test]
    fn test_cache_health_reports_collections() {
        let dir = std::env::temp_dir().join(format!("stockroom_diag_{}", uuid::Uuid::new_v4()));
        let db_state = crate::db::init(&dir).unwrap();
        {
            let conn = db_state.conn.lock().unwrap();
            db::write_cache(&conn, EntityKind::Suppliers, &[json!({ "id": "S1" })]).unwrap();
        }
        let health = get_cache_health(&db_state).unwrap();
        assert_eq!(health["schemaVersion"], 2);
        assert_eq!(health["collections"][0]["collection"], "suppliers");
        assert_eq!(health["collections"][0]["items"], 1);
        assert!(health["dbSizeBytes"].as_u64().unwrap() > 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_keeps_newest_log_files_only() {
        let dir = std::env::temp_dir().join(format!("stockroom_logs_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        for day in 1..=5 {
            std::fs::write(dir.join(format!("stockroom.2024-05-0{day}")), "x").unwrap();
        }
        std::fs::write(dir.join("unrelated.txt"), "keep").unwrap();

        prune_logs_in(&dir, 2);
        let mut left: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left.len(), 3);
        assert!(left.contains(&"unrelated.txt".to_string()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
