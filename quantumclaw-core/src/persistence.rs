//! Shared persistence utilities — atomic file writes, JSON load/save, and
//! the [`Backend`] abstraction the daemon's stateful subsystems (shared DB,
//! delivery queue, exec approvals) are built on.
//!
//! Consolidates the atomic write pattern (write to .tmp then rename) used
//! across 24+ files in the codebase into a single reusable implementation.

use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ConfigError, Result, RustantError};

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then atomically renames to the target path. This prevents corruption from
/// partial writes or process crashes.
///
/// Creates parent directories if they don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
///
/// Writes to a `.tmp` sibling file, then atomically renames to the target path.
/// Creates parent directories if they don't exist.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
/// Returns `Err` on I/O errors or deserialization failures.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// A key-value store a subsystem can degrade to a local fallback on, per the
/// daemon's "remote store with a local-file shadow" pattern: `SharedDb` is
/// the primary backend, [`JsonFileBackend`] is what a degraded boot stage
/// falls back to when the pool can't be opened (locked file, missing
/// directory, corrupt database).
#[async_trait::async_trait]
pub trait Backend<T>: Send + Sync
where
    T: Send + Sync,
{
    /// Store a record under `key`, overwriting any existing value.
    async fn put(&self, key: &str, value: &T) -> Result<()>;

    /// Fetch the record stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<T>>;

    /// Remove the record stored under `key`. No-op if absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List every key currently stored.
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Cheap liveness check used by boot stages to decide whether to stay on
    /// this backend or fall back.
    fn is_healthy(&self) -> bool;
}

/// JSON-file-per-key fallback backend, built on [`atomic_write_json`] and
/// [`load_json`]. Used when the pooled SQLite backend can't be opened.
pub struct JsonFileBackend<T> {
    dir: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> JsonFileBackend<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _marker: PhantomData,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait::async_trait]
impl<T> Backend<T> for JsonFileBackend<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn put(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        atomic_write_json(&path, value)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        Ok(load_json(&path)?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Pooled SQLite-backed shared store. Every record is addressed by
/// `(table, key)` and stored as a JSON blob plus a `updated_at` timestamp —
/// the same "one wide table, JSON payload" shape the daemon uses everywhere
/// it needs ad-hoc structured records (threads, kv context, knowledge notes)
/// without hand-rolling a schema migration per record type.
pub struct SharedDb {
    pool: Pool<SqliteConnectionManager>,
    healthy: Mutex<bool>,
}

impl SharedDb {
    /// Open (creating if absent) the SQLite file at `path` and run the one
    /// migration this store needs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(8).build(manager).map_err(|e| {
            RustantError::Config(ConfigError::Invalid {
                message: format!("failed to open shared db pool at {}: {e}", path.display()),
            })
        })?;
        {
            let conn = pool.get().map_err(|e| {
                RustantError::Config(ConfigError::Invalid {
                    message: format!("failed to acquire shared db connection: {e}"),
                })
            })?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS shared_kv (
                    namespace TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (namespace, key)
                );",
            )
            .map_err(|e| {
                RustantError::Config(ConfigError::Invalid {
                    message: format!("failed to migrate shared db: {e}"),
                })
            })?;
        }
        Ok(Self {
            pool,
            healthy: Mutex::new(true),
        })
    }

    /// Store a record under `(namespace, key)`.
    pub async fn put(&self, namespace: &str, key: &str, value: &(impl Serialize + Sync)) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let pool = self.pool.clone();
        let namespace = namespace.to_string();
        let key = key.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let res = tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = pool.get().map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some(e.to_string()),
                )
            })?;
            conn.execute(
                "INSERT INTO shared_kv (namespace, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![namespace, key, json, now],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))?;
        res.map_err(|e| {
            *self.healthy.lock().unwrap() = false;
            RustantError::Config(ConfigError::Invalid { message: e.to_string() })
        })
    }

    /// Fetch a record stored under `(namespace, key)`.
    pub async fn get<T: DeserializeOwned + Send + 'static>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>> {
        let pool = self.pool.clone();
        let namespace = namespace.to_string();
        let key = key.to_string();
        let raw: Option<String> = tokio::task::spawn_blocking(move || -> rusqlite::Result<Option<String>> {
            let conn = pool.get().map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some(e.to_string()),
                )
            })?;
            conn.query_row(
                "SELECT value FROM shared_kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))?
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))?;

        raw.map(|s| serde_json::from_str(&s).map_err(RustantError::from))
            .transpose()
    }

    /// Remove a record stored under `(namespace, key)`.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let pool = self.pool.clone();
        let namespace = namespace.to_string();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = pool.get().map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some(e.to_string()),
                )
            })?;
            conn.execute(
                "DELETE FROM shared_kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))?
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))
    }

    /// List every key stored under `namespace`.
    pub async fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let pool = self.pool.clone();
        let namespace = namespace.to_string();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<String>> {
            let conn = pool.get().map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    Some(e.to_string()),
                )
            })?;
            let mut stmt =
                conn.prepare("SELECT key FROM shared_kv WHERE namespace = ?1 ORDER BY key")?;
            let rows = stmt.query_map(rusqlite::params![namespace], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))?
        .map_err(|e| RustantError::Config(ConfigError::Invalid { message: e.to_string() }))
    }

    /// Whether the last operation against this pool succeeded. Boot stages
    /// use this to decide whether to recover from a degraded state.
    pub fn is_healthy(&self) -> bool {
        *self.healthy.lock().unwrap()
    }
}
