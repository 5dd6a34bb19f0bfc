// Credential persistence
// One JSON record under a well-known key in an auth_kv table

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::CredentialPair;

/// Storage key of the persisted credential pair
pub const AUTH_CONTEXT_KEY: &str = "auth_context";

/// Durable holder of the current credential pair
pub trait CredentialStore: Send + Sync {
    /// Load the persisted pair
    /// Missing or corrupt data is reported as `None`, never as an error.
    fn load(&self) -> Option<CredentialPair>;

    /// Overwrite the persisted pair
    fn save(&self, pair: &CredentialPair) -> Result<()>;

    /// Remove the persisted pair; a no-op when nothing is stored
    fn clear(&self) -> Result<()>;
}

fn decode(raw: &str) -> Option<CredentialPair> {
    match serde_json::from_str::<CredentialPair>(raw) {
        Ok(pair) if !pair.access_token.is_empty() => Some(pair),
        Ok(_) => {
            tracing::warn!("Stored auth context has an empty access token, treating as logged out");
            None
        }
        Err(e) => {
            tracing::warn!("Stored auth context is malformed, treating as logged out: {}", e);
            None
        }
    }
}

/// SQLite-backed store
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCredentialStore {
    /// Open (or create) the session database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write a raw value under the auth context key
    #[cfg(test)]
    fn put_raw(&self, raw: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        conn.execute(
            "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
            [AUTH_CONTEXT_KEY, raw],
        )?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self) -> Option<CredentialPair> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => {
                tracing::error!("Credential store lock poisoned, treating as logged out");
                return None;
            }
        };

        let raw: Option<String> = match conn
            .query_row(
                "SELECT value FROM auth_kv WHERE key = ?",
                [AUTH_CONTEXT_KEY],
                |row| row.get(0),
            )
            .optional()
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to read auth context from SQLite: {}", e);
                None
            }
        };

        raw.as_deref().and_then(decode)
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        let raw = serde_json::to_string(pair).context("Failed to serialize auth context")?;
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        conn.execute(
            "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
            [AUTH_CONTEXT_KEY, raw.as_str()],
        )
        .context("Failed to save auth context to SQLite")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        conn.execute("DELETE FROM auth_kv WHERE key = ?", [AUTH_CONTEXT_KEY])
            .context("Failed to clear auth context from SQLite")?;
        Ok(())
    }
}

/// In-process store, keeps the serialized record like the durable one does
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: &CredentialPair) -> Self {
        Self {
            slot: Mutex::new(serde_json::to_string(pair).ok()),
        }
    }

    /// Seed with arbitrary bytes, e.g. a record written by an older client
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<CredentialPair> {
        let slot = self.slot.lock().ok()?;
        slot.as_deref().and_then(decode)
    }

    fn save(&self, pair: &CredentialPair) -> Result<()> {
        let raw = serde_json::to_string(pair).context("Failed to serialize auth context")?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        *slot = Some(raw);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}
