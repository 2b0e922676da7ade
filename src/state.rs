// src/state.rs

//! Durable engine state.
//!
//! All state lives in SQLite: a single key/value table holding the
//! serialized fields of [`EngineState`]. A save replaces every row inside
//! one transaction, so a crash leaves either the previous or the new state,
//! never a mix.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::host::ModuleId;

/// Current schema version.
const SCHEMA_VERSION: i32 = 1;

/// The engine's persisted view of the world.
///
/// `required_features` is what the user asked for; `installed_features` is
/// what resolution actually produced (a superset). `managed_modules` are
/// the modules whose lifecycle the engine owns, and `module_checksums`
/// fingerprints the content of updateable managed modules by location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    pub repositories: BTreeSet<String>,
    pub required_features: BTreeSet<String>,
    pub installed_features: BTreeSet<String>,
    pub managed_modules: BTreeSet<ModuleId>,
    pub module_checksums: BTreeMap<String, u64>,
    pub boot_done: bool,
}

/// SQLite-backed store for [`EngineState`].
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (and migrate) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Load the persisted state. Missing keys fall back to defaults, so an
    /// empty store loads as the default state.
    pub fn load(&self) -> Result<EngineState> {
        Ok(EngineState {
            repositories: self.get("repositories")?.unwrap_or_default(),
            required_features: self.get("required_features")?.unwrap_or_default(),
            installed_features: self.get("installed_features")?.unwrap_or_default(),
            managed_modules: self.get("managed_modules")?.unwrap_or_default(),
            module_checksums: self.get("module_checksums")?.unwrap_or_default(),
            boot_done: self.get("boot_done")?.unwrap_or_default(),
        })
    }

    /// Persist the state atomically.
    pub fn save(&mut self, state: &EngineState) -> Result<()> {
        let tx = self.conn.transaction()?;
        put(&tx, "repositories", &state.repositories)?;
        put(&tx, "required_features", &state.required_features)?;
        put(&tx, "installed_features", &state.installed_features)?;
        put(&tx, "managed_modules", &state.managed_modules)?;
        put(&tx, "module_checksums", &state.module_checksums)?;
        put(&tx, "boot_done", &state.boot_done)?;
        tx.commit()?;
        debug!(
            "Saved engine state: {} required, {} installed, {} managed",
            state.required_features.len(),
            state.installed_features.len(),
            state.managed_modules.len()
        );
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM engine_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn put<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    conn.execute(
        "INSERT INTO engine_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

/// Bring the database up to the current schema.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    let current: i32 = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    info!("Migrating state store from version {} to {}", current, SCHEMA_VERSION);
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS engine_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}
