//! The State Store.
//!
//! A `Database` wraps one SQLite connection shared behind a mutex. Every
//! mutating operation runs in a single `BEGIN IMMEDIATE` transaction through
//! [`Database::write`]: read current state, check preconditions, write, commit.
//! Returning an error from the closure drops the transaction, which rolls it
//! back, so a refused operation never leaves a partial write behind.
//!
//! Operations are grouped by component in the submodules; each adds an
//! `impl Database` block.

mod conflicts;
mod evals;
mod features;
mod gates;
mod invocations;
mod learnings;
mod propagation;
mod schema;
mod tasks;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::Phase;

pub use conflicts::ScanOutcome;
pub use evals::Evaluation;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    config: Arc<EngineConfig>,
}

impl Database {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(default_database_path()?)
    }

    /// Open the database named by the configuration, or the default location.
    pub fn open_configured(config: EngineConfig) -> anyhow::Result<Self> {
        let path = match &config.database_path {
            Some(path) => path.clone(),
            None => default_database_path()?,
        };
        Ok(Self::open(path)?.with_config(config))
    }

    pub fn open_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: Arc::new(EngineConfig::default()),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply pending migrations. Returns the versions that were applied.
    pub fn migrate(&self) -> anyhow::Result<Vec<&'static str>> {
        let mut conn = self.lock();
        schema::run_migrations(&mut conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave an open transaction
        // behind (it is rolled back on drop), so the connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` in a consistent read snapshot.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` in an immediate write transaction, committing only on success.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Like [`Database::write`], but the inner result is a refusal whose side
    /// effects must persist: both `Ok` and inner `Err` commit. Only the outer
    /// error rolls back.
    pub(crate) fn write_gated<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<Result<T>>,
    ) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&tx)?;
        tx.commit()?;
        outcome
    }
}

fn default_database_path() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "rocket-phasegate")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("phasegate.db"))
}

/// Fixed-width UTC timestamp, so string order is chronological order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time truncated to the stored precision.
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::parse_from_rfc3339(&ts(&now))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    parse_datetime(idx, &row.get::<_, String>(idx)?)
}

pub(crate) fn get_opt_datetime(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| parse_datetime(idx, &s))
        .transpose()
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&row.get::<_, String>(idx)?).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn get_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e: String| conversion_error(idx, e))
}

pub(crate) fn get_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(&row.get::<_, String>(idx)?).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn get_phase(row: &Row<'_>, idx: usize) -> rusqlite::Result<Phase> {
    Ok(Phase::from_db(row.get(idx)?))
}
