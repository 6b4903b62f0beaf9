//! Embedded persistent store.
//!
//! One redb file holds three tables, `configs`, `stats` and `state`, each
//! mapping a ConfigID (or a well-known state key) to a JSON-serialised
//! record. redb's single-writer transactions give every mutation here
//! read-modify-write atomicity; readers see the last committed state.
//!
//! Config records are never physically removed: deletion flips the `deleted`
//! tombstone, and a JSON snapshot of the record is written to disk first so
//! an operator can reconstruct what was retired.

use std::path::{Path, PathBuf};

use chrono::Utc;
use log::debug;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");
const STATS: TableDefinition<&str, &[u8]> = TableDefinition::new("stats");
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

const DAY_COUNTERS_KEY: &str = "day_counters";

/// One known node. `deleted` is a reversible tombstone, never a row removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub id: String,
    pub raw: String,
    pub proto: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub quarantine: bool,
    #[serde(default)]
    pub deleted: bool,
}

/// Rolling probe outcome counters for one node.
///
/// Invariant at every commit: `attempts == successes + failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub id: String,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_success_unix: i64,
    pub last_failure_unix: i64,
}

/// Daily deletion budget, persisted so a restart cannot reset the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounters {
    pub day_start_unix: i64,
    pub deletions_today: u32,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not_found")]
    NotFound,
    #[error("storage: {0}")]
    Db(#[from] redb::Error),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Db(e.into())
    }
}
impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Db(e.into())
    }
}
impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Db(e.into())
    }
}
impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Db(e.into())
    }
}
impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Db(e.into())
    }
}

pub struct Store {
    db: Database,
}

impl Store {
    /// Opens (or creates) the database file and ensures all tables exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            txn.open_table(CONFIGS)?;
            txn.open_table(STATS)?;
            txn.open_table(STATE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn put_config(&self, c: &ConfigRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(c)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CONFIGS)?;
            table.insert(c.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_config(&self, id: &str) -> Result<ConfigRecord, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CONFIGS)?;
        match table.get(id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Err(StoreError::NotFound),
        }
    }

    /// All config records, in key order. Rows that fail to decode are
    /// skipped rather than poisoning the listing.
    pub fn list_configs(&self) -> Result<Vec<ConfigRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CONFIGS)?;
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, bytes) = item?;
            match serde_json::from_slice::<ConfigRecord>(bytes.value()) {
                Ok(c) => out.push(c),
                Err(e) => debug!("config_decode_skip err={e}"),
            }
        }
        Ok(out)
    }

    pub fn put_stats(&self, s: &StatsRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(s)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATS)?;
            table.insert(s.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_stats(&self, id: &str) -> Result<StatsRecord, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STATS)?;
        match table.get(id)? {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Err(StoreError::NotFound),
        }
    }

    /// Folds one probe outcome into the node's stats inside a single write
    /// transaction and returns the committed record. The record is
    /// zero-initialised on first probe.
    pub fn update_stats_for_probe(
        &self,
        id: &str,
        success: bool,
    ) -> Result<StatsRecord, StoreError> {
        let txn = self.db.begin_write()?;
        let stats = {
            let mut table = txn.open_table(STATS)?;
            let mut s = match table.get(id)? {
                Some(guard) => serde_json::from_slice(guard.value()).unwrap_or(StatsRecord {
                    id: id.to_string(),
                    ..Default::default()
                }),
                None => StatsRecord {
                    id: id.to_string(),
                    ..Default::default()
                },
            };
            s.attempts += 1;
            let now = Utc::now().timestamp();
            if success {
                s.successes += 1;
                s.last_success_unix = now;
                s.consecutive_failures = 0;
            } else {
                s.failures += 1;
                s.last_failure_unix = now;
                s.consecutive_failures += 1;
            }
            let bytes = serde_json::to_vec(&s)?;
            table.insert(id, bytes.as_slice())?;
            s
        };
        txn.commit()?;
        Ok(stats)
    }

    /// Writes a pretty-printed JSON snapshot to `{dir}/{id}_{unix}.json`,
    /// creating the directory as needed. Returns the snapshot path.
    pub fn snapshot_config(&self, c: &ConfigRecord, dir: &Path) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
        }
        let name = format!("{}_{}.json", c.id, Utc::now().timestamp());
        let path = dir.join(name);
        let body = serde_json::to_vec_pretty(c)?;
        std::fs::write(&path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(path)
    }

    pub fn load_day_counters(&self) -> Result<Option<DayCounters>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(STATE)?;
        match table.get(DAY_COUNTERS_KEY)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn save_day_counters(&self, counters: DayCounters) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&counters)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE)?;
            table.insert(DAY_COUNTERS_KEY, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}
