use parking_lot::Mutex;
use std::{
    collections::HashSet,
    fs::{self, OpenOptions},
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::error::{EngineError, Result};

/// Per-table exclusive locks backed by snapshot files.
///
/// ## States
/// ```text
/// UNLOCKED --acquire--> LOCKED --commit/rollback--> UNLOCKED
/// ```
///
/// A table is locked while `<table>.tbl.snapshot` exists. The engine that
/// took the lock reads and writes `<table>.tbl.working` instead of the
/// canonical file until it commits or rolls back; everyone else keeps
/// seeing the canonical file. The lock is advisory: nothing stops a process
/// from editing the files directly.
#[derive(Debug, Default)]
pub struct LockManager {
    /// `(database, table)` pairs locked by this engine instance.
    held: Mutex<HashSet<(String, String)>>,
}

pub fn snapshot_path(canonical: &Path) -> PathBuf {
    with_suffix(canonical, "snapshot")
}

pub fn working_path(canonical: &Path) -> PathBuf {
    with_suffix(canonical, "working")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(suffix);
    PathBuf::from(s)
}

fn key(db: &str, table: &str) -> (String, String) {
    (db.to_string(), table.to_string())
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this engine instance holds the lock.
    pub fn is_held(&self, db: &str, table: &str) -> bool {
        self.held.lock().contains(&key(db, table))
    }

    /// Whether anyone holds the lock.
    pub fn is_locked(canonical: &Path) -> bool {
        snapshot_path(canonical).exists()
    }

    /// Locked by somebody other than this engine instance.
    pub fn is_foreign_locked(&self, db: &str, table: &str, canonical: &Path) -> bool {
        Self::is_locked(canonical) && !self.is_held(db, table)
    }

    /// The file reads and writes of `table` must use.
    pub fn resolve(&self, db: &str, table: &str, canonical: PathBuf) -> PathBuf {
        if self.is_held(db, table) {
            working_path(&canonical)
        } else {
            canonical
        }
    }

    /// Takes the lock by creating the snapshot and the working copy.
    ///
    /// Returns `false` when another holder's snapshot already exists. Taking
    /// a lock this instance already holds succeeds without touching disk.
    pub fn acquire(&self, db: &str, table: &str, canonical: &Path) -> Result<bool> {
        let mut held = self.held.lock();
        if held.contains(&key(db, table)) {
            return Ok(true);
        }

        let snapshot = snapshot_path(canonical);
        // create_new makes the existence check and the creation one step
        let mut snap = match OpenOptions::new().write(true).create_new(true).open(&snapshot) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(db, table, "table is locked by another transaction");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let copied = fs::File::open(canonical)
            .and_then(|mut src| io::copy(&mut src, &mut snap))
            .and_then(|_| snap.sync_all())
            .and_then(|_| fs::copy(canonical, working_path(canonical)).map(|_| ()));
        if let Err(e) = copied {
            let _ = fs::remove_file(&snapshot);
            return Err(e.into());
        }

        held.insert(key(db, table));
        info!(db, table, "lock acquired");
        Ok(true)
    }

    /// Makes the working copy permanent and releases the lock.
    pub fn commit(&self, db: &str, table: &str, canonical: &Path) -> Result<()> {
        let mut held = self.held.lock();
        if !held.remove(&key(db, table)) {
            return Err(EngineError::LockNotHeld {
                table: table.to_string(),
            });
        }
        let working = working_path(canonical);
        if working.exists() {
            fs::rename(&working, canonical)?;
        }
        remove_if_exists(&snapshot_path(canonical))?;
        info!(db, table, "transaction committed");
        Ok(())
    }

    /// Restores the snapshot, discards the working copy and releases the
    /// lock.
    pub fn rollback(&self, db: &str, table: &str, canonical: &Path) -> Result<()> {
        let mut held = self.held.lock();
        if !held.remove(&key(db, table)) {
            return Err(EngineError::LockNotHeld {
                table: table.to_string(),
            });
        }
        let snapshot = snapshot_path(canonical);
        if snapshot.exists() {
            fs::copy(&snapshot, canonical)?;
        }
        remove_if_exists(&working_path(canonical))?;
        remove_if_exists(&snapshot)?;
        warn!(db, table, "transaction rolled back");
        Ok(())
    }

    /// Drops the lock without restoring anything. Used when the table itself
    /// goes away.
    pub fn forget(&self, db: &str, table: &str, canonical: &Path) -> Result<()> {
        if self.held.lock().remove(&key(db, table)) {
            remove_if_exists(&working_path(canonical))?;
            remove_if_exists(&snapshot_path(canonical))?;
        }
        Ok(())
    }

    /// Forgets every lock held on tables of `db`.
    pub fn forget_database(&self, db: &str) {
        self.held.lock().retain(|(d, _)| d != db);
    }

    /// Every `(database, table)` this instance holds, sorted.
    pub fn held(&self) -> Vec<(String, String)> {
        let mut v: Vec<_> = self.held.lock().iter().cloned().collect();
        v.sort();
        v
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
