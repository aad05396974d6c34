use std::path::PathBuf;
use tracing::{debug, info, warn};

mod codec;
mod executor;
mod join;
mod lock;
mod mutation;
mod schema;
mod storage;
mod table;
mod value;

pub use codec::{decode_table, encode_table, DecodedTable};
pub use executor::{execute_select, matching_rows, CompareOp, Predicate};
pub use join::{
    join_tables, ColumnRef, JoinCondition, JoinSpec, OuterFlags, TableRef, JOIN_RESULT_NAME,
};
pub use lock::{snapshot_path, working_path, LockManager};
pub use mutation::{delete_rows, delete_where, insert_row, update_where};
pub use schema::{Field, FieldDef, Schema, SqlType};
pub use storage::{validate_name, Storage, TABLE_EXT};
pub use table::{Database, QueryResult, Table};
pub use value::{Value, FLOAT_EPSILON};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// The storage and query engine.
///
/// Every operation reloads the whole database from disk, works on that
/// fresh copy, and, if it changed anything, rewrites every table file of
/// the database before returning. Nothing is cached between calls.
///
/// ## Architecture
///
/// ```text
/// ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
/// │   Executor   │   │   Mutation   │   │     Join     │
/// │ (predicates) │   │ (DML edits)  │   │ (nested loop)│
/// └──────────────┘   └──────────────┘   └──────────────┘
///        │                   │                   │
///        └───────────────────┼───────────────────┘
///                            │
///                    ┌───────▼────────┐     ┌──────────────┐
///                    │     Engine     │◄────┤ LockManager  │
///                    │  (Coordinator) │     │ (snapshots)  │
///                    └───────┬────────┘     └──────────────┘
///                            │
///                    ┌───────▼────────┐
///                    │ Storage/Codec  │
///                    │ (table files)  │
///                    └────────────────┘
/// ```
///
/// One `Engine` stands for one client: locks it takes redirect its own
/// reads and writes to the working copies, and other engines on the same
/// data directory keep seeing the canonical files.
pub struct Engine {
    config: EngineConfig,
    storage: Storage,
    locks: LockManager,
}

impl Engine {
    /// Opens the data directory named by `config`, creating it if needed.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let storage = Storage::open(config.data_dir.clone(), config.atomic_writes)?;
        info!(data_dir = %storage.root().display(), "engine opened");
        Ok(Self {
            config,
            storage,
            locks: LockManager::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // databases
    // ---------------------------------------------------------------

    pub fn create_database(&self, name: &str) -> Result<()> {
        validate_name("database", name)?;
        self.storage.create_database(name)?;
        info!(db = name, "database created");
        Ok(())
    }

    /// Removes the database directory. Fails with `LockHeld` while another
    /// engine holds a lock on any of its tables.
    pub fn drop_database(&self, name: &str) -> Result<()> {
        validate_name("database", name)?;
        for (table, canonical) in self.storage.table_files(name)? {
            if self.locks.is_foreign_locked(name, &table, &canonical) {
                return Err(EngineError::LockHeld { table });
            }
        }
        self.storage.drop_database(name)?;
        self.locks.forget_database(name);
        info!(db = name, "database dropped");
        Ok(())
    }

    pub fn database_exists(&self, name: &str) -> bool {
        validate_name("database", name).is_ok() && self.storage.database_exists(name)
    }

    /// Reads every table of `db` from disk. Tables this engine has locked
    /// are read from their working copies.
    pub fn load_database(&self, db: &str) -> Result<Database> {
        validate_name("database", db)?;
        let mut database = Database::new(db);
        for (name, canonical) in self.storage.table_files(db)? {
            let path = self.locks.resolve(db, &name, canonical);
            let decoded = self.storage.read_table(&path).map_err(|e| {
                warn!(db, table = %name, error = %e, "failed to load table");
                e
            })?;
            if decoded.table.name != name {
                return Err(EngineError::malformed(
                    &path,
                    format!("file holds table '{}'", decoded.table.name),
                ));
            }
            if decoded.database != db {
                warn!(
                    db,
                    table = %name,
                    recorded = %decoded.database,
                    "table file names another database"
                );
            }
            database.tables.push(decoded.table);
        }
        debug!(db, tables = database.tables.len(), "database loaded");
        Ok(database)
    }

    /// Rewrites every table file of `db`.
    fn save_database(&self, db: &Database) -> Result<()> {
        for table in &db.tables {
            let path = self.table_path(&db.name, &table.name);
            self.storage.write_table(&db.name, table, &path)?;
        }
        Ok(())
    }

    fn table_path(&self, db: &str, table: &str) -> PathBuf {
        self.locks
            .resolve(db, table, self.storage.table_path(db, table))
    }

    /// Fails with `LockHeld` when another engine holds the table's lock.
    fn check_writable(&self, db: &str, table: &str) -> Result<()> {
        let canonical = self.storage.table_path(db, table);
        if self.locks.is_foreign_locked(db, table, &canonical) {
            return Err(EngineError::LockHeld {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // schema
    // ---------------------------------------------------------------

    pub fn create_table(&self, db: &str, table: &str, fields: &[FieldDef]) -> Result<Database> {
        validate_name("table", table)?;
        let mut database = self.load_database(db)?;
        if database.table(table).is_some() {
            return Err(EngineError::TableExists {
                name: table.to_string(),
            });
        }
        let schema = Schema::from_defs(table, fields)?;
        database.insert_table(Table::new(table, schema));
        self.save_database(&database)?;
        info!(db, table, columns = fields.len(), "table created");
        Ok(database)
    }

    pub fn drop_table(&self, db: &str, table: &str) -> Result<()> {
        validate_name("database", db)?;
        if !self.storage.database_exists(db) {
            return Err(EngineError::DatabaseNotFound {
                name: db.to_string(),
            });
        }
        self.check_writable(db, table)?;
        self.storage.remove_table(db, table)?;
        self.locks
            .forget(db, table, &self.storage.table_path(db, table))?;
        info!(db, table, "table dropped");
        Ok(())
    }

    /// ALTER TABLE ... ADD. Existing rows get `Null` in the new column.
    pub fn add_field(&self, db: &str, table: &str, field: FieldDef) -> Result<Database> {
        let mut database = self.load_database(db)?;
        database.require_table(table)?;
        self.check_writable(db, table)?;
        let name = field.name.clone();
        database.require_table_mut(table)?.add_field(field)?;
        self.save_database(&database)?;
        info!(db, table, field = %name, "table altered");
        Ok(database)
    }

    /// `name type|name type(n)|...`
    pub fn describe_table(&self, db: &str, table: &str) -> Result<String> {
        let database = self.load_database(db)?;
        Ok(database.require_table(table)?.schema.describe())
    }

    // ---------------------------------------------------------------
    // queries
    // ---------------------------------------------------------------

    pub fn select_rows(
        &self,
        db: &str,
        table: &str,
        columns: Option<&[String]>,
        pred: Option<&Predicate>,
    ) -> Result<QueryResult> {
        let database = self.load_database(db)?;
        let t = database.require_table(table)?;
        execute_select(t, pred, columns, self.config.predicate_policy)
    }

    /// SELECT, rendered in the configured output format.
    pub fn select(
        &self,
        db: &str,
        table: &str,
        columns: Option<&[String]>,
        pred: Option<&Predicate>,
    ) -> Result<String> {
        self.select_rows(db, table, columns, pred)?
            .render(self.config.output_format)
    }

    /// Evaluates a join. The result is written once to the database's
    /// scratch area and is not part of the database.
    pub fn join_rows(&self, db: &str, spec: &JoinSpec) -> Result<QueryResult> {
        let database = self.load_database(db)?;
        let left = database.require_table(&spec.left.name)?;
        let right = database.require_table(&spec.right.name)?;
        let on = join::resolve_condition(spec, left, right)?;
        let result = join_tables(left, right, on, spec.outer)?;

        let scratch = self.storage.scratch_path(db, JOIN_RESULT_NAME);
        self.storage.write_table(db, &result, &scratch)?;
        debug!(
            db,
            left = %left.name,
            right = %right.name,
            rows = result.row_count(),
            "join evaluated"
        );
        Ok(result.to_result())
    }

    pub fn join(&self, db: &str, spec: &JoinSpec) -> Result<String> {
        self.join_rows(db, spec)?.render(self.config.output_format)
    }

    // ---------------------------------------------------------------
    // mutations
    // ---------------------------------------------------------------

    /// Appends one row. `values` must be in column order with one value per
    /// column; the SQL layer checks that before calling.
    pub fn insert(&self, db: &str, table: &str, values: Vec<Value>) -> Result<Database> {
        let mut database = self.load_database(db)?;
        database.require_table(table)?;
        self.check_writable(db, table)?;
        insert_row(database.require_table_mut(table)?, values);
        self.save_database(&database)?;
        info!(db, table, "row inserted");
        Ok(database)
    }

    pub fn update(
        &self,
        db: &str,
        table: &str,
        assignments: &[(String, String)],
        pred: Option<&Predicate>,
    ) -> Result<(Database, usize)> {
        let mut database = self.load_database(db)?;
        database.require_table(table)?;
        self.check_writable(db, table)?;
        let n = update_where(
            database.require_table_mut(table)?,
            assignments,
            pred,
            self.config.predicate_policy,
        )?;
        self.save_database(&database)?;
        info!(db, table, rows = n, "rows updated");
        Ok((database, n))
    }

    pub fn delete(
        &self,
        db: &str,
        table: &str,
        pred: Option<&Predicate>,
    ) -> Result<(Database, usize)> {
        let mut database = self.load_database(db)?;
        database.require_table(table)?;
        self.check_writable(db, table)?;
        let n = delete_where(
            database.require_table_mut(table)?,
            pred,
            self.config.predicate_policy,
        )?;
        self.save_database(&database)?;
        info!(db, table, rows = n, "rows deleted");
        Ok((database, n))
    }

    // ---------------------------------------------------------------
    // transactions
    // ---------------------------------------------------------------

    /// Locks `table` for this engine. Returns `false` if another engine
    /// already holds it.
    pub fn lock_table(&self, db: &str, table: &str) -> Result<bool> {
        validate_name("database", db)?;
        validate_name("table", table)?;
        if !self.storage.table_exists(db, table) {
            return Err(EngineError::TableNotFound {
                name: table.to_string(),
            });
        }
        self.locks
            .acquire(db, table, &self.storage.table_path(db, table))
    }

    /// Keeps the changes made while locked and releases the lock.
    pub fn commit_transaction(&self, db: &str, table: &str) -> Result<()> {
        self.locks
            .commit(db, table, &self.storage.table_path(db, table))
    }

    /// Throws away the changes made while locked and releases the lock.
    pub fn reset_transaction(&self, db: &str, table: &str) -> Result<()> {
        self.locks
            .rollback(db, table, &self.storage.table_path(db, table))
    }

    /// Whether any engine holds the lock on `table`.
    pub fn is_locked(&self, db: &str, table: &str) -> bool {
        LockManager::is_locked(&self.storage.table_path(db, table))
    }

    /// Locks held by this engine as `(database, table)` pairs.
    pub fn held_locks(&self) -> Vec<(String, String)> {
        self.locks.held()
    }
}
