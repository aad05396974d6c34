use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::engine::codec::{decode_table, encode_table, DecodedTable};
use crate::engine::Table;
use crate::error::{EngineError, Result};

/// Extension of canonical table files.
pub const TABLE_EXT: &str = "tbl";

/// Directory (inside a database directory) holding transient join results.
const SCRATCH_DIR: &str = ".scratch";

/// On-disk layout of the data directory.
///
/// ```text
/// <root>/
///   <database>/
///     <table>.tbl
///     <table>.tbl.snapshot   (while locked)
///     <table>.tbl.working    (while locked)
///     .scratch/join_result.tbl
/// ```
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    atomic_writes: bool,
}

impl Storage {
    pub fn open(root: PathBuf, atomic_writes: bool) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            atomic_writes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.root.join(db)
    }

    pub fn table_path(&self, db: &str, table: &str) -> PathBuf {
        self.database_dir(db).join(format!("{table}.{TABLE_EXT}"))
    }

    pub fn scratch_path(&self, db: &str, name: &str) -> PathBuf {
        self.database_dir(db)
            .join(SCRATCH_DIR)
            .join(format!("{name}.{TABLE_EXT}"))
    }

    pub fn database_exists(&self, db: &str) -> bool {
        self.database_dir(db).is_dir()
    }

    pub fn table_exists(&self, db: &str, table: &str) -> bool {
        self.table_path(db, table).is_file()
    }

    pub fn create_database(&self, db: &str) -> Result<()> {
        if self.database_exists(db) {
            return Err(EngineError::DatabaseExists {
                name: db.to_string(),
            });
        }
        fs::create_dir_all(self.database_dir(db))?;
        Ok(())
    }

    pub fn drop_database(&self, db: &str) -> Result<()> {
        if !self.database_exists(db) {
            return Err(EngineError::DatabaseNotFound {
                name: db.to_string(),
            });
        }
        fs::remove_dir_all(self.database_dir(db))?;
        Ok(())
    }

    /// Canonical table files of a database as `(table, path)`, sorted by
    /// table name. Snapshots, working copies and scratch files are skipped.
    pub fn table_files(&self, db: &str) -> Result<Vec<(String, PathBuf)>> {
        let dir = self.database_dir(db);
        if !dir.is_dir() {
            return Err(EngineError::DatabaseNotFound {
                name: db.to_string(),
            });
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push((stem.to_string(), path.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    pub fn read_table(&self, path: &Path) -> Result<DecodedTable> {
        debug!(path = %path.display(), "reading table file");
        let text = fs::read_to_string(path)?;
        decode_table(path, &text)
    }

    /// Rewrites a whole table file.
    pub fn write_table(&self, db: &str, table: &Table, path: &Path) -> Result<()> {
        let text = encode_table(db, table);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if self.atomic_writes {
            let tmp = path.with_extension(tmp_extension(path));
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            f.write_all(text.as_bytes())?;
            f.sync_all()?;
            fs::rename(&tmp, path)?;
        } else {
            fs::write(path, text)?;
        }
        debug!(path = %path.display(), rows = table.row_count(), "wrote table file");
        Ok(())
    }

    pub fn remove_table(&self, db: &str, table: &str) -> Result<()> {
        let path = self.table_path(db, table);
        if !path.is_file() {
            return Err(EngineError::TableNotFound {
                name: table.to_string(),
            });
        }
        fs::remove_file(path)?;
        Ok(())
    }
}

/// `items.tbl` -> `tbl.tmp`, `items.tbl.working` -> `working.tmp`
fn tmp_extension(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}

/// Database and table names become path components, so only plain
/// identifiers are accepted.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::Unsupported(format!("invalid {kind} name '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FieldDef, Schema, SqlType, Value};

    #[test]
    fn lists_only_canonical_table_files() {
        let dir = tempfile::tempdir().unwrap();
        let st = Storage::open(dir.path().to_path_buf(), true).unwrap();
        st.create_database("shop").unwrap();

        let schema = Schema::from_defs("b", &[FieldDef::new("x", SqlType::Int, 1)]).unwrap();
        for name in ["b", "a"] {
            let t = Table::new(name, schema.clone());
            st.write_table("shop", &t, &st.table_path("shop", name)).unwrap();
        }
        fs::write(st.database_dir("shop").join("a.tbl.snapshot"), "x").unwrap();
        fs::write(st.database_dir("shop").join("notes.txt"), "x").unwrap();
        let t = Table::new("join_result", schema);
        st.write_table("shop", &t, &st.scratch_path("shop", "join_result")).unwrap();

        let names: Vec<String> = st
            .table_files("shop")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let st = Storage::open(dir.path().to_path_buf(), true).unwrap();
        st.create_database("shop").unwrap();
        let schema = Schema::from_defs("t", &[FieldDef::new("x", SqlType::Int, 1)]).unwrap();
        let mut t = Table::new("t", schema);
        t.records = vec![Value::Int(1), Value::Int(2)];
        let path = st.table_path("shop", "t");
        st.write_table("shop", &t, &path).unwrap();

        assert!(!path.with_extension("tbl.tmp").exists());
        let decoded = st.read_table(&path).unwrap();
        assert_eq!(decoded.table, t);
    }

    #[test]
    fn database_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let st = Storage::open(dir.path().to_path_buf(), false).unwrap();
        st.create_database("d").unwrap();
        assert!(matches!(
            st.create_database("d"),
            Err(EngineError::DatabaseExists { .. })
        ));
        st.drop_database("d").unwrap();
        assert!(matches!(
            st.drop_database("d"),
            Err(EngineError::DatabaseNotFound { .. })
        ));
    }

    #[test]
    fn names_must_be_identifiers() {
        assert!(validate_name("table", "orders_2024").is_ok());
        assert!(validate_name("table", "../etc").is_err());
        assert!(validate_name("database", "").is_err());
    }
}
