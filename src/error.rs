use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors reported by the storage and query engine.
///
/// Every core entry point returns one of these instead of panicking, so the
/// presentation layer can turn it into a message and keep the session alive.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A table file could not be decoded. There is exactly one copy of each
    /// table, so this aborts the whole database load.
    #[error("table file '{path}' is malformed: {detail}")]
    MalformedFile { path: PathBuf, detail: String },

    #[error("database {name} does not exist")]
    DatabaseNotFound { name: String },

    #[error("table {name} does not exist")]
    TableNotFound { name: String },

    #[error("column {name} does not exist in table {table}")]
    ColumnNotFound { table: String, name: String },

    #[error("database {name} already exists")]
    DatabaseExists { name: String },

    #[error("table {name} already exists")]
    TableExists { name: String },

    #[error("field {name} already exists in table {table}")]
    FieldExists { table: String, name: String },

    /// Join across differing column types, or a literal that does not parse
    /// as the type of the column it is assigned to.
    #[error("type mismatch: {detail}")]
    TypeMismatch { detail: String },

    /// Another transaction holds the snapshot lock for this table.
    #[error("table {table} is locked")]
    LockHeld { table: String },

    #[error("table {table} is not locked by this session")]
    LockNotHeld { table: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedFile,
    NotFound,
    AlreadyExists,
    TypeMismatch,
    LockHeld,
    Io,
    Other,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MalformedFile { .. } => ErrorKind::MalformedFile,
            EngineError::DatabaseNotFound { .. }
            | EngineError::TableNotFound { .. }
            | EngineError::ColumnNotFound { .. } => ErrorKind::NotFound,
            EngineError::DatabaseExists { .. }
            | EngineError::TableExists { .. }
            | EngineError::FieldExists { .. } => ErrorKind::AlreadyExists,
            EngineError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            EngineError::LockHeld { .. } => ErrorKind::LockHeld,
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::LockNotHeld { .. }
            | EngineError::Unsupported(_)
            | EngineError::Json(_) => ErrorKind::Other,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        EngineError::MalformedFile {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn type_mismatch(detail: impl Into<String>) -> Self {
        EngineError::TypeMismatch {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let e = EngineError::TableNotFound { name: "t".into() };
        assert_eq!(e.kind(), ErrorKind::NotFound);

        let e = EngineError::TableExists { name: "t".into() };
        assert_eq!(e.kind(), ErrorKind::AlreadyExists);

        let e = EngineError::malformed("x.tbl", "missing schema");
        assert_eq!(e.kind(), ErrorKind::MalformedFile);
        assert_eq!(
            e.to_string(),
            "table file 'x.tbl' is malformed: missing schema"
        );

        let e = EngineError::LockHeld { table: "t".into() };
        assert_eq!(e.to_string(), "table t is locked");
    }
}
