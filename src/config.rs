use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::error::Result;

/// How the predicate evaluator treats columns it cannot resolve and literals
/// it cannot parse.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PredicatePolicy {
    /// Unknown columns and unparsable literals simply match no rows.
    #[default]
    Permissive,
    /// Unknown columns and unparsable literals are reported as errors.
    Strict,
}

/// Rendering used for query results.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `name type|name type` header followed by `v1|v2` rows.
    #[default]
    Table,
    /// `{"columns": [...], "rows": [[...], ...]}`
    Json,
}

/// Engine configuration.
///
/// Every field has a default, so a config file only needs to name the
/// settings it changes:
///
/// ```json
/// { "data_dir": "/var/lib/flatdb", "predicate_policy": "strict" }
/// ```
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory. Each database is a sub-directory holding one
    /// `<table>.tbl` file per table.
    pub data_dir: PathBuf,
    pub predicate_policy: PredicatePolicy,
    pub output_format: OutputFormat,
    /// Write table files to a temporary sibling and rename it into place.
    pub atomic_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            predicate_policy: PredicatePolicy::default(),
            output_format: OutputFormat::default(),
            atomic_writes: true,
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a JSON config file. Missing keys fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
