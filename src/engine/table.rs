use serde::Serialize;

use crate::config::OutputFormat;
use crate::engine::{Field, FieldDef, Schema, Value};
use crate::error::{EngineError, Result};

/// One table: a schema plus every row stored end to end in a single flat
/// vector. Row `r`, column `c` lives at `records[r * cols + c]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    pub records: Vec<Value>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            records: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.schema.field_count()
    }

    pub fn row_count(&self) -> usize {
        match self.column_count() {
            0 => 0,
            cols => self.records.len() / cols,
        }
    }

    pub fn row(&self, r: usize) -> &[Value] {
        let cols = self.column_count();
        &self.records[r * cols..(r + 1) * cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        // chunks() panics on zero, and a schema-less table has no rows anyway
        self.records.chunks(self.column_count().max(1))
    }

    pub fn cell(&self, r: usize, c: usize) -> &Value {
        &self.records[r * self.column_count() + c]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.index_of(name)
    }

    /// Resolves a column or reports it missing.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| EngineError::ColumnNotFound {
                table: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// Adds a column at the end of the schema. Existing rows get `Null` in
    /// the new column.
    pub fn add_field(&mut self, def: FieldDef) -> Result<()> {
        let old_cols = self.column_count();
        let rows = self.row_count();
        self.schema.add_field(&self.name, def)?;

        if rows > 0 {
            let mut widened = Vec::with_capacity(rows * (old_cols + 1));
            for row in self.records.chunks(old_cols) {
                widened.extend_from_slice(row);
                widened.push(Value::Null);
            }
            self.records = widened;
        }
        Ok(())
    }

    /// Every row, all columns.
    pub fn to_result(&self) -> QueryResult {
        QueryResult {
            columns: self.schema.fields().to_vec(),
            rows: self.rows().map(<[Value]>::to_vec).collect(),
        }
    }
}

/// A database: a name and its tables, ordered by table name.
#[derive(Clone, Debug, PartialEq)]
pub struct Database {
    pub name: String,
    pub tables: Vec<Table>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn require_table(&self, name: &str) -> Result<&Table> {
        self.table(name).ok_or_else(|| EngineError::TableNotFound {
            name: name.to_string(),
        })
    }

    pub fn require_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.table_mut(name).ok_or_else(|| EngineError::TableNotFound {
            name: name.to_string(),
        })
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Adds a table keeping the name order.
    pub fn insert_table(&mut self, table: Table) {
        let pos = self
            .tables
            .partition_point(|t| t.name.as_str() < table.name.as_str());
        self.tables.insert(pos, table);
    }
}

/// Rows produced by a SELECT or a join, ready to render.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    columns: Vec<&'a str>,
    rows: &'a [Vec<Value>],
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Table => Ok(self.render_table()),
            OutputFormat::Json => {
                let view = JsonResult {
                    columns: self.columns.iter().map(|f| f.name.as_str()).collect(),
                    rows: &self.rows,
                };
                Ok(serde_json::to_string_pretty(&view)?)
            }
        }
    }

    fn render_table(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(
            self.columns
                .iter()
                .map(Field::describe)
                .collect::<Vec<_>>()
                .join("|"),
        );
        for row in &self.rows {
            lines.push(
                row.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|"),
            );
        }
        lines.join("\n")
    }
}
