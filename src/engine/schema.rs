use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::engine::Value;
use crate::error::{EngineError, Result};

/// Column types understood by the engine.
///
/// ## Format codes
/// Each type maps to a one-character code that drives encoding and
/// decoding of rows:
/// - `s`: `char`, `varchar`
/// - `i`: `int`, `bool`
/// - `f`: `float`
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Int,
    Char,
    Varchar,
    Float,
    Bool,
}

impl SqlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Int => "int",
            SqlType::Char => "char",
            SqlType::Varchar => "varchar",
            SqlType::Float => "float",
            SqlType::Bool => "bool",
        }
    }

    pub fn format_code(&self) -> char {
        match self {
            SqlType::Char | SqlType::Varchar => 's',
            SqlType::Int | SqlType::Bool => 'i',
            SqlType::Float => 'f',
        }
    }

    pub fn is_string(&self) -> bool {
        self.format_code() == 's'
    }

    /// Parses a literal written in a predicate or SET clause into a value of
    /// this type. Returns `None` when the literal does not fit.
    pub fn parse_literal(&self, literal: &str) -> Option<Value> {
        let lit = literal.trim();
        match self {
            SqlType::Char | SqlType::Varchar => Some(Value::Str(literal.to_string())),
            SqlType::Int => lit.parse::<i64>().ok().map(Value::Int),
            SqlType::Float => lit.parse::<f64>().ok().map(Value::Float),
            SqlType::Bool => parse_bool(lit).map(Value::Bool),
        }
    }

    /// Whether `value` may be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (SqlType::Int, Value::Int(_))
                | (SqlType::Bool, Value::Bool(_))
                | (SqlType::Float, Value::Float(_))
                | (SqlType::Char | SqlType::Varchar, Value::Str(_))
        )
    }
}

pub(crate) fn parse_bool(lit: &str) -> Option<bool> {
    match lit.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(SqlType::Int),
            "char" | "character" => Ok(SqlType::Char),
            "varchar" => Ok(SqlType::Varchar),
            "float" | "real" | "double" => Ok(SqlType::Float),
            "bool" | "boolean" => Ok(SqlType::Bool),
            other => Err(EngineError::Unsupported(format!("column type '{other}'"))),
        }
    }
}

/// A column definition as supplied by CREATE TABLE or ALTER TABLE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub sql_type: SqlType,
    pub capacity: u32,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, sql_type: SqlType, capacity: u32) -> Self {
        Self {
            name: name.into(),
            sql_type,
            capacity,
        }
    }
}

/// A column of a table schema.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub sql_type: SqlType,
    /// Declared length for `char`/`varchar`; 1 for every other type.
    pub capacity: u32,
    /// 1-based position assigned when the field was added.
    pub ordinal: u32,
}

impl Field {
    /// `name type` or `name type(n)`, as shown in result headers.
    pub fn describe(&self) -> String {
        if self.capacity > 1 {
            format!("{} {}({})", self.name, self.sql_type, self.capacity)
        } else {
            format!("{} {}", self.name, self.sql_type)
        }
    }
}

/// Ordered list of fields. Column order is insertion order and never
/// changes; fields can be added but not removed.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from column definitions, rejecting duplicate names.
    pub fn from_defs(table: &str, defs: &[FieldDef]) -> Result<Self> {
        let mut schema = Schema::new();
        for def in defs {
            schema.add_field(table, def.clone())?;
        }
        Ok(schema)
    }

    /// Appends a field with the next ordinal.
    pub fn add_field(&mut self, table: &str, def: FieldDef) -> Result<&Field> {
        if self.index_of(&def.name).is_some() {
            return Err(EngineError::FieldExists {
                table: table.to_string(),
                name: def.name,
            });
        }
        let capacity = if def.sql_type.is_string() {
            def.capacity.max(1)
        } else {
            1
        };
        let ordinal = self.fields.last().map_or(1, |f| f.ordinal + 1);
        self.fields.push(Field {
            name: def.name,
            sql_type: def.sql_type,
            capacity,
            ordinal,
        });
        Ok(&self.fields[self.fields.len() - 1])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// One format code per column, in column order.
    pub fn format(&self) -> String {
        self.fields.iter().map(|f| f.sql_type.format_code()).collect()
    }

    /// Concatenation of two schemas, left columns first. Names are kept as
    /// they are, duplicates included; ordinals are renumbered.
    pub fn concat(left: &Schema, right: &Schema) -> Schema {
        let fields = left
            .fields
            .iter()
            .chain(right.fields.iter())
            .enumerate()
            .map(|(i, f)| Field {
                ordinal: i as u32 + 1,
                ..f.clone()
            })
            .collect();
        Schema { fields }
    }

    /// `name type|name type(n)|...`
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(Field::describe)
            .collect::<Vec<_>>()
            .join("|")
    }
}
