//! Text encoding of a table file.
//!
//! ## File Format
//! ```text
//! /*    METADATA-START
//! databaseName shop
//! tableName items
//! METADATA-END    */
//! message items {
//! 	id = int 1
//! 	name = varchar 20
//! }
//!
//! 1, 'Gizmo'
//! 2, 'Super Gizmo'
//! ```
//!
//! Strings are single-quoted with embedded quotes doubled, and `\n`, `\r`
//! and `\\` escaped so a row always stays on one line; numbers and
//! booleans are bare; `NULL` marks a padded cell. Every encode rewrites the
//! whole file.

use std::path::Path;

use crate::engine::{schema::parse_bool, FieldDef, Schema, SqlType, Table, Value};
use crate::error::{EngineError, Result};

const METADATA_START: &str = "/*    METADATA-START";
const METADATA_END: &str = "METADATA-END    */";
const NULL_TOKEN: &str = "NULL";

/// Renders `table` (owned by database `db_name`) as a complete table file.
pub fn encode_table(db_name: &str, table: &Table) -> String {
    let mut out = String::new();
    out.push_str(METADATA_START);
    out.push('\n');
    out.push_str(&format!("databaseName {db_name}\n"));
    out.push_str(&format!("tableName {}\n", table.name));
    out.push_str(METADATA_END);
    out.push('\n');

    out.push_str(&format!("message {} {{\n", table.name));
    for f in table.schema.fields() {
        out.push_str(&format!("\t{} = {} {}\n", f.name, f.sql_type, f.capacity));
    }
    out.push_str("}\n\n");

    for row in table.rows() {
        out.push_str(&encode_row(row));
        out.push('\n');
    }
    out
}

fn encode_row(row: &[Value]) -> String {
    row.iter().map(encode_value).collect::<Vec<_>>().join(", ")
}

fn encode_value(v: &Value) -> String {
    match v {
        Value::Str(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('\'');
            for ch in s.chars() {
                match ch {
                    '\'' => out.push_str("''"),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    ch => out.push(ch),
                }
            }
            out.push('\'');
            out
        }
        Value::Null => NULL_TOKEN.to_string(),
        other => other.to_string(),
    }
}

/// A decoded table file: the owning database name and the table itself.
#[derive(Debug, PartialEq)]
pub struct DecodedTable {
    pub database: String,
    pub table: Table,
}

/// Parses a table file. `path` is only used in error messages.
pub fn decode_table(path: &Path, text: &str) -> Result<DecodedTable> {
    let bad = |detail: String| EngineError::malformed(path, detail);
    let mut lines = text.lines().enumerate();

    // metadata block
    let mut start_found = false;
    for (_, line) in lines.by_ref() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("/*") && line.contains("METADATA-START") {
            start_found = true;
        }
        break;
    }
    if !start_found {
        return Err(bad("missing metadata block".into()));
    }

    let mut database = None;
    let mut table_name = None;
    let mut end_found = false;
    for (_, line) in lines.by_ref() {
        let line = line.trim();
        if line.contains("METADATA-END") {
            end_found = true;
            break;
        }
        if let Some((key, value)) = line.split_once(char::is_whitespace) {
            match key {
                "databaseName" => database = Some(value.trim().to_string()),
                "tableName" => table_name = Some(value.trim().to_string()),
                // unknown metadata keys are ignored
                _ => {}
            }
        }
    }
    if !end_found {
        return Err(bad("unterminated metadata block".into()));
    }
    let database = database.ok_or_else(|| bad("metadata has no databaseName".into()))?;
    let table_name = table_name.ok_or_else(|| bad("metadata has no tableName".into()))?;

    // schema block
    let header = lines
        .by_ref()
        .map(|(_, l)| l.trim())
        .find(|l| !l.is_empty())
        .ok_or_else(|| bad("missing schema block".into()))?;
    let tokens: Vec<&str> = header.split_whitespace().collect();
    match tokens.as_slice() {
        ["message", name, "{"] if *name == table_name => {}
        ["message", name, "{"] => {
            return Err(bad(format!(
                "schema names table '{name}' but metadata says '{table_name}'"
            )))
        }
        _ => return Err(bad(format!("expected 'message {table_name} {{', got '{header}'"))),
    }

    let mut schema = Schema::new();
    let mut closed = false;
    for (n, line) in lines.by_ref() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "}" {
            closed = true;
            break;
        }
        let def = decode_field(line).map_err(|e| bad(format!("line {}: {e}", n + 1)))?;
        schema
            .add_field(&table_name, def)
            .map_err(|e| bad(format!("line {}: {e}", n + 1)))?;
    }
    if !closed {
        return Err(bad("schema block is not closed".into()));
    }

    // rows
    let mut table = Table::new(table_name, schema);
    for (n, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let row = decode_row(line, &table.schema)
            .map_err(|e| bad(format!("line {}: {e}", n + 1)))?;
        table.records.extend(row);
    }

    Ok(DecodedTable { database, table })
}

fn decode_field(line: &str) -> std::result::Result<FieldDef, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [name, "=", sql_type, capacity] => {
            let sql_type: SqlType = sql_type.parse().map_err(|e: EngineError| e.to_string())?;
            let capacity = capacity
                .parse::<u32>()
                .map_err(|_| format!("bad capacity '{capacity}'"))?;
            Ok(FieldDef::new(*name, sql_type, capacity))
        }
        _ => Err(format!("expected '<name> = <type> <capacity>', got '{line}'")),
    }
}

/// Decodes one row line against the schema's column types.
pub(crate) fn decode_row(line: &str, schema: &Schema) -> std::result::Result<Vec<Value>, String> {
    let cols = schema.field_count();
    let chars: Vec<char> = line.chars().collect();
    let mut pos = 0;
    let mut row = Vec::with_capacity(cols);

    let skip_ws = |pos: &mut usize| {
        while *pos < chars.len() && chars[*pos].is_whitespace() {
            *pos += 1;
        }
    };

    for (c, field) in schema.fields().iter().enumerate() {
        skip_ws(&mut pos);
        if c > 0 {
            if pos >= chars.len() {
                return Err(format!("expected {cols} values, found {c}"));
            }
            if chars[pos] != ',' {
                return Err(format!("expected ',' before value {}", c + 1));
            }
            pos += 1;
            skip_ws(&mut pos);
        }
        if pos >= chars.len() {
            return Err(format!("expected {cols} values, found {c}"));
        }

        if chars[pos] == '\'' {
            if !field.sql_type.is_string() {
                return Err(format!("quoted value in {} column {}", field.sql_type, field.name));
            }
            pos += 1;
            let mut s = String::new();
            loop {
                match chars.get(pos) {
                    None => return Err(format!("unterminated string in column {}", field.name)),
                    Some('\'') if chars.get(pos + 1) == Some(&'\'') => {
                        s.push('\'');
                        pos += 2;
                    }
                    Some('\'') => {
                        pos += 1;
                        break;
                    }
                    Some('\\') => {
                        match chars.get(pos + 1) {
                            Some('n') => s.push('\n'),
                            Some('r') => s.push('\r'),
                            Some('\\') => s.push('\\'),
                            _ => return Err(format!("bad escape in column {}", field.name)),
                        }
                        pos += 2;
                    }
                    Some(ch) => {
                        s.push(*ch);
                        pos += 1;
                    }
                }
            }
            row.push(Value::Str(s));
            continue;
        }

        let start = pos;
        while pos < chars.len() && chars[pos] != ',' {
            pos += 1;
        }
        let token: String = chars[start..pos].iter().collect();
        let token = token.trim();
        let value = if token == NULL_TOKEN {
            Some(Value::Null)
        } else {
            match field.sql_type {
                SqlType::Int => token.parse::<i64>().ok().map(Value::Int),
                SqlType::Float => token.parse::<f64>().ok().map(Value::Float),
                SqlType::Bool => parse_bool(token).map(Value::Bool),
                SqlType::Char | SqlType::Varchar => None,
            }
        };
        match value {
            Some(v) => row.push(v),
            None => {
                return Err(format!(
                    "'{token}' is not a valid {} for column {}",
                    field.sql_type, field.name
                ))
            }
        }
    }

    skip_ws(&mut pos);
    if pos < chars.len() {
        return Err(format!("more than {cols} values in row"));
    }
    Ok(row)
}
