use crate::config::PredicatePolicy;
use crate::engine::{executor::matching_rows, Predicate, Table, Value};
use crate::error::{EngineError, Result};

/// Appends one row. `values` must already be in column order with one value
/// per column; callers validate arity and types before getting here.
pub fn insert_row(table: &mut Table, values: Vec<Value>) {
    table.records.extend(values);
}

/// Removes the given rows (ascending indices) and returns how many were
/// removed. Rows go from the highest index down so lower rows keep their
/// offsets while earlier spans are drained.
pub fn delete_rows(table: &mut Table, rows: &[usize]) -> usize {
    let cols = table.column_count();
    for &r in rows.iter().rev() {
        table.records.drain(r * cols..(r + 1) * cols);
    }
    rows.len()
}

/// DELETE FROM table [WHERE pred]
pub fn delete_where(
    table: &mut Table,
    pred: Option<&Predicate>,
    policy: PredicatePolicy,
) -> Result<usize> {
    let rows = matching_rows(table, pred, policy)?;
    Ok(delete_rows(table, &rows))
}

/// UPDATE table SET col = literal, ... [WHERE pred]
///
/// Every assignment is resolved and parsed before any cell changes, so an
/// unknown column or a literal of the wrong type leaves the table untouched.
/// Returns the number of matched rows.
pub fn update_where(
    table: &mut Table,
    assignments: &[(String, String)],
    pred: Option<&Predicate>,
    policy: PredicatePolicy,
) -> Result<usize> {
    let mut resolved = Vec::with_capacity(assignments.len());
    for (column, literal) in assignments {
        let c = table.require_column(column)?;
        let sql_type = table.schema.fields()[c].sql_type;
        let value = sql_type.parse_literal(literal).ok_or_else(|| {
            EngineError::type_mismatch(format!(
                "cannot assign '{literal}' to {sql_type} column {column}"
            ))
        })?;
        resolved.push((c, value));
    }

    let rows = matching_rows(table, pred, policy)?;
    let cols = table.column_count();
    for &r in &rows {
        for (c, value) in &resolved {
            table.records[r * cols + c] = value.clone();
        }
    }
    Ok(rows.len())
}
