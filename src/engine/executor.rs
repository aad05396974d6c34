use std::{cmp::Ordering, fmt, str::FromStr};

use crate::config::PredicatePolicy;
use crate::engine::{value::float_eq, QueryResult, Table, Value};
use crate::error::{EngineError, Result};

/// Comparison operators allowed in a WHERE clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::LtEq => "<=",
            CompareOp::GtEq => ">=",
        }
    }

    /// The operator that gives the same answer with the operands swapped.
    pub fn flipped(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::GtEq => CompareOp::LtEq,
            other => *other,
        }
    }

    fn holds(&self, ord: Ordering, equal: bool) -> bool {
        match self {
            CompareOp::Eq => equal,
            CompareOp::NotEq => !equal,
            CompareOp::Lt => ord == Ordering::Less && !equal,
            CompareOp::Gt => ord == Ordering::Greater && !equal,
            CompareOp::LtEq => ord == Ordering::Less || equal,
            CompareOp::GtEq => ord == Ordering::Greater || equal,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for CompareOp {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(CompareOp::Eq),
            "!=" | "<>" => Ok(CompareOp::NotEq),
            "<" => Ok(CompareOp::Lt),
            ">" => Ok(CompareOp::Gt),
            "<=" => Ok(CompareOp::LtEq),
            ">=" => Ok(CompareOp::GtEq),
            other => Err(EngineError::Unsupported(format!("operator '{other}'"))),
        }
    }
}

/// `column op literal`, the only WHERE clause shape the engine evaluates.
///
/// The literal stays a string until it is compared, because how it is read
/// depends on the type of the column it is compared against.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub literal: String,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, literal: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            literal: literal.into(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.literal)
    }
}

/// Indices of the rows of `table` satisfying `pred`, ascending.
///
/// ## Evaluation Rules
/// - **No predicate**: every row.
/// - **Strings**: lexicographic comparison.
/// - **Ints / bools**: the literal is parsed as the column type.
/// - **Floats**: parsed as `f64`; values within `1e-5` count as equal.
/// - **Null cells** never match.
///
/// Under [`PredicatePolicy::Permissive`] an unknown column or a literal that
/// does not parse as the column type matches nothing. Under
/// [`PredicatePolicy::Strict`] both are errors.
pub fn matching_rows(
    table: &Table,
    pred: Option<&Predicate>,
    policy: PredicatePolicy,
) -> Result<Vec<usize>> {
    let Some(pred) = pred else {
        return Ok((0..table.row_count()).collect());
    };

    let Some(col) = table.column_index(&pred.column) else {
        return match policy {
            PredicatePolicy::Permissive => Ok(Vec::new()),
            PredicatePolicy::Strict => Err(EngineError::ColumnNotFound {
                table: table.name.clone(),
                name: pred.column.clone(),
            }),
        };
    };

    let sql_type = table.schema.fields()[col].sql_type;
    let Some(literal) = sql_type.parse_literal(&pred.literal) else {
        return match policy {
            PredicatePolicy::Permissive => Ok(Vec::new()),
            PredicatePolicy::Strict => Err(EngineError::type_mismatch(format!(
                "'{}' is not a valid {} for column {}",
                pred.literal, sql_type, pred.column
            ))),
        };
    };

    Ok((0..table.row_count())
        .filter(|&r| compare(table.cell(r, col), pred.op, &literal))
        .collect())
}

fn compare(cell: &Value, op: CompareOp, literal: &Value) -> bool {
    let (ord, equal) = match (cell, literal) {
        (Value::Str(a), Value::Str(b)) => {
            let ord = a.as_str().cmp(b.as_str());
            (ord, ord == Ordering::Equal)
        }
        (Value::Int(a), Value::Int(b)) => (a.cmp(b), a == b),
        (Value::Bool(a), Value::Bool(b)) => (a.cmp(b), a == b),
        (Value::Float(a), Value::Float(b)) => match a.partial_cmp(b) {
            Some(ord) => (ord, float_eq(*a, *b)),
            None => return false,
        },
        _ => return false,
    };
    op.holds(ord, equal)
}

/// Executes a single-table SELECT: filter, then project.
///
/// `columns = None` selects every column in schema order. Projected
/// columns must exist.
pub fn execute_select(
    table: &Table,
    pred: Option<&Predicate>,
    columns: Option<&[String]>,
    policy: PredicatePolicy,
) -> Result<QueryResult> {
    let rows = matching_rows(table, pred, policy)?;

    let indices: Vec<usize> = match columns {
        None => (0..table.column_count()).collect(),
        Some(names) => names
            .iter()
            .map(|n| table.require_column(n))
            .collect::<Result<_>>()?,
    };

    Ok(QueryResult {
        columns: indices
            .iter()
            .map(|&c| table.schema.fields()[c].clone())
            .collect(),
        rows: rows
            .iter()
            .map(|&r| indices.iter().map(|&c| table.cell(r, c).clone()).collect())
            .collect(),
    })
}
