use crate::engine::{Schema, Table, Value};
use crate::error::{EngineError, Result};

/// Name given to the transient table a join produces.
pub const JOIN_RESULT_NAME: &str = "join_result";

/// A table named in FROM, with its optional alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>, alias: Option<&str>) -> Self {
        Self {
            name: name.into(),
            alias: alias.map(str::to_string),
        }
    }

    /// Whether `qualifier` names this table, by alias or by table name.
    pub fn answers_to(&self, qualifier: &str) -> bool {
        self.alias.as_deref() == Some(qualifier) || self.name == qualifier
    }
}

/// `column` or `qualifier.column`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once('.') {
            Some((q, c)) => Self {
                qualifier: Some(q.to_string()),
                column: c.to_string(),
            },
            None => Self {
                qualifier: None,
                column: s.to_string(),
            },
        }
    }
}

/// Equality condition `left = right` between one column of each table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinCondition {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Which unmatched rows an outer join keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OuterFlags {
    pub include_left: bool,
    pub include_right: bool,
}

/// Everything needed to evaluate a two-table join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinSpec {
    pub left: TableRef,
    pub right: TableRef,
    /// `None` joins every row with every row.
    pub on: Option<JoinCondition>,
    pub outer: OuterFlags,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Works out which column of each table the condition compares.
pub(crate) fn resolve_condition(
    spec: &JoinSpec,
    left: &Table,
    right: &Table,
) -> Result<Option<(usize, usize)>> {
    let Some(cond) = &spec.on else {
        return Ok(None);
    };

    let locate = |col: &ColumnRef| -> Result<(Side, usize)> {
        let side = match &col.qualifier {
            Some(q) if spec.left.answers_to(q) => Side::Left,
            Some(q) if spec.right.answers_to(q) => Side::Right,
            Some(q) => return Err(EngineError::TableNotFound { name: q.clone() }),
            None if left.column_index(&col.column).is_some() => Side::Left,
            None => Side::Right,
        };
        let table = if side == Side::Left { left } else { right };
        Ok((side, table.require_column(&col.column)?))
    };

    match (locate(&cond.left)?, locate(&cond.right)?) {
        ((Side::Left, l), (Side::Right, r)) | ((Side::Right, r), (Side::Left, l)) => {
            Ok(Some((l, r)))
        }
        _ => Err(EngineError::Unsupported(
            "join condition must compare one column of each table".into(),
        )),
    }
}

/// Nested-loop equality join.
///
/// The result schema is every left column followed by every right column.
/// Matched pairs come first, in left-then-right row order; then unmatched
/// left rows (if `include_left`), then unmatched right rows (if
/// `include_right`), each padded with `Null` on the missing side.
///
/// `on = None` pairs every left row with every right row. Comparing values
/// of different types fails the whole join with `TypeMismatch`.
pub fn join_tables(
    left: &Table,
    right: &Table,
    on: Option<(usize, usize)>,
    outer: OuterFlags,
) -> Result<Table> {
    let schema = Schema::concat(&left.schema, &right.schema);
    let mut result = Table::new(JOIN_RESULT_NAME, schema);

    let mut left_used = vec![false; left.row_count()];
    let mut right_used = vec![false; right.row_count()];

    for (i, lrow) in left.rows().enumerate() {
        for (j, rrow) in right.rows().enumerate() {
            let matched = match on {
                None => true,
                Some((lc, rc)) => lrow[lc].join_eq(&rrow[rc]).ok_or_else(|| {
                    EngineError::type_mismatch(format!(
                        "cannot join {} column {}.{} with {} column {}.{}",
                        lrow[lc].type_name(),
                        left.name,
                        left.schema.fields()[lc].name,
                        rrow[rc].type_name(),
                        right.name,
                        right.schema.fields()[rc].name,
                    ))
                })?,
            };
            if matched {
                result.records.extend_from_slice(lrow);
                result.records.extend_from_slice(rrow);
                left_used[i] = true;
                right_used[j] = true;
            }
        }
    }

    if outer.include_left {
        for (i, lrow) in left.rows().enumerate() {
            if !left_used[i] {
                result.records.extend_from_slice(lrow);
                result
                    .records
                    .extend(std::iter::repeat(Value::Null).take(right.column_count()));
            }
        }
    }

    if outer.include_right {
        for (j, rrow) in right.rows().enumerate() {
            if !right_used[j] {
                result
                    .records
                    .extend(std::iter::repeat(Value::Null).take(left.column_count()));
                result.records.extend_from_slice(rrow);
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FieldDef, SqlType};

    fn employee() -> Table {
        let schema = Schema::from_defs(
            "Employee",
            &[
                FieldDef::new("id", SqlType::Int, 1),
                FieldDef::new("name", SqlType::Varchar, 10),
            ],
        )
        .unwrap();
        let mut t = Table::new("Employee", schema);
        for (id, name) in [(1, "Joe"), (2, "Jack"), (3, "Gill")] {
            t.records.extend([Value::Int(id), Value::from(name)]);
        }
        t
    }

    fn sales() -> Table {
        let schema = Schema::from_defs(
            "Sales",
            &[
                FieldDef::new("employeeID", SqlType::Int, 1),
                FieldDef::new("productID", SqlType::Int, 1),
            ],
        )
        .unwrap();
        let mut t = Table::new("Sales", schema);
        for (e, p) in [(1, 344), (1, 355), (2, 544), (5, 700)] {
            t.records.extend([Value::Int(e), Value::Int(p)]);
        }
        t
    }

    fn spec(cond: Option<(&str, &str)>, outer: OuterFlags) -> JoinSpec {
        JoinSpec {
            left: TableRef::new("Employee", Some("E")),
            right: TableRef::new("Sales", Some("S")),
            on: cond.map(|(l, r)| JoinCondition {
                left: ColumnRef::parse(l),
                right: ColumnRef::parse(r),
            }),
            outer,
        }
    }

    fn inner(l: &str, r: &str) -> JoinSpec {
        spec(Some((l, r)), OuterFlags::default())
    }

    #[test]
    fn inner_join_on_int_key() {
        let (e, s) = (employee(), sales());
        let on = resolve_condition(&inner("E.id", "S.employeeID"), &e, &s).unwrap();
        let r = join_tables(&e, &s, on, OuterFlags::default()).unwrap();

        assert_eq!(r.column_count(), 4);
        assert_eq!(r.row_count(), 3);
        assert_eq!(
            r.row(0),
            &[Value::Int(1), Value::from("Joe"), Value::Int(1), Value::Int(344)]
        );
        assert_eq!(
            r.row(2),
            &[Value::Int(2), Value::from("Jack"), Value::Int(2), Value::Int(544)]
        );
    }

    #[test]
    fn condition_sides_can_be_swapped() {
        let (e, s) = (employee(), sales());
        let on = resolve_condition(&inner("S.employeeID", "E.id"), &e, &s).unwrap();
        assert_eq!(on, Some((0, 0)));
        let on = resolve_condition(&inner("employeeID", "id"), &e, &s).unwrap();
        assert_eq!(on, Some((0, 0)));
    }

    #[test]
    fn left_outer_pads_with_null() {
        let (e, s) = (employee(), sales());
        let outer = OuterFlags {
            include_left: true,
            include_right: false,
        };
        let r = join_tables(&e, &s, Some((0, 0)), outer).unwrap();
        assert_eq!(r.row_count(), 4);
        assert_eq!(
            r.row(3),
            &[Value::Int(3), Value::from("Gill"), Value::Null, Value::Null]
        );
    }

    #[test]
    fn right_and_full_outer() {
        let (e, s) = (employee(), sales());
        let right = OuterFlags {
            include_left: false,
            include_right: true,
        };
        let r = join_tables(&e, &s, Some((0, 0)), right).unwrap();
        assert_eq!(r.row_count(), 4);
        assert_eq!(
            r.row(3),
            &[Value::Null, Value::Null, Value::Int(5), Value::Int(700)]
        );

        let full = OuterFlags {
            include_left: true,
            include_right: true,
        };
        assert_eq!(join_tables(&e, &s, Some((0, 0)), full).unwrap().row_count(), 5);
    }

    #[test]
    fn string_and_float_keys_join() {
        let schema = Schema::from_defs(
            "a",
            &[
                FieldDef::new("k", SqlType::Char, 5),
                FieldDef::new("f", SqlType::Float, 1),
            ],
        )
        .unwrap();
        let mut a = Table::new("a", schema.clone());
        a.records = vec![Value::from("x"), Value::Float(1.5), Value::from("y"), Value::Float(2.0)];
        let mut b = Table::new("b", schema);
        b.records = vec![Value::from("y"), Value::Float(1.500001)];

        let by_key = join_tables(&a, &b, Some((0, 0)), OuterFlags::default()).unwrap();
        assert_eq!(by_key.row_count(), 1);
        let by_float = join_tables(&a, &b, Some((1, 1)), OuterFlags::default()).unwrap();
        assert_eq!(by_float.row_count(), 1);
    }

    #[test]
    fn mismatched_key_types_fail() {
        let (e, s) = (employee(), sales());
        let err = join_tables(&e, &s, Some((1, 0)), OuterFlags::default()).unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { .. }));
    }

    #[test]
    fn no_condition_is_cross_product() {
        let (e, s) = (employee(), sales());
        let r = join_tables(&e, &s, None, OuterFlags::default()).unwrap();
        assert_eq!(r.row_count(), 12);
    }

    #[test]
    fn unknown_qualifier_or_column() {
        let (e, s) = (employee(), sales());
        assert!(matches!(
            resolve_condition(&inner("X.id", "S.employeeID"), &e, &s),
            Err(EngineError::TableNotFound { .. })
        ));
        assert!(matches!(
            resolve_condition(&inner("E.nope", "S.employeeID"), &e, &s),
            Err(EngineError::ColumnNotFound { .. })
        ));
        assert!(matches!(
            resolve_condition(&inner("E.id", "E.name"), &e, &s),
            Err(EngineError::Unsupported(_))
        ));
    }
}
