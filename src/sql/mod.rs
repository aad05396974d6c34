use anyhow::{anyhow, bail, Result};
use sqlparser::ast::{
    AlterTableOperation, BinaryOperator, Expr, JoinConstraint, JoinOperator, ObjectName,
    ObjectType, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::{
    ColumnRef, CompareOp, Engine, FieldDef, JoinCondition, JoinSpec, OuterFlags, Predicate,
    SqlType, TableRef, Value,
};
use crate::error::EngineError;

/// Commands that name a database. These are recognised before the SQL
/// parser sees the statement.
#[derive(Debug, PartialEq, Eq)]
enum DatabaseCommand {
    Create(String),
    Drop(String),
    Use(String),
}

fn database_command(stmt: &str) -> Option<DatabaseCommand> {
    let words: Vec<&str> = stmt.split_whitespace().collect();
    let upper: Vec<String> = words.iter().map(|w| w.to_ascii_uppercase()).collect();
    match upper.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["CREATE", "DATABASE", _] => Some(DatabaseCommand::Create(words[2].to_string())),
        ["DROP", "DATABASE", _] => Some(DatabaseCommand::Drop(words[2].to_string())),
        ["USE", _] => Some(DatabaseCommand::Use(words[1].to_string())),
        _ => None,
    }
}

/// Tables locked by the open transaction.
#[derive(Debug, Default)]
struct Transaction {
    locked: Vec<(String, String)>,
    /// Set once a statement was refused because a table was locked. A
    /// later COMMIT then rolls back instead.
    aborted: bool,
}

/// One client's conversation with the engine: the database chosen with
/// USE and the open transaction, if any.
///
/// ## Transactions
/// Inside `BEGIN TRANSACTION ... COMMIT`, every INSERT, UPDATE or DELETE
/// first locks its table. If another client holds the lock the statement
/// is refused and the transaction is marked aborted; the next COMMIT then
/// rolls everything back and reports `Transaction abort.`. Dropping the
/// session with a transaction still open rolls it back too.
pub struct Session {
    engine: Arc<Engine>,
    current_db: Option<String>,
    txn: Option<Transaction>,
}

impl Session {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            current_db: None,
            txn: None,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Parses and executes one statement, returning the message to show.
    ///
    /// ## Returns
    /// * `Ok(String)` - status line, or the rendered rows for SELECT
    /// * `Err(_)` - parse error, unsupported statement, or an
    ///   [`EngineError`] (recoverable with `downcast_ref`)
    pub fn execute(&mut self, sql: &str) -> Result<String> {
        let text = sql.trim().trim_end_matches(';').trim();
        if text.is_empty() {
            bail!("empty statement");
        }

        if let Some(cmd) = database_command(text) {
            return self.execute_database_command(cmd);
        }

        let dialect = GenericDialect {};
        let mut ast = Parser::parse_sql(&dialect, text)?;
        if ast.len() != 1 {
            bail!("Only one statement at a time is supported");
        }
        let stmt = ast.remove(0);
        debug!(?stmt, "executing statement");

        match stmt {
            // CREATE TABLE t (a int, b varchar(10));
            Statement::CreateTable { name, columns, .. } => {
                let db = self.db()?;
                let table = object_name(&name)?;
                let fields = columns
                    .iter()
                    .map(|c| {
                        let (sql_type, capacity) = parse_column_type(&c.data_type.to_string())?;
                        Ok(FieldDef::new(c.name.value.clone(), sql_type, capacity))
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.engine.create_table(&db, &table, &fields)?;
                Ok(format!("Table {table} created."))
            }

            // DROP TABLE t;
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                ..
            } => {
                let db = self.db()?;
                let mut dropped = Vec::new();
                for n in &names {
                    let table = object_name(n)?;
                    self.engine.drop_table(&db, &table)?;
                    dropped.push(format!("Table {table} deleted."));
                }
                Ok(dropped.join("\n"))
            }

            // ALTER TABLE t ADD c int;
            Statement::AlterTable {
                name, operations, ..
            } => {
                let db = self.db()?;
                let table = object_name(&name)?;
                for op in operations {
                    match op {
                        AlterTableOperation::AddColumn { column_def, .. } => {
                            let (sql_type, capacity) =
                                parse_column_type(&column_def.data_type.to_string())?;
                            let field = FieldDef::new(column_def.name.value, sql_type, capacity);
                            self.engine.add_field(&db, &table, field)?;
                        }
                        other => bail!("Unsupported ALTER TABLE operation: {other}"),
                    }
                }
                Ok(format!("Table {table} modified."))
            }

            // INSERT INTO t [(cols)] VALUES (...), (...);
            Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => {
                let db = self.db()?;
                let table = object_name(&table_name)?;
                let query = source.ok_or_else(|| anyhow!("INSERT requires a source"))?;
                let rows = match query.body.as_ref() {
                    SetExpr::Values(values) => values.rows.clone(),
                    _ => bail!("INSERT supports VALUES only"),
                };
                let columns: Vec<String> = columns.into_iter().map(|c| c.value).collect();

                self.lock_for_write(&db, &table)?;
                let schema = self.engine.load_database(&db)?.require_table(&table)?.schema.clone();
                let mut coerced = Vec::with_capacity(rows.len());
                for row in &rows {
                    coerced.push(coerce_row(&table, &schema, &columns, row)?);
                }
                let n = coerced.len();
                for values in coerced {
                    self.engine.insert(&db, &table, values)?;
                }
                Ok(match n {
                    1 => "1 new record inserted.".to_string(),
                    n => format!("{n} new records inserted."),
                })
            }

            // UPDATE t SET c = lit [, ...] [WHERE ...];
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let db = self.db()?;
                let table = single_table(&table)?.name;
                let mut pairs = Vec::with_capacity(assignments.len());
                for a in &assignments {
                    let column = a
                        .id
                        .last()
                        .map(|i| i.value.clone())
                        .ok_or_else(|| anyhow!("assignment without a column"))?;
                    let literal = literal(&a.value)?
                        .ok_or_else(|| anyhow!("NULL cannot be assigned"))?;
                    pairs.push((column, literal));
                }
                let pred = parse_where(selection.as_ref())?;

                self.lock_for_write(&db, &table)?;
                let (_, n) = self.engine.update(&db, &table, &pairs, pred.as_ref())?;
                Ok(plural(n, "modified"))
            }

            // DELETE FROM t [WHERE ...];
            Statement::Delete {
                from, selection, ..
            } => {
                // sqlparser 0.43: `from` is Vec<TableWithJoins>
                if from.len() != 1 {
                    bail!("Only single table DELETE supported");
                }
                let db = self.db()?;
                let table = single_table(&from[0])?.name;
                let pred = parse_where(selection.as_ref())?;

                self.lock_for_write(&db, &table)?;
                let (_, n) = self.engine.delete(&db, &table, pred.as_ref())?;
                Ok(plural(n, "deleted"))
            }

            Statement::Query(q) => self.execute_query(&q),

            Statement::StartTransaction { .. } => {
                if self.txn.is_some() {
                    bail!("a transaction is already in progress");
                }
                self.txn = Some(Transaction::default());
                Ok("Transaction starts.".to_string())
            }

            Statement::Commit { .. } => {
                let txn = self
                    .txn
                    .take()
                    .ok_or_else(|| anyhow!("no transaction in progress"))?;
                if txn.aborted {
                    self.release(txn, false)?;
                    Ok("Transaction abort.".to_string())
                } else {
                    self.release(txn, true)?;
                    Ok("Transaction committed.".to_string())
                }
            }

            Statement::Rollback { .. } => {
                let txn = self
                    .txn
                    .take()
                    .ok_or_else(|| anyhow!("no transaction in progress"))?;
                self.release(txn, false)?;
                Ok("Transaction rolled back.".to_string())
            }

            _ => bail!("Unsupported statement"),
        }
    }

    /// Rolls back an open transaction. Called when the session ends.
    pub fn close(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            warn!(tables = txn.locked.len(), "session ended inside a transaction, rolling back");
            self.release(txn, false)?;
        }
        Ok(())
    }

    fn execute_database_command(&mut self, cmd: DatabaseCommand) -> Result<String> {
        match cmd {
            DatabaseCommand::Create(name) => {
                self.engine.create_database(&name)?;
                Ok(format!("Database {name} created."))
            }
            DatabaseCommand::Drop(name) => {
                if self.txn.as_ref().is_some_and(|t| t.locked.iter().any(|(d, _)| *d == name)) {
                    bail!("cannot drop database {name} while this session's transaction uses it");
                }
                self.engine.drop_database(&name)?;
                if self.current_db.as_deref() == Some(name.as_str()) {
                    self.current_db = None;
                }
                Ok(format!("Database {name} deleted."))
            }
            DatabaseCommand::Use(name) => {
                if !self.engine.database_exists(&name) {
                    return Err(EngineError::DatabaseNotFound { name }.into());
                }
                self.current_db = Some(name.clone());
                Ok(format!("Using database {name}."))
            }
        }
    }

    fn execute_query(&mut self, q: &Query) -> Result<String> {
        let select = match q.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => bail!("Unsupported query body"),
        };
        let Select {
            from,
            projection,
            selection,
            ..
        } = select.as_ref();
        let db = self.db()?;

        match from.as_slice() {
            // SELECT ... FROM t [WHERE ...]
            [only] if only.joins.is_empty() => {
                let table = single_table(only)?.name;
                let columns = projected_columns(projection)?;
                let pred = parse_where(selection.as_ref())?;
                Ok(self
                    .engine
                    .select(&db, &table, columns.as_deref(), pred.as_ref())?)
            }

            // SELECT * FROM a x JOIN b y ON x.c = y.d
            [only] if only.joins.len() == 1 => {
                require_wildcard(projection)?;
                if selection.is_some() {
                    bail!("WHERE is not supported together with JOIN ... ON");
                }
                let join = &only.joins[0];
                let (constraint, outer) = match &join.join_operator {
                    JoinOperator::Inner(c) => (c, OuterFlags::default()),
                    JoinOperator::LeftOuter(c) => (
                        c,
                        OuterFlags {
                            include_left: true,
                            include_right: false,
                        },
                    ),
                    JoinOperator::RightOuter(c) => (
                        c,
                        OuterFlags {
                            include_left: false,
                            include_right: true,
                        },
                    ),
                    JoinOperator::FullOuter(c) => (
                        c,
                        OuterFlags {
                            include_left: true,
                            include_right: true,
                        },
                    ),
                    _ => bail!("Unsupported join type"),
                };
                let on = match constraint {
                    JoinConstraint::On(expr) => Some(join_condition(expr)?),
                    JoinConstraint::None => None,
                    _ => bail!("Only JOIN ... ON is supported"),
                };
                let spec = JoinSpec {
                    left: table_ref(&only.relation)?,
                    right: table_ref(&join.relation)?,
                    on,
                    outer,
                };
                Ok(self.engine.join(&db, &spec)?)
            }

            // SELECT * FROM a x, b y WHERE x.c = y.d
            [first, second] if first.joins.is_empty() && second.joins.is_empty() => {
                require_wildcard(projection)?;
                let spec = JoinSpec {
                    left: table_ref(&first.relation)?,
                    right: table_ref(&second.relation)?,
                    on: selection.as_ref().map(join_condition).transpose()?,
                    outer: OuterFlags::default(),
                };
                Ok(self.engine.join(&db, &spec)?)
            }

            _ => bail!("Only single table SELECT or a two table join is supported"),
        }
    }

    fn db(&self) -> Result<String> {
        self.current_db
            .clone()
            .ok_or_else(|| anyhow!("no database selected, run USE <database> first"))
    }

    /// Inside a transaction, locks `table` before it is written.
    fn lock_for_write(&mut self, db: &str, table: &str) -> Result<()> {
        let Some(txn) = self.txn.as_mut() else {
            return Ok(());
        };
        if txn.locked.iter().any(|(d, t)| d == db && t == table) {
            return Ok(());
        }
        if self.engine.lock_table(db, table)? {
            txn.locked.push((db.to_string(), table.to_string()));
            Ok(())
        } else {
            txn.aborted = true;
            Err(EngineError::LockHeld {
                table: table.to_string(),
            }
            .into())
        }
    }

    /// Commits or rolls back every table of `txn`. Every table is attempted
    /// even if one fails; the first error is returned.
    fn release(&self, txn: Transaction, commit: bool) -> Result<()> {
        let mut first_err = None;
        for (db, table) in &txn.locked {
            let res = if commit {
                self.engine.commit_transaction(db, table)
            } else {
                self.engine.reset_transaction(db, table)
            };
            if let Err(e) = res {
                warn!(db = %db, table = %table, error = %e, "failed to release lock");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "rollback at session end failed");
        }
    }
}

fn plural(n: usize, verb: &str) -> String {
    match n {
        1 => format!("1 record {verb}."),
        n => format!("{n} records {verb}."),
    }
}

fn object_name(name: &ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|i| i.value.clone())
        .ok_or_else(|| anyhow!("empty object name"))
}

fn table_ref(factor: &TableFactor) -> Result<TableRef> {
    match factor {
        TableFactor::Table { name, alias, .. } => Ok(TableRef {
            name: object_name(name)?,
            alias: alias.as_ref().map(|a| a.name.value.clone()),
        }),
        _ => bail!("Unsupported FROM clause"),
    }
}

fn single_table(twj: &TableWithJoins) -> Result<TableRef> {
    if !twj.joins.is_empty() {
        bail!("JOIN is only supported in SELECT");
    }
    table_ref(&twj.relation)
}

/// `None` means every column.
fn projected_columns(projection: &[SelectItem]) -> Result<Option<Vec<String>>> {
    let mut cols = Vec::new();
    for item in projection {
        match item {
            SelectItem::Wildcard(_) => return Ok(None),
            SelectItem::UnnamedExpr(expr) => cols.push(column_name(expr)?),
            _ => bail!("Only SELECT col1, col2 or * supported"),
        }
    }
    Ok(Some(cols))
}

fn require_wildcard(projection: &[SelectItem]) -> Result<()> {
    match projection {
        [SelectItem::Wildcard(_)] => Ok(()),
        _ => bail!("Only SELECT * is supported for joins"),
    }
}

fn column_name(expr: &Expr) -> Result<String> {
    column_ref(expr).map(|c| c.column)
}

fn column_ref(expr: &Expr) -> Result<ColumnRef> {
    match expr {
        Expr::Identifier(id) => Ok(ColumnRef {
            qualifier: None,
            column: id.value.clone(),
        }),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => Ok(ColumnRef {
            qualifier: Some(parts[0].value.clone()),
            column: parts[1].value.clone(),
        }),
        Expr::Nested(inner) => column_ref(inner),
        _ => bail!("expected a column name, got {expr}"),
    }
}

fn is_column(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => true,
        Expr::Nested(inner) => is_column(inner),
        _ => false,
    }
}

/// Literal text of a constant expression. `None` for NULL.
fn literal(expr: &Expr) -> Result<Option<String>> {
    match expr {
        Expr::Value(v) => match v {
            SqlValue::Number(n, _) => Ok(Some(n.clone())),
            SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
                Ok(Some(s.clone()))
            }
            SqlValue::Boolean(b) => Ok(Some(b.to_string())),
            SqlValue::Null => Ok(None),
            other => bail!("Unsupported literal {other}"),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Ok(literal(expr)?.map(|s| format!("-{s}"))),
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => literal(expr),
        Expr::Nested(inner) => literal(inner),
        _ => bail!("Unsupported literal {expr}"),
    }
}

fn compare_op(op: &BinaryOperator) -> Result<CompareOp> {
    Ok(match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::NotEq,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::LtEq => CompareOp::LtEq,
        BinaryOperator::GtEq => CompareOp::GtEq,
        other => bail!("Unsupported operator {other} in WHERE"),
    })
}

/// Converts an optional WHERE clause into a `column op literal` predicate.
/// `literal op column` is accepted and turned around.
fn parse_where(selection: Option<&Expr>) -> Result<Option<Predicate>> {
    let Some(expr) = selection else {
        return Ok(None);
    };
    match expr {
        Expr::Nested(inner) => parse_where(Some(inner)),
        Expr::BinaryOp { left, op, right } => {
            let op = compare_op(op)?;
            let (column, op, value) = match (is_column(left), is_column(right)) {
                (true, false) => (column_name(left)?, op, right.as_ref()),
                (false, true) => (column_name(right)?, op.flipped(), left.as_ref()),
                _ => bail!("WHERE must compare a column with a literal"),
            };
            let lit =
                literal(value)?.ok_or_else(|| anyhow!("comparison with NULL is not supported"))?;
            Ok(Some(Predicate::new(column, op, lit)))
        }
        _ => bail!("Unsupported WHERE expression"),
    }
}

/// `x.c = y.d`
fn join_condition(expr: &Expr) -> Result<JoinCondition> {
    match expr {
        Expr::Nested(inner) => join_condition(inner),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => Ok(JoinCondition {
            left: column_ref(left)?,
            right: column_ref(right)?,
        }),
        _ => bail!("join condition must be column = column"),
    }
}

/// Splits a rendered SQL type such as `VARCHAR(20)` into a type and a
/// capacity.
fn parse_column_type(rendered: &str) -> Result<(SqlType, u32)> {
    let (base, args) = match rendered.split_once('(') {
        Some((base, rest)) => (base.trim(), Some(rest.trim_end_matches(')'))),
        None => (rendered.trim(), None),
    };
    let base = match base.to_ascii_lowercase().as_str() {
        "character varying" | "char varying" => "varchar".to_string(),
        "double precision" => "double".to_string(),
        other => other.to_string(),
    };
    let sql_type: SqlType = base.parse()?;
    let capacity = match args {
        Some(a) => a
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(|| anyhow!("bad length in type {rendered}"))?,
        None => 1,
    };
    Ok((sql_type, capacity))
}

/// Turns one VALUES row into column-ordered values of the right types.
fn coerce_row(
    table: &str,
    schema: &crate::engine::Schema,
    columns: &[String],
    row: &[Expr],
) -> Result<Vec<Value>> {
    let fields = schema.fields();
    let targets: Vec<usize> = if columns.is_empty() {
        (0..fields.len()).collect()
    } else {
        columns
            .iter()
            .map(|c| {
                schema.index_of(c).ok_or_else(|| EngineError::ColumnNotFound {
                    table: table.to_string(),
                    name: c.clone(),
                })
            })
            .collect::<std::result::Result<_, _>>()?
    };
    if row.len() != targets.len() {
        bail!(
            "table {table} expects {} values, got {}",
            targets.len(),
            row.len()
        );
    }

    let mut values = vec![Value::Null; fields.len()];
    for (expr, &c) in row.iter().zip(&targets) {
        let field = &fields[c];
        values[c] = match literal(expr)? {
            None => Value::Null,
            Some(text) => field.sql_type.parse_literal(&text).ok_or_else(|| {
                EngineError::type_mismatch(format!(
                    "'{text}' is not a valid {} for column {}",
                    field.sql_type, field.name
                ))
            })?,
        };
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_database_commands() {
        assert_eq!(
            database_command("create database db_1"),
            Some(DatabaseCommand::Create("db_1".into()))
        );
        assert_eq!(
            database_command("DROP DATABASE db_2"),
            Some(DatabaseCommand::Drop("db_2".into()))
        );
        assert_eq!(database_command("use db_1"), Some(DatabaseCommand::Use("db_1".into())));
        assert_eq!(database_command("CREATE TABLE t (a int)"), None);
    }

    #[test]
    fn column_types() {
        assert_eq!(parse_column_type("INT").unwrap(), (SqlType::Int, 1));
        assert_eq!(parse_column_type("VARCHAR(20)").unwrap(), (SqlType::Varchar, 20));
        assert_eq!(parse_column_type("CHAR(3)").unwrap(), (SqlType::Char, 3));
        assert_eq!(parse_column_type("FLOAT").unwrap(), (SqlType::Float, 1));
        assert_eq!(parse_column_type("BOOLEAN").unwrap(), (SqlType::Bool, 1));
        assert!(parse_column_type("BLOB").is_err());
    }

    fn where_of(sql: &str) -> Option<Predicate> {
        let mut ast = Parser::parse_sql(&GenericDialect {}, sql).unwrap();
        match ast.remove(0) {
            Statement::Query(q) => match q.body.as_ref() {
                SetExpr::Select(s) => parse_where(s.selection.as_ref()).unwrap(),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn where_clauses() {
        assert_eq!(
            where_of("SELECT * FROM t WHERE a = 1"),
            Some(Predicate::new("a", CompareOp::Eq, "1"))
        );
        assert_eq!(
            where_of("SELECT * FROM t WHERE name != 'Gizmo'"),
            Some(Predicate::new("name", CompareOp::NotEq, "Gizmo"))
        );
        assert_eq!(
            where_of("SELECT * FROM t WHERE 5 < a"),
            Some(Predicate::new("a", CompareOp::Gt, "5"))
        );
        assert_eq!(
            where_of("SELECT * FROM t WHERE price > -1.5"),
            Some(Predicate::new("price", CompareOp::Gt, "-1.5"))
        );
        assert_eq!(where_of("SELECT * FROM t"), None);
    }
}
