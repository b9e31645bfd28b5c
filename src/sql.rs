use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, UnaryOperator,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTable {
        request: TableRequest,
        returning: bool,
    },
    InsertReservation {
        request: ReservationRequest,
        returning: bool,
    },
    /// The status stays raw text so an unknown value reaches the engine and
    /// is reported as an invalid status rather than a syntax error.
    UpdateReservationStatus {
        id: String,
        status: String,
        returning: bool,
    },
    SelectAreas,
    SelectTables {
        filter: TableFilter,
    },
    SelectReservations {
        id: Option<String>,
        filter: ReservationFilter,
    },
    SelectAvailability {
        query: AvailabilityQuery,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref(), returning.is_some()),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let row = insert_row(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "tables" => {
            let mut request = TableRequest::default();
            for (col, expr) in &row {
                match col.as_str() {
                    "id" => request.id = text_or_null(expr)?,
                    "areaid" | "area" => request.area_id = text_or_null(expr)?.unwrap_or_default(),
                    "type" | "kind" => request.kind = text_or_null(expr)?.unwrap_or_default(),
                    "capacity" => request.capacity = lenient_count(expr),
                    _ => return Err(SqlError::UnknownColumn(col.clone())),
                }
            }
            Ok(Command::InsertTable { request, returning })
        }
        "reservations" => {
            let mut request = ReservationRequest::default();
            for (col, expr) in &row {
                match col.as_str() {
                    "id" => request.id = text_or_null(expr)?,
                    "name" => request.name = text_or_null(expr)?,
                    "date" => request.date = text_or_null(expr)?,
                    "starttime" => request.start_time = text_or_null(expr)?,
                    "partysize" => request.party_size = count_text(expr)?,
                    "area" | "areaid" | "areapreference" => request.area_preference = text_or_null(expr)?,
                    "duration" => request.duration = u32_or_null(expr)?,
                    "notes" => request.notes = text_or_null(expr)?,
                    _ => return Err(SqlError::UnknownColumn(col.clone())),
                }
            }
            Ok(Command::InsertReservation { request, returning })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair each named column with its value from the single VALUES row.
fn insert_row(insert: &ast::Insert) -> Result<Vec<(String, Expr)>, SqlError> {
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if row.len() != insert.columns.len() {
        return Err(SqlError::WrongArity(insert.columns.len(), row.len()));
    }
    Ok(insert
        .columns
        .iter()
        .map(|ident| normalize_column(&ident.value))
        .zip(row.iter().cloned())
        .collect())
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut status = None;
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match col.as_str() {
            "status" => status = text_or_null(&assignment.value)?,
            _ => return Err(SqlError::Unsupported(format!("SET {col}"))),
        }
    }

    let mut id = None;
    for (col, op, expr) in predicates(selection)? {
        match (col.as_str(), op) {
            ("id", Op::Eq) => id = text_or_null(&expr)?,
            _ => return Err(SqlError::UnknownColumn(col)),
        }
    }

    Ok(Command::UpdateReservationStatus {
        id: id.ok_or(SqlError::MissingFilter("id"))?,
        status: status.ok_or(SqlError::MissingFilter("status"))?,
        returning,
    })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select.from.first().ok_or(SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let preds = predicates(select.selection.as_ref())?;

    match table.as_str() {
        "areas" => match preds.into_iter().next() {
            None => Ok(Command::SelectAreas),
            Some((col, _, _)) => Err(SqlError::UnknownColumn(col)),
        },
        "tables" => {
            let mut filter = TableFilter::default();
            for (col, op, expr) in preds {
                match (col.as_str(), op) {
                    ("areaid", Op::Eq) => filter.area_id = text_or_null(&expr)?.map(|a| a.to_lowercase()),
                    ("capacity", Op::GtEq) | ("mincapacity", Op::Eq) => filter.min_capacity = u32_or_null(&expr)?,
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectTables { filter })
        }
        "reservations" => {
            let mut id = None;
            let mut filter = ReservationFilter::default();
            for (col, op, expr) in preds {
                match (col.as_str(), op) {
                    ("id", Op::Eq) => id = text_or_null(&expr)?,
                    ("date", Op::Eq) => filter.date = text_or_null(&expr)?.map(|d| parse_date(&d)).transpose()?,
                    ("areaid", Op::Eq) => filter.area_id = text_or_null(&expr)?.map(|a| a.to_lowercase()),
                    ("tableid", Op::Eq) => filter.table_id = text_or_null(&expr)?,
                    ("status", Op::Eq) => {
                        filter.status = text_or_null(&expr)?
                            .map(|s| s.parse::<ReservationStatus>())
                            .transpose()
                            .map_err(|e| SqlError::Parse(e.to_string()))?;
                    }
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectReservations { id, filter })
        }
        "availability" => {
            let mut query = AvailabilityQuery::default();
            for (col, op, expr) in preds {
                match (col.as_str(), op) {
                    ("date", Op::Eq) => query.date = text_or_null(&expr)?,
                    ("starttime", Op::Eq) => query.start_time = text_or_null(&expr)?,
                    ("partysize", Op::Eq) => query.party_size = count_text(&expr)?,
                    ("area" | "areaid" | "areapreference", Op::Eq) => query.area_preference = text_or_null(&expr)?,
                    ("duration", Op::Eq) => query.duration = u32_or_null(&expr)?,
                    _ => return Err(SqlError::UnknownColumn(col)),
                }
            }
            Ok(Command::SelectAvailability { query })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
}

/// Flatten a WHERE clause made of `col = v` / `col >= v` terms joined by AND.
fn predicates(selection: Option<&Expr>) -> Result<Vec<(String, Op, Expr)>, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_predicates(expr, &mut out)?;
    }
    Ok(out)
}

fn collect_predicates(expr: &Expr, out: &mut Vec<(String, Op, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_predicates(left, out)?;
                    return collect_predicates(right, out);
                }
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((col, op, right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// `party_size`, `partySize` and `"PARTY_SIZE"` all name the same column.
fn normalize_column(name: &str) -> String {
    name.chars().filter(|c| *c != '_').flat_map(char::to_lowercase).collect()
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(normalize_column(&ident.value)),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| normalize_column(&i.value)),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Non-negative integer, accepting quoted digits from bound parameters.
fn u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    text_or_null(expr)?
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|_| SqlError::Parse(format!("expected non-negative integer, got {s:?}")))
        })
        .transpose()
}

/// Raw text of a count column, left for the engine to validate. A negated
/// literal keeps its sign so it reads as invalid rather than absent.
fn count_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match expr {
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Ok(text_or_null(expr)?.map(|s| format!("-{s}"))),
        _ => text_or_null(expr),
    }
}

/// A positive count, or `None` for anything else so the engine can report
/// the field as invalid in its own terms.
fn lenient_count(expr: &Expr) -> Option<u32> {
    u32_or_null(expr).ok().flatten().filter(|&n| n > 0)
}

fn parse_date(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| SqlError::Parse(format!("invalid date {s:?}, expected YYYY-MM-DD")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
