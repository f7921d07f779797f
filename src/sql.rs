use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::parse_slot;
use crate::export::ExportFormat;
use crate::grid::GridFilter;
use crate::model::*;

/// Column order assumed by `INSERT INTO bookings VALUES (...)` without a column list.
pub const BOOKING_COLUMNS: [&str; 8] = [
    "staff_name",
    "department",
    "year",
    "semester",
    "subject",
    "room",
    "day",
    "time",
];

/// Column order assumed by `INSERT INTO assignments VALUES (...)` without a column list.
pub const ASSIGNMENT_COLUMNS: [&str; 5] = ["staff_name", "department", "year", "semester", "subject"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        booking: NewBooking,
    },
    BatchInsertBookings {
        bookings: Vec<NewBooking>,
    },
    AutoAssign {
        request: AssignRequest,
    },
    UpdateBooking {
        id: BookingId,
        changes: BookingChanges,
    },
    DeleteBooking {
        id: BookingId,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectGrid {
        filter: GridFilter,
    },
    SelectSlots,
    SelectExport {
        format: ExportFormat,
        filter: GridFilter,
    },
}

/// Shape of the rows a statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    None,
    Bookings,
    Assignment,
    Grid,
    Slots,
    Export,
}

impl Command {
    pub fn result_kind(&self) -> ResultKind {
        match self {
            Command::InsertBooking { .. }
            | Command::BatchInsertBookings { .. }
            | Command::UpdateBooking { .. }
            | Command::DeleteBooking { .. } => ResultKind::None,
            Command::AutoAssign { .. } => ResultKind::Assignment,
            Command::SelectBookings { .. } => ResultKind::Bookings,
            Command::SelectGrid { .. } => ResultKind::Grid,
            Command::SelectSlots => ResultKind::Slots,
            Command::SelectExport { .. } => ResultKind::Export,
        }
    }
}

/// Result shape of a statement that may still hold `$n` placeholders, so it
/// cannot be fully parsed yet.
pub fn result_kind_of(sql: &str) -> ResultKind {
    let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if normalized.contains("INTO ASSIGNMENTS") {
        ResultKind::Assignment
    } else if !normalized.starts_with("SELECT") {
        ResultKind::None
    } else if normalized.contains("FROM GRID_EXPORT") {
        ResultKind::Export
    } else if normalized.contains("FROM GRID") {
        ResultKind::Grid
    } else if normalized.contains("FROM SLOTS") {
        ResultKind::Slots
    } else if normalized.contains("FROM BOOKINGS") {
        ResultKind::Bookings
    } else {
        ResultKind::None
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, columns: &'a [String], values: &'a [Expr]) -> Result<Self, SqlError> {
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        Ok(Self { columns, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn required(&self, column: &'static str) -> Result<String, SqlError> {
        let expr = self.get(column).ok_or(SqlError::MissingColumn(column))?;
        parse_text(expr)?.ok_or(SqlError::MissingColumn(column))
    }

    fn optional(&self, column: &str) -> Result<Option<String>, SqlError> {
        match self.get(column) {
            Some(expr) => parse_text(expr),
            None => Ok(None),
        }
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "bookings" => {
            let columns = insert_columns(insert, &BOOKING_COLUMNS)?;
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new("bookings", &columns, values)?;
                let booking = booking_from_row(&row).map_err(|e| match e {
                    SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
                    other => other,
                })?;
                bookings.push(booking);
            }
            if bookings.len() == 1 {
                let booking = bookings.remove(0);
                Ok(Command::InsertBooking { booking })
            } else {
                Ok(Command::BatchInsertBookings { bookings })
            }
        }
        "assignments" => {
            if rows.len() != 1 {
                return Err(SqlError::Unsupported("one assignment per statement".into()));
            }
            let columns = insert_columns(insert, &ASSIGNMENT_COLUMNS)?;
            let row = Row::new("assignments", &columns, &rows[0])?;
            Ok(Command::AutoAssign {
                request: AssignRequest {
                    staff_name: row.required("staff_name")?,
                    department: row.required("department")?,
                    year: row.optional("year")?.unwrap_or_default(),
                    semester: row.optional("semester")?.unwrap_or_default(),
                    subject: row.required("subject")?,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn booking_from_row(row: &Row<'_>) -> Result<NewBooking, SqlError> {
    let day = row.required("day")?;
    let time = row.required("time")?;
    let slot = parse_slot(&day, &time).map_err(|e| SqlError::InvalidValue(e.to_string()))?;
    Ok(NewBooking {
        staff_name: row.required("staff_name")?,
        department: row.required("department")?,
        year: row.optional("year")?.unwrap_or_default(),
        semester: row.optional("semester")?.unwrap_or_default(),
        subject: row.required("subject")?,
        room: normalize_room(row.optional("room")?),
        slot,
    })
}

/// The statement's column list, or `default_order` when it has none.
fn insert_columns(insert: &ast::Insert, default_order: &[&str]) -> Result<Vec<String>, SqlError> {
    if insert.columns.is_empty() {
        return Ok(default_order.iter().map(|c| c.to_string()).collect());
    }
    let mut columns = Vec::with_capacity(insert.columns.len());
    for ident in &insert.columns {
        let name = ident.value.to_lowercase();
        if !default_order.contains(&name.as_str()) {
            return Err(SqlError::UnknownColumn(name));
        }
        columns.push(name);
    }
    Ok(columns)
}

// ── UPDATE / DELETE ───────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "bookings" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut changes = BookingChanges::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        let value = &assignment.value;
        match column.as_str() {
            "staff_name" => changes.staff_name = Some(parse_required_text("staff_name", value)?),
            "department" => changes.department = Some(parse_required_text("department", value)?),
            "year" => changes.year = Some(parse_text(value)?.unwrap_or_default()),
            "semester" => changes.semester = Some(parse_text(value)?.unwrap_or_default()),
            "subject" => changes.subject = Some(parse_required_text("subject", value)?),
            "room" => changes.room = Some(normalize_room(parse_text(value)?)),
            "day" => changes.day = Some(parse_day(value)?),
            "time" => changes.period = Some(parse_period(value)?),
            "id" => return Err(SqlError::Unsupported("id cannot be changed".into())),
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }
    if changes.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }
    Ok(Command::UpdateBooking { id, changes })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking {
            id: extract_where_id(&delete.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "bookings" => {
            let mut filter = BookingFilter::default();
            for (column, value) in filters {
                apply_booking_filter(&mut filter, &column, value)?;
            }
            Ok(Command::SelectBookings { filter })
        }
        "grid" => {
            let mut filter = GridFilter::default();
            for (column, value) in filters {
                apply_grid_filter(&mut filter, &column, value)?;
            }
            Ok(Command::SelectGrid { filter })
        }
        "grid_export" => {
            let mut filter = GridFilter::default();
            let mut format = ExportFormat::Csv;
            for (column, value) in filters {
                if column == "format" {
                    let text = value.ok_or(SqlError::MissingFilter("format"))?;
                    format = text
                        .parse()
                        .map_err(|e: crate::export::ExportError| SqlError::InvalidValue(e.to_string()))?;
                } else {
                    apply_grid_filter(&mut filter, &column, value)?;
                }
            }
            Ok(Command::SelectExport { format, filter })
        }
        "slots" => Ok(Command::SelectSlots),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 'x' AND b IS NULL AND ...` into `(column, value)` pairs.
/// `IS NULL` and `= NULL` produce `None`.
fn collect_filters(expr: &Expr, out: &mut Vec<(String, Option<String>)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, out)?;
                collect_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((column, parse_text(right)?));
            }
            other => return Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::IsNull(inner) => {
            let column = expr_column_name(inner)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {inner}")))?;
            out.push((column, None));
        }
        Expr::Nested(inner) => collect_filters(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

fn apply_booking_filter(
    filter: &mut BookingFilter,
    column: &str,
    value: Option<String>,
) -> Result<(), SqlError> {
    fn required(column: &'static str, value: Option<String>) -> Result<String, SqlError> {
        value.ok_or(SqlError::MissingFilter(column))
    }
    match column {
        "id" => {
            let text = required("id", value)?;
            filter.id = Some(parse_id(&text)?);
        }
        "staff_name" => filter.staff_name = Some(required("staff_name", value)?),
        "department" => filter.department = Some(required("department", value)?),
        "year" => filter.year = Some(required("year", value)?),
        "semester" => filter.semester = Some(required("semester", value)?),
        "subject" => filter.subject = Some(required("subject", value)?),
        "room" => filter.room = Some(normalize_room(value)),
        "day" => {
            let text = required("day", value)?;
            filter.day =
                Some(Day::parse(&text).ok_or_else(|| SqlError::InvalidValue(format!("unknown day: {text}")))?);
        }
        "time" => {
            let text = required("time", value)?;
            filter.period = Some(
                Period::parse(&text).ok_or_else(|| SqlError::InvalidValue(format!("unknown time: {text}")))?,
            );
        }
        other => return Err(SqlError::UnknownColumn(other.to_string())),
    }
    Ok(())
}

fn apply_grid_filter(filter: &mut GridFilter, column: &str, value: Option<String>) -> Result<(), SqlError> {
    match column {
        "staff_name" => filter.staff_name = Some(value.ok_or(SqlError::MissingFilter("staff_name"))?),
        "department" => filter.department = Some(value.ok_or(SqlError::MissingFilter("department"))?),
        other => return Err(SqlError::UnknownColumn(other.to_string())),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<BookingId, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => {
            let text = parse_text(right)?.ok_or(SqlError::MissingFilter("id"))?;
            parse_id(&text)
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Text of a literal. Numbers are kept as written (`year = 2` reads as `"2"`);
/// NULL reads as `None`.
fn parse_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Null) => Ok(None),
        Some(other) => Err(SqlError::Parse(format!("expected text, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_required_text(column: &'static str, expr: &Expr) -> Result<String, SqlError> {
    parse_text(expr)?.ok_or(SqlError::MissingColumn(column))
}

fn parse_id(text: &str) -> Result<BookingId, SqlError> {
    text.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad id {text}: {e}")))
}

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let text = parse_required_text("day", expr)?;
    Day::parse(&text).ok_or_else(|| SqlError::InvalidValue(format!("unknown day: {text}")))
}

fn parse_period(expr: &Expr) -> Result<Period, SqlError> {
    let text = parse_required_text("time", expr)?;
    Period::parse(&text).ok_or_else(|| SqlError::InvalidValue(format!("unknown time: {text}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    InvalidValue(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
