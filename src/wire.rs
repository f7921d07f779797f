use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::export::{self, ExportError};
use crate::grid::Grid;
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ResultKind, SqlError};
use crate::tenant::TenantManager;

pub struct TimetableHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TimetableQueryParser>,
}

impl TimetableHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TimetableQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute(&self, engine: &Engine, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertBooking { booking } => {
                engine.check_and_insert(booking).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::BatchInsertBookings { bookings } => {
                let inserted = engine
                    .batch_check_and_insert(bookings)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(inserted.len())))
            }
            Command::AutoAssign { request } => {
                let booking = engine.auto_assign(request).await.map_err(engine_err)?;
                let schema = Arc::new(assignment_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(booking.id as i64))?;
                encoder.encode_field(&booking.slot.day.to_string())?;
                encoder.encode_field(&booking.slot.period.label().to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::UpdateBooking { id, changes } => {
                engine.edit_booking(id, changes).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { filter } => {
                let bookings = engine.find_bookings(&filter).await;
                let schema = Arc::new(bookings_schema());
                let rows: Vec<PgWireResult<DataRow>> = bookings
                    .iter()
                    .map(|b| encode_booking(&schema, b))
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectGrid { filter } => {
                let grid = engine.grid(&filter).await;
                let schema = Arc::new(grid_schema());
                let rows = encode_grid(&schema, &grid);
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectSlots => {
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<DataRow>> = Slot::scan_order()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(slot.position() as i32))?;
                        encoder.encode_field(&slot.day.to_string())?;
                        encoder.encode_field(&slot.period.label().to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectExport { format, filter } => {
                let grid = engine.grid(&filter).await;
                let document = export::export(&grid, format).map_err(export_err)?;
                let schema = Arc::new(export_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&document)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &Booking) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&(b.id as i64))?;
    encoder.encode_field(&b.staff_name)?;
    encoder.encode_field(&b.department)?;
    encoder.encode_field(&b.year)?;
    encoder.encode_field(&b.semester)?;
    encoder.encode_field(&b.subject)?;
    encoder.encode_field(&b.room)?;
    encoder.encode_field(&b.slot.day.to_string())?;
    encoder.encode_field(&b.slot.period.label().to_string())?;
    Ok(encoder.take_row())
}

fn encode_grid(schema: &Arc<Vec<FieldInfo>>, grid: &Grid) -> Vec<PgWireResult<DataRow>> {
    Period::all()
        .map(|period| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&period.label().to_string())?;
            for label in grid.row_labels(period) {
                encoder.encode_field(&label)?;
            }
            Ok(encoder.take_row())
        })
        .collect()
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("staff_name"),
        text_field("department"),
        text_field("year"),
        text_field("semester"),
        text_field("subject"),
        text_field("room"),
        text_field("day"),
        text_field("time"),
    ]
}

fn assignment_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("day"),
        text_field("time"),
    ]
}

fn grid_schema() -> Vec<FieldInfo> {
    let mut fields = vec![text_field("time")];
    fields.extend(DAYS.iter().map(|d| text_field(&d.to_lowercase())));
    fields
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("position".into(), None, None, Type::INT4, FieldFormat::Text),
        text_field("day"),
        text_field("time"),
    ]
}

fn export_schema() -> Vec<FieldInfo> {
    vec![text_field("document")]
}

fn schema_for(kind: ResultKind) -> Vec<FieldInfo> {
    match kind {
        ResultKind::None => vec![],
        ResultKind::Bookings => bookings_schema(),
        ResultKind::Assignment => assignment_schema(),
        ResultKind::Grid => grid_schema(),
        ResultKind::Slots => slots_schema(),
        ResultKind::Export => export_schema(),
    }
}

#[async_trait]
impl SimpleQueryHandler for TimetableHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let response = self.execute(&engine, query).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TimetableQueryParser;

#[async_trait]
impl QueryParser for TimetableQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(sql::result_kind_of(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TimetableHandler {
    type Statement = String;
    type QueryParser = TimetableQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.execute(&engine, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        let fields = schema_for(sql::result_kind_of(&target.statement));
        Ok(DescribeStatementResponse::new(param_types, fields))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let fields = schema_for(sql::result_kind_of(&target.statement.statement));
        Ok(DescribePortalResponse::new(fields))
    }
}

/// Byte range and index of every `$N` placeholder outside quoted text.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        i += 1;
        match quote {
            // A doubled quote closes and reopens, which lands in the same state.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i - 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            None => {}
        }
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace each `$N` with the N-th bound value as a quoted literal, in a
/// single pass. Substituted text is never scanned again.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, portal.parameters.as_slice())
}

// ── Factory ──────────────────────────────────────────────────────

/// Every user of every tenant logs in with the one server password.
#[derive(Debug)]
pub struct SharedPasswordSource {
    password: String,
}

#[async_trait]
impl AuthSource for SharedPasswordSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

pub struct TimetableFactory {
    handler: Arc<TimetableHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TimetableFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SharedPasswordSource { password };
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(TimetableHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TimetableFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = TimetableFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23505",
        EngineError::NoCapacity { .. } => "53000",
        EngineError::NotFound(_) => "02000",
        EngineError::InvalidSlot(_) | EngineError::InvalidField(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(_) => "42703",
        SqlError::InvalidValue(_) => "22023",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}

fn export_err(e: ExportError) -> PgWireError {
    user_error("XX000", e.to_string())
}
