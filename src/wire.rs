use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SeatwiseAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct SeatwiseHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SeatwiseQueryParser>,
}

impl SeatwiseHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SeatwiseQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(|e| {
            metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
            sql_err(e)
        })?;
        let label = command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertTable { request, returning } => {
                let table = engine.add_table(request).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![rows_response(table_schema(), &[table], encode_table)]);
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation { request, returning } => {
                let reservation = engine.create_reservation(request).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![rows_response(reservation_schema(), &[reservation], encode_reservation)]);
                }
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateReservationStatus { id, status, returning } => {
                let status: ReservationStatus =
                    status.parse().map_err(|e| engine_err(EngineError::from(e)))?;
                let reservation = engine.update_status(&id, status).await.map_err(engine_err)?;
                if returning {
                    return Ok(vec![rows_response(reservation_schema(), &[reservation], encode_reservation)]);
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAreas => {
                let areas = engine.list_areas();
                Ok(vec![rows_response(area_schema(), &areas, encode_area)])
            }
            Command::SelectTables { filter } => {
                let tables = engine.list_tables(&filter);
                Ok(vec![rows_response(table_schema(), &tables, encode_table)])
            }
            Command::SelectReservations { id, filter } => {
                let reservations = match id {
                    Some(id) => engine
                        .get_reservation(&id)
                        .filter(|r| filter.matches(r))
                        .into_iter()
                        .collect(),
                    None => engine.list_reservations(&filter),
                };
                Ok(vec![rows_response(reservation_schema(), &reservations, encode_reservation)])
            }
            Command::SelectAvailability { query } => {
                let found = engine.check_availability(query).await.map_err(engine_err)?;
                Ok(vec![rows_response(availability_schema(), &[found], encode_availability)])
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn area_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), int_field("max_tables")]
}

fn table_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("area_id"),
        text_field("type"),
        int_field("capacity"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("date"),
        text_field("start_time"),
        int_field("duration"),
        int_field("party_size"),
        text_field("area_id"),
        text_field("table_id"),
        text_field("status"),
        text_field("notes"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("area_id"),
        text_field("area_name"),
        text_field("table_id"),
        text_field("type"),
        int_field("capacity"),
    ]
}

fn encode_area(encoder: &mut DataRowEncoder, area: &Area) -> PgWireResult<()> {
    encoder.encode_field(&area.id)?;
    encoder.encode_field(&area.name)?;
    encoder.encode_field(&i64::from(area.max_tables))
}

fn encode_table(encoder: &mut DataRowEncoder, table: &Table) -> PgWireResult<()> {
    encoder.encode_field(&table.id)?;
    encoder.encode_field(&table.area_id)?;
    encoder.encode_field(&table.kind)?;
    encoder.encode_field(&i64::from(table.capacity))
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.id)?;
    encoder.encode_field(&r.name)?;
    encoder.encode_field(&r.date.format("%Y-%m-%d").to_string())?;
    encoder.encode_field(&r.start_time.to_string())?;
    encoder.encode_field(&i64::from(r.duration))?;
    encoder.encode_field(&i64::from(r.party_size))?;
    encoder.encode_field(&r.area_id)?;
    encoder.encode_field(&r.table_id)?;
    encoder.encode_field(&r.status.to_string())?;
    encoder.encode_field(&r.notes)
}

fn encode_availability(encoder: &mut DataRowEncoder, found: &TableAvailability) -> PgWireResult<()> {
    encoder.encode_field(&found.area_id)?;
    encoder.encode_field(&found.area_name)?;
    encoder.encode_field(&found.table.id)?;
    encoder.encode_field(&found.table.kind)?;
    encoder.encode_field(&i64::from(found.table.capacity))
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// The relation a statement reads from or writes to, by keyword position.
fn target_relation(sql: &str) -> Option<String> {
    let words: Vec<String> = sql
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let idx = match words.iter().position(|w| w == "from" || w == "into") {
        Some(i) => i + 1,
        None if words.first().map(String::as_str) == Some("update") => 1,
        None => return None,
    };
    words.get(idx).cloned()
}

/// Row shape for a not-yet-executed statement, for Describe.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if !(upper.starts_with("SELECT") || upper.contains("RETURNING")) {
        return vec![];
    }
    match target_relation(sql).as_deref() {
        Some("areas") => area_schema(),
        Some("tables") => table_schema(),
        Some("reservations") => reservation_schema(),
        Some("availability") => availability_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SeatwiseHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SeatwiseQueryParser;

#[async_trait]
impl QueryParser for SeatwiseQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SeatwiseHandler {
    type Statement = String;
    type QueryParser = SeatwiseQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let responses = self.run(&sql).await?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| PgWireError::ApiError("statement produced no response".into()))
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals, highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SeatwiseFactory {
    handler: Arc<SeatwiseHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SeatwiseAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SeatwiseFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SeatwiseAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SeatwiseHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SeatwiseFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(SeatwiseFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

/// Client-facing text for an engine error: stable kind, then detail.
fn engine_message(e: &EngineError) -> String {
    format!("{}: {e}", e.kind())
}

fn engine_err(e: EngineError) -> PgWireError {
    tracing::debug!("request rejected: {e}");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        engine_message(&e),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schema: &[FieldInfo]) -> Vec<String> {
        schema.iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM areas"), 0);
        assert_eq!(count_params("UPDATE reservations SET status = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT * FROM tables WHERE capacity >= $10"), 10);
    }

    #[test]
    fn finds_target_relation() {
        assert_eq!(target_relation("select * from Tables where capacity >= 2").as_deref(), Some("tables"));
        assert_eq!(target_relation("INSERT INTO reservations(name) VALUES ($1)").as_deref(), Some("reservations"));
        assert_eq!(target_relation("UPDATE reservations SET status = $1").as_deref(), Some("reservations"));
        assert_eq!(target_relation("BEGIN"), None);
    }

    #[test]
    fn describe_shapes_follow_relation() {
        assert_eq!(names(&result_schema("SELECT * FROM areas")), ["id", "name", "max_tables"]);
        assert_eq!(
            names(&result_schema("SELECT * FROM availability WHERE date = $1")),
            ["area_id", "area_name", "table_id", "type", "capacity"]
        );
        assert_eq!(
            result_schema("UPDATE reservations SET status = $1 WHERE id = $2 RETURNING *").len(),
            10
        );
        assert!(result_schema("UPDATE reservations SET status = $1 WHERE id = $2").is_empty());
        assert!(result_schema("INSERT INTO tables (area_id) VALUES ($1)").is_empty());
    }

    #[test]
    fn engine_errors_carry_kind_prefix() {
        let msg = engine_message(&EngineError::ReservationNotFound("r9".into()));
        assert!(msg.starts_with("ReservationNotFound: "), "{msg}");
        assert!(msg.contains("r9"));
    }
}
