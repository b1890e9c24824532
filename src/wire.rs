use std::fmt::Debug;
use std::io;
use std::sync::Arc;

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
use ulid::Ulid;

use crate::auth::AgendoAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct AgendoHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgendoQueryParser>,
}

impl AgendoHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgendoQueryParser),
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

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let started = std::time::Instant::now();
        let label = crate::observability::command_label(&cmd);
        let now = chrono::Local::now().naive_local();
        let result = self.dispatch(engine, cmd, now).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn dispatch(
        &self,
        engine: &Engine,
        cmd: Command,
        now: chrono::NaiveDateTime,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            // ── Catalog ──────────────────────────────────────
            Command::InsertStaff { id, name } => {
                engine.add_staff(id, name).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteStaff { id } => {
                engine.remove_staff(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertService { id, name, kind, duration_min, price_cents } => {
                engine
                    .add_service(id, name, kind, duration_min, price_cents)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteService { id } => {
                engine.remove_service(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertResourceType { id, name } => {
                engine.add_resource_type(id, name).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteResourceType { id } => {
                engine.remove_resource_type(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertUnit { id, type_id, status } => {
                engine.add_unit(id, type_id, status).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::UpdateUnitStatus { id, status } => {
                engine.set_unit_status(id, status).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::DeleteUnit { id } => {
                engine.remove_unit(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertNeed { id, service_id, type_id, required, units } => {
                engine
                    .declare_need(id, service_id, type_id, required, units)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteNeed { id } => {
                engine.remove_need(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertRule { rule } => {
                engine.add_rule(rule).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteRule { id } => {
                engine.remove_rule(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::InsertBlackout { id, staff_id, start, end, reason, all_day } => {
                if end <= start {
                    return Err(engine_err(crate::engine::EngineError::LimitExceeded(
                        "blackout must end after it starts",
                    )));
                }
                engine
                    .add_blackout(id, staff_id, Span::new(start, end), reason, all_day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteBlackout { id } => {
                engine.remove_blackout(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }
            Command::UpdatePolicy { patch } => {
                engine.update_policy(patch).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::InsertWaitlist {
                id,
                client_id,
                service_id,
                from_date,
                to_date,
                from_time,
                to_time,
            } => {
                engine
                    .join_waitlist(
                        id, client_id, service_id, from_date, to_date, from_time, to_time, now,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteWaitlist { id } => {
                engine.leave_waitlist(id).await.map_err(engine_err)?;
                Ok(vec![deleted(1)])
            }

            // ── Lifecycle ────────────────────────────────────
            Command::InsertAppointment { id, client_id, staff_id, date, start, service_ids } => {
                engine
                    .request_appointment(id, client_id, staff_id, &service_ids, date, start, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::ApproveAppointment { id } => {
                engine.approve_appointment(id, now).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::ConfirmDeposit { id } => {
                engine.confirm_deposit(id).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::ReprogramAppointment { id, date, start, actor } => {
                engine
                    .reprogram_appointment(id, date, start, actor, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::CancelAppointment { id, actor, reason } => {
                let outcome = engine
                    .cancel_appointment(id, actor, reason, now)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![cancel_response(&outcome)?])
            }
            Command::CompleteAppointment { id } => {
                engine.complete_appointment(id).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::MarkNoShow { id } => {
                engine.mark_no_show(id).await.map_err(engine_err)?;
                Ok(vec![updated(1)])
            }
            Command::AcceptOffer { id, client_id } => {
                let appt = engine.accept_offer(id, client_id, now).await.map_err(engine_err)?;
                Ok(vec![appointments_response(vec![appt])?])
            }

            // ── Queries ──────────────────────────────────────
            Command::SelectAvailability { service_id, from_date } => {
                let slots = engine
                    .query_availability(service_id, from_date, now)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.date.to_string())?;
                        encoder.encode_field(&slot.staff_id.to_string())?;
                        encoder.encode_field(&slot.start.format("%H:%M").to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAppointments { client_id, status, date } => {
                // Reading the booking list runs the lazy expiry sweep first,
                // so stale pending rows never surface as active.
                if let Err(e) = engine.sweep_expired(now).await {
                    tracing::debug!("pre-read sweep skip: {e}");
                }
                let rows = engine.list_appointments(client_id, status, date).await;
                Ok(vec![appointments_response(rows)?])
            }
            Command::SelectOffers { client_id } => {
                let offers = engine.list_offers(client_id).await;
                let schema = Arc::new(offers_schema());
                let rows: Vec<PgWireResult<_>> = offers
                    .into_iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.client_id.to_string())?;
                        encoder.encode_field(&o.staff_id.to_string())?;
                        encoder.encode_field(&o.date.to_string())?;
                        encoder.encode_field(&o.start.format("%H:%M").to_string())?;
                        encoder.encode_field(&join_ids(o.service_ids.iter()))?;
                        let source = match o.source {
                            OfferSource::Waitlist(_) => "waitlist",
                            OfferSource::Advance(_) => "advance",
                        };
                        encoder.encode_field(&source)?;
                        encoder.encode_field(&o.claimed)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectWaitlist => {
                let entries = engine.list_waitlist().await;
                let schema = Arc::new(waitlist_schema());
                let rows: Vec<PgWireResult<_>> = entries
                    .into_iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.id.to_string())?;
                        encoder.encode_field(&e.client_id.to_string())?;
                        encoder.encode_field(&e.service_id.to_string())?;
                        encoder.encode_field(&e.from_date.to_string())?;
                        encoder.encode_field(&e.to_date.to_string())?;
                        encoder.encode_field(&e.from_time.map(|t| t.format("%H:%M").to_string()))?;
                        encoder.encode_field(&e.to_time.map(|t| t.format("%H:%M").to_string()))?;
                        encoder.encode_field(&e.active)?;
                        encoder.encode_field(&e.notified)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectStaff => {
                let staff = engine.list_staff().await;
                let schema = Arc::new(staff_schema());
                let rows: Vec<PgWireResult<_>> = staff
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&s.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectServices => {
                let services = engine.list_services().await;
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        let kind = match s.kind {
                            ServiceKind::ColorDesign => "color_design",
                            ServiceKind::Complement => "complement",
                        };
                        encoder.encode_field(&kind)?;
                        encoder.encode_field(&s.duration_min)?;
                        encoder.encode_field(&s.price_cents)?;
                        encoder.encode_field(&s.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectRules => {
                let rules = engine.list_rules().await;
                let schema = Arc::new(rules_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.staff_id.map(|s| s.to_string()))?;
                        encoder.encode_field(&i64::from(r.weekday))?;
                        encoder.encode_field(&r.start.format("%H:%M").to_string())?;
                        encoder.encode_field(&r.end.format("%H:%M").to_string())?;
                        encoder.encode_field(&r.valid_from.map(|d| d.to_string()))?;
                        encoder.encode_field(&r.valid_to.map(|d| d.to_string()))?;
                        encoder.encode_field(&r.color_design)?;
                        encoder.encode_field(&r.complement)?;
                        encoder.encode_field(&r.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBlackouts => {
                let blackouts = engine.list_blackouts().await;
                let schema = Arc::new(blackouts_schema());
                let rows: Vec<PgWireResult<_>> = blackouts
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.staff_id.map(|s| s.to_string()))?;
                        encoder.encode_field(&b.span.start.format("%Y-%m-%d %H:%M").to_string())?;
                        encoder.encode_field(&b.span.end.format("%Y-%m-%d %H:%M").to_string())?;
                        encoder.encode_field(&b.reason)?;
                        encoder.encode_field(&b.all_day)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectUnits => {
                let units = engine.list_units().await;
                let schema = Arc::new(units_schema());
                let rows: Vec<PgWireResult<_>> = units
                    .into_iter()
                    .map(|u| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&u.id.to_string())?;
                        encoder.encode_field(&u.type_id.to_string())?;
                        encoder.encode_field(&u.status.as_str())?;
                        encoder.encode_field(&u.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectPolicy => {
                let policy = engine.policy().await;
                let schema = Arc::new(policy_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&policy.slot_minutes)?;
                encoder.encode_field(&i64::from(policy.horizon_days))?;
                encoder.encode_field(&policy.deposit_cents)?;
                encoder.encode_field(&policy.deposit_hours)?;
                encoder.encode_field(&i64::from(policy.max_reprograms))?;
                encoder.encode_field(&policy.cutoff_hours)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Listen { channel } => {
                let client_id_str = channel.strip_prefix("client_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected client_{{id}})"),
                    )))
                })?;
                let _client_id = Ulid::from_string(client_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn updated(rows: usize) -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(rows))
}

fn deleted(rows: usize) -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(rows))
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a Ulid>) -> String {
    ids.map(|id| id.to_string()).collect::<Vec<_>>().join(";")
}

fn appointments_response(rows: Vec<Appointment>) -> PgWireResult<Response> {
    let schema = Arc::new(appointments_schema());
    let encoded: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.client_id.to_string())?;
            encoder.encode_field(&a.staff_id.to_string())?;
            encoder.encode_field(&a.date.to_string())?;
            encoder.encode_field(&a.start.format("%H:%M").to_string())?;
            encoder.encode_field(&a.end_at().format("%Y-%m-%d %H:%M").to_string())?;
            encoder.encode_field(&a.state.as_str())?;
            encoder.encode_field(&i64::from(a.reprogram_count))?;
            encoder
                .encode_field(&a.deposit_deadline.map(|d| d.format("%Y-%m-%d %H:%M").to_string()))?;
            let services: Vec<Ulid> = a.service_ids().collect();
            encoder.encode_field(&join_ids(services.iter()))?;
            encoder.encode_field(&a.total_price_cents())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(encoded))))
}

fn cancel_response(outcome: &CancelOutcome) -> PgWireResult<Response> {
    let schema = Arc::new(cancel_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&outcome.appointment.id.to_string())?;
    encoder.encode_field(&outcome.appointment.state.as_str())?;
    encoder.encode_field(&(outcome.offers.len() as i64))?;
    let recipients: Vec<Ulid> = outcome.offers.iter().map(|o| o.client_id).collect();
    encoder.encode_field(&join_ids(recipients.iter()))?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), text_field("staff_id"), text_field("start")]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("staff_id"),
        text_field("date"),
        text_field("start"),
        text_field("end"),
        text_field("status"),
        int_field("reprogram_count"),
        text_field("deposit_deadline"),
        text_field("services"),
        int_field("price_cents"),
    ]
}

fn offers_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("staff_id"),
        text_field("date"),
        text_field("start"),
        text_field("services"),
        text_field("source"),
        bool_field("claimed"),
    ]
}

fn waitlist_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("client_id"),
        text_field("service_id"),
        text_field("from_date"),
        text_field("to_date"),
        text_field("from_time"),
        text_field("to_time"),
        bool_field("active"),
        bool_field("notified"),
    ]
}

fn staff_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("name"), bool_field("active")]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("kind"),
        int_field("duration_min"),
        int_field("price_cents"),
        bool_field("active"),
    ]
}

fn rules_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("staff_id"),
        int_field("weekday"),
        text_field("start"),
        text_field("end"),
        text_field("valid_from"),
        text_field("valid_to"),
        bool_field("color_design"),
        bool_field("complement"),
        bool_field("active"),
    ]
}

fn blackouts_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("staff_id"),
        text_field("start"),
        text_field("end"),
        text_field("reason"),
        bool_field("all_day"),
    ]
}

fn units_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("type_id"),
        text_field("status"),
        bool_field("active"),
    ]
}

fn policy_schema() -> Vec<FieldInfo> {
    vec![
        int_field("slot_minutes"),
        int_field("horizon_days"),
        int_field("deposit_cents"),
        int_field("deposit_hours"),
        int_field("max_reprograms"),
        int_field("cutoff_hours"),
    ]
}

fn cancel_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("status"),
        int_field("offers_sent"),
        text_field("recipients"),
    ]
}

#[async_trait]
impl SimpleQueryHandler for AgendoHandler {
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
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgendoQueryParser;

#[async_trait]
impl QueryParser for AgendoQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

/// Best-effort schema guess for Describe on the extended protocol.
fn statement_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else if upper.contains("OFFERS") {
        offers_schema()
    } else if upper.contains("WAITLIST") {
        waitlist_schema()
    } else if upper.contains("POLICY") {
        policy_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgendoHandler {
    type Statement = String;
    type QueryParser = AgendoQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            statement_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AgendoFactory {
    handler: Arc<AgendoHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AgendoAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgendoFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AgendoAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AgendoHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgendoFactory {
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

/// Run one pgwire connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(AgendoFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
