use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertStaff { id: Ulid, name: String },
    DeleteStaff { id: Ulid },
    InsertService {
        id: Ulid,
        name: String,
        kind: ServiceKind,
        duration_min: Option<Minutes>,
        price_cents: i64,
    },
    DeleteService { id: Ulid },
    InsertResourceType { id: Ulid, name: String },
    DeleteResourceType { id: Ulid },
    InsertUnit { id: Ulid, type_id: Ulid, status: UnitStatus },
    UpdateUnitStatus { id: Ulid, status: UnitStatus },
    DeleteUnit { id: Ulid },
    InsertNeed {
        id: Ulid,
        service_id: Ulid,
        type_id: Ulid,
        required: bool,
        units: u32,
    },
    DeleteNeed { id: Ulid },
    InsertRule { rule: WeeklyRule },
    DeleteRule { id: Ulid },
    InsertBlackout {
        id: Ulid,
        staff_id: Option<Ulid>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        reason: String,
        all_day: bool,
    },
    DeleteBlackout { id: Ulid },
    UpdatePolicy { patch: PolicyPatch },
    InsertAppointment {
        id: Ulid,
        client_id: Ulid,
        staff_id: Option<Ulid>,
        date: NaiveDate,
        start: NaiveTime,
        service_ids: Vec<Ulid>,
    },
    ApproveAppointment { id: Ulid },
    ConfirmDeposit { id: Ulid },
    ReprogramAppointment {
        id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        actor: Actor,
    },
    CancelAppointment {
        id: Ulid,
        actor: Actor,
        reason: Option<String>,
    },
    CompleteAppointment { id: Ulid },
    MarkNoShow { id: Ulid },
    InsertWaitlist {
        id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        from_date: NaiveDate,
        to_date: NaiveDate,
        from_time: Option<NaiveTime>,
        to_time: Option<NaiveTime>,
    },
    DeleteWaitlist { id: Ulid },
    AcceptOffer { id: Ulid, client_id: Ulid },
    SelectAvailability {
        service_id: Ulid,
        from_date: Option<NaiveDate>,
    },
    SelectAppointments {
        client_id: Option<Ulid>,
        status: Option<AppointmentState>,
        date: Option<NaiveDate>,
    },
    SelectOffers { client_id: Option<Ulid> },
    SelectWaitlist,
    SelectStaff,
    SelectServices,
    SelectRules,
    SelectBlackouts,
    SelectUnits,
    SelectPolicy,
    Listen { channel: String },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let arg = |i: usize| -> Result<&Expr, SqlError> {
        values.get(i).ok_or(SqlError::WrongArity(
            "insert",
            i + 1,
            values.len(),
        ))
    };

    match table.as_str() {
        "staff" => Ok(Command::InsertStaff {
            id: parse_ulid(arg(0)?)?,
            name: parse_string(arg(1)?)?,
        }),
        "services" => Ok(Command::InsertService {
            id: parse_ulid(arg(0)?)?,
            name: parse_string(arg(1)?)?,
            kind: parse_service_kind(arg(2)?)?,
            duration_min: parse_i64_or_null(arg(3)?)?,
            price_cents: parse_i64(arg(4)?)?,
        }),
        "resource_types" => Ok(Command::InsertResourceType {
            id: parse_ulid(arg(0)?)?,
            name: parse_string(arg(1)?)?,
        }),
        "resource_units" => {
            let status = if values.len() >= 3 {
                parse_unit_status(&values[2])?
            } else {
                UnitStatus::Available
            };
            Ok(Command::InsertUnit {
                id: parse_ulid(arg(0)?)?,
                type_id: parse_ulid(arg(1)?)?,
                status,
            })
        }
        "service_needs" => Ok(Command::InsertNeed {
            id: parse_ulid(arg(0)?)?,
            service_id: parse_ulid(arg(1)?)?,
            type_id: parse_ulid(arg(2)?)?,
            required: parse_bool(arg(3)?)?,
            units: parse_u32(arg(4)?)?,
        }),
        "rules" => {
            // (id, staff_id, weekday, start, end[, valid_from, valid_to,
            //  color_design, complement])
            let valid_from = if values.len() >= 6 { parse_date_or_null(&values[5])? } else { None };
            let valid_to = if values.len() >= 7 { parse_date_or_null(&values[6])? } else { None };
            let color_design = if values.len() >= 8 { parse_bool(&values[7])? } else { true };
            let complement = if values.len() >= 9 { parse_bool(&values[8])? } else { true };
            Ok(Command::InsertRule {
                rule: WeeklyRule {
                    id: parse_ulid(arg(0)?)?,
                    staff_id: parse_ulid_or_null(arg(1)?)?,
                    weekday: parse_u8(arg(2)?)?,
                    start: parse_time(arg(3)?)?,
                    end: parse_time(arg(4)?)?,
                    valid_from,
                    valid_to,
                    color_design,
                    complement,
                    active: true,
                },
            })
        }
        "blackouts" => {
            let reason = if values.len() >= 5 { parse_string(&values[4])? } else { String::new() };
            let all_day = if values.len() >= 6 { parse_bool(&values[5])? } else { false };
            Ok(Command::InsertBlackout {
                id: parse_ulid(arg(0)?)?,
                staff_id: parse_ulid_or_null(arg(1)?)?,
                start: parse_datetime(arg(2)?)?,
                end: parse_datetime(arg(3)?)?,
                reason,
                all_day,
            })
        }
        "appointments" => Ok(Command::InsertAppointment {
            id: parse_ulid(arg(0)?)?,
            client_id: parse_ulid(arg(1)?)?,
            staff_id: parse_ulid_or_null(arg(2)?)?,
            date: parse_date(arg(3)?)?,
            start: parse_time(arg(4)?)?,
            service_ids: parse_ulid_list(arg(5)?)?,
        }),
        "waitlist" => {
            let from_time = if values.len() >= 6 { parse_time_or_null(&values[5])? } else { None };
            let to_time = if values.len() >= 7 { parse_time_or_null(&values[6])? } else { None };
            Ok(Command::InsertWaitlist {
                id: parse_ulid(arg(0)?)?,
                client_id: parse_ulid(arg(1)?)?,
                service_id: parse_ulid(arg(2)?)?,
                from_date: parse_date(arg(3)?)?,
                to_date: parse_date(arg(4)?)?,
                from_time,
                to_time,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "staff" => Ok(Command::DeleteStaff { id }),
        "services" => Ok(Command::DeleteService { id }),
        "resource_types" => Ok(Command::DeleteResourceType { id }),
        "resource_units" => Ok(Command::DeleteUnit { id }),
        "service_needs" => Ok(Command::DeleteNeed { id }),
        "rules" => Ok(Command::DeleteRule { id }),
        "blackouts" => Ok(Command::DeleteBlackout { id }),
        "waitlist" => Ok(Command::DeleteWaitlist { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;

    // column → value expression
    let mut set: Vec<(String, &Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let col = assignment_column(&assignment.target)?;
        set.push((col, &assignment.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "policy" => {
            let patch = PolicyPatch {
                slot_minutes: get("slot_minutes").map(parse_i64).transpose()?,
                horizon_days: get("horizon_days").map(parse_u32).transpose()?,
                deposit_cents: get("deposit_cents").map(parse_i64).transpose()?,
                deposit_hours: get("deposit_hours").map(parse_i64).transpose()?,
                max_reprograms: get("max_reprograms").map(parse_u32).transpose()?,
                cutoff_hours: get("cutoff_hours").map(parse_i64).transpose()?,
            };
            Ok(Command::UpdatePolicy { patch })
        }
        "resource_units" => {
            let id = extract_where_id(selection)?;
            let status = get("status").ok_or(SqlError::MissingFilter("status"))?;
            Ok(Command::UpdateUnitStatus { id, status: parse_unit_status(status)? })
        }
        "offers" => {
            let id = extract_where_id(selection)?;
            match get("status").map(parse_string).transpose()?.as_deref() {
                Some("accepted") => {}
                other => {
                    return Err(SqlError::Unsupported(format!(
                        "offer status {other:?}; only 'accepted' is valid"
                    )));
                }
            }
            let client_id = get("client_id").ok_or(SqlError::MissingFilter("client_id"))?;
            Ok(Command::AcceptOffer { id, client_id: parse_ulid(client_id)? })
        }
        "appointments" => {
            let id = extract_where_id(selection)?;
            let actor = match get("actor") {
                Some(expr) => parse_actor(expr)?,
                None => Actor::Staff,
            };
            if let Some(status) = get("status") {
                let status = parse_string(status)?;
                return match status.as_str() {
                    "approved" | "awaiting_deposit" => Ok(Command::ApproveAppointment { id }),
                    "confirmed" => Ok(Command::ConfirmDeposit { id }),
                    "completed" => Ok(Command::CompleteAppointment { id }),
                    "no_show" => Ok(Command::MarkNoShow { id }),
                    "cancelled" => Ok(Command::CancelAppointment {
                        id,
                        actor,
                        reason: get("reason").map(parse_string).transpose()?,
                    }),
                    other => Err(SqlError::Unsupported(format!("status transition '{other}'"))),
                };
            }
            let date = get("date").ok_or(SqlError::MissingFilter("date"))?;
            let start = get("start").ok_or(SqlError::MissingFilter("start"))?;
            Ok(Command::ReprogramAppointment {
                id,
                date: parse_date(date)?,
                start: parse_time(start)?,
                actor,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "availability" => {
            let mut service_id = None;
            let mut from_date = None;
            if let Some(selection) = &select.selection {
                walk_filters(selection, &mut |col, op, value| {
                    match (col, op) {
                        ("service_id", FilterOp::Eq) => service_id = Some(parse_ulid(value)?),
                        ("date", FilterOp::GtEq) | ("date", FilterOp::Eq) => {
                            from_date = Some(parse_date(value)?)
                        }
                        _ => {}
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectAvailability {
                service_id: service_id.ok_or(SqlError::MissingFilter("service_id"))?,
                from_date,
            })
        }
        "appointments" => {
            let mut client_id = None;
            let mut status = None;
            let mut date = None;
            if let Some(selection) = &select.selection {
                walk_filters(selection, &mut |col, op, value| {
                    if op == FilterOp::Eq {
                        match col {
                            "client_id" => client_id = Some(parse_ulid(value)?),
                            "status" => status = Some(parse_state(value)?),
                            "date" => date = Some(parse_date(value)?),
                            _ => {}
                        }
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectAppointments { client_id, status, date })
        }
        "offers" => {
            let mut client_id = None;
            if let Some(selection) = &select.selection {
                walk_filters(selection, &mut |col, op, value| {
                    if col == "client_id" && op == FilterOp::Eq {
                        client_id = Some(parse_ulid(value)?);
                    }
                    Ok(())
                })?;
            }
            Ok(Command::SelectOffers { client_id })
        }
        "waitlist" => Ok(Command::SelectWaitlist),
        "staff" => Ok(Command::SelectStaff),
        "services" => Ok(Command::SelectServices),
        "rules" => Ok(Command::SelectRules),
        "blackouts" => Ok(Command::SelectBlackouts),
        "resource_units" => Ok(Command::SelectUnits),
        "policy" => Ok(Command::SelectPolicy),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
}

fn walk_filters(
    expr: &Expr,
    f: &mut impl FnMut(&str, FilterOp, &Expr) -> Result<(), SqlError>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                walk_filters(left, f)?;
                walk_filters(right, f)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    f(&col, FilterOp::Eq, right)?;
                }
            }
            ast::BinaryOperator::GtEq => {
                if let Some(col) = expr_column_name(left) {
                    f(&col, FilterOp::GtEq, right)?;
                }
            }
            _ => {}
        }
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn assignment_column(target: &ast::AssignmentTarget) -> Result<String, SqlError> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

/// `;`-separated ULID list inside one string literal.
fn parse_ulid_list(expr: &Expr) -> Result<Vec<Ulid>, SqlError> {
    let raw = parse_string(expr)?;
    raw.split(';')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        })
        .collect()
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time '{s}': {e}")))
}

fn parse_time_or_null(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_time(expr).map(Some)
}

fn parse_datetime(expr: &Expr) -> Result<NaiveDateTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad timestamp '{s}': {e}")))
}

fn parse_service_kind(expr: &Expr) -> Result<ServiceKind, SqlError> {
    match parse_string(expr)?.as_str() {
        "color_design" => Ok(ServiceKind::ColorDesign),
        "complement" => Ok(ServiceKind::Complement),
        other => Err(SqlError::Parse(format!("unknown service kind '{other}'"))),
    }
}

fn parse_unit_status(expr: &Expr) -> Result<UnitStatus, SqlError> {
    match parse_string(expr)?.as_str() {
        "available" => Ok(UnitStatus::Available),
        "in_use" => Ok(UnitStatus::InUse),
        "maintenance" => Ok(UnitStatus::Maintenance),
        "retired" => Ok(UnitStatus::Retired),
        other => Err(SqlError::Parse(format!("unknown unit status '{other}'"))),
    }
}

fn parse_state(expr: &Expr) -> Result<AppointmentState, SqlError> {
    match parse_string(expr)?.as_str() {
        "requested" => Ok(AppointmentState::Requested),
        "awaiting_deposit" => Ok(AppointmentState::AwaitingDeposit),
        "confirmed" => Ok(AppointmentState::Confirmed),
        "completed" => Ok(AppointmentState::Completed),
        "cancelled" => Ok(AppointmentState::Cancelled),
        "no_show" => Ok(AppointmentState::NoShow),
        other => Err(SqlError::Parse(format!("unknown state '{other}'"))),
    }
}

fn parse_actor(expr: &Expr) -> Result<Actor, SqlError> {
    match parse_string(expr)?.as_str() {
        "client" => Ok(Actor::Client),
        "staff" => Ok(Actor::Staff),
        other => Err(SqlError::Parse(format!("unknown actor '{other}'"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
