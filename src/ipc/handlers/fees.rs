use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Installment, Money, PaymentSchedule, MAX_MONEY};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn load_schedule(conn: &Connection, schedule_id: &str) -> Result<PaymentSchedule, HandlerErr> {
    let head: Option<(String, String, String)> = conn
        .query_row(
            "SELECT student_id, fee_type, school_year FROM fee_schedules WHERE id = ?",
            [schedule_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((student_id, fee_type, school_year)) = head else {
        return Err(HandlerErr::new("not_found", "fee schedule not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, label, due_date, amount, paid_amount
             FROM installments
             WHERE schedule_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let installments = stmt
        .query_map([schedule_id], |r| {
            let due: Option<String> = r.get(2)?;
            Ok(Installment {
                id: r.get(0)?,
                label: r.get(1)?,
                due_date: due.as_deref().and_then(parse_due_date),
                amount: r.get(3)?,
                paid: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(PaymentSchedule {
        id: schedule_id.to_string(),
        student_id,
        fee_type,
        school_year,
        installments,
    })
}

pub fn schedule_id_for_installment(
    conn: &Connection,
    installment_id: &str,
) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT schedule_id FROM installments WHERE id = ?",
        [installment_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(|e| HandlerErr::db("db_query_failed", e))?
    .ok_or_else(|| HandlerErr::new("not_found", "installment not found"))
}

fn parse_installments(params: &Value) -> Result<Vec<Installment>, HandlerErr> {
    let Some(items) = params.get("installments").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("installments must be an array"));
    };
    if items.is_empty() {
        return Err(HandlerErr::bad_params("at least one installment is required"));
    }

    let mut fields = Vec::new();
    let mut out = Vec::with_capacity(items.len());
    let mut total: Option<Money> = Some(0);
    for (idx, item) in items.iter().enumerate() {
        let amount: Option<Money> = item.get("amount").and_then(|v| v.as_i64());
        match amount {
            Some(a) if a > 0 && a <= MAX_MONEY => {
                total = total.and_then(|t| t.checked_add(a));
            }
            Some(a) if a > MAX_MONEY => fields.push(json!({
                "field": format!("installments[{}].amount", idx),
                "message": format!("amount must not exceed {}", MAX_MONEY),
            })),
            _ => fields.push(json!({
                "field": format!("installments[{}].amount", idx),
                "message": "amount must be a whole number greater than 0",
            })),
        }
        let due_date = match item.get("dueDate").and_then(|v| v.as_str()) {
            Some(raw) if !raw.trim().is_empty() => {
                let parsed = parse_due_date(raw);
                if parsed.is_none() {
                    fields.push(json!({
                        "field": format!("installments[{}].dueDate", idx),
                        "message": "dueDate must be YYYY-MM-DD",
                    }));
                }
                parsed
            }
            _ => None,
        };
        let label = item
            .get("label")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Installment {}", idx + 1));
        out.push(Installment {
            id: Uuid::new_v4().to_string(),
            label,
            due_date,
            amount: amount.unwrap_or_default(),
            paid: 0,
        });
    }

    if fields.is_empty() && !total.is_some_and(|t| t <= MAX_MONEY) {
        fields.push(json!({
            "field": "installments",
            "message": format!("schedule total must not exceed {}", MAX_MONEY),
        }));
    }
    if let Some(first) = fields.first() {
        let message = first["message"].as_str().unwrap_or("invalid installment").to_string();
        return Err(HandlerErr::new("validation_failed", message)
            .with_details(json!({ "fields": fields })));
    }
    // Due dates, when given, must not go backwards.
    let dated: Vec<NaiveDate> = out.iter().filter_map(|i| i.due_date).collect();
    if dated.windows(2).any(|w| w[1] < w[0]) {
        return Err(HandlerErr::new(
            "validation_failed",
            "installment due dates must be in order",
        ));
    }
    Ok(out)
}

fn fee_schedules_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let fee_type = get_required_str(params, "feeType")?;
    let school_year = get_required_str(params, "schoolYear")?;
    let installments = parse_installments(params)?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM fee_schedules WHERE student_id = ? AND fee_type = ? AND school_year = ?",
            (&student_id, &fee_type, &school_year),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if exists.is_some() {
        return Err(HandlerErr::new(
            "already_exists",
            "a fee schedule already exists for this student, fee type and school year",
        ));
    }

    let schedule = PaymentSchedule {
        id: Uuid::new_v4().to_string(),
        student_id,
        fee_type,
        school_year,
        installments,
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO fee_schedules(id, student_id, fee_type, school_year, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &schedule.id,
            &schedule.student_id,
            &schedule.fee_type,
            &schedule.school_year,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "fee_schedules" }))
    })?;
    for (idx, inst) in schedule.installments.iter().enumerate() {
        tx.execute(
            "INSERT INTO installments(id, schedule_id, sort_order, label, due_date, amount, paid_amount)
             VALUES(?, ?, ?, ?, ?, ?, 0)",
            rusqlite::params![
                inst.id,
                schedule.id,
                idx as i64,
                inst.label,
                inst.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
                inst.amount,
            ],
        )
        .map_err(|e| {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "installments" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(
        id = %schedule.id,
        student = %schedule.student_id,
        total = schedule.totals().total,
        "fee schedule created"
    );
    Ok(json!({ "schedule": schedule }))
}

fn fee_schedules_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let schedule = load_schedule(conn, &schedule_id)?;
    Ok(json!({ "schedule": schedule }))
}

fn fee_schedules_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let school_year = get_optional_str(params, "schoolYear");

    let mut stmt = conn
        .prepare(
            "SELECT id FROM fee_schedules
             WHERE (?1 IS NULL OR student_id = ?1)
               AND (?2 IS NULL OR school_year = ?2)
             ORDER BY school_year, student_id, fee_type",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let ids = stmt
        .query_map((&student_id, &school_year), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let schedules = ids
        .iter()
        .map(|id| load_schedule(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "schedules": schedules }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "feeSchedules.create" => Some(with_db(state, req, fee_schedules_create)),
        "feeSchedules.get" => Some(with_db(state, req, fee_schedules_get)),
        "feeSchedules.list" => Some(with_db(state, req, fee_schedules_list)),
        _ => None,
    }
}
