use crate::db;
use crate::ipc::error::ok;
use crate::ipc::handlers::fees::{load_schedule, schedule_id_for_installment};
use crate::ipc::helpers::{
    get_optional_str, get_required_balance, get_required_money, get_required_str, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{
    apply_payment, current_year, generate_receipt_number, sequence_receipt_number,
    uuid_receipt_number, validate_payment_amount, Granularity, ReceiptStrategy,
};
use crate::setup::{payment_settings, PaymentSettings};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

const RECEIPT_COUNTER: &str = "receipts";
const PAYMENT_METHODS: [&str; 4] = ["cash", "mobileMoney", "bankTransfer", "check"];

/// With no workspace there is no single writer to own a sequence, so
/// `sequence` degrades to the time+random form.
fn next_receipt_number(conn: Option<&Connection>, settings: &PaymentSettings) -> anyhow::Result<String> {
    let prefix = settings.receipt_prefix.as_str();
    Ok(match (settings.receipt_strategy, conn) {
        (ReceiptStrategy::Sequence, Some(conn)) => {
            let seq = db::counter_next(conn, RECEIPT_COUNTER)?;
            sequence_receipt_number(prefix, current_year(), seq)
        }
        (ReceiptStrategy::Uuid, _) => uuid_receipt_number(prefix),
        (ReceiptStrategy::TimeRandom, _) | (ReceiptStrategy::Sequence, None) => {
            generate_receipt_number(prefix)
        }
    })
}

fn parse_granularity(params: &Value) -> Result<Granularity, HandlerErr> {
    match params.get("granularity").and_then(|v| v.as_str()) {
        None | Some("installment") => Ok(Granularity::Installment),
        Some("schedule") => Ok(Granularity::Schedule),
        Some(_) => Err(HandlerErr::bad_params(
            "granularity must be one of: installment, schedule",
        )),
    }
}

fn validate_amount_op(params: &Value) -> Result<Value, HandlerErr> {
    let payment = get_required_money(params, "payment")?;
    let remaining = get_required_balance(params, "remaining")?;
    let check = validate_payment_amount(payment, remaining);
    serde_json::to_value(check).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn apply_payment_op(params: &Value) -> Result<Value, HandlerErr> {
    let paid_so_far = get_required_balance(params, "paidSoFar")?;
    let total = get_required_balance(params, "total")?;
    let payment = get_required_balance(params, "payment")?;
    let granularity = parse_granularity(params)?;
    Ok(apply_payment(paid_so_far, total, payment).to_json(granularity))
}

fn receipt_number_op(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = state.db.as_ref();
    let settings = payment_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let receipt =
        next_receipt_number(conn, &settings).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(json!({
        "receiptNumber": receipt,
        "strategy": settings.receipt_strategy.as_str(),
    }))
}

/// Validates against the installment's remaining balance, then writes the
/// new paid amount, the payment row and the receipt number in one
/// transaction. Schedule totals are re-derived from the installments.
fn payments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let installment_id = get_required_str(params, "installmentId")?;
    let amount = get_required_money(params, "amount")?;
    let method = get_optional_str(params, "method").unwrap_or_else(|| "cash".to_string());
    if !PAYMENT_METHODS.contains(&method.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "method must be one of: {}",
            PAYMENT_METHODS.join(", ")
        )));
    }
    let settings = payment_settings(Some(conn)).map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let schedule_id = schedule_id_for_installment(&tx, &installment_id)?;
    let mut schedule = load_schedule(&tx, &schedule_id)?;
    let update = schedule.record_payment(&installment_id, amount)?;

    tx.execute(
        "UPDATE installments SET paid_amount = ? WHERE id = ?",
        (update.new_paid, &installment_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    let receipt_number =
        next_receipt_number(Some(&*tx), &settings).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let payment_id = Uuid::new_v4().to_string();
    let paid_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO payments(id, schedule_id, installment_id, amount, method, receipt_number, paid_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            payment_id,
            schedule_id,
            installment_id,
            amount,
            method,
            receipt_number,
            paid_at
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "payments" })))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let totals = schedule.totals();
    tracing::info!(
        receipt = %receipt_number,
        schedule = %schedule_id,
        amount,
        paid = totals.paid,
        remaining = totals.remaining,
        "payment recorded"
    );

    Ok(json!({
        "payment": {
            "id": payment_id,
            "scheduleId": schedule_id,
            "installmentId": installment_id,
            "amount": amount,
            "currency": settings.currency,
            "method": method,
            "receiptNumber": receipt_number,
            "paidAt": paid_at,
        },
        "balance": update.to_json(Granularity::Installment),
        "installment": schedule.installment(&installment_id),
        "schedule": schedule,
    }))
}

fn payments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    // Surfaces not_found for an unknown schedule.
    load_schedule(conn, &schedule_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, installment_id, amount, method, receipt_number, paid_at
             FROM payments
             WHERE schedule_id = ?
             ORDER BY paid_at, rowid",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let payments = stmt
        .query_map([&schedule_id], |r| {
            let id: String = r.get(0)?;
            let installment_id: String = r.get(1)?;
            let amount: i64 = r.get(2)?;
            let method: String = r.get(3)?;
            let receipt_number: String = r.get(4)?;
            let paid_at: String = r.get(5)?;
            Ok(json!({
                "id": id,
                "installmentId": installment_id,
                "amount": amount,
                "method": method,
                "receiptNumber": receipt_number,
                "paidAt": paid_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "payments": payments }))
}

fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "payments.validateAmount" => Some(respond(req, validate_amount_op(&req.params))),
        "payments.applyPayment" => Some(respond(req, apply_payment_op(&req.params))),
        "payments.receiptNumber" => Some(respond(req, receipt_number_op(state))),
        "payments.record" => Some(with_db(state, req, payments_record)),
        "payments.list" => Some(with_db(state, req, payments_list)),
        _ => None,
    }
}
