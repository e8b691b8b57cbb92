use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::ledger::{Money, MAX_MONEY};
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db(code: &'static str, e: impl std::fmt::Display) -> Self {
        Self::new(code, e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<crate::ledger::LedgerError> for HandlerErr {
    fn from(e: crate::ledger::LedgerError) -> Self {
        let code = match e.code.as_str() {
            "not_found" => "not_found",
            _ => "invalid_amount",
        };
        Self::new(code, e.message)
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Amounts travel as JSON integers; fractional or non-numeric values are
/// rejected rather than rounded. The sign is left to the ledger, which
/// reports non-positive payments as `invalid_amount`.
pub fn get_required_money(params: &serde_json::Value, key: &str) -> Result<Money, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let n = v
        .as_i64()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a whole amount", key)))?;
    if !(-MAX_MONEY..=MAX_MONEY).contains(&n) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be within -{}..={}",
            key, MAX_MONEY, MAX_MONEY
        )));
    }
    Ok(n)
}

/// Balances and totals: a whole amount in `0..=MAX_MONEY`.
pub fn get_required_balance(params: &serde_json::Value, key: &str) -> Result<Money, HandlerErr> {
    let n = get_required_money(params, key)?;
    if n < 0 {
        return Err(HandlerErr::bad_params(format!("{} must not be negative", key)));
    }
    Ok(n)
}

pub fn field_errors(errors: &[crate::schedule::FieldError]) -> HandlerErr {
    let first = errors
        .first()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "invalid input".to_string());
    HandlerErr::new("validation_failed", first).with_details(json!({ "fields": errors }))
}

/// Runs `f` against the workspace connection and wraps the outcome in the
/// response envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    match f(conn, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
