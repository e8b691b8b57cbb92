use crate::ipc::error::{err, ok};
use crate::ipc::helpers::require_db;
use crate::ipc::types::{AppState, Request};
use crate::setup::{load_section, merge_section_patch, save_section, SetupSection};
use serde_json::{Map, Value};

/// Works without a workspace: the defaults are returned.
fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(state.db.as_ref(), section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(Some(conn), section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = save_section(conn, section, &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    ok(&req.id, serde_json::json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
