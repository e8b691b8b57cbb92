use crate::db::AssignmentStore;
use crate::ipc::helpers::{field_errors, get_required_str, require_db, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    check_assignment, day_name, find_conflicts, validate_assignment, AssignmentDraft,
    AssignmentRepository, ConflictReport, ConflictScan, CourseAssignment,
};
use crate::setup::scheduling_settings;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_draft(v: &Value, what: &str) -> Result<AssignmentDraft, HandlerErr> {
    serde_json::from_value(v.clone())
        .map_err(|e| HandlerErr::bad_params(format!("{}: {}", what, e)))
}

fn settings_for(conn: Option<&Connection>) -> Result<crate::setup::SchedulingSettings, HandlerErr> {
    scheduling_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn scan_override(params: &Value, fallback: ConflictScan) -> Result<ConflictScan, HandlerErr> {
    match params.get("scan").and_then(|v| v.as_str()) {
        Some(raw) => ConflictScan::parse(raw)
            .ok_or_else(|| HandlerErr::bad_params("scan must be one of: all, firstMatch")),
        None => Ok(fallback),
    }
}

fn conflict_error(conflicts: &[ConflictReport]) -> HandlerErr {
    let message = conflicts
        .first()
        .map(|c| c.message.clone())
        .unwrap_or_else(|| "schedule conflict".to_string());
    HandlerErr::new("schedule_conflict", message).with_details(json!({ "conflicts": conflicts }))
}

/// Stateless when `existing` is supplied; otherwise compares against the
/// workspace's assignments for the candidate's school year.
fn find_conflicts_op(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw_candidate) = params.get("candidate") else {
        return Err(HandlerErr::bad_params("missing candidate"));
    };
    let candidate = validate_assignment(&parse_draft(raw_candidate, "candidate")?, None)
        .map_err(|errors| field_errors(&errors))?;
    let settings = settings_for(state.db.as_ref())?;
    let scan = scan_override(params, settings.conflict_scan)?;

    let conflicts = match params.get("existing") {
        Some(Value::Array(items)) => {
            let mut existing = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                let what = format!("existing[{}]", idx);
                let a = validate_assignment(&parse_draft(item, &what)?, None).map_err(|errors| {
                    HandlerErr::bad_params(format!(
                        "{}: {}",
                        what,
                        errors.first().map(|e| e.message.as_str()).unwrap_or("invalid")
                    ))
                })?;
                existing.push(a);
            }
            find_conflicts(&candidate, &existing, scan)
        }
        Some(_) => return Err(HandlerErr::bad_params("existing must be an array")),
        None => {
            let conn = require_db(state)?;
            check_assignment(&AssignmentStore::new(conn), &candidate, scan)
                .map_err(|e| HandlerErr::db("db_query_failed", e))?
        }
    };

    Ok(json!({
        "hasConflicts": !conflicts.is_empty(),
        "conflicts": conflicts,
    }))
}

fn assignments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let school_year = get_required_str(params, "schoolYear")?;
    let assignments = AssignmentStore::new(conn)
        .list_assignments(&school_year)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "assignments": assignments }))
}

fn validated_for_write(
    conn: &Connection,
    draft: &AssignmentDraft,
    params: &Value,
) -> Result<CourseAssignment, HandlerErr> {
    let settings = settings_for(Some(conn))?;
    let candidate = validate_assignment(draft, Some(settings.max_course_minutes))
        .map_err(|errors| field_errors(&errors))?;
    let scan = scan_override(params, settings.conflict_scan)?;
    let conflicts = check_assignment(&AssignmentStore::new(conn), &candidate, scan)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if !conflicts.is_empty() {
        tracing::warn!(
            teacher = %candidate.teacher_id,
            class = %candidate.class_id,
            day = day_name(candidate.slot.day),
            count = conflicts.len(),
            "assignment rejected: schedule conflict"
        );
        return Err(conflict_error(&conflicts));
    }
    Ok(candidate)
}

fn assignments_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let mut draft = parse_draft(params, "assignment")?;
    draft.id = Some(Uuid::new_v4().to_string());
    let assignment = validated_for_write(conn, &draft, params)?;

    AssignmentStore::new(conn)
        .insert(&assignment)
        .map_err(|e| HandlerErr::db("db_insert_failed", e))?;
    tracing::info!(id = %assignment.id, school_year = %assignment.school_year, "assignment created");
    Ok(json!({ "assignment": assignment }))
}

fn draft_from(a: &CourseAssignment) -> AssignmentDraft {
    AssignmentDraft {
        id: Some(a.id.clone()),
        school_year: Some(a.school_year.clone()),
        subject_id: Some(a.subject_id.clone()),
        teacher_id: Some(a.teacher_id.clone()),
        class_id: Some(a.class_id.clone()),
        room_id: a.room_id.clone(),
        day: Some(day_name(a.slot.day).to_string()),
        start_time: Some(a.slot.start.format("%H:%M").to_string()),
        end_time: Some(a.slot.end.format("%H:%M").to_string()),
    }
}

/// Fields missing from `params` keep their stored value; the result is
/// re-validated as if it were new, with its own id excluded.
fn assignments_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let store = AssignmentStore::new(conn);
    let Some(current) = store
        .get(&assignment_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
    else {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    };

    let patch = parse_draft(params, "assignment")?;
    let base = draft_from(&current);
    let draft = AssignmentDraft {
        id: base.id,
        school_year: patch.school_year.or(base.school_year),
        subject_id: patch.subject_id.or(base.subject_id),
        teacher_id: patch.teacher_id.or(base.teacher_id),
        class_id: patch.class_id.or(base.class_id),
        // An explicit null clears the room; an absent key keeps it.
        room_id: match params.get("roomId") {
            Some(Value::Null) => None,
            _ => patch.room_id.or(base.room_id),
        },
        day: patch.day.or(base.day),
        start_time: patch.start_time.or(base.start_time),
        end_time: patch.end_time.or(base.end_time),
    };
    let assignment = validated_for_write(conn, &draft, params)?;

    store
        .update(&assignment)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(id = %assignment.id, "assignment updated");
    Ok(json!({ "assignment": assignment }))
}

fn assignments_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let removed = AssignmentStore::new(conn)
        .delete(&assignment_id)
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if !removed {
        return Err(HandlerErr::new("not_found", "assignment not found"));
    }
    tracing::info!(id = %assignment_id, "assignment deleted");
    Ok(json!({ "ok": true }))
}

fn handle_find_conflicts(state: &mut AppState, req: &Request) -> Value {
    match find_conflicts_op(state, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "schedule.findConflicts" => Some(handle_find_conflicts(state, req)),
        "assignments.list" => Some(with_db(state, req, assignments_list)),
        "assignments.create" => Some(with_db(state, req, assignments_create)),
        "assignments.update" => Some(with_db(state, req, assignments_update)),
        "assignments.delete" => Some(with_db(state, req, assignments_delete)),
        _ => None,
    }
}
