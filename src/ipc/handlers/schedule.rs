use crate::conflict::Conflict;
use crate::expand::expand_all;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::school::load_school_info;
use crate::ipc::handlers::setup::{
    generation_settings, grid_settings, placement_options, GridFilterKind,
};
use crate::ipc::types::{AppState, Request};
use crate::master;
use crate::model::{MasterData, ProposedEntry, ScheduleEntry, Weekday};
use crate::placement::{self, NewPlacement, PlacementError, PlacementOptions};
use crate::screen::{audit, screen};
use crate::store::SqliteScheduleStore;
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn conflict_json(c: &Conflict) -> serde_json::Value {
    json!({
        "reason": c.reason,
        "message": c.reason.message(),
        "conflictingEntryId": c.conflicting_entry_id,
    })
}

fn placement_err(req: &Request, e: PlacementError) -> serde_json::Value {
    let details = match &e {
        PlacementError::Conflict(c) => conflict_json(c),
        PlacementError::NotFound { kind, id } => json!({ "kind": kind.as_str(), "id": id }),
        PlacementError::Persistence(_) => json!({ "retryable": true }),
    };
    err(&req.id, e.code(), e.to_string(), Some(details))
}

fn str_param<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

fn param_or(req: &Request, key: &str, fallback: Option<&str>) -> Option<String> {
    str_param(req, key)
        .map(str::to_string)
        .or_else(|| fallback.map(str::to_string))
}

/// Master data plus the workspace's placement options, read fresh for each
/// operation.
fn snapshot(conn: &Connection) -> anyhow::Result<(MasterData, PlacementOptions)> {
    Ok((master::load_master_data(conn)?, placement_options(conn)?))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return ok(&req.id, json!({ "entries": [] }));
    }
    let filter = req.params.get("filter");
    let wanted = |key: &str| filter.and_then(|f| f.get(key)).and_then(|v| v.as_str());
    let (class_id, teacher_id, room_id) = (wanted("classId"), wanted("teacherId"), wanted("roomId"));

    let entries: Vec<&ScheduleEntry> = state
        .book
        .entries()
        .iter()
        .filter(|e| class_id.map_or(true, |id| e.class_id == id))
        .filter(|e| teacher_id.map_or(true, |id| e.teacher_id == id))
        .filter(|e| room_id.map_or(true, |id| e.room_id == id))
        .collect();
    ok(&req.id, json!({ "entries": entries }))
}

fn handle_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let settings = match grid_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let md = match master::load_master_data(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let filter = req.params.get("filter");
    let kind = match filter.and_then(|f| f.get("kind")).and_then(|v| v.as_str()) {
        Some(raw) => match GridFilterKind::parse(raw) {
            Some(k) => k,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "filter.kind must be one of: class, teacher, room",
                    None,
                )
            }
        },
        None => settings.default_filter,
    };
    let filter_id = filter.and_then(|f| f.get("id")).and_then(|v| v.as_str());

    let rows: Vec<serde_json::Value> = expand_all(state.book.entries(), &md.classes)
        .into_iter()
        .filter(|o| match (kind, filter_id) {
            (_, None) => true,
            (GridFilterKind::Class, Some(id)) => o.class_id == id,
            (GridFilterKind::Teacher, Some(id)) => o.entry.teacher_id == id,
            (GridFilterKind::Room, Some(id)) => o.entry.room_id == id,
        })
        .map(|o| {
            json!({
                "entryId": o.entry.id,
                "effectiveClassId": o.class_id,
                "originalClassId": o.entry.class_id,
                "viaCombined": o.via_combined(),
                "subjectId": o.entry.subject_id,
                "teacherId": o.entry.teacher_id,
                "roomId": o.entry.room_id,
                "day": o.entry.day,
                "timeSlotId": o.entry.time_slot_id,
            })
        })
        .collect();

    let mut slots: Vec<_> = md.time_slots.values().cloned().collect();
    master::sort_time_slots(&mut slots);
    let days: Vec<serde_json::Value> = Weekday::ALL
        .iter()
        .filter_map(|day| {
            let day_slots: Vec<_> = slots.iter().filter(|s| s.day == *day).collect();
            if day_slots.is_empty() && !settings.show_empty_days {
                return None;
            }
            Some(json!({ "day": day, "timeSlots": day_slots }))
        })
        .collect();

    let mut columns: Vec<_> = md.classes.values().filter(|c| !c.is_combined).collect();
    columns.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    let columns: Vec<serde_json::Value> = columns
        .into_iter()
        .map(|c| json!({ "id": c.id, "name": c.name }))
        .collect();

    let kind_name = match kind {
        GridFilterKind::Class => "class",
        GridFilterKind::Teacher => "teacher",
        GridFilterKind::Room => "room",
    };
    ok(
        &req.id,
        json!({
            "filter": { "kind": kind_name, "id": filter_id },
            "days": days,
            "columns": columns,
            "rows": rows,
        }),
    )
}

fn handle_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let exclude = str_param(req, "excludeEntryId");
    let existing = match exclude {
        Some(id) => match state.book.get(id) {
            Some(e) => Some(e),
            None => return err(&req.id, "not_found", format!("schedule entry not found: {}", id), None),
        },
        None => None,
    };

    // When probing a move, unspecified fields come from the entry being moved.
    let (Some(class_id), Some(time_slot_id), Some(teacher_id), Some(room_id)) = (
        param_or(req, "classId", existing.map(|e| e.class_id.as_str())),
        param_or(req, "timeSlotId", existing.map(|e| e.time_slot_id.as_str())),
        param_or(req, "teacherId", existing.map(|e| e.teacher_id.as_str())),
        param_or(req, "roomId", existing.map(|e| e.room_id.as_str())),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "classId, timeSlotId, teacherId and roomId are required",
            None,
        );
    };
    let subject_id = param_or(req, "subjectId", existing.map(|e| e.subject_id.as_str()));

    let (md, opts) = match snapshot(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let checked = match subject_id {
        Some(subject_id) => {
            let placement = NewPlacement {
                class_id,
                time_slot_id,
                subject_id,
                teacher_id,
                room_id,
            };
            placement::check_placement(&state.book, &md, &placement, exclude, opts)
        }
        None if opts.enforce_eligibility => {
            return err(
                &req.id,
                "bad_params",
                "subjectId is required while eligibility is enforced",
                None,
            )
        }
        None => placement::check_booking(
            &state.book,
            &md,
            &class_id,
            &time_slot_id,
            &teacher_id,
            &room_id,
            exclude,
        ),
    };
    match checked {
        Ok(result) => ok(
            &req.id,
            json!({ "conflict": result.into_conflict().as_ref().map(conflict_json) }),
        ),
        Err(e) => placement_err(req, e),
    }
}

fn handle_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(class_id), Some(time_slot_id)) = (str_param(req, "classId"), str_param(req, "timeSlotId"))
    else {
        return err(&req.id, "bad_params", "classId and timeSlotId are required", None);
    };
    let exclude = str_param(req, "excludeEntryId");
    if let Some(id) = exclude {
        if state.book.get(id).is_none() {
            return err(&req.id, "not_found", format!("schedule entry not found: {}", id), None);
        }
    }
    let md = match master::load_master_data(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match placement::cell_options(
        &state.book,
        &md,
        class_id,
        time_slot_id,
        str_param(req, "subjectId"),
        exclude,
    ) {
        Ok(options) => ok(
            &req.id,
            json!({
                "blocked": options.blocked.as_ref().map(conflict_json),
                "subjects": options.subjects,
                "teachers": options.teachers,
                "rooms": options.rooms,
            }),
        ),
        Err(missing) => placement_err(req, missing.into()),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let placement: NewPlacement = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    let (md, opts) = match snapshot(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let store = SqliteScheduleStore::new(conn);
    match placement::create_entry(&mut state.book, &md, &store, &placement, opts) {
        Ok(entry) => ok(&req.id, json!({ "entry": entry })),
        Err(e) => placement_err(req, e),
    }
}

fn handle_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(entry_id), Some(class_id), Some(time_slot_id)) = (
        str_param(req, "entryId"),
        str_param(req, "classId"),
        str_param(req, "timeSlotId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "entryId, classId and timeSlotId are required",
            None,
        );
    };
    let (md, opts) = match snapshot(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let store = SqliteScheduleStore::new(conn);
    match placement::move_entry(
        &mut state.book,
        &md,
        &store,
        entry_id,
        class_id,
        time_slot_id,
        opts,
    ) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "entry": outcome.entry(),
                "changed": outcome.changed(),
                "previous": outcome.previous(),
            }),
        ),
        Err(e) => placement_err(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(entry_id) = str_param(req, "entryId") else {
        return err(&req.id, "bad_params", "missing entryId", None);
    };
    let store = SqliteScheduleStore::new(conn);
    match placement::delete_entry(&mut state.book, &store, entry_id) {
        Ok(removed) => ok(&req.id, json!({ "deleted": removed.id })),
        Err(e) => placement_err(req, e),
    }
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let store = SqliteScheduleStore::new(conn);
    match placement::replace_all(&mut state.book, &store, Vec::new()) {
        Ok(previous) => ok(&req.id, json!({ "removed": previous.len() })),
        Err(e) => placement_err(req, e),
    }
}

fn handle_import_generated(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "entries must be an array", None);
    };
    let dry_run = req
        .params
        .get("dryRun")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let limits = match generation_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if raw.len() > limits.max_entries {
        return err(
            &req.id,
            "bad_params",
            format!("at most {} entries per import", limits.max_entries),
            Some(json!({ "count": raw.len(), "maxEntries": limits.max_entries })),
        );
    }

    let mut proposals: Vec<ProposedEntry> = Vec::with_capacity(raw.len());
    for (i, item) in raw.iter().enumerate() {
        match serde_json::from_value(item.clone()) {
            Ok(p) => proposals.push(p),
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("entries[{}]: {}", i, e),
                    Some(json!({ "index": i })),
                )
            }
        }
    }

    let (md, opts) = match snapshot(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let screening = screen(proposals, &md, opts);
    let rejected: Vec<serde_json::Value> = screening.rejected.iter().map(|r| r.to_json()).collect();
    let accepted = screening.accepted.len();

    if dry_run {
        return ok(
            &req.id,
            json!({ "dryRun": true, "accepted": accepted, "rejected": rejected }),
        );
    }

    let store = SqliteScheduleStore::new(conn);
    match placement::replace_all(&mut state.book, &store, screening.accepted) {
        Ok(previous) => {
            info!(
                submitted = raw.len(),
                accepted,
                rejected = rejected.len(),
                replaced = previous.len(),
                "generated schedule imported"
            );
            ok(
                &req.id,
                json!({
                    "dryRun": false,
                    "accepted": accepted,
                    "rejected": rejected,
                    "replaced": previous.len(),
                }),
            )
        }
        Err(e) => placement_err(req, e),
    }
}

fn handle_audit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.book.is_empty() {
        return ok(&req.id, json!({ "entryCount": 0, "violations": [] }));
    }
    let (md, opts) = match snapshot(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let violations: Vec<serde_json::Value> = audit(state.book.entries(), &md, opts)
        .iter()
        .map(|r| r.to_json())
        .collect();
    ok(
        &req.id,
        json!({ "entryCount": state.book.len(), "violations": violations }),
    )
}

fn handle_generator_input(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let limits = match generation_settings(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let payload = (|| -> anyhow::Result<serde_json::Value> {
        let mut time_slots = master::load_time_slots(conn)?;
        if limits.exclude_reserved_slots {
            time_slots.retain(|s| !s.is_reserved());
        }
        Ok(json!({
            "teachers": master::load_teachers(conn)?,
            "subjects": master::load_subjects(conn)?,
            "classes": master::load_classes(conn)?,
            "rooms": master::load_rooms(conn)?,
            "timeSlots": time_slots,
            "schoolInfo": load_school_info(conn)?,
        }))
    })();

    match payload {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.list" => Some(handle_list(state, req)),
        "schedule.grid" => Some(handle_grid(state, req)),
        "schedule.check" => Some(handle_check(state, req)),
        "schedule.options" => Some(handle_options(state, req)),
        "schedule.create" => Some(handle_create(state, req)),
        "schedule.move" => Some(handle_move(state, req)),
        "schedule.delete" => Some(handle_delete(state, req)),
        "schedule.clear" => Some(handle_clear(state, req)),
        "schedule.importGenerated" => Some(handle_import_generated(state, req)),
        "schedule.audit" => Some(handle_audit(state, req)),
        "schedule.generatorInput" => Some(handle_generator_input(state, req)),
        _ => None,
    }
}
