use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::placement_options;
use crate::ipc::types::{AppState, Request};
use crate::master;
use crate::model::{
    normalize_time_range, Class, EntityKind, MasterData, Room, Subject, Teacher, TimeSlot,
};
use crate::screen::audit;
use crate::store::{self, ScheduleBook};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy)]
enum Collection {
    Teachers,
    Subjects,
    Classes,
    Rooms,
    TimeSlots,
}

impl Collection {
    fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "teachers" => Some(Self::Teachers),
            "subjects" => Some(Self::Subjects),
            "classes" => Some(Self::Classes),
            "rooms" => Some(Self::Rooms),
            "timeslots" => Some(Self::TimeSlots),
            _ => None,
        }
    }

    fn kind(self) -> EntityKind {
        match self {
            Self::Teachers => EntityKind::Teacher,
            Self::Subjects => EntityKind::Subject,
            Self::Classes => EntityKind::Class,
            Self::Rooms => EntityKind::Room,
            Self::TimeSlots => EntityKind::TimeSlot,
        }
    }

    fn list_key(self) -> &'static str {
        match self {
            Self::Teachers => "teachers",
            Self::Subjects => "subjects",
            Self::Classes => "classes",
            Self::Rooms => "rooms",
            Self::TimeSlots => "timeSlots",
        }
    }
}

fn list_json(conn: &Connection, collection: Collection) -> anyhow::Result<serde_json::Value> {
    Ok(match collection {
        Collection::Teachers => serde_json::to_value(master::load_teachers(conn)?)?,
        Collection::Subjects => serde_json::to_value(master::load_subjects(conn)?)?,
        Collection::Classes => serde_json::to_value(master::load_classes(conn)?)?,
        Collection::Rooms => serde_json::to_value(master::load_rooms(conn)?)?,
        Collection::TimeSlots => serde_json::to_value(master::load_time_slots(conn)?)?,
    })
}

fn keyed(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    out.insert(key.to_string(), value);
    serde_json::Value::Object(out)
}

fn handle_list(state: &mut AppState, req: &Request, collection: Collection) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, keyed(collection.list_key(), json!([])));
    };
    match list_json(conn, collection) {
        Ok(rows) => ok(&req.id, keyed(collection.list_key(), rows)),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn parse_record<T: DeserializeOwned>(req: &Request) -> Result<T, serde_json::Value> {
    let Some(raw) = req.params.get("record") else {
        return Err(err(&req.id, "bad_params", "missing record", None));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid record: {}", e), None))
}

fn assign_id(id: &mut String) {
    let trimmed = id.trim();
    *id = if trimmed.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        trimmed.to_string()
    };
}

fn required_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    Ok(name.to_string())
}

fn check_refs(
    ids: &BTreeSet<String>,
    kind: EntityKind,
    md: &MasterData,
) -> Result<(), String> {
    match ids.iter().find(|id| !md.contains(kind, id)) {
        Some(missing) => Err(format!("unknown {} id: {}", kind, missing)),
        None => Ok(()),
    }
}

fn prepare_teacher(mut t: Teacher, md: &MasterData) -> Result<Teacher, String> {
    assign_id(&mut t.id);
    t.name = required_name(&t.name)?;
    check_refs(&t.subject_ids, EntityKind::Subject, md)?;
    check_refs(&t.class_ids, EntityKind::Class, md)?;
    check_refs(&t.available_time_slot_ids, EntityKind::TimeSlot, md)?;
    Ok(t)
}

fn prepare_subject(mut s: Subject) -> Result<Subject, String> {
    assign_id(&mut s.id);
    s.name = required_name(&s.name)?;
    s.level_target = s.level_target.trim().to_string();
    if s.required_sessions_per_week > 60 {
        return Err("requiredSessionsPerWeek must be in 0..=60".into());
    }
    Ok(s)
}

fn prepare_class(mut c: Class, md: &MasterData) -> Result<Class, String> {
    assign_id(&mut c.id);
    c.name = required_name(&c.name)?;
    c.department = c.department.trim().to_string();
    c.level = c.level.trim().to_string();

    if !c.is_combined {
        c.combined_class_ids.clear();
        return Ok(c);
    }

    if let Some(parent) = md
        .classes
        .values()
        .find(|other| other.is_combined && other.combined_class_ids.contains(&c.id))
    {
        return Err(format!(
            "class is a member of combined class {} and cannot be combined itself",
            parent.name
        ));
    }

    let mut seen = HashSet::new();
    let mut members = Vec::with_capacity(c.combined_class_ids.len());
    for raw in &c.combined_class_ids {
        let member = raw.trim();
        if !seen.insert(member.to_string()) {
            continue;
        }
        if member == c.id {
            return Err("a combined class cannot contain itself".into());
        }
        let Some(found) = md.classes.get(member) else {
            return Err(format!("unknown class id: {}", member));
        };
        if found.is_combined {
            return Err(format!("member {} is itself a combined class", found.name));
        }
        members.push(member.to_string());
    }
    c.combined_class_ids = members;
    Ok(c)
}

fn prepare_room(mut r: Room) -> Result<Room, String> {
    assign_id(&mut r.id);
    r.name = required_name(&r.name)?;
    r.room_type = r.room_type.trim().to_string();
    Ok(r)
}

fn prepare_time_slot(mut ts: TimeSlot) -> Result<TimeSlot, String> {
    assign_id(&mut ts.id);
    let (start, end) = normalize_time_range(&ts.start_time, &ts.end_time)?;
    ts.start_time = start;
    ts.end_time = end;
    if matches!(ts.session_number, Some(n) if n < 1) {
        return Err("sessionNumber must be >= 1".into());
    }
    ts.label = ts
        .label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty());
    Ok(ts)
}

/// Entry ids that the grid would newly violate if `class` replaced its
/// current definition.
fn entries_broken_by(
    conn: &Connection,
    md: &MasterData,
    book: &ScheduleBook,
    class: &Class,
) -> anyhow::Result<Vec<String>> {
    let opts = placement_options(conn)?;
    let before: HashSet<String> = audit(book.entries(), md, opts)
        .into_iter()
        .filter_map(|r| r.proposal.id)
        .collect();
    let mut after = md.clone();
    after.classes.insert(class.id.clone(), class.clone());
    Ok(audit(book.entries(), &after, opts)
        .into_iter()
        .filter_map(|r| r.proposal.id)
        .filter(|id| !before.contains(id))
        .collect())
}

type Outcome = Result<serde_json::Value, serde_json::Value>;

fn save_failed(req: &Request, table: &str, e: anyhow::Error) -> serde_json::Value {
    err(
        &req.id,
        "db_insert_failed",
        format!("{e:#}"),
        Some(json!({ "table": table })),
    )
}

fn upsert_teacher(conn: &Connection, req: &Request, md: &MasterData) -> Outcome {
    let record: Teacher = parse_record(req)?;
    let t = prepare_teacher(record, md).map_err(|m| err(&req.id, "bad_params", m, None))?;
    master::save_teacher(conn, &t).map_err(|e| save_failed(req, "teachers", e))?;
    Ok(json!(t))
}

fn upsert_subject(conn: &Connection, req: &Request) -> Outcome {
    let record: Subject = parse_record(req)?;
    let s = prepare_subject(record).map_err(|m| err(&req.id, "bad_params", m, None))?;
    master::save_subject(conn, &s).map_err(|e| save_failed(req, "subjects", e))?;
    Ok(json!(s))
}

fn upsert_class(conn: &Connection, req: &Request, md: &MasterData, book: &ScheduleBook) -> Outcome {
    let record: Class = parse_record(req)?;
    let c = prepare_class(record, md).map_err(|m| err(&req.id, "bad_params", m, None))?;

    if md.classes.contains_key(&c.id) {
        let broken = entries_broken_by(conn, md, book, &c)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        if !broken.is_empty() {
            return Err(err(
                &req.id,
                "would_conflict",
                "changing this class would double-book existing schedule entries",
                Some(json!({ "entryIds": broken })),
            ));
        }
    }

    master::save_class(conn, &c).map_err(|e| save_failed(req, "classes", e))?;
    Ok(json!(c))
}

fn upsert_room(conn: &Connection, req: &Request) -> Outcome {
    let record: Room = parse_record(req)?;
    let r = prepare_room(record).map_err(|m| err(&req.id, "bad_params", m, None))?;
    master::save_room(conn, &r).map_err(|e| save_failed(req, "rooms", e))?;
    Ok(json!(r))
}

fn upsert_time_slot(conn: &Connection, req: &Request, book: &ScheduleBook) -> Outcome {
    let record: TimeSlot = parse_record(req)?;
    let ts = prepare_time_slot(record).map_err(|m| err(&req.id, "bad_params", m, None))?;

    if ts.is_reserved() {
        let in_use = book
            .entries()
            .iter()
            .filter(|e| e.time_slot_id == ts.id)
            .count();
        if in_use > 0 {
            return Err(err(
                &req.id,
                "slot_in_use",
                "time slot still hosts class sessions and cannot be reserved",
                Some(json!({ "entryCount": in_use })),
            ));
        }
    }

    master::save_time_slot(conn, &ts).map_err(|e| save_failed(req, "time_slots", e))?;
    Ok(json!(ts))
}

fn refresh_book(conn: &Connection, book: &mut ScheduleBook) -> anyhow::Result<()> {
    let entries = store::load_entries(conn)?;
    *book = ScheduleBook::new(entries);
    Ok(())
}

fn handle_upsert(state: &mut AppState, req: &Request, collection: Collection) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let md = match master::load_master_data(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let outcome = match collection {
        Collection::Teachers => upsert_teacher(conn, req, &md),
        Collection::Subjects => upsert_subject(conn, req),
        Collection::Classes => upsert_class(conn, req, &md, &state.book),
        Collection::Rooms => upsert_room(conn, req),
        Collection::TimeSlots => upsert_time_slot(conn, req, &state.book),
    };
    let record = match outcome {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // A time slot's day is copied onto its entries.
    if matches!(collection, Collection::TimeSlots) {
        if let Err(e) = refresh_book(conn, &mut state.book) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    }

    info!(kind = %collection.kind(), id = record["id"].as_str().unwrap_or(""), "master record saved");
    ok(&req.id, json!({ "record": record }))
}

fn handle_delete(state: &mut AppState, req: &Request, collection: Collection) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = req.params.get("id").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let kind = collection.kind();
    match master::exists(conn, kind, id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", format!("{} not found", kind), None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let removed = match master::delete_entity(conn, kind, id) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", format!("{e:#}"), None),
    };
    if let Err(e) = refresh_book(conn, &mut state.book) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    info!(kind = %kind, id, removed_entries = removed, "master record deleted");
    ok(&req.id, json!({ "deleted": id, "removedEntries": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (prefix, action) = req.method.split_once('.')?;
    let collection = Collection::parse(prefix)?;
    match action {
        "list" => Some(handle_list(state, req, collection)),
        "upsert" => Some(handle_upsert(state, req, collection)),
        "delete" => Some(handle_delete(state, req, collection)),
        _ => None,
    }
}
