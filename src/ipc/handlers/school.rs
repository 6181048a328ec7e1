use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::SchoolInfo;
use serde_json::{json, Map, Value};

const SCHOOL_KEY: &str = "school.info";

pub fn load_school_info(conn: &rusqlite::Connection) -> anyhow::Result<SchoolInfo> {
    match db::settings_get_json(conn, SCHOOL_KEY)? {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(SchoolInfo::default()),
    }
}

fn text_field(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn apply_patch(info: &mut SchoolInfo, patch: &Map<String, Value>) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "academicYear" => info.academic_year = text_field(v, k, 16)?,
            "semester" => info.semester = text_field(v, k, 16)?,
            "schoolName" => info.school_name = text_field(v, k, 200)?,
            "headmasterName" => info.headmaster_name = text_field(v, k, 200)?,
            "address" => info.address = text_field(v, k, 500)?,
            "logoUrl" => {
                let url = text_field(v, k, 2000)?;
                if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err("logoUrl must be an http(s) URL".into());
                }
                info.logo_url = url;
            }
            _ => return Err(format!("unknown school field: {}", k)),
        }
    }
    Ok(())
}

fn handle_school_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match load_school_info(conn) {
        Ok(info) => ok(&req.id, json!({ "school": info })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_school_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut info = match load_school_info(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = apply_patch(&mut info, patch) {
        return err(&req.id, "bad_params", msg, None);
    }
    let value = match serde_json::to_value(&info) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if let Err(e) = db::settings_set_json(conn, SCHOOL_KEY, &value) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "school": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.get" => Some(handle_school_get(state, req)),
        "school.update" => Some(handle_school_update(state, req)),
        _ => None,
    }
}
