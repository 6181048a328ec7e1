use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::placement::PlacementOptions;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Placement,
    Generation,
    Grid,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Placement, Self::Generation, Self::Grid];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "placement" => Some(Self::Placement),
            "generation" => Some(Self::Generation),
            "grid" => Some(Self::Grid),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Placement => "placement",
            Self::Generation => "generation",
            Self::Grid => "grid",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Placement => "setup.placement",
            Self::Generation => "setup.generation",
            Self::Grid => "setup.grid",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Placement => json!({
            "enforceEligibility": false
        }),
        SetupSection::Generation => json!({
            "maxEntries": 5000,
            "excludeReservedSlots": true
        }),
        SetupSection::Grid => json!({
            "showEmptyDays": false,
            "defaultFilter": "class"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Placement => match k.as_str() {
                "enforceEligibility" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown placement field: {}", k)),
            },
            SetupSection::Generation => match k.as_str() {
                "maxEntries" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20_000)?));
                }
                "excludeReservedSlots" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown generation field: {}", k)),
            },
            SetupSection::Grid => match k.as_str() {
                "showEmptyDays" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultFilter" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if GridFilterKind::parse(&s).is_none() {
                        return Err("defaultFilter must be one of: class, teacher, room".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown grid field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Field by field, so one malformed saved value only resets itself.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFilterKind {
    Class,
    Teacher,
    Room,
}

impl GridFilterKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "teacher" => Some(Self::Teacher),
            "room" => Some(Self::Room),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSettings {
    pub max_entries: usize,
    pub exclude_reserved_slots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSettings {
    pub show_empty_days: bool,
    pub default_filter: GridFilterKind,
}

pub fn placement_options(conn: &rusqlite::Connection) -> anyhow::Result<PlacementOptions> {
    let v = load_section(conn, SetupSection::Placement)?;
    Ok(PlacementOptions {
        enforce_eligibility: v["enforceEligibility"].as_bool().unwrap_or(false),
    })
}

pub fn generation_settings(conn: &rusqlite::Connection) -> anyhow::Result<GenerationSettings> {
    let v = load_section(conn, SetupSection::Generation)?;
    Ok(GenerationSettings {
        max_entries: v["maxEntries"]
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(5000),
        exclude_reserved_slots: v["excludeReservedSlots"].as_bool().unwrap_or(true),
    })
}

pub fn grid_settings(conn: &rusqlite::Connection) -> anyhow::Result<GridSettings> {
    let v = load_section(conn, SetupSection::Grid)?;
    Ok(GridSettings {
        show_empty_days: v["showEmptyDays"].as_bool().unwrap_or(false),
        default_filter: v["defaultFilter"]
            .as_str()
            .and_then(GridFilterKind::parse)
            .unwrap_or(GridFilterKind::Class),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
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

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "section": section.name(), "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
