use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            required_sessions_per_week INTEGER NOT NULL DEFAULT 0,
            level_target TEXT NOT NULL DEFAULT '',
            subject_group TEXT NOT NULL DEFAULT 'general'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            department TEXT NOT NULL DEFAULT '',
            level TEXT NOT NULL DEFAULT '',
            is_combined INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_members(
            combined_class_id TEXT NOT NULL,
            member_class_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(combined_class_id, member_class_id),
            FOREIGN KEY(combined_class_id) REFERENCES classes(id),
            FOREIGN KEY(member_class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_members_member ON class_members(member_class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            room_type TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            day TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            session_number INTEGER,
            is_break INTEGER NOT NULL DEFAULT 0,
            label TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_classes(
            teacher_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, class_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_time_slots(
            teacher_id TEXT NOT NULL,
            time_slot_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, time_slot_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(time_slot_id) REFERENCES time_slots(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            day TEXT NOT NULL,
            time_slot_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(room_id) REFERENCES rooms(id),
            FOREIGN KEY(time_slot_id) REFERENCES time_slots(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_slot ON schedules(time_slot_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_class ON schedules(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_teacher ON schedules(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_room ON schedules(room_id)",
        [],
    )?;

    // Workspaces created before combined classes and reserved activity slots
    // existed lack these columns.
    ensure_classes_combined_columns(conn)?;
    ensure_time_slots_label(conn)?;
    ensure_subjects_targeting_columns(conn)?;
    migrate_day_names(conn)?;

    Ok(())
}

fn ensure_classes_combined_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "classes", "level")? {
        conn.execute(
            "ALTER TABLE classes ADD COLUMN level TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "classes", "is_combined")? {
        conn.execute(
            "ALTER TABLE classes ADD COLUMN is_combined INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn ensure_time_slots_label(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "time_slots", "label")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE time_slots ADD COLUMN label TEXT", [])?;
    Ok(())
}

fn ensure_subjects_targeting_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "subjects", "level_target")? {
        conn.execute(
            "ALTER TABLE subjects ADD COLUMN level_target TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }
    if !table_has_column(conn, "subjects", "subject_group")? {
        conn.execute(
            "ALTER TABLE subjects ADD COLUMN subject_group TEXT NOT NULL DEFAULT 'general'",
            [],
        )?;
    }
    Ok(())
}

fn migrate_day_names(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces stored Indonesian day names verbatim.
    for (old, new) in [
        ("Senin", "monday"),
        ("Selasa", "tuesday"),
        ("Rabu", "wednesday"),
        ("Kamis", "thursday"),
        ("Jumat", "friday"),
        ("Sabtu", "saturday"),
    ] {
        conn.execute("UPDATE time_slots SET day = ? WHERE day = ?", (new, old))?;
        conn.execute("UPDATE schedules SET day = ? WHERE day = ?", (new, old))?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
