use crate::model::{
    Class, EntityKind, MasterData, Room, Subject, SubjectGroup, Teacher, TimeSlot, Weekday,
};
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};

pub fn load_master_data(conn: &Connection) -> anyhow::Result<MasterData> {
    Ok(MasterData::from_parts(
        load_teachers(conn)?,
        load_subjects(conn)?,
        load_classes(conn)?,
        load_rooms(conn)?,
        load_time_slots(conn)?,
    ))
}

fn load_links(conn: &Connection, sql: &str) -> anyhow::Result<HashMap<String, BTreeSet<String>>> {
    let mut stmt = conn.prepare(sql)?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (owner, target) in pairs {
        out.entry(owner).or_default().insert(target);
    }
    Ok(out)
}

pub fn load_teachers(conn: &Connection) -> anyhow::Result<Vec<Teacher>> {
    let mut subjects = load_links(conn, "SELECT teacher_id, subject_id FROM teacher_subjects")?;
    let mut classes = load_links(conn, "SELECT teacher_id, class_id FROM teacher_classes")?;
    let mut slots = load_links(conn, "SELECT teacher_id, time_slot_id FROM teacher_time_slots")?;

    let mut stmt = conn.prepare("SELECT id, name FROM teachers ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| Teacher {
            subject_ids: subjects.remove(&id).unwrap_or_default(),
            class_ids: classes.remove(&id).unwrap_or_default(),
            available_time_slot_ids: slots.remove(&id).unwrap_or_default(),
            id,
            name,
        })
        .collect())
}

pub fn load_subjects(conn: &Connection) -> anyhow::Result<Vec<Subject>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, required_sessions_per_week, level_target, subject_group
         FROM subjects
         ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, name, sessions, level_target, group)| {
            let group = SubjectGroup::parse(&group)
                .ok_or_else(|| anyhow!("subject {} has an unknown group: {}", id, group))?;
            Ok(Subject {
                id,
                name,
                required_sessions_per_week: u32::try_from(sessions.max(0)).unwrap_or(u32::MAX),
                level_target,
                group,
            })
        })
        .collect()
}

pub fn load_classes(conn: &Connection) -> anyhow::Result<Vec<Class>> {
    let mut members: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT combined_class_id, member_class_id
             FROM class_members
             ORDER BY combined_class_id, sort_order",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (combined, member) in pairs {
            members.entry(combined).or_default().push(member);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, department, level, is_combined FROM classes ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(id, name, department, level, is_combined)| Class {
            combined_class_ids: if is_combined != 0 {
                members.remove(&id).unwrap_or_default()
            } else {
                Vec::new()
            },
            is_combined: is_combined != 0,
            id,
            name,
            department,
            level,
        })
        .collect())
}

pub fn load_rooms(conn: &Connection) -> anyhow::Result<Vec<Room>> {
    let mut stmt = conn.prepare("SELECT id, name, room_type FROM rooms ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Room {
                id: row.get(0)?,
                name: row.get(1)?,
                room_type: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Ordered by day, then teaching slots by session number, then start time.
pub fn load_time_slots(conn: &Connection) -> anyhow::Result<Vec<TimeSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, day, start_time, end_time, session_number, is_break, label FROM time_slots",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, day, start_time, end_time, session_number, is_break, label) in rows {
        let day = Weekday::parse(&day)
            .ok_or_else(|| anyhow!("time slot {} has an unknown day: {}", id, day))?;
        out.push(TimeSlot {
            id,
            day,
            start_time,
            end_time,
            session_number,
            is_break: is_break != 0,
            label: label.filter(|l| !l.trim().is_empty()),
        });
    }
    sort_time_slots(&mut out);
    Ok(out)
}

pub fn sort_time_slots(slots: &mut [TimeSlot]) {
    slots.sort_by(|a, b| {
        a.day
            .cmp(&b.day)
            .then_with(|| match (a.session_number, b.session_number) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.start_time.cmp(&b.start_time))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn exists(conn: &Connection, kind: EntityKind, id: &str) -> anyhow::Result<bool> {
    let table = match kind {
        EntityKind::Teacher => "teachers",
        EntityKind::Subject => "subjects",
        EntityKind::Class => "classes",
        EntityKind::Room => "rooms",
        EntityKind::TimeSlot => "time_slots",
        EntityKind::Entry => "schedules",
    };
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn.query_row(&sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

pub fn save_teacher(conn: &Connection, t: &Teacher) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO teachers(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&t.id, &t.name),
    )
    .context("failed to write teachers")?;

    tx.execute("DELETE FROM teacher_subjects WHERE teacher_id = ?", [&t.id])?;
    tx.execute("DELETE FROM teacher_classes WHERE teacher_id = ?", [&t.id])?;
    tx.execute("DELETE FROM teacher_time_slots WHERE teacher_id = ?", [&t.id])?;
    for sid in &t.subject_ids {
        tx.execute(
            "INSERT INTO teacher_subjects(teacher_id, subject_id) VALUES(?, ?)",
            (&t.id, sid),
        )
        .context("failed to write teacher_subjects")?;
    }
    for cid in &t.class_ids {
        tx.execute(
            "INSERT INTO teacher_classes(teacher_id, class_id) VALUES(?, ?)",
            (&t.id, cid),
        )
        .context("failed to write teacher_classes")?;
    }
    for tsid in &t.available_time_slot_ids {
        tx.execute(
            "INSERT INTO teacher_time_slots(teacher_id, time_slot_id) VALUES(?, ?)",
            (&t.id, tsid),
        )
        .context("failed to write teacher_time_slots")?;
    }
    tx.commit()?;
    Ok(())
}

pub fn save_subject(conn: &Connection, s: &Subject) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO subjects(id, name, required_sessions_per_week, level_target, subject_group)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           required_sessions_per_week = excluded.required_sessions_per_week,
           level_target = excluded.level_target,
           subject_group = excluded.subject_group",
        (
            &s.id,
            &s.name,
            i64::from(s.required_sessions_per_week),
            &s.level_target,
            s.group.as_str(),
        ),
    )
    .context("failed to write subjects")?;
    Ok(())
}

pub fn save_class(conn: &Connection, c: &Class) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO classes(id, name, department, level, is_combined)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           department = excluded.department,
           level = excluded.level,
           is_combined = excluded.is_combined",
        (&c.id, &c.name, &c.department, &c.level, c.is_combined as i64),
    )
    .context("failed to write classes")?;
    tx.execute(
        "DELETE FROM class_members WHERE combined_class_id = ?",
        [&c.id],
    )?;
    for (i, member) in c.combined_class_ids.iter().enumerate() {
        tx.execute(
            "INSERT INTO class_members(combined_class_id, member_class_id, sort_order)
             VALUES(?, ?, ?)",
            (&c.id, member, i as i64),
        )
        .context("failed to write class_members")?;
    }
    tx.commit()?;
    Ok(())
}

pub fn save_room(conn: &Connection, r: &Room) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO rooms(id, name, room_type) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, room_type = excluded.room_type",
        (&r.id, &r.name, &r.room_type),
    )
    .context("failed to write rooms")?;
    Ok(())
}

/// Writes the slot and keeps the redundant `day` column of its schedule
/// entries in step.
pub fn save_time_slot(conn: &Connection, ts: &TimeSlot) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO time_slots(id, day, start_time, end_time, session_number, is_break, label)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           day = excluded.day,
           start_time = excluded.start_time,
           end_time = excluded.end_time,
           session_number = excluded.session_number,
           is_break = excluded.is_break,
           label = excluded.label",
        (
            &ts.id,
            ts.day.as_str(),
            &ts.start_time,
            &ts.end_time,
            ts.session_number,
            ts.is_break as i64,
            ts.label.as_deref(),
        ),
    )
    .context("failed to write time_slots")?;
    tx.execute(
        "UPDATE schedules SET day = ? WHERE time_slot_id = ?",
        (ts.day.as_str(), &ts.id),
    )
    .context("failed to sync schedules.day")?;
    tx.commit()?;
    Ok(())
}

/// Deletes a master-data record together with everything that references
/// it, in dependency order. Returns the number of schedule entries removed.
pub fn delete_entity(conn: &Connection, kind: EntityKind, id: &str) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let (schedule_column, link_sql, table): (&str, &[&str], &str) = match kind {
        EntityKind::Teacher => (
            "teacher_id",
            &[
                "DELETE FROM teacher_subjects WHERE teacher_id = ?",
                "DELETE FROM teacher_classes WHERE teacher_id = ?",
                "DELETE FROM teacher_time_slots WHERE teacher_id = ?",
            ],
            "teachers",
        ),
        EntityKind::Subject => (
            "subject_id",
            &["DELETE FROM teacher_subjects WHERE subject_id = ?"],
            "subjects",
        ),
        EntityKind::Class => (
            "class_id",
            &[
                "DELETE FROM teacher_classes WHERE class_id = ?",
                "DELETE FROM class_members WHERE member_class_id = ?",
                "DELETE FROM class_members WHERE combined_class_id = ?",
            ],
            "classes",
        ),
        EntityKind::Room => ("room_id", &[], "rooms"),
        EntityKind::TimeSlot => (
            "time_slot_id",
            &["DELETE FROM teacher_time_slots WHERE time_slot_id = ?"],
            "time_slots",
        ),
        EntityKind::Entry => return Err(anyhow!("schedule entries are removed via placement")),
    };

    let removed = tx
        .execute(
            &format!("DELETE FROM schedules WHERE {} = ?", schedule_column),
            [id],
        )
        .context("failed to delete dependent schedules")?;
    for sql in link_sql {
        tx.execute(sql, [id])
            .with_context(|| format!("failed to run: {}", sql))?;
    }
    let changed = tx
        .execute(&format!("DELETE FROM {} WHERE id = ?", table), [id])
        .with_context(|| format!("failed to delete from {}", table))?;
    if changed == 0 {
        return Err(anyhow!("{} not found: {}", kind, id));
    }
    tx.commit()?;
    Ok(removed)
}
