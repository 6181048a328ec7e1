use crate::model::{ScheduleEntry, Weekday};
use anyhow::{anyhow, Context};
use rusqlite::Connection;

/// In-memory copy of the schedule grid, in insertion order.
///
/// The daemon holds exactly one book per open workspace and hands it to
/// placement operations by `&mut`, which is what serializes the
/// read-check-write sequence of each operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleBook {
    entries: Vec<ScheduleEntry>,
}

impl ScheduleBook {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        ScheduleBook { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, entry_id: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    pub fn push(&mut self, entry: ScheduleEntry) {
        self.entries.push(entry);
    }

    /// Swaps in `entry` at the position of the entry with the same id and
    /// returns the old value.
    pub fn replace(&mut self, entry: ScheduleEntry) -> Option<ScheduleEntry> {
        let slot = self.entries.iter_mut().find(|e| e.id == entry.id)?;
        Some(std::mem::replace(slot, entry))
    }

    pub fn remove(&mut self, entry_id: &str) -> Option<(usize, ScheduleEntry)> {
        let idx = self.entries.iter().position(|e| e.id == entry_id)?;
        Some((idx, self.entries.remove(idx)))
    }

    pub fn insert_at(&mut self, idx: usize, entry: ScheduleEntry) {
        let idx = idx.min(self.entries.len());
        self.entries.insert(idx, entry);
    }

    pub fn replace_all(&mut self, entries: Vec<ScheduleEntry>) -> Vec<ScheduleEntry> {
        std::mem::replace(&mut self.entries, entries)
    }
}

/// Write side of the schedule collection.
pub trait ScheduleStore {
    fn insert(&self, entry: &ScheduleEntry) -> anyhow::Result<()>;
    fn replace(&self, entry: &ScheduleEntry) -> anyhow::Result<()>;
    fn delete(&self, entry_id: &str) -> anyhow::Result<()>;
    /// Drops every stored entry and writes `entries` in order, atomically.
    fn replace_all(&self, entries: &[ScheduleEntry]) -> anyhow::Result<()>;
}

pub struct SqliteScheduleStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteScheduleStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteScheduleStore { conn }
    }
}

fn insert_row(conn: &Connection, entry: &ScheduleEntry) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO schedules(id, class_id, subject_id, teacher_id, room_id, day, time_slot_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &entry.id,
            &entry.class_id,
            &entry.subject_id,
            &entry.teacher_id,
            &entry.room_id,
            entry.day.as_str(),
            &entry.time_slot_id,
        ),
    )
}

impl ScheduleStore for SqliteScheduleStore<'_> {
    fn insert(&self, entry: &ScheduleEntry) -> anyhow::Result<()> {
        insert_row(self.conn, entry)
            .with_context(|| format!("failed to insert schedule entry {}", entry.id))?;
        Ok(())
    }

    fn replace(&self, entry: &ScheduleEntry) -> anyhow::Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE schedules SET
                   class_id = ?, subject_id = ?, teacher_id = ?, room_id = ?, day = ?, time_slot_id = ?
                 WHERE id = ?",
                (
                    &entry.class_id,
                    &entry.subject_id,
                    &entry.teacher_id,
                    &entry.room_id,
                    entry.day.as_str(),
                    &entry.time_slot_id,
                    &entry.id,
                ),
            )
            .with_context(|| format!("failed to update schedule entry {}", entry.id))?;
        if changed == 0 {
            return Err(anyhow!("schedule entry {} is missing from the workspace", entry.id));
        }
        Ok(())
    }

    fn delete(&self, entry_id: &str) -> anyhow::Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM schedules WHERE id = ?", [entry_id])
            .with_context(|| format!("failed to delete schedule entry {}", entry_id))?;
        if changed == 0 {
            return Err(anyhow!("schedule entry {} is missing from the workspace", entry_id));
        }
        Ok(())
    }

    fn replace_all(&self, entries: &[ScheduleEntry]) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM schedules", [])
            .context("failed to clear schedules")?;
        for entry in entries {
            insert_row(&tx, entry)
                .with_context(|| format!("failed to insert schedule entry {}", entry.id))?;
        }
        tx.commit().context("failed to commit schedule replacement")?;
        Ok(())
    }
}

pub fn load_entries(conn: &Connection) -> anyhow::Result<Vec<ScheduleEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, subject_id, teacher_id, room_id, day, time_slot_id
         FROM schedules
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, class_id, subject_id, teacher_id, room_id, day, time_slot_id) in rows {
        let day = Weekday::parse(&day)
            .ok_or_else(|| anyhow!("schedule entry {} has an unknown day: {}", id, day))?;
        out.push(ScheduleEntry {
            id,
            class_id,
            subject_id,
            teacher_id,
            room_id,
            day,
            time_slot_id,
        });
    }
    Ok(out)
}
