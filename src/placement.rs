use crate::conflict::{check_conflict, check_eligibility, check_slot, Conflict, ConflictResult};
use crate::model::{Class, EntityKind, MasterData, Room, ScheduleEntry, Subject, Teacher, TimeSlot};
use crate::store::{ScheduleBook, ScheduleStore};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("{}", .0.reason)]
    Conflict(Conflict),
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("failed to persist schedule change: {0:#}")]
    Persistence(anyhow::Error),
}

impl PlacementError {
    pub fn code(&self) -> &'static str {
        match self {
            PlacementError::Conflict(_) => "conflict",
            PlacementError::NotFound { .. } => "not_found",
            PlacementError::Persistence(_) => "db_write_failed",
        }
    }

    fn not_found(kind: EntityKind, id: &str) -> Self {
        Missing::new(kind, id).into()
    }
}

/// A reference that does not resolve against the master data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Missing {
    pub kind: EntityKind,
    pub id: String,
}

impl Missing {
    fn new(kind: EntityKind, id: &str) -> Self {
        Missing {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<Missing> for PlacementError {
    fn from(m: Missing) -> Self {
        PlacementError::NotFound {
            kind: m.kind,
            id: m.id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementOptions {
    /// Also require level match and teacher qualification/availability.
    pub enforce_eligibility: bool,
}

/// A cell assignment as requested by the grid editor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlacement {
    pub class_id: String,
    pub time_slot_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Unchanged(ScheduleEntry),
    Moved {
        previous: ScheduleEntry,
        entry: ScheduleEntry,
    },
}

impl MoveOutcome {
    pub fn entry(&self) -> &ScheduleEntry {
        match self {
            MoveOutcome::Unchanged(entry) => entry,
            MoveOutcome::Moved { entry, .. } => entry,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, MoveOutcome::Moved { .. })
    }

    pub fn previous(&self) -> Option<&ScheduleEntry> {
        match self {
            MoveOutcome::Unchanged(_) => None,
            MoveOutcome::Moved { previous, .. } => Some(previous),
        }
    }
}

/// The entities a placement refers to, looked up once per operation.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'m> {
    pub class: &'m Class,
    pub subject: &'m Subject,
    pub teacher: &'m Teacher,
    pub room: &'m Room,
    pub slot: &'m TimeSlot,
}

fn lookup<'m, T>(map: &'m HashMap<String, T>, kind: EntityKind, id: &str) -> Result<&'m T, Missing> {
    map.get(id).ok_or_else(|| Missing::new(kind, id))
}

pub fn resolve<'m>(
    master: &'m MasterData,
    class_id: &str,
    subject_id: &str,
    teacher_id: &str,
    room_id: &str,
    time_slot_id: &str,
) -> Result<Resolved<'m>, Missing> {
    Ok(Resolved {
        slot: lookup(&master.time_slots, EntityKind::TimeSlot, time_slot_id)?,
        class: lookup(&master.classes, EntityKind::Class, class_id)?,
        subject: lookup(&master.subjects, EntityKind::Subject, subject_id)?,
        teacher: lookup(&master.teachers, EntityKind::Teacher, teacher_id)?,
        room: lookup(&master.rooms, EntityKind::Room, room_id)?,
    })
}

/// Full rule set for one candidate: reserved slot, then eligibility (when
/// enabled), then double booking against `existing`.
pub fn evaluate(
    existing: &[ScheduleEntry],
    candidate: &ScheduleEntry,
    exclude_entry_id: Option<&str>,
    resolved: &Resolved<'_>,
    master: &MasterData,
    opts: PlacementOptions,
) -> ConflictResult {
    check_slot(resolved.slot)
        .or_else(|| {
            if opts.enforce_eligibility {
                check_eligibility(
                    resolved.class,
                    resolved.subject,
                    resolved.teacher,
                    &candidate.time_slot_id,
                )
            } else {
                ConflictResult::NoConflict
            }
        })
        .or_else(|| check_conflict(existing, candidate, exclude_entry_id, &master.classes))
}

fn candidate(id: String, placement: &NewPlacement, slot: &TimeSlot) -> ScheduleEntry {
    ScheduleEntry {
        id,
        class_id: placement.class_id.clone(),
        subject_id: placement.subject_id.clone(),
        teacher_id: placement.teacher_id.clone(),
        room_id: placement.room_id.clone(),
        day: slot.day,
        time_slot_id: slot.id.clone(),
    }
}

fn reject(conflict: Conflict, class_id: &str, time_slot_id: &str) -> PlacementError {
    info!(
        class_id,
        time_slot_id,
        reason = %conflict.reason,
        conflicting_entry_id = conflict.conflicting_entry_id.as_deref().unwrap_or(""),
        "placement rejected"
    );
    PlacementError::Conflict(conflict)
}

/// Dry run of a create (or, with `exclude_entry_id`, of a move) against the
/// current book. Nothing is written.
pub fn check_placement(
    book: &ScheduleBook,
    master: &MasterData,
    placement: &NewPlacement,
    exclude_entry_id: Option<&str>,
    opts: PlacementOptions,
) -> Result<ConflictResult, PlacementError> {
    let resolved = resolve(
        master,
        &placement.class_id,
        &placement.subject_id,
        &placement.teacher_id,
        &placement.room_id,
        &placement.time_slot_id,
    )?;
    let probe = candidate(
        exclude_entry_id.unwrap_or_default().to_string(),
        placement,
        resolved.slot,
    );
    Ok(evaluate(
        book.entries(),
        &probe,
        exclude_entry_id,
        &resolved,
        master,
        opts,
    ))
}

/// Booking rules alone (reserved slot and double booking) for a grid cell
/// whose subject has not been picked yet.
pub fn check_booking(
    book: &ScheduleBook,
    master: &MasterData,
    class_id: &str,
    time_slot_id: &str,
    teacher_id: &str,
    room_id: &str,
    exclude_entry_id: Option<&str>,
) -> Result<ConflictResult, PlacementError> {
    let slot = lookup(&master.time_slots, EntityKind::TimeSlot, time_slot_id)?;
    let class = lookup(&master.classes, EntityKind::Class, class_id)?;
    let teacher = lookup(&master.teachers, EntityKind::Teacher, teacher_id)?;
    let room = lookup(&master.rooms, EntityKind::Room, room_id)?;
    let probe = ScheduleEntry {
        id: exclude_entry_id.unwrap_or_default().to_string(),
        class_id: class.id.clone(),
        subject_id: String::new(),
        teacher_id: teacher.id.clone(),
        room_id: room.id.clone(),
        day: slot.day,
        time_slot_id: slot.id.clone(),
    };
    Ok(check_slot(slot)
        .or_else(|| check_conflict(book.entries(), &probe, exclude_entry_id, &master.classes)))
}

/// What the grid editor may offer for one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellOptions<'m> {
    /// Set when the cell itself cannot take a session: the slot is reserved
    /// or the class (or one of its members) is already booked there.
    pub blocked: Option<Conflict>,
    /// Subjects aimed at the class's level.
    pub subjects: Vec<&'m Subject>,
    /// Teachers free in the slot who may teach the class (and the subject,
    /// when one is given) at that time.
    pub teachers: Vec<&'m Teacher>,
    /// Rooms free in the slot.
    pub rooms: Vec<&'m Room>,
}

pub fn cell_options<'m>(
    book: &ScheduleBook,
    master: &'m MasterData,
    class_id: &str,
    time_slot_id: &str,
    subject_id: Option<&str>,
    exclude_entry_id: Option<&str>,
) -> Result<CellOptions<'m>, Missing> {
    let slot = lookup(&master.time_slots, EntityKind::TimeSlot, time_slot_id)?;
    let class = lookup(&master.classes, EntityKind::Class, class_id)?;
    let subject = subject_id
        .map(|id| lookup(&master.subjects, EntityKind::Subject, id))
        .transpose()?;

    // Blank teacher and room never match a stored entry, so only the
    // class rule can fire here.
    let probe = ScheduleEntry {
        id: exclude_entry_id.unwrap_or_default().to_string(),
        class_id: class.id.clone(),
        subject_id: String::new(),
        teacher_id: String::new(),
        room_id: String::new(),
        day: slot.day,
        time_slot_id: slot.id.clone(),
    };
    let blocked = check_slot(slot)
        .or_else(|| check_conflict(book.entries(), &probe, exclude_entry_id, &master.classes))
        .into_conflict();

    let in_slot: Vec<&ScheduleEntry> = book
        .entries()
        .iter()
        .filter(|e| e.time_slot_id == slot.id && Some(e.id.as_str()) != exclude_entry_id)
        .collect();

    let mut subjects: Vec<&Subject> = master
        .subjects
        .values()
        .filter(|s| s.level_target.trim() == class.level.trim())
        .collect();
    subjects.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    let mut teachers: Vec<&Teacher> = master
        .teachers
        .values()
        .filter(|t| !in_slot.iter().any(|e| e.teacher_id == t.id))
        .filter(|t| match subject {
            Some(s) => check_eligibility(class, s, t, &slot.id) == ConflictResult::NoConflict,
            None => t.class_ids.contains(&class.id) && t.available_time_slot_ids.contains(&slot.id),
        })
        .collect();
    teachers.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    let mut rooms: Vec<&Room> = master
        .rooms
        .values()
        .filter(|r| !in_slot.iter().any(|e| e.room_id == r.id))
        .collect();
    rooms.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));

    Ok(CellOptions {
        blocked,
        subjects,
        teachers,
        rooms,
    })
}

pub fn create_entry<S: ScheduleStore + ?Sized>(
    book: &mut ScheduleBook,
    master: &MasterData,
    store: &S,
    placement: &NewPlacement,
    opts: PlacementOptions,
) -> Result<ScheduleEntry, PlacementError> {
    let resolved = resolve(
        master,
        &placement.class_id,
        &placement.subject_id,
        &placement.teacher_id,
        &placement.room_id,
        &placement.time_slot_id,
    )?;
    let entry = candidate(uuid::Uuid::new_v4().to_string(), placement, resolved.slot);

    if let ConflictResult::Conflict(c) =
        evaluate(book.entries(), &entry, None, &resolved, master, opts)
    {
        return Err(reject(c, &entry.class_id, &entry.time_slot_id));
    }

    book.push(entry.clone());
    if let Err(e) = store.insert(&entry) {
        book.remove(&entry.id);
        warn!(entry_id = %entry.id, error = %format!("{:#}", e), "create rolled back");
        return Err(PlacementError::Persistence(e));
    }

    info!(
        entry_id = %entry.id,
        class_id = %entry.class_id,
        time_slot_id = %entry.time_slot_id,
        "schedule entry created"
    );
    Ok(entry)
}

/// Moves an entry to another (class, time slot) cell, keeping its subject,
/// teacher and room. The stored row is replaced as a whole.
pub fn move_entry<S: ScheduleStore + ?Sized>(
    book: &mut ScheduleBook,
    master: &MasterData,
    store: &S,
    entry_id: &str,
    class_id: &str,
    time_slot_id: &str,
    opts: PlacementOptions,
) -> Result<MoveOutcome, PlacementError> {
    let current = book
        .get(entry_id)
        .cloned()
        .ok_or_else(|| PlacementError::not_found(EntityKind::Entry, entry_id))?;
    if current.class_id == class_id && current.time_slot_id == time_slot_id {
        return Ok(MoveOutcome::Unchanged(current));
    }

    let resolved = resolve(
        master,
        class_id,
        &current.subject_id,
        &current.teacher_id,
        &current.room_id,
        time_slot_id,
    )?;
    let moved = ScheduleEntry {
        id: current.id.clone(),
        class_id: resolved.class.id.clone(),
        subject_id: current.subject_id.clone(),
        teacher_id: current.teacher_id.clone(),
        room_id: current.room_id.clone(),
        day: resolved.slot.day,
        time_slot_id: resolved.slot.id.clone(),
    };

    if let ConflictResult::Conflict(c) =
        evaluate(book.entries(), &moved, Some(entry_id), &resolved, master, opts)
    {
        return Err(reject(c, class_id, time_slot_id));
    }

    book.replace(moved.clone());
    if let Err(e) = store.replace(&moved) {
        book.replace(current);
        warn!(entry_id, error = %format!("{:#}", e), "move rolled back");
        return Err(PlacementError::Persistence(e));
    }

    info!(
        entry_id,
        from_slot = %current.time_slot_id,
        to_slot = %moved.time_slot_id,
        "schedule entry moved"
    );
    Ok(MoveOutcome::Moved {
        previous: current,
        entry: moved,
    })
}

pub fn delete_entry<S: ScheduleStore + ?Sized>(
    book: &mut ScheduleBook,
    store: &S,
    entry_id: &str,
) -> Result<ScheduleEntry, PlacementError> {
    let (idx, removed) = book
        .remove(entry_id)
        .ok_or_else(|| PlacementError::not_found(EntityKind::Entry, entry_id))?;
    if let Err(e) = store.delete(entry_id) {
        book.insert_at(idx, removed);
        warn!(entry_id, error = %format!("{:#}", e), "delete rolled back");
        return Err(PlacementError::Persistence(e));
    }
    info!(entry_id, "schedule entry deleted");
    Ok(removed)
}

/// Swaps the whole grid for `entries` (already screened by the caller).
/// Returns the previous entries.
pub fn replace_all<S: ScheduleStore + ?Sized>(
    book: &mut ScheduleBook,
    store: &S,
    entries: Vec<ScheduleEntry>,
) -> Result<Vec<ScheduleEntry>, PlacementError> {
    let previous = book.replace_all(entries);
    if let Err(e) = store.replace_all(book.entries()) {
        book.replace_all(previous);
        warn!(error = %format!("{:#}", e), "grid replacement rolled back");
        return Err(PlacementError::Persistence(e));
    }
    info!(
        previous = previous.len(),
        current = book.len(),
        "schedule grid replaced"
    );
    Ok(previous)
}
