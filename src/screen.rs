use crate::conflict::{Conflict, ConflictResult};
use crate::model::{MasterData, ProposedEntry, ScheduleEntry};
use crate::placement::{evaluate, resolve, Missing, PlacementOptions};
use serde_json::json;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Conflict(Conflict),
    Unresolved(Missing),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Conflict(_) => "conflict",
            RejectReason::Unresolved(_) => "not_found",
        }
    }

    pub fn message(&self) -> String {
        match self {
            RejectReason::Conflict(c) => c.reason.to_string(),
            RejectReason::Unresolved(m) => format!("{} not found: {}", m.kind, m.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position in the submitted list.
    pub index: usize,
    pub proposal: ProposedEntry,
    pub reason: RejectReason,
}

impl Rejection {
    pub fn to_json(&self) -> serde_json::Value {
        let conflicting = match &self.reason {
            RejectReason::Conflict(c) => c.conflicting_entry_id.clone(),
            RejectReason::Unresolved(_) => None,
        };
        json!({
            "index": self.index,
            "entry": self.proposal,
            "code": self.reason.code(),
            "message": self.reason.message(),
            "conflictingEntryId": conflicting,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screening {
    pub accepted: Vec<ScheduleEntry>,
    pub rejected: Vec<Rejection>,
}

/// Runs proposed entries through the placement rules one at a time, each
/// against the entries accepted before it, so the earliest of two colliding
/// proposals is the one kept. Ids that are missing or repeated are replaced
/// and the day is always taken from the time slot.
pub fn screen<I>(proposals: I, master: &MasterData, opts: PlacementOptions) -> Screening
where
    I: IntoIterator<Item = ProposedEntry>,
{
    let mut out = Screening::default();
    let mut ids: HashSet<String> = HashSet::new();

    for (index, proposal) in proposals.into_iter().enumerate() {
        let resolved = match resolve(
            master,
            &proposal.class_id,
            &proposal.subject_id,
            &proposal.teacher_id,
            &proposal.room_id,
            &proposal.time_slot_id,
        ) {
            Ok(r) => r,
            Err(missing) => {
                debug!(index, kind = %missing.kind, id = %missing.id, "proposal references unknown record");
                out.rejected.push(Rejection {
                    index,
                    proposal,
                    reason: RejectReason::Unresolved(missing),
                });
                continue;
            }
        };

        let id = match proposal.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() && !ids.contains(id) => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let entry = ScheduleEntry {
            id,
            class_id: resolved.class.id.clone(),
            subject_id: resolved.subject.id.clone(),
            teacher_id: resolved.teacher.id.clone(),
            room_id: resolved.room.id.clone(),
            day: resolved.slot.day,
            time_slot_id: resolved.slot.id.clone(),
        };

        match evaluate(&out.accepted, &entry, None, &resolved, master, opts) {
            ConflictResult::NoConflict => {
                ids.insert(entry.id.clone());
                out.accepted.push(entry);
            }
            ConflictResult::Conflict(c) => {
                debug!(index, reason = %c.reason, "proposal dropped");
                out.rejected.push(Rejection {
                    index,
                    proposal,
                    reason: RejectReason::Conflict(c),
                });
            }
        }
    }

    out
}

/// Replays a stored grid in insertion order and returns every entry that
/// would not have been accepted.
pub fn audit(entries: &[ScheduleEntry], master: &MasterData, opts: PlacementOptions) -> Vec<Rejection> {
    screen(
        entries.iter().cloned().map(ProposedEntry::from),
        master,
        opts,
    )
    .rejected
}
