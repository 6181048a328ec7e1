use crate::expand::effective_classes;
use crate::model::{Class, ScheduleEntry, Subject, Teacher, TimeSlot};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    TeacherDoubleBooked,
    RoomDoubleBooked,
    ClassAlreadyScheduled,
    SlotReserved,
    SubjectLevelMismatch,
    TeacherNotQualified,
    TeacherNotAssignedToClass,
    TeacherUnavailable,
}

impl ConflictReason {
    pub fn message(self) -> &'static str {
        match self {
            ConflictReason::TeacherDoubleBooked => "teacher double-booked",
            ConflictReason::RoomDoubleBooked => "room double-booked",
            ConflictReason::ClassAlreadyScheduled => "class already scheduled",
            ConflictReason::SlotReserved => "time slot reserved",
            ConflictReason::SubjectLevelMismatch => "subject level does not match class level",
            ConflictReason::TeacherNotQualified => "teacher does not teach this subject",
            ConflictReason::TeacherNotAssignedToClass => "teacher is not assigned to this class",
            ConflictReason::TeacherUnavailable => "teacher unavailable at this time slot",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub reason: ConflictReason,
    /// The existing booking the candidate collides with. None for rules that
    /// concern the candidate alone (reserved slot, eligibility).
    pub conflicting_entry_id: Option<String>,
}

impl Conflict {
    pub fn new(reason: ConflictReason) -> Self {
        Conflict {
            reason,
            conflicting_entry_id: None,
        }
    }

    pub fn against(reason: ConflictReason, entry_id: &str) -> Self {
        Conflict {
            reason,
            conflicting_entry_id: Some(entry_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResult {
    NoConflict,
    Conflict(Conflict),
}

impl ConflictResult {
    pub fn into_conflict(self) -> Option<Conflict> {
        match self {
            ConflictResult::NoConflict => None,
            ConflictResult::Conflict(c) => Some(c),
        }
    }

    /// Runs `next` only when no conflict has been found yet.
    pub fn or_else(self, next: impl FnOnce() -> ConflictResult) -> ConflictResult {
        match self {
            ConflictResult::NoConflict => next(),
            found => found,
        }
    }
}

impl From<Conflict> for ConflictResult {
    fn from(c: Conflict) -> Self {
        ConflictResult::Conflict(c)
    }
}

/// Double-booking check for `candidate` against `existing`.
///
/// Scans `existing` in order and reports the first entry sharing the
/// candidate's time slot that has the same teacher, the same room, or an
/// overlapping effective class set (in that precedence). The entry whose id
/// equals `exclude_entry_id` is skipped so a moved entry never collides with
/// itself.
pub fn check_conflict(
    existing: &[ScheduleEntry],
    candidate: &ScheduleEntry,
    exclude_entry_id: Option<&str>,
    classes: &HashMap<String, Class>,
) -> ConflictResult {
    let mut candidate_classes: Option<BTreeSet<&str>> = None;

    for other in existing {
        if exclude_entry_id == Some(other.id.as_str()) {
            continue;
        }
        if other.time_slot_id != candidate.time_slot_id {
            continue;
        }

        let reason = if other.teacher_id == candidate.teacher_id {
            Some(ConflictReason::TeacherDoubleBooked)
        } else if other.room_id == candidate.room_id {
            Some(ConflictReason::RoomDoubleBooked)
        } else {
            let mine = candidate_classes.get_or_insert_with(|| effective_classes(candidate, classes));
            let theirs = effective_classes(other, classes);
            if mine.is_disjoint(&theirs) {
                None
            } else {
                Some(ConflictReason::ClassAlreadyScheduled)
            }
        };

        if let Some(reason) = reason {
            return Conflict::against(reason, &other.id).into();
        }
    }

    ConflictResult::NoConflict
}

pub fn check_slot(slot: &TimeSlot) -> ConflictResult {
    if slot.is_reserved() {
        Conflict::new(ConflictReason::SlotReserved).into()
    } else {
        ConflictResult::NoConflict
    }
}

/// Qualification checks: level match, then the teacher's subjects, classes,
/// and availability.
pub fn check_eligibility(
    class: &Class,
    subject: &Subject,
    teacher: &Teacher,
    time_slot_id: &str,
) -> ConflictResult {
    let reason = if subject.level_target.trim() != class.level.trim() {
        Some(ConflictReason::SubjectLevelMismatch)
    } else if !teacher.subject_ids.contains(&subject.id) {
        Some(ConflictReason::TeacherNotQualified)
    } else if !teacher.class_ids.contains(&class.id) {
        Some(ConflictReason::TeacherNotAssignedToClass)
    } else if !teacher.available_time_slot_ids.contains(time_slot_id) {
        Some(ConflictReason::TeacherUnavailable)
    } else {
        None
    };
    match reason {
        Some(r) => Conflict::new(r).into(),
        None => ConflictResult::NoConflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SubjectGroup, Weekday};

    fn class(id: &str, members: &[&str]) -> Class {
        Class {
            id: id.into(),
            name: id.to_uppercase(),
            department: "TKJ".into(),
            level: "X".into(),
            is_combined: !members.is_empty(),
            combined_class_ids: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn classes(list: Vec<Class>) -> HashMap<String, Class> {
        list.into_iter().map(|c| (c.id.clone(), c)).collect()
    }

    fn entry(id: &str, class_id: &str, slot: &str, teacher: &str, room: &str) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            class_id: class_id.into(),
            subject_id: "s1".into(),
            teacher_id: teacher.into(),
            room_id: room.into(),
            day: Weekday::Monday,
            time_slot_id: slot.into(),
        }
    }

    fn basic_classes() -> HashMap<String, Class> {
        classes(vec![
            class("c1", &[]),
            class("c2", &[]),
            class("c3", &[]),
            class("combo1", &["c1", "c2"]),
            class("combo2", &["c2", "c3"]),
        ])
    }

    #[test]
    fn empty_grid_has_no_conflict() {
        let cand = entry("new", "c1", "t1", "g1", "r1");
        assert_eq!(
            check_conflict(&[], &cand, None, &basic_classes()),
            ConflictResult::NoConflict
        );
    }

    #[test]
    fn same_teacher_same_slot_is_double_booked() {
        let existing = vec![entry("e1", "c1", "t1", "g1", "r1")];
        let cand = entry("new", "c2", "t1", "g1", "r2");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            Conflict::against(ConflictReason::TeacherDoubleBooked, "e1").into()
        );
    }

    #[test]
    fn same_room_same_slot_is_double_booked() {
        let existing = vec![entry("e1", "c1", "t1", "g1", "r1")];
        let cand = entry("new", "c2", "t1", "g2", "r1");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            Conflict::against(ConflictReason::RoomDoubleBooked, "e1").into()
        );
    }

    #[test]
    fn teacher_rule_wins_over_room_and_class() {
        let existing = vec![entry("e1", "c1", "t1", "g1", "r1")];
        let cand = entry("new", "c1", "t1", "g1", "r1");
        let found = check_conflict(&existing, &cand, None, &basic_classes())
            .into_conflict()
            .expect("conflict");
        assert_eq!(found.reason, ConflictReason::TeacherDoubleBooked);
    }

    #[test]
    fn member_class_collides_with_combined_session() {
        let existing = vec![entry("e1", "combo1", "t1", "g1", "r1")];
        let cand = entry("new", "c2", "t1", "g2", "r2");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            Conflict::against(ConflictReason::ClassAlreadyScheduled, "e1").into()
        );
    }

    #[test]
    fn combined_classes_sharing_a_member_collide() {
        let existing = vec![entry("e1", "combo1", "t1", "g1", "r1")];
        let cand = entry("new", "combo2", "t1", "g2", "r2");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            Conflict::against(ConflictReason::ClassAlreadyScheduled, "e1").into()
        );
    }

    #[test]
    fn disjoint_classes_share_a_slot() {
        let existing = vec![entry("e1", "combo1", "t1", "g1", "r1")];
        let cand = entry("new", "c3", "t1", "g2", "r2");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            ConflictResult::NoConflict
        );
    }

    #[test]
    fn other_slots_are_ignored() {
        let existing = vec![entry("e1", "c1", "t2", "g1", "r1")];
        let cand = entry("new", "c1", "t1", "g1", "r1");
        assert_eq!(
            check_conflict(&existing, &cand, None, &basic_classes()),
            ConflictResult::NoConflict
        );
    }

    #[test]
    fn excluded_entry_does_not_collide_with_itself() {
        let existing = vec![entry("e1", "c1", "t1", "g1", "r1")];
        let moved = entry("e1", "c1", "t1", "g1", "r1");
        assert_eq!(
            check_conflict(&existing, &moved, Some("e1"), &basic_classes()),
            ConflictResult::NoConflict
        );
    }

    #[test]
    fn first_conflict_in_insertion_order_is_reported() {
        let existing = vec![
            entry("e1", "c3", "t1", "g9", "r1"),
            entry("e2", "c1", "t1", "g1", "r9"),
        ];
        let cand = entry("new", "c1", "t1", "g1", "r1");
        let found = check_conflict(&existing, &cand, None, &basic_classes())
            .into_conflict()
            .expect("conflict");
        assert_eq!(found.conflicting_entry_id.as_deref(), Some("e1"));
        assert_eq!(found.reason, ConflictReason::RoomDoubleBooked);
    }

    #[test]
    fn detector_leaves_inputs_untouched() {
        let existing = vec![entry("e1", "combo1", "t1", "g1", "r1")];
        let snapshot = existing.clone();
        let cand = entry("new", "c1", "t1", "g2", "r2");
        let _ = check_conflict(&existing, &cand, None, &basic_classes());
        assert_eq!(existing, snapshot);
    }

    #[test]
    fn reserved_slots_always_conflict() {
        let mut slot = TimeSlot {
            id: "t0".into(),
            day: Weekday::Monday,
            start_time: "07:00".into(),
            end_time: "07:45".into(),
            session_number: None,
            is_break: false,
            label: Some("UPACARA/PEMBINAAN".into()),
        };
        assert_eq!(
            check_slot(&slot),
            Conflict::new(ConflictReason::SlotReserved).into()
        );
        slot.label = None;
        slot.is_break = true;
        assert!(matches!(check_slot(&slot), ConflictResult::Conflict(_)));
        slot.is_break = false;
        assert_eq!(check_slot(&slot), ConflictResult::NoConflict);
    }

    #[test]
    fn eligibility_checks_level_then_teacher() {
        let c = class("c1", &[]);
        let mut subject = Subject {
            id: "s1".into(),
            name: "Matematika".into(),
            required_sessions_per_week: 4,
            level_target: "XI".into(),
            group: SubjectGroup::General,
        };
        let mut teacher = Teacher {
            id: "g1".into(),
            name: "Bu Sari".into(),
            subject_ids: ["s1".to_string()].into_iter().collect(),
            class_ids: ["c1".to_string()].into_iter().collect(),
            available_time_slot_ids: ["t1".to_string()].into_iter().collect(),
        };

        let r = check_eligibility(&c, &subject, &teacher, "t1");
        assert_eq!(r, Conflict::new(ConflictReason::SubjectLevelMismatch).into());

        subject.level_target = "X".into();
        assert_eq!(check_eligibility(&c, &subject, &teacher, "t1"), ConflictResult::NoConflict);
        assert_eq!(
            check_eligibility(&c, &subject, &teacher, "t2"),
            Conflict::new(ConflictReason::TeacherUnavailable).into()
        );

        teacher.class_ids.clear();
        assert_eq!(
            check_eligibility(&c, &subject, &teacher, "t1"),
            Conflict::new(ConflictReason::TeacherNotAssignedToClass).into()
        );

        teacher.subject_ids.clear();
        assert_eq!(
            check_eligibility(&c, &subject, &teacher, "t1"),
            Conflict::new(ConflictReason::TeacherNotQualified).into()
        );
    }

    #[test]
    fn or_else_short_circuits_on_first_conflict() {
        let first: ConflictResult = Conflict::new(ConflictReason::SlotReserved).into();
        let out = first.or_else(|| panic!("must not run"));
        assert!(matches!(out, ConflictResult::Conflict(_)));
        let out = ConflictResult::NoConflict.or_else(|| ConflictResult::NoConflict);
        assert_eq!(out, ConflictResult::NoConflict);
    }
}
