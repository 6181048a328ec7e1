use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
        }
    }

    /// Accepts English names and the Indonesian names older workspaces were
    /// seeded with (Senin..Sabtu), case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "senin" => Some(Weekday::Monday),
            "tuesday" | "selasa" => Some(Weekday::Tuesday),
            "wednesday" | "rabu" => Some(Weekday::Wednesday),
            "thursday" | "kamis" => Some(Weekday::Thursday),
            "friday" | "jumat" => Some(Weekday::Friday),
            "saturday" | "sabtu" => Some(Weekday::Saturday),
            _ => None,
        }
    }
}

impl TryFrom<String> for Weekday {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Weekday::parse(&value).ok_or_else(|| format!("unknown day: {}", value))
    }
}

impl From<Weekday> for String {
    fn from(value: Weekday) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SubjectGroup {
    General,
    Vocational,
    Elective,
    LocalContent,
}

impl SubjectGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectGroup::General => "general",
            SubjectGroup::Vocational => "vocational",
            SubjectGroup::Elective => "elective",
            SubjectGroup::LocalContent => "local-content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" | "umum" => Some(SubjectGroup::General),
            "vocational" | "kejuruan" => Some(SubjectGroup::Vocational),
            "elective" | "mapel pilihan" => Some(SubjectGroup::Elective),
            "local-content" | "local_content" | "mulok" => Some(SubjectGroup::LocalContent),
            _ => None,
        }
    }
}

impl TryFrom<String> for SubjectGroup {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SubjectGroup::parse(&value).ok_or_else(|| {
            format!(
                "group must be one of: general, vocational, elective, local-content (got {})",
                value
            )
        })
    }
}

impl From<SubjectGroup> for String {
    fn from(value: SubjectGroup) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subject_ids: BTreeSet<String>,
    #[serde(default)]
    pub class_ids: BTreeSet<String>,
    #[serde(default)]
    pub available_time_slot_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub required_sessions_per_week: u32,
    pub level_target: String,
    pub group: SubjectGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub department: String,
    pub level: String,
    #[serde(default)]
    pub is_combined: bool,
    /// Member classes of a combined class. Always empty for a standalone class.
    #[serde(default)]
    pub combined_class_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub room_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(default)]
    pub id: String,
    pub day: Weekday,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub session_number: Option<i64>,
    #[serde(default)]
    pub is_break: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl TimeSlot {
    /// Breaks and labelled activity slots never host a class session.
    pub fn is_reserved(&self) -> bool {
        self.is_break || self.label.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub class_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub room_id: String,
    pub day: Weekday,
    pub time_slot_id: String,
}

/// A schedule entry as produced by the external generator: id and day are
/// advisory and get reassigned on import. Snake-case keys are accepted since
/// that is what the generator emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(alias = "class_id")]
    pub class_id: String,
    #[serde(alias = "subject_id")]
    pub subject_id: String,
    #[serde(alias = "teacher_id")]
    pub teacher_id: String,
    #[serde(alias = "room_id")]
    pub room_id: String,
    #[serde(alias = "time_slot_id")]
    pub time_slot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
}

impl From<ScheduleEntry> for ProposedEntry {
    fn from(e: ScheduleEntry) -> Self {
        ProposedEntry {
            id: Some(e.id),
            class_id: e.class_id,
            subject_id: e.subject_id,
            teacher_id: e.teacher_id,
            room_id: e.room_id,
            time_slot_id: e.time_slot_id,
            day: Some(e.day.as_str().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchoolInfo {
    pub academic_year: String,
    pub semester: String,
    pub school_name: String,
    pub headmaster_name: String,
    pub address: String,
    pub logo_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Teacher,
    Subject,
    Class,
    Room,
    TimeSlot,
    Entry,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Teacher => "teacher",
            EntityKind::Subject => "subject",
            EntityKind::Class => "class",
            EntityKind::Room => "room",
            EntityKind::TimeSlot => "time slot",
            EntityKind::Entry => "schedule entry",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of every master-data collection, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct MasterData {
    pub teachers: HashMap<String, Teacher>,
    pub subjects: HashMap<String, Subject>,
    pub classes: HashMap<String, Class>,
    pub rooms: HashMap<String, Room>,
    pub time_slots: HashMap<String, TimeSlot>,
}

impl MasterData {
    pub fn from_parts(
        teachers: Vec<Teacher>,
        subjects: Vec<Subject>,
        classes: Vec<Class>,
        rooms: Vec<Room>,
        time_slots: Vec<TimeSlot>,
    ) -> Self {
        MasterData {
            teachers: teachers.into_iter().map(|t| (t.id.clone(), t)).collect(),
            subjects: subjects.into_iter().map(|s| (s.id.clone(), s)).collect(),
            classes: classes.into_iter().map(|c| (c.id.clone(), c)).collect(),
            rooms: rooms.into_iter().map(|r| (r.id.clone(), r)).collect(),
            time_slots: time_slots.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        match kind {
            EntityKind::Teacher => self.teachers.contains_key(id),
            EntityKind::Subject => self.subjects.contains_key(id),
            EntityKind::Class => self.classes.contains_key(id),
            EntityKind::Room => self.rooms.contains_key(id),
            EntityKind::TimeSlot => self.time_slots.contains_key(id),
            EntityKind::Entry => false,
        }
    }
}

pub fn parse_clock(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H.%M"))
        .ok()
}

/// Normalizes both ends to HH:MM and checks that the slot has positive length.
pub fn normalize_time_range(start: &str, end: &str) -> Result<(String, String), String> {
    let s = parse_clock(start).ok_or_else(|| format!("startTime must be HH:MM (got {})", start))?;
    let e = parse_clock(end).ok_or_else(|| format!("endTime must be HH:MM (got {})", end))?;
    if e <= s {
        return Err("endTime must be after startTime".into());
    }
    Ok((s.format("%H:%M").to_string(), e.format("%H:%M").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_accepts_indonesian_names() {
        assert_eq!(Weekday::parse("Senin"), Some(Weekday::Monday));
        assert_eq!(Weekday::parse("JUMAT"), Some(Weekday::Friday));
        assert_eq!(Weekday::parse("saturday"), Some(Weekday::Saturday));
        assert_eq!(Weekday::parse("Minggu"), None);
    }

    #[test]
    fn subject_group_round_trips_through_json() {
        let g: SubjectGroup = serde_json::from_value(serde_json::json!("Kejuruan")).expect("group");
        assert_eq!(g, SubjectGroup::Vocational);
        assert_eq!(serde_json::to_value(g).expect("json"), serde_json::json!("vocational"));
        assert!(serde_json::from_value::<SubjectGroup>(serde_json::json!("sports")).is_err());
    }

    #[test]
    fn time_range_requires_positive_length() {
        assert_eq!(
            normalize_time_range("07:00", "07.45"),
            Ok(("07:00".to_string(), "07:45".to_string()))
        );
        assert!(normalize_time_range("08:00", "08:00").is_err());
        assert!(normalize_time_range("8am", "09:00").is_err());
    }

    #[test]
    fn reserved_slots_cover_breaks_and_labels() {
        let mut slot = TimeSlot {
            id: "t1".into(),
            day: Weekday::Monday,
            start_time: "07:00".into(),
            end_time: "07:45".into(),
            session_number: Some(1),
            is_break: false,
            label: None,
        };
        assert!(!slot.is_reserved());
        slot.label = Some("UPACARA".into());
        assert!(slot.is_reserved());
        slot.label = None;
        slot.is_break = true;
        assert!(slot.is_reserved());
    }
}
