use crate::model::{Class, ScheduleEntry};
use std::collections::{BTreeSet, HashMap};

/// One class seat taken by a schedule entry. For a combined-class booking
/// there is one occupancy per member class, all pointing back at the same
/// entry; the entry stays the only booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy<'a> {
    pub class_id: &'a str,
    pub entry: &'a ScheduleEntry,
}

impl Occupancy<'_> {
    pub fn via_combined(&self) -> bool {
        self.class_id != self.entry.class_id
    }
}

/// Expands `entry` into the classes it occupies. `class` is the entity the
/// entry's `class_id` resolves to, if any.
pub fn expand<'a>(entry: &'a ScheduleEntry, class: Option<&'a Class>) -> Vec<Occupancy<'a>> {
    match class {
        // An empty member list yields no occupancy at all.
        Some(c) if c.is_combined => c
            .combined_class_ids
            .iter()
            .map(|member| Occupancy {
                class_id: member.as_str(),
                entry,
            })
            .collect(),
        _ => vec![Occupancy {
            class_id: entry.class_id.as_str(),
            entry,
        }],
    }
}

pub fn effective_classes<'a>(
    entry: &'a ScheduleEntry,
    classes: &'a HashMap<String, Class>,
) -> BTreeSet<&'a str> {
    expand(entry, classes.get(&entry.class_id))
        .into_iter()
        .map(|o| o.class_id)
        .collect()
}

pub fn expand_all<'a>(
    entries: &'a [ScheduleEntry],
    classes: &'a HashMap<String, Class>,
) -> Vec<Occupancy<'a>> {
    entries
        .iter()
        .flat_map(|e| expand(e, classes.get(&e.class_id)))
        .collect()
}
