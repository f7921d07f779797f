use std::collections::HashSet;

use crate::model::*;

// ── Auto-assignment scan ──────────────────────────────────────────

/// Slots already booked by `staff_name` within `department`.
///
/// Only the staff+department pair is considered: bookings of other staff in
/// the same class or room do not occupy a slot here.
pub fn occupied_slots(tt: &Timetable, staff_name: &str, department: &str) -> HashSet<Slot> {
    tt.iter()
        .filter(|b| b.staff_name == staff_name && b.department == department)
        .map(|b| b.slot)
        .collect()
}

/// First slot in scan order (time-major, day-minor) not in `occupied`.
pub fn first_free_slot(occupied: &HashSet<Slot>) -> Option<Slot> {
    Slot::scan_order().find(|slot| !occupied.contains(slot))
}
