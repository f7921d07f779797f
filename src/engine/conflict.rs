use std::fmt;
use std::str::FromStr;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Axis along which two bookings in the same slot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Staff,
    /// department + year + semester
    Class,
    Room,
    /// Whole-slot policy: any other booking in the slot.
    Slot,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Staff => "staff",
            Dimension::Class => "class",
            Dimension::Room => "room",
            Dimension::Slot => "slot",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which bookings may share a `(day, time)` slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Bookings may share a slot when staff, class and room all differ.
    #[default]
    PerDimension,
    /// At most one booking per slot.
    WholeSlot,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dimension" | "per_dimension" => Ok(ConflictPolicy::PerDimension),
            "slot" | "whole_slot" => Ok(ConflictPolicy::WholeSlot),
            other => Err(format!("unknown conflict policy: {other}")),
        }
    }
}

pub fn parse_slot(day: &str, time: &str) -> Result<Slot, EngineError> {
    let day = Day::parse(day).ok_or_else(|| EngineError::InvalidSlot(day.to_string()))?;
    let period = Period::parse(time).ok_or_else(|| EngineError::InvalidSlot(time.to_string()))?;
    Ok(Slot::new(day, period))
}

fn validate_text(value: &str, name: &'static str, required: bool) -> Result<(), EngineError> {
    if required && value.trim().is_empty() {
        return Err(EngineError::InvalidField(name));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(EngineError::LimitExceeded("field too long"));
    }
    Ok(())
}

pub(crate) fn validate_booking(b: &NewBooking) -> Result<(), EngineError> {
    validate_text(&b.staff_name, "staff_name", true)?;
    validate_text(&b.department, "department", true)?;
    validate_text(&b.year, "year", false)?;
    validate_text(&b.semester, "semester", false)?;
    validate_text(&b.subject, "subject", true)?;
    if let Some(room) = &b.room {
        validate_text(room, "room", false)?;
    }
    Ok(())
}

pub(crate) fn validate_request(r: &AssignRequest) -> Result<(), EngineError> {
    validate_text(&r.staff_name, "staff_name", true)?;
    validate_text(&r.department, "department", true)?;
    validate_text(&r.year, "year", false)?;
    validate_text(&r.semester, "semester", false)?;
    validate_text(&r.subject, "subject", true)
}

/// The dimension on which `candidate` collides with `existing`, if any.
/// Staff is reported before class, class before room.
pub fn collision(policy: ConflictPolicy, existing: &Booking, candidate: &NewBooking) -> Option<Dimension> {
    if existing.slot != candidate.slot {
        return None;
    }
    if policy == ConflictPolicy::WholeSlot {
        return Some(Dimension::Slot);
    }
    if existing.staff_name == candidate.staff_name {
        return Some(Dimension::Staff);
    }
    if existing.department == candidate.department
        && existing.year == candidate.year
        && existing.semester == candidate.semester
    {
        return Some(Dimension::Class);
    }
    match (&existing.room, &candidate.room) {
        (Some(a), Some(b)) if a == b => Some(Dimension::Room),
        _ => None,
    }
}

/// Reject `candidate` if it collides with any booking in its slot other than `exclude`.
pub(crate) fn check_no_conflict(
    tt: &Timetable,
    candidate: &NewBooking,
    exclude: Option<BookingId>,
    policy: ConflictPolicy,
) -> Result<(), EngineError> {
    for existing in tt.in_slot(&candidate.slot) {
        if Some(existing.id) == exclude {
            continue;
        }
        if let Some(dimension) = collision(policy, existing, candidate) {
            return Err(EngineError::Conflict {
                existing: existing.id,
                dimension,
            });
        }
    }
    Ok(())
}
