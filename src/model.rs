use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned booking id. Strictly increasing per tenant, never reused.
pub type BookingId = u64;

/// Weekday labels in grid order.
pub const DAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

/// Time interval labels in grid order.
pub const TIME_SLOTS: [&str; 7] = [
    "8:30 - 9:20",
    "9:20 - 10:10",
    "10:20 - 11:10",
    "11:10 - 12:00",
    "12:45 - 1:30",
    "1:30 - 2:20",
    "2:20 - 3:00",
];

/// Total number of addressable slots.
pub const SLOT_COUNT: usize = DAYS.len() * TIME_SLOTS.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Day {
    pub const ALL: [Day; 5] = [
        Day::Monday,
        Day::Tuesday,
        Day::Wednesday,
        Day::Thursday,
        Day::Friday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        DAYS[self.index()]
    }

    /// Case-insensitive match against the weekday labels.
    pub fn parse(s: &str) -> Option<Day> {
        let s = s.trim();
        Day::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index into [`TIME_SLOTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period(u8);

impl Period {
    pub const COUNT: usize = TIME_SLOTS.len();

    pub fn new(index: usize) -> Option<Period> {
        (index < Self::COUNT).then_some(Period(index as u8))
    }

    pub fn all() -> impl Iterator<Item = Period> {
        (0..Self::COUNT as u8).map(Period)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn label(self) -> &'static str {
        TIME_SLOTS[self.index()]
    }

    /// Matches a time label ignoring whitespace, so `"8:30-9:20"` and
    /// `"8:30 - 9:20"` name the same period.
    pub fn parse(s: &str) -> Option<Period> {
        let wanted: String = s.split_whitespace().collect();
        Period::all().find(|p| {
            let label: String = p.label().split_whitespace().collect();
            label == wanted
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One addressable `(day, time)` cell of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub day: Day,
    pub period: Period,
}

impl Slot {
    pub fn new(day: Day, period: Period) -> Self {
        Self { day, period }
    }

    pub fn parse(day: &str, time: &str) -> Option<Slot> {
        Some(Slot::new(Day::parse(day)?, Period::parse(time)?))
    }

    /// All slots in scan order: time-major, day-minor.
    pub fn scan_order() -> impl Iterator<Item = Slot> {
        Period::all().flat_map(|period| Day::ALL.into_iter().map(move |day| Slot::new(day, period)))
    }

    /// Zero-based position in [`Slot::scan_order`].
    pub fn position(&self) -> usize {
        self.period.index() * DAYS.len() + self.day.index()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.day, self.period)
    }
}

/// A candidate booking, before the store has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub staff_name: String,
    pub department: String,
    pub year: String,
    pub semester: String,
    pub subject: String,
    /// `None` means no room constraint.
    pub room: Option<String>,
    pub slot: Slot,
}

impl NewBooking {
    pub fn with_id(self, id: BookingId) -> Booking {
        Booking {
            id,
            staff_name: self.staff_name,
            department: self.department,
            year: self.year,
            semester: self.semester,
            subject: self.subject,
            room: self.room,
            slot: self.slot,
        }
    }
}

impl From<&Booking> for NewBooking {
    fn from(b: &Booking) -> Self {
        Self {
            staff_name: b.staff_name.clone(),
            department: b.department.clone(),
            year: b.year.clone(),
            semester: b.semester.clone(),
            subject: b.subject.clone(),
            room: b.room.clone(),
            slot: b.slot,
        }
    }
}

/// A persisted booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub staff_name: String,
    pub department: String,
    pub year: String,
    pub semester: String,
    pub subject: String,
    pub room: Option<String>,
    pub slot: Slot,
}

/// Empty and whitespace-only rooms carry no room constraint.
pub fn normalize_room(room: Option<String>) -> Option<String> {
    room.filter(|r| !r.trim().is_empty())
}

/// Input to auto-assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignRequest {
    pub staff_name: String,
    pub department: String,
    pub year: String,
    pub semester: String,
    pub subject: String,
}

impl AssignRequest {
    pub fn at(self, slot: Slot) -> NewBooking {
        NewBooking {
            staff_name: self.staff_name,
            department: self.department,
            year: self.year,
            semester: self.semester,
            subject: self.subject,
            room: None,
            slot,
        }
    }
}

/// Equality filters; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<BookingId>,
    pub staff_name: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    /// `Some(None)` selects bookings without a room.
    pub room: Option<Option<String>>,
    pub day: Option<Day>,
    pub period: Option<Period>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        self.id.is_none_or(|id| id == b.id)
            && eq(&self.staff_name, &b.staff_name)
            && eq(&self.department, &b.department)
            && eq(&self.year, &b.year)
            && eq(&self.semester, &b.semester)
            && eq(&self.subject, &b.subject)
            && self.room.as_ref().is_none_or(|r| *r == b.room)
            && self.day.is_none_or(|d| d == b.slot.day)
            && self.period.is_none_or(|p| p == b.slot.period)
    }
}

/// Partial update of a booking. The id never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingChanges {
    pub staff_name: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub semester: Option<String>,
    pub subject: Option<String>,
    pub room: Option<Option<String>>,
    pub day: Option<Day>,
    pub period: Option<Period>,
}

impl BookingChanges {
    pub fn is_empty(&self) -> bool {
        *self == BookingChanges::default()
    }

    pub fn apply(&self, b: &Booking) -> Booking {
        Booking {
            id: b.id,
            staff_name: self.staff_name.clone().unwrap_or_else(|| b.staff_name.clone()),
            department: self.department.clone().unwrap_or_else(|| b.department.clone()),
            year: self.year.clone().unwrap_or_else(|| b.year.clone()),
            semester: self.semester.clone().unwrap_or_else(|| b.semester.clone()),
            subject: self.subject.clone().unwrap_or_else(|| b.subject.clone()),
            room: match &self.room {
                Some(room) => normalize_room(room.clone()),
                None => b.room.clone(),
            },
            slot: Slot::new(
                self.day.unwrap_or(b.slot.day),
                self.period.unwrap_or(b.slot.period),
            ),
        }
    }
}

/// In-memory booking table for one tenant.
#[derive(Debug, Clone)]
pub struct Timetable {
    /// Id the next insert receives.
    pub next_id: BookingId,
    bookings: BTreeMap<BookingId, Booking>,
    /// Slot → ids booked there, ascending.
    by_slot: HashMap<Slot, Vec<BookingId>>,
}

impl Default for Timetable {
    fn default() -> Self {
        Self::new()
    }
}

impl Timetable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            bookings: BTreeMap::new(),
            by_slot: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.get(&id)
    }

    /// All bookings in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    /// Bookings occupying `slot`, in id order.
    pub fn in_slot(&self, slot: &Slot) -> impl Iterator<Item = &Booking> {
        self.by_slot
            .get(slot)
            .into_iter()
            .flatten()
            .filter_map(|id| self.bookings.get(id))
    }

    pub fn insert(&mut self, booking: Booking) {
        self.next_id = self.next_id.max(booking.id + 1);
        let ids = self.by_slot.entry(booking.slot).or_default();
        let pos = ids.binary_search(&booking.id).unwrap_or_else(|e| e);
        ids.insert(pos, booking.id);
        self.bookings.insert(booking.id, booking);
    }

    pub fn remove(&mut self, id: BookingId) -> Option<Booking> {
        let booking = self.bookings.remove(&id)?;
        if let Some(ids) = self.by_slot.get_mut(&booking.slot) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.by_slot.remove(&booking.slot);
            }
        }
        Some(booking)
    }

    /// Swap in a new version of an existing booking.
    pub fn replace(&mut self, booking: Booking) -> Option<Booking> {
        let old = self.remove(booking.id);
        self.insert(booking);
        old
    }

    pub fn find(&self, filter: &BookingFilter) -> Vec<Booking> {
        if let Some(id) = filter.id {
            return self
                .get(id)
                .filter(|b| filter.matches(b))
                .cloned()
                .into_iter()
                .collect();
        }
        self.iter().filter(|b| filter.matches(b)).cloned().collect()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingAdded { booking: Booking },
    BookingEdited { booking: Booking },
    BookingRemoved { id: BookingId },
    /// Written first by compaction so ids of deleted bookings stay retired.
    IdReserved { next_id: BookingId },
}
