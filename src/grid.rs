use serde::Serialize;

use crate::model::*;

/// Which bookings a grid shows. Passed explicitly on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridFilter {
    pub staff_name: Option<String>,
    pub department: Option<String>,
}

impl GridFilter {
    pub fn for_staff(staff_name: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            staff_name: Some(staff_name.into()),
            department: Some(department.into()),
        }
    }

    pub fn matches(&self, b: &Booking) -> bool {
        self.staff_name.as_deref().is_none_or(|s| s == b.staff_name)
            && self.department.as_deref().is_none_or(|d| d == b.department)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridCell {
    pub booking_id: BookingId,
    pub staff_name: String,
    pub subject: String,
    pub year: String,
    pub semester: String,
    pub room: Option<String>,
}

impl GridCell {
    fn from_booking(b: &Booking) -> Self {
        Self {
            booking_id: b.id,
            staff_name: b.staff_name.clone(),
            subject: b.subject.clone(),
            year: b.year.clone(),
            semester: b.semester.clone(),
            room: b.room.clone(),
        }
    }

    /// `"OS (Y:2 S:3)"`
    pub fn label(&self) -> String {
        format!("{} (Y:{} S:{})", self.subject, self.year, self.semester)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridRow {
    pub time: &'static str,
    /// One cell per weekday, in [`DAYS`] order. `None` is free.
    pub cells: Vec<Option<GridCell>>,
}

/// Time-major view of a booking set: one row per period, one column per day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub days: [&'static str; 5],
    pub rows: Vec<GridRow>,
}

pub const FREE_LABEL: &str = "Free";

impl Grid {
    fn empty() -> Self {
        Self {
            days: DAYS,
            rows: Period::all()
                .map(|p| GridRow {
                    time: p.label(),
                    cells: vec![None; DAYS.len()],
                })
                .collect(),
        }
    }

    pub fn cell(&self, slot: Slot) -> Option<&GridCell> {
        self.rows[slot.period.index()].cells[slot.day.index()].as_ref()
    }

    /// Occupied slots in scan order.
    pub fn occupied(&self) -> Vec<Slot> {
        Slot::scan_order().filter(|s| self.cell(*s).is_some()).collect()
    }

    pub fn free_count(&self) -> usize {
        SLOT_COUNT - self.occupied().len()
    }

    /// Cell labels of one row, `"Free"` for empty cells.
    pub fn row_labels(&self, period: Period) -> Vec<String> {
        self.rows[period.index()]
            .cells
            .iter()
            .map(|c| c.as_ref().map_or_else(|| FREE_LABEL.to_string(), GridCell::label))
            .collect()
    }
}

/// Project `bookings` into a grid. Pure: the result depends only on the
/// bookings passed and the filter. When several bookings match one slot the
/// lowest id is shown.
pub fn build_grid<'a>(bookings: impl IntoIterator<Item = &'a Booking>, filter: &GridFilter) -> Grid {
    let mut grid = Grid::empty();
    for b in bookings.into_iter().filter(|b| filter.matches(b)) {
        let cell = &mut grid.rows[b.slot.period.index()].cells[b.slot.day.index()];
        if cell.as_ref().is_none_or(|c| b.id < c.booking_id) {
            *cell = Some(GridCell::from_booking(b));
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(id: BookingId, staff: &str, dept: &str, subject: &str, slot: Slot) -> Booking {
        Booking {
            id,
            staff_name: staff.into(),
            department: dept.into(),
            year: "2".into(),
            semester: "3".into(),
            subject: subject.into(),
            room: None,
            slot,
        }
    }

    fn at(day: Day, period: usize) -> Slot {
        Slot::new(day, Period::new(period).unwrap())
    }

    #[test]
    fn empty_grid_is_all_free() {
        let grid = build_grid(&Vec::<Booking>::new(), &GridFilter::default());
        assert_eq!(grid.rows.len(), 7);
        assert!(grid.rows.iter().all(|r| r.cells.len() == 5));
        assert_eq!(grid.free_count(), 35);
        assert_eq!(grid.rows[0].time, "8:30 - 9:20");
        assert_eq!(
            grid.row_labels(Period::new(0).unwrap()),
            vec!["Free"; 5]
        );
    }

    #[test]
    fn cells_land_in_time_major_layout() {
        let bookings = vec![booking(1, "Asha", "CS", "OS", at(Day::Wednesday, 2))];
        let grid = build_grid(&bookings, &GridFilter::default());
        assert_eq!(grid.rows[2].cells[2].as_ref().unwrap().booking_id, 1);
        assert_eq!(grid.occupied(), vec![at(Day::Wednesday, 2)]);
        assert_eq!(
            grid.row_labels(Period::new(2).unwrap())[2],
            "OS (Y:2 S:3)"
        );
    }

    #[test]
    fn filter_hides_other_staff() {
        let bookings = vec![
            booking(1, "Asha", "CS", "OS", at(Day::Monday, 0)),
            booking(2, "Rahul", "CS", "DB", at(Day::Tuesday, 0)),
            booking(3, "Asha", "EE", "Circuits", at(Day::Friday, 6)),
        ];
        let grid = build_grid(&bookings, &GridFilter::for_staff("Asha", "CS"));
        assert_eq!(grid.occupied(), vec![at(Day::Monday, 0)]);

        let dept_only = GridFilter {
            department: Some("CS".into()),
            ..Default::default()
        };
        assert_eq!(build_grid(&bookings, &dept_only).occupied().len(), 2);
    }

    #[test]
    fn lowest_id_wins_a_shared_slot() {
        let s = at(Day::Monday, 0);
        let bookings = vec![
            booking(9, "Asha", "CS", "Late", s),
            booking(4, "Rahul", "CS", "Early", s),
        ];
        let grid = build_grid(&bookings, &GridFilter::default());
        assert_eq!(grid.cell(s).unwrap().subject, "Early");
    }

    #[test]
    fn build_is_deterministic_and_ignores_unrelated_bookings() {
        let mut bookings = vec![
            booking(1, "Asha", "CS", "OS", at(Day::Monday, 0)),
            booking(2, "Asha", "CS", "DB", at(Day::Thursday, 4)),
        ];
        let filter = GridFilter::for_staff("Asha", "CS");
        let first = build_grid(&bookings, &filter);
        assert_eq!(first, build_grid(&bookings, &filter));

        bookings.push(booking(3, "Rahul", "ME", "Fluids", at(Day::Tuesday, 1)));
        bookings.push(booking(4, "Rahul", "ME", "Fluids", at(Day::Monday, 0)));
        assert_eq!(first, build_grid(&bookings, &filter));
    }
}
