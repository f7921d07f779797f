use crate::grid::{build_grid, Grid, GridFilter};
use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_booking(&self, id: BookingId) -> Option<Booking> {
        self.state.read().await.get(id).cloned()
    }

    pub async fn find_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        self.state.read().await.find(filter)
    }

    pub async fn booking_count(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn grid(&self, filter: &GridFilter) -> Grid {
        let tt = self.state.read().await;
        build_grid(tt.iter(), filter)
    }
}
