use std::sync::Arc;
use rail_core::BookingManager;

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingManager>,
}

impl AppState {
    pub fn new(bookings: BookingManager) -> Self {
        Self {
            bookings: Arc::new(bookings),
        }
    }
}
