use async_trait::async_trait;
use uuid::Uuid;
use tracing::warn;

use crate::models::{
    AuditLog, BookedPassenger, BookedPassengerView, BookedSeat, Booking, Gender, NewAuditLog,
    NewBookedPassenger, NewBookedSeat, NewBooking, NewPassenger, NewRefund, Passenger, Payment,
    Refund, SeatAssignment, SeatPlacement,
};
use crate::reference::{ActiveStatus, CancelledStatus, CoachTypeId, PaymentStatusId, ReferenceData};
use crate::CoreResult;

/// Source of transactions; one connection per transaction.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Check out a connection and open a transaction on it.
    async fn begin(&self) -> CoreResult<Box<dyn BookingTx>>;

    /// Read the lookup tables backing [`ReferenceData`].
    async fn load_reference_data(&self) -> CoreResult<ReferenceData>;
}

/// Every statement the booking core issues, bound to one open transaction.
///
/// Dropping a transaction without committing rolls it back and returns the
/// connection to its pool.
#[async_trait]
pub trait BookingTx: Send {
    // Preconditions
    async fn user_exists(&mut self, user_id: Uuid) -> CoreResult<bool>;
    async fn station_exists(&mut self, station_id: Uuid) -> CoreResult<bool>;
    /// Train serving the schedule, `None` if the schedule does not exist.
    async fn schedule_train(&mut self, schedule_id: Uuid) -> CoreResult<Option<Uuid>>;
    /// Number of stop rows of the schedule matching either station.
    async fn count_route_stops(&mut self, schedule_id: Uuid, from_station_id: Uuid, to_station_id: Uuid) -> CoreResult<i64>;
    async fn train_has_coach_type(&mut self, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<bool>;

    // Bookings
    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking>;
    /// With `for_update` the row stays locked until the transaction ends.
    async fn find_booking(&mut self, booking_id: Uuid, for_update: bool) -> CoreResult<Option<Booking>>;
    async fn update_booking_status(&mut self, booking_id: Uuid, status: ActiveStatus) -> CoreResult<Booking>;
    async fn mark_booking_cancelled(&mut self, booking_id: Uuid, status: CancelledStatus) -> CoreResult<Booking>;

    // Passenger profiles
    /// Serializes upserts of one passenger identity until the transaction
    /// ends, so concurrent bookings resolve it to a single row.
    async fn lock_passenger_identity(&mut self, identity: &str) -> CoreResult<()>;
    async fn find_passenger_by_email(&mut self, user_id: Uuid, email: &str) -> CoreResult<Option<Passenger>>;
    async fn find_passenger_by_profile(&mut self, user_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Option<Passenger>>;
    async fn insert_passenger(&mut self, passenger: &NewPassenger) -> CoreResult<Passenger>;
    async fn update_passenger_profile(&mut self, passenger_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Passenger>;
    async fn passenger_owner(&mut self, passenger_id: Uuid) -> CoreResult<Option<Uuid>>;

    // Booked passengers
    async fn insert_booked_passenger(&mut self, entry: &NewBookedPassenger) -> CoreResult<BookedPassenger>;
    /// Booked passengers in insertion order, each with its seat if any.
    async fn list_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<Vec<BookedPassengerView>>;
    async fn delete_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<u64>;

    // Seats
    /// Lowest seat (coach code, then seat number) of the coach type on the
    /// train not held by a non-cancelled booking on the schedule.
    async fn find_free_seat(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<Option<SeatAssignment>>;
    async fn count_free_seats(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<i64>;
    async fn seat_placement(&mut self, seat_id: Uuid) -> CoreResult<Option<SeatPlacement>>;
    /// `None` when another active booking already holds the seat on this schedule.
    async fn claim_seat(&mut self, claim: &NewBookedSeat) -> CoreResult<Option<BookedSeat>>;
    async fn delete_booked_seats(&mut self, booking_id: Uuid) -> CoreResult<u64>;

    // Payments, refunds, audit
    async fn find_payment(&mut self, payment_id: Uuid) -> CoreResult<Option<Payment>>;
    async fn latest_payment_with_status(&mut self, booking_id: Uuid, status: PaymentStatusId) -> CoreResult<Option<Payment>>;
    async fn update_payment_status(&mut self, payment_id: Uuid, status: PaymentStatusId) -> CoreResult<Payment>;
    async fn insert_refund(&mut self, refund: &NewRefund) -> CoreResult<Refund>;
    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> CoreResult<AuditLog>;

    // Savepoints
    async fn savepoint(&mut self, name: &str) -> CoreResult<()>;
    async fn release_savepoint(&mut self, name: &str) -> CoreResult<()>;
    async fn rollback_to_savepoint(&mut self, name: &str) -> CoreResult<()>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;
    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}

/// Commit on success, roll back on failure. The connection is released on
/// every path.
pub async fn finish_transaction<T>(tx: Box<dyn BookingTx>, result: CoreResult<T>) -> CoreResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed after error '{}': {}", err, rollback_err);
            }
            Err(err)
        }
    }
}
