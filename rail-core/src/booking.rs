use std::sync::Arc;
use uuid::Uuid;
use tracing::{error, info};

use crate::allocation::{AllocationReport, SeatAllocator};
use crate::cancellation::{CancellationCascade, CancellationOutcome};
use crate::models::{
    BookedPassenger, Booking, BookingWithPassengers, CreateBookingRequest, NewBookedPassenger,
    NewBooking, NewPassenger, Passenger,
};
use crate::pnr::generate_pnr;
use crate::reference::{names, CoachTypeId, ReferenceData, StatusId};
use crate::repository::{finish_transaction, BookingStore, BookingTx};
use crate::validation::{validate_request, ValidPassenger};
use crate::{CoreError, CoreResult};

/// Entry point of the booking core: creation, confirmation, cancellation.
pub struct BookingManager {
    store: Arc<dyn BookingStore>,
    reference: Arc<ReferenceData>,
    allocator: SeatAllocator,
    cancellation: CancellationCascade,
}

impl BookingManager {
    pub fn new(store: Arc<dyn BookingStore>, reference: Arc<ReferenceData>) -> Self {
        let cancellation = CancellationCascade::new(store.clone(), reference.clone());
        Self {
            store,
            reference,
            allocator: SeatAllocator::new(),
            cancellation,
        }
    }

    /// Load reference data from the store and build a manager around it.
    pub async fn from_store(store: Arc<dyn BookingStore>) -> CoreResult<Self> {
        let reference = store.load_reference_data().await?;
        Ok(Self::new(store, Arc::new(reference)))
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    /// Persist a booking, its passengers and their seats in one transaction.
    ///
    /// Validation and storage failures roll everything back. Running out of
    /// seats is not a failure: affected passengers are waiting-listed.
    pub async fn create_booking_with_passengers(
        &self,
        request: CreateBookingRequest,
    ) -> CoreResult<BookingWithPassengers> {
        let wrap = |source: CoreError| CoreError::BookingFailed { source: Box::new(source) };

        let validated = validate_request(&request, &self.reference).map_err(wrap)?;

        let mut tx = self.store.begin().await.map_err(wrap)?;
        let result = self
            .create_in_tx(tx.as_mut(), &request, validated.status.id(), &validated.passengers)
            .await;

        match result {
            Ok((created, report)) => {
                tx.commit().await.map_err(wrap)?;
                info!(
                    "Booking {} (PNR {}) created for user {} with {} passenger(s): {} seated, {} waiting-listed",
                    created.booking.id,
                    created.booking.pnr,
                    created.booking.user_id,
                    created.passengers.len(),
                    report.assigned(),
                    report.waiting_listed()
                );
                Ok(created)
            }
            Err(e) => {
                error!("Booking creation for user {} rolled back: {}", request.user_id, e);
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(wrap(e))
            }
        }
    }

    async fn create_in_tx(
        &self,
        tx: &mut dyn BookingTx,
        request: &CreateBookingRequest,
        status_id: StatusId,
        passengers: &[ValidPassenger],
    ) -> CoreResult<(BookingWithPassengers, AllocationReport)> {
        // 1. Preconditions on the transaction's own connection
        self.check_preconditions(tx, request, passengers).await?;

        // 2. Booking row
        let new_booking = NewBooking {
            id: Uuid::new_v4(),
            pnr: generate_pnr(),
            user_id: request.user_id,
            schedule_id: request.schedule_id,
            from_station_id: request.from_station_id,
            to_station_id: request.to_station_id,
            status_id,
            total_amount: request.total_amount,
        };
        let booking = tx
            .insert_booking(&new_booking)
            .await
            .map_err(|e| CoreError::step("create booking record", e))?;

        // 3. Passenger profiles and booking-scoped snapshots
        let mut booked: Vec<BookedPassenger> = Vec::with_capacity(passengers.len());
        for passenger in passengers {
            let profile = resolve_passenger(tx, request.user_id, passenger)
                .await
                .map_err(|e| CoreError::step(format!("resolve passenger {}", passenger.name), e))?;

            let entry = NewBookedPassenger {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                passenger_id: profile.id,
                name: passenger.name.clone(),
                gender: passenger.gender,
                age: passenger.age,
                coach_type_id: passenger.coach_type_id,
            };
            let row = tx.insert_booked_passenger(&entry).await.map_err(|e| {
                CoreError::step(format!("create booked passenger entry for {}", passenger.name), e)
            })?;
            booked.push(row);
        }

        // 4. Seats, inside the same transaction
        let report = self
            .allocator
            .allocate(tx, booking.id, booking.schedule_id, &booked)
            .await;

        let view = self.load_view(tx, booking).await?;
        Ok((view, report))
    }

    async fn check_preconditions(
        &self,
        tx: &mut dyn BookingTx,
        request: &CreateBookingRequest,
        passengers: &[ValidPassenger],
    ) -> CoreResult<()> {
        if !tx.user_exists(request.user_id).await? {
            return Err(CoreError::Validation(format!("User not found: {}", request.user_id)));
        }

        let train_id = tx
            .schedule_train(request.schedule_id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("Schedule not found: {}", request.schedule_id)))?;

        for station_id in [request.from_station_id, request.to_station_id] {
            if !tx.station_exists(station_id).await? {
                return Err(CoreError::Validation(format!("Station not found: {}", station_id)));
            }
        }

        let stops = tx
            .count_route_stops(request.schedule_id, request.from_station_id, request.to_station_id)
            .await?;
        if stops < 2 {
            return Err(CoreError::Validation(format!(
                "Route not available: schedule {} does not serve both stations {} and {}",
                request.schedule_id, request.from_station_id, request.to_station_id
            )));
        }

        let mut requested: Vec<CoachTypeId> = Vec::new();
        for passenger in passengers {
            if !requested.contains(&passenger.coach_type_id) {
                requested.push(passenger.coach_type_id);
            }
        }
        for coach_type_id in requested {
            if !tx.train_has_coach_type(train_id, coach_type_id).await? {
                let name = self.reference.coach_type_name(coach_type_id)?;
                return Err(CoreError::Validation(format!(
                    "Train does not have coaches of type {}",
                    name
                )));
            }
        }

        Ok(())
    }

    async fn load_view(&self, tx: &mut dyn BookingTx, booking: Booking) -> CoreResult<BookingWithPassengers> {
        let passengers = tx
            .list_booked_passengers(booking.id)
            .await
            .map_err(|e| CoreError::step("load booked passengers", e))?;
        let status = self.reference.status_name(booking.status_id)?.to_string();
        Ok(BookingWithPassengers { booking, status, passengers })
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> CoreResult<BookingWithPassengers> {
        let mut tx = self.store.begin().await?;
        let result = self.get_in_tx(tx.as_mut(), booking_id).await;
        finish_transaction(tx, result).await
    }

    async fn get_in_tx(&self, tx: &mut dyn BookingTx, booking_id: Uuid) -> CoreResult<BookingWithPassengers> {
        let booking = tx
            .find_booking(booking_id, false)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))?;
        self.load_view(tx, booking).await
    }

    /// Set a booking to Confirmed, optionally completing one of its payments
    /// in the same transaction.
    pub async fn confirm_booking(&self, booking_id: Uuid, payment_id: Option<Uuid>) -> CoreResult<Booking> {
        let mut tx = self.store.begin().await?;
        let result = self.confirm_in_tx(tx.as_mut(), booking_id, payment_id).await;
        let booking = finish_transaction(tx, result).await?;
        info!("Booking {} confirmed", booking_id);
        Ok(booking)
    }

    async fn confirm_in_tx(
        &self,
        tx: &mut dyn BookingTx,
        booking_id: Uuid,
        payment_id: Option<Uuid>,
    ) -> CoreResult<Booking> {
        let booking = tx
            .find_booking(booking_id, true)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))?;

        if self.reference.is_cancelled(booking.status_id) {
            return Err(CoreError::InvalidTransition {
                from: names::CANCELLED.to_string(),
                to: names::CONFIRMED.to_string(),
            });
        }

        let confirmed = self.reference.active_status_named(names::CONFIRMED)?;
        let updated = tx
            .update_booking_status(booking_id, confirmed)
            .await
            .map_err(|e| CoreError::step("update booking status", e))?;

        if let Some(payment_id) = payment_id {
            let payment = tx
                .find_payment(payment_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("Payment {}", payment_id)))?;
            if payment.booking_id != booking_id {
                return Err(CoreError::Validation(format!(
                    "Payment {} does not belong to booking {}",
                    payment_id, booking_id
                )));
            }
            let completed = self.reference.payment_status_id(names::PAYMENT_COMPLETED)?;
            tx.update_payment_status(payment_id, completed)
                .await
                .map_err(|e| CoreError::step("update payment status", e))?;
        }

        Ok(updated)
    }

    /// The only way to move a booking to Cancelled.
    pub async fn cancel_booking(&self, booking_id: Uuid) -> CoreResult<CancellationOutcome> {
        self.cancellation.cancel(booking_id).await
    }

    /// Seats of a coach type still free on a schedule.
    pub async fn available_seats(&self, schedule_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<i64> {
        self.reference.coach_type_name(coach_type_id)?;

        let mut tx = self.store.begin().await?;
        let result = count_available(tx.as_mut(), schedule_id, coach_type_id).await;
        finish_transaction(tx, result).await
    }
}

async fn count_available(tx: &mut dyn BookingTx, schedule_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<i64> {
    let train_id = tx
        .schedule_train(schedule_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Schedule {}", schedule_id)))?;
    tx.count_free_seats(schedule_id, train_id, coach_type_id).await
}

/// Upsert-by-identity: email when given, otherwise the exact profile tuple.
async fn resolve_passenger(
    tx: &mut dyn BookingTx,
    user_id: Uuid,
    passenger: &ValidPassenger,
) -> CoreResult<Passenger> {
    tx.lock_passenger_identity(&identity_key(user_id, passenger)).await?;

    let resolved = match passenger.email.as_deref() {
        Some(email) => match tx.find_passenger_by_email(user_id, email).await? {
            Some(existing) => {
                tx.update_passenger_profile(existing.id, &passenger.name, passenger.age, passenger.gender)
                    .await?
            }
            None => tx.insert_passenger(&new_passenger(user_id, passenger)).await?,
        },
        None => {
            match tx
                .find_passenger_by_profile(user_id, &passenger.name, passenger.age, passenger.gender)
                .await?
            {
                Some(existing) => existing,
                None => tx.insert_passenger(&new_passenger(user_id, passenger)).await?,
            }
        }
    };

    // The row must still belong to the requesting user
    match tx.passenger_owner(resolved.id).await? {
        Some(owner) if owner == user_id => Ok(resolved),
        _ => Err(CoreError::Validation(format!(
            "Passenger {} does not belong to user {}",
            resolved.id, user_id
        ))),
    }
}

/// Key naming the identity a passenger resolves to.
fn identity_key(user_id: Uuid, passenger: &ValidPassenger) -> String {
    match passenger.email.as_deref() {
        Some(email) => format!("passenger:{}:email:{}", user_id, email),
        None => format!(
            "passenger:{}:profile:{}:{}:{}",
            user_id,
            passenger.name,
            passenger.age,
            passenger.gender.as_str()
        ),
    }
}

fn new_passenger(user_id: Uuid, passenger: &ValidPassenger) -> NewPassenger {
    NewPassenger {
        id: Uuid::new_v4(),
        user_id,
        name: passenger.name.clone(),
        age: passenger.age,
        gender: passenger.gender,
        email: passenger.email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Gender;

    fn traveller(email: Option<&str>) -> ValidPassenger {
        ValidPassenger {
            name: "Meera Iyer".to_string(),
            age: 29,
            gender: Gender::Female,
            email: email.map(str::to_string),
            coach_type_id: CoachTypeId(2),
        }
    }

    #[test]
    fn test_identity_key_prefers_email() {
        let user = Uuid::new_v4();
        let mut older = traveller(Some("meera@example.com"));
        older.age = 30;

        assert_eq!(
            identity_key(user, &traveller(Some("meera@example.com"))),
            identity_key(user, &older)
        );
        assert_ne!(
            identity_key(user, &traveller(Some("meera@example.com"))),
            identity_key(Uuid::new_v4(), &traveller(Some("meera@example.com")))
        );
    }

    #[test]
    fn test_identity_key_without_email_uses_profile() {
        let user = Uuid::new_v4();
        let mut older = traveller(None);
        older.age = 30;

        assert_eq!(identity_key(user, &traveller(None)), identity_key(user, &traveller(None)));
        assert_ne!(identity_key(user, &traveller(None)), identity_key(user, &older));
        assert_ne!(
            identity_key(user, &traveller(None)),
            identity_key(user, &traveller(Some("meera@example.com")))
        );
    }
}
