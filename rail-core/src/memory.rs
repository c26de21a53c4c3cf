//! In-memory [`BookingStore`] with the same transactional contract as the
//! PostgreSQL store.
//!
//! Transactions are serialized: `begin` takes the store lock and works on a
//! private copy that `commit` writes back. Dropping or rolling back discards
//! the copy. Failure points can be armed to exercise rollback paths.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    AuditLog, BookedPassenger, BookedPassengerView, BookedSeat, Booking, Gender, NewAuditLog,
    NewBookedPassenger, NewBookedSeat, NewBooking, NewPassenger, NewRefund, Passenger, Payment,
    Refund, SeatAssignment, SeatPlacement,
};
use crate::reference::{
    names, ActiveStatus, CancelledStatus, CoachTypeId, LookupRow, PaymentStatusId, ReferenceData,
    StatusId,
};
use crate::repository::{BookingStore, BookingTx};
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertBooking,
    InsertPassenger,
    InsertBookedPassenger,
    FindFreeSeat,
    ClaimSeat,
    /// `claim_seat` reports the seat as already held, as when a concurrent
    /// booking commits its claim first.
    SeatTaken,
    /// `seat_placement` places the candidate on a coach of another type.
    SeatMoved,
    DeleteBookedSeats,
    DeleteBookedPassengers,
    InsertRefund,
    MarkCancelled,
    InsertAuditLog,
    UpdatePaymentStatus,
    Commit,
}

#[derive(Debug, Clone)]
pub struct CoachRow {
    pub id: Uuid,
    pub train_id: Uuid,
    pub code: String,
    pub coach_type_id: CoachTypeId,
    pub fare_per_km: i64,
}

#[derive(Debug, Clone)]
pub struct SeatRow {
    pub id: Uuid,
    pub coach_id: Uuid,
    pub seat_number: i32,
    pub seat_type: String,
}

#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: Uuid,
    pub train_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct StopRow {
    pub schedule_id: Uuid,
    pub station_id: Uuid,
    pub sequence: i32,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub users: Vec<Uuid>,
    pub stations: Vec<Uuid>,
    pub trains: Vec<Uuid>,
    pub coaches: Vec<CoachRow>,
    pub seats: Vec<SeatRow>,
    pub schedules: Vec<ScheduleRow>,
    pub schedule_stops: Vec<StopRow>,
    pub bookings: Vec<Booking>,
    pub passengers: Vec<Passenger>,
    pub booked_passengers: Vec<BookedPassenger>,
    pub booked_seats: Vec<BookedSeat>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<Refund>,
    pub audit_logs: Vec<AuditLog>,
    pub booking_statuses: Vec<LookupRow>,
    pub payment_statuses: Vec<LookupRow>,
    pub refund_statuses: Vec<LookupRow>,
    pub coach_types: Vec<LookupRow>,
    failures: HashSet<FailPoint>,
}

impl MemoryState {
    fn check(&self, point: FailPoint) -> CoreResult<()> {
        if self.failures.contains(&point) {
            return Err(CoreError::Storage(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn armed(&self, point: FailPoint) -> bool {
        self.failures.contains(&point)
    }

    fn cancelled_id(&self) -> Option<StatusId> {
        self.booking_statuses
            .iter()
            .find(|row| row.name == names::CANCELLED)
            .map(|row| StatusId(row.id))
    }

    fn booking(&self, booking_id: Uuid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == booking_id)
    }

    /// Seats held on the schedule by bookings that are not cancelled.
    fn held_seats(&self, schedule_id: Uuid) -> HashSet<Uuid> {
        let cancelled = self.cancelled_id();
        self.booked_seats
            .iter()
            .filter(|bs| {
                self.booking(bs.booking_id)
                    .map(|b| b.schedule_id == schedule_id && Some(b.status_id) != cancelled)
                    .unwrap_or(false)
            })
            .map(|bs| bs.seat_id)
            .collect()
    }

    fn free_seats(&self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> Vec<SeatAssignment> {
        let held = self.held_seats(schedule_id);
        let mut free: Vec<SeatAssignment> = self
            .seats
            .iter()
            .filter(|seat| !held.contains(&seat.id))
            .filter_map(|seat| {
                let coach = self.coaches.iter().find(|c| c.id == seat.coach_id)?;
                if coach.train_id != train_id || coach.coach_type_id != coach_type_id {
                    return None;
                }
                Some(SeatAssignment {
                    seat_id: seat.id,
                    seat_number: seat.seat_number,
                    seat_type: seat.seat_type.clone(),
                    coach_id: coach.id,
                    coach_code: coach.code.clone(),
                })
            })
            .collect();
        free.sort_by(|a, b| {
            a.coach_code
                .cmp(&b.coach_code)
                .then(a.seat_number.cmp(&b.seat_number))
        });
        free
    }

    fn seat_assignment(&self, seat_id: Uuid) -> Option<SeatAssignment> {
        let seat = self.seats.iter().find(|s| s.id == seat_id)?;
        let coach = self.coaches.iter().find(|c| c.id == seat.coach_id)?;
        Some(SeatAssignment {
            seat_id: seat.id,
            seat_number: seat.seat_number,
            seat_type: seat.seat_type.clone(),
            coach_id: coach.id,
            coach_code: coach.code.clone(),
        })
    }
}

fn seeded_state() -> MemoryState {
    let rows = |labels: &[&str]| -> Vec<LookupRow> {
        labels
            .iter()
            .enumerate()
            .map(|(i, name)| LookupRow::new(i as i32 + 1, name))
            .collect()
    };

    MemoryState {
        booking_statuses: rows(&[names::CONFIRMED, names::WAITING, names::RAC, names::CANCELLED]),
        payment_statuses: rows(&[
            names::PAYMENT_PENDING,
            names::PAYMENT_COMPLETED,
            names::PAYMENT_FAILED,
            names::PAYMENT_REFUNDED,
        ]),
        refund_statuses: rows(&[
            names::REFUND_REQUESTED,
            names::REFUND_PROCESSING,
            names::REFUND_COMPLETED,
            names::REFUND_REJECTED,
        ]),
        coach_types: rows(&["AC First Class", "AC 2 Tier", "AC 3 Tier", "Sleeper Class", "Second Sitting"]),
        ..MemoryState::default()
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Empty store with the standard lookup rows.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(seeded_state())),
        }
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn fail_on(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    pub async fn add_user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.users.push(id);
        id
    }

    pub async fn add_station(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.stations.push(id);
        id
    }

    pub async fn add_train(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.trains.push(id);
        id
    }

    pub async fn add_coach(&self, train_id: Uuid, code: &str, coach_type_id: CoachTypeId, fare_per_km: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.coaches.push(CoachRow {
            id,
            train_id,
            code: code.to_string(),
            coach_type_id,
            fare_per_km,
        });
        id
    }

    pub async fn add_seat(&self, coach_id: Uuid, seat_number: i32, seat_type: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.seats.push(SeatRow {
            id,
            coach_id,
            seat_number,
            seat_type: seat_type.to_string(),
        });
        id
    }

    /// Seats numbered 1..=count.
    pub async fn add_seats(&self, coach_id: Uuid, count: i32, seat_type: &str) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count.max(0) as usize);
        for number in 1..=count {
            ids.push(self.add_seat(coach_id, number, seat_type).await);
        }
        ids
    }

    /// Schedule stopping at `stations` in order.
    pub async fn add_schedule(&self, train_id: Uuid, stations: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        state.schedules.push(ScheduleRow { id, train_id });
        for (i, station_id) in stations.iter().enumerate() {
            state.schedule_stops.push(StopRow {
                schedule_id: id,
                station_id: *station_id,
                sequence: i as i32 + 1,
            });
        }
        id
    }

    pub async fn add_payment(&self, booking_id: Uuid, amount: i64, status: &str) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        let status_id = state
            .payment_statuses
            .iter()
            .find(|row| row.name == status)
            .map(|row| PaymentStatusId(row.id))
            .ok_or_else(|| CoreError::Validation(format!("Unknown payment status: {}", status)))?;
        if state.booking(booking_id).is_none() {
            return Err(CoreError::NotFound(format!("Booking {}", booking_id)));
        }
        state.payments.push(Payment {
            id,
            booking_id,
            amount,
            status_id,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn begin(&self) -> CoreResult<Box<dyn BookingTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            savepoints: Vec::new(),
        }))
    }

    async fn load_reference_data(&self) -> CoreResult<ReferenceData> {
        let state = self.state.lock().await;
        ReferenceData::from_rows(
            state.booking_statuses.clone(),
            state.payment_statuses.clone(),
            state.refund_statuses.clone(),
            state.coach_types.clone(),
        )
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    savepoints: Vec<(String, MemoryState)>,
}

fn foreign_key(what: &str, id: Uuid) -> CoreError {
    CoreError::Storage(format!("foreign key violation: {} {} does not exist", what, id))
}

#[async_trait]
impl BookingTx for MemoryTx {
    async fn user_exists(&mut self, user_id: Uuid) -> CoreResult<bool> {
        Ok(self.work.users.contains(&user_id))
    }

    async fn station_exists(&mut self, station_id: Uuid) -> CoreResult<bool> {
        Ok(self.work.stations.contains(&station_id))
    }

    async fn schedule_train(&mut self, schedule_id: Uuid) -> CoreResult<Option<Uuid>> {
        Ok(self
            .work
            .schedules
            .iter()
            .find(|s| s.id == schedule_id)
            .map(|s| s.train_id))
    }

    async fn count_route_stops(&mut self, schedule_id: Uuid, from_station_id: Uuid, to_station_id: Uuid) -> CoreResult<i64> {
        Ok(self
            .work
            .schedule_stops
            .iter()
            .filter(|stop| stop.schedule_id == schedule_id)
            .filter(|stop| stop.station_id == from_station_id || stop.station_id == to_station_id)
            .count() as i64)
    }

    async fn train_has_coach_type(&mut self, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<bool> {
        Ok(self
            .work
            .coaches
            .iter()
            .any(|c| c.train_id == train_id && c.coach_type_id == coach_type_id))
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking> {
        self.work.check(FailPoint::InsertBooking)?;
        if !self.work.users.contains(&booking.user_id) {
            return Err(foreign_key("user", booking.user_id));
        }
        let row = Booking {
            id: booking.id,
            pnr: booking.pnr.clone(),
            user_id: booking.user_id,
            schedule_id: booking.schedule_id,
            from_station_id: booking.from_station_id,
            to_station_id: booking.to_station_id,
            status_id: booking.status_id,
            total_amount: booking.total_amount,
            booked_at: Utc::now(),
        };
        self.work.bookings.push(row.clone());
        Ok(row)
    }

    async fn find_booking(&mut self, booking_id: Uuid, _for_update: bool) -> CoreResult<Option<Booking>> {
        Ok(self.work.booking(booking_id).cloned())
    }

    async fn update_booking_status(&mut self, booking_id: Uuid, status: ActiveStatus) -> CoreResult<Booking> {
        let booking = self
            .work
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))?;
        booking.status_id = status.id();
        Ok(booking.clone())
    }

    async fn mark_booking_cancelled(&mut self, booking_id: Uuid, status: CancelledStatus) -> CoreResult<Booking> {
        self.work.check(FailPoint::MarkCancelled)?;
        let booking = self
            .work
            .bookings
            .iter_mut()
            .find(|b| b.id == booking_id)
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))?;
        booking.status_id = status.id();
        Ok(booking.clone())
    }

    async fn find_passenger_by_email(&mut self, user_id: Uuid, email: &str) -> CoreResult<Option<Passenger>> {
        Ok(self
            .work
            .passengers
            .iter()
            .find(|p| p.user_id == user_id && p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_passenger_by_profile(&mut self, user_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Option<Passenger>> {
        Ok(self
            .work
            .passengers
            .iter()
            .find(|p| p.user_id == user_id && p.name == name && p.age == age && p.gender == gender)
            .cloned())
    }

    async fn insert_passenger(&mut self, passenger: &NewPassenger) -> CoreResult<Passenger> {
        self.work.check(FailPoint::InsertPassenger)?;
        let row = Passenger {
            id: passenger.id,
            user_id: passenger.user_id,
            name: passenger.name.clone(),
            age: passenger.age,
            gender: passenger.gender,
            email: passenger.email.clone(),
        };
        self.work.passengers.push(row.clone());
        Ok(row)
    }

    async fn update_passenger_profile(&mut self, passenger_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Passenger> {
        let passenger = self
            .work
            .passengers
            .iter_mut()
            .find(|p| p.id == passenger_id)
            .ok_or_else(|| CoreError::NotFound(format!("Passenger {}", passenger_id)))?;
        passenger.name = name.to_string();
        passenger.age = age;
        passenger.gender = gender;
        Ok(passenger.clone())
    }

    async fn lock_passenger_identity(&mut self, _identity: &str) -> CoreResult<()> {
        // Transactions already hold the store lock
        Ok(())
    }

    async fn passenger_owner(&mut self, passenger_id: Uuid) -> CoreResult<Option<Uuid>> {
        Ok(self
            .work
            .passengers
            .iter()
            .find(|p| p.id == passenger_id)
            .map(|p| p.user_id))
    }

    async fn insert_booked_passenger(&mut self, entry: &NewBookedPassenger) -> CoreResult<BookedPassenger> {
        self.work.check(FailPoint::InsertBookedPassenger)?;
        if self.work.booking(entry.booking_id).is_none() {
            return Err(foreign_key("booking", entry.booking_id));
        }
        if !self.work.passengers.iter().any(|p| p.id == entry.passenger_id) {
            return Err(foreign_key("passenger", entry.passenger_id));
        }
        let row = BookedPassenger {
            id: entry.id,
            booking_id: entry.booking_id,
            passenger_id: entry.passenger_id,
            name: entry.name.clone(),
            gender: entry.gender,
            age: entry.age,
            coach_type_id: entry.coach_type_id,
        };
        self.work.booked_passengers.push(row.clone());
        Ok(row)
    }

    async fn list_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<Vec<BookedPassengerView>> {
        let state = &self.work;
        Ok(state
            .booked_passengers
            .iter()
            .filter(|bp| bp.booking_id == booking_id)
            .map(|bp| {
                let seat = state
                    .booked_seats
                    .iter()
                    .find(|bs| bs.booked_passenger_id == bp.id)
                    .and_then(|bs| state.seat_assignment(bs.seat_id));
                BookedPassengerView {
                    passenger: bp.clone(),
                    seat,
                }
            })
            .collect())
    }

    async fn delete_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<u64> {
        self.work.check(FailPoint::DeleteBookedPassengers)?;
        let before = self.work.booked_passengers.len();
        self.work.booked_passengers.retain(|bp| bp.booking_id != booking_id);
        Ok((before - self.work.booked_passengers.len()) as u64)
    }

    async fn find_free_seat(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<Option<SeatAssignment>> {
        self.work.check(FailPoint::FindFreeSeat)?;
        Ok(self
            .work
            .free_seats(schedule_id, train_id, coach_type_id)
            .into_iter()
            .next())
    }

    async fn count_free_seats(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<i64> {
        Ok(self.work.free_seats(schedule_id, train_id, coach_type_id).len() as i64)
    }

    async fn seat_placement(&mut self, seat_id: Uuid) -> CoreResult<Option<SeatPlacement>> {
        let state = &self.work;
        let moved = state.armed(FailPoint::SeatMoved);
        Ok(state.seats.iter().find(|s| s.id == seat_id).and_then(|seat| {
            state
                .coaches
                .iter()
                .find(|c| c.id == seat.coach_id)
                .map(|coach| SeatPlacement {
                    seat_id: seat.id,
                    coach_id: coach.id,
                    coach_type_id: if moved {
                        CoachTypeId(coach.coach_type_id.0 + 100)
                    } else {
                        coach.coach_type_id
                    },
                    train_id: coach.train_id,
                })
        }))
    }

    async fn claim_seat(&mut self, claim: &NewBookedSeat) -> CoreResult<Option<BookedSeat>> {
        self.work.check(FailPoint::ClaimSeat)?;
        if !self.work.booked_passengers.iter().any(|bp| bp.id == claim.booked_passenger_id) {
            return Err(foreign_key("booked passenger", claim.booked_passenger_id));
        }
        if self.work.armed(FailPoint::SeatTaken) {
            return Ok(None);
        }
        // UNIQUE (schedule_id, seat_id)
        let taken = self
            .work
            .booked_seats
            .iter()
            .any(|bs| bs.schedule_id == claim.schedule_id && bs.seat_id == claim.seat_id);
        if taken {
            return Ok(None);
        }
        let row = BookedSeat {
            id: claim.id,
            booking_id: claim.booking_id,
            booked_passenger_id: claim.booked_passenger_id,
            seat_id: claim.seat_id,
            schedule_id: claim.schedule_id,
        };
        self.work.booked_seats.push(row.clone());
        Ok(Some(row))
    }

    async fn delete_booked_seats(&mut self, booking_id: Uuid) -> CoreResult<u64> {
        self.work.check(FailPoint::DeleteBookedSeats)?;
        let before = self.work.booked_seats.len();
        self.work.booked_seats.retain(|bs| bs.booking_id != booking_id);
        Ok((before - self.work.booked_seats.len()) as u64)
    }

    async fn find_payment(&mut self, payment_id: Uuid) -> CoreResult<Option<Payment>> {
        Ok(self.work.payments.iter().find(|p| p.id == payment_id).cloned())
    }

    async fn latest_payment_with_status(&mut self, booking_id: Uuid, status: PaymentStatusId) -> CoreResult<Option<Payment>> {
        Ok(self
            .work
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id && p.status_id == status)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn update_payment_status(&mut self, payment_id: Uuid, status: PaymentStatusId) -> CoreResult<Payment> {
        self.work.check(FailPoint::UpdatePaymentStatus)?;
        let payment = self
            .work
            .payments
            .iter_mut()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| CoreError::NotFound(format!("Payment {}", payment_id)))?;
        payment.status_id = status;
        Ok(payment.clone())
    }

    async fn insert_refund(&mut self, refund: &NewRefund) -> CoreResult<Refund> {
        self.work.check(FailPoint::InsertRefund)?;
        if !self.work.payments.iter().any(|p| p.id == refund.payment_id) {
            return Err(foreign_key("payment", refund.payment_id));
        }
        let row = Refund {
            id: refund.id,
            payment_id: refund.payment_id,
            amount: refund.amount,
            status_id: refund.status_id,
            created_at: Utc::now(),
        };
        self.work.refunds.push(row.clone());
        Ok(row)
    }

    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> CoreResult<AuditLog> {
        self.work.check(FailPoint::InsertAuditLog)?;
        let row = AuditLog {
            id: entry.id,
            actor_id: entry.actor_id,
            action: entry.action.clone(),
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id,
            details: entry.details.clone(),
            created_at: Utc::now(),
        };
        self.work.audit_logs.push(row.clone());
        Ok(row)
    }

    async fn savepoint(&mut self, name: &str) -> CoreResult<()> {
        self.savepoints.push((name.to_string(), self.work.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> CoreResult<()> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| CoreError::Storage(format!("savepoint {} does not exist", name)))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> CoreResult<()> {
        let pos = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| CoreError::Storage(format!("savepoint {} does not exist", name)))?;
        // The savepoint itself survives a rollback to it
        self.savepoints.truncate(pos + 1);
        self.work = self.savepoints[pos].1.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let MemoryTx { mut guard, work, .. } = *self;
        work.check(FailPoint::Commit)?;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        let user = store.add_user().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_passenger(&NewPassenger {
            id: Uuid::new_v4(),
            user_id: user,
            name: "Leela".to_string(),
            age: 31,
            gender: Gender::Female,
            email: None,
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.snapshot().await.passengers.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_to_savepoint_restores_state() {
        let store = MemoryStore::new();
        let user = store.add_user().await;

        let mut tx = store.begin().await.unwrap();
        tx.savepoint("sp").await.unwrap();
        tx.insert_passenger(&NewPassenger {
            id: Uuid::new_v4(),
            user_id: user,
            name: "Dev".to_string(),
            age: 52,
            gender: Gender::Male,
            email: Some("dev@example.com".to_string()),
        })
        .await
        .unwrap();
        tx.rollback_to_savepoint("sp").await.unwrap();
        tx.release_savepoint("sp").await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.snapshot().await.passengers.is_empty());
    }

    #[tokio::test]
    async fn test_free_seats_are_ordered_by_coach_then_number() {
        let store = MemoryStore::new();
        let train = store.add_train().await;
        let b1 = store.add_coach(train, "B1", CoachTypeId(2), 3).await;
        let a1 = store.add_coach(train, "A1", CoachTypeId(2), 3).await;
        store.add_seat(b1, 1, "Lower").await;
        store.add_seat(a1, 2, "Upper").await;
        store.add_seat(a1, 1, "Lower").await;
        let station_a = store.add_station().await;
        let station_b = store.add_station().await;
        let schedule = store.add_schedule(train, &[station_a, station_b]).await;

        let state = store.snapshot().await;
        let free = state.free_seats(schedule, train, CoachTypeId(2));
        let order: Vec<(String, i32)> = free.iter().map(|s| (s.coach_code.clone(), s.seat_number)).collect();
        assert_eq!(
            order,
            vec![("A1".to_string(), 1), ("A1".to_string(), 2), ("B1".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_store_untouched() {
        let store = MemoryStore::new();
        let user = store.add_user().await;
        store.fail_on(FailPoint::Commit).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_passenger(&NewPassenger {
            id: Uuid::new_v4(),
            user_id: user,
            name: "Ira".to_string(),
            age: 8,
            gender: Gender::Other,
            email: None,
        })
        .await
        .unwrap();
        assert!(tx.commit().await.is_err());

        assert!(store.snapshot().await.passengers.is_empty());
    }
}
