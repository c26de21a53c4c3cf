use serde::Serialize;
use uuid::Uuid;
use tracing::{debug, warn};

use crate::models::{BookedPassenger, NewBookedSeat, SeatAssignment};
use crate::repository::BookingTx;
use crate::{CoreError, CoreResult};

const SAVEPOINT: &str = "seat_allocation";

/// Why a passenger ended up on the waiting list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitReason {
    CoachTypeNotOffered,
    NoSeatAvailable,
    SeatMismatch,
    SeatTaken,
    Failed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationOutcome {
    Assigned { seat: SeatAssignment },
    WaitingListed { reason: WaitReason },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationReport {
    pub outcomes: Vec<(Uuid, AllocationOutcome)>,
}

impl AllocationReport {
    pub fn assigned(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, AllocationOutcome::Assigned { .. }))
            .count()
    }

    pub fn waiting_listed(&self) -> usize {
        self.outcomes.len() - self.assigned()
    }
}

/// Assigns at most one free seat per booked passenger.
///
/// Allocation never fails the booking: every problem degrades to the waiting
/// list. Each passenger runs inside its own savepoint so a failed statement
/// cannot poison the surrounding transaction.
#[derive(Debug, Clone, Default)]
pub struct SeatAllocator;

impl SeatAllocator {
    pub fn new() -> Self {
        Self
    }

    /// Passengers are handled in order; the free-seat query is re-run for
    /// each one, so seats claimed earlier in the same booking are excluded.
    pub async fn allocate(
        &self,
        tx: &mut dyn BookingTx,
        booking_id: Uuid,
        schedule_id: Uuid,
        passengers: &[BookedPassenger],
    ) -> AllocationReport {
        let mut report = AllocationReport::default();

        for passenger in passengers {
            let outcome = self.allocate_guarded(tx, booking_id, schedule_id, passenger).await;
            report.outcomes.push((passenger.id, outcome));
        }

        debug!(
            "Seat allocation for booking {}: {} assigned, {} waiting-listed",
            booking_id,
            report.assigned(),
            report.waiting_listed()
        );
        report
    }

    async fn allocate_guarded(
        &self,
        tx: &mut dyn BookingTx,
        booking_id: Uuid,
        schedule_id: Uuid,
        passenger: &BookedPassenger,
    ) -> AllocationOutcome {
        if let Err(e) = tx.savepoint(SAVEPOINT).await {
            warn!("Could not open savepoint for passenger {}: {}", passenger.id, e);
            return AllocationOutcome::WaitingListed { reason: WaitReason::Failed };
        }

        match self.allocate_one(tx, booking_id, schedule_id, passenger).await {
            Ok(outcome) => match tx.release_savepoint(SAVEPOINT).await {
                Ok(()) => outcome,
                Err(e) => {
                    warn!("Could not release savepoint for passenger {}: {}", passenger.id, e);
                    self.undo(tx, passenger).await;
                    AllocationOutcome::WaitingListed { reason: WaitReason::Failed }
                }
            },
            Err(e) => {
                warn!("Seat allocation failed for passenger {} ({}): {}", passenger.name, passenger.id, e);
                self.undo(tx, passenger).await;
                AllocationOutcome::WaitingListed { reason: WaitReason::Failed }
            }
        }
    }

    async fn undo(&self, tx: &mut dyn BookingTx, passenger: &BookedPassenger) {
        if let Err(e) = tx.rollback_to_savepoint(SAVEPOINT).await {
            warn!("Could not roll back seat allocation for passenger {}: {}", passenger.id, e);
        }
    }

    async fn allocate_one(
        &self,
        tx: &mut dyn BookingTx,
        booking_id: Uuid,
        schedule_id: Uuid,
        passenger: &BookedPassenger,
    ) -> CoreResult<AllocationOutcome> {
        // 1. Resolve the schedule's train
        let train_id = tx
            .schedule_train(schedule_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Schedule {}", schedule_id)))?;

        // 2. Train must offer the requested coach type
        if !tx.train_has_coach_type(train_id, passenger.coach_type_id).await? {
            warn!(
                "Train {} has no coaches of type {} for passenger {}; waiting-listed",
                train_id, passenger.coach_type_id.0, passenger.id
            );
            return Ok(AllocationOutcome::WaitingListed { reason: WaitReason::CoachTypeNotOffered });
        }

        // 3. Lowest free seat of that type on this schedule
        let candidate = match tx.find_free_seat(schedule_id, train_id, passenger.coach_type_id).await? {
            Some(seat) => seat,
            None => {
                warn!(
                    "No seat of type {} left on schedule {} for passenger {}; waiting-listed",
                    passenger.coach_type_id.0, schedule_id, passenger.id
                );
                return Ok(AllocationOutcome::WaitingListed { reason: WaitReason::NoSeatAvailable });
            }
        };

        // 4. Re-validate the candidate against coach type and train
        let placement = tx.seat_placement(candidate.seat_id).await?;
        let matches = placement
            .as_ref()
            .map(|p| p.coach_type_id == passenger.coach_type_id && p.train_id == train_id)
            .unwrap_or(false);
        if !matches {
            warn!(
                "Seat {} does not belong to a {} coach on train {}; waiting-listed",
                candidate.seat_id, passenger.coach_type_id.0, train_id
            );
            return Ok(AllocationOutcome::WaitingListed { reason: WaitReason::SeatMismatch });
        }

        // 5. Claim it; a concurrent claim on the same seat loses here
        let claim = NewBookedSeat {
            id: Uuid::new_v4(),
            booking_id,
            booked_passenger_id: passenger.id,
            seat_id: candidate.seat_id,
            schedule_id,
        };
        match tx.claim_seat(&claim).await? {
            Some(_) => {
                debug!(
                    "Seat {}-{} assigned to passenger {}",
                    candidate.coach_code, candidate.seat_number, passenger.id
                );
                Ok(AllocationOutcome::Assigned { seat: candidate })
            }
            None => {
                warn!(
                    "Seat {} was taken concurrently; passenger {} waiting-listed",
                    candidate.seat_id, passenger.id
                );
                Ok(AllocationOutcome::WaitingListed { reason: WaitReason::SeatTaken })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat() -> SeatAssignment {
        SeatAssignment {
            seat_id: Uuid::new_v4(),
            seat_number: 1,
            seat_type: "Lower".to_string(),
            coach_id: Uuid::new_v4(),
            coach_code: "A1".to_string(),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = AllocationReport {
            outcomes: vec![
                (Uuid::new_v4(), AllocationOutcome::Assigned { seat: seat() }),
                (Uuid::new_v4(), AllocationOutcome::WaitingListed { reason: WaitReason::NoSeatAvailable }),
                (Uuid::new_v4(), AllocationOutcome::WaitingListed { reason: WaitReason::SeatTaken }),
            ],
        };
        assert_eq!(report.assigned(), 1);
        assert_eq!(report.waiting_listed(), 2);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(AllocationOutcome::WaitingListed {
            reason: WaitReason::CoachTypeNotOffered,
        })
        .unwrap();
        assert_eq!(json["outcome"], "WAITING_LISTED");
        assert_eq!(json["reason"], "COACH_TYPE_NOT_OFFERED");
    }
}
