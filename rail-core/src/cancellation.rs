use std::sync::Arc;
use serde::Serialize;
use uuid::Uuid;
use tracing::{error, info};

use crate::models::{Booking, NewAuditLog, NewRefund, Refund};
use crate::reference::{names, ReferenceData};
use crate::repository::{BookingStore, BookingTx};
use crate::{CoreError, CoreResult};

pub const AUDIT_ACTION: &str = "BOOKING_CANCELLED";

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub booking: Booking,
    pub status: String,
    pub seats_released: u64,
    pub passengers_removed: u64,
    pub refund: Option<Refund>,
    /// True when the booking was already cancelled and nothing ran.
    pub already_cancelled: bool,
}

/// Moves a booking to Cancelled and undoes its side effects in one transaction:
/// seats released, booked passengers removed, refund requested for a completed
/// payment, audit row written. Either all of it happens or none of it does.
pub struct CancellationCascade {
    store: Arc<dyn BookingStore>,
    reference: Arc<ReferenceData>,
}

impl CancellationCascade {
    pub fn new(store: Arc<dyn BookingStore>, reference: Arc<ReferenceData>) -> Self {
        Self { store, reference }
    }

    pub async fn cancel(&self, booking_id: Uuid) -> CoreResult<CancellationOutcome> {
        let mut tx = self.store.begin().await?;

        match self.cancel_in_tx(tx.as_mut(), booking_id).await {
            Ok(outcome) => {
                tx.commit().await?;
                if !outcome.already_cancelled {
                    info!(
                        "Booking {} cancelled: {} seat(s) released, {} passenger(s) removed, refund {}",
                        booking_id,
                        outcome.seats_released,
                        outcome.passengers_removed,
                        outcome
                            .refund
                            .as_ref()
                            .map(|r| r.id.to_string())
                            .unwrap_or_else(|| "none".to_string())
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                error!("Cancellation of booking {} rolled back: {}", booking_id, e);
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn cancel_in_tx(&self, tx: &mut dyn BookingTx, booking_id: Uuid) -> CoreResult<CancellationOutcome> {
        let booking = tx
            .find_booking(booking_id, true)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))?;

        // Cancelled is terminal; the cascade runs once
        if self.reference.is_cancelled(booking.status_id) {
            info!("Booking {} is already cancelled", booking_id);
            return Ok(CancellationOutcome {
                booking,
                status: names::CANCELLED.to_string(),
                seats_released: 0,
                passengers_removed: 0,
                refund: None,
                already_cancelled: true,
            });
        }
        let old_status = self.reference.status_name(booking.status_id)?.to_string();

        // 1. Free the seats
        let seats_released = tx
            .delete_booked_seats(booking_id)
            .await
            .map_err(|e| CoreError::step("release booked seats", e))?;

        // 2. Drop booking-scoped passenger snapshots
        let passengers_removed = tx
            .delete_booked_passengers(booking_id)
            .await
            .map_err(|e| CoreError::step("remove booked passengers", e))?;

        // 3. Refund the completed payment in full
        let completed = self.reference.payment_status_id(names::PAYMENT_COMPLETED)?;
        let refund = match tx.latest_payment_with_status(booking_id, completed).await? {
            Some(payment) => {
                let requested = self.reference.refund_status_id(names::REFUND_REQUESTED)?;
                let refund = tx
                    .insert_refund(&NewRefund {
                        id: Uuid::new_v4(),
                        payment_id: payment.id,
                        amount: booking.total_amount,
                        status_id: requested,
                    })
                    .await
                    .map_err(|e| CoreError::step("create refund request", e))?;
                Some(refund)
            }
            None => None,
        };

        let cancelled = tx
            .mark_booking_cancelled(booking_id, self.reference.cancelled_status())
            .await
            .map_err(|e| CoreError::step("update booking status", e))?;

        // 4. Audit trail
        tx.insert_audit_log(&NewAuditLog {
            id: Uuid::new_v4(),
            actor_id: Some(booking.user_id),
            action: AUDIT_ACTION.to_string(),
            entity_type: "booking".to_string(),
            entity_id: booking_id,
            details: serde_json::json!({
                "old_status": old_status,
                "new_status": names::CANCELLED,
                "seats_released": seats_released,
                "passengers_removed": passengers_removed,
                "refund_id": refund.as_ref().map(|r| r.id),
            }),
        })
        .await
        .map_err(|e| CoreError::step("write audit log", e))?;

        Ok(CancellationOutcome {
            booking: cancelled,
            status: names::CANCELLED.to_string(),
            seats_released,
            passengers_removed,
            refund,
            already_cancelled: false,
        })
    }
}
