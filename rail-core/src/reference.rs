use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{CoreError, CoreResult};

/// Canonical names of the lookup rows the booking core depends on.
pub mod names {
    pub const CONFIRMED: &str = "Confirmed";
    pub const WAITING: &str = "Waiting";
    pub const RAC: &str = "RAC";
    pub const CANCELLED: &str = "Cancelled";

    pub const PAYMENT_PENDING: &str = "Pending";
    pub const PAYMENT_COMPLETED: &str = "Completed";
    pub const PAYMENT_FAILED: &str = "Failed";
    pub const PAYMENT_REFUNDED: &str = "Refunded";

    pub const REFUND_REQUESTED: &str = "Requested";
    pub const REFUND_PROCESSING: &str = "Processing";
    pub const REFUND_COMPLETED: &str = "Completed";
    pub const REFUND_REJECTED: &str = "Rejected";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct StatusId(pub i32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CoachTypeId(pub i32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PaymentStatusId(pub i32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RefundStatusId(pub i32);

/// One row of a `(id, name)` lookup table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupRow {
    pub id: i32,
    pub name: String,
}

impl LookupRow {
    pub fn new(id: i32, name: &str) -> Self {
        Self { id, name: name.to_string() }
    }
}

/// A booking status other than Cancelled.
///
/// Only [`ReferenceData`] hands these out, so ordinary status writes can never
/// set a booking to Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveStatus(StatusId);

impl ActiveStatus {
    pub fn id(&self) -> StatusId {
        self.0
    }
}

/// Permission to write the Cancelled status.
///
/// Constructed only by the cancellation cascade; it is neither `Clone` nor
/// buildable outside this crate.
#[derive(Debug)]
pub struct CancelledStatus(StatusId);

impl CancelledStatus {
    pub fn id(&self) -> StatusId {
        self.0
    }
}

/// Lookup tables loaded once at startup.
#[derive(Debug, Clone)]
pub struct ReferenceData {
    booking_statuses: HashMap<String, StatusId>,
    booking_status_names: HashMap<StatusId, String>,
    payment_statuses: HashMap<String, PaymentStatusId>,
    refund_statuses: HashMap<String, RefundStatusId>,
    coach_types: HashMap<CoachTypeId, String>,
    coach_types_by_name: HashMap<String, CoachTypeId>,
    cancelled: StatusId,
}

impl ReferenceData {
    pub fn from_rows(
        booking_statuses: Vec<LookupRow>,
        payment_statuses: Vec<LookupRow>,
        refund_statuses: Vec<LookupRow>,
        coach_types: Vec<LookupRow>,
    ) -> CoreResult<Self> {
        let booking_status_names: HashMap<StatusId, String> = booking_statuses
            .iter()
            .map(|row| (StatusId(row.id), row.name.clone()))
            .collect();
        let booking_statuses: HashMap<String, StatusId> = booking_statuses
            .into_iter()
            .map(|row| (row.name, StatusId(row.id)))
            .collect();
        let payment_statuses: HashMap<String, PaymentStatusId> = payment_statuses
            .into_iter()
            .map(|row| (row.name, PaymentStatusId(row.id)))
            .collect();
        let refund_statuses: HashMap<String, RefundStatusId> = refund_statuses
            .into_iter()
            .map(|row| (row.name, RefundStatusId(row.id)))
            .collect();
        let coach_types_by_name: HashMap<String, CoachTypeId> = coach_types
            .iter()
            .map(|row| (row.name.clone(), CoachTypeId(row.id)))
            .collect();
        let coach_types: HashMap<CoachTypeId, String> = coach_types
            .into_iter()
            .map(|row| (CoachTypeId(row.id), row.name))
            .collect();

        let cancelled = *booking_statuses.get(names::CANCELLED).ok_or_else(|| {
            CoreError::Storage(format!("booking_statuses is missing '{}'", names::CANCELLED))
        })?;

        for required in [names::CONFIRMED, names::WAITING, names::RAC] {
            if !booking_statuses.contains_key(required) {
                return Err(CoreError::Storage(format!("booking_statuses is missing '{}'", required)));
            }
        }
        if !payment_statuses.contains_key(names::PAYMENT_COMPLETED) {
            return Err(CoreError::Storage(format!(
                "payment_statuses is missing '{}'",
                names::PAYMENT_COMPLETED
            )));
        }
        if !refund_statuses.contains_key(names::REFUND_REQUESTED) {
            return Err(CoreError::Storage(format!(
                "refund_statuses is missing '{}'",
                names::REFUND_REQUESTED
            )));
        }

        Ok(Self {
            booking_statuses,
            booking_status_names,
            payment_statuses,
            refund_statuses,
            coach_types,
            coach_types_by_name,
            cancelled,
        })
    }

    /// Resolve a booking status name to its id.
    pub fn status_id(&self, name: &str) -> CoreResult<StatusId> {
        self.booking_statuses
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown booking status: {}", name)))
    }

    pub fn status_name(&self, id: StatusId) -> CoreResult<&str> {
        self.booking_status_names
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| CoreError::Validation(format!("Unknown booking status id: {}", id.0)))
    }

    pub fn is_cancelled(&self, id: StatusId) -> bool {
        id == self.cancelled
    }

    /// A recognized, non-cancelled status.
    pub fn active_status(&self, id: StatusId) -> CoreResult<ActiveStatus> {
        let name = self.status_name(id)?;
        if self.is_cancelled(id) {
            return Err(CoreError::Validation(format!(
                "Booking status '{}' cannot be set directly",
                name
            )));
        }
        Ok(ActiveStatus(id))
    }

    pub fn active_status_named(&self, name: &str) -> CoreResult<ActiveStatus> {
        let id = self.status_id(name)?;
        self.active_status(id)
    }

    pub(crate) fn cancelled_status(&self) -> CancelledStatus {
        CancelledStatus(self.cancelled)
    }

    pub fn payment_status_id(&self, name: &str) -> CoreResult<PaymentStatusId> {
        self.payment_statuses
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown payment status: {}", name)))
    }

    pub fn refund_status_id(&self, name: &str) -> CoreResult<RefundStatusId> {
        self.refund_statuses
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown refund status: {}", name)))
    }

    pub fn coach_type_name(&self, id: CoachTypeId) -> CoreResult<&str> {
        self.coach_types
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| CoreError::Validation(format!("Unknown coach type: {}", id.0)))
    }

    pub fn coach_type_named(&self, name: &str) -> CoreResult<CoachTypeId> {
        self.coach_types_by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::Validation(format!("Unknown coach type: {}", name)))
    }
}

#[cfg(test)]
pub(crate) fn sample_rows() -> (Vec<LookupRow>, Vec<LookupRow>, Vec<LookupRow>, Vec<LookupRow>) {
    (
        vec![
            LookupRow::new(1, names::CONFIRMED),
            LookupRow::new(2, names::WAITING),
            LookupRow::new(3, names::RAC),
            LookupRow::new(4, names::CANCELLED),
        ],
        vec![
            LookupRow::new(1, names::PAYMENT_PENDING),
            LookupRow::new(2, names::PAYMENT_COMPLETED),
        ],
        vec![LookupRow::new(1, names::REFUND_REQUESTED)],
        vec![LookupRow::new(1, "AC 2 Tier"), LookupRow::new(2, "Sleeper Class")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> ReferenceData {
        let (b, p, r, c) = sample_rows();
        ReferenceData::from_rows(b, p, r, c).unwrap()
    }

    #[test]
    fn test_status_lookup_by_name() {
        let reference = reference();
        assert_eq!(reference.status_id("RAC").unwrap(), StatusId(3));
        assert_eq!(reference.status_name(StatusId(1)).unwrap(), "Confirmed");
    }

    #[test]
    fn test_unknown_status_is_validation_error() {
        let reference = reference();
        let err = reference.status_id("Booked").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Validation failed: Unknown booking status: Booked");
        assert!(reference.status_name(StatusId(99)).is_err());
    }

    #[test]
    fn test_cancelled_is_not_an_active_status() {
        let reference = reference();
        assert!(reference.active_status_named("Cancelled").is_err());
        assert_eq!(reference.active_status_named("Waiting").unwrap().id(), StatusId(2));
        assert!(reference.is_cancelled(StatusId(4)));
        assert_eq!(reference.cancelled_status().id(), StatusId(4));
    }

    #[test]
    fn test_missing_cancelled_row_is_rejected() {
        let (mut b, p, r, c) = sample_rows();
        b.retain(|row| row.name != names::CANCELLED);
        assert!(ReferenceData::from_rows(b, p, r, c).is_err());
    }

    #[test]
    fn test_coach_type_lookups() {
        let reference = reference();
        assert_eq!(reference.coach_type_named("Sleeper Class").unwrap(), CoachTypeId(2));
        assert_eq!(reference.coach_type_name(CoachTypeId(1)).unwrap(), "AC 2 Tier");
        assert!(reference.coach_type_name(CoachTypeId(7)).is_err());
    }
}
