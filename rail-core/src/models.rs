use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::reference::{CoachTypeId, PaymentStatusId, RefundStatusId, StatusId};

// ============================================================================
// Core records
// ============================================================================

/// A passenger-initiated reservation on one schedule between two stations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub pnr: String,
    pub user_id: Uuid,
    pub schedule_id: Uuid,
    pub from_station_id: Uuid,
    pub to_station_id: Uuid,
    pub status_id: StatusId,
    /// Minor currency units (paise).
    pub total_amount: i64,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Male" => Ok(Gender::Male),
            "Female" => Ok(Gender::Female),
            "Other" => Ok(Gender::Other),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

/// A person profile owned by a user, reused across bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passenger {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub email: Option<String>,
}

/// Booking-scoped snapshot of a passenger's travel details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookedPassenger {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_id: Uuid,
    pub name: String,
    pub gender: Gender,
    pub age: i32,
    pub coach_type_id: CoachTypeId,
}

/// Binding of a booked passenger to a physical seat for one booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookedSeat {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub booked_passenger_id: Uuid,
    pub seat_id: Uuid,
    pub schedule_id: Uuid,
}

/// Where a seat lives: used to re-validate allocation candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatPlacement {
    pub seat_id: Uuid,
    pub coach_id: Uuid,
    pub coach_type_id: CoachTypeId,
    pub train_id: Uuid,
}

/// Seat details as shown on a booked passenger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatAssignment {
    pub seat_id: Uuid,
    pub seat_number: i32,
    pub seat_type: String,
    pub coach_id: Uuid,
    pub coach_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookedPassengerView {
    #[serde(flatten)]
    pub passenger: BookedPassenger,
    pub seat: Option<SeatAssignment>,
}

impl BookedPassengerView {
    /// No seat row means the passenger is on the waiting list.
    pub fn is_waiting_listed(&self) -> bool {
        self.seat.is_none()
    }
}

/// A booking with its booked passengers, the shape returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingWithPassengers {
    #[serde(flatten)]
    pub booking: Booking,
    pub status: String,
    pub passengers: Vec<BookedPassengerView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub status_id: PaymentStatusId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: i64,
    pub status_id: RefundStatusId,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub user_id: Uuid,
    pub schedule_id: Uuid,
    pub from_station_id: Uuid,
    pub to_station_id: Uuid,
    pub status_id: StatusId,
    pub total_amount: i64,
    pub passengers: Vec<PassengerRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassengerRequest {
    pub name: String,
    pub age: i32,
    pub gender: String,
    #[serde(default)]
    pub email: Option<String>,
    pub coach_type_id: CoachTypeId,
}

// ============================================================================
// Insert payloads handed to the storage layer
// ============================================================================

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub id: Uuid,
    pub pnr: String,
    pub user_id: Uuid,
    pub schedule_id: Uuid,
    pub from_station_id: Uuid,
    pub to_station_id: Uuid,
    pub status_id: StatusId,
    pub total_amount: i64,
}

#[derive(Debug, Clone)]
pub struct NewPassenger {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBookedPassenger {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub passenger_id: Uuid,
    pub name: String,
    pub gender: Gender,
    pub age: i32,
    pub coach_type_id: CoachTypeId,
}

#[derive(Debug, Clone)]
pub struct NewBookedSeat {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub booked_passenger_id: Uuid,
    pub seat_id: Uuid,
    pub schedule_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewRefund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: i64,
    pub status_id: RefundStatusId,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_parsing_is_exact() {
        assert_eq!("Female".parse::<Gender>().unwrap(), Gender::Female);
        assert!("female".parse::<Gender>().is_err());
        assert!("".parse::<Gender>().is_err());
    }

    #[test]
    fn test_booking_response_is_flat() {
        let booking = Booking {
            id: Uuid::new_v4(),
            pnr: "AB12CD".to_string(),
            user_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            from_station_id: Uuid::new_v4(),
            to_station_id: Uuid::new_v4(),
            status_id: StatusId(1),
            total_amount: 120000,
            booked_at: Utc::now(),
        };
        let response = BookingWithPassengers {
            booking,
            status: "Confirmed".to_string(),
            passengers: vec![],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["pnr"], "AB12CD");
        assert_eq!(json["status_id"], 1);
        assert_eq!(json["status"], "Confirmed");
        assert!(json["passengers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_passenger_request_email_is_optional() {
        let json = r#"{ "name": "Ravi", "age": 34, "gender": "Male", "coach_type_id": 2 }"#;
        let req: PassengerRequest = serde_json::from_str(json).unwrap();
        assert!(req.email.is_none());
        assert_eq!(req.coach_type_id, CoachTypeId(2));
    }
}
