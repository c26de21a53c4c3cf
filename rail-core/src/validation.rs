use crate::models::{CreateBookingRequest, Gender, PassengerRequest};
use crate::reference::{ActiveStatus, CoachTypeId, ReferenceData};
use crate::{CoreError, CoreResult};

pub const MIN_AGE: i32 = 1;
pub const MAX_AGE: i32 = 120;

/// Passenger input after field validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPassenger {
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub email: Option<String>,
    pub coach_type_id: CoachTypeId,
}

/// Checks that need no database round-trip.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub status: ActiveStatus,
    pub passengers: Vec<ValidPassenger>,
}

pub fn validate_request(
    request: &CreateBookingRequest,
    reference: &ReferenceData,
) -> CoreResult<ValidatedRequest> {
    if request.passengers.is_empty() {
        return Err(CoreError::Validation("At least one passenger is required".to_string()));
    }
    if request.from_station_id == request.to_station_id {
        return Err(CoreError::Validation(
            "Origin and destination stations must differ".to_string(),
        ));
    }
    if request.total_amount < 0 {
        return Err(CoreError::Validation(format!(
            "Total amount must not be negative: {}",
            request.total_amount
        )));
    }

    let status = reference.active_status(request.status_id)?;

    let passengers = request
        .passengers
        .iter()
        .enumerate()
        .map(|(index, passenger)| validate_passenger(index + 1, passenger, reference))
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(ValidatedRequest { status, passengers })
}

/// `position` is 1-based and only used in messages.
pub fn validate_passenger(
    position: usize,
    passenger: &PassengerRequest,
    reference: &ReferenceData,
) -> CoreResult<ValidPassenger> {
    let name = passenger.name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation(format!("Passenger {}: name is required", position)));
    }

    if !(MIN_AGE..=MAX_AGE).contains(&passenger.age) {
        return Err(CoreError::Validation(format!(
            "Passenger {} ({}): age must be between {} and {}",
            position, name, MIN_AGE, MAX_AGE
        )));
    }

    let gender: Gender = passenger.gender.parse().map_err(|_| {
        CoreError::Validation(format!(
            "Passenger {} ({}): gender must be one of Male, Female, Other",
            position, name
        ))
    })?;

    reference.coach_type_name(passenger.coach_type_id)?;

    let email = passenger
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    Ok(ValidPassenger {
        name: name.to_string(),
        age: passenger.age,
        gender,
        email,
        coach_type_id: passenger.coach_type_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{sample_rows, StatusId};
    use uuid::Uuid;

    fn reference() -> ReferenceData {
        let (b, p, r, c) = sample_rows();
        ReferenceData::from_rows(b, p, r, c).unwrap()
    }

    fn passenger(name: &str, age: i32, gender: &str) -> PassengerRequest {
        PassengerRequest {
            name: name.to_string(),
            age,
            gender: gender.to_string(),
            email: None,
            coach_type_id: CoachTypeId(1),
        }
    }

    fn request(passengers: Vec<PassengerRequest>) -> CreateBookingRequest {
        CreateBookingRequest {
            user_id: Uuid::new_v4(),
            schedule_id: Uuid::new_v4(),
            from_station_id: Uuid::new_v4(),
            to_station_id: Uuid::new_v4(),
            status_id: StatusId(1),
            total_amount: 120000,
            passengers,
        }
    }

    #[test]
    fn test_valid_passenger_is_normalized() {
        let mut p = passenger("  Meera Iyer ", 29, "Female");
        p.email = Some("  meera@example.com ".to_string());
        let valid = validate_passenger(1, &p, &reference()).unwrap();
        assert_eq!(valid.name, "Meera Iyer");
        assert_eq!(valid.gender, Gender::Female);
        assert_eq!(valid.email.as_deref(), Some("meera@example.com"));
    }

    #[test]
    fn test_blank_email_is_absent() {
        let mut p = passenger("Arjun", 40, "Male");
        p.email = Some("   ".to_string());
        let valid = validate_passenger(1, &p, &reference()).unwrap();
        assert!(valid.email.is_none());
    }

    #[test]
    fn test_age_bounds() {
        let reference = reference();
        assert!(validate_passenger(1, &passenger("A", 1, "Other"), &reference).is_ok());
        assert!(validate_passenger(1, &passenger("A", 120, "Other"), &reference).is_ok());
        assert!(validate_passenger(1, &passenger("A", 0, "Other"), &reference).is_err());
        let err = validate_passenger(2, &passenger("A", 121, "Other"), &reference).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: Passenger 2 (A): age must be between 1 and 120"
        );
    }

    #[test]
    fn test_empty_name_and_bad_gender() {
        let reference = reference();
        assert!(validate_passenger(1, &passenger("   ", 30, "Male"), &reference).is_err());
        assert!(validate_passenger(1, &passenger("Kiran", 30, "M"), &reference).is_err());
    }

    #[test]
    fn test_unknown_coach_type_rejected() {
        let mut p = passenger("Kiran", 30, "Male");
        p.coach_type_id = CoachTypeId(42);
        assert!(validate_passenger(1, &p, &reference()).is_err());
    }

    #[test]
    fn test_request_level_checks() {
        let reference = reference();

        assert!(validate_request(&request(vec![]), &reference).is_err());

        let mut same_station = request(vec![passenger("Kiran", 30, "Male")]);
        same_station.to_station_id = same_station.from_station_id;
        assert!(validate_request(&same_station, &reference).is_err());

        let mut cancelled = request(vec![passenger("Kiran", 30, "Male")]);
        cancelled.status_id = StatusId(4);
        assert!(validate_request(&cancelled, &reference).is_err());

        let mut unknown = request(vec![passenger("Kiran", 30, "Male")]);
        unknown.status_id = StatusId(77);
        assert!(validate_request(&unknown, &reference).is_err());

        let ok = validate_request(&request(vec![passenger("Kiran", 30, "Male")]), &reference).unwrap();
        assert_eq!(ok.status.id(), StatusId(1));
        assert_eq!(ok.passengers.len(), 1);
    }
}
