use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use rail_core::models::{
    AuditLog, BookedPassenger, BookedPassengerView, BookedSeat, Booking, Gender, NewAuditLog,
    NewBookedPassenger, NewBookedSeat, NewBooking, NewPassenger, NewRefund, Passenger, Payment,
    Refund, SeatAssignment, SeatPlacement,
};
use rail_core::reference::{
    names, ActiveStatus, CancelledStatus, CoachTypeId, LookupRow, PaymentStatusId, ReferenceData,
    RefundStatusId, StatusId,
};
use rail_core::{BookingStore, BookingTx, CoreError, CoreResult};

fn storage(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

// ============================================================================
// Row types
// ============================================================================

const BOOKING_COLUMNS: &str =
    "id, pnr, user_id, schedule_id, from_station_id, to_station_id, status_id, total_amount, booked_at";

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    pnr: String,
    user_id: Uuid,
    schedule_id: Uuid,
    from_station_id: Uuid,
    to_station_id: Uuid,
    status_id: i32,
    total_amount: i64,
    booked_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            pnr: row.pnr,
            user_id: row.user_id,
            schedule_id: row.schedule_id,
            from_station_id: row.from_station_id,
            to_station_id: row.to_station_id,
            status_id: StatusId(row.status_id),
            total_amount: row.total_amount,
            booked_at: row.booked_at,
        }
    }
}

fn parse_gender(value: &str) -> CoreResult<Gender> {
    value
        .parse()
        .map_err(|_| CoreError::Storage(format!("Unexpected gender value in database: {}", value)))
}

#[derive(sqlx::FromRow)]
struct PassengerRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    age: i32,
    gender: String,
    email: Option<String>,
}

impl TryFrom<PassengerRow> for Passenger {
    type Error = CoreError;

    fn try_from(row: PassengerRow) -> CoreResult<Self> {
        Ok(Passenger {
            id: row.id,
            user_id: row.user_id,
            gender: parse_gender(&row.gender)?,
            name: row.name,
            age: row.age,
            email: row.email,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookedPassengerRow {
    id: Uuid,
    booking_id: Uuid,
    passenger_id: Uuid,
    name: String,
    gender: String,
    age: i32,
    coach_type_id: i32,
}

impl TryFrom<BookedPassengerRow> for BookedPassenger {
    type Error = CoreError;

    fn try_from(row: BookedPassengerRow) -> CoreResult<Self> {
        Ok(BookedPassenger {
            id: row.id,
            booking_id: row.booking_id,
            passenger_id: row.passenger_id,
            gender: parse_gender(&row.gender)?,
            name: row.name,
            age: row.age,
            coach_type_id: CoachTypeId(row.coach_type_id),
        })
    }
}

/// Booked passenger joined with its seat, if any.
#[derive(sqlx::FromRow)]
struct BookedPassengerSeatRow {
    id: Uuid,
    booking_id: Uuid,
    passenger_id: Uuid,
    name: String,
    gender: String,
    age: i32,
    coach_type_id: i32,
    seat_id: Option<Uuid>,
    seat_number: Option<i32>,
    seat_type: Option<String>,
    coach_id: Option<Uuid>,
    coach_code: Option<String>,
}

impl TryFrom<BookedPassengerSeatRow> for BookedPassengerView {
    type Error = CoreError;

    fn try_from(row: BookedPassengerSeatRow) -> CoreResult<Self> {
        let seat = match (row.seat_id, row.seat_number, row.seat_type, row.coach_id, row.coach_code) {
            (Some(seat_id), Some(seat_number), Some(seat_type), Some(coach_id), Some(coach_code)) => {
                Some(SeatAssignment {
                    seat_id,
                    seat_number,
                    seat_type,
                    coach_id,
                    coach_code,
                })
            }
            _ => None,
        };
        Ok(BookedPassengerView {
            passenger: BookedPassenger {
                id: row.id,
                booking_id: row.booking_id,
                passenger_id: row.passenger_id,
                gender: parse_gender(&row.gender)?,
                name: row.name,
                age: row.age,
                coach_type_id: CoachTypeId(row.coach_type_id),
            },
            seat,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    seat_id: Uuid,
    seat_number: i32,
    seat_type: String,
    coach_id: Uuid,
    coach_code: String,
}

impl From<SeatRow> for SeatAssignment {
    fn from(row: SeatRow) -> Self {
        SeatAssignment {
            seat_id: row.seat_id,
            seat_number: row.seat_number,
            seat_type: row.seat_type,
            coach_id: row.coach_id,
            coach_code: row.coach_code,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlacementRow {
    seat_id: Uuid,
    coach_id: Uuid,
    coach_type_id: i32,
    train_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct BookedSeatRow {
    id: Uuid,
    booking_id: Uuid,
    booked_passenger_id: Uuid,
    seat_id: Uuid,
    schedule_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    amount: i64,
    status_id: i32,
    created_at: DateTime<Utc>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            booking_id: row.booking_id,
            amount: row.amount,
            status_id: PaymentStatusId(row.status_id),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    amount: i64,
    status_id: i32,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AuditLogRow {
    id: Uuid,
    actor_id: Option<Uuid>,
    action: String,
    entity_type: String,
    entity_id: Uuid,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

/// Savepoint names are spliced into SQL, so only plain identifiers pass.
fn savepoint_name(name: &str) -> CoreResult<&str> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(CoreError::Storage(format!("Invalid savepoint name: {}", name)))
    }
}

// ============================================================================
// Store
// ============================================================================

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lookup_rows(&self, table: &str) -> CoreResult<Vec<LookupRow>> {
        let rows: Vec<(i32, String)> = sqlx::query_as(&format!("SELECT id, name FROM {} ORDER BY id", table))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        Ok(rows.into_iter().map(|(id, name)| LookupRow { id, name }).collect())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> CoreResult<Box<dyn BookingTx>> {
        let tx = self.pool.begin().await.map_err(storage)?;
        Ok(Box::new(PgBookingTx { tx }))
    }

    async fn load_reference_data(&self) -> CoreResult<ReferenceData> {
        let booking = self.lookup_rows("booking_statuses").await?;
        let payment = self.lookup_rows("payment_statuses").await?;
        let refund = self.lookup_rows("refund_statuses").await?;
        let coach_types = self.lookup_rows("coach_types").await?;
        debug!(
            "Loaded reference data: {} booking statuses, {} coach types",
            booking.len(),
            coach_types.len()
        );
        ReferenceData::from_rows(booking, payment, refund, coach_types)
    }
}

/// One pooled connection with an open transaction. Dropping it without
/// commit rolls back and returns the connection to the pool.
pub struct PgBookingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BookingTx for PgBookingTx {
    async fn user_exists(&mut self, user_id: Uuid) -> CoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage)
    }

    async fn station_exists(&mut self, station_id: Uuid) -> CoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stations WHERE id = $1)")
            .bind(station_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(storage)
    }

    async fn schedule_train(&mut self, schedule_id: Uuid) -> CoreResult<Option<Uuid>> {
        sqlx::query_scalar("SELECT train_id FROM schedules WHERE id = $1")
            .bind(schedule_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage)
    }

    async fn count_route_stops(&mut self, schedule_id: Uuid, from_station_id: Uuid, to_station_id: Uuid) -> CoreResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM schedule_stops WHERE schedule_id = $1 AND station_id IN ($2, $3)",
        )
        .bind(schedule_id)
        .bind(from_station_id)
        .bind(to_station_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)
    }

    async fn train_has_coach_type(&mut self, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM coaches WHERE train_id = $1 AND coach_type_id = $2)",
        )
        .bind(train_id)
        .bind(coach_type_id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> CoreResult<Booking> {
        let row: BookingRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO bookings (id, pnr, user_id, schedule_id, from_station_id, to_station_id, status_id, total_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .bind(&booking.pnr)
        .bind(booking.user_id)
        .bind(booking.schedule_id)
        .bind(booking.from_station_id)
        .bind(booking.to_station_id)
        .bind(booking.status_id.0)
        .bind(booking.total_amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.into())
    }

    async fn find_booking(&mut self, booking_id: Uuid, for_update: bool) -> CoreResult<Option<Booking>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bookings WHERE id = $1{}",
            BOOKING_COLUMNS, lock
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.map(Booking::from))
    }

    async fn update_booking_status(&mut self, booking_id: Uuid, status: ActiveStatus) -> CoreResult<Booking> {
        self.set_status(booking_id, status.id()).await
    }

    async fn mark_booking_cancelled(&mut self, booking_id: Uuid, status: CancelledStatus) -> CoreResult<Booking> {
        self.set_status(booking_id, status.id()).await
    }

    async fn find_passenger_by_email(&mut self, user_id: Uuid, email: &str) -> CoreResult<Option<Passenger>> {
        let row: Option<PassengerRow> = sqlx::query_as(
            "SELECT id, user_id, name, age, gender, email FROM passengers WHERE user_id = $1 AND email = $2",
        )
        .bind(user_id)
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.map(Passenger::try_from).transpose()
    }

    async fn find_passenger_by_profile(&mut self, user_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Option<Passenger>> {
        let row: Option<PassengerRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, age, gender, email FROM passengers
            WHERE user_id = $1 AND name = $2 AND age = $3 AND gender = $4
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(name)
        .bind(age)
        .bind(gender.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.map(Passenger::try_from).transpose()
    }

    async fn insert_passenger(&mut self, passenger: &NewPassenger) -> CoreResult<Passenger> {
        let row: PassengerRow = sqlx::query_as(
            r#"
            INSERT INTO passengers (id, user_id, name, age, gender, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, email) WHERE email IS NOT NULL
            DO UPDATE SET name = EXCLUDED.name, age = EXCLUDED.age, gender = EXCLUDED.gender
            RETURNING id, user_id, name, age, gender, email
            "#,
        )
        .bind(passenger.id)
        .bind(passenger.user_id)
        .bind(&passenger.name)
        .bind(passenger.age)
        .bind(passenger.gender.as_str())
        .bind(&passenger.email)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.try_into()
    }

    async fn update_passenger_profile(&mut self, passenger_id: Uuid, name: &str, age: i32, gender: Gender) -> CoreResult<Passenger> {
        let row: Option<PassengerRow> = sqlx::query_as(
            r#"
            UPDATE passengers SET name = $2, age = $3, gender = $4
            WHERE id = $1
            RETURNING id, user_id, name, age, gender, email
            "#,
        )
        .bind(passenger_id)
        .bind(name)
        .bind(age)
        .bind(gender.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.ok_or_else(|| CoreError::NotFound(format!("Passenger {}", passenger_id)))?
            .try_into()
    }

    async fn lock_passenger_identity(&mut self, identity: &str) -> CoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(identity)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn passenger_owner(&mut self, passenger_id: Uuid) -> CoreResult<Option<Uuid>> {
        sqlx::query_scalar("SELECT user_id FROM passengers WHERE id = $1")
            .bind(passenger_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(storage)
    }

    async fn insert_booked_passenger(&mut self, entry: &NewBookedPassenger) -> CoreResult<BookedPassenger> {
        let row: BookedPassengerRow = sqlx::query_as(
            r#"
            INSERT INTO booked_passengers (id, booking_id, passenger_id, name, gender, age, coach_type_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, booking_id, passenger_id, name, gender, age, coach_type_id
            "#,
        )
        .bind(entry.id)
        .bind(entry.booking_id)
        .bind(entry.passenger_id)
        .bind(&entry.name)
        .bind(entry.gender.as_str())
        .bind(entry.age)
        .bind(entry.coach_type_id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.try_into()
    }

    async fn list_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<Vec<BookedPassengerView>> {
        let rows: Vec<BookedPassengerSeatRow> = sqlx::query_as(
            r#"
            SELECT bp.id, bp.booking_id, bp.passenger_id, bp.name, bp.gender, bp.age, bp.coach_type_id,
                   s.id AS seat_id, s.seat_number, s.seat_type, c.id AS coach_id, c.code AS coach_code
            FROM booked_passengers bp
            LEFT JOIN booked_seats bs ON bs.booked_passenger_id = bp.id
            LEFT JOIN seats s ON s.id = bs.seat_id
            LEFT JOIN coaches c ON c.id = s.coach_id
            WHERE bp.booking_id = $1
            ORDER BY bp.created_at, bp.id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(storage)?;
        rows.into_iter().map(BookedPassengerView::try_from).collect()
    }

    async fn delete_booked_passengers(&mut self, booking_id: Uuid) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM booked_passengers WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn find_free_seat(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<Option<SeatAssignment>> {
        let row: Option<SeatRow> = sqlx::query_as(
            r#"
            SELECT s.id AS seat_id, s.seat_number, s.seat_type, c.id AS coach_id, c.code AS coach_code
            FROM seats s
            JOIN coaches c ON c.id = s.coach_id
            WHERE c.train_id = $1
              AND c.coach_type_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM booked_seats bs
                  JOIN bookings b ON b.id = bs.booking_id
                  JOIN booking_statuses st ON st.id = b.status_id
                  WHERE bs.seat_id = s.id AND b.schedule_id = $3 AND st.name <> $4
              )
            ORDER BY c.code, s.seat_number
            LIMIT 1
            "#,
        )
        .bind(train_id)
        .bind(coach_type_id.0)
        .bind(schedule_id)
        .bind(names::CANCELLED)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.map(SeatAssignment::from))
    }

    async fn count_free_seats(&mut self, schedule_id: Uuid, train_id: Uuid, coach_type_id: CoachTypeId) -> CoreResult<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM seats s
            JOIN coaches c ON c.id = s.coach_id
            WHERE c.train_id = $1
              AND c.coach_type_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM booked_seats bs
                  JOIN bookings b ON b.id = bs.booking_id
                  JOIN booking_statuses st ON st.id = b.status_id
                  WHERE bs.seat_id = s.id AND b.schedule_id = $3 AND st.name <> $4
              )
            "#,
        )
        .bind(train_id)
        .bind(coach_type_id.0)
        .bind(schedule_id)
        .bind(names::CANCELLED)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)
    }

    async fn seat_placement(&mut self, seat_id: Uuid) -> CoreResult<Option<SeatPlacement>> {
        let row: Option<PlacementRow> = sqlx::query_as(
            r#"
            SELECT s.id AS seat_id, c.id AS coach_id, c.coach_type_id, c.train_id
            FROM seats s
            JOIN coaches c ON c.id = s.coach_id
            WHERE s.id = $1
            "#,
        )
        .bind(seat_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.map(|r| SeatPlacement {
            seat_id: r.seat_id,
            coach_id: r.coach_id,
            coach_type_id: CoachTypeId(r.coach_type_id),
            train_id: r.train_id,
        }))
    }

    async fn claim_seat(&mut self, claim: &NewBookedSeat) -> CoreResult<Option<BookedSeat>> {
        // A concurrent holder blocks here until it commits or rolls back
        let row: Option<BookedSeatRow> = sqlx::query_as(
            r#"
            INSERT INTO booked_seats (id, booking_id, booked_passenger_id, seat_id, schedule_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (schedule_id, seat_id) DO NOTHING
            RETURNING id, booking_id, booked_passenger_id, seat_id, schedule_id
            "#,
        )
        .bind(claim.id)
        .bind(claim.booking_id)
        .bind(claim.booked_passenger_id)
        .bind(claim.seat_id)
        .bind(claim.schedule_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;

        if row.is_none() {
            debug!("Seat {} already held on schedule {}", claim.seat_id, claim.schedule_id);
        }
        Ok(row.map(|r| BookedSeat {
            id: r.id,
            booking_id: r.booking_id,
            booked_passenger_id: r.booked_passenger_id,
            seat_id: r.seat_id,
            schedule_id: r.schedule_id,
        }))
    }

    async fn delete_booked_seats(&mut self, booking_id: Uuid) -> CoreResult<u64> {
        let result = sqlx::query("DELETE FROM booked_seats WHERE booking_id = $1")
            .bind(booking_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn find_payment(&mut self, payment_id: Uuid) -> CoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            "SELECT id, booking_id, amount, status_id, created_at FROM payments WHERE id = $1",
        )
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.map(Payment::from))
    }

    async fn latest_payment_with_status(&mut self, booking_id: Uuid, status: PaymentStatusId) -> CoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, booking_id, amount, status_id, created_at FROM payments
            WHERE booking_id = $1 AND status_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(booking_id)
        .bind(status.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(row.map(Payment::from))
    }

    async fn update_payment_status(&mut self, payment_id: Uuid, status: PaymentStatusId) -> CoreResult<Payment> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            UPDATE payments SET status_id = $2 WHERE id = $1
            RETURNING id, booking_id, amount, status_id, created_at
            "#,
        )
        .bind(payment_id)
        .bind(status.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.map(Payment::from)
            .ok_or_else(|| CoreError::NotFound(format!("Payment {}", payment_id)))
    }

    async fn insert_refund(&mut self, refund: &NewRefund) -> CoreResult<Refund> {
        let row: RefundRow = sqlx::query_as(
            r#"
            INSERT INTO refunds (id, payment_id, amount, status_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, payment_id, amount, status_id, created_at
            "#,
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(refund.amount)
        .bind(refund.status_id.0)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(Refund {
            id: row.id,
            payment_id: row.payment_id,
            amount: row.amount,
            status_id: RefundStatusId(row.status_id),
            created_at: row.created_at,
        })
    }

    async fn insert_audit_log(&mut self, entry: &NewAuditLog) -> CoreResult<AuditLog> {
        let row: AuditLogRow = sqlx::query_as(
            r#"
            INSERT INTO audit_logs (id, actor_id, action, entity_type, entity_id, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, actor_id, action, entity_type, entity_id, details, created_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(storage)?;
        Ok(AuditLog {
            id: row.id,
            actor_id: row.actor_id,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            details: row.details,
            created_at: row.created_at,
        })
    }

    async fn savepoint(&mut self, name: &str) -> CoreResult<()> {
        self.raw(&format!("SAVEPOINT {}", savepoint_name(name)?)).await
    }

    async fn release_savepoint(&mut self, name: &str) -> CoreResult<()> {
        self.raw(&format!("RELEASE SAVEPOINT {}", savepoint_name(name)?)).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> CoreResult<()> {
        self.raw(&format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(name)?)).await
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let PgBookingTx { tx } = *self;
        tx.commit().await.map_err(storage)
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        let PgBookingTx { tx } = *self;
        tx.rollback().await.map_err(storage)
    }
}

impl PgBookingTx {
    async fn set_status(&mut self, booking_id: Uuid, status_id: StatusId) -> CoreResult<Booking> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "UPDATE bookings SET status_id = $2 WHERE id = $1 RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .bind(status_id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(storage)?;
        row.map(Booking::from)
            .ok_or_else(|| CoreError::NotFound(format!("Booking {}", booking_id)))
    }

    async fn raw(&mut self, sql: &str) -> CoreResult<()> {
        sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_names_must_be_identifiers() {
        assert!(savepoint_name("seat_allocation").is_ok());
        assert!(savepoint_name("_sp1").is_ok());
        assert!(savepoint_name("").is_err());
        assert!(savepoint_name("1sp").is_err());
        assert!(savepoint_name("sp; DROP TABLE bookings").is_err());
    }

    #[test]
    fn test_seatless_row_maps_to_waiting_list() {
        let row = BookedPassengerSeatRow {
            id: Uuid::new_v4(),
            booking_id: Uuid::new_v4(),
            passenger_id: Uuid::new_v4(),
            name: "Asha".to_string(),
            gender: "Female".to_string(),
            age: 34,
            coach_type_id: 2,
            seat_id: None,
            seat_number: None,
            seat_type: None,
            coach_id: None,
            coach_code: None,
        };
        let view = BookedPassengerView::try_from(row).unwrap();
        assert!(view.is_waiting_listed());
        assert_eq!(view.passenger.gender, Gender::Female);
    }

    #[test]
    fn test_unknown_gender_in_row_is_storage_error() {
        let err = parse_gender("F").unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
