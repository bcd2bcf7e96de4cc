use serde::{Deserialize, Serialize};
use crate::schema::{reservations, rooms, users};
use chrono::NaiveDateTime;
use diesel::{deserialize::{self, FromSql}, pg::{Pg, PgValue}, serialize::{self, Output, ToSql}, sql_types::Text, AsChangeset, Insertable, Selectable};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Queryable, Serialize, Deserialize, Selectable)]
#[diesel(table_name = rooms)]
pub struct Room {
    pub room_id: i32,
    pub name: String,
    pub capacity: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Queryable, Serialize, Deserialize, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub user_id: String,
    pub first_name: String,
    pub last_names: String,
    pub career: Option<String>,
    pub semester: Option<i32>,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub user_id: String,
    pub first_name: String,
    pub last_names: String,
    pub career: Option<String>,
    pub semester: Option<i32>,
}

/// Lifecycle state of a reservation.
///
/// Serialized with the labels the admin dashboard shows and filters on;
/// stored as the `reservation_status` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::ReservationStatus)]
pub enum ReservationStatus {
    #[serde(rename = "Pendiente")]
    Pending,
    #[serde(rename = "Confirmado")]
    Confirmed,
    #[serde(rename = "Cancelado")]
    Cancelled,
    #[serde(rename = "Completado")]
    Completed,
    #[serde(rename = "Activa")]
    Active,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
        ReservationStatus::Completed,
        ReservationStatus::Active,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pendiente",
            ReservationStatus::Confirmed => "Confirmado",
            ReservationStatus::Cancelled => "Cancelado",
            ReservationStatus::Completed => "Completado",
            ReservationStatus::Active => "Activa",
        }
    }

    fn db_label(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Active => "ACTIVE",
        }
    }

    /// Whether lifecycle timers should be scheduled for a reservation in this state.
    pub fn is_scheduled(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::Active)
    }

    /// Status after `event` fires, or `None` when the event does not apply.
    ///
    /// Pending reservations are left for an admin to decide on.
    pub fn advance(self, event: LifecycleEvent) -> Option<ReservationStatus> {
        match (event, self) {
            (LifecycleEvent::Start, ReservationStatus::Confirmed) => Some(ReservationStatus::Active),
            (LifecycleEvent::End, ReservationStatus::Confirmed | ReservationStatus::Active) => {
                Some(ReservationStatus::Completed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReservationStatus::ALL
            .into_iter()
            .find(|status| status.label() == s)
            .ok_or_else(|| format!("Unrecognized reservation status: {}", s))
    }
}

impl ToSql<crate::schema::sql_types::ReservationStatus, Pg> for ReservationStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        <str as ToSql<Text, Pg>>::to_sql(self.db_label(), out)
    }
}

impl FromSql<crate::schema::sql_types::ReservationStatus, Pg> for ReservationStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "PENDING" => Ok(ReservationStatus::Pending),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            "COMPLETED" => Ok(ReservationStatus::Completed),
            "ACTIVE" => Ok(ReservationStatus::Active),
            s => Err(format!("Unrecognized reservation status: {}", s).into()),
        }
    }
}

/// Timed events in a reservation's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Queryable, Serialize, Deserialize, Selectable)]
#[diesel(table_name = reservations)]
pub struct Reservation {
    pub reservation_id: i32,
    pub user_id: String,
    pub room_id: i32,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub purpose: String,
    pub status: ReservationStatus,
    pub is_deleted: bool,
    pub created_at: Option<NaiveDateTime>,
}

impl Reservation {
    /// Status a timer for `event` due at `due_at` moves this reservation to.
    ///
    /// Timers go stale when the reservation is soft-deleted or its times are
    /// edited after scheduling.
    pub fn transition_for(&self, event: LifecycleEvent, due_at: NaiveDateTime) -> Option<ReservationStatus> {
        if self.is_deleted {
            return None;
        }
        let scheduled_for = match event {
            LifecycleEvent::Start => self.start_time,
            LifecycleEvent::End => self.end_time,
        };
        if scheduled_for != due_at {
            return None;
        }
        self.status.advance(event)
    }
}

/// Every editable column. Used for both inserts and the admin's full overwrite.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = reservations)]
pub struct ReservationChanges {
    pub user_id: String,
    pub room_id: i32,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub purpose: String,
    pub status: ReservationStatus,
}

// Request/Response models for API
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationForm {
    pub user_id: String,
    pub room_id: i32,
    pub start_time: String,
    pub end_time: String,
    pub purpose: String,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Serialize)]
pub struct ReservationView {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub room_name: Option<String>,
}

impl ReservationView {
    pub fn resolve(reservation: Reservation, rooms: &crate::rooms::RoomDirectory) -> Self {
        let room_name = rooms.name_of(reservation.room_id).map(str::to_owned);
        Self { reservation, room_name }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateStartRequest {
    pub hour: u8,
    pub minute: String,
    pub meridiem: crate::validation::Meridiem,
}

#[derive(Debug, Serialize)]
pub struct ValidateStartResponse {
    pub accepted: bool,
    pub message: Option<String>,
    pub hour24: Option<u8>,
    pub minute: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub message: String,
}
