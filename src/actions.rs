use diesel::prelude::*;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use crate::models::{self, LifecycleEvent, ReservationStatus};
use crate::rooms::RoomDirectory;
use crate::validation;

pub type DbError = Box<dyn std::error::Error + Send + Sync>;

const MAX_PURPOSE_LEN: usize = 255;

pub fn list_rooms(conn: &mut PgConnection) -> Result<Vec<models::Room>, DbError> {
    use crate::schema::rooms::dsl::{rooms, room_id};

    let all = rooms
        .order(room_id.asc())
        .select(models::Room::as_select())
        .load(conn)?;

    Ok(all)
}

pub fn load_room_directory(conn: &mut PgConnection) -> Result<RoomDirectory, DbError> {
    Ok(RoomDirectory::from_rooms(list_rooms(conn)?))
}

/// Turns a submitted form into the columns to write.
///
/// New bookings must also start inside business hours and default to
/// Pending. Admin edits only need a coherent time range, but they overwrite
/// every column, so they must name the status.
pub fn prepare_reservation(form: &models::ReservationForm, is_new_booking: bool) -> Result<models::ReservationChanges, DbError> {
    let start_time = validation::parse_timestamp(&form.start_time)
        .map_err(|_| "start_time not in correct format")?;
    let end_time = validation::parse_timestamp(&form.end_time)
        .map_err(|_| "end_time not in correct format")?;

    if start_time >= end_time {
        return Err("start_time must be before end_time".into());
    }

    if is_new_booking {
        validation::validate_timestamp(&start_time)?;
    }

    let purpose = form.purpose.trim();
    if purpose.is_empty() {
        return Err("purpose is required".into());
    }
    if purpose.chars().count() > MAX_PURPOSE_LEN {
        return Err(format!("purpose must be at most {} characters", MAX_PURPOSE_LEN).into());
    }

    let status = match (form.status, is_new_booking) {
        (Some(status), _) => status,
        (None, true) => ReservationStatus::Pending,
        (None, false) => return Err("status is required".into()),
    };

    Ok(models::ReservationChanges {
        user_id: form.user_id.clone(),
        room_id: form.room_id,
        start_time,
        end_time,
        purpose: purpose.to_string(),
        status,
    })
}

pub fn create_reservation(conn: &mut PgConnection, changes: &models::ReservationChanges) -> Result<models::Reservation, DbError> {
    use crate::schema::reservations::dsl::reservations;

    let created = diesel::insert_into(reservations)
        .values(changes)
        .returning(models::Reservation::as_returning())
        .get_result(conn)?;

    Ok(created)
}

/// Live reservations, oldest id first.
pub fn list_reservations(conn: &mut PgConnection) -> Result<Vec<models::Reservation>, DbError> {
    use crate::schema::reservations::dsl::{reservations, reservation_id, is_deleted};

    let all = reservations
        .filter(is_deleted.eq(false))
        .order(reservation_id.asc())
        .select(models::Reservation::as_select())
        .load(conn)?;

    Ok(all)
}

pub fn list_upcoming_reservations(conn: &mut PgConnection, now: NaiveDateTime) -> Result<Vec<models::Reservation>, DbError> {
    use crate::schema::reservations::dsl::{reservations, start_time, is_deleted};

    let upcoming = reservations
        .filter(is_deleted.eq(false))
        .filter(start_time.gt(now))
        .order(start_time.asc())
        .select(models::Reservation::as_select())
        .load(conn)?;

    Ok(upcoming)
}

pub fn get_reservation_by_id(conn: &mut PgConnection, id: i32) -> Result<models::Reservation, DbError> {
    use crate::schema::reservations::dsl::reservations;

    let reservation = reservations
        .find(id)
        .select(models::Reservation::as_select())
        .first(conn)?;

    Ok(reservation)
}

/// Overwrites every editable column. Soft-deleted rows count as missing.
pub fn update_reservation(
    conn: &mut PgConnection,
    id: i32,
    changes: &models::ReservationChanges,
) -> Result<models::Reservation, DbError> {
    use crate::schema::reservations::dsl::{reservations, is_deleted};

    let updated = diesel::update(reservations.find(id))
        .filter(is_deleted.eq(false))
        .set(changes)
        .returning(models::Reservation::as_returning())
        .get_result(conn)?;

    Ok(updated)
}

/// Flags the row as deleted. Rows are never removed because other tables
/// reference them.
pub fn set_reservation_deleted(conn: &mut PgConnection, id: i32) -> Result<models::Reservation, DbError> {
    use crate::schema::reservations::dsl::{reservations, is_deleted};

    let flagged = diesel::update(reservations.find(id))
        .set(is_deleted.eq(true))
        .returning(models::Reservation::as_returning())
        .get_result(conn)?;

    Ok(flagged)
}

/// Live reservations starting within the inclusive date range.
pub fn reservations_between(
    conn: &mut PgConnection,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<models::Reservation>, DbError> {
    use crate::schema::reservations::dsl::{reservations, start_time, is_deleted};

    let mut query = reservations
        .filter(is_deleted.eq(false))
        .select(models::Reservation::as_select())
        .into_boxed();

    if let Some(from) = from {
        query = query.filter(start_time.ge(from.and_time(NaiveTime::MIN)));
    }
    if let Some(next_day) = to.and_then(|to| to.succ_opt()) {
        query = query.filter(start_time.lt(next_day.and_time(NaiveTime::MIN)));
    }

    Ok(query.order(start_time.asc()).load(conn)?)
}

/// Moves a reservation along its lifecycle when a timer fires.
///
/// Returns the new status, or `None` when the timer no longer applies.
pub fn apply_lifecycle_event(
    conn: &mut PgConnection,
    id: i32,
    event: LifecycleEvent,
    due_at: NaiveDateTime,
) -> Result<Option<ReservationStatus>, DbError> {
    use crate::schema::reservations::dsl::{reservations, status};

    conn.transaction(|conn| {
        let reservation = reservations
            .find(id)
            .select(models::Reservation::as_select())
            .for_update()
            .first(conn)
            .optional()?;

        let next = match reservation.and_then(|r| r.transition_for(event, due_at)) {
            Some(next) => next,
            None => return Ok(None),
        };

        diesel::update(reservations.find(id))
            .set(status.eq(next))
            .execute(conn)?;

        Ok(Some(next))
    })
}

pub fn list_users(conn: &mut PgConnection) -> Result<Vec<models::User>, DbError> {
    use crate::schema::users::dsl::{users, user_id};

    let all = users
        .order(user_id.asc())
        .select(models::User::as_select())
        .load(conn)?;

    Ok(all)
}

pub fn get_user_by_id(conn: &mut PgConnection, uid: &str) -> Result<models::User, DbError> {
    use crate::schema::users::dsl::{users, user_id};

    let user = users
        .filter(user_id.eq(uid))
        .select(models::User::as_select())
        .first(conn)?;

    Ok(user)
}

pub fn insert_new_user(conn: &mut PgConnection, new_user: &models::NewUser) -> Result<models::User, DbError> {
    use crate::schema::users::dsl::users;

    if let Some(semester) = new_user.semester {
        if !(1..=12).contains(&semester) {
            return Err("semester must be between 1 and 12".into());
        }
    }

    let user = diesel::insert_into(users)
        .values(new_user)
        .returning(models::User::as_returning())
        .get_result(conn)?;

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::OUT_OF_HOURS_MESSAGE;

    fn form(start: &str, end: &str) -> models::ReservationForm {
        models::ReservationForm {
            user_id: "A01234567".to_string(),
            room_id: 3,
            start_time: start.to_string(),
            end_time: end.to_string(),
            purpose: "  Práctica de soldadura ".to_string(),
            status: None,
        }
    }

    #[test]
    fn new_booking_defaults_to_pending_and_trims_purpose() {
        let changes = prepare_reservation(&form("2024-05-20 09:00:00", "2024-05-20 11:00:00"), true).unwrap();
        assert_eq!(changes.status, ReservationStatus::Pending);
        assert_eq!(changes.purpose, "Práctica de soldadura");
        assert_eq!(changes.room_id, 3);
    }

    #[test]
    fn new_booking_outside_business_hours_is_rejected() {
        let err = prepare_reservation(&form("2024-05-20 20:30:00", "2024-05-20 21:30:00"), true).unwrap_err();
        assert_eq!(err.to_string(), OUT_OF_HOURS_MESSAGE);
    }

    #[test]
    fn admin_edit_skips_business_hours() {
        let mut edit = form("2024-05-20 22:00:00", "2024-05-20 23:00:00");
        edit.status = Some(ReservationStatus::Confirmed);
        let changes = prepare_reservation(&edit, false).unwrap();
        assert_eq!(changes.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn admin_edit_must_name_the_status() {
        let err = prepare_reservation(&form("2024-05-20 09:00:00", "2024-05-20 10:00:00"), false).unwrap_err();
        assert_eq!(err.to_string(), "status is required");
    }

    #[test]
    fn offset_timestamps_are_checked_on_their_wall_clock() {
        let afternoon = prepare_reservation(&form("2024-05-20T16:00:00-06:00", "2024-05-20T17:00:00-06:00"), true).unwrap();
        assert_eq!(afternoon.start_time, NaiveDateTime::parse_from_str("2024-05-20 16:00:00", "%Y-%m-%d %H:%M:%S").unwrap());

        let err = prepare_reservation(&form("2024-05-20T02:00:00-06:00", "2024-05-20T03:00:00-06:00"), true).unwrap_err();
        assert_eq!(err.to_string(), OUT_OF_HOURS_MESSAGE);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = prepare_reservation(&form("2024-05-20 10:00:00", "2024-05-20 10:00:00"), false).unwrap_err();
        assert_eq!(err.to_string(), "start_time must be before end_time");
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let err = prepare_reservation(&form("20/05/2024", "2024-05-20 10:00:00"), true).unwrap_err();
        assert_eq!(err.to_string(), "start_time not in correct format");
    }

    #[test]
    fn blank_purpose_is_rejected() {
        let mut blank = form("2024-05-20 09:00:00", "2024-05-20 10:00:00");
        blank.purpose = "   ".to_string();
        assert_eq!(prepare_reservation(&blank, true).unwrap_err().to_string(), "purpose is required");
    }
}
