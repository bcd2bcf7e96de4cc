//! Admin table filtering: requester search, one room, any of several statuses.

use std::collections::HashSet;

use serde::Deserialize;

use crate::models::{Reservation, ReservationStatus};
use crate::rooms::RoomDirectory;

/// Label the room dropdown shows before anything is picked.
pub const ROOM_PLACEHOLDER: &str = "Selecciona una sala";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    search: String,
    room: Option<String>,
    statuses: HashSet<ReservationStatus>,
}

impl ReservationFilter {
    /// An empty or placeholder room counts as no room selected.
    pub fn new(search: &str, room: Option<&str>, statuses: HashSet<ReservationStatus>) -> Self {
        let room = room
            .filter(|name| !name.is_empty() && *name != ROOM_PLACEHOLDER)
            .map(str::to_owned);
        Self {
            search: search.to_lowercase(),
            room,
            statuses,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.room.is_none() && self.statuses.is_empty()
    }

    pub fn matches(&self, reservation: &Reservation, rooms: &RoomDirectory) -> bool {
        let search_ok = self.search.is_empty() || reservation.user_id.to_lowercase().contains(&self.search);
        let room_ok = match &self.room {
            None => true,
            Some(selected) => rooms.name_of(reservation.room_id) == Some(selected.as_str()),
        };
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&reservation.status);
        search_ok && room_ok && status_ok
    }

    /// Keeps matching reservations in their original order.
    pub fn apply(&self, reservations: Vec<Reservation>, rooms: &RoomDirectory) -> Vec<Reservation> {
        reservations
            .into_iter()
            .filter(|reservation| self.matches(reservation, rooms))
            .collect()
    }
}

/// Query string of `GET /reservations`.
///
/// `status` is a comma separated list of labels, e.g. `Pendiente,Activa`.
#[derive(Debug, Default, Deserialize)]
pub struct ReservationQuery {
    pub search: Option<String>,
    pub room: Option<String>,
    pub status: Option<String>,
}

impl ReservationQuery {
    pub fn to_filter(&self) -> Result<ReservationFilter, String> {
        let statuses = match &self.status {
            None => HashSet::new(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::parse::<ReservationStatus>)
                .collect::<Result<HashSet<_>, _>>()?,
        };
        Ok(ReservationFilter::new(
            self.search.as_deref().unwrap_or_default(),
            self.room.as_deref(),
            statuses,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Room;
    use chrono::NaiveDateTime;

    fn rooms() -> RoomDirectory {
        RoomDirectory::from_rooms(vec![
            Room { room_id: 1, name: "X".to_string(), capacity: None, description: None },
            Room { room_id: 2, name: "Y".to_string(), capacity: None, description: None },
        ])
    }

    fn reservation(id: i32, user_id: &str, room_id: i32, status: ReservationStatus) -> Reservation {
        let start = NaiveDateTime::parse_from_str("2024-05-20 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        Reservation {
            reservation_id: id,
            user_id: user_id.to_string(),
            room_id,
            start_time: start,
            end_time: start + chrono::Duration::hours(1),
            purpose: "Proyecto".to_string(),
            status,
            is_deleted: false,
            created_at: None,
        }
    }

    fn sample() -> Vec<Reservation> {
        vec![
            reservation(1, "A1", 1, ReservationStatus::Pending),
            reservation(2, "B2", 2, ReservationStatus::Confirmed),
            reservation(3, "a10", 2, ReservationStatus::Pending),
            reservation(4, "C3", 7, ReservationStatus::Active),
        ]
    }

    fn statuses(list: &[ReservationStatus]) -> HashSet<ReservationStatus> {
        list.iter().copied().collect()
    }

    #[test]
    fn empty_filter_keeps_everything_in_order() {
        let filter = ReservationFilter::new("", None, HashSet::new());
        assert!(filter.is_empty());
        assert_eq!(filter.apply(sample(), &rooms()), sample());
    }

    #[test]
    fn placeholder_room_is_no_selection() {
        let filter = ReservationFilter::new("", Some(ROOM_PLACEHOLDER), HashSet::new());
        assert!(filter.is_empty());
        assert_eq!(filter.apply(sample(), &rooms()).len(), 4);
        assert!(ReservationFilter::new("", Some(""), HashSet::new()).is_empty());
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let input = vec![
            reservation(1, "A1", 1, ReservationStatus::Pending),
            reservation(2, "B2", 2, ReservationStatus::Confirmed),
        ];
        let out = ReservationFilter::new("a1", Some(""), HashSet::new()).apply(input, &rooms());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_id, "A1");

        let ids: Vec<i32> = ReservationFilter::new("A1", None, HashSet::new())
            .apply(sample(), &rooms())
            .iter()
            .map(|r| r.reservation_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn room_and_status_are_conjunctive() {
        let filter = ReservationFilter::new("", Some("X"), statuses(&[ReservationStatus::Confirmed]));
        assert!(filter.apply(sample(), &rooms()).is_empty());

        let filter = ReservationFilter::new("", Some("Y"), statuses(&[ReservationStatus::Confirmed]));
        let out = filter.apply(sample(), &rooms());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].reservation_id, 2);
    }

    #[test]
    fn status_set_matches_any_member() {
        let filter = ReservationFilter::new(
            "",
            None,
            statuses(&[ReservationStatus::Pending, ReservationStatus::Active]),
        );
        let ids: Vec<i32> = filter.apply(sample(), &rooms()).iter().map(|r| r.reservation_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn unmapped_room_never_matches_a_selected_room() {
        let filter = ReservationFilter::new("c3", Some("X"), HashSet::new());
        assert!(filter.apply(sample(), &rooms()).is_empty());
        let filter = ReservationFilter::new("c3", None, HashSet::new());
        assert_eq!(filter.apply(sample(), &rooms()).len(), 1);
    }

    #[test]
    fn filtering_twice_is_the_same_as_once() {
        let filter = ReservationFilter::new("a", Some("Y"), statuses(&[ReservationStatus::Pending]));
        let once = filter.apply(sample(), &rooms());
        let twice = filter.apply(once.clone(), &rooms());
        assert_eq!(once, twice);
    }

    #[test]
    fn query_parses_status_list() {
        let query = ReservationQuery {
            search: Some("A".to_string()),
            room: Some("Graveyard".to_string()),
            status: Some("Pendiente, Activa,".to_string()),
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(
            filter,
            ReservationFilter::new(
                "a",
                Some("Graveyard"),
                statuses(&[ReservationStatus::Pending, ReservationStatus::Active])
            )
        );
    }

    #[test]
    fn query_rejects_unknown_status() {
        let query = ReservationQuery {
            status: Some("Pendiente,Borrada".to_string()),
            ..Default::default()
        };
        assert_eq!(
            query.to_filter().unwrap_err(),
            "Unrecognized reservation status: Borrada"
        );
    }
}
