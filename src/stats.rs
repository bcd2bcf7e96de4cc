//! Usage statistics for the admin dashboard.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::models::{Reservation, ReservationStatus};
use crate::rooms::RoomDirectory;

const TOP_USERS: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl StatisticsQuery {
    pub fn check(&self) -> Result<(), String> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start > end => {
                Err("startDate must not be after endDate".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUsage {
    pub room_id: i32,
    pub name: Option<String>,
    pub count: usize,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: ReservationStatus,
    pub count: usize,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct MonthCount {
    pub month: u32,
    pub year: i32,
    pub count: usize,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEngagement {
    pub user_id: String,
    pub count: usize,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_reservations: usize,
    pub active_users: usize,
    pub popular_rooms: Vec<RoomUsage>,
    pub status_breakdown: Vec<StatusCount>,
    pub reservations_by_time: Vec<HourCount>,
    pub monthly_trend: Vec<MonthCount>,
    pub user_engagement: Vec<UserEngagement>,
}

/// Aggregates the given reservations. Soft-deleted rows are skipped.
pub fn compute(reservations: &[Reservation], rooms: &RoomDirectory) -> Statistics {
    let live: Vec<&Reservation> = reservations.iter().filter(|r| !r.is_deleted).collect();

    let mut per_room: HashMap<i32, usize> = HashMap::new();
    let mut per_status: HashMap<ReservationStatus, usize> = HashMap::new();
    let mut per_hour: BTreeMap<u32, usize> = BTreeMap::new();
    let mut per_month: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    let mut per_user: HashMap<&str, usize> = HashMap::new();

    for reservation in &live {
        *per_room.entry(reservation.room_id).or_default() += 1;
        *per_status.entry(reservation.status).or_default() += 1;
        *per_hour.entry(reservation.start_time.hour()).or_default() += 1;
        *per_month
            .entry((reservation.start_time.year(), reservation.start_time.month()))
            .or_default() += 1;
        *per_user.entry(reservation.user_id.as_str()).or_default() += 1;
    }

    let mut popular_rooms: Vec<RoomUsage> = per_room
        .into_iter()
        .map(|(room_id, count)| RoomUsage {
            room_id,
            name: rooms.name_of(room_id).map(str::to_owned),
            count,
        })
        .collect();
    popular_rooms.sort_by(|a, b| b.count.cmp(&a.count).then(a.room_id.cmp(&b.room_id)));

    let status_breakdown = ReservationStatus::ALL
        .into_iter()
        .filter_map(|status| {
            per_status
                .get(&status)
                .map(|&count| StatusCount { status, count })
        })
        .collect();

    let mut user_engagement: Vec<UserEngagement> = per_user
        .into_iter()
        .map(|(user_id, count)| UserEngagement {
            user_id: user_id.to_string(),
            count,
        })
        .collect();
    user_engagement.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.user_id.cmp(&b.user_id)));
    let active_users = user_engagement.len();
    user_engagement.truncate(TOP_USERS);

    Statistics {
        total_reservations: live.len(),
        active_users,
        popular_rooms,
        status_breakdown,
        reservations_by_time: per_hour
            .into_iter()
            .map(|(hour, count)| HourCount { hour, count })
            .collect(),
        monthly_trend: per_month
            .into_iter()
            .map(|((year, month), count)| MonthCount { month, year, count })
            .collect(),
        user_engagement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Room;
    use chrono::NaiveDateTime;

    fn reservation(id: i32, user_id: &str, room_id: i32, start: &str, status: ReservationStatus) -> Reservation {
        let start_time = NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S").unwrap();
        Reservation {
            reservation_id: id,
            user_id: user_id.to_string(),
            room_id,
            start_time,
            end_time: start_time + chrono::Duration::hours(2),
            purpose: "Hackathon".to_string(),
            status,
            is_deleted: false,
            created_at: None,
        }
    }

    fn rooms() -> RoomDirectory {
        RoomDirectory::from_rooms(vec![
            Room { room_id: 1, name: "New Horizons".to_string(), capacity: Some(20), description: None },
            Room { room_id: 3, name: "PCB Factory".to_string(), capacity: None, description: None },
        ])
    }

    #[test]
    fn empty_input_gives_zeroes() {
        let stats = compute(&[], &rooms());
        assert_eq!(stats.total_reservations, 0);
        assert_eq!(stats.active_users, 0);
        assert!(stats.popular_rooms.is_empty());
        assert!(stats.monthly_trend.is_empty());
    }

    #[test]
    fn aggregates_rooms_statuses_hours_and_months() {
        let mut deleted = reservation(5, "A02", 3, "2024-06-01 10:00:00", ReservationStatus::Cancelled);
        deleted.is_deleted = true;
        let input = vec![
            reservation(1, "A01", 3, "2024-05-20 09:00:00", ReservationStatus::Confirmed),
            reservation(2, "A02", 1, "2024-05-21 09:30:00", ReservationStatus::Pending),
            reservation(3, "A01", 3, "2024-06-02 15:00:00", ReservationStatus::Completed),
            reservation(4, "A03", 9, "2023-12-31 18:00:00", ReservationStatus::Pending),
            deleted,
        ];
        let stats = compute(&input, &rooms());

        assert_eq!(stats.total_reservations, 4);
        assert_eq!(stats.active_users, 3);
        assert_eq!(
            stats.popular_rooms,
            vec![
                RoomUsage { room_id: 3, name: Some("PCB Factory".to_string()), count: 2 },
                RoomUsage { room_id: 1, name: Some("New Horizons".to_string()), count: 1 },
                RoomUsage { room_id: 9, name: None, count: 1 },
            ]
        );
        assert_eq!(
            stats.status_breakdown,
            vec![
                StatusCount { status: ReservationStatus::Pending, count: 2 },
                StatusCount { status: ReservationStatus::Confirmed, count: 1 },
                StatusCount { status: ReservationStatus::Completed, count: 1 },
            ]
        );
        assert_eq!(
            stats.reservations_by_time,
            vec![
                HourCount { hour: 9, count: 2 },
                HourCount { hour: 15, count: 1 },
                HourCount { hour: 18, count: 1 },
            ]
        );
        assert_eq!(
            stats.monthly_trend,
            vec![
                MonthCount { month: 12, year: 2023, count: 1 },
                MonthCount { month: 5, year: 2024, count: 2 },
                MonthCount { month: 6, year: 2024, count: 1 },
            ]
        );
        assert_eq!(stats.user_engagement[0], UserEngagement { user_id: "A01".to_string(), count: 2 });
        assert_eq!(stats.user_engagement[1].user_id, "A02");
    }

    #[test]
    fn engagement_keeps_only_the_top_ten() {
        let input: Vec<Reservation> = (0..12)
            .map(|i| reservation(i, &format!("U{:02}", i), 1, "2024-05-20 09:00:00", ReservationStatus::Pending))
            .collect();
        let stats = compute(&input, &rooms());
        assert_eq!(stats.active_users, 12);
        assert_eq!(stats.user_engagement.len(), 10);
        assert_eq!(stats.user_engagement[0].user_id, "U00");
    }

    #[test]
    fn serializes_with_dashboard_field_names() {
        let input = vec![reservation(1, "A01", 1, "2024-05-20 09:00:00", ReservationStatus::Active)];
        let value = serde_json::to_value(compute(&input, &rooms())).unwrap();
        assert_eq!(value["totalReservations"], 1);
        assert_eq!(value["popularRooms"][0]["roomId"], 1);
        assert_eq!(value["statusBreakdown"][0]["status"], "Activa");
        assert_eq!(value["monthlyTrend"][0]["month"], 5);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let query = StatisticsQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1),
        };
        assert!(query.check().is_err());
        let open = StatisticsQuery { start_date: NaiveDate::from_ymd_opt(2024, 6, 1), end_date: None };
        assert!(open.check().is_ok());
    }
}
