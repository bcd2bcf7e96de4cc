use std::collections::HashMap;

use crate::models::Room;

/// Room id to display name, as loaded from the `rooms` table.
///
/// Ids without a row resolve to `None` and are rendered as `null`.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    names: HashMap<i32, String>,
}

impl RoomDirectory {
    pub fn from_rooms<I>(rooms: I) -> Self
    where
        I: IntoIterator<Item = Room>,
    {
        Self {
            names: rooms.into_iter().map(|room| (room.room_id, room.name)).collect(),
        }
    }

    pub fn name_of(&self, room_id: i32) -> Option<&str> {
        self.names.get(&room_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
