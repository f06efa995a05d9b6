//! Room-enter API response parsing.

use serde_json::Value;

use danmu_core::error::AdapterError;

/// Status code the room-enter API uses for "on air".
pub const STATUS_LIVE: i64 = 2;

/// What a liveness probe learns about a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Numeric room id of the current broadcast; empty if none.
    pub room_id: String,
    pub sec_uid: String,
    pub status: i64,
}

impl RoomInfo {
    pub fn is_live(&self) -> bool {
        self.status == STATUS_LIVE && !self.room_id.is_empty()
    }

    /// Parse `{"data": {"user": {...}, "data": [{"id_str": .., "status": ..}]}}`.
    pub fn from_enter_response(body: &Value) -> Result<Self, AdapterError> {
        let data = &body["data"];
        let user = data
            .get("user")
            .filter(|u| !u.is_null())
            .ok_or_else(|| AdapterError::UnexpectedResponse(format!("no user in room info: {body}")))?;
        let rooms = data["data"]
            .as_array()
            .ok_or_else(|| AdapterError::UnexpectedResponse(format!("no room list in room info: {body}")))?;

        let (room_id, status) = rooms
            .first()
            .map(|room| {
                (
                    room["id_str"].as_str().unwrap_or_default().to_owned(),
                    room["status"].as_i64().unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        Ok(Self {
            room_id,
            sec_uid: user["sec_uid"].as_str().unwrap_or_default().to_owned(),
            status,
        })
    }
}
