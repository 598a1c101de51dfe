use serde_json::Value;
use time::OffsetDateTime;

pub const CHAT_MESSAGES: &str = "chat_messages";
pub const CHAT_ROOMS: &str = "chat_rooms";
pub const CHAT_PARTICIPANTS: &str = "chat_participants";
pub const APPROVAL_REQUESTS: &str = "approval_requests";
pub const NOTIFICATIONS: &str = "notifications";
pub const EVENTS: &str = "events";
pub const EVENT_COMMENTS: &str = "event_comments";
pub const USER_EVENT_INTERACTIONS: &str = "user_event_interactions";
pub const USER_PRESENCE: &str = "user_presence";
pub const CLUBS: &str = "clubs";

pub mod fields {
    pub const CLUB_ID: &str = "clubId";
    pub const CREATED_AT: &str = "createdAt";
    pub const EXPIRES_AT: &str = "expiresAt";
    pub const CHAT_ROOM_ID: &str = "chatRoomId";
    pub const EVENT_ID: &str = "eventId";
    pub const LAST_SEEN: &str = "lastSeen";
    pub const PINNED_MESSAGES: &str = "pinnedMessages";
    pub const MEDIA_ATTACHMENTS: &str = "mediaAttachments";
    pub const REACTIONS: &str = "reactions";
    pub const URL: &str = "url";
}

pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Stored form of an instant: Unix milliseconds.
pub fn timestamp(at: OffsetDateTime) -> Value {
    Value::from(unix_millis(at))
}
