//! Decoded live-stream events.
//!
//! Every platform adapter normalises its wire messages into [`LiveEvent`].
//! The body is a closed tagged union; wire methods we do not model are kept
//! as [`EventBody::Unknown`] so handlers can still observe them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The author of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    /// Human-facing id shown on the platform (may be empty).
    #[serde(default)]
    pub display_id: String,
    pub nickname: String,
}

/// The kind of a wire message, derived from its method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Chat,
    Gift,
    Like,
    Member,
    Social,
    Unknown,
}

impl EventKind {
    /// Map a wire method name to its kind. Unrecognised names map to `Unknown`.
    pub fn from_method(method: &str) -> Self {
        match method {
            "WebcastChatMessage" => Self::Chat,
            "WebcastGiftMessage" => Self::Gift,
            "WebcastLikeMessage" => Self::Like,
            "WebcastMemberMessage" => Self::Member,
            "WebcastSocialMessage" => Self::Social,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::Gift => write!(f, "gift"),
            Self::Like => write!(f, "like"),
            Self::Member => write!(f, "member"),
            Self::Social => write!(f, "social"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A chat (danmaku) line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub user: User,
    pub content: String,
    /// Milliseconds since the Unix epoch, when the platform supplied one.
    pub event_time_ms: Option<u64>,
}

/// A gift sent to the streamer (or a co-host).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gift {
    pub user: User,
    pub to_user: Option<User>,
    pub gift_id: u64,
    pub gift_name: String,
    /// Unit price in diamonds.
    pub diamond_count: u64,
    pub repeat_count: u64,
    /// Combo count parsed from the display text, when present.
    pub combo_count: Option<u64>,
    /// `true` once a repeating gift streak has ended.
    pub repeat_end: bool,
    pub describe: String,
    pub image_url: Option<String>,
}

impl Gift {
    /// Diamonds represented by this event (price times combo or repeat).
    pub fn total_diamonds(&self) -> u64 {
        let count = self.combo_count.unwrap_or(self.repeat_count).max(1);
        self.diamond_count.saturating_mul(count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub user: User,
    pub count: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    /// Audience size reported with the join.
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Social {
    pub user: User,
    pub action: u64,
    pub follow_count: u64,
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    Chat(Chat),
    Gift(Gift),
    Like(Like),
    Member(Member),
    Social(Social),
    /// A message we do not model; the raw payload is preserved.
    Unknown {
        #[serde(with = "hex_bytes")]
        payload: Vec<u8>,
    },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Chat(_) => EventKind::Chat,
            Self::Gift(_) => EventKind::Gift,
            Self::Like(_) => EventKind::Like,
            Self::Member(_) => EventKind::Member,
            Self::Social(_) => EventKind::Social,
            Self::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// The user who produced the event, if the body carries one.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Chat(c) => Some(&c.user),
            Self::Gift(g) => Some(&g.user),
            Self::Like(l) => Some(&l.user),
            Self::Member(m) => Some(&m.user),
            Self::Social(s) => Some(&s.user),
            Self::Unknown { .. } => None,
        }
    }
}

/// A single decoded event, as delivered to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Platform message id; the dedup key.
    pub msg_id: u64,
    /// Wire method name, e.g. `WebcastChatMessage`.
    pub method: String,
    pub room_id: u64,
    /// When the platform created the message, in milliseconds.
    #[serde(default)]
    pub created_at_ms: Option<u64>,
    pub body: EventBody,
}

impl LiveEvent {
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }
}

/// Normalise a platform timestamp to milliseconds.
///
/// Ten-digit values are seconds and are scaled up; anything else is assumed
/// to already be milliseconds.
pub fn normalize_timestamp_ms(ts: u64) -> u64 {
    if (1_000_000_000..10_000_000_000).contains(&ts) {
        ts * 1000
    } else {
        ts
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
