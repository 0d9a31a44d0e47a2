use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use crate::calendar::Event;

pub mod registry;

pub use self::registry::{Lookup, Registry};

/// A chat room the notifier knows about.
/// The id never changes, everything else lives behind the room lock.
#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub state: Mutex<RoomState>,
}

impl Room {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(RoomState::default()),
        }
    }
}

/// Mutable part of a room: settings loaded from the preferences,
/// the cached calendar snapshot and the bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct RoomState {
    /// Feed of the room calendar. Empty until the preferences are loaded.
    pub calendar_id: String,
    /// Only used to display dates.
    pub timezone: Tz,
    pub autoreply: bool,
    pub announce_start: bool,
    pub announce_end: bool,
    /// Last fetched snapshot, replaced as a whole.
    pub events: Arc<[Event]>,
    /// Last automatic reply sent in the room.
    pub last_reply_at: Option<DateTime<Utc>>,
    /// Last successful preference load.
    pub config_fetched_at: Option<DateTime<Utc>>,
    /// Last successful calendar fetch.
    pub events_fetched_at: Option<DateTime<Utc>>,
    /// Set when the preferences changed under us.
    pub config_dirty: bool,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            calendar_id: String::new(),
            timezone: Tz::UTC,
            autoreply: false,
            announce_start: false,
            announce_end: false,
            events: Arc::from(Vec::new()),
            last_reply_at: None,
            config_fetched_at: None,
            events_fetched_at: None,
            config_dirty: false,
        }
    }
}

impl RoomState {
    pub fn config_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.config_dirty || is_stale(self.config_fetched_at, now, ttl)
    }

    pub fn events_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_stale(self.events_fetched_at, now, ttl)
    }
}

/// A value is stale once it is strictly older than `ttl`.
/// Something never fetched is always stale.
pub fn is_stale(fetched_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match fetched_at {
        Some(at) => now - at > ttl,
        None => true,
    }
}

/// Keeps a timestamp from going backwards.
pub(crate) fn advance(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(previous.map_or(now, |at| at.max(now)))
}
