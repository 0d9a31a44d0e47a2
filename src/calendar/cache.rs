use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{error, info};

use crate::room::{self, RoomState};

use super::{Event, EventSource};

/// Keeps the event snapshot of each room fresh enough.
///
/// Every method expects the room lock to be held by the caller for the whole
/// call, fetch included. This is what limits a room to one fetch at a time
/// and what keeps readers from seeing a half replaced snapshot.
pub struct EventCache {
    source: Arc<dyn EventSource>,
    ttl: Duration,
}

impl EventCache {
    pub fn new(source: Arc<dyn EventSource>, ttl: Duration) -> Self {
        Self { source, ttl }
    }

    /// Returns the cached snapshot, fetching a new one first when it expired.
    /// On failure the previous snapshot stays in place for the next caller.
    pub async fn refresh_if_stale(
        &self,
        room_id: &str,
        state: &mut RoomState,
        now: DateTime<Utc>,
    ) -> Result<Arc<[Event]>, anyhow::Error> {
        if !state.events_stale(now, self.ttl) {
            return Ok(state.events.clone());
        }

        self.refresh(room_id, state, now).await
    }

    /// Fetches the room calendar regardless of the snapshot age.
    pub async fn refresh(
        &self,
        room_id: &str,
        state: &mut RoomState,
        now: DateTime<Utc>,
    ) -> Result<Arc<[Event]>, anyhow::Error> {
        match self.source.fetch_events(&state.calendar_id, now).await {
            Ok(events) => {
                info!("room {}: cached {} events", room_id, events.len());
                state.events = Arc::from(events);
                state.events_fetched_at = room::advance(state.events_fetched_at, now);
                Ok(state.events.clone())
            }
            Err(err) => {
                error!("room {}: failed to fetch calendar events: {:#}", room_id, err);
                Err(err)
            }
        }
    }
}
