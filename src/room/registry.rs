use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{calendar::cache::EventCache, prefs::PreferenceLoader};

use super::{Room, RoomState};

/// Outcome of [`Registry::peek`].
#[derive(Debug)]
pub enum Lookup {
    /// The room has not been used yet.
    Unknown,
    /// Someone holds the room lock, usually for a fetch.
    Busy,
    Ready(RoomState),
}

/// Every room seen by the process.
///
/// Two levels of locking: the map lock only covers lookups and insertions,
/// each room carries its own lock for its content. Rooms are created on first
/// use and live as long as the registry.
pub struct Registry {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    preferences: PreferenceLoader,
    events: EventCache,
}

impl Registry {
    pub fn new(preferences: PreferenceLoader, events: EventCache) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            preferences,
            events,
        }
    }

    pub fn preferences(&self) -> &PreferenceLoader {
        &self.preferences
    }

    pub fn events(&self) -> &EventCache {
        &self.events
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(room_id).cloned()
    }

    /// Copies the state of a known room without creating it and without
    /// waiting on its lock.
    pub async fn peek(&self, room_id: &str) -> Lookup {
        let room = match self.get(room_id).await {
            Some(room) => room,
            None => return Lookup::Unknown,
        };

        if let Ok(state) = room.state.try_lock() {
            return Lookup::Ready(state.clone());
        }
        Lookup::Busy
    }

    /// Returns the room, creating and warming it up on first use.
    ///
    /// The first call for a room blocks until its calendar has been fetched
    /// once; so do concurrent calls for the same room, which wait on the room
    /// lock held during the warm-up. This only happens once per room.
    pub async fn get_or_create(&self, room_id: &str, now: DateTime<Utc>) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        let room = Arc::new(Room::new(room_id));
        // nobody can see the room yet, this never waits
        let mut state = room.state.lock().await;
        rooms.insert(room_id.to_string(), room.clone());
        drop(rooms);

        info!("room {}: created, warming up the calendar cache", room_id);
        self.warm_up(&room.id, &mut state, now).await;
        drop(state);

        room
    }

    /// Forces a preference reload on the next activity of the room.
    pub async fn mark_config_stale(&self, room_id: &str) {
        if let Some(room) = self.get(room_id).await {
            room.state.lock().await.config_dirty = true;
        }
    }

    async fn warm_up(&self, room_id: &str, state: &mut RoomState, now: DateTime<Utc>) {
        if let Err(err) = self.preferences.load(room_id, state, now).await {
            warn!("room {}: {:#}", room_id, err);
        }

        if let Err(err) = self.events.refresh(room_id, state, now).await {
            warn!("room {}: initial calendar fetch failed: {:#}", room_id, err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{atomic::Ordering, Arc};

    use chrono::{Duration, TimeZone, Utc};

    use super::{Lookup, Registry};
    use crate::{
        calendar::cache::EventCache,
        prefs::PreferenceLoader,
        testing::{event, FakeSource, MemoryPrefs},
    };

    fn registry(source: &Arc<FakeSource>, prefs: &Arc<MemoryPrefs>) -> Registry {
        Registry::new(
            PreferenceLoader::new(prefs.clone(), Duration::minutes(10), "America/Los_Angeles"),
            EventCache::new(source.clone(), Duration::minutes(90)),
        )
    }

    #[tokio::test]
    async fn same_id_same_room() {
        let source = Arc::new(FakeSource::default());
        let prefs = Arc::new(MemoryPrefs::default());
        let registry = registry(&source, &prefs);
        let now = Utc::now();

        let a = registry.get_or_create("room", now).await;
        let b = registry.get_or_create("room", now).await;
        let c = registry.get_or_create("other", now).await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        // one warm-up per room
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn creation_warms_the_cache() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let source = Arc::new(FakeSource::with_events(vec![event(
            "Standup",
            "",
            t,
            t + Duration::minutes(15),
        )]));
        let prefs = Arc::new(MemoryPrefs::default());
        prefs.put("room", "calendar-id", "https://cal.example/team.ics");
        let registry = registry(&source, &prefs);

        let room = registry.get_or_create("room", t).await;
        let state = room.state.lock().await;

        assert_eq!(state.calendar_id, "https://cal.example/team.ics");
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events_fetched_at, Some(t));
        assert_eq!(state.config_fetched_at, Some(t));
        assert_eq!(
            source.last_request(),
            Some(("https://cal.example/team.ics".to_string(), t))
        );
    }

    #[tokio::test]
    async fn failed_warm_up_leaves_the_room_stale() {
        let source = Arc::new(FakeSource::default());
        source.fail_with("calendar is down");
        let prefs = Arc::new(MemoryPrefs::default());
        let registry = registry(&source, &prefs);

        let room = registry.get_or_create("room", Utc::now()).await;
        let state = room.state.lock().await;

        assert!(state.events.is_empty());
        assert!(state.events_fetched_at.is_none());
        assert!(state.config_fetched_at.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_use_fetches_once() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let source = Arc::new(FakeSource::with_events(vec![event("Standup", "", t, t)]));
        source.set_delay(std::time::Duration::from_millis(50));
        let prefs = Arc::new(MemoryPrefs::default());
        let registry = Arc::new(registry(&source, &prefs));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let room = registry.get_or_create("room", t).await;
                    let state = room.state.lock().await;
                    (room.clone(), state.events_fetched_at)
                })
            })
            .collect();

        let first = registry.get_or_create("room", t).await;
        for task in tasks {
            let (room, fetched_at) = task.await.unwrap();
            assert!(Arc::ptr_eq(&room, &first));
            assert_eq!(fetched_at, Some(t));
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn peek_never_creates_a_room() {
        let source = Arc::new(FakeSource::default());
        let prefs = Arc::new(MemoryPrefs::default());
        let registry = registry(&source, &prefs);

        assert!(matches!(registry.peek("room").await, Lookup::Unknown));
        assert!(registry.get("room").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(prefs.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn peek_does_not_wait_for_the_room_lock() {
        let t = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let source = Arc::new(FakeSource::default());
        let prefs = Arc::new(MemoryPrefs::default());
        prefs.put("room", "calendar-id", "https://cal.example/team.ics");
        let registry = registry(&source, &prefs);
        let room = registry.get_or_create("room", t).await;

        match registry.peek("room").await {
            Lookup::Ready(state) => {
                assert_eq!(state.calendar_id, "https://cal.example/team.ics");
                assert_eq!(state.events_fetched_at, Some(t));
            }
            other => panic!("expected a ready room, got {:?}", other),
        }

        let _held = room.state.lock().await;
        assert!(matches!(registry.peek("room").await, Lookup::Busy));
    }

    #[tokio::test]
    async fn mark_config_stale_sets_the_flag() {
        let source = Arc::new(FakeSource::default());
        let prefs = Arc::new(MemoryPrefs::default());
        let registry = registry(&source, &prefs);

        registry.mark_config_stale("unknown").await;
        assert!(registry.get("unknown").await.is_none());

        let room = registry.get_or_create("room", Utc::now()).await;
        registry.mark_config_stale("room").await;
        assert!(room.state.lock().await.config_dirty);
    }
}
