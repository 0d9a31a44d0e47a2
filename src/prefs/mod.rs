use std::{fmt, str::FromStr, sync::Arc};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use log::{debug, warn};

use crate::room::{self, RoomState};

pub mod store;

pub use self::store::FileStore;

/// Plugin scope of every preference read by the notifier.
pub const PLUGIN: &str = "google_calendar";

/// Preferences understood by the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefKey {
    CalendarId,
    Autoreply,
    AnnounceStart,
    AnnounceEnd,
    Timezone,
}

impl PrefKey {
    pub const ALL: [PrefKey; 5] = [
        PrefKey::CalendarId,
        PrefKey::Autoreply,
        PrefKey::AnnounceStart,
        PrefKey::AnnounceEnd,
        PrefKey::Timezone,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrefKey::CalendarId => "calendar-id",
            PrefKey::Autoreply => "autoreply",
            PrefKey::AnnounceStart => "announce-start",
            PrefKey::AnnounceEnd => "announce-end",
            PrefKey::Timezone => "timezone",
        }
    }
}

impl fmt::Display for PrefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PrefKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::ALL.iter().find(|key| key.name() == s) {
            Some(key) => Ok(*key),
            None => bail!("unknown preference '{}'", s),
        }
    }
}

/// Key/value store scoped by room and plugin.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Returns the stored value, or `default` when the key is absent.
    /// An absent key without default is an error.
    async fn get(
        &self,
        room: &str,
        plugin: &str,
        key: &str,
        default: Option<&str>,
    ) -> Result<String, anyhow::Error>;

    async fn set(&self, room: &str, plugin: &str, key: &str, value: &str) -> Result<(), anyhow::Error>;

    /// Returns whether something was removed.
    async fn remove(&self, room: &str, plugin: &str, key: &str) -> Result<bool, anyhow::Error>;

    async fn list(&self, room: &str, plugin: &str) -> Result<Vec<(String, String)>, anyhow::Error>;
}

/// Loads the settings of a room from the preference store.
pub struct PreferenceLoader {
    store: Arc<dyn PreferenceStore>,
    ttl: Duration,
    default_timezone: String,
}

impl PreferenceLoader {
    pub fn new(store: Arc<dyn PreferenceStore>, ttl: Duration, default_timezone: &str) -> Self {
        Self {
            store,
            ttl,
            default_timezone: default_timezone.to_string(),
        }
    }

    /// Reloads the settings when they are older than the ttl.
    /// The caller must hold the room lock.
    pub async fn refresh_if_stale(
        &self,
        room_id: &str,
        state: &mut RoomState,
        now: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        if !state.config_stale(now, self.ttl) {
            return Ok(());
        }

        self.load(room_id, state, now).await
    }

    /// Reloads the settings unconditionally.
    ///
    /// A missing calendar id or an unknown timezone abort the load and keep
    /// the previous values. Flags that do not parse fall back to `false`.
    pub async fn load(
        &self,
        room_id: &str,
        state: &mut RoomState,
        now: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        debug!("loading preferences for room {}", room_id);

        let calendar_id = match self
            .store
            .get(room_id, PLUGIN, PrefKey::CalendarId.name(), None)
            .await
        {
            Ok(value) => value,
            Err(err) => bail!(
                "failed to load calendar-id preference for room {:?}: {:#}",
                room_id,
                err
            ),
        };
        state.calendar_id = calendar_id;

        state.autoreply = self.load_bool(room_id, PrefKey::Autoreply).await;
        state.announce_start = self.load_bool(room_id, PrefKey::AnnounceStart).await;
        state.announce_end = self.load_bool(room_id, PrefKey::AnnounceEnd).await;

        let name = self
            .store
            .get(
                room_id,
                PLUGIN,
                PrefKey::Timezone.name(),
                Some(self.default_timezone.as_str()),
            )
            .await
            .with_context(|| format!("failed to load timezone preference for room {:?}", room_id))?;
        state.timezone = name
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("could not load timezone info for '{}': {}", name, e))?;

        state.config_fetched_at = room::advance(state.config_fetched_at, now);
        state.config_dirty = false;

        Ok(())
    }

    async fn load_bool(&self, room_id: &str, key: PrefKey) -> bool {
        let value = match self.store.get(room_id, PLUGIN, key.name(), Some("false")).await {
            Ok(value) => value,
            Err(err) => {
                warn!("unable to read {} for room {}: {:#}", key, room_id, err);
                return false;
            }
        };

        match value.parse::<bool>() {
            Ok(value) => value,
            Err(err) => {
                warn!("unable to parse boolean pref value {:?} for {}: {}", value, key, err);
                false
            }
        }
    }
}
