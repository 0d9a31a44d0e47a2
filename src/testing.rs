//! In-memory stand-ins for the collaborators of the notifier.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    calendar::{Event, EventSource},
    notifier::Responder,
    prefs::{PreferenceStore, PLUGIN},
};

pub fn event(name: &str, description: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Event {
    Event {
        name: name.to_string(),
        description: description.to_string(),
        start,
        end,
        uid: name.to_string(),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeSource {
    events: Mutex<Vec<Event>>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<std::time::Duration>>,
    requests: Mutex<Vec<(String, DateTime<Utc>)>>,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_events(events: Vec<Event>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Default::default()
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn last_request(&self) -> Option<(String, DateTime<Utc>)> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn fetch_events(
        &self,
        calendar_id: &str,
        reference: DateTime<Utc>,
    ) -> Result<Vec<Event>, anyhow::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((calendar_id.to_string(), reference));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            bail!(message);
        }

        Ok(self.events.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryPrefs {
    values: Mutex<HashMap<(String, String, String), String>>,
    failing: Mutex<HashSet<String>>,
    pub reads: AtomicUsize,
}

impl MemoryPrefs {
    pub fn put(&self, room: &str, key: &str, value: &str) {
        self.values.lock().unwrap().insert(
            (room.to_string(), PLUGIN.to_string(), key.to_string()),
            value.to_string(),
        );
    }

    /// Makes every read of `key` fail.
    pub fn fail_key(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl PreferenceStore for MemoryPrefs {
    async fn get(
        &self,
        room: &str,
        plugin: &str,
        key: &str,
        default: Option<&str>,
    ) -> Result<String, anyhow::Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(key) {
            bail!("preference backend unavailable");
        }

        let values = self.values.lock().unwrap();
        match (
            values.get(&(room.to_string(), plugin.to_string(), key.to_string())),
            default,
        ) {
            (Some(value), _) => Ok(value.clone()),
            (None, Some(default)) => Ok(default.to_string()),
            (None, None) => bail!("preference {} is not set", key),
        }
    }

    async fn set(&self, room: &str, plugin: &str, key: &str, value: &str) -> Result<(), anyhow::Error> {
        self.values.lock().unwrap().insert(
            (room.to_string(), plugin.to_string(), key.to_string()),
            value.to_string(),
        );
        Ok(())
    }

    async fn remove(&self, room: &str, plugin: &str, key: &str) -> Result<bool, anyhow::Error> {
        Ok(self
            .values
            .lock()
            .unwrap()
            .remove(&(room.to_string(), plugin.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, room: &str, plugin: &str) -> Result<Vec<(String, String)>, anyhow::Error> {
        let mut values: Vec<(String, String)> = self
            .values
            .lock()
            .unwrap()
            .iter()
            .filter(|((r, p, _), _)| r == room && p == plugin)
            .map(|((_, _, k), v)| (k.clone(), v.clone()))
            .collect();
        values.sort();
        Ok(values)
    }
}

#[derive(Default)]
pub struct RecordingResponder {
    replies: tokio::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingResponder {
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.replies.lock().await.clone()
    }

    pub async fn texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .await
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn reply(&self, room_id: &str, text: &str) {
        let mut replies = self.replies.lock().await;
        replies.push((room_id.to_string(), text.to_string()));
    }
}
