use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::{
    calendar::Event,
    room::{Registry, RoomState},
};

/// Sends text to a chat room. Delivery is best effort.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn reply(&self, room_id: &str, text: &str);
}

/// Message sent for an event without description.
pub fn default_message(name: &str) -> String {
    format!("Calendar event: {:?}", name)
}

/// Text of the automatic reply for an event.
pub fn reply_text(event: &Event) -> String {
    if event.description.is_empty() {
        default_message(&event.name)
    } else {
        event.description.clone()
    }
}

/// Answers chat activity with the calendar events in progress.
///
/// Nothing is ever scheduled in the background: a failed or expired cache is
/// only refreshed by the next activity in the room.
pub struct Notifier {
    registry: Arc<Registry>,
    responder: Arc<dyn Responder>,
    cooldown: Duration,
}

impl Notifier {
    pub fn new(registry: Arc<Registry>, responder: Arc<dyn Responder>, cooldown: Duration) -> Self {
        Self {
            registry,
            responder,
            cooldown,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn on_activity(&self, room_id: &str) {
        self.on_activity_at(room_id, Utc::now()).await;
    }

    /// Handles one chat event seen at `now`.
    ///
    /// The room lock is held while the preferences and the events are
    /// refreshed, replies are sent once it is released.
    pub async fn on_activity_at(&self, room_id: &str, now: DateTime<Utc>) {
        let room = self.registry.get_or_create(room_id, now).await;

        let replies = {
            let mut state = room.state.lock().await;

            if let Err(err) = self
                .registry
                .preferences()
                .refresh_if_stale(room_id, &mut state, now)
                .await
            {
                warn!("room {}: {:#}", room_id, err);
            }

            match self
                .registry
                .events()
                .refresh_if_stale(room_id, &mut state, now)
                .await
            {
                Ok(events) => self.autoreplies(room_id, &mut state, &events, now),
                Err(err) => vec![format!("Error while getting calendar data: {:#}", err)],
            }
        };

        for text in replies {
            self.responder.reply(room_id, &text).await;
        }
    }

    /// At most one reply per cycle: the first event in progress that passes
    /// the cooldown updates `last_reply_at`, which then silences the others.
    fn autoreplies(
        &self,
        room_id: &str,
        state: &mut RoomState,
        events: &[Event],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        if !state.autoreply {
            return vec![];
        }

        let mut replies = vec![];
        for event in events.iter().filter(|event| event.in_progress(now)) {
            if let Some(last) = state.last_reply_at {
                if now - last < self.cooldown {
                    debug!(
                        "room {}: not autoresponding to {:?}, a message was sent at {}",
                        room_id, event.name, last
                    );
                    continue;
                }
            }

            replies.push(reply_text(event));
            state.last_reply_at = Some(now);
        }

        replies
    }
}
