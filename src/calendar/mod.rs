use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod cache;
pub mod feed;

pub use self::feed::IcalSource;

#[derive(Debug, Default, Eq, PartialEq, Clone)]
/// A calendar event as seen by the notifier.
pub struct Event {
    /// Title of the event.
    pub name: String,
    /// Free text body. When empty a default message is generated.
    pub description: String,
    /// Start of the event.
    pub start: DateTime<Utc>,
    /// End of the event.
    pub end: DateTime<Utc>,
    /// Where the event takes place.
    pub location: String,
    /// Unique id of the event.
    pub uid: String,
}

impl Event {
    /// An event is in progress when its interval strictly contains `at`.
    pub fn in_progress(&self, at: DateTime<Utc>) -> bool {
        self.start < at && at < self.end
    }
}

/// Something able to list the events of a calendar around a point in time.
///
/// Implementations must be idempotent, the cache calls them again whenever
/// its snapshot expires.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(
        &self,
        calendar_id: &str,
        reference: DateTime<Utc>,
    ) -> Result<Vec<Event>, anyhow::Error>;
}
