use anyhow::Context;
use chrono::Duration;
use chrono_tz::Tz;
use serde::Deserialize;

/// Timezone used when a room never set the `timezone` preference.
pub const DEFAULT_TIMEZONE: &str = "America/Los_Angeles";

#[derive(Deserialize, Debug, Clone, Default)]
/// Configuration regarding the discord bot configuration
/// this includes the token of the discord bot.
pub struct DiscordConfig {
    pub token: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
/// Specifies where the room preferences are persisted.
pub struct StorageConfig {
    /// Relative or absolute path to the preference database.
    /// `~` and environment variables are expanded.
    pub path: String,
}

#[derive(Deserialize, Debug, Clone)]
/// Behaviour of the calendar notifier.
/// Durations use the humantime syntax (`10m`, `90m`, `1h`, `2d`...).
pub struct NotifierConfig {
    /// Rooms (discord channel ids) the notifier is attached to.
    /// Activity anywhere else is ignored.
    #[serde(default)]
    pub rooms: Vec<String>,
    /// Maximum age of the room preferences before they are reloaded.
    #[serde(default = "default_config_ttl")]
    pub config_ttl: String,
    /// Maximum age of the cached events before the calendar is fetched again.
    #[serde(default = "default_events_ttl")]
    pub events_ttl: String,
    /// Minimum time between two automatic replies in the same room.
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
    /// How far after the fetch time events are kept.
    /// Should stay above `events_ttl` or events starting before the next
    /// fetch are missed.
    #[serde(default = "default_lookahead")]
    pub lookahead: String,
    /// Default of the `timezone` preference.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// User agent sent with the calendar requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_config_ttl() -> String {
    "10m".to_string()
}

fn default_events_ttl() -> String {
    "90m".to_string()
}

fn default_cooldown() -> String {
    "1h".to_string()
}

fn default_lookahead() -> String {
    "1d".to_string()
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_user_agent() -> String {
    concat!("roomcal/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            rooms: vec![],
            config_ttl: default_config_ttl(),
            events_ttl: default_events_ttl(),
            cooldown: default_cooldown(),
            lookahead: default_lookahead(),
            default_timezone: default_timezone(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
/// Main configuration structure
/// It just contains all the configuration blocks.
pub struct Config {
    pub discord: DiscordConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Parsed form of the notifier durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub config_ttl: Duration,
    pub events_ttl: Duration,
    pub cooldown: Duration,
    pub lookahead: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            config_ttl: Duration::minutes(10),
            events_ttl: Duration::minutes(90),
            cooldown: Duration::hours(1),
            lookahead: Duration::days(1),
        }
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, anyhow::Error> {
    Duration::from_std(
        humantime::parse_duration(value)
            .with_context(|| format!("invalid format in the {} duration", name))?,
    )
    .with_context(|| format!("{} is out of range", name))
}

impl TryFrom<&NotifierConfig> for Timings {
    type Error = anyhow::Error;

    fn try_from(config: &NotifierConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            config_ttl: parse_duration("config_ttl", &config.config_ttl)?,
            events_ttl: parse_duration("events_ttl", &config.events_ttl)?,
            cooldown: parse_duration("cooldown", &config.cooldown)?,
            lookahead: parse_duration("lookahead", &config.lookahead)?,
        })
    }
}

impl NotifierConfig {
    /// Validates the default timezone name.
    pub fn timezone(&self) -> Result<Tz, anyhow::Error> {
        self.default_timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid default timezone '{}': {}", self.default_timezone, e))
    }
}
