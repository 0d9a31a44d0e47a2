use anyhow::bail;
use chrono_tz::Tz;
use futures::{Stream, StreamExt};
use poise::CreateReply;

use crate::{
    bot::CommandContext,
    prefs::{PrefKey, PLUGIN},
};

/// Rejects values the notifier would not understand.
fn validate(key: PrefKey, value: &str) -> Result<(), anyhow::Error> {
    match key {
        PrefKey::Autoreply | PrefKey::AnnounceStart | PrefKey::AnnounceEnd => {
            if value.parse::<bool>().is_err() {
                bail!("{} expects `true` or `false`, got {:?}", key, value);
            }
        }
        PrefKey::Timezone => {
            if value.parse::<Tz>().is_err() {
                bail!("unknown timezone {:?}", value);
            }
        }
        PrefKey::CalendarId => {
            if value.trim().is_empty() {
                bail!("the calendar id cannot be empty");
            }
        }
    }

    Ok(())
}

fn default_of(key: PrefKey, default_timezone: &str) -> Option<String> {
    match key {
        PrefKey::CalendarId => None,
        PrefKey::Timezone => Some(default_timezone.to_string()),
        _ => Some("false".to_string()),
    }
}

async fn autocomplete_key<'a>(
    _ctx: CommandContext<'_>,
    partial: &'a str,
) -> impl Stream<Item = String> + 'a {
    futures::stream::iter(PrefKey::ALL)
        .filter(move |key| futures::future::ready(key.name().starts_with(partial)))
        .map(|key| key.name().to_string())
}

async fn reply(ctx: CommandContext<'_>, content: String) -> Result<(), anyhow::Error> {
    ctx.send(CreateReply::default().ephemeral(true).content(content))
        .await?;
    Ok(())
}

#[poise::command(
    slash_command,
    prefix_command,
    rename = "prefs",
    guild_only,
    subcommands("set", "get", "unset", "list"),
    subcommand_required
)]
/// Calendar preferences of this room
pub async fn root(_: CommandContext<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_CHANNELS")]
/// Change a calendar preference of this room
pub async fn set(
    ctx: CommandContext<'_>,
    #[description = "Preference to change"]
    #[autocomplete = "autocomplete_key"]
    key: String,
    #[description = "New value"] value: String,
) -> Result<(), anyhow::Error> {
    let key = key.parse::<PrefKey>()?;
    let value = value.trim();
    validate(key, value)?;

    let room_id = ctx.channel_id().to_string();
    let data = ctx.data();
    data.preferences
        .set(&room_id, PLUGIN, key.name(), value)
        .await?;
    data.notifier.registry().mark_config_stale(&room_id).await;

    reply(ctx, format!("`{}` is now `{}`", key, value)).await
}

#[poise::command(slash_command, prefix_command, required_permissions = "MANAGE_CHANNELS")]
/// Reset a calendar preference of this room to its default
pub async fn unset(
    ctx: CommandContext<'_>,
    #[description = "Preference to reset"]
    #[autocomplete = "autocomplete_key"]
    key: String,
) -> Result<(), anyhow::Error> {
    let key = key.parse::<PrefKey>()?;
    let room_id = ctx.channel_id().to_string();
    let data = ctx.data();

    let removed = data.preferences.remove(&room_id, PLUGIN, key.name()).await?;
    data.notifier.registry().mark_config_stale(&room_id).await;

    let content = if removed {
        format!("`{}` reset", key)
    } else {
        format!("`{}` was not set", key)
    };
    reply(ctx, content).await
}

#[poise::command(slash_command, prefix_command)]
/// Show a calendar preference of this room
pub async fn get(
    ctx: CommandContext<'_>,
    #[description = "Preference to show"]
    #[autocomplete = "autocomplete_key"]
    key: String,
) -> Result<(), anyhow::Error> {
    let key = key.parse::<PrefKey>()?;
    let room_id = ctx.channel_id().to_string();
    let data = ctx.data();
    let default = default_of(key, &data.config.notifier.default_timezone);

    let value = data
        .preferences
        .get(&room_id, PLUGIN, key.name(), default.as_deref())
        .await?;
    reply(ctx, format!("`{}` = `{}`", key, value)).await
}

#[poise::command(slash_command, prefix_command)]
/// List the calendar preferences of this room
pub async fn list(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    let room_id = ctx.channel_id().to_string();
    let data = ctx.data();
    let stored = data.preferences.list(&room_id, PLUGIN).await?;

    let mut response = format!("**Preferences of <#{}>:**\n", room_id);
    for key in PrefKey::ALL {
        let line = match stored.iter().find(|(name, _)| name == key.name()) {
            Some((_, value)) => format!("\t`{}` = `{}`\n", key, value),
            None => match default_of(key, &data.config.notifier.default_timezone) {
                Some(default) => format!("\t`{}` = `{}` (default)\n", key, default),
                None => format!("\t`{}` is not set\n", key),
            },
        };
        response += &line;
    }

    reply(ctx, response).await
}
