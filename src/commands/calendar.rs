use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use poise::CreateReply;

use crate::{
    bot::CommandContext,
    calendar::Event,
    room::{Lookup, RoomState},
};

fn format_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%a %d %b %H:%M %Z").to_string()
}

fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format!("{} min ago", (now - at).num_minutes()),
        None => "never".to_string(),
    }
}

/// One line per event, dates shown in the room timezone.
fn format_event(event: &Event, tz: Tz) -> String {
    let mut line = format!(
        "**{}** from {} to {}",
        event.name,
        format_time(event.start, tz),
        format_time(event.end, tz)
    );
    if !event.location.is_empty() {
        line += &format!(" at {}", event.location);
    }
    line
}

fn describe(state: &RoomState, now: DateTime<Utc>) -> String {
    let calendar = if state.calendar_id.is_empty() {
        "not configured".to_string()
    } else {
        format!("<{}>", state.calendar_id)
    };

    format!(
        "**Calendar:** {}\n**Timezone:** {}\n**Autoreply:** {}\n**Announce start/end:** {}/{}\n\
         **Preferences loaded:** {}\n**Events fetched:** {} ({} cached)\n**Last reply:** {}",
        calendar,
        state.timezone.name(),
        state.autoreply,
        state.announce_start,
        state.announce_end,
        format_age(state.config_fetched_at, now),
        format_age(state.events_fetched_at, now),
        state.events.len(),
        format_age(state.last_reply_at, now),
    )
}

/// State of a room for display, or the reason it cannot be shown.
fn shown(attached: bool, lookup: Lookup) -> Result<RoomState, &'static str> {
    if !attached {
        return Err("This room is not attached to the notifier.");
    }
    match lookup {
        Lookup::Ready(state) => Ok(state),
        Lookup::Unknown => Err("The calendar of this room is not loaded yet."),
        Lookup::Busy => Err("The calendar of this room is being refreshed, try again in a moment."),
    }
}

/// Only reads what is already in memory, a command never triggers a fetch.
async fn room_state(ctx: CommandContext<'_>) -> Result<RoomState, &'static str> {
    let room_id = ctx.channel_id().to_string();
    let data = ctx.data();
    if !data.attached(&room_id) {
        return shown(false, Lookup::Unknown);
    }
    shown(true, data.notifier.registry().peek(&room_id).await)
}

#[poise::command(
    slash_command,
    prefix_command,
    rename = "calendar",
    guild_only,
    subcommands("status", "now"),
    subcommand_required
)]
/// Calendar of this room
pub async fn root(_: CommandContext<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

#[poise::command(slash_command, prefix_command)]
/// Show the calendar settings and cache of this room
pub async fn status(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    let now = Utc::now();
    let content = match room_state(ctx).await {
        Ok(state) => describe(&state, now),
        Err(reason) => reason.to_string(),
    };

    ctx.send(CreateReply::default().ephemeral(true).content(content))
        .await?;
    Ok(())
}

#[poise::command(slash_command, prefix_command)]
/// Show the events in progress in this room
pub async fn now(ctx: CommandContext<'_>) -> Result<(), anyhow::Error> {
    let at = Utc::now();
    let state = match room_state(ctx).await {
        Ok(state) => state,
        Err(reason) => {
            ctx.send(CreateReply::default().ephemeral(true).content(reason))
                .await?;
            return Ok(());
        }
    };

    let running: Vec<String> = state
        .events
        .iter()
        .filter(|event| event.in_progress(at))
        .map(|event| format_event(event, state.timezone))
        .collect();

    let content = if running.is_empty() {
        "No event in progress.".to_string()
    } else {
        running.join("\n")
    };

    ctx.send(CreateReply::default().ephemeral(true).content(content))
        .await?;
    Ok(())
}
