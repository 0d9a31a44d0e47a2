use std::sync::Arc;

use anyhow::Context;
use bot::Bot;
use config::{Config, Environment, File};
use log::info;

mod bot;
mod calendar;
mod cfg;
mod commands;
mod notifier;
mod prefs;
mod room;
#[cfg(test)]
mod testing;

/// Loads the configuration using the `config` crate
fn load_config() -> Result<cfg::Config, anyhow::Error> {
    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("ROOMCAL").separator("__"))
        .build()?;

    settings
        .try_deserialize()
        .context("invalid configuration")
}

#[tokio::main]
/// Entrypoint of the roomcal discord bot.
/// roomcal answers the activity of a room with the calendar events in progress,
/// see the `/prefs` command to configure a room.
async fn main() -> Result<(), anyhow::Error> {
    // Initialize the logger
    pretty_env_logger::init();

    // load the config
    let config = Arc::from(load_config()?);
    info!("attached to {} rooms", config.notifier.rooms.len());

    let bot = Bot::new(config).await?;
    bot.start().await
}
