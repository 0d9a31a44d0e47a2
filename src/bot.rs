use crate::calendar::{cache::EventCache, IcalSource};
use crate::cfg::{Config, Timings};
use crate::commands;
use crate::notifier::{Notifier, Responder};
use crate::prefs::{FileStore, PreferenceLoader, PreferenceStore};
use crate::room::Registry;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, info};
use poise::serenity_prelude::{self as serenity, ChannelId, ClientBuilder, GatewayIntents};
use poise::CreateReply;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::{Receiver, Sender};

/// Discord refuses longer messages.
const MESSAGE_LIMIT: usize = 2000;

pub type CommandContext<'a> = poise::Context<'a, Arc<Data>, anyhow::Error>;

// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub config: Arc<Config>,
    pub notifier: Arc<Notifier>,
    pub preferences: Arc<dyn PreferenceStore>,
    /// Rooms the notifier listens to.
    pub rooms: HashSet<String>,
}

impl Data {
    pub fn attached(&self, room_id: &str) -> bool {
        self.rooms.contains(room_id)
    }
}

/// Posts the notifier replies in discord channels.
pub struct DiscordResponder {
    http: Arc<serenity::Http>,
}

impl DiscordResponder {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Responder for DiscordResponder {
    async fn reply(&self, room_id: &str, text: &str) {
        let channel = match room_id.parse::<u64>() {
            Ok(id) if id != 0 => ChannelId::new(id),
            _ => {
                error!("cannot reply in {:?}: not a channel id", room_id);
                return;
            }
        };

        let content: String = text.chars().take(MESSAGE_LIMIT).collect();
        if let Err(err) = channel.say(self.http.as_ref(), content).await {
            error!("failed to reply in room {}: {}", room_id, err);
        }
    }
}

pub struct Bot {
    pub data: Arc<Data>,
    pub shutdown: Receiver<()>,
    shutdown_send: Sender<()>,
}

/// Sends a message through `shutdown_send` when a stop signal is detected.
/// Used to start the bot stop sequence.
async fn wait_for_stop_signal(bot: Arc<Bot>) -> Result<(), anyhow::Error> {
    let mut shutdown = bot.shutdown.resubscribe();
    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    bot.shutdown_send
                        .send(())
                        .context("failed to send a shutdown signal")?;
                    Ok(())
                }
                Err(err) => Err(anyhow::anyhow!(err)),
            }
        },
        _ = shutdown.recv() => { Ok(()) }
    }
}

async fn on_error(error: poise::FrameworkError<'_, Arc<Data>, anyhow::Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => panic!("Failed to start bot: {:?}", error),
        poise::FrameworkError::Command { error, ctx, .. } => {
            let f = CreateReply::default()
                .ephemeral(true)
                .content(format!("{:#}", error));
            std::mem::drop(ctx.send(f).await);
            error!("Error in command `{}`: {:?}", ctx.command().name, error);
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Feeds the messages of attached rooms to the notifier.
async fn on_event(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Arc<Data>, anyhow::Error>,
    data: &Arc<Data>,
) -> Result<(), anyhow::Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        if new_message.author.bot {
            return Ok(());
        }

        let room_id = new_message.channel_id.to_string();
        if !data.attached(&room_id) {
            debug!("ignoring activity in unattached room {}", room_id);
            return Ok(());
        }

        // a cold room blocks on its first fetch, keep the gateway going meanwhile
        let notifier = data.notifier.clone();
        tokio::spawn(async move {
            notifier.on_activity(&room_id).await;
        });
    }

    Ok(())
}

impl Bot {
    pub async fn new(config: Arc<Config>) -> Result<Arc<Self>, anyhow::Error> {
        // Theses signals are used to stop the many tasks trigered.
        // this is called by the task listening for a stop signal.
        let (shutdown_send, shutdown) = tokio::sync::broadcast::channel(1);

        let timings = Timings::try_from(&config.notifier)?;
        config.notifier.timezone()?;

        let preferences: Arc<dyn PreferenceStore> =
            Arc::new(FileStore::new(&config).context("failed to open the preference database")?);
        let source = Arc::new(IcalSource::new(timings.lookahead, &config.notifier.user_agent)?);

        let registry = Arc::new(Registry::new(
            PreferenceLoader::new(
                preferences.clone(),
                timings.config_ttl,
                &config.notifier.default_timezone,
            ),
            EventCache::new(source, timings.events_ttl),
        ));
        let http = Arc::new(serenity::Http::new(&config.discord.token));
        let notifier = Arc::new(Notifier::new(
            registry,
            Arc::new(DiscordResponder::new(http)),
            timings.cooldown,
        ));

        let data = Arc::new(Data {
            rooms: config.notifier.rooms.iter().cloned().collect(),
            config: config.clone(),
            notifier,
            preferences,
        });

        Ok(Arc::new(Self {
            data,
            shutdown,
            shutdown_send,
        }))
    }

    /// Creates every attached room so their cache is warm before they talk.
    async fn warm_up(data: Arc<Data>) {
        let now = Utc::now();
        let registry = data.notifier.registry();

        futures_util::future::join_all(
            data.rooms
                .iter()
                .map(|room| registry.get_or_create(room, now)),
        )
        .await;

        info!("{} rooms ready", data.rooms.len());
    }

    pub async fn start(self: Arc<Self>) -> Result<(), anyhow::Error> {
        let mut shutdown = self.shutdown.resubscribe();
        let mut tasks = FuturesUnordered::new();

        let options = poise::FrameworkOptions {
            commands: vec![
                commands::help(),
                commands::prefs::root(),
                commands::calendar::root(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: None,
                edit_tracker: Some(Arc::new(poise::EditTracker::for_timespan(
                    Duration::from_secs(3600),
                ))),
                mention_as_prefix: true,
                ..Default::default()
            },
            on_error: |error| Box::pin(on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(on_event(ctx, event, framework, data))
            },
            ..Default::default()
        };
        let data = self.data.clone();
        let framework = poise::Framework::builder()
            .options(options)
            .setup(move |ctx, _ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    Ok(data)
                })
            })
            .build();
        let client = ClientBuilder::new(
            self.data.config.discord.token.clone(),
            GatewayIntents::non_privileged(),
        )
        .framework(framework);

        let mut client = client.await.context("failed to create the discord client")?;

        // not part of the task set: finishing it must not stop the bot
        tokio::spawn(Self::warm_up(self.data.clone()));

        tasks.push(tokio::spawn(async move {
            // wait until the bot terminates or a shutdown signal is received.
            tokio::select! {
                result = client.start_autosharded() => {
                    if let Err(err) = result {
                        error!("Client error: {}", err);
                    }
                },
                _ = shutdown.recv() => {
                    // shutdown the bot properly
                    client.shard_manager.shutdown_all().await;
                }
            };
        }));
        let self_clone = self.clone();
        tasks.push(tokio::spawn(async {
            let _ = wait_for_stop_signal(self_clone).await;
        }));

        // wait for a task to finish.
        let task = tasks
            .next()
            .await
            .context("no tasks started, illegal state")?
            .context("failed to join task");

        // when a task is finished, we must terminate all the others,
        // hence we send a signal talling all tasks to stop processing
        // and return.
        let _ = self.shutdown_send.send(());

        while let Some(operation) = tasks.next().await {
            operation.context("failed to join task")?;
        }

        task?;
        Ok(())
    }
}
