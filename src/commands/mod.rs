use crate::bot::CommandContext;

pub mod calendar;
pub mod prefs;

#[poise::command(prefix_command, slash_command)]
/// Show the available commands
pub async fn help(
    ctx: CommandContext<'_>,
    #[description = "Specific command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> Result<(), anyhow::Error> {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            extra_text_at_bottom: "Set `calendar-id` and `autoreply` with /prefs to get started.",
            ephemeral: true,
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}
