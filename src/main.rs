// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::leveling::{LevelingError, LevelingService};
use crate::discord::leveling_announcements::send_level_up_embed;
use crate::discord::{Data, Error};
use crate::infra::leveling::SqliteXpStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Event handler for non-command Discord events.
/// This is where messages turn into XP.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        // Ignore bot messages (including our own)
        if new_message.author.bot {
            return Ok(());
        }

        // Only guild messages earn XP (not DMs)
        let Some(guild_id) = new_message.guild_id else {
            return Ok(());
        };
        let user_id = new_message.author.id.get();
        let guild_id = guild_id.get();

        match data.leveling.process_message(guild_id, user_id).await {
            Ok(Some(level_up)) => {
                tracing::info!(
                    user_id = level_up.user_id,
                    guild_id = level_up.guild_id,
                    old_level = level_up.old_level,
                    new_level = level_up.new_level,
                    total_xp = level_up.total_xp,
                    "User leveled up"
                );

                if let Err(err) = send_level_up_embed(ctx, new_message, data, &level_up).await {
                    tracing::warn!("Failed to send level-up embed: {err}");
                }
            }
            Ok(None) => {
                // XP was awarded but no level up - nothing to do
            }
            Err(LevelingError::OnCooldown(_)) => {
                // User is on cooldown - silently ignore
            }
            Err(e) => {
                // Some other error - log it but don't crash the event loop
                tracing::error!("Error processing XP for message: {}", e);
            }
        }
    }

    Ok(())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep the runtime database in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let leveling_db_path = format!("{}/leveling.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let xp_store = SqliteXpStore::new(&leveling_db_path)
        .await
        .expect("Failed to initialize SQLite store");

    let cooldown = Duration::from_secs(env_u64("XP_COOLDOWN_SECS", 60));
    let roll_min = env_u64("XP_ROLL_MIN", 15);
    let roll_max = env_u64("XP_ROLL_MAX", 25);

    let leveling_service = Arc::new(
        LevelingService::new(xp_store)
            .with_cooldown(cooldown)
            .with_xp_roll(roll_min, roll_max),
    );

    let data = Data {
        leveling: Arc::clone(&leveling_service),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to see messages at all
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::leveling::level(),
                discord::commands::leveling::leaderboard(),
                discord::commands::leveling::give_xp(),
                discord::commands::curve::curve(),
                discord::commands::curve::set_curve(),
                discord::commands::curve::calibrate(),
                discord::commands::curve::set_levelup_message(),
                discord::commands::curve::export_xp(),
                discord::commands::curve::import_xp(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to
                // propagate). For faster development, use register_in_guild.
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("Commands registered, bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
