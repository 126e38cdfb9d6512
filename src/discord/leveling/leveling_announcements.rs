use crate::core::leveling::LevelUpEvent;
use crate::discord::commands::leveling::build_progress_bar;
use crate::discord::Data;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};

/// Post a level-up embed in the channel where the triggering message landed.
/// The description comes from the guild's announcement template.
pub async fn send_level_up_embed(
    ctx: &serenity::Context,
    message: &serenity::Message,
    data: &Data,
    level_up: &LevelUpEvent,
) -> Result<(), Error> {
    let description = data
        .leveling
        .levelup_message(level_up.guild_id, level_up)
        .await?;

    let stats = data
        .leveling
        .get_user_stats(level_up.guild_id, level_up.user_id)
        .await?;

    let progress_field = match stats.next_threshold {
        Some(next) => {
            let level_span = next.saturating_sub(stats.level_floor).max(1);
            let xp_in_level = stats.xp.saturating_sub(stats.level_floor).min(level_span);
            format!(
                "{}/{} XP\n{}",
                xp_in_level,
                level_span,
                build_progress_bar(xp_in_level as f64 / level_span as f64, 18)
            )
        }
        None => "Max level reached! 🏔️".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title("Level Up!")
        .description(description)
        .color(level_color(level_up.new_level))
        .field("Total XP", level_up.total_xp.to_string(), true)
        .field("Progress", progress_field, false);

    message
        .channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;

    Ok(())
}

type Error = Box<dyn std::error::Error + Send + Sync>;

fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}
