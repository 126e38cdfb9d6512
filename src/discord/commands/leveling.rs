// Discord commands for the leveling system.
//
// **Notice the pattern:**
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response based on the result
//
// This layer is THIN - no business logic, just translation.

use crate::core::leveling::{LeaderboardEntry, LevelingService};
use crate::infra::leveling::SqliteXpStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Type alias for our bot's context.
/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Data that's shared across all commands.
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteXpStore>>,
}

/// Show your current level and XP.
#[poise::command(slash_command, guild_only)]
pub async fn level(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    let user_id = target_user.id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    if target_user.bot {
        ctx.say("Bots don't have levels! 🤖").await?;
        return Ok(());
    }

    let stats = ctx.data().leveling.get_user_stats(guild_id, user_id).await?;

    let progress_field = match stats.next_threshold {
        Some(next) => {
            let level_span = next.saturating_sub(stats.level_floor).max(1);
            let xp_progress = stats.xp.saturating_sub(stats.level_floor).min(level_span);
            format!(
                "{}/{} XP\n{}",
                xp_progress,
                level_span,
                build_progress_bar(xp_progress as f64 / level_span as f64, 15)
            )
        }
        None => "Max level reached! 🏔️".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("Level — {}", target_user.name))
        .color(0x00ff00)
        .thumbnail(target_user.face())
        .field("Level", format!("**{}**", stats.level), true)
        .field("Total XP", format!("**{}**", stats.xp), true)
        .field("Progress", progress_field, false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Show the server's XP leaderboard.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Page number (default: 1)"]
    #[min = 1]
    page: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // Fetch a large slice once to support pagination.
    let all_entries = ctx.data().leveling.get_leaderboard(guild_id, 1000).await?;

    // Filter bots using cache only - no HTTP calls in the hot path.
    let entries: Vec<_> = all_entries
        .into_iter()
        .filter(|e| !is_bot_cached(&ctx, guild_id, e.user_id))
        .collect();

    if entries.is_empty() {
        ctx.say("No one has earned XP yet! Start chatting to get on the leaderboard! 💬")
            .await?;
        return Ok(());
    }

    let per_page = 10;
    let total_pages = entries.len().div_ceil(per_page);
    let current_page = page.unwrap_or(1).clamp(1, total_pages);

    let embed = render_leaderboard_page(&ctx, guild_id, &entries, current_page, per_page);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

fn render_leaderboard_page(
    ctx: &Context<'_>,
    guild_id: u64,
    entries: &[LeaderboardEntry],
    page: usize,
    per_page: usize,
) -> serenity::CreateEmbed {
    let total_pages = entries.len().div_ceil(per_page);
    let offset = (page - 1) * per_page;
    let mut description = String::new();

    // Caller's own rank at the top.
    let author_id = ctx.author().id.get();
    if let Some(rank) = entries
        .iter()
        .position(|e| e.user_id == author_id)
        .map(|i| i + 1)
    {
        description.push_str(&format!("Your rank: **#{}**\n\n", rank));
    } else {
        description.push_str("You are not ranked yet.\n\n");
    }

    for (index, entry) in entries.iter().skip(offset).take(per_page).enumerate() {
        let rank = offset + index + 1;
        let name = resolve_display_name_cached(ctx, guild_id, entry.user_id);

        let medal = match rank {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "  ",
        };

        let name_display = if entry.user_id == author_id {
            format!("**{}** (You)", name)
        } else {
            name
        };

        description.push_str(&format!(
            "{} **#{}** {} — Level {} | {} XP\n",
            medal, rank, name_display, entry.level, entry.xp
        ));
    }

    serenity::CreateEmbed::new()
        .title("📊 Leaderboard")
        .description(description)
        .color(0xffd700) // Gold
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Page {}/{}",
            page, total_pages
        )))
}

/// Manually award XP to a user (admin only).
///
/// **Command syntax:** `/give_xp @user 100`
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn give_xp(
    ctx: Context<'_>,
    #[description = "User to give XP to"] user: serenity::User,
    #[description = "Amount of XP to give"]
    #[min = 1]
    amount: u32,
) -> Result<(), Error> {
    if user.bot {
        ctx.say("You can't give XP to bots!").await?;
        return Ok(());
    }

    let user_id = user.id.get();
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let result = ctx
        .data()
        .leveling
        .award_xp(guild_id, user_id, amount as i64)
        .await?;

    if let Some(level_up) = result {
        ctx.say(format!(
            "✅ Gave {} XP to {}!\n🎉 They leveled up to level {} ({} XP total)!",
            amount, user.name, level_up.new_level, level_up.total_xp
        ))
        .await?;
    } else {
        ctx.say(format!("✅ Gave {} XP to {}!", amount, user.name))
            .await?;
    }

    Ok(())
}

/// Resolve a human-friendly display name for a user.
///
/// Order of preference: guild nickname (cache), username (cache), mention.
/// Cache ONLY - HTTP lookups would make the leaderboard crawl.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id_s = serenity::GuildId::from(guild_id);
    let user_id_s = serenity::UserId::from(user_id);

    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            // display_name() prefers nick over username
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.name.clone();
    }

    // Final fallback: a mention still identifies the entry.
    format!("<@{}>", user_id)
}

/// Check if a user is a bot (cache-only, fast version). Unknown users count
/// as non-bots: bots shouldn't have XP rows in the first place, and showing
/// one on the leaderboard is harmless compared to per-row HTTP calls.
fn is_bot_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> bool {
    let user_id_s = serenity::UserId::from(user_id);
    let guild_id_s = serenity::GuildId::from(guild_id);

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.bot;
    }

    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            return member.user.bot;
        }
    }

    false
}

pub(crate) fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let filled_char = "▰";
    let empty_char = "▱";
    let bar = filled_char.repeat(filled) + &empty_char.repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}
