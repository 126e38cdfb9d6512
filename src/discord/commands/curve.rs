// Admin commands for configuring a guild's XP curve.
//
// Validation lives in the core service; these handlers just translate
// Discord input into CurveSpec fields and render the outcome.

use crate::core::leveling::{CurveKind, LevelingError};
use crate::discord::commands::leveling::{Context, Error};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum CurveChoice {
    #[name = "Linear"]
    Linear,
    #[name = "Exponential"]
    Exponential,
    #[name = "Constant"]
    Constant,
}

impl From<CurveChoice> for CurveKind {
    fn from(value: CurveChoice) -> Self {
        match value {
            CurveChoice::Linear => CurveKind::Linear,
            CurveChoice::Exponential => CurveKind::Exponential,
            CurveChoice::Constant => CurveKind::Constant,
        }
    }
}

/// Show the server's current XP curve and the first level thresholds.
#[poise::command(slash_command, guild_only)]
pub async fn curve(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let spec = ctx.data().leveling.curve_spec(guild_id).await?;
    let table = spec.thresholds();

    let preview = table
        .iter()
        .enumerate()
        .skip(1)
        .take(10)
        .map(|(level, xp)| format!("Level {level}: {xp} XP"))
        .collect::<Vec<_>>()
        .join("\n");

    let cap = if spec.max_level > 0 {
        spec.max_level.to_string()
    } else {
        "uncapped".to_string()
    };

    let mut embed = serenity::CreateEmbed::new()
        .title("XP Curve")
        .color(0x3498db)
        .field("Curve", spec.curve.as_str(), true)
        .field("Multiplier", format!("{:.3}", spec.multiplier), true)
        .field("Max level", cap, true)
        .field("First thresholds", preview, false);

    if spec.curve == CurveKind::Linear {
        embed = embed
            .field("Linear base", format!("{:.3}", spec.linear_base), true)
            .field("Linear increment", format!("{:.3}", spec.linear_inc), true);
    }

    ctx.send(poise::CreateReply::default().embed(embed)).await?;

    Ok(())
}

/// Change the server's XP curve. Omitted options keep their current value.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn set_curve(
    ctx: Context<'_>,
    #[description = "Curve shape"] curve: Option<CurveChoice>,
    #[description = "Multiplier on all level requirements (must be > 0)"] multiplier: Option<f64>,
    #[description = "Level cap (0 = uncapped)"] max_level: Option<u32>,
    #[description = "XP required for level 1 (linear curve)"] linear_base: Option<f64>,
    #[description = "Extra XP required per level (linear curve)"] linear_inc: Option<f64>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let mut spec = ctx.data().leveling.curve_spec(guild_id).await?;
    if let Some(curve) = curve {
        spec.curve = curve.into();
    }
    if let Some(multiplier) = multiplier {
        spec.multiplier = multiplier;
    }
    if let Some(max_level) = max_level {
        spec.max_level = max_level;
    }
    if let Some(linear_base) = linear_base {
        spec.linear_base = linear_base;
    }
    if let Some(linear_inc) = linear_inc {
        spec.linear_inc = linear_inc;
    }

    match ctx.data().leveling.set_curve_spec(guild_id, spec).await {
        Ok(()) => {
            ctx.say(format!(
                "✅ Curve updated: {} (multiplier {:.3}, cap {}).",
                spec.curve.as_str(),
                spec.multiplier,
                if spec.max_level > 0 {
                    spec.max_level.to_string()
                } else {
                    "none".to_string()
                }
            ))
            .await?;
        }
        Err(LevelingError::InvalidCurveSpec(reason)) => {
            ctx.say(format!("❌ Not saved: {}.", reason)).await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Fit a linear curve to two known (level, total XP) points.
///
/// Useful when migrating from another leveling bot: sample two members'
/// levels and totals there, and the curve that produced them is recovered.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn calibrate(
    ctx: Context<'_>,
    #[description = "First sample: level"]
    #[min = 1]
    level1: u32,
    #[description = "First sample: total XP at that level"] xp1: u64,
    #[description = "Second sample: level"]
    #[min = 1]
    level2: u32,
    #[description = "Second sample: total XP at that level"] xp2: u64,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    match ctx
        .data()
        .leveling
        .calibrate(guild_id, level1, xp1, level2, xp2)
        .await
    {
        Ok(spec) => {
            ctx.say(format!(
                "✅ Calibrated: linear curve with base {:.2} and increment {:.2} per level.",
                spec.linear_base, spec.linear_inc
            ))
            .await?;
        }
        Err(LevelingError::InvalidCalibration { .. }) => {
            ctx.say(
                "❌ Those samples imply a shrinking curve (negative base or increment). \
                 Check the level/XP pairs and try again - nothing was changed.",
            )
            .await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Set the level-up announcement. Placeholders: {user}, {level}, {xp}.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn set_levelup_message(
    ctx: Context<'_>,
    #[description = "Template, e.g. \"{user} is now level {level}!\""] template: String,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    ctx.data()
        .leveling
        .set_levelup_template(guild_id, template.clone())
        .await?;

    ctx.say(format!("✅ Level-up message set to: {}", template))
        .await?;

    Ok(())
}

/// Export all XP totals as a CSV file.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn export_xp(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let csv = ctx.data().leveling.export_xp(guild_id).await?;
    let attachment = serenity::CreateAttachment::bytes(csv.into_bytes(), "xp_export.csv");

    ctx.send(
        poise::CreateReply::default()
            .content("📦 XP export attached.")
            .attachment(attachment),
    )
    .await?;

    Ok(())
}

/// Import XP totals from a CSV file (user_id,xp). Overwrites existing totals.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn import_xp(
    ctx: Context<'_>,
    #[description = "CSV file with user_id,xp rows"] file: serenity::Attachment,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    // Imports can take a moment on big files.
    ctx.defer().await?;

    let bytes = file.download().await?;
    let csv = String::from_utf8(bytes).map_err(|_| "Attachment is not valid UTF-8 text")?;

    let applied = ctx.data().leveling.import_xp(guild_id, &csv).await?;
    ctx.say(format!("✅ Imported XP for {} users.", applied))
        .await?;

    Ok(())
}
