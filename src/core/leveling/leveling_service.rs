// This is the leveling module - it contains ALL the business logic for the
// leveling system. Notice how this module has NO Discord-specific code (no
// serenity, no poise imports). It works with primitive types (u64, String)
// so it could be driven by a web app, CLI tool, or any other frontend.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[path = "curve.rs"]
pub mod curve;

pub use curve::{
    calibrate_linear, level_in_table, AwardOutcome, CurveKind, CurveSpec, ThresholdCache,
    DEFAULT_LEVEL_HORIZON,
};

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A user's raw XP total in a guild, as the store hands it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserXp {
    pub user_id: u64,
    pub xp: u64,
}

/// Leaderboard row: XP plus the level derived from the guild's curve.
#[derive(Debug, Clone, Copy)]
pub struct LeaderboardEntry {
    pub user_id: u64,
    pub xp: u64,
    pub level: u32,
}

/// Everything a profile display needs: the level plus the thresholds that
/// bound it, so callers can render progress without touching the curve.
#[derive(Debug, Clone, Copy)]
pub struct UserStats {
    pub user_id: u64,
    pub guild_id: u64,
    pub xp: u64,
    pub level: u32,
    /// Cumulative XP where the current level starts.
    pub level_floor: u64,
    /// Cumulative XP where the next level starts. None when the user sits at
    /// the guild's level cap.
    pub next_threshold: Option<u64>,
}

/// Emitted when an award crosses a level boundary.
/// This is returned by the service so the Discord layer can announce it.
#[derive(Debug, Clone)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_xp: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("User is on cooldown. Time remaining: {0:?}")]
    OnCooldown(Duration),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Invalid user or guild ID")]
    InvalidId,

    #[error("Calibration produced a non-increasing curve (base {base}, inc {inc})")]
    InvalidCalibration { base: f64, inc: f64 },

    #[error("Invalid curve configuration: {0}")]
    InvalidCurveSpec(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================
// The core defines WHAT it needs from persistence, not HOW it's implemented.
// The infra layer provides the actual implementation (SQLite, in-memory).

/// Trait for persisting XP totals and per-guild curve configuration.
#[async_trait]
pub trait XpStore: Send + Sync {
    /// A user's current XP in a guild. 0 if they've never gained any -
    /// users are created implicitly on first award.
    async fn get_xp(&self, guild_id: u64, user_id: u64) -> Result<u64, LevelingError>;

    /// Overwrite a user's XP total. The service clamps values before calling.
    async fn set_xp(&self, guild_id: u64, user_id: u64, xp: u64) -> Result<(), LevelingError>;

    /// Top users in a guild by XP, descending.
    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<UserXp>, LevelingError>;

    /// Every XP row in a guild (for export). No ordering guarantee.
    async fn get_all_xp(&self, guild_id: u64) -> Result<Vec<UserXp>, LevelingError>;

    /// The guild's stored curve configuration, if any was ever set.
    async fn get_curve_spec(&self, guild_id: u64) -> Result<Option<CurveSpec>, LevelingError>;

    async fn save_curve_spec(&self, guild_id: u64, spec: CurveSpec) -> Result<(), LevelingError>;

    /// Custom level-up announcement template, if the guild set one.
    async fn get_levelup_template(&self, guild_id: u64)
        -> Result<Option<String>, LevelingError>;

    async fn save_levelup_template(
        &self,
        guild_id: u64,
        template: String,
    ) -> Result<(), LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

const DEFAULT_LEVELUP_TEMPLATE: &str = "🎉 {user} reached level **{level}**!";

/// The main service for leveling operations, generic over any XpStore.
///
/// Owns the two pieces of in-process state the curve engine must stay free
/// of: the per-(guild, user) XP cooldown map and the memoized threshold
/// table cache.
pub struct LevelingService<S: XpStore> {
    store: S,

    /// Inclusive XP roll range per message.
    xp_roll: (u64, u64),

    /// Cooldown between message XP gains (prevents spam).
    cooldown: Duration,

    /// Last award time per (guild_id, user_id).
    cooldowns: DashMap<(u64, u64), Instant>,

    /// Awards since the cooldown map was last swept of expired entries.
    awards_since_sweep: AtomicU64,

    /// Threshold tables keyed by full curve spec, computed once per spec.
    tables: ThresholdCache,
}

/// Sweep the cooldown map after this many awards. Keeps the map bounded by
/// the number of users active within one cooldown window instead of growing
/// with every user ever seen.
const COOLDOWN_SWEEP_INTERVAL: u64 = 1024;

impl<S: XpStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            xp_roll: (15, 25),
            cooldown: Duration::from_secs(60),
            cooldowns: DashMap::new(),
            awards_since_sweep: AtomicU64::new(0),
            tables: ThresholdCache::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_xp_roll(mut self, min: u64, max: u64) -> Self {
        self.xp_roll = (min, max.max(min));
        self
    }

    fn validate_ids(guild_id: u64, user_id: u64) -> Result<(), LevelingError> {
        if user_id == 0 || guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    fn validate_guild_id(guild_id: u64) -> Result<(), LevelingError> {
        if guild_id == 0 {
            Err(LevelingError::InvalidId)
        } else {
            Ok(())
        }
    }

    fn validate_spec(spec: &CurveSpec) -> Result<(), LevelingError> {
        if !spec.multiplier.is_finite() || spec.multiplier <= 0.0 {
            return Err(LevelingError::InvalidCurveSpec(
                "multiplier must be a positive number".into(),
            ));
        }
        if !spec.linear_base.is_finite() || spec.linear_base < 0.0 {
            return Err(LevelingError::InvalidCurveSpec(
                "linear base must be non-negative".into(),
            ));
        }
        if !spec.linear_inc.is_finite() || spec.linear_inc < 0.0 {
            return Err(LevelingError::InvalidCurveSpec(
                "linear increment must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Same semantics as [`CurveSpec::award`], but level lookups go through
    /// the shared table cache instead of rebuilding thresholds per call.
    fn award_cached(&self, spec: &CurveSpec, current_xp: u64, amount: i64) -> AwardOutcome {
        let table = self.tables.table(spec);
        if amount <= 0 {
            let level = level_in_table(current_xp, &table, spec.max_level);
            return AwardOutcome {
                old_level: level,
                new_level: level,
                new_xp: current_xp,
            };
        }

        let new_xp = current_xp.saturating_add(amount as u64);
        AwardOutcome {
            old_level: level_in_table(current_xp, &table, spec.max_level),
            new_level: level_in_table(new_xp, &table, spec.max_level),
            new_xp,
        }
    }

    /// The guild's curve, falling back to the shipped default.
    pub async fn curve_spec(&self, guild_id: u64) -> Result<CurveSpec, LevelingError> {
        Self::validate_guild_id(guild_id)?;
        Ok(self
            .store
            .get_curve_spec(guild_id)
            .await?
            .unwrap_or_default())
    }

    /// Install a new curve configuration after validating it. The engine
    /// itself trusts its inputs, so nothing unsound may ever be stored.
    pub async fn set_curve_spec(
        &self,
        guild_id: u64,
        spec: CurveSpec,
    ) -> Result<(), LevelingError> {
        Self::validate_guild_id(guild_id)?;
        Self::validate_spec(&spec)?;
        self.store.save_curve_spec(guild_id, spec).await
    }

    /// Process a message and potentially award XP.
    ///
    /// Returns `Ok(Some(LevelUpEvent))` on a level-up, `Ok(None)` when XP was
    /// awarded without one, `Err(OnCooldown)` inside the cooldown window.
    pub async fn process_message(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        Self::validate_ids(guild_id, user_id)?;

        let key = (guild_id, user_id);
        if let Some(last) = self.cooldowns.get(&key) {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                return Err(LevelingError::OnCooldown(self.cooldown - elapsed));
            }
        }

        let amount = {
            let mut rng = rand::thread_rng();
            rng.gen_range(self.xp_roll.0..=self.xp_roll.1)
        };

        let event = self.apply_award(guild_id, user_id, amount as i64).await?;
        self.cooldowns.insert(key, Instant::now());

        if self.awards_since_sweep.fetch_add(1, Ordering::Relaxed) + 1 >= COOLDOWN_SWEEP_INTERVAL {
            self.awards_since_sweep.store(0, Ordering::Relaxed);
            self.sweep_cooldowns();
        }

        Ok(event)
    }

    /// Drop cooldown entries whose window has already passed. They would
    /// never block an award again, so keeping them only grows the map.
    fn sweep_cooldowns(&self) {
        self.cooldowns.retain(|_, last| last.elapsed() < self.cooldown);
    }

    /// Award XP outside the message path (admin command). No cooldown.
    /// `amount = 0` probes the current level without mutating anything.
    pub async fn award_xp(
        &self,
        guild_id: u64,
        user_id: u64,
        amount: i64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        Self::validate_ids(guild_id, user_id)?;
        self.apply_award(guild_id, user_id, amount).await
    }

    async fn apply_award(
        &self,
        guild_id: u64,
        user_id: u64,
        amount: i64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        let spec = self.curve_spec(guild_id).await?;
        let current_xp = self.store.get_xp(guild_id, user_id).await?;

        let outcome = self.award_cached(&spec, current_xp, amount);
        if outcome.new_xp != current_xp {
            self.store.set_xp(guild_id, user_id, outcome.new_xp).await?;
        }

        if outcome.new_level > outcome.old_level {
            Ok(Some(LevelUpEvent {
                user_id,
                guild_id,
                old_level: outcome.old_level,
                new_level: outcome.new_level,
                total_xp: outcome.new_xp,
            }))
        } else {
            Ok(None)
        }
    }

    /// A user's current stats, with the thresholds bounding their level.
    pub async fn get_user_stats(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<UserStats, LevelingError> {
        Self::validate_ids(guild_id, user_id)?;

        let spec = self.curve_spec(guild_id).await?;
        let xp = self.store.get_xp(guild_id, user_id).await?;
        let table = self.tables.table(&spec);
        let level = level_in_table(xp, &table, spec.max_level);

        let level_floor = table[level as usize];
        let at_cap = spec.max_level > 0 && level >= spec.max_level;
        let next_threshold = if at_cap {
            None
        } else {
            table.get(level as usize + 1).copied()
        };

        Ok(UserStats {
            user_id,
            guild_id,
            xp,
            level,
            level_floor,
            next_threshold,
        })
    }

    /// Top users by XP with levels computed from the guild's curve.
    pub async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
        Self::validate_guild_id(guild_id)?;

        let spec = self.curve_spec(guild_id).await?;
        let table = self.tables.table(&spec);

        let rows = self.store.get_leaderboard(guild_id, limit).await?;
        Ok(rows
            .into_iter()
            .map(|row| LeaderboardEntry {
                user_id: row.user_id,
                xp: row.xp,
                level: level_in_table(row.xp, &table, spec.max_level),
            })
            .collect())
    }

    /// Fit linear curve parameters to two observed (level, XP) samples and
    /// install them. On failure nothing is stored.
    pub async fn calibrate(
        &self,
        guild_id: u64,
        l1: u32,
        xp1: u64,
        l2: u32,
        xp2: u64,
    ) -> Result<CurveSpec, LevelingError> {
        Self::validate_guild_id(guild_id)?;

        let (base, inc) = calibrate_linear(l1, xp1, l2, xp2)?;

        let mut spec = self.curve_spec(guild_id).await?;
        spec.curve = CurveKind::Linear;
        spec.linear_base = base;
        spec.linear_inc = inc;

        self.store.save_curve_spec(guild_id, spec).await?;
        Ok(spec)
    }

    /// Export every XP row as `user_id,xp` CSV, highest totals first.
    pub async fn export_xp(&self, guild_id: u64) -> Result<String, LevelingError> {
        Self::validate_guild_id(guild_id)?;

        let mut rows = self.store.get_all_xp(guild_id).await?;
        rows.sort_by(|a, b| b.xp.cmp(&a.xp));

        let mut csv = String::from("user_id,xp\n");
        for row in rows {
            csv.push_str(&format!("{},{}\n", row.user_id, row.xp));
        }
        Ok(csv)
    }

    /// Import `user_id,xp` CSV rows, overwriting existing totals. Negative
    /// XP values clamp to 0; malformed lines and the header are skipped.
    /// Returns the number of rows applied.
    pub async fn import_xp(&self, guild_id: u64, csv: &str) -> Result<usize, LevelingError> {
        Self::validate_guild_id(guild_id)?;

        let mut applied = 0;
        for line in csv.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("user_id") {
                continue;
            }

            let mut parts = line.split(',');
            let user_id = parts.next().and_then(|v| v.trim().parse::<u64>().ok());
            let xp = parts.next().and_then(|v| v.trim().parse::<i64>().ok());

            if let (Some(user_id), Some(xp)) = (user_id, xp) {
                if user_id == 0 {
                    continue;
                }
                self.store
                    .set_xp(guild_id, user_id, xp.max(0) as u64)
                    .await?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Render the guild's level-up announcement for an event.
    /// Supported placeholders: `{user}` (mention), `{level}`, `{xp}`.
    pub async fn levelup_message(
        &self,
        guild_id: u64,
        event: &LevelUpEvent,
    ) -> Result<String, LevelingError> {
        let template = self
            .store
            .get_levelup_template(guild_id)
            .await?
            .unwrap_or_else(|| DEFAULT_LEVELUP_TEMPLATE.to_string());

        Ok(template
            .replace("{user}", &format!("<@{}>", event.user_id))
            .replace("{level}", &event.new_level.to_string())
            .replace("{xp}", &event.total_xp.to_string()))
    }

    pub async fn set_levelup_template(
        &self,
        guild_id: u64,
        template: String,
    ) -> Result<(), LevelingError> {
        Self::validate_guild_id(guild_id)?;
        self.store.save_levelup_template(guild_id, template).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    /// Minimal in-process store so service logic is testable without infra.
    #[derive(Default)]
    struct MemStore {
        xp: DashMap<(u64, u64), u64>,
        curves: DashMap<u64, CurveSpec>,
        templates: DashMap<u64, String>,
    }

    #[async_trait]
    impl XpStore for MemStore {
        async fn get_xp(&self, guild_id: u64, user_id: u64) -> Result<u64, LevelingError> {
            Ok(self
                .xp
                .get(&(guild_id, user_id))
                .map(|v| *v)
                .unwrap_or(0))
        }

        async fn set_xp(&self, guild_id: u64, user_id: u64, xp: u64) -> Result<(), LevelingError> {
            self.xp.insert((guild_id, user_id), xp);
            Ok(())
        }

        async fn get_leaderboard(
            &self,
            guild_id: u64,
            limit: usize,
        ) -> Result<Vec<UserXp>, LevelingError> {
            let mut rows = self.get_all_xp(guild_id).await?;
            rows.sort_by(|a, b| b.xp.cmp(&a.xp));
            rows.truncate(limit);
            Ok(rows)
        }

        async fn get_all_xp(&self, guild_id: u64) -> Result<Vec<UserXp>, LevelingError> {
            Ok(self
                .xp
                .iter()
                .filter(|entry| entry.key().0 == guild_id)
                .map(|entry| UserXp {
                    user_id: entry.key().1,
                    xp: *entry.value(),
                })
                .collect())
        }

        async fn get_curve_spec(&self, guild_id: u64) -> Result<Option<CurveSpec>, LevelingError> {
            Ok(self.curves.get(&guild_id).map(|v| *v))
        }

        async fn save_curve_spec(
            &self,
            guild_id: u64,
            spec: CurveSpec,
        ) -> Result<(), LevelingError> {
            self.curves.insert(guild_id, spec);
            Ok(())
        }

        async fn get_levelup_template(
            &self,
            guild_id: u64,
        ) -> Result<Option<String>, LevelingError> {
            Ok(self.templates.get(&guild_id).map(|v| v.clone()))
        }

        async fn save_levelup_template(
            &self,
            guild_id: u64,
            template: String,
        ) -> Result<(), LevelingError> {
            self.templates.insert(guild_id, template);
            Ok(())
        }
    }

    fn make_service() -> LevelingService<MemStore> {
        LevelingService::new(MemStore::default())
    }

    const GUILD: u64 = 10;
    const USER: u64 = 42;

    #[tokio::test]
    async fn message_awards_roll_within_range_and_sets_cooldown() {
        let service = make_service().with_xp_roll(15, 25);

        let first = service.process_message(GUILD, USER).await;
        assert!(first.is_ok());

        let xp = service.store.get_xp(GUILD, USER).await.unwrap();
        assert!((15..=25).contains(&xp), "rolled {}", xp);

        // Immediately repeating must hit the cooldown.
        let second = service.process_message(GUILD, USER).await;
        assert!(matches!(second, Err(LevelingError::OnCooldown(_))));
    }

    #[tokio::test]
    async fn cooldowns_are_per_guild_and_user() {
        let service = make_service();

        service.process_message(GUILD, USER).await.unwrap();
        // Same user in another guild is unaffected.
        assert!(service.process_message(GUILD + 1, USER).await.is_ok());
        // Another user in the same guild is unaffected.
        assert!(service.process_message(GUILD, USER + 1).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_drops_expired_cooldowns_but_keeps_active_ones() {
        let service = make_service().with_cooldown(Duration::from_secs(60));

        let stale = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap();
        service.cooldowns.insert((GUILD, USER), stale);
        service.cooldowns.insert((GUILD, USER + 1), Instant::now());

        service.sweep_cooldowns();

        assert!(!service.cooldowns.contains_key(&(GUILD, USER)));
        assert!(service.cooldowns.contains_key(&(GUILD, USER + 1)));
    }

    #[tokio::test]
    async fn award_reports_level_up_across_threshold() {
        let service = make_service();
        service.store.set_xp(GUILD, USER, 80).await.unwrap();

        // Default curve: level 1 starts at 83.
        let event = service.award_xp(GUILD, USER, 10).await.unwrap().unwrap();
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 1);
        assert_eq!(event.total_xp, 90);
        assert_eq!(service.store.get_xp(GUILD, USER).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn zero_award_probes_without_mutating() {
        let service = make_service();
        service.store.set_xp(GUILD, USER, 500).await.unwrap();

        let event = service.award_xp(GUILD, USER, 0).await.unwrap();
        assert!(event.is_none());
        assert_eq!(service.store.get_xp(GUILD, USER).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let service = make_service();
        assert!(matches!(
            service.award_xp(0, USER, 10).await,
            Err(LevelingError::InvalidId)
        ));
        assert!(matches!(
            service.process_message(GUILD, 0).await,
            Err(LevelingError::InvalidId)
        ));
    }

    #[tokio::test]
    async fn user_stats_report_level_bounds() {
        let service = make_service();
        service.store.set_xp(GUILD, USER, 100).await.unwrap();

        let stats = service.get_user_stats(GUILD, USER).await.unwrap();
        assert_eq!(stats.level, 1);
        assert_eq!(stats.level_floor, 83);
        assert_eq!(stats.next_threshold, Some(267));
    }

    #[tokio::test]
    async fn user_stats_at_cap_have_no_next_threshold() {
        let service = make_service();
        service
            .set_curve_spec(
                GUILD,
                CurveSpec {
                    max_level: 2,
                    ..CurveSpec::default()
                },
            )
            .await
            .unwrap();
        service.store.set_xp(GUILD, USER, 1_000_000).await.unwrap();

        let stats = service.get_user_stats(GUILD, USER).await.unwrap();
        assert_eq!(stats.level, 2);
        assert_eq!(stats.next_threshold, None);
    }

    #[tokio::test]
    async fn set_curve_spec_rejects_bad_numbers() {
        let service = make_service();

        let bad = CurveSpec {
            multiplier: 0.0,
            ..CurveSpec::default()
        };
        assert!(matches!(
            service.set_curve_spec(GUILD, bad).await,
            Err(LevelingError::InvalidCurveSpec(_))
        ));

        let negative = CurveSpec {
            linear_inc: -1.0,
            ..CurveSpec::default()
        };
        assert!(matches!(
            service.set_curve_spec(GUILD, negative).await,
            Err(LevelingError::InvalidCurveSpec(_))
        ));

        // Nothing was stored; the guild still runs the default curve.
        assert_eq!(
            service.curve_spec(GUILD).await.unwrap(),
            CurveSpec::default()
        );
    }

    #[tokio::test]
    async fn calibrate_installs_linear_parameters() {
        let service = make_service();

        // Start from an exponential curve to prove calibration forces linear.
        let spec = CurveSpec {
            curve: CurveKind::Exponential,
            ..CurveSpec::default()
        };
        service.set_curve_spec(GUILD, spec).await.unwrap();

        let table = CurveSpec::default().thresholds();
        let fitted = service
            .calibrate(GUILD, 5, table[5], 10, table[10])
            .await
            .unwrap();

        assert_eq!(fitted.curve, CurveKind::Linear);
        assert!((fitted.linear_inc - 100.433).abs() < 1e-2);

        let stored = service.curve_spec(GUILD).await.unwrap();
        assert_eq!(stored, fitted);
    }

    #[tokio::test]
    async fn failed_calibration_leaves_stored_curve_untouched() {
        let service = make_service();
        service
            .set_curve_spec(GUILD, CurveSpec::default())
            .await
            .unwrap();

        let err = service.calibrate(GUILD, 5, 1, 10, 2).await.unwrap_err();
        assert!(matches!(err, LevelingError::InvalidCalibration { .. }));
        assert_eq!(
            service.curve_spec(GUILD).await.unwrap(),
            CurveSpec::default()
        );
    }

    #[tokio::test]
    async fn leaderboard_is_sorted_and_leveled() {
        let service = make_service();
        service.store.set_xp(GUILD, 1, 500).await.unwrap();
        service.store.set_xp(GUILD, 2, 90).await.unwrap();
        service.store.set_xp(GUILD, 3, 5000).await.unwrap();
        // Different guild, must not leak in.
        service.store.set_xp(GUILD + 1, 4, 9999).await.unwrap();

        let board = service.get_leaderboard(GUILD, 10).await.unwrap();
        let ids: Vec<u64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(board[0].level > board[2].level);
    }

    #[tokio::test]
    async fn csv_round_trip() {
        let service = make_service();
        service.store.set_xp(GUILD, 1, 1500).await.unwrap();
        service.store.set_xp(GUILD, 2, 300).await.unwrap();

        let csv = service.export_xp(GUILD).await.unwrap();
        assert!(csv.starts_with("user_id,xp\n"));
        assert!(csv.contains("1,1500"));

        let other_guild = GUILD + 5;
        let applied = service.import_xp(other_guild, &csv).await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(service.store.get_xp(other_guild, 1).await.unwrap(), 1500);
        assert_eq!(service.store.get_xp(other_guild, 2).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn import_clamps_negatives_and_skips_garbage() {
        let service = make_service();

        let csv = "user_id,xp\n7,-50\nnot,a,number\n\n8,120\n";
        let applied = service.import_xp(GUILD, csv).await.unwrap();

        assert_eq!(applied, 2);
        assert_eq!(service.store.get_xp(GUILD, 7).await.unwrap(), 0);
        assert_eq!(service.store.get_xp(GUILD, 8).await.unwrap(), 120);
    }

    #[tokio::test]
    async fn levelup_message_substitutes_template() {
        let service = make_service();
        let event = LevelUpEvent {
            user_id: USER,
            guild_id: GUILD,
            old_level: 4,
            new_level: 5,
            total_xp: 2345,
        };

        // Default template first.
        let rendered = service.levelup_message(GUILD, &event).await.unwrap();
        assert!(rendered.contains("<@42>"));
        assert!(rendered.contains('5'));

        service
            .set_levelup_template(GUILD, "{user} hit {level} with {xp} XP".into())
            .await
            .unwrap();
        let rendered = service.levelup_message(GUILD, &event).await.unwrap();
        assert_eq!(rendered, "<@42> hit 5 with 2345 XP");
    }

    #[test]
    fn leveling_error_messages_are_descriptive() {
        let storage_error = LevelingError::StorageError("db down".into());
        assert!(storage_error.to_string().contains("db down"));

        let invalid_id = LevelingError::InvalidId;
        assert_eq!(invalid_id.to_string(), "Invalid user or guild ID");

        let calibration = LevelingError::InvalidCalibration {
            base: -1.0,
            inc: 2.0,
        };
        assert!(calibration.to_string().contains("-1"));
    }
}
