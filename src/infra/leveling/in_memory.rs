// In-memory implementation of XpStore.
//
// Useful for tests and for running the bot without a database; everything is
// lost on restart. DashMap keeps it safe across concurrent Discord events
// without an explicit Mutex.

use crate::core::leveling::{CurveSpec, LevelingError, UserXp, XpStore};
use async_trait::async_trait;
use dashmap::DashMap;

/// A composite key for looking up user XP.
/// We need both guild_id AND user_id since users can be in multiple guilds.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct GuildUserKey {
    guild_id: u64,
    user_id: u64,
}

pub struct InMemoryXpStore {
    xp: DashMap<GuildUserKey, u64>,
    curves: DashMap<u64, CurveSpec>,
    templates: DashMap<u64, String>,
}

impl InMemoryXpStore {
    pub fn new() -> Self {
        Self {
            xp: DashMap::new(),
            curves: DashMap::new(),
            templates: DashMap::new(),
        }
    }
}

impl Default for InMemoryXpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl XpStore for InMemoryXpStore {
    async fn get_xp(&self, guild_id: u64, user_id: u64) -> Result<u64, LevelingError> {
        let key = GuildUserKey { guild_id, user_id };
        Ok(self.xp.get(&key).map(|entry| *entry).unwrap_or(0))
    }

    async fn set_xp(&self, guild_id: u64, user_id: u64, xp: u64) -> Result<(), LevelingError> {
        self.xp.insert(GuildUserKey { guild_id, user_id }, xp);
        Ok(())
    }

    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<UserXp>, LevelingError> {
        let mut users = self.get_all_xp(guild_id).await?;
        users.sort_by(|a, b| b.xp.cmp(&a.xp));
        users.truncate(limit);
        Ok(users)
    }

    async fn get_all_xp(&self, guild_id: u64) -> Result<Vec<UserXp>, LevelingError> {
        Ok(self
            .xp
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| UserXp {
                user_id: entry.key().user_id,
                xp: *entry.value(),
            })
            .collect())
    }

    async fn get_curve_spec(&self, guild_id: u64) -> Result<Option<CurveSpec>, LevelingError> {
        Ok(self.curves.get(&guild_id).map(|entry| *entry))
    }

    async fn save_curve_spec(&self, guild_id: u64, spec: CurveSpec) -> Result<(), LevelingError> {
        self.curves.insert(guild_id, spec);
        Ok(())
    }

    async fn get_levelup_template(
        &self,
        guild_id: u64,
    ) -> Result<Option<String>, LevelingError> {
        Ok(self.templates.get(&guild_id).map(|entry| entry.clone()))
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
