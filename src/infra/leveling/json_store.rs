// JSON-file implementation of XpStore.
//
// Persists the whole store in a single pretty-printed JSON file, one record
// per guild. Good for small deployments and for hand-editing XP data; the
// SQLite backend is the better fit once guilds grow.

use crate::core::leveling::{CurveSpec, LevelingError, UserXp, XpStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Everything stored for one guild.
#[derive(Debug, Serialize, Deserialize, Default)]
struct GuildRecord {
    xp: HashMap<u64, u64>,
    curve: Option<CurveSpec>,
    levelup_template: Option<String>,
}

/// On-disk layout: { guild_id: GuildRecord }
#[derive(Debug, Serialize, Deserialize, Default)]
struct JsonStoreData {
    guilds: HashMap<u64, GuildRecord>,
}

pub struct JsonXpStore {
    path: PathBuf,
    cache: RwLock<JsonStoreData>,
}

impl JsonXpStore {
    pub fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let cache: JsonStoreData = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader).unwrap_or_default()
        } else {
            JsonStoreData::default()
        };

        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<(), LevelingError> {
        let cache = self.cache.read().await;
        let file =
            File::create(&self.path).map_err(|e| LevelingError::StorageError(e.to_string()))?;
        serde_json::to_writer_pretty(file, &*cache)
            .map_err(|e| LevelingError::StorageError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl XpStore for JsonXpStore {
    async fn get_xp(&self, guild_id: u64, user_id: u64) -> Result<u64, LevelingError> {
        let cache = self.cache.read().await;
        Ok(cache
            .guilds
            .get(&guild_id)
            .and_then(|g| g.xp.get(&user_id))
            .copied()
            .unwrap_or(0))
    }

    async fn set_xp(&self, guild_id: u64, user_id: u64, xp: u64) -> Result<(), LevelingError> {
        let mut cache = self.cache.write().await;
        cache.guilds.entry(guild_id).or_default().xp.insert(user_id, xp);
        drop(cache);
        self.persist().await
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
        let cache = self.cache.read().await;
        Ok(cache
            .guilds
            .get(&guild_id)
            .map(|g| {
                g.xp.iter()
                    .map(|(user_id, xp)| UserXp {
                        user_id: *user_id,
                        xp: *xp,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_curve_spec(&self, guild_id: u64) -> Result<Option<CurveSpec>, LevelingError> {
        let cache = self.cache.read().await;
        Ok(cache.guilds.get(&guild_id).and_then(|g| g.curve))
    }

    async fn save_curve_spec(&self, guild_id: u64, spec: CurveSpec) -> Result<(), LevelingError> {
        let mut cache = self.cache.write().await;
        cache.guilds.entry(guild_id).or_default().curve = Some(spec);
        drop(cache);
        self.persist().await
    }

    async fn get_levelup_template(
        &self,
        guild_id: u64,
    ) -> Result<Option<String>, LevelingError> {
        let cache = self.cache.read().await;
        Ok(cache
            .guilds
            .get(&guild_id)
            .and_then(|g| g.levelup_template.clone()))
    }

    async fn save_levelup_template(
        &self,
        guild_id: u64,
        template: String,
    ) -> Result<(), LevelingError> {
        let mut cache = self.cache.write().await;
        cache.guilds.entry(guild_id).or_default().levelup_template = Some(template);
        drop(cache);
        self.persist().await
    }
}
