use crate::core::leveling::{CurveKind, CurveSpec, LevelingError, UserXp, XpStore};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed XP store. One row per (guild, user) XP total, one row per
/// guild for curve configuration and the level-up template.
pub struct SqliteXpStore {
    pool: Pool<Sqlite>,
}

impl SqliteXpStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_xp (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                xp INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_levelcfg (
                guild_id INTEGER PRIMARY KEY,
                curve TEXT NOT NULL DEFAULT 'linear',
                multiplier REAL NOT NULL DEFAULT 1.0,
                max_level INTEGER NOT NULL DEFAULT 0,
                linear_base REAL NOT NULL DEFAULT 83.2,
                linear_inc REAL NOT NULL DEFAULT 100.433,
                levelup_template TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert the config row for a guild, leaving unrelated columns alone.
    async fn ensure_config_row(&self, guild_id: u64) -> Result<(), LevelingError> {
        sqlx::query("INSERT OR IGNORE INTO guild_levelcfg (guild_id) VALUES (?)")
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::StorageError(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl XpStore for SqliteXpStore {
    async fn get_xp(&self, guild_id: u64, user_id: u64) -> Result<u64, LevelingError> {
        let result = sqlx::query("SELECT xp FROM user_xp WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(result.map(|row| row.get::<i64, _>(0) as u64).unwrap_or(0))
    }

    async fn set_xp(&self, guild_id: u64, user_id: u64, xp: u64) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO user_xp (guild_id, user_id, xp)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
            xp = excluded.xp
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(xp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn get_leaderboard(
        &self,
        guild_id: u64,
        limit: usize,
    ) -> Result<Vec<UserXp>, LevelingError> {
        let rows = sqlx::query(
            "SELECT user_id, xp FROM user_xp WHERE guild_id = ? ORDER BY xp DESC LIMIT ?",
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| UserXp {
                user_id: row.get::<i64, _>("user_id") as u64,
                xp: row.get::<i64, _>("xp") as u64,
            })
            .collect())
    }

    async fn get_all_xp(&self, guild_id: u64) -> Result<Vec<UserXp>, LevelingError> {
        let rows = sqlx::query("SELECT user_id, xp FROM user_xp WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| UserXp {
                user_id: row.get::<i64, _>("user_id") as u64,
                xp: row.get::<i64, _>("xp") as u64,
            })
            .collect())
    }

    async fn get_curve_spec(&self, guild_id: u64) -> Result<Option<CurveSpec>, LevelingError> {
        let row = sqlx::query(
            "SELECT curve, multiplier, max_level, linear_base, linear_inc FROM guild_levelcfg WHERE guild_id = ?",
        )
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(row.map(|row| {
            let curve_name: String = row.get("curve");
            CurveSpec {
                // Unknown stored names deliberately fall back to linear.
                curve: curve_name.parse().unwrap_or(CurveKind::Linear),
                multiplier: row.get::<f64, _>("multiplier"),
                max_level: row.get::<i64, _>("max_level") as u32,
                linear_base: row.get::<f64, _>("linear_base"),
                linear_inc: row.get::<f64, _>("linear_inc"),
            }
        }))
    }

    async fn save_curve_spec(&self, guild_id: u64, spec: CurveSpec) -> Result<(), LevelingError> {
        self.ensure_config_row(guild_id).await?;

        sqlx::query(
            r#"
            UPDATE guild_levelcfg SET
                curve = ?,
                multiplier = ?,
                max_level = ?,
                linear_base = ?,
                linear_inc = ?
            WHERE guild_id = ?
            "#,
        )
        .bind(spec.curve.as_str())
        .bind(spec.multiplier)
        .bind(spec.max_level as i64)
        .bind(spec.linear_base)
        .bind(spec.linear_inc)
        .bind(guild_id as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn get_levelup_template(
        &self,
        guild_id: u64,
    ) -> Result<Option<String>, LevelingError> {
        let row =
            sqlx::query("SELECT levelup_template FROM guild_levelcfg WHERE guild_id = ?")
                .bind(guild_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(row.and_then(|row| row.get::<Option<String>, _>("levelup_template")))
    }

    async fn save_levelup_template(
        &self,
        guild_id: u64,
        template: String,
    ) -> Result<(), LevelingError> {
        self.ensure_config_row(guild_id).await?;

        sqlx::query("UPDATE guild_levelcfg SET levelup_template = ? WHERE guild_id = ?")
            .bind(template)
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::StorageError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteXpStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("leveling.db");
        let store = SqliteXpStore::new(path.to_str().unwrap())
            .await
            .expect("store init");
        (dir, store)
    }

    #[tokio::test]
    async fn xp_defaults_to_zero_and_persists() {
        let (_dir, store) = temp_store().await;

        assert_eq!(store.get_xp(1, 2).await.unwrap(), 0);

        store.set_xp(1, 2, 150).await.unwrap();
        assert_eq!(store.get_xp(1, 2).await.unwrap(), 150);

        // Overwrite, not accumulate.
        store.set_xp(1, 2, 90).await.unwrap();
        assert_eq!(store.get_xp(1, 2).await.unwrap(), 90);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_xp_within_guild() {
        let (_dir, store) = temp_store().await;

        store.set_xp(1, 10, 300).await.unwrap();
        store.set_xp(1, 11, 900).await.unwrap();
        store.set_xp(1, 12, 50).await.unwrap();
        store.set_xp(2, 13, 5000).await.unwrap();

        let board = store.get_leaderboard(1, 2).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].user_id, 11);
        assert_eq!(board[1].user_id, 10);

        let all = store.get_all_xp(1).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn curve_spec_round_trips() {
        let (_dir, store) = temp_store().await;

        assert!(store.get_curve_spec(1).await.unwrap().is_none());

        let spec = CurveSpec {
            curve: CurveKind::Exponential,
            multiplier: 2.5,
            max_level: 40,
            linear_base: 10.0,
            linear_inc: 5.5,
        };
        store.save_curve_spec(1, spec).await.unwrap();

        let loaded = store.get_curve_spec(1).await.unwrap().unwrap();
        assert_eq!(loaded, spec);
    }

    #[tokio::test]
    async fn template_survives_curve_updates() {
        let (_dir, store) = temp_store().await;

        store
            .save_levelup_template(1, "{user} -> {level}".into())
            .await
            .unwrap();
        store
            .save_curve_spec(1, CurveSpec::default())
            .await
            .unwrap();

        assert_eq!(
            store.get_levelup_template(1).await.unwrap().as_deref(),
            Some("{user} -> {level}")
        );
    }
}
