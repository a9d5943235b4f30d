// Database access layer (SQLite via sqlx).
//
// Snapshots and ranking batches are append-only.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::bignum::SuffixTable;
use crate::error::TrackerError;
use crate::ranking::{self, GoalNeighbors, RankingMetric};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlayerSnapshot {
    pub id: i64,
    pub player_name: String,
    /// Display form, e.g. "12.345s".
    pub soul_eggs: String,
    /// Full precision.
    pub soul_eggs_full: String,
    pub earnings_bonus_percentage: String,
    pub prophecy_eggs: i64,
    pub prestiges: i64,
    pub mer: String,
    pub jer: String,
    pub title: String,
    pub next_title: String,
    pub title_progress: f64,
    pub projected_title_change: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// A snapshot about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub player_name: String,
    pub soul_eggs: String,
    pub soul_eggs_full: String,
    pub earnings_bonus_percentage: String,
    pub prophecy_eggs: i64,
    pub prestiges: i64,
    pub mer: String,
    pub jer: String,
    pub title: String,
    pub next_title: String,
    pub title_progress: f64,
    pub projected_title_change: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RankingEntry {
    pub id: i64,
    pub metric: String,
    pub updated: DateTime<Utc>,
    pub rank: i64,
    pub player_name: String,
    pub soul_eggs: String,
    pub earnings_bonus: String,
    pub mer: String,
    pub jer: String,
}

/// One row of a ranking batch about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRankingEntry {
    pub rank: i64,
    pub player_name: String,
    pub soul_eggs: String,
    pub earnings_bonus: String,
    pub mer: String,
    pub jer: String,
}

const SNAPSHOT_COLUMNS: &str = "id, player_name, soul_eggs, soul_eggs_full, earnings_bonus_percentage, prophecy_eggs, prestiges, mer, jer, title, next_title, title_progress, projected_title_change, updated";

const RANKING_COLUMNS: &str =
    "id, metric, updated, rank, player_name, soul_eggs, earnings_bonus, mer, jer";

/// Stored timestamps keep millisecond precision so their text form sorts
/// in time order.
fn stored_time(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(3)
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS player_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_name TEXT NOT NULL,
                soul_eggs TEXT NOT NULL DEFAULT '',
                soul_eggs_full TEXT NOT NULL DEFAULT '0',
                earnings_bonus_percentage TEXT NOT NULL DEFAULT '',
                prophecy_eggs INTEGER NOT NULL DEFAULT 0,
                prestiges INTEGER NOT NULL DEFAULT 0,
                mer TEXT NOT NULL DEFAULT '',
                jer TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                next_title TEXT NOT NULL DEFAULT '',
                title_progress REAL NOT NULL DEFAULT 0,
                projected_title_change TEXT NOT NULL,
                updated TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_player_snapshots_player_updated ON player_snapshots (player_name, updated)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ranking_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric TEXT NOT NULL,
                updated TEXT NOT NULL,
                rank INTEGER NOT NULL,
                player_name TEXT NOT NULL,
                soul_eggs TEXT NOT NULL DEFAULT '',
                earnings_bonus TEXT NOT NULL DEFAULT '',
                mer TEXT NOT NULL DEFAULT '',
                jer TEXT NOT NULL DEFAULT '',
                UNIQUE(metric, updated, rank)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Player snapshots ─────────────────────────────────────────────

    pub async fn insert_snapshot(&self, s: &NewSnapshot) -> Result<PlayerSnapshot, sqlx::Error> {
        let row = sqlx::query_as::<_, PlayerSnapshot>(&format!(
            "INSERT INTO player_snapshots (player_name, soul_eggs, soul_eggs_full, earnings_bonus_percentage, prophecy_eggs, prestiges, mer, jer, title, next_title, title_progress, projected_title_change, updated) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {SNAPSHOT_COLUMNS}"
        ))
        .bind(&s.player_name)
        .bind(&s.soul_eggs)
        .bind(&s.soul_eggs_full)
        .bind(&s.earnings_bonus_percentage)
        .bind(s.prophecy_eggs)
        .bind(s.prestiges)
        .bind(&s.mer)
        .bind(&s.jer)
        .bind(&s.title)
        .bind(&s.next_title)
        .bind(s.title_progress)
        .bind(stored_time(s.projected_title_change))
        .bind(stored_time(s.updated))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn latest_snapshot(&self, player_name: &str) -> Result<Option<PlayerSnapshot>, sqlx::Error> {
        let row = sqlx::query_as::<_, PlayerSnapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM player_snapshots WHERE player_name = ? ORDER BY updated DESC, id DESC LIMIT 1"
        ))
        .bind(player_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Snapshots of one player with `from <= updated <= to`, oldest first.
    pub async fn history(
        &self,
        player_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PlayerSnapshot>, sqlx::Error> {
        let rows = sqlx::query_as::<_, PlayerSnapshot>(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM player_snapshots WHERE player_name = ? AND updated >= ? AND updated <= ? ORDER BY updated, id"
        ))
        .bind(player_name)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Names of every player with at least one snapshot.
    pub async fn list_players(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT player_name FROM player_snapshots ORDER BY player_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Ranking batches ──────────────────────────────────────────────

    /// Write one ranking batch. All rows share `updated`; ranks must be
    /// exactly `1..=n`.
    pub async fn insert_ranking_batch(
        &self,
        metric: RankingMetric,
        updated: DateTime<Utc>,
        entries: &[NewRankingEntry],
    ) -> Result<Vec<RankingEntry>, TrackerError> {
        ranking::validate_batch(entries)?;
        let updated = stored_time(updated);

        let mut tx = self.pool.begin().await?;
        for e in entries {
            sqlx::query(
                "INSERT INTO ranking_entries (metric, updated, rank, player_name, soul_eggs, earnings_bonus, mer, jer) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(metric.as_str())
            .bind(updated)
            .bind(e.rank)
            .bind(&e.player_name)
            .bind(&e.soul_eggs)
            .bind(&e.earnings_bonus)
            .bind(&e.mer)
            .bind(&e.jer)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(self.ranking_batch(metric, updated).await?)
    }

    async fn ranking_batch(
        &self,
        metric: RankingMetric,
        updated: DateTime<Utc>,
    ) -> Result<Vec<RankingEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RankingEntry>(&format!(
            "SELECT {RANKING_COLUMNS} FROM ranking_entries WHERE metric = ? AND updated = ? ORDER BY rank"
        ))
        .bind(metric.as_str())
        .bind(updated)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Most recent batch for `metric`, by rank. Empty if none stored.
    pub async fn latest_ranking(&self, metric: RankingMetric) -> Result<Vec<RankingEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RankingEntry>(&format!(
            "SELECT {RANKING_COLUMNS} FROM ranking_entries WHERE metric = ? AND updated = (SELECT MAX(updated) FROM ranking_entries WHERE metric = ?) ORDER BY rank"
        ))
        .bind(metric.as_str())
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The batch before the most recent one for `metric`.
    pub async fn previous_ranking(&self, metric: RankingMetric) -> Result<Vec<RankingEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, RankingEntry>(&format!(
            "SELECT {RANKING_COLUMNS} FROM ranking_entries WHERE metric = ? AND updated = (SELECT MAX(updated) FROM ranking_entries WHERE metric = ? AND updated < (SELECT MAX(updated) FROM ranking_entries WHERE metric = ?)) ORDER BY rank"
        ))
        .bind(metric.as_str())
        .bind(metric.as_str())
        .bind(metric.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Nearest players below and above `value` in the latest `metric` batch.
    pub async fn surrounding(
        &self,
        suffixes: &SuffixTable,
        player_name: &str,
        metric: RankingMetric,
        value: &str,
    ) -> Result<GoalNeighbors, sqlx::Error> {
        let batch = self.latest_ranking(metric).await?;
        Ok(ranking::surrounding(suffixes, &batch, metric, player_name, value))
    }
}

#[cfg(test)]
pub(crate) fn test_snapshot(
    player_name: &str,
    soul_eggs_full: &str,
    prophecy_eggs: i64,
    updated: DateTime<Utc>,
) -> PlayerSnapshot {
    PlayerSnapshot {
        id: 0,
        player_name: player_name.to_string(),
        soul_eggs: soul_eggs_full.to_string(),
        soul_eggs_full: soul_eggs_full.to_string(),
        earnings_bonus_percentage: String::new(),
        prophecy_eggs,
        prestiges: 0,
        mer: String::new(),
        jer: String::new(),
        title: String::new(),
        next_title: String::new(),
        title_progress: 0.0,
        projected_title_change: updated,
        updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn new_snapshot(name: &str, soul_eggs_full: &str, updated: DateTime<Utc>) -> NewSnapshot {
        NewSnapshot {
            player_name: name.to_string(),
            soul_eggs: soul_eggs_full.to_string(),
            soul_eggs_full: soul_eggs_full.to_string(),
            earnings_bonus_percentage: "0%".to_string(),
            prophecy_eggs: 5,
            prestiges: 1,
            mer: "1.0".to_string(),
            jer: "2.0".to_string(),
            title: "Farmer I".to_string(),
            next_title: "Farmer II".to_string(),
            title_progress: 12.5,
            projected_title_change: updated + Duration::days(3),
            updated,
        }
    }

    fn entry(rank: i64, name: &str, soul_eggs: &str) -> NewRankingEntry {
        NewRankingEntry {
            rank,
            player_name: name.to_string(),
            soul_eggs: soul_eggs.to_string(),
            earnings_bonus: String::new(),
            mer: String::new(),
            jer: String::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_latest_snapshot() {
        let db = test_db().await;

        let first = db.insert_snapshot(&new_snapshot("alice", "100", at(1))).await.unwrap();
        assert_eq!(first.player_name, "alice");
        assert_eq!(first.updated, at(1));
        assert_eq!(first.title_progress, 12.5);
        assert_eq!(first.projected_title_change, at(1) + Duration::days(3));

        db.insert_snapshot(&new_snapshot("alice", "200", at(3))).await.unwrap();
        db.insert_snapshot(&new_snapshot("alice", "150", at(2))).await.unwrap();

        let latest = db.latest_snapshot("alice").await.unwrap().unwrap();
        assert_eq!(latest.soul_eggs_full, "200");

        assert!(db.latest_snapshot("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_range_is_ordered() {
        let db = test_db().await;
        for (hour, se) in [(5, "5"), (1, "1"), (3, "3"), (9, "9")] {
            db.insert_snapshot(&new_snapshot("alice", se, at(hour))).await.unwrap();
        }
        db.insert_snapshot(&new_snapshot("bob", "4", at(4))).await.unwrap();

        let rows = db.history("alice", at(2), at(8)).await.unwrap();
        let values: Vec<&str> = rows.iter().map(|r| r.soul_eggs_full.as_str()).collect();
        assert_eq!(values, vec!["3", "5"]);

        let players = db.list_players().await.unwrap();
        assert_eq!(players, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[tokio::test]
    async fn test_ranking_batches() {
        let db = test_db().await;
        let old = vec![entry(1, "alice", "3K"), entry(2, "bob", "2K")];
        let new = vec![entry(1, "bob", "5K"), entry(2, "alice", "4K"), entry(3, "carol", "1K")];

        db.insert_ranking_batch(RankingMetric::SoulEggs, at(1), &old).await.unwrap();
        let stored = db
            .insert_ranking_batch(RankingMetric::SoulEggs, at(2), &new)
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().all(|e| e.updated == at(2) && e.metric == "soul_eggs"));

        let latest = db.latest_ranking(RankingMetric::SoulEggs).await.unwrap();
        assert_eq!(latest[0].player_name, "bob");
        assert_eq!(latest.len(), 3);

        let previous = db.previous_ranking(RankingMetric::SoulEggs).await.unwrap();
        assert_eq!(previous.len(), 2);
        assert_eq!(previous[0].player_name, "alice");

        assert!(db.latest_ranking(RankingMetric::Mer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_ranking_batch_is_rejected() {
        let db = test_db().await;
        let gap = vec![entry(1, "alice", "3K"), entry(3, "bob", "2K")];
        let err = db
            .insert_ranking_batch(RankingMetric::SoulEggs, at(1), &gap)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Ranking(_)));
        assert!(db.latest_ranking(RankingMetric::SoulEggs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_surrounding_players() {
        let db = test_db().await;
        let batch = vec![
            entry(1, "alice", "9K"),
            entry(2, "bob", "6K"),
            entry(3, "carol", "3K"),
        ];
        db.insert_ranking_batch(RankingMetric::SoulEggs, at(1), &batch).await.unwrap();

        let n = db
            .surrounding(&SuffixTable::default(), "dave", RankingMetric::SoulEggs, "5K")
            .await
            .unwrap();
        assert_eq!(n.lower.unwrap().player_name, "carol");
        assert_eq!(n.upper.unwrap().player_name, "bob");
    }
}
