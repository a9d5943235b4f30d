// Leaderboard batches: validation, goal neighbours and rank movement.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::bignum::SuffixTable;
use crate::db::{NewRankingEntry, PlayerSnapshot, RankingEntry};
use crate::progress;

/// The value a leaderboard batch is ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMetric {
    SoulEggs,
    EarningsBonus,
    Mer,
    Jer,
}

impl RankingMetric {
    pub const ALL: [RankingMetric; 4] = [
        RankingMetric::SoulEggs,
        RankingMetric::EarningsBonus,
        RankingMetric::Mer,
        RankingMetric::Jer,
    ];

    /// Parse a metric name as used in URLs and the database.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "soul_eggs" | "se" => Some(Self::SoulEggs),
            "earnings_bonus" | "eb" => Some(Self::EarningsBonus),
            "mer" => Some(Self::Mer),
            "jer" => Some(Self::Jer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SoulEggs => "soul_eggs",
            Self::EarningsBonus => "earnings_bonus",
            Self::Mer => "mer",
            Self::Jer => "jer",
        }
    }

    /// The entry's value for this metric.
    pub fn value_of(self, entry: &RankingEntry) -> &str {
        match self {
            Self::SoulEggs => &entry.soul_eggs,
            Self::EarningsBonus => &entry.earnings_bonus,
            Self::Mer => &entry.mer,
            Self::Jer => &entry.jer,
        }
    }

    /// A player snapshot's value for this metric.
    pub fn snapshot_value(self, snapshot: &PlayerSnapshot) -> &str {
        match self {
            Self::SoulEggs => &snapshot.soul_eggs_full,
            Self::EarningsBonus => &snapshot.earnings_bonus_percentage,
            Self::Mer => &snapshot.mer,
            Self::Jer => &snapshot.jer,
        }
    }
}

impl std::fmt::Display for RankingMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankingError {
    #[error("ranking batch is empty")]
    EmptyBatch,
    #[error("rank {0} appears more than once")]
    DuplicateRank(i64),
    #[error("ranks must run 1..={expected_max} without gaps, found {found}")]
    NotContiguous { expected_max: i64, found: i64 },
}

/// Ranks within one batch must be exactly `1..=n`, each once.
pub fn validate_batch(entries: &[NewRankingEntry]) -> Result<(), RankingError> {
    if entries.is_empty() {
        return Err(RankingError::EmptyBatch);
    }
    let n = entries.len() as i64;
    let mut seen = HashSet::with_capacity(entries.len());
    for e in entries {
        if e.rank < 1 || e.rank > n {
            return Err(RankingError::NotContiguous {
                expected_max: n,
                found: e.rank,
            });
        }
        if !seen.insert(e.rank) {
            return Err(RankingError::DuplicateRank(e.rank));
        }
    }
    Ok(())
}

/// The nearest-below and nearest-above players around a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalNeighbors {
    pub lower: Option<RankingEntry>,
    pub upper: Option<RankingEntry>,
}

/// Players in `batch` (other than `player_name`) closest below and above
/// `value` on `metric`. Ties with `value` count as neither.
pub fn surrounding(
    suffixes: &SuffixTable,
    batch: &[RankingEntry],
    metric: RankingMetric,
    player_name: &str,
    value: &str,
) -> GoalNeighbors {
    let target = suffixes.parse(value);
    let mut lower: Option<(f64, &RankingEntry)> = None;
    let mut upper: Option<(f64, &RankingEntry)> = None;

    for entry in batch.iter().filter(|e| e.player_name != player_name) {
        let v = suffixes.parse(metric.value_of(entry));
        if v < target && lower.map_or(true, |(best, _)| v > best) {
            lower = Some((v, entry));
        } else if v > target && upper.map_or(true, |(best, _)| v < best) {
            upper = Some((v, entry));
        }
    }

    GoalNeighbors {
        lower: lower.map(|(_, e)| e.clone()),
        upper: upper.map(|(_, e)| e.clone()),
    }
}

/// Progress from the lower neighbour towards the upper one.
///
/// A missing neighbour stands in as the player's own value: the top player
/// reads 100, the bottom player 0.
pub fn goal_progress(
    suffixes: &SuffixTable,
    neighbors: &GoalNeighbors,
    metric: RankingMetric,
    value: &str,
) -> f64 {
    let target = neighbors
        .upper
        .as_ref()
        .map_or(value, |e| metric.value_of(e));
    let previous = neighbors
        .lower
        .as_ref()
        .map_or(value, |e| metric.value_of(e));
    progress::percentage(suffixes, value, target, previous)
}

/// Rank movement of one player between two batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankDelta {
    pub player_name: String,
    pub previous_rank: Option<i64>,
    pub rank: i64,
    /// Places climbed; negative when the player dropped.
    pub movement: i64,
    pub new_entry: bool,
}

/// Movement of every player in `current` relative to `previous`, ordered by
/// current rank.
pub fn rank_deltas(previous: &[RankingEntry], current: &[RankingEntry]) -> Vec<RankDelta> {
    let before: HashMap<&str, i64> = previous
        .iter()
        .map(|e| (e.player_name.as_str(), e.rank))
        .collect();

    let mut deltas: Vec<RankDelta> = current
        .iter()
        .map(|e| {
            let previous_rank = before.get(e.player_name.as_str()).copied();
            RankDelta {
                player_name: e.player_name.clone(),
                previous_rank,
                rank: e.rank,
                movement: previous_rank.map_or(0, |p| p - e.rank),
                new_entry: previous_rank.is_none(),
            }
        })
        .collect();
    deltas.sort_by_key(|d| d.rank);
    deltas
}
