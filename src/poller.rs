// Periodic polling of the snapshot source into the database.
//
// One cycle at a time: a cycle requested while another is running is
// skipped, not queued. Only the initial load retries.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{try_join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bignum::FormatError;
use crate::config::Tables;
use crate::db::{Database, NewRankingEntry, NewSnapshot, PlayerSnapshot};
use crate::error::TrackerError;
use crate::history;
use crate::metrics;
use crate::ranking::RankingMetric;
use crate::title;

/// Longest wait between initial-load attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One player's stats as reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerReport {
    pub player_name: String,
    pub soul_eggs: String,
    pub soul_eggs_full: String,
    #[serde(default)]
    pub earnings_bonus_percentage: String,
    #[serde(default)]
    pub prophecy_eggs: i64,
    #[serde(default)]
    pub prestiges: i64,
    #[serde(default)]
    pub mer: String,
    #[serde(default)]
    pub jer: String,
}

/// One leaderboard as reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub metric: RankingMetric,
    pub entries: Vec<NewRankingEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollBatch {
    pub players: Vec<PlayerReport>,
    pub rankings: Vec<RankingReport>,
}

/// Where poll data comes from.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<PollBatch, TrackerError>> + Send;
}

/// Snapshot source serving JSON: `GET {base}/players` and
/// `GET {base}/rankings/{metric}`.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TrackerError> {
        let url = format!("{}/{}", self.base_url, path);
        let value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(value)
    }
}

impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self) -> Result<PollBatch, TrackerError> {
        let players: Vec<PlayerReport> = self.get_json("players").await?;
        let rankings = try_join_all(RankingMetric::ALL.iter().map(|&metric| async move {
            let entries: Vec<NewRankingEntry> =
                self.get_json(&format!("rankings/{}", metric.as_str())).await?;
            Ok::<_, TrackerError>(RankingReport { metric, entries })
        }))
        .await?;
        Ok(PollBatch { players, rankings })
    }
}

/// Result of asking for a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed {
        snapshots: usize,
        ranking_entries: usize,
    },
    /// Another cycle was already running.
    Skipped,
}

/// Object-safe handle for triggering a cycle from the API.
pub trait PollTrigger: Send + Sync {
    fn trigger(&self) -> BoxFuture<'_, Result<PollOutcome, TrackerError>>;
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        metrics::POLL_IN_FLIGHT.set(0);
    }
}

pub struct Poller<S> {
    db: Arc<Database>,
    tables: Arc<Tables>,
    source: Arc<S>,
    lookback: chrono::Duration,
    in_flight: Arc<AtomicBool>,
}

impl<S> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            tables: self.tables.clone(),
            source: self.source.clone(),
            lookback: self.lookback,
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<S: SnapshotSource> Poller<S> {
    pub fn new(db: Arc<Database>, tables: Arc<Tables>, source: S, lookback: chrono::Duration) -> Self {
        Self {
            db,
            tables,
            source: Arc::new(source),
            lookback,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one cycle unless one is already in flight.
    pub async fn run_once(&self) -> Result<PollOutcome, TrackerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics::POLL_CYCLES_TOTAL.with_label_values(&["skipped"]).inc();
            tracing::info!("Poll cycle skipped, previous cycle still running");
            return Ok(PollOutcome::Skipped);
        }
        let _in_flight = InFlight(self.in_flight.clone());
        metrics::POLL_IN_FLIGHT.set(1);

        let cycle_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let result = self.cycle().await;
        metrics::POLL_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(PollOutcome::Completed {
                snapshots,
                ranking_entries,
            }) => {
                metrics::POLL_CYCLES_TOTAL.with_label_values(&["ok"]).inc();
                tracing::info!(%cycle_id, snapshots, ranking_entries, "Poll cycle completed");
            }
            Ok(PollOutcome::Skipped) => {}
            Err(e) => {
                metrics::POLL_CYCLES_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(%cycle_id, "Poll cycle failed: {e}");
            }
        }
        result
    }

    async fn cycle(&self) -> Result<PollOutcome, TrackerError> {
        let batch = self.source.fetch().await?;
        let now = Utc::now();

        let mut snapshots = 0;
        for report in &batch.players {
            if report.player_name.trim().is_empty() {
                tracing::warn!("Skipping player report without a name");
                continue;
            }
            self.store_player(report, now).await?;
            snapshots += 1;
        }
        metrics::TRACKED_PLAYERS.set(snapshots as i64);

        let mut ranking_entries = 0;
        for ranking in &batch.rankings {
            if ranking.entries.is_empty() {
                continue;
            }
            match self
                .db
                .insert_ranking_batch(ranking.metric, now, &ranking.entries)
                .await
            {
                Ok(stored) => {
                    metrics::RANKING_ENTRIES_STORED_TOTAL
                        .with_label_values(&[ranking.metric.as_str()])
                        .inc_by(stored.len() as u64);
                    ranking_entries += stored.len();
                }
                // A malformed leaderboard does not cost the player snapshots.
                Err(TrackerError::Ranking(e)) => {
                    tracing::warn!(metric = %ranking.metric, "Rejected ranking batch: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(PollOutcome::Completed {
            snapshots,
            ranking_entries,
        })
    }

    async fn store_player(&self, report: &PlayerReport, now: DateTime<Utc>) -> Result<PlayerSnapshot, TrackerError> {
        let history = self
            .db
            .history(&report.player_name, history::window_start(now, self.lookback), now)
            .await?;
        let snapshot = derive_snapshot(&self.tables, report, history, now, self.lookback)?;
        let stored = self.db.insert_snapshot(&snapshot).await?;
        metrics::SNAPSHOTS_STORED_TOTAL.inc();
        Ok(stored)
    }
}

impl<S: SnapshotSource> PollTrigger for Poller<S> {
    fn trigger(&self) -> BoxFuture<'_, Result<PollOutcome, TrackerError>> {
        Box::pin(self.run_once())
    }
}

/// Fill in the title fields of a new snapshot from the report and the
/// player's stored history.
pub fn derive_snapshot(
    tables: &Tables,
    report: &PlayerReport,
    mut history: Vec<PlayerSnapshot>,
    now: DateTime<Utc>,
    lookback: chrono::Duration,
) -> Result<NewSnapshot, FormatError> {
    let current = PlayerSnapshot {
        id: 0,
        player_name: report.player_name.clone(),
        soul_eggs: report.soul_eggs.clone(),
        soul_eggs_full: report.soul_eggs_full.clone(),
        earnings_bonus_percentage: report.earnings_bonus_percentage.clone(),
        prophecy_eggs: report.prophecy_eggs,
        prestiges: report.prestiges,
        mer: report.mer.clone(),
        jer: report.jer.clone(),
        title: String::new(),
        next_title: String::new(),
        title_progress: 0.0,
        projected_title_change: now,
        updated: now,
    };
    history.push(current.clone());

    let report = title::evaluate(&tables.suffixes, &tables.titles, &current, &history, now, lookback)?;

    Ok(NewSnapshot {
        player_name: current.player_name,
        soul_eggs: current.soul_eggs,
        soul_eggs_full: current.soul_eggs_full,
        earnings_bonus_percentage: current.earnings_bonus_percentage,
        prophecy_eggs: current.prophecy_eggs,
        prestiges: current.prestiges,
        mer: current.mer,
        jer: current.jer,
        title: report.standing.current,
        next_title: report.standing.next,
        title_progress: report.standing.progress,
        projected_title_change: report.projected_change,
        updated: now,
    })
}

/// Wait before retry `attempt` (1-based) of the initial load: 1s, 2s, 4s, ...
/// capped at 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_secs(factor).min(MAX_BACKOFF)
}

/// Spawn the background poller: an initial load with bounded retries, then
/// one cycle per `interval`. Ticks missed while a cycle runs are dropped.
pub fn spawn_poller<S: SnapshotSource>(
    poller: Poller<S>,
    interval: Duration,
    initial_attempts: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        for attempt in 1..=initial_attempts.max(1) {
            match poller.run_once().await {
                Ok(_) => break,
                Err(_) if attempt < initial_attempts => {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(attempt, "Initial load failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    tracing::error!("Initial load failed after {attempt} attempts, waiting for the next interval");
                }
            }
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; the initial load covered it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // Failures are logged and counted in run_once.
            let _ = poller.run_once().await;
        }
    })
}
