// Title tiers driven by earnings bonus, and when the next one is due.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use num_bigint::{BigInt, BigUint};
use num_traits::{FromPrimitive, Num, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::bignum::{FormatError, SuffixTable};
use crate::db::PlayerSnapshot;
use crate::history;

/// Title shown below the first tier.
pub const NO_TITLE: &str = "None";

/// Default lookback for growth-rate projections.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Soul egg bonus percentage the multiplier starts from.
const SOUL_EGG_BONUS: f64 = 150.0;
/// Per-prophecy-egg growth of the multiplier.
const PROPHECY_EGG_BONUS: f64 = 1.1;

const ORDERS: &[&str] = &[
    "Farmer",
    "Kilofarmer",
    "Megafarmer",
    "Gigafarmer",
    "Terafarmer",
    "Petafarmer",
    "Exafarmer",
    "Zettafarmer",
    "Yottafarmer",
    "Xennafarmer",
    "Weccafarmer",
    "Vendafarmer",
    "Uadafarmer",
    "Treidafarmer",
    "Quadafarmer",
    "Pendafarmer",
    "Exedafarmer",
    "Infinifarmer",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleTier {
    pub threshold: BigUint,
    pub name: String,
}

/// One entry of a title table file: `{ "threshold": "1000", "name": "Farmer" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct TitleSpec {
    pub threshold: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleTableError {
    #[error("title table is empty")]
    Empty,
    #[error("threshold of '{0}' does not exceed the previous tier")]
    NotIncreasing(String),
    #[error("invalid threshold '{threshold}' for title '{name}'")]
    InvalidThreshold { name: String, threshold: String },
    #[error("invalid title table JSON: {0}")]
    Json(String),
}

/// Current title, the one after it, and progress between them (0..=100).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleStanding {
    pub current: String,
    pub next: String,
    pub progress: f64,
}

/// Why there is no projected date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoProjection {
    /// Fewer than two snapshots in the lookback window.
    InsufficientHistory,
    /// Earnings bonus flat or shrinking over the window.
    NotGrowing,
    /// Already past the last tier.
    BeyondLastTier,
    /// Projected date is past what a timestamp can hold.
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Projection {
    At(DateTime<Utc>),
    Unavailable(NoProjection),
}

impl Projection {
    /// Collapse to a timestamp, using the far-future sentinel when there is
    /// no projection.
    pub fn or_sentinel(self) -> DateTime<Utc> {
        match self {
            Projection::At(at) => at,
            Projection::Unavailable(_) => no_projection_sentinel(),
        }
    }
}

/// Timestamp stored when no title change can be projected.
pub fn no_projection_sentinel() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|n| n.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `soul_eggs × floor(150 × 1.1^prophecy_eggs)`.
pub fn earnings_bonus(soul_eggs_full: &BigUint, prophecy_eggs: u32) -> BigUint {
    let multiplier = (SOUL_EGG_BONUS * PROPHECY_EGG_BONUS.powf(prophecy_eggs as f64))
        .floor()
        .min(f64::MAX);
    let multiplier = BigUint::from_f64(multiplier).unwrap_or_default();
    soul_eggs_full * multiplier
}

/// Earnings bonus of a stored snapshot, if its soul eggs are readable.
pub fn snapshot_earnings_bonus(suffixes: &SuffixTable, snapshot: &PlayerSnapshot) -> Option<BigUint> {
    let soul_eggs = suffixes.parse_integer(&snapshot.soul_eggs_full)?;
    let prophecy_eggs = u32::try_from(snapshot.prophecy_eggs).ok()?;
    Some(earnings_bonus(&soul_eggs, prophecy_eggs))
}

/// Immutable, strictly increasing title table.
#[derive(Debug, Clone)]
pub struct TitleTable {
    tiers: Vec<TitleTier>,
}

impl TitleTable {
    pub fn new(tiers: Vec<TitleTier>) -> Result<Self, TitleTableError> {
        if tiers.is_empty() {
            return Err(TitleTableError::Empty);
        }
        for pair in tiers.windows(2) {
            if pair[1].threshold <= pair[0].threshold {
                return Err(TitleTableError::NotIncreasing(pair[1].name.clone()));
            }
        }
        Ok(Self { tiers })
    }

    /// Build a table from `(threshold, name)` pairs.
    pub fn from_pairs(pairs: &[(u64, &str)]) -> Result<Self, TitleTableError> {
        Self::new(
            pairs
                .iter()
                .map(|(threshold, name)| TitleTier {
                    threshold: BigUint::from(*threshold),
                    name: name.to_string(),
                })
                .collect(),
        )
    }

    /// Build a table from the JSON file format (`[TitleSpec, ...]`).
    pub fn from_json(json: &str) -> Result<Self, TitleTableError> {
        let specs: Vec<TitleSpec> =
            serde_json::from_str(json).map_err(|e| TitleTableError::Json(e.to_string()))?;
        let mut tiers = Vec::with_capacity(specs.len());
        for spec in specs {
            let threshold = BigUint::from_str_radix(spec.threshold.trim(), 10).map_err(|_| {
                TitleTableError::InvalidThreshold {
                    name: spec.name.clone(),
                    threshold: spec.threshold.clone(),
                }
            })?;
            tiers.push(TitleTier {
                threshold,
                name: spec.name,
            });
        }
        Self::new(tiers)
    }

    pub fn tiers(&self) -> &[TitleTier] {
        &self.tiers
    }

    /// Index of the first tier whose threshold exceeds `eb`.
    fn next_index(&self, eb: &BigUint) -> Option<usize> {
        self.tiers.iter().position(|t| t.threshold > *eb)
    }

    /// Threshold of the next tier, or `None` past the last one.
    pub fn next_threshold(&self, eb: &BigUint) -> Option<&BigUint> {
        self.next_index(eb).map(|i| &self.tiers[i].threshold)
    }

    pub fn title_for(&self, eb: &BigUint) -> TitleStanding {
        let Some(i) = self.next_index(eb) else {
            // new() guarantees at least one tier.
            let last = &self.tiers[self.tiers.len() - 1].name;
            return TitleStanding {
                current: last.clone(),
                next: format!("{last}+"),
                progress: 100.0,
            };
        };

        let upper = &self.tiers[i].threshold;
        let (current, lower) = match i.checked_sub(1) {
            Some(prev) => (self.tiers[prev].name.clone(), self.tiers[prev].threshold.clone()),
            None => (NO_TITLE.to_string(), BigUint::zero()),
        };

        TitleStanding {
            current,
            next: self.tiers[i].name.clone(),
            progress: interpolate(eb, &lower, upper),
        }
    }

    /// When `current_eb` reaches the next tier at the growth rate seen in
    /// `history` over `lookback` before `now`.
    pub fn projected_change_date(
        &self,
        suffixes: &SuffixTable,
        history: &[PlayerSnapshot],
        current_eb: &BigUint,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Projection {
        let Some(next) = self.next_threshold(current_eb) else {
            return Projection::Unavailable(NoProjection::BeyondLastTier);
        };
        let Some(rate) = history::earnings_bonus_per_hour(suffixes, history, now, lookback) else {
            return Projection::Unavailable(NoProjection::InsufficientHistory);
        };
        if rate <= 0.0 || !rate.is_finite() {
            return Projection::Unavailable(NoProjection::NotGrowing);
        }

        let needed = BigInt::from(next.clone()) - BigInt::from(current_eb.clone());
        let needed = needed.to_f64().unwrap_or(f64::MAX);
        let millis = needed / rate * 3_600_000.0;
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return Projection::Unavailable(NoProjection::OutOfRange);
        }

        let at = Duration::try_milliseconds(millis.ceil() as i64)
            .and_then(|d| now.checked_add_signed(d))
            .filter(|at| *at < no_projection_sentinel());
        match at {
            Some(at) => Projection::At(at),
            None => Projection::Unavailable(NoProjection::OutOfRange),
        }
    }
}

impl Default for TitleTable {
    fn default() -> Self {
        let ten = BigUint::from(10u32);
        let mut tiers = Vec::with_capacity(ORDERS.len() * 3);
        for (k, order) in ORDERS.iter().enumerate() {
            for (j, numeral) in ["I", "II", "III"].iter().enumerate() {
                tiers.push(TitleTier {
                    threshold: ten.pow((3 * k + j) as u32),
                    name: format!("{order} {numeral}"),
                });
            }
        }
        Self { tiers }
    }
}

/// Percentage of the way from `lower` to `upper`. The differences are taken
/// exactly; only the ratio is floating point.
fn interpolate(value: &BigUint, lower: &BigUint, upper: &BigUint) -> f64 {
    if value <= lower {
        return 0.0;
    }
    if value >= upper {
        return 100.0;
    }
    let gained = (value - lower).to_f64().unwrap_or(f64::MAX);
    let span = (upper - lower).to_f64().unwrap_or(f64::MAX);
    let percent = gained * 100.0 / span;
    if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Everything a dashboard shows about one player's title.
#[derive(Debug, Clone, Serialize)]
pub struct TitleReport {
    pub player_name: String,
    /// Decimal digits.
    pub earnings_bonus: String,
    /// Suffix notation.
    pub earnings_bonus_display: String,
    #[serde(flatten)]
    pub standing: TitleStanding,
    pub projection: Projection,
    pub projected_change: DateTime<Utc>,
}

/// Title report for `latest`, projecting from `history`.
///
/// Unreadable soul eggs count as zero earnings bonus.
pub fn evaluate(
    suffixes: &SuffixTable,
    titles: &TitleTable,
    latest: &PlayerSnapshot,
    history: &[PlayerSnapshot],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Result<TitleReport, FormatError> {
    let eb = snapshot_earnings_bonus(suffixes, latest).unwrap_or_else(|| {
        tracing::warn!(
            player = %latest.player_name,
            soul_eggs_full = %latest.soul_eggs_full,
            "Unreadable soul eggs, treating earnings bonus as zero"
        );
        BigUint::zero()
    });

    let standing = titles.title_for(&eb);
    let projection = titles.projected_change_date(suffixes, history, &eb, now, lookback);

    Ok(TitleReport {
        player_name: latest.player_name.clone(),
        earnings_bonus: eb.to_string(),
        earnings_bonus_display: suffixes.format(&eb, false, true)?,
        standing,
        projection,
        projected_change: projection.or_sentinel(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_snapshot;

    fn two_tiers() -> TitleTable {
        TitleTable::from_pairs(&[(1000, "Farmer"), (10000, "Farmer II")]).unwrap()
    }

    #[test]
    fn test_below_first_tier() {
        let s = two_tiers().title_for(&BigUint::from(500u32));
        assert_eq!(s.current, "None");
        assert_eq!(s.next, "Farmer");
        assert_eq!(s.progress, 50.0);
    }

    #[test]
    fn test_between_tiers() {
        let s = two_tiers().title_for(&BigUint::from(5500u32));
        assert_eq!(s.current, "Farmer");
        assert_eq!(s.next, "Farmer II");
        assert_eq!(s.progress, 50.0);
    }

    #[test]
    fn test_progress_is_not_rounded() {
        let table = TitleTable::from_pairs(&[(3, "Farmer")]).unwrap();
        let s = table.title_for(&BigUint::from(1u32));
        assert!((s.progress - 100.0 / 3.0).abs() < 1e-9);

        let huge = BigUint::from(10u32).pow(400);
        let table = TitleTable::new(vec![TitleTier {
            threshold: huge.clone() * 2u32,
            name: "Infinifarmer".to_string(),
        }])
        .unwrap();
        let s = table.title_for(&huge);
        assert!((0.0..=100.0).contains(&s.progress));
    }

    #[test]
    fn test_on_threshold_starts_the_tier() {
        let s = two_tiers().title_for(&BigUint::from(1000u32));
        assert_eq!(s.current, "Farmer");
        assert_eq!(s.progress, 0.0);
    }

    #[test]
    fn test_beyond_last_tier() {
        let s = two_tiers().title_for(&BigUint::from(20_000u32));
        assert_eq!(s.current, "Farmer II");
        assert_eq!(s.next, "Farmer II+");
        assert_eq!(s.progress, 100.0);
    }

    #[test]
    fn test_table_validation() {
        assert_eq!(TitleTable::new(vec![]).unwrap_err(), TitleTableError::Empty);
        assert_eq!(
            TitleTable::from_pairs(&[(10, "A"), (10, "B")]).unwrap_err(),
            TitleTableError::NotIncreasing("B".to_string())
        );
        assert!(matches!(
            TitleTable::from_json(r#"[{"threshold":"x","name":"A"}]"#),
            Err(TitleTableError::InvalidThreshold { .. })
        ));
        let t = TitleTable::from_json(r#"[{"threshold":"100","name":"A"},{"threshold":"1000","name":"B"}]"#)
            .unwrap();
        assert_eq!(t.tiers().len(), 2);
    }

    #[test]
    fn test_default_table() {
        let t = TitleTable::default();
        assert_eq!(t.tiers().len(), 54);
        assert_eq!(t.tiers()[0].name, "Farmer I");
        assert_eq!(t.tiers()[3].name, "Kilofarmer I");
        assert_eq!(t.tiers()[3].threshold, BigUint::from(1000u32));
        assert!(TitleTable::new(t.tiers().to_vec()).is_ok());

        let s = t.title_for(&BigUint::from(2_000_000u32));
        assert_eq!(s.current, "Megafarmer I");
        assert_eq!(s.next, "Megafarmer II");
    }

    #[test]
    fn test_earnings_bonus() {
        assert_eq!(earnings_bonus(&BigUint::from(10u32), 0), BigUint::from(1500u32));
        // floor(150 * 1.1) = 165
        assert_eq!(earnings_bonus(&BigUint::from(2u32), 1), BigUint::from(330u32));
        // floor(150 * 1.21) = 181
        assert_eq!(earnings_bonus(&BigUint::from(1u32), 2), BigUint::from(181u32));
    }

    #[test]
    fn test_projection_needs_two_snapshots() {
        let t = two_tiers();
        let now = Utc::now();
        let one = vec![test_snapshot("alice", "1", 0, now - Duration::hours(1))];
        let p = t.projected_change_date(
            &SuffixTable::default(),
            &one,
            &BigUint::from(150u32),
            now,
            Duration::days(DEFAULT_LOOKBACK_DAYS),
        );
        assert_eq!(p, Projection::Unavailable(NoProjection::InsufficientHistory));
        assert_eq!(p.or_sentinel(), no_projection_sentinel());
        assert_eq!(no_projection_sentinel().to_rfc3339(), "9999-12-31T23:59:59+00:00");
    }

    #[test]
    fn test_projection_from_growth() {
        let t = two_tiers();
        let now = Utc::now();
        // eb 150 -> 300 over 10 hours: 15 per hour.
        let history = vec![
            test_snapshot("alice", "1", 0, now - Duration::hours(10)),
            test_snapshot("alice", "2", 0, now),
        ];
        let p = t.projected_change_date(
            &SuffixTable::default(),
            &history,
            &BigUint::from(300u32),
            now,
            Duration::days(30),
        );
        // 700 needed at 15/h
        let expected = now + Duration::milliseconds((700.0 / 15.0 * 3_600_000.0_f64).ceil() as i64);
        assert_eq!(p, Projection::At(expected));
    }

    #[test]
    fn test_projection_not_growing() {
        let t = two_tiers();
        let now = Utc::now();
        let history = vec![
            test_snapshot("alice", "2", 0, now - Duration::hours(10)),
            test_snapshot("alice", "2", 0, now),
        ];
        let p = t.projected_change_date(
            &SuffixTable::default(),
            &history,
            &BigUint::from(300u32),
            now,
            Duration::days(30),
        );
        assert_eq!(p, Projection::Unavailable(NoProjection::NotGrowing));
    }

    #[test]
    fn test_projection_beyond_last_tier() {
        let p = two_tiers().projected_change_date(
            &SuffixTable::default(),
            &[],
            &BigUint::from(50_000u32),
            Utc::now(),
            Duration::days(30),
        );
        assert_eq!(p, Projection::Unavailable(NoProjection::BeyondLastTier));
    }

    #[test]
    fn test_evaluate() {
        let now = Utc::now();
        let latest = test_snapshot("alice", "4", 0, now);
        let history = vec![test_snapshot("alice", "2", 0, now - Duration::hours(10)), latest.clone()];
        let report = evaluate(
            &SuffixTable::default(),
            &two_tiers(),
            &latest,
            &history,
            now,
            Duration::days(30),
        )
        .unwrap();
        assert_eq!(report.earnings_bonus, "600");
        assert_eq!(report.earnings_bonus_display, "600");
        assert_eq!(report.standing.current, "None");
        assert_eq!(report.standing.progress, 60.0);
        assert!(matches!(report.projection, Projection::At(_)));
        assert!(report.projected_change > now);
    }

    #[test]
    fn test_evaluate_unreadable_soul_eggs() {
        let now = Utc::now();
        let latest = test_snapshot("bob", "???", 0, now);
        let report = evaluate(
            &SuffixTable::default(),
            &two_tiers(),
            &latest,
            &[],
            now,
            Duration::days(30),
        )
        .unwrap();
        assert_eq!(report.earnings_bonus, "0");
        assert_eq!(report.projected_change, no_projection_sentinel());
    }
}
