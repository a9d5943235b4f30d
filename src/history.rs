// Growth over a lookback window of stored snapshots.

use chrono::{DateTime, Duration, Utc};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::Serialize;

use crate::bignum::SuffixTable;
use crate::db::PlayerSnapshot;
use crate::title::snapshot_earnings_bonus;

/// Earliest and latest snapshot inside a lookback window.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub earliest: &'a PlayerSnapshot,
    pub latest: &'a PlayerSnapshot,
}

impl Window<'_> {
    pub fn hours(&self) -> f64 {
        (self.latest.updated - self.earliest.updated).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// Start of the lookback window ending at `now`. Saturates at the earliest
/// representable time instead of overflowing.
pub fn window_start(now: DateTime<Utc>, lookback: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The window over `[now - lookback, now]`, or `None` unless it holds two
/// snapshots with distinct timestamps. `history` need not be sorted.
pub fn window(history: &[PlayerSnapshot], now: DateTime<Utc>, lookback: Duration) -> Option<Window<'_>> {
    let from = window_start(now, lookback);
    let in_range = || history.iter().filter(|s| s.updated >= from && s.updated <= now);

    let earliest = in_range().min_by_key(|s| s.updated)?;
    let latest = in_range().max_by_key(|s| s.updated)?;
    if earliest.updated == latest.updated {
        return None;
    }
    Some(Window { earliest, latest })
}

/// Earnings bonus gained per hour across the window. `None` when the window
/// is too short or either end has unreadable soul eggs.
pub fn earnings_bonus_per_hour(
    suffixes: &SuffixTable,
    history: &[PlayerSnapshot],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Option<f64> {
    let w = window(history, now, lookback)?;
    let first = snapshot_earnings_bonus(suffixes, w.earliest)?;
    let last = snapshot_earnings_bonus(suffixes, w.latest)?;
    let gained = (BigInt::from(last) - BigInt::from(first)).to_f64()?;
    Some(gained / w.hours())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryGrowth {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub hours: f64,
    pub earnings_bonus_per_hour: f64,
    pub soul_eggs_per_day: f64,
    pub prophecy_eggs_gained: i64,
    pub prestiges_gained: i64,
}

/// Growth summary for a player's dashboard.
pub fn growth(
    suffixes: &SuffixTable,
    history: &[PlayerSnapshot],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Option<HistoryGrowth> {
    let w = window(history, now, lookback)?;
    let hours = w.hours();

    let soul_eggs = |s: &PlayerSnapshot| {
        suffixes
            .parse_integer(&s.soul_eggs_full)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0)
    };
    let soul_eggs_per_day = (soul_eggs(w.latest) - soul_eggs(w.earliest)) / hours * 24.0;

    Some(HistoryGrowth {
        from: w.earliest.updated,
        to: w.latest.updated,
        hours,
        earnings_bonus_per_hour: earnings_bonus_per_hour(suffixes, history, now, lookback)
            .unwrap_or(0.0),
        soul_eggs_per_day,
        prophecy_eggs_gained: w.latest.prophecy_eggs - w.earliest.prophecy_eggs,
        prestiges_gained: w.latest.prestiges - w.earliest.prestiges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_snapshot;

    #[test]
    fn test_window_picks_extremes_inside_lookback() {
        let now = Utc::now();
        let history = vec![
            test_snapshot("alice", "5", 0, now - Duration::days(40)),
            test_snapshot("alice", "6", 0, now - Duration::days(20)),
            test_snapshot("alice", "8", 0, now - Duration::days(1)),
            test_snapshot("alice", "7", 0, now - Duration::days(10)),
        ];
        let w = window(&history, now, Duration::days(30)).unwrap();
        assert_eq!(w.earliest.soul_eggs_full, "6");
        assert_eq!(w.latest.soul_eggs_full, "8");
        assert_eq!(w.hours(), 19.0 * 24.0);
    }

    #[test]
    fn test_window_needs_distinct_timestamps() {
        let now = Utc::now();
        assert!(window(&[], now, Duration::days(30)).is_none());
        let same = vec![
            test_snapshot("alice", "1", 0, now),
            test_snapshot("alice", "2", 0, now),
        ];
        assert!(window(&same, now, Duration::days(30)).is_none());
    }

    #[test]
    fn test_window_start_saturates() {
        let now = Utc::now();
        assert_eq!(window_start(now, Duration::hours(1)), now - Duration::hours(1));
        assert_eq!(window_start(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);

        let history = vec![
            test_snapshot("alice", "1", 0, now - Duration::days(4000)),
            test_snapshot("alice", "2", 0, now),
        ];
        let w = window(&history, now, Duration::MAX).unwrap();
        assert_eq!(w.earliest.soul_eggs_full, "1");
    }

    #[test]
    fn test_earnings_bonus_rate() {
        let now = Utc::now();
        let history = vec![
            test_snapshot("alice", "1", 0, now - Duration::hours(2)),
            test_snapshot("alice", "3", 0, now),
        ];
        // (450 - 150) / 2h
        let rate = earnings_bonus_per_hour(&SuffixTable::default(), &history, now, Duration::days(30));
        assert_eq!(rate, Some(150.0));
    }

    #[test]
    fn test_growth_summary() {
        let now = Utc::now();
        let mut first = test_snapshot("alice", "1000", 2, now - Duration::hours(48));
        first.prestiges = 10;
        let mut last = test_snapshot("alice", "3000", 3, now);
        last.prestiges = 13;

        let g = growth(&SuffixTable::default(), &[first, last], now, Duration::days(30)).unwrap();
        assert_eq!(g.hours, 48.0);
        assert_eq!(g.soul_eggs_per_day, 1000.0);
        assert_eq!(g.prestiges_gained, 3);
        assert_eq!(g.prophecy_eggs_gained, 1);
        assert!(g.earnings_bonus_per_hour > 0.0);
    }
}
