// Progress between two goal posts, as shown on progress bars.

use serde::Serialize;

use crate::bignum::{ParseFailure, SuffixTable};

/// Where `current` sits relative to the goal posts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    /// Normal range: fraction of the way from `previous` to `target`, 0..=1.
    Between { fraction: f64 },
    /// `target <= previous`: there is no range to walk, only "reached or not".
    ///
    /// This covers both the edge of a ranking window (no better player) and
    /// inconsistent data; the two are not told apart.
    Degenerate { reached: bool },
}

impl Progress {
    /// Percentage in `[0, 100]`.
    pub fn percent(self) -> f64 {
        match self {
            Progress::Between { fraction } => fraction * 100.0,
            Progress::Degenerate { reached: true } => 100.0,
            Progress::Degenerate { reached: false } => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgressError {
    #[error("unreadable {field}: {source}")]
    Parse {
        field: &'static str,
        source: ParseFailure,
    },
    #[error("progress is not a finite number")]
    NonFinite,
}

/// Progress over already-parsed values.
pub fn progress_between(current: f64, target: f64, previous: f64) -> Result<Progress, ProgressError> {
    if target <= previous {
        return Ok(Progress::Degenerate {
            reached: current >= target,
        });
    }
    let fraction = (current - previous) / (target - previous);
    if !fraction.is_finite() {
        return Err(ProgressError::NonFinite);
    }
    Ok(Progress::Between {
        fraction: fraction.clamp(0.0, 1.0),
    })
}

/// Progress over big-number strings.
pub fn try_percentage(
    table: &SuffixTable,
    current: &str,
    target: &str,
    previous: &str,
) -> Result<Progress, ProgressError> {
    let read = |field: &'static str, text: &str| {
        table
            .try_parse(text)
            .map_err(|source| ProgressError::Parse { field, source })
    };
    let current = read("current", current)?;
    let target = read("target", target)?;
    let previous = read("previous", previous)?;
    progress_between(current, target, previous)
}

/// Percentage in `[0, 100]`; any failure reads as 0.
pub fn percentage(table: &SuffixTable, current: &str, target: &str, previous: &str) -> f64 {
    match try_percentage(table, current, target, previous) {
        Ok(progress) => progress.percent(),
        Err(e) => {
            if matches!(e, ProgressError::Parse { .. }) {
                crate::metrics::PARSE_FAILURES_TOTAL.inc();
            }
            tracing::warn!(current, target, previous, "Progress calculation failed: {e}");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pct(current: &str, target: &str, previous: &str) -> f64 {
        percentage(&SuffixTable::default(), current, target, previous)
    }

    #[test]
    fn test_midway() {
        assert_eq!(pct("75", "100", "50"), 50.0);
    }

    #[test]
    fn test_below_previous_clamps_to_zero() {
        assert_eq!(pct("40", "100", "50"), 0.0);
    }

    #[test]
    fn test_above_target_clamps_to_hundred() {
        assert_eq!(pct("150", "100", "50"), 100.0);
    }

    #[test]
    fn test_degenerate_range() {
        // target <= previous: reached
        assert_eq!(pct("100", "50", "80"), 100.0);
        // target <= previous: not reached
        assert_eq!(pct("10", "50", "80"), 0.0);
        // equal goal posts
        assert_eq!(pct("50", "50", "50"), 100.0);
    }

    #[test]
    fn test_suffixed_inputs() {
        assert_eq!(pct("1.5M", "2M", "1M"), 50.0);
        assert_eq!(pct("25%", "50%", "0%"), 50.0);
    }

    #[test]
    fn test_parse_failure_reads_as_zero() {
        assert_eq!(pct("abc", "100", "50"), 0.0);
        let err = try_percentage(&SuffixTable::default(), "75", "1.2.3K", "50").unwrap_err();
        assert!(matches!(err, ProgressError::Parse { field: "target", .. }));
    }

    #[test]
    fn test_typed_results() {
        assert_eq!(
            progress_between(75.0, 100.0, 50.0),
            Ok(Progress::Between { fraction: 0.5 })
        );
        assert_eq!(
            progress_between(100.0, 50.0, 80.0),
            Ok(Progress::Degenerate { reached: true })
        );
        assert_eq!(
            progress_between(f64::MAX, f64::MAX, f64::MIN),
            Err(ProgressError::NonFinite)
        );
    }
}
