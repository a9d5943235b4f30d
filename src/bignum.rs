// Big-number notation used by the game: "12.345K", "1.2Qd", "50.000s".
//
// Parsing is best-effort (display values), formatting is exact over BigUint.

use num_bigint::BigUint;
use num_traits::{CheckedDiv, FromPrimitive, Num, ToPrimitive};
use serde::Deserialize;

use crate::metrics;

/// Fraction digits rendered by `format` unless truncated.
const FRACTION_DIGITS: u32 = 3;

/// Suffixes as the game prints them, with their power of ten.
pub const DEFAULT_SUFFIXES: &[(&str, u32)] = &[
    ("K", 3),
    ("M", 6),
    ("B", 9),
    ("T", 12),
    ("q", 15),
    ("Q", 18),
    ("s", 21),
    ("S", 24),
    ("o", 27),
    ("N", 30),
    ("d", 33),
    ("U", 36),
    ("D", 39),
    ("Td", 42),
    ("qd", 45),
    ("Qd", 48),
    ("sd", 51),
    ("Sd", 54),
    ("Od", 57),
    ("Nd", 60),
    ("V", 63),
    ("uV", 66),
    ("dV", 69),
    ("tV", 72),
    ("qV", 75),
    ("QV", 78),
    ("sV", 81),
    ("SV", 84),
    ("OV", 87),
    ("NV", 90),
];

/// Why a big-number string could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("empty input")]
    Empty,
    #[error("no known suffix in '{0}'")]
    UnknownSuffix(String),
    #[error("malformed mantissa '{0}'")]
    MalformedMantissa(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("suffix '{0}' has a zero divisor")]
    DivideByZero(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SuffixTableError {
    #[error("suffix table is empty")]
    Empty,
    #[error("suffix symbol must not be empty")]
    EmptySymbol,
    #[error("duplicate suffix '{0}'")]
    Duplicate(String),
    #[error("invalid divisor '{divisor}' for suffix '{symbol}'")]
    InvalidDivisor { symbol: String, divisor: String },
    #[error("invalid suffix table JSON: {0}")]
    Json(String),
}

/// One entry of a suffix table file: `{ "symbol": "K", "divisor": "1000" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct SuffixSpec {
    pub symbol: String,
    pub divisor: String,
}

#[derive(Debug, Clone)]
struct Suffix {
    symbol: String,
    divisor: BigUint,
    scale: f64,
}

/// Immutable suffix table, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct SuffixTable {
    /// Ascending by divisor, for formatting.
    by_divisor: Vec<Suffix>,
    /// Indices into `by_divisor`, longest symbol first, for parsing.
    match_order: Vec<usize>,
}

impl SuffixTable {
    /// Build a table from (symbol, divisor) pairs.
    pub fn new(entries: Vec<(String, BigUint)>) -> Result<Self, SuffixTableError> {
        if entries.is_empty() {
            return Err(SuffixTableError::Empty);
        }

        let mut by_divisor = Vec::with_capacity(entries.len());
        for (symbol, divisor) in entries {
            if symbol.is_empty() {
                return Err(SuffixTableError::EmptySymbol);
            }
            if by_divisor.iter().any(|s: &Suffix| s.symbol == symbol) {
                return Err(SuffixTableError::Duplicate(symbol));
            }
            let scale = divisor.to_f64().unwrap_or(f64::MAX).min(f64::MAX);
            by_divisor.push(Suffix {
                symbol,
                divisor,
                scale,
            });
        }
        by_divisor.sort_by(|a, b| a.divisor.cmp(&b.divisor));

        let mut match_order: Vec<usize> = (0..by_divisor.len()).collect();
        // Stable: equal-length symbols keep divisor order.
        match_order.sort_by(|&a, &b| by_divisor[b].symbol.len().cmp(&by_divisor[a].symbol.len()));

        Ok(Self {
            by_divisor,
            match_order,
        })
    }

    /// Build a table from (symbol, power of ten) pairs.
    pub fn from_exponents(entries: &[(&str, u32)]) -> Result<Self, SuffixTableError> {
        let ten = BigUint::from(10u32);
        Self::new(
            entries
                .iter()
                .map(|(symbol, exp)| (symbol.to_string(), ten.pow(*exp)))
                .collect(),
        )
    }

    /// Build a table from the JSON file format (`[SuffixSpec, ...]`).
    pub fn from_json(json: &str) -> Result<Self, SuffixTableError> {
        let specs: Vec<SuffixSpec> =
            serde_json::from_str(json).map_err(|e| SuffixTableError::Json(e.to_string()))?;
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            let divisor = BigUint::from_str_radix(spec.divisor.trim(), 10).map_err(|_| {
                SuffixTableError::InvalidDivisor {
                    symbol: spec.symbol.clone(),
                    divisor: spec.divisor.clone(),
                }
            })?;
            entries.push((spec.symbol, divisor));
        }
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.by_divisor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_divisor.is_empty()
    }

    /// Symbols in the order `try_parse` tests them.
    pub fn match_order(&self) -> impl Iterator<Item = &str> {
        self.match_order
            .iter()
            .map(move |&i| self.by_divisor[i].symbol.as_str())
    }

    /// Read a big-number string.
    ///
    /// Accepts plain decimals, scientific notation, or a decimal mantissa
    /// followed by a suffix from this table. One trailing `%` is ignored.
    /// Results that overflow `f64` clamp to `f64::MAX` / `f64::MIN`.
    pub fn try_parse(&self, text: &str) -> Result<f64, ParseFailure> {
        let trimmed = text.trim();
        let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
        if trimmed.is_empty() {
            return Err(ParseFailure::Empty);
        }

        if let Some(value) = plain_number(trimmed) {
            return Ok(clamp_finite(value));
        }

        for &i in &self.match_order {
            let suffix = &self.by_divisor[i];
            if let Some(mantissa) = trimmed.strip_suffix(suffix.symbol.as_str()) {
                let mantissa = mantissa.trim_end();
                return match plain_number(mantissa) {
                    Some(m) => Ok(clamp_finite(m * suffix.scale)),
                    None => Err(ParseFailure::MalformedMantissa(mantissa.to_string())),
                };
            }
        }

        Err(ParseFailure::UnknownSuffix(trimmed.to_string()))
    }

    /// Like `try_parse`, but unreadable input reads as 0.
    pub fn parse(&self, text: &str) -> f64 {
        match self.try_parse(text) {
            Ok(value) => value,
            Err(e) => {
                metrics::PARSE_FAILURES_TOTAL.inc();
                tracing::warn!(input = text, "Big number parse failed: {e}");
                0.0
            }
        }
    }

    /// Read a full-precision integer. Digit strings are exact; anything else
    /// goes through `try_parse` and is floored. Negative values are rejected.
    pub fn parse_integer(&self, text: &str) -> Option<BigUint> {
        let trimmed = text.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return BigUint::from_str_radix(trimmed, 10).ok();
        }
        let value = self.try_parse(trimmed).ok()?;
        if value < 0.0 {
            return None;
        }
        BigUint::from_f64(value.floor())
    }

    /// Render `value` in suffix notation.
    ///
    /// Uses the largest suffix not above `value`, so the mantissa stays below
    /// 1000 while the table covers the value. Three fraction digits are
    /// shown, truncated; `truncate_fractions` drops them, and
    /// `truncate_zero_fractions` drops trailing zeros.
    pub fn format(
        &self,
        value: &BigUint,
        truncate_fractions: bool,
        truncate_zero_fractions: bool,
    ) -> Result<String, FormatError> {
        let thousand = BigUint::from(1000u32);
        let chosen = if *value < thousand {
            None
        } else {
            self.by_divisor.iter().rev().find(|s| s.divisor <= *value)
        };

        let (scaled, symbol) = match chosen {
            Some(suffix) => {
                let scaled = (value * &thousand)
                    .checked_div(&suffix.divisor)
                    .ok_or_else(|| FormatError::DivideByZero(suffix.symbol.clone()))?;
                (scaled, suffix.symbol.as_str())
            }
            None => (value * &thousand, ""),
        };

        let whole = &scaled / &thousand;
        if truncate_fractions {
            return Ok(format!("{whole}{symbol}"));
        }

        let fraction = (&scaled % &thousand).to_u32().unwrap_or(0);
        let mut digits = format!("{fraction:0width$}", width = FRACTION_DIGITS as usize);
        if truncate_zero_fractions {
            while digits.ends_with('0') {
                digits.pop();
            }
        }

        if digits.is_empty() {
            Ok(format!("{whole}{symbol}"))
        } else {
            Ok(format!("{whole}.{digits}{symbol}"))
        }
    }
}

impl Default for SuffixTable {
    fn default() -> Self {
        // The built-in table has unique, non-empty symbols.
        Self::from_exponents(DEFAULT_SUFFIXES).expect("default suffix table is valid")
    }
}

/// Parse a plain decimal or scientific-notation number. Rejects the
/// `inf`/`nan` spellings that `f64::from_str` would otherwise accept.
fn plain_number(text: &str) -> Option<f64> {
    let first = text.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '.' | '-' | '+')) {
        return None;
    }
    if !text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return None;
    }
    text.parse::<f64>().ok()
}

fn clamp_finite(value: f64) -> f64 {
    if value == f64::INFINITY {
        f64::MAX
    } else if value == f64::NEG_INFINITY {
        f64::MIN
    } else {
        value
    }
}
