// Crate-level error type.
//
// Calculation failures that only affect a display value never get here; they
// degrade in place (see `bignum::SuffixTable::parse`, `progress::percentage`).

use std::path::PathBuf;

use crate::bignum::{FormatError, SuffixTableError};
use crate::ranking::RankingError;
use crate::title::TitleTableError;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("snapshot source error: {0}")]
    Source(#[from] reqwest::Error),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Ranking(#[from] RankingError),
    #[error(transparent)]
    SuffixTable(#[from] SuffixTableError),
    #[error(transparent)]
    TitleTable(#[from] TitleTableError),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
