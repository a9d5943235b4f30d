// Application configuration, loaded from environment variables and CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bignum::SuffixTable;
use crate::error::TrackerError;
use crate::title::{TitleTable, DEFAULT_LOOKBACK_DAYS};

/// Longest configurable projection window.
pub const MAX_LOOKBACK_DAYS: u64 = 3650;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Base URL of the snapshot source. Polling is off when unset.
    pub source_url: Option<String>,
    /// Whether the background poller runs at all.
    pub polling_enabled: bool,
    pub poll_interval: Duration,
    /// Attempts for the first fetch before falling back to the interval.
    pub poll_initial_attempts: u32,
    pub http_timeout: Duration,
    /// Window for growth-rate projections.
    pub lookback_days: i64,
    /// JSON title table replacing the built-in one.
    pub titles_path: Option<PathBuf>,
    /// JSON suffix table replacing the built-in one.
    pub suffixes_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:eggtracker.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `SOURCE_URL` - snapshot source base URL
    /// - `POLL_INTERVAL_SECS` - seconds between poll cycles (default: 300)
    /// - `POLL_INITIAL_ATTEMPTS` - tries for the first fetch (default: 4)
    /// - `HTTP_TIMEOUT_SECS` - snapshot source request timeout (default: 30)
    /// - `LOOKBACK_DAYS` - projection window, 1 to 3650 (default: 30)
    /// - `TITLES_PATH` - title table JSON file
    /// - `SUFFIXES_PATH` - suffix table JSON file
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    /// - `--no-poll` - Serve stored data only
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build from explicit arguments and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let database_url =
            env("DATABASE_URL").unwrap_or_else(|| "sqlite:eggtracker.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let source_url = env("SOURCE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let polling_enabled = !args.iter().any(|a| a == "--no-poll");

        let number = |key: &str, default: u64| {
            env(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        Config {
            database_url,
            port,
            source_url,
            polling_enabled,
            poll_interval: Duration::from_secs(number("POLL_INTERVAL_SECS", 300).max(1)),
            poll_initial_attempts: number("POLL_INITIAL_ATTEMPTS", 4).clamp(1, 10) as u32,
            http_timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS", 30).max(1)),
            lookback_days: number("LOOKBACK_DAYS", DEFAULT_LOOKBACK_DAYS as u64)
                .clamp(1, MAX_LOOKBACK_DAYS) as i64,
            titles_path: env("TITLES_PATH").map(PathBuf::from),
            suffixes_path: env("SUFFIXES_PATH").map(PathBuf::from),
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days)
    }

    /// Build the lookup tables, from files when configured.
    pub fn load_tables(&self) -> Result<Tables, TrackerError> {
        let suffixes = match &self.suffixes_path {
            Some(path) => SuffixTable::from_json(&read(path)?)?,
            None => SuffixTable::default(),
        };
        let titles = match &self.titles_path {
            Some(path) => TitleTable::from_json(&read(path)?)?,
            None => TitleTable::default(),
        };
        Ok(Tables { suffixes, titles })
    }
}

/// Lookup tables built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub suffixes: SuffixTable,
    pub titles: TitleTable,
}

fn read(path: &Path) -> Result<String, TrackerError> {
    std::fs::read_to_string(path).map_err(|source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    })
}
