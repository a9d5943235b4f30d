// Prometheus metrics definitions for the tracker backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// 1 while a poll cycle is running.
    pub static ref POLL_IN_FLIGHT: IntGauge =
        IntGauge::new("eggtracker_poll_in_flight", "Poll cycle currently running").unwrap();

    /// Players seen in the last completed poll cycle.
    pub static ref TRACKED_PLAYERS: IntGauge =
        IntGauge::new("eggtracker_tracked_players", "Players in the last poll cycle").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Poll cycles, by outcome (ok, failed, skipped).
    pub static ref POLL_CYCLES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("eggtracker_poll_cycles_total", "Poll cycles by outcome"),
        &["outcome"],
    )
    .unwrap();

    /// Player snapshots written.
    pub static ref SNAPSHOTS_STORED_TOTAL: IntCounter = IntCounter::new(
        "eggtracker_snapshots_stored_total",
        "Player snapshots written",
    )
    .unwrap();

    /// Ranking rows written, by metric.
    pub static ref RANKING_ENTRIES_STORED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("eggtracker_ranking_entries_stored_total", "Ranking rows written"),
        &["metric"],
    )
    .unwrap();

    /// Big-number strings that could not be read and were shown as 0.
    pub static ref PARSE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "eggtracker_parse_failures_total",
        "Unreadable big-number strings",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("eggtracker_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Poll cycle duration in seconds.
    pub static ref POLL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("eggtracker_poll_duration_seconds", "Poll cycle duration in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "eggtracker_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(POLL_IN_FLIGHT.clone()),
        Box::new(TRACKED_PLAYERS.clone()),
        Box::new(POLL_CYCLES_TOTAL.clone()),
        Box::new(SNAPSHOTS_STORED_TOTAL.clone()),
        Box::new(RANKING_ENTRIES_STORED_TOTAL.clone()),
        Box::new(PARSE_FAILURES_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(POLL_DURATION_SECONDS.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            // Tests register more than once.
            tracing::debug!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Label for any path the router does not serve.
pub const UNMATCHED_ENDPOINT: &str = "other";

/// Route shapes served by the API, as produced by `normalize_path`.
const KNOWN_ENDPOINTS: &[&str] = &[
    "/health",
    "/metrics",
    "/api/players",
    "/api/players/:name",
    "/api/players/:name/history",
    "/api/players/:name/title",
    "/api/players/:name/growth",
    "/api/players/:name/goals/:metric",
    "/api/rankings/:metric",
    "/api/rankings/:metric/deltas",
    "/api/parse",
    "/api/format",
    "/api/poll",
];

/// Normalize a URL path for metric labels: player names and metric names in
/// path position become placeholders, and anything that is not a served
/// route collapses to `UNMATCHED_ENDPOINT`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let normalized = segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let parent = if i > 0 { segments[i - 1] } else { "" };
            match parent {
                "players" => ":name",
                "goals" | "rankings" => ":metric",
                _ => *segment,
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    if KNOWN_ENDPOINTS.contains(&normalized.as_str()) {
        normalized
    } else {
        UNMATCHED_ENDPOINT.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_plain() {
        assert_eq!(normalize_path("/api/players"), "/api/players");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_names() {
        assert_eq!(normalize_path("/api/players/alice"), "/api/players/:name");
        assert_eq!(
            normalize_path("/api/players/alice/goals/soul_eggs"),
            "/api/players/:name/goals/:metric"
        );
        assert_eq!(
            normalize_path("/api/rankings/mer/deltas"),
            "/api/rankings/:metric/deltas"
        );
    }

    #[test]
    fn test_normalize_path_unknown_routes() {
        assert_eq!(normalize_path("/wp-login.php"), UNMATCHED_ENDPOINT);
        assert_eq!(normalize_path("/api/players/alice/bogus"), UNMATCHED_ENDPOINT);
        assert_eq!(normalize_path("/api/rankings/mer/deltas/x"), UNMATCHED_ENDPOINT);
        assert_eq!(normalize_path("/"), UNMATCHED_ENDPOINT);
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("eggtracker_"));
    }

    #[test]
    fn test_metric_increments() {
        POLL_IN_FLIGHT.set(1);
        assert_eq!(POLL_IN_FLIGHT.get(), 1);
        POLL_IN_FLIGHT.set(0);

        POLL_CYCLES_TOTAL.with_label_values(&["ok"]).inc();
        RANKING_ENTRIES_STORED_TOTAL.with_label_values(&["mer"]).inc_by(3);
        SNAPSHOTS_STORED_TOTAL.inc();
        PARSE_FAILURES_TOTAL.inc();
        POLL_DURATION_SECONDS.observe(1.5);
        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/players/:name"])
            .observe(0.05);
        API_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/players", "200"])
            .inc();
    }
}
