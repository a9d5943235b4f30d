use std::sync::Arc;

use tower_http::cors::CorsLayer;

use eggtracker_backend::api::{self, AppState};
use eggtracker_backend::config::Config;
use eggtracker_backend::db::Database;
use eggtracker_backend::metrics;
use eggtracker_backend::poller::{self, HttpSnapshotSource, PollTrigger, Poller};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    metrics::register_metrics();

    let tables = Arc::new(config.load_tables().expect("Failed to load lookup tables"));
    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let trigger: Option<Arc<dyn PollTrigger>> = match (&config.source_url, config.polling_enabled) {
        (Some(url), true) => {
            let source = HttpSnapshotSource::new(url, config.http_timeout)
                .expect("Failed to build snapshot source client");
            let poller = Poller::new(db.clone(), tables.clone(), source, config.lookback());

            // Spawn background poller: initial load, then one cycle per interval
            poller::spawn_poller(
                poller.clone(),
                config.poll_interval,
                config.poll_initial_attempts,
            );
            tracing::info!(
                source = %url,
                interval = ?config.poll_interval,
                "Polling snapshot source"
            );
            let trigger: Arc<dyn PollTrigger> = Arc::new(poller);
            Some(trigger)
        }
        (None, true) => {
            tracing::warn!("SOURCE_URL not set, serving stored data only");
            None
        }
        (_, false) => {
            tracing::info!("Polling disabled, serving stored data only");
            None
        }
    };

    let state = AppState {
        db,
        tables,
        lookback: config.lookback(),
        poller: trigger,
    };
    let app = api::router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Egg tracker backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
