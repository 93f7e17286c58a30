// ===============================
// src/main.rs
// ===============================
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::info;

use spread_sentry::config::{self, FeedMode};
use spread_sentry::domain::Event;
use spread_sentry::engine::BotEngine;
use spread_sentry::venue::MexcClient;
use spread_sentry::{metrics, recorder};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let (args, strategy_cfg) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    let feed_mode_str = match args.feed_mode {
        FeedMode::Mock => "mock",
        FeedMode::Live => "live",
    };
    info!(
        feed_mode = %feed_mode_str,
        symbol = %args.symbol,
        binance_ws = %args.binance_ws_url,
        mexc_ws = %args.mexc_ws_url,
        mexc_rest = %args.mexc_rest_url,
        min_ticks = strategy_cfg.min_tick_difference,
        size_usd = strategy_cfg.position_size_usd,
        "startup config"
    );

    // ---- Recorder (optional) ----
    let rec_tx = args.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- Venue collaborator ----
    let venue = Arc::new(MexcClient::new(
        args.mexc_rest_url.clone(),
        args.mexc_api_key.clone(),
        args.mexc_api_secret.clone(),
    ));

    // ---- Engine ----
    let (engine, handle) = BotEngine::new(args, strategy_cfg, venue, rec_tx);
    tokio::spawn(engine.run());

    handle.start(None).await;

    // ---- Heartbeat ----
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        if let Some(st) = handle.status().await {
            let ticks = st.spread.as_ref().map(|s| s.spread.tick_difference);
            info!(
                running = st.running,
                feed_a = st.feed_a_connected,
                feed_b = st.feed_b_connected,
                position = st.position.is_some(),
                spread_ticks = ?ticks,
                "heartbeat"
            );
        } else {
            info!("engine gone, exiting");
            break;
        }
    }
}
