// ===============================
// src/engine.rs (bot runtime & lifecycle)
// ===============================
//
// One task owns all decision state and consumes feed events and control
// commands over channels. Feed adapters are detached by dropping their
// event receiver before their sockets are torn down, so no strategy
// evaluation can run against a connection that is mid-shutdown.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::book::LiquidityBook;
use crate::config::{Args, FeedMode, StrategyConfig, StrategyConfigPatch};
use crate::domain::{Event, FeedEvent, Position, SpreadSnapshot};
use crate::executor::Executor;
use crate::feed;
use crate::metrics::{FEED_CONNECTED, ORDERS, SIGNALS, SPREAD_UPDATES, STRATEGY_DISABLED};
use crate::spread::SpreadEngine;
use crate::state::RuntimeState;
use crate::strategy::{self, Decision};
use crate::venue::VenueApi;

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub running: bool,
    pub disabled: bool,
    pub feed_a_connected: bool,
    pub feed_b_connected: bool,
    pub position: Option<Position>,
    pub spread: Option<SpreadSnapshot>,
    pub last_close_ms: Option<i64>,
}

pub enum EngineCmd {
    Start { symbol: Option<String>, resp: oneshot::Sender<bool> },
    Stop { resp: oneshot::Sender<bool> },
    Restart { symbol: Option<String>, resp: oneshot::Sender<bool> },
    Status { resp: oneshot::Sender<Status> },
    CurrentSpread { resp: oneshot::Sender<Option<SpreadSnapshot>> },
    GetConfig { resp: oneshot::Sender<StrategyConfig> },
    UpdateConfig { patch: StrategyConfigPatch, resp: oneshot::Sender<StrategyConfig> },
}

/// Cloneable control handle for the engine task; the HTTP layer out of
/// scope here calls through this.
#[derive(Clone)]
pub struct BotHandle {
    cmd_tx: mpsc::Sender<EngineCmd>,
}

impl BotHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCmd) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(build(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Returns true if this call transitioned the bot to running.
    pub async fn start(&self, symbol: Option<String>) -> bool {
        self.request(|resp| EngineCmd::Start { symbol, resp }).await.unwrap_or(false)
    }

    /// Returns true if this call transitioned the bot to stopped.
    pub async fn stop(&self) -> bool {
        self.request(|resp| EngineCmd::Stop { resp }).await.unwrap_or(false)
    }

    pub async fn restart(&self, symbol: Option<String>) -> bool {
        self.request(|resp| EngineCmd::Restart { symbol, resp }).await.unwrap_or(false)
    }

    pub async fn status(&self) -> Option<Status> {
        self.request(|resp| EngineCmd::Status { resp }).await
    }

    pub async fn current_spread(&self) -> Option<SpreadSnapshot> {
        self.request(|resp| EngineCmd::CurrentSpread { resp }).await.flatten()
    }

    pub async fn config(&self) -> Option<StrategyConfig> {
        self.request(|resp| EngineCmd::GetConfig { resp }).await
    }

    pub async fn update_config(&self, patch: StrategyConfigPatch) -> Option<StrategyConfig> {
        self.request(|resp| EngineCmd::UpdateConfig { patch, resp }).await
    }
}

struct FeedSet {
    rx: mpsc::Receiver<FeedEvent>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct BotEngine {
    args: Args,
    cfg: StrategyConfig,
    state: Arc<RuntimeState>,
    executor: Arc<Executor>,
    spread: SpreadEngine,
    book: LiquidityBook,
    last_spread: Option<SpreadSnapshot>,
    feeds: Option<FeedSet>,
    feed_a_up: bool,
    feed_b_up: bool,
    rec_tx: Option<mpsc::Sender<Event>>,
    cmd_rx: mpsc::Receiver<EngineCmd>,
    disable_rx: mpsc::Receiver<String>,
}

impl BotEngine {
    pub fn new(
        args: Args,
        cfg: StrategyConfig,
        venue: Arc<dyn VenueApi>,
        rec_tx: Option<mpsc::Sender<Event>>,
    ) -> (Self, BotHandle) {
        let state = Arc::new(RuntimeState::new());
        let (disable_tx, disable_rx) = mpsc::channel(8);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let executor = Arc::new(Executor::new(venue, state.clone(), disable_tx));
        let engine = Self {
            args,
            cfg,
            state,
            executor,
            spread: SpreadEngine::new(),
            book: LiquidityBook::new(),
            last_spread: None,
            feeds: None,
            feed_a_up: false,
            feed_b_up: false,
            rec_tx,
            cmd_rx,
            disable_rx,
        };
        (engine, BotHandle { cmd_tx })
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    None => {
                        // all handles dropped: shut down cleanly
                        self.teardown();
                        return;
                    }
                },
                Some(reason) = self.disable_rx.recv() => self.force_disable(&reason),
                Some(ev) = recv_feed(&mut self.feeds) => self.handle_feed(ev),
            }
        }
    }

    fn handle_cmd(&mut self, cmd: EngineCmd) {
        match cmd {
            EngineCmd::Start { symbol, resp } => {
                let started = self.start(symbol);
                let _ = resp.send(started);
            }
            EngineCmd::Stop { resp } => {
                let stopped = self.stop();
                let _ = resp.send(stopped);
            }
            EngineCmd::Restart { symbol, resp } => {
                self.stop();
                let _ = resp.send(self.start(symbol));
            }
            EngineCmd::Status { resp } => {
                let _ = resp.send(Status {
                    running: self.feeds.is_some(),
                    disabled: self.state.disabled(),
                    feed_a_connected: self.feed_a_up,
                    feed_b_connected: self.feed_b_up,
                    position: self.state.position(),
                    spread: self.last_spread.clone(),
                    last_close_ms: self.state.last_close_ms(),
                });
            }
            EngineCmd::CurrentSpread { resp } => {
                let _ = resp.send(self.last_spread.clone());
            }
            EngineCmd::GetConfig { resp } => {
                let _ = resp.send(self.cfg.clone());
            }
            EngineCmd::UpdateConfig { patch, resp } => {
                self.cfg.merge(patch);
                info!(cfg = ?self.cfg, "strategy config updated");
                let _ = resp.send(self.cfg.clone());
            }
        }
    }

    /// Idempotent: a second start while running is a no-op.
    fn start(&mut self, symbol: Option<String>) -> bool {
        if self.feeds.is_some() {
            return false;
        }
        if let Some(sym) = symbol {
            self.cfg.symbol = sym.to_ascii_uppercase();
        }
        self.state.set_disabled(false);
        STRATEGY_DISABLED.set(0);
        self.spread.reset();
        self.book = LiquidityBook::new();
        self.last_spread = None;

        let (tx, rx) = mpsc::channel::<FeedEvent>(4096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();
        match self.args.feed_mode {
            FeedMode::Mock => {
                handles.push(tokio::spawn(feed::run_mock(tx, shutdown_rx)));
            }
            FeedMode::Live => {
                handles.push(tokio::spawn(feed::run_feed_a(
                    tx.clone(),
                    self.cfg.symbol.clone(),
                    self.args.binance_ws_url.clone(),
                    shutdown_rx.clone(),
                )));
                handles.push(tokio::spawn(feed::run_feed_b(
                    tx,
                    self.cfg.symbol.clone(),
                    self.args.mexc_ws_url.clone(),
                    shutdown_rx,
                )));
            }
        }
        self.feeds = Some(FeedSet { rx, shutdown_tx, handles });
        self.record(Event::Note(format!("started {}", self.cfg.symbol)));
        info!(symbol = %self.cfg.symbol, "bot started");
        true
    }

    /// Idempotent: stopping a stopped bot is a no-op.
    fn stop(&mut self) -> bool {
        if self.feeds.is_none() {
            return false;
        }
        self.state.set_disabled(true);
        STRATEGY_DISABLED.set(1);
        self.teardown();
        self.state.set_signal(None);
        self.record(Event::Note("stopped".into()));
        info!("bot stopped");
        true
    }

    /// Commission circuit breaker and fatal paths land here.
    fn force_disable(&mut self, reason: &str) {
        warn!(%reason, "strategy force-disabled");
        self.state.set_disabled(true);
        STRATEGY_DISABLED.set(1);
        self.teardown();
        self.state.clear_trade_state();
        self.record(Event::Note(format!("disabled: {reason}")));
    }

    /// Detach the feed event stream first, then close the sockets. After
    /// the receiver is dropped no further evaluation can be triggered.
    fn teardown(&mut self) {
        if let Some(set) = self.feeds.take() {
            drop(set.rx);
            let _ = set.shutdown_tx.send(true);
            for h in set.handles {
                h.abort();
            }
        }
        self.feed_a_up = false;
        self.feed_b_up = false;
        FEED_CONNECTED.with_label_values(&["a"]).set(0);
        FEED_CONNECTED.with_label_values(&["b"]).set(0);
    }

    fn handle_feed(&mut self, ev: FeedEvent) {
        match ev {
            FeedEvent::QuoteA(q) => {
                if let Some(snap) = self.spread.update_feed_a(q, &self.cfg) {
                    self.on_spread(snap);
                }
            }
            FeedEvent::QuoteB(q) => {
                if let Some(snap) = self.spread.update_feed_b(q, &self.cfg) {
                    self.on_spread(snap);
                }
            }
            FeedEvent::DepthB(s) => self.book.update_snapshot(s),
            FeedEvent::StatusA(up) => self.feed_a_up = up,
            FeedEvent::StatusB(up) => self.feed_b_up = up,
        }
    }

    fn on_spread(&mut self, snap: SpreadSnapshot) {
        SPREAD_UPDATES.inc();
        self.record(Event::Spread(snap.clone()));
        self.last_spread = Some(snap.clone());

        match strategy::decide(&self.cfg, &self.state, &snap, &self.book) {
            Decision::Hold => {}
            Decision::Open(sig) => {
                SIGNALS.inc();
                self.record(Event::Sig(sig.clone()));
                let exec = self.executor.clone();
                let cfg = self.cfg.clone();
                let rec = self.rec_tx.clone();
                tokio::spawn(async move {
                    match exec.open_position(&sig, &cfg).await {
                        Ok(pos) => {
                            ORDERS.with_label_values(&["open", "ok"]).inc();
                            if let Some(rec) = rec {
                                let _ = rec.try_send(Event::Opened(pos));
                            }
                        }
                        Err(_) => {
                            // failure details already logged by the executor
                            ORDERS.with_label_values(&["open", "err"]).inc();
                        }
                    }
                });
            }
            Decision::Close => {
                // Cheap pre-check; the executor's closing guard is the
                // actual mutual exclusion.
                if self.state.is_closing() {
                    return;
                }
                let exec = self.executor.clone();
                let cfg = self.cfg.clone();
                let rec = self.rec_tx.clone();
                let pos = self.state.position();
                tokio::spawn(async move {
                    match exec.close_position(&snap, &cfg).await {
                        Ok(()) => {
                            ORDERS.with_label_values(&["close", "ok"]).inc();
                            if let (Some(rec), Some(pos)) = (rec, pos) {
                                let exit_price = match pos.side {
                                    crate::domain::PositionSide::Long => snap.feed_b.bid,
                                    crate::domain::PositionSide::Short => snap.feed_b.ask,
                                };
                                let _ = rec.try_send(Event::Closed {
                                    order_id: pos.order_id,
                                    exit_price,
                                });
                            }
                        }
                        Err(_) => {
                            ORDERS.with_label_values(&["close", "err"]).inc();
                        }
                    }
                });
            }
        }
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(ev);
        }
    }
}

async fn recv_feed(feeds: &mut Option<FeedSet>) -> Option<FeedEvent> {
    match feeds {
        Some(set) => set.rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{now_ms, PositionSide, Quote, Spread};
    use crate::venue::{ContractDetail, OrderAck, OrderRequest, VenueError, VenuePosition};
    use async_trait::async_trait;

    struct FeeVenue {
        fee: f64,
    }

    #[async_trait]
    impl VenueApi for FeeVenue {
        async fn submit_order(&self, _req: &OrderRequest) -> Result<OrderAck, VenueError> {
            Ok(OrderAck { order_id: 31337 })
        }

        async fn open_positions(&self, symbol: &str) -> Result<Vec<VenuePosition>, VenueError> {
            Ok(vec![VenuePosition {
                position_id: 1,
                symbol: symbol.to_string(),
                hold_vol: 5.0,
                position_type: 1,
                leverage: Some(10),
                open_avg_price: Some(100.0),
            }])
        }

        async fn contract_detail(&self, symbol: &str) -> Result<ContractDetail, VenueError> {
            Ok(ContractDetail {
                symbol: symbol.to_string(),
                price_scale: 1,
                vol_scale: 0,
                contract_size: 1.0,
                vol_unit: 1.0,
            })
        }

        async fn order_fee(&self, _order_id: u64, _symbol: &str) -> Result<f64, VenueError> {
            Ok(self.fee)
        }
    }

    fn args() -> Args {
        Args {
            symbol: "BTCUSDT".into(),
            feed_mode: FeedMode::Mock,
            binance_ws_url: String::new(),
            mexc_ws_url: String::new(),
            mexc_rest_url: String::new(),
            mexc_api_key: String::new(),
            mexc_api_secret: String::new(),
            record_file: None,
            metrics_port: 0,
        }
    }

    fn cfg() -> StrategyConfig {
        StrategyConfig {
            min_tick_difference: 2.0,
            position_size_usd: 1000.0,
            max_slippage_percent: 1.0,
            symbol: "BTCUSDT".into(),
            tick_size: 0.1,
        }
    }

    fn snap() -> SpreadSnapshot {
        let q = Quote { price: 100.0, bid: 99.9, ask: 100.1, ts_ms: now_ms() };
        SpreadSnapshot {
            feed_a: q,
            feed_b: q,
            spread: Spread {
                absolute: 0.0,
                percent: 0.0,
                direction: crate::domain::Direction::None,
                tick_difference: 0.0,
            },
            ts_ms: now_ms(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_is_idempotent() {
        let (engine, handle) = BotEngine::new(args(), cfg(), Arc::new(FeeVenue { fee: 0.0 }), None);
        tokio::spawn(engine.run());

        assert!(handle.start(None).await);
        assert!(!handle.start(None).await, "second start is a no-op");
        let st = handle.status().await.unwrap();
        assert!(st.running);
        assert!(!st.disabled);

        assert!(handle.stop().await);
        assert!(!handle.stop().await, "second stop is a no-op");
        let st = handle.status().await.unwrap();
        assert!(!st.running);
        assert!(st.disabled);

        assert!(handle.restart(Some("ethusdt".into())).await);
        let cfg = handle.config().await.unwrap();
        assert_eq!(cfg.symbol, "ETHUSDT");
    }

    #[tokio::test(start_paused = true)]
    async fn config_merge_roundtrip() {
        let (engine, handle) = BotEngine::new(args(), cfg(), Arc::new(FeeVenue { fee: 0.0 }), None);
        tokio::spawn(engine.run());

        let updated = handle
            .update_config(StrategyConfigPatch {
                min_tick_difference: Some(4.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.min_tick_difference, 4.0);
        assert_eq!(updated.position_size_usd, 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn commission_on_close_trips_circuit_breaker() {
        let (engine, handle) = BotEngine::new(args(), cfg(), Arc::new(FeeVenue { fee: 0.3 }), None);
        let state = engine.state.clone();
        let exec = engine.executor.clone();
        tokio::spawn(engine.run());

        assert!(handle.start(None).await);
        state.set_position(Some(Position {
            order_id: 1,
            side: PositionSide::Long,
            entry_price: 100.0,
            volume_usd: 1000.0,
        }));

        exec.close_position(&snap(), &cfg()).await.unwrap();

        // Let the detached commission check and the disable command land.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            if state.disabled() {
                break;
            }
        }
        assert!(state.disabled(), "commission must disable the strategy");
        let st = handle.status().await.unwrap();
        assert!(!st.running, "feeds must be torn down");
        assert!(st.position.is_none(), "state cleared by the breaker");
    }
}
