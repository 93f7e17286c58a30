// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

/// Spread direction, seen from the execution venue:
/// `Long` = feed A trades above feed B, so buy on B and wait for convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn direction(&self) -> Direction {
        match self {
            PositionSide::Long => Direction::Long,
            PositionSide::Short => Direction::Short,
        }
    }
}

/// Latest quote from one venue. Superseded by the next message, never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub bid: f64,
    pub ask: f64,
    pub ts_ms: i64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub volume: f64,
}

/// Full order-book snapshot for the execution venue, best-to-worst.
/// Replaced wholesale on every depth message, never merged incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Spread {
    pub absolute: f64,
    pub percent: f64,
    pub direction: Direction,
    /// Non-negative, tenth-of-a-tick resolution; collapses to 0 below half a tick.
    pub tick_difference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadSnapshot {
    pub feed_a: Quote,
    pub feed_b: Quote,
    pub spread: Spread,
    pub ts_ms: i64,
}

/// Entry signal. At most one lives at any time; cleared on execution
/// failure, position close, or 30 s staleness with no open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub side: PositionSide,
    pub entry_spread: Spread,
    pub entry_price: f64,
    pub volume_usd: f64,
    pub ts_ms: i64,
    pub can_execute: bool,
}

/// Local position mirror. Exists only after a confirmed order ack carrying
/// a numeric order id; reconciled against the venue on close and on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub order_id: u64,
    pub side: PositionSide,
    pub entry_price: f64,
    pub volume_usd: f64,
}

/// Events pushed by the feed adapters into the engine loop.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    QuoteA(Quote),
    QuoteB(Quote),
    DepthB(OrderBookSnapshot),
    StatusA(bool),
    StatusB(bool),
}

/// Recorder events (JSONL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Spread(SpreadSnapshot),
    Sig(Signal),
    Opened(Position),
    Closed { order_id: u64, exit_price: f64 },
    Note(String),
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
