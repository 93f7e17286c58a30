// ===============================
// src/strategy.rs
// ===============================
//
// Entry/exit decision logic. Runs synchronously inside the engine's feed
// loop on every spread update. Rejections here are normal control flow
// ("not yet, try next tick"), never errors; nothing in this module awaits.

use tracing::{debug, info};

use crate::book::LiquidityBook;
use crate::config::StrategyConfig;
use crate::domain::{now_ms, Direction, PositionSide, Signal, SpreadSnapshot};
use crate::state::RuntimeState;

/// A signal with no confirmed position is discarded after this long.
pub const SIGNAL_STALE_MS: i64 = 30_000;

/// Execution-venue bid/ask spread wider than this many ticks means a
/// liquidity gap; entries are skipped.
const MAX_VENUE_SPREAD_TICKS: f64 = 3.0;

/// Entry-side fill ratio, stricter than the snapshot store's 0.5 floor.
const STRICT_VOLUME_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub enum Decision {
    Hold,
    Open(Signal),
    Close,
}

/// Price delta in tick units at tenth-of-a-tick resolution. Raw price
/// subtraction carries ~1e-14 of noise at typical magnitudes, enough to
/// miss an exact one-tick boundary; every tick-unit comparison in this
/// module goes through here.
fn tick_units(delta: f64, tick: f64) -> f64 {
    (delta / tick * 10.0).round() / 10.0
}

/// Evaluate one spread update against the current runtime state.
/// Stores any newly created signal on `state` before returning it.
pub fn decide(
    cfg: &StrategyConfig,
    state: &RuntimeState,
    snap: &SpreadSnapshot,
    book: &LiquidityBook,
) -> Decision {
    if state.disabled() {
        return Decision::Hold;
    }

    if let Some(pos) = state.position() {
        if state.signal().is_some() && should_close(&pos, snap, cfg) {
            return Decision::Close;
        }
        return Decision::Hold;
    }

    evaluate_entry(cfg, state, snap, book)
}

fn evaluate_entry(
    cfg: &StrategyConfig,
    state: &RuntimeState,
    snap: &SpreadSnapshot,
    book: &LiquidityBook,
) -> Decision {
    // A live signal blocks re-evaluation until it executes or goes stale.
    if let Some(sig) = state.signal() {
        if now_ms() - sig.ts_ms > SIGNAL_STALE_MS {
            info!(age_ms = now_ms() - sig.ts_ms, "discarding stale signal");
            state.set_signal(None);
        } else {
            return Decision::Hold;
        }
    }

    if snap.spread.direction == Direction::None
        || snap.spread.tick_difference < cfg.min_tick_difference
    {
        return Decision::Hold;
    }
    let side = match snap.spread.direction {
        Direction::Long => PositionSide::Long,
        Direction::Short => PositionSide::Short,
        Direction::None => return Decision::Hold,
    };

    let est = match book.estimate_execution(side, cfg.position_size_usd, cfg.max_slippage_percent)
    {
        Some(e) => e,
        None => return Decision::Hold,
    };

    // Liquidity gap guard on the execution venue's own spread.
    let venue_spread_ticks = tick_units(snap.feed_b.ask - snap.feed_b.bid, cfg.tick_size);
    if venue_spread_ticks > MAX_VENUE_SPREAD_TICKS {
        debug!(venue_spread_ticks, "entry skipped: execution venue spread too wide");
        return Decision::Hold;
    }

    // Entry price comes from the live quote, not the depth snapshot, which
    // may lag the tick stream. The fill ratio is recomputed against that
    // same leg rather than the store's generic best price.
    let entry_price = match side {
        PositionSide::Long => snap.feed_b.ask,
        PositionSide::Short => snap.feed_b.bid,
    };
    if entry_price <= 0.0 {
        return Decision::Hold;
    }
    let own_requested = cfg.position_size_usd / entry_price;
    let own_ratio = est.filled_volume / own_requested;
    if own_ratio < STRICT_VOLUME_RATIO || est.slippage_percent > cfg.max_slippage_percent {
        debug!(
            own_ratio,
            slippage = est.slippage_percent,
            "entry skipped: liquidity below strict thresholds"
        );
        return Decision::Hold;
    }

    let signal = Signal {
        side,
        entry_spread: snap.spread,
        entry_price,
        volume_usd: cfg.position_size_usd,
        ts_ms: now_ms(),
        can_execute: est.can_execute,
    };
    info!(
        ?side,
        entry_price,
        ticks = snap.spread.tick_difference,
        can_execute = signal.can_execute,
        "entry signal"
    );
    state.set_signal(Some(signal.clone()));

    if signal.can_execute {
        Decision::Open(signal)
    } else {
        Decision::Hold
    }
}

/// Exit rules, evaluated in priority order. The escape path reacts to
/// thesis invalidation on the reference venue and comes first for minimum
/// latency; directional reversal overrides profit-taking.
pub fn should_close(
    pos: &crate::domain::Position,
    snap: &SpreadSnapshot,
    cfg: &StrategyConfig,
) -> bool {
    let tick = cfg.tick_size;
    let a = &snap.feed_a;
    let b = &snap.feed_b;

    match pos.side {
        PositionSide::Long => {
            if tick_units(pos.entry_price - a.ask, tick) >= 1.0 {
                return true;
            }
        }
        PositionSide::Short => {
            if tick_units(a.bid - pos.entry_price, tick) >= 1.0 {
                return true;
            }
        }
    }

    let dir = snap.spread.direction;
    if dir != Direction::None && dir != pos.side.direction() {
        return true;
    }

    // Profit-taking needs all three: venues converged, the execution
    // venue's own spread narrowed to one tick, and an exit at no worse
    // than entry minus/plus half a tick.
    let narrowed = tick_units(b.ask - b.bid, tick) <= 1.0;
    match pos.side {
        PositionSide::Long => {
            a.ask <= b.ask && narrowed && b.bid >= pos.entry_price - tick / 2.0
        }
        PositionSide::Short => {
            a.bid >= b.bid && narrowed && b.ask <= pos.entry_price + tick / 2.0
        }
    }
}
