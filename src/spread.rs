// ===============================
// src/spread.rs
// ===============================
//
// Combines the two feeds' latest quotes into a normalized spread. Emits a
// snapshot on every tick once both venues have quoted, even when the spread
// is below any actionable threshold: exit logic downstream needs every tick.

use crate::config::StrategyConfig;
use crate::domain::{now_ms, Direction, Quote, Spread, SpreadSnapshot};

#[derive(Debug, Default)]
pub struct SpreadEngine {
    last_a: Option<Quote>,
    last_b: Option<Quote>,
}

impl SpreadEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_feed_a(&mut self, q: Quote, cfg: &StrategyConfig) -> Option<SpreadSnapshot> {
        self.last_a = Some(q);
        self.compute(cfg)
    }

    pub fn update_feed_b(&mut self, q: Quote, cfg: &StrategyConfig) -> Option<SpreadSnapshot> {
        self.last_b = Some(q);
        self.compute(cfg)
    }

    pub fn reset(&mut self) {
        self.last_a = None;
        self.last_b = None;
    }

    fn compute(&self, cfg: &StrategyConfig) -> Option<SpreadSnapshot> {
        let a = self.last_a?;
        let b = self.last_b?;

        let mid_a = a.mid();
        let mid_b = b.mid();
        // Bad ticks (zeroed quotes during venue maintenance) are skipped silently.
        if mid_a <= 0.0 || mid_b <= 0.0 || a.bid <= 0.0 || b.bid <= 0.0 {
            return None;
        }

        let spread = compute_spread(mid_a, mid_b, cfg.tick_size);
        Some(SpreadSnapshot { feed_a: a, feed_b: b, spread, ts_ms: now_ms() })
    }
}

/// Normalize the raw mid difference into tick units. The absolute difference
/// is rounded to the nearest tick multiple before percent/tick derivation to
/// suppress floating-point noise; a raw delta under half a tick collapses to
/// zero, anything else is kept at one-decimal resolution.
pub fn compute_spread(mid_a: f64, mid_b: f64, tick_size: f64) -> Spread {
    let raw = mid_a - mid_b;
    let raw_ticks = raw.abs() / tick_size;

    let absolute = (raw.abs() / tick_size).round() * tick_size;
    let tick_difference = if raw_ticks < 0.5 {
        0.0
    } else {
        (raw_ticks * 10.0).round() / 10.0
    };
    let percent = absolute / mid_b * 100.0;

    let direction = if mid_a > mid_b {
        Direction::Long
    } else if mid_a < mid_b {
        Direction::Short
    } else {
        Direction::None
    };

    Spread { absolute, percent, direction, tick_difference }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(tick: f64) -> StrategyConfig {
        StrategyConfig {
            min_tick_difference: 2.0,
            position_size_usd: 100.0,
            max_slippage_percent: 0.05,
            symbol: "BTCUSDT".into(),
            tick_size: tick,
        }
    }

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote { price: (bid + ask) / 2.0, bid, ask, ts_ms: 0 }
    }

    #[test]
    fn no_snapshot_until_both_venues_quote() {
        let mut eng = SpreadEngine::new();
        assert!(eng.update_feed_a(quote(100.0, 100.2), &cfg(0.1)).is_none());
        assert!(eng.update_feed_b(quote(100.0, 100.2), &cfg(0.1)).is_some());
    }

    #[test]
    fn non_positive_quotes_are_skipped() {
        let mut eng = SpreadEngine::new();
        eng.update_feed_a(quote(100.0, 100.2), &cfg(0.1));
        assert!(eng.update_feed_b(quote(0.0, 100.2), &cfg(0.1)).is_none());
        assert!(eng.update_feed_b(quote(-1.0, 1.0), &cfg(0.1)).is_none());
    }

    #[test]
    fn worked_example_ten_ticks_long() {
        // feedA mid 100.010, feedB mid 100.000, tick 0.001 -> 10.0 ticks, long.
        let mut eng = SpreadEngine::new();
        eng.update_feed_a(quote(100.005, 100.015), &cfg(0.001));
        let snap = eng.update_feed_b(quote(99.995, 100.005), &cfg(0.001)).unwrap();
        assert!((snap.spread.tick_difference - 10.0).abs() < 1e-9);
        assert_eq!(snap.spread.direction, Direction::Long);
    }

    #[test]
    fn sub_half_tick_collapses_to_zero() {
        let s = compute_spread(100.0004, 100.0, 0.001);
        assert_eq!(s.tick_difference, 0.0);
        assert_eq!(s.absolute, 0.0);
    }

    #[test]
    fn tick_difference_is_idempotent() {
        let first = compute_spread(100.010, 100.000, 0.001);
        let second = compute_spread(100.010, 100.000, 0.001);
        assert_eq!(first.tick_difference, second.tick_difference);
        assert_eq!(first.absolute, second.absolute);
        assert_eq!(first.percent, second.percent);
    }

    #[test]
    fn direction_is_antisymmetric() {
        let ab = compute_spread(100.010, 100.000, 0.001);
        let ba = compute_spread(100.000, 100.010, 0.001);
        assert_eq!(ab.direction, Direction::Long);
        assert_eq!(ba.direction, Direction::Short);
        assert_eq!(ab.tick_difference, ba.tick_difference);

        let flat = compute_spread(100.0, 100.0, 0.001);
        assert_eq!(flat.direction, Direction::None);
    }

    #[test]
    fn tick_difference_rounds_to_one_decimal() {
        let s = compute_spread(100.00123, 100.0, 0.001);
        assert!((s.tick_difference - 1.2).abs() < 1e-9);
    }
}
