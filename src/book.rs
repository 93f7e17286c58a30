// ===============================
// src/book.rs (liquidity snapshot store)
// ===============================
//
// Holds the latest execution-venue order book (full replace on every depth
// message) and answers "can N USD be filled within slippage S" queries by
// walking the opposing side of the book.

use crate::domain::{OrderBookSnapshot, PositionSide};

/// Walk-the-book fill estimate. `best_price` is the top of the opposing
/// side; callers wanting a stricter volume ratio recompute it from
/// `filled_volume` against their own price leg.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEstimate {
    pub best_price: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub avg_price: f64,
    pub slippage_percent: f64,
    pub requested_volume: f64,
    pub filled_volume: f64,
    pub volume_ratio: f64,
    pub can_execute: bool,
}

/// Permissive floor on the fill ratio; the strategy applies 0.8 on entry.
const MIN_VOLUME_RATIO: f64 = 0.5;

#[derive(Debug, Default)]
pub struct LiquidityBook {
    snapshot: Option<OrderBookSnapshot>,
}

impl LiquidityBook {
    pub fn new() -> Self {
        Self { snapshot: None }
    }

    /// Full replace; depth messages are never merged incrementally.
    pub fn update_snapshot(&mut self, snap: OrderBookSnapshot) {
        self.snapshot = Some(snap);
    }

    pub fn snapshot(&self) -> Option<&OrderBookSnapshot> {
        self.snapshot.as_ref()
    }

    /// Estimate filling `volume_usd` on the opposing side of the book.
    /// Returns `None` when no snapshot exists yet or either side is empty.
    pub fn estimate_execution(
        &self,
        side: PositionSide,
        volume_usd: f64,
        max_slippage_percent: f64,
    ) -> Option<ExecutionEstimate> {
        let snap = self.snapshot.as_ref()?;
        if snap.bids.is_empty() || snap.asks.is_empty() {
            return None;
        }

        let best_bid = snap.bids[0].price;
        let best_ask = snap.asks[0].price;

        // Buy walks the asks, sell walks the bids.
        let levels = match side {
            PositionSide::Long => &snap.asks,
            PositionSide::Short => &snap.bids,
        };
        let best_price = levels[0].price;
        if best_price <= 0.0 {
            return None;
        }

        let requested_volume = volume_usd / best_price;

        let mut filled_volume = 0.0_f64;
        let mut cost = 0.0_f64;
        for level in levels {
            if filled_volume >= requested_volume {
                break;
            }
            let take = (requested_volume - filled_volume).min(level.volume);
            filled_volume += take;
            cost += take * level.price;
        }

        if filled_volume <= 0.0 {
            return None;
        }

        let avg_price = cost / filled_volume;
        let slippage_percent = match side {
            PositionSide::Long => (avg_price - best_price) / best_price * 100.0,
            PositionSide::Short => (best_price - avg_price) / best_price * 100.0,
        };
        let volume_ratio = filled_volume / requested_volume;

        Some(ExecutionEstimate {
            best_price,
            best_bid,
            best_ask,
            avg_price,
            slippage_percent,
            requested_volume,
            filled_volume,
            volume_ratio,
            can_execute: slippage_percent <= max_slippage_percent
                && volume_ratio >= MIN_VOLUME_RATIO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookLevel;

    fn book(asks: &[(f64, f64)], bids: &[(f64, f64)]) -> LiquidityBook {
        let mut lb = LiquidityBook::new();
        lb.update_snapshot(OrderBookSnapshot {
            asks: asks.iter().map(|&(price, volume)| BookLevel { price, volume }).collect(),
            bids: bids.iter().map(|&(price, volume)| BookLevel { price, volume }).collect(),
            ts_ms: 0,
        });
        lb
    }

    #[test]
    fn no_snapshot_returns_none() {
        let lb = LiquidityBook::new();
        assert!(lb.estimate_execution(PositionSide::Long, 1000.0, 0.1).is_none());
    }

    #[test]
    fn empty_side_returns_none() {
        let lb = book(&[(100.0, 5.0)], &[]);
        assert!(lb.estimate_execution(PositionSide::Long, 1000.0, 0.1).is_none());
    }

    #[test]
    fn buy_fills_from_asks_with_slippage() {
        // 1000 USD at best ask 100.0 -> 10 units requested; 5 at 100, 5 at 101.
        let lb = book(&[(100.0, 5.0), (101.0, 10.0)], &[(99.0, 10.0)]);
        let est = lb.estimate_execution(PositionSide::Long, 1000.0, 1.0).unwrap();
        assert_eq!(est.best_price, 100.0);
        assert!((est.filled_volume - 10.0).abs() < 1e-9);
        assert!((est.avg_price - 100.5).abs() < 1e-9);
        assert!((est.slippage_percent - 0.5).abs() < 1e-9);
        assert!((est.volume_ratio - 1.0).abs() < 1e-9);
        assert!(est.can_execute);
    }

    #[test]
    fn slippage_above_limit_blocks_execution() {
        let lb = book(&[(100.0, 5.0), (101.0, 10.0)], &[(99.0, 10.0)]);
        let est = lb.estimate_execution(PositionSide::Long, 1000.0, 0.2).unwrap();
        assert!(!est.can_execute);
    }

    #[test]
    fn exhausted_levels_report_partial_ratio() {
        // Only 4 of 10 requested units available.
        let lb = book(&[(100.0, 4.0)], &[(99.0, 10.0)]);
        let est = lb.estimate_execution(PositionSide::Long, 1000.0, 1.0).unwrap();
        assert!((est.volume_ratio - 0.4).abs() < 1e-9);
        assert!(!est.can_execute); // below the 0.5 floor
    }

    #[test]
    fn sell_walks_bids() {
        let lb = book(&[(101.0, 10.0)], &[(100.0, 5.0), (99.0, 10.0)]);
        let est = lb.estimate_execution(PositionSide::Short, 1000.0, 1.0).unwrap();
        assert_eq!(est.best_price, 100.0);
        assert!(est.slippage_percent > 0.0);
        assert_eq!(est.best_ask, 101.0);
        assert_eq!(est.best_bid, 100.0);
    }
}
