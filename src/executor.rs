// ===============================
// src/executor.rs (execution coordinator)
// ===============================
//
// Serializes strategy decisions into venue orders. Opens convert USD size
// into contract volume using the venue's contract metadata; closes are
// guarded by the runtime's `closing` flag and always reconcile against the
// venue's authoritative position list rather than the local mirror.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::{contract_symbol, StrategyConfig};
use crate::domain::{now_ms, Position, PositionSide, Signal, SpreadSnapshot};
use crate::state::RuntimeState;
use crate::venue::{ContractDetail, OrderIntent, OrderRequest, VenueApi, VenueError};

/// Minimum spacing between order submissions, shared across opens and closes.
const MIN_ORDER_SPACING_MS: i64 = 500;

/// Settle time before querying the fee on a just-closed order.
const COMMISSION_CHECK_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("order volume rounded to zero")]
    ZeroVolume,
    #[error(transparent)]
    Venue(#[from] VenueError),
}

pub struct Executor {
    venue: Arc<dyn VenueApi>,
    state: Arc<RuntimeState>,
    /// Commission circuit breaker: the detached post-close check can only
    /// ever emit a disable reason here, never an error into the close path.
    disable_tx: mpsc::Sender<String>,
}

/// USD size -> base coins -> contracts, rounded to the contract's minimum
/// volume step (floored up to one step when it would vanish), then to the
/// contract's volume precision.
pub fn round_volume(volume_usd: f64, entry_price: f64, detail: &ContractDetail) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    let coins = volume_usd / entry_price;
    let mut contracts = if detail.contract_size > 0.0 && detail.contract_size != 1.0 {
        coins / detail.contract_size
    } else {
        coins
    };
    if detail.vol_unit > 0.0 {
        let mut steps = (contracts / detail.vol_unit).round();
        if steps <= 0.0 {
            steps = 1.0;
        }
        contracts = steps * detail.vol_unit;
    }
    let factor = 10f64.powi(detail.vol_scale as i32);
    (contracts * factor).round() / factor
}

impl Executor {
    pub fn new(
        venue: Arc<dyn VenueApi>,
        state: Arc<RuntimeState>,
        disable_tx: mpsc::Sender<String>,
    ) -> Self {
        Self { venue, state, disable_tx }
    }

    /// Wait out the shared inter-order spacing, then stamp the clock.
    /// Advisory throughput pacing, not a correctness lock.
    async fn pace(&self) {
        let wait_ms = {
            let last = *self.state.last_order_ms.lock().unwrap();
            MIN_ORDER_SPACING_MS - (now_ms() - last)
        };
        if wait_ms > 0 {
            sleep(Duration::from_millis(wait_ms as u64)).await;
        }
        *self.state.last_order_ms.lock().unwrap() = now_ms();
    }

    fn external_oid(tag: &str) -> String {
        format!("ss-{}-{}-{}", tag, now_ms(), rand::random::<u32>())
    }

    /// Submit the entry order for a signal. Any failure clears the pending
    /// signal; the local position mirror is only set on a confirmed ack.
    pub async fn open_position(
        &self,
        sig: &Signal,
        cfg: &StrategyConfig,
    ) -> Result<Position, ExecError> {
        let symbol = contract_symbol(&cfg.symbol);
        let result = self.submit_open(sig, &symbol).await;
        match result {
            Ok(pos) => {
                self.state.set_position(Some(pos.clone()));
                info!(order_id = pos.order_id, ?pos.side, vol_usd = pos.volume_usd, "position opened");
                Ok(pos)
            }
            Err(e) => {
                self.state.set_signal(None);
                match &e {
                    ExecError::Venue(VenueError::RateLimited) => {
                        warn!("entry rejected by venue rate limit; signal cleared, no retry");
                    }
                    ExecError::Venue(VenueError::MissingOrderId(body)) => {
                        // The venue may hold a position we do not mirror; the
                        // next position query discovers the true state.
                        warn!(%body, "order may have landed without an extractable id; local position left unset");
                    }
                    _ => error!(?e, "open failed"),
                }
                Err(e)
            }
        }
    }

    async fn submit_open(&self, sig: &Signal, symbol: &str) -> Result<Position, ExecError> {
        let detail = self.venue.contract_detail(symbol).await?;
        let vol = round_volume(sig.volume_usd, sig.entry_price, &detail);
        if vol <= 0.0 {
            return Err(ExecError::ZeroVolume);
        }

        self.pace().await;
        let ack = self
            .venue
            .submit_order(&OrderRequest {
                symbol: symbol.to_string(),
                price: sig.entry_price,
                vol,
                leverage: None,
                intent: OrderIntent::open(sig.side),
                external_oid: Self::external_oid("open"),
            })
            .await?;

        Ok(Position {
            order_id: ack.order_id,
            side: sig.side,
            entry_price: sig.entry_price,
            volume_usd: sig.volume_usd,
        })
    }

    /// Close the open position at the snapshot's exit price. At most one
    /// close is ever in flight; a concurrent call observing the flag is a
    /// no-op. The venue's position list, not the local mirror, supplies
    /// hold volume and leverage.
    pub async fn close_position(
        &self,
        snap: &SpreadSnapshot,
        cfg: &StrategyConfig,
    ) -> Result<(), ExecError> {
        let _guard = match self.state.try_begin_close() {
            Some(g) => g,
            None => {
                debug!("close already in flight, skipping");
                return Ok(());
            }
        };

        let symbol = contract_symbol(&cfg.symbol);
        let positions = self.venue.open_positions(&symbol).await?;
        let local = self.state.position();
        let venue_pos = positions.into_iter().find(|p| {
            p.symbol == symbol
                && local
                    .as_ref()
                    .map_or(true, |lp| p.side() == Some(lp.side))
        });

        let Some(vp) = venue_pos else {
            info!("venue reports no matching position; treating as already closed");
            self.state.clear_trade_state();
            return Ok(());
        };
        let side = match local.map(|l| l.side).or_else(|| vp.side()) {
            Some(s) => s,
            None => {
                warn!(position_type = vp.position_type, "unknown venue position type, cannot close");
                return Ok(());
            }
        };

        let exit_price = match side {
            PositionSide::Long => snap.feed_b.bid,
            PositionSide::Short => snap.feed_b.ask,
        };

        self.pace().await;
        // Close-side intents are reduce-only on this API: they can only
        // shrink the venue position.
        let submit = self
            .venue
            .submit_order(&OrderRequest {
                symbol: symbol.clone(),
                price: exit_price,
                vol: vp.hold_vol,
                leverage: vp.leverage,
                intent: OrderIntent::close(side),
                external_oid: Self::external_oid("close"),
            })
            .await;

        match submit {
            Ok(ack) => {
                self.state.clear_trade_state();
                *self.state.last_close_ms.lock().unwrap() = Some(now_ms());
                info!(order_id = ack.order_id, exit_price, "position closed");
                self.spawn_commission_check(ack.order_id, symbol);
                Ok(())
            }
            Err(e) => {
                error!(?e, "close order failed, reconciling against venue");
                match self.venue.open_positions(&symbol).await {
                    Ok(ps) if !ps.iter().any(|p| p.symbol == symbol) => {
                        info!("position gone after failed close; clearing local state");
                        self.state.clear_trade_state();
                        Ok(())
                    }
                    Ok(_) => Err(e.into()),
                    Err(e2) => {
                        warn!(?e2, "reconciliation query failed");
                        Err(e.into())
                    }
                }
            }
        }
        // guard drops here: the closing flag clears on every exit path
    }

    /// Detached cost-control check. A non-zero fee on the close order
    /// disables the whole strategy; any error in the check itself is
    /// swallowed so a flaky read-only lookup cannot stop the bot.
    fn spawn_commission_check(&self, order_id: u64, symbol: String) {
        let venue = self.venue.clone();
        let disable_tx = self.disable_tx.clone();
        tokio::spawn(async move {
            sleep(COMMISSION_CHECK_DELAY).await;
            match venue.order_fee(order_id, &symbol).await {
                Ok(fee) if fee > 0.0 => {
                    warn!(fee, order_id, "commission charged on close, tripping circuit breaker");
                    let _ = disable_tx
                        .send(format!("commission {fee} on close order {order_id}"))
                        .await;
                }
                Ok(_) => debug!(order_id, "close order carried no commission"),
                Err(e) => warn!(?e, order_id, "commission check failed; strategy left running"),
            }
        });
    }
}
