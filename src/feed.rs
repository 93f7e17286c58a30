// ===============================
// src/feed.rs
// ===============================
//
// Market data adapters:
// - run_feed_a : reference venue, Binance futures bookTicker WS
// - run_feed_b : execution venue, MEXC contract WS (ticker + full depth),
//                with a keep-alive ping while connected
// - run_mock   : random-walk generator driving both venues for local runs
//
// Both live adapters reconnect with a flat 5 s backoff; a pending reconnect
// is cancelled the moment the shutdown signal flips. Malformed frames are
// logged and dropped, never fatal.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::contract_symbol;
use crate::domain::{now_ms, BookLevel, FeedEvent, OrderBookSnapshot, Quote};
use crate::metrics::{FEED_CONNECTED, FEED_RECONNECTS, TICKS};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Backoff that aborts early when shutdown flips. Returns false to stop.
async fn backoff_or_shutdown(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(RECONNECT_BACKOFF) => true,
        _ = shutdown.changed() => false,
    }
}

fn shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

// ---- Feed A: Binance futures bookTicker ----

/// Example payload:
/// {"u":400900217,"s":"BTCUSDT","b":"25.35190000","B":"31.21","a":"25.36520000","A":"40.66"}
pub async fn run_feed_a(
    tx: mpsc::Sender<FeedEvent>,
    symbol: String,
    ws_base: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let topic = format!("{}@bookTicker", symbol.to_lowercase());
    let ws_url = format!("{}/{}", ws_base.trim_end_matches('/'), topic);

    loop {
        if shutting_down(&shutdown) {
            return;
        }
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad feed A url");
                return;
            }
        };

        info!(%ws_url, "connecting feed A bookTicker");
        match connect_async(url).await {
            Ok((mut ws, _resp)) => {
                info!(%symbol, "feed A connected");
                FEED_CONNECTED.with_label_values(&["a"]).set(1);
                let _ = tx.send(FeedEvent::StatusA(true)).await;

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        frame = ws.next() => match frame {
                            Some(Ok(m)) if m.is_text() => {
                                let txt = match m.into_text() {
                                    Ok(t) => t,
                                    Err(e) => {
                                        warn!(?e, "feed A: unreadable text frame");
                                        continue;
                                    }
                                };
                                if let Some(q) = parse_book_ticker(&txt) {
                                    TICKS.with_label_values(&["a"]).inc();
                                    if tx.send(FeedEvent::QuoteA(q)).await.is_err() {
                                        return; // engine gone
                                    }
                                } else {
                                    debug!("feed A: unroutable frame dropped");
                                }
                            }
                            Some(Ok(_)) => {} // ignore non-text frames
                            Some(Err(e)) => {
                                error!(?e, "feed A read error");
                                break;
                            }
                            None => break,
                        }
                    }
                }

                FEED_CONNECTED.with_label_values(&["a"]).set(0);
                let _ = tx.send(FeedEvent::StatusA(false)).await;
                if shutting_down(&shutdown) {
                    return;
                }
                info!("feed A disconnected, will reconnect");
            }
            Err(e) => error!(?e, "feed A connect failed"),
        }

        FEED_RECONNECTS.with_label_values(&["a"]).inc();
        if !backoff_or_shutdown(&mut shutdown).await {
            return;
        }
    }
}

fn parse_book_ticker(txt: &str) -> Option<Quote> {
    let v: serde_json::Value = serde_json::from_str(txt).ok()?;
    let bid: f64 = v.get("b")?.as_str()?.parse().ok()?;
    let ask: f64 = v.get("a")?.as_str()?.parse().ok()?;
    if bid <= 0.0 || ask <= 0.0 {
        return None;
    }
    Some(Quote { price: (bid + ask) / 2.0, bid, ask, ts_ms: now_ms() })
}

// ---- Feed B: MEXC contract ticker + depth ----

#[derive(Debug, Deserialize)]
struct MexcEnvelope {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MexcTicker {
    last_price: f64,
    bid1: f64,
    ask1: f64,
}

#[derive(Debug, Deserialize)]
struct MexcDepth {
    #[serde(default)]
    asks: Vec<Vec<f64>>,
    #[serde(default)]
    bids: Vec<Vec<f64>>,
}

pub async fn run_feed_b(
    tx: mpsc::Sender<FeedEvent>,
    symbol: String,
    ws_url: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let contract = contract_symbol(&symbol);

    loop {
        if shutting_down(&shutdown) {
            return;
        }
        let url = match Url::parse(&ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!(?e, %ws_url, "bad feed B url");
                return;
            }
        };

        info!(%ws_url, %contract, "connecting feed B contract stream");
        match connect_async(url).await {
            Ok((ws, _resp)) => {
                let (mut write, mut read) = ws.split();

                let sub_ticker = serde_json::json!({
                    "method": "sub.ticker",
                    "param": { "symbol": contract }
                });
                let sub_depth = serde_json::json!({
                    "method": "sub.depth.full",
                    "param": { "symbol": contract, "limit": 20 }
                });
                if write.send(Message::Text(sub_ticker.to_string())).await.is_err()
                    || write.send(Message::Text(sub_depth.to_string())).await.is_err()
                {
                    error!("feed B subscribe failed");
                } else {
                    info!(%contract, "feed B connected");
                    FEED_CONNECTED.with_label_values(&["b"]).set(1);
                    let _ = tx.send(FeedEvent::StatusB(true)).await;

                    // Keep-alive runs only while connected; dropping out of
                    // this loop stops it with the connection.
                    let mut keepalive = interval(KEEPALIVE_INTERVAL);
                    keepalive.tick().await; // first tick is immediate

                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = keepalive.tick() => {
                                let ping = serde_json::json!({"method": "ping"});
                                if write.send(Message::Text(ping.to_string())).await.is_err() {
                                    error!("feed B ping failed");
                                    break;
                                }
                            }
                            frame = read.next() => match frame {
                                Some(Ok(m)) if m.is_text() => {
                                    let txt = match m.into_text() {
                                        Ok(t) => t,
                                        Err(e) => {
                                            warn!(?e, "feed B: unreadable text frame");
                                            continue;
                                        }
                                    };
                                    for ev in parse_contract_frame(&txt) {
                                        TICKS.with_label_values(&["b"]).inc();
                                        if tx.send(ev).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    error!(?e, "feed B read error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }

                    FEED_CONNECTED.with_label_values(&["b"]).set(0);
                    let _ = tx.send(FeedEvent::StatusB(false)).await;
                }

                if shutting_down(&shutdown) {
                    return;
                }
                info!("feed B disconnected, will reconnect");
            }
            Err(e) => error!(?e, "feed B connect failed"),
        }

        FEED_RECONNECTS.with_label_values(&["b"]).inc();
        if !backoff_or_shutdown(&mut shutdown).await {
            return;
        }
    }
}

/// Route one contract-stream frame. Pongs and subscription acks produce
/// nothing; malformed payloads are dropped with a debug log.
fn parse_contract_frame(txt: &str) -> Vec<FeedEvent> {
    let env: MexcEnvelope = match serde_json::from_str(txt) {
        Ok(e) => e,
        Err(e) => {
            debug!(?e, "feed B: undecodable frame dropped");
            return Vec::new();
        }
    };
    let ts = env.ts.unwrap_or_else(now_ms);

    match env.channel.as_str() {
        "push.ticker" => {
            let Some(data) = env.data else { return Vec::new() };
            match serde_json::from_value::<MexcTicker>(data) {
                Ok(t) if t.bid1 > 0.0 && t.ask1 > 0.0 => vec![FeedEvent::QuoteB(Quote {
                    price: t.last_price,
                    bid: t.bid1,
                    ask: t.ask1,
                    ts_ms: ts,
                })],
                Ok(_) => Vec::new(),
                Err(e) => {
                    debug!(?e, "feed B: bad ticker payload dropped");
                    Vec::new()
                }
            }
        }
        "push.depth.full" => {
            let Some(data) = env.data else { return Vec::new() };
            match serde_json::from_value::<MexcDepth>(data) {
                Ok(d) => vec![FeedEvent::DepthB(OrderBookSnapshot {
                    bids: levels(&d.bids),
                    asks: levels(&d.asks),
                    ts_ms: ts,
                })],
                Err(e) => {
                    debug!(?e, "feed B: bad depth payload dropped");
                    Vec::new()
                }
            }
        }
        "pong" | "rs.sub.ticker" | "rs.sub.depth.full" => Vec::new(),
        other => {
            debug!(channel = other, "feed B: unroutable channel dropped");
            Vec::new()
        }
    }
}

fn levels(raw: &[Vec<f64>]) -> Vec<BookLevel> {
    raw.iter()
        .filter(|l| l.len() >= 2)
        .map(|l| BookLevel { price: l[0], volume: l[1] })
        .collect()
}

// ---- Mock feed (both venues, random walk) ----

pub async fn run_mock(tx: mpsc::Sender<FeedEvent>, mut shutdown: watch::Receiver<bool>) {
    let mut mid: f64 = 100.0;
    let _ = tx.send(FeedEvent::StatusA(true)).await;
    let _ = tx.send(FeedEvent::StatusB(true)).await;
    loop {
        if shutting_down(&shutdown) {
            return;
        }
        // ThreadRng must not be held across an await
        let (step, skew) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-0.03..=0.03), rng.gen_range(-0.02..=0.02))
        };
        mid = (mid + step).max(50.0);

        let a = Quote { price: mid + skew, bid: mid + skew - 0.05, ask: mid + skew + 0.05, ts_ms: now_ms() };
        let b = Quote { price: mid, bid: mid - 0.05, ask: mid + 0.05, ts_ms: now_ms() };
        let depth = OrderBookSnapshot {
            bids: (0..5).map(|i| BookLevel { price: b.bid - 0.1 * i as f64, volume: 50.0 }).collect(),
            asks: (0..5).map(|i| BookLevel { price: b.ask + 0.1 * i as f64, volume: 50.0 }).collect(),
            ts_ms: now_ms(),
        };

        for ev in [FeedEvent::QuoteA(a), FeedEvent::QuoteB(b), FeedEvent::DepthB(depth)] {
            if tx.send(ev).await.is_err() {
                return;
            }
        }
        TICKS.with_label_values(&["mock"]).inc();

        tokio::select! {
            _ = sleep(Duration::from_millis(10)) => {}
            _ = shutdown.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_ticker_parses_and_rejects_zeroes() {
        let q = parse_book_ticker(r#"{"s":"BTCUSDT","b":"100.5","a":"100.7"}"#).unwrap();
        assert_eq!(q.bid, 100.5);
        assert_eq!(q.ask, 100.7);
        assert!(parse_book_ticker(r#"{"b":"0","a":"100.7"}"#).is_none());
        assert!(parse_book_ticker("not json").is_none());
    }

    #[test]
    fn contract_ticker_frame_routes_to_quote() {
        let evs = parse_contract_frame(
            r#"{"channel":"push.ticker","data":{"lastPrice":100.1,"bid1":100.0,"ask1":100.2},"ts":5}"#,
        );
        match evs.as_slice() {
            [FeedEvent::QuoteB(q)] => {
                assert_eq!(q.bid, 100.0);
                assert_eq!(q.ts_ms, 5);
            }
            other => panic!("expected one QuoteB, got {:?}", other),
        }
    }

    #[test]
    fn contract_depth_frame_routes_to_snapshot() {
        let evs = parse_contract_frame(
            r#"{"channel":"push.depth.full","data":{"asks":[[100.2,30,1]],"bids":[[100.0,25,2]]},"ts":7}"#,
        );
        match evs.as_slice() {
            [FeedEvent::DepthB(s)] => {
                assert_eq!(s.asks[0].price, 100.2);
                assert_eq!(s.bids[0].volume, 25.0);
            }
            other => panic!("expected one DepthB, got {:?}", other),
        }
    }

    #[test]
    fn pongs_and_garbage_are_dropped() {
        assert!(parse_contract_frame(r#"{"channel":"pong","data":1700000000}"#).is_empty());
        assert!(parse_contract_frame(r#"{"channel":"push.ticker","data":{"bid1":"oops"}}"#).is_empty());
        assert!(parse_contract_frame("{{{{").is_empty());
    }
}
