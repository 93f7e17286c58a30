// ===============================
// src/config.rs
// ===============================
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

/// Market data source mode
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMode {
    Mock,
    Live,
}

impl FeedMode {
    pub fn from_env(key: &str, default_mode: FeedMode) -> FeedMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock" => FeedMode::Mock,
            "live" => FeedMode::Live,
            _ => default_mode,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    /// Reference-venue symbol (Binance form, e.g. "BTCUSDT")
    pub symbol: String,

    pub feed_mode: FeedMode,
    pub binance_ws_url: String,
    pub mexc_ws_url: String,
    pub mexc_rest_url: String,
    pub mexc_api_key: String,
    pub mexc_api_secret: String,

    pub record_file: Option<String>,
    pub metrics_port: u16,
}

/// Strategy parameters, mutable at runtime through [`StrategyConfig::merge`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub min_tick_difference: f64,
    pub position_size_usd: f64,
    pub max_slippage_percent: f64,
    pub symbol: String,
    pub tick_size: f64,
}

/// Partial update for [`StrategyConfig`]; absent fields keep their value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StrategyConfigPatch {
    pub min_tick_difference: Option<f64>,
    pub position_size_usd: Option<f64>,
    pub max_slippage_percent: Option<f64>,
    pub symbol: Option<String>,
    pub tick_size: Option<f64>,
}

impl StrategyConfig {
    pub fn merge(&mut self, patch: StrategyConfigPatch) {
        if let Some(v) = patch.min_tick_difference {
            self.min_tick_difference = v;
        }
        if let Some(v) = patch.position_size_usd {
            self.position_size_usd = v;
        }
        if let Some(v) = patch.max_slippage_percent {
            self.max_slippage_percent = v;
        }
        if let Some(v) = patch.symbol {
            self.symbol = v;
        }
        if let Some(v) = patch.tick_size {
            self.tick_size = v;
        }
    }
}

/// Execution-venue contract symbol ("BTCUSDT" -> "BTC_USDT").
pub fn contract_symbol(symbol: &str) -> String {
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{}_{}", base, quote);
            }
        }
    }
    symbol.to_string()
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub fn load() -> (Args, StrategyConfig) {
    let _ = dotenv();

    let symbol = env::var("SYMBOL")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .to_ascii_uppercase();

    let feed_mode = FeedMode::from_env("FEED_MODE", FeedMode::Live);

    let binance_ws_url = env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| "wss://fstream.binance.com/ws".to_string());
    let mexc_ws_url = env::var("MEXC_WS_URL")
        .unwrap_or_else(|_| "wss://contract.mexc.com/edge".to_string());
    let mexc_rest_url = env::var("MEXC_REST_URL")
        .unwrap_or_else(|_| "https://contract.mexc.com".to_string());
    let mexc_api_key = env::var("MEXC_API_KEY").unwrap_or_default();
    let mexc_api_secret = env::var("MEXC_API_SECRET").unwrap_or_default();

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    let args = Args {
        symbol: symbol.clone(),
        feed_mode,
        binance_ws_url,
        mexc_ws_url,
        mexc_rest_url,
        mexc_api_key,
        mexc_api_secret,
        record_file,
        metrics_port,
    };

    let strategy = StrategyConfig {
        min_tick_difference: env_f64("MIN_TICK_DIFFERENCE", 2.0),
        position_size_usd: env_f64("POSITION_SIZE_USD", 100.0),
        max_slippage_percent: env_f64("MAX_SLIPPAGE_PERCENT", 0.05),
        symbol,
        tick_size: env_f64("TICK_SIZE", 0.1),
    };

    (args, strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_absent_fields() {
        let mut cfg = StrategyConfig {
            min_tick_difference: 2.0,
            position_size_usd: 100.0,
            max_slippage_percent: 0.05,
            symbol: "BTCUSDT".into(),
            tick_size: 0.1,
        };
        cfg.merge(StrategyConfigPatch {
            min_tick_difference: Some(3.5),
            tick_size: Some(0.5),
            ..Default::default()
        });
        assert_eq!(cfg.min_tick_difference, 3.5);
        assert_eq!(cfg.tick_size, 0.5);
        assert_eq!(cfg.position_size_usd, 100.0);
        assert_eq!(cfg.symbol, "BTCUSDT");
    }

    #[test]
    fn patch_deserializes_partial_json() {
        let patch: StrategyConfigPatch =
            serde_json::from_str(r#"{"position_size_usd": 250.0}"#).unwrap();
        assert_eq!(patch.position_size_usd, Some(250.0));
        assert!(patch.symbol.is_none());
    }

    #[test]
    fn contract_symbol_mapping() {
        assert_eq!(contract_symbol("BTCUSDT"), "BTC_USDT");
        assert_eq!(contract_symbol("ETHUSDC"), "ETH_USDC");
        assert_eq!(contract_symbol("WEIRD"), "WEIRD");
    }
}
