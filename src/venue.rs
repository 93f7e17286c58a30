// ===============================
// src/venue.rs (execution-venue collaborators)
// ===============================
//
// Boundary to the MEXC contract REST API. Every wire shape the venue has
// been observed to return (bare values, `data` wrappers, double-nested
// `data.data`) is normalized into one canonical type right here; nothing
// past this module branches on response shape.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::domain::PositionSide;

/// Venue error code for "too many requests".
pub const RATE_LIMIT_CODE: i64 = 510;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue rate limit (code {RATE_LIMIT_CODE})")]
    RateLimited,
    #[error("venue rejected request: code {code}, {message}")]
    Rejected { code: i64, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("undecodable response: {0}")]
    Decode(String),
    /// The venue may have accepted the order even though no id could be
    /// extracted; local and venue state can diverge until reconciled.
    #[error("order accepted but no order id found in response: {0}")]
    MissingOrderId(String),
}

/// Order intent, encoded the way the contract API expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderIntent {
    OpenLong,
    CloseShort,
    OpenShort,
    CloseLong,
}

impl OrderIntent {
    pub fn code(&self) -> u8 {
        match self {
            OrderIntent::OpenLong => 1,
            OrderIntent::CloseShort => 2,
            OrderIntent::OpenShort => 3,
            OrderIntent::CloseLong => 4,
        }
    }

    pub fn open(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderIntent::OpenLong,
            PositionSide::Short => OrderIntent::OpenShort,
        }
    }

    pub fn close(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderIntent::CloseLong,
            PositionSide::Short => OrderIntent::CloseShort,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub price: f64,
    pub vol: f64,
    pub leverage: Option<u32>,
    pub intent: OrderIntent,
    pub external_oid: String,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderAck {
    /// Confirmed numeric order identifier; a Position may only be created
    /// once this exists.
    pub order_id: u64,
}

/// Venue-reported open position, the source of truth at close time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenuePosition {
    pub position_id: u64,
    pub symbol: String,
    pub hold_vol: f64,
    /// 1 = long, 2 = short
    pub position_type: i32,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub open_avg_price: Option<f64>,
}

impl VenuePosition {
    pub fn side(&self) -> Option<PositionSide> {
        match self.position_type {
            1 => Some(PositionSide::Long),
            2 => Some(PositionSide::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetail {
    pub symbol: String,
    pub price_scale: u32,
    pub vol_scale: u32,
    pub contract_size: f64,
    pub vol_unit: f64,
}

#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderAck, VenueError>;
    async fn open_positions(&self, symbol: &str) -> Result<Vec<VenuePosition>, VenueError>;
    async fn contract_detail(&self, symbol: &str) -> Result<ContractDetail, VenueError>;
    /// Fee/commission charged on a filled order; 0.0 when the venue reports none.
    async fn order_fee(&self, order_id: u64, symbol: &str) -> Result<f64, VenueError>;
}

// ---- wire-shape normalization ----

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

impl NumOrStr {
    fn value(&self) -> f64 {
        match self {
            NumOrStr::Num(n) => *n,
            NumOrStr::Str(s) => s.parse().unwrap_or(0.0),
        }
    }
}

/// Order ids arrive as a raw number, a wrapped object (`data`, `orderId`
/// or `id`), or nested one level further (`data.data`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OrderIdShape {
    Num(u64),
    Str(String),
    Obj {
        #[serde(default, rename = "orderId")]
        order_id: Option<Box<OrderIdShape>>,
        #[serde(default)]
        id: Option<Box<OrderIdShape>>,
        #[serde(default)]
        data: Option<Box<OrderIdShape>>,
    },
}

impl OrderIdShape {
    fn resolve(self) -> Option<u64> {
        match self {
            OrderIdShape::Num(n) => Some(n),
            OrderIdShape::Str(s) => s.parse().ok(),
            OrderIdShape::Obj { order_id, id, data } => order_id
                .and_then(|s| s.resolve())
                .or_else(|| id.and_then(|s| s.resolve()))
                .or_else(|| data.and_then(|s| s.resolve())),
        }
    }
}

pub fn extract_order_id(body: &serde_json::Value) -> Option<u64> {
    serde_json::from_value::<OrderIdShape>(body.clone())
        .ok()
        .and_then(OrderIdShape::resolve)
}

/// Position lists arrive flat, under `data`, or under `data.data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PositionsShape {
    Flat(Vec<VenuePosition>),
    Wrapped { data: Box<PositionsShape> },
}

impl PositionsShape {
    fn flatten(self) -> Vec<VenuePosition> {
        match self {
            PositionsShape::Flat(v) => v,
            PositionsShape::Wrapped { data } => data.flatten(),
        }
    }
}

pub fn decode_positions(body: &serde_json::Value) -> Result<Vec<VenuePosition>, VenueError> {
    serde_json::from_value::<PositionsShape>(body.clone())
        .map(PositionsShape::flatten)
        .map_err(|e| VenueError::Decode(format!("positions: {e}")))
}

/// Contract detail arrives as one object or as an array to filter by symbol,
/// either bare or under `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContractShape {
    One(ContractDetail),
    Many(Vec<ContractDetail>),
    Wrapped { data: Box<ContractShape> },
}

impl ContractShape {
    fn find(self, symbol: &str) -> Option<ContractDetail> {
        match self {
            ContractShape::One(d) => (d.symbol == symbol).then_some(d),
            ContractShape::Many(v) => v.into_iter().find(|d| d.symbol == symbol),
            ContractShape::Wrapped { data } => data.find(symbol),
        }
    }
}

pub fn decode_contract(
    body: &serde_json::Value,
    symbol: &str,
) -> Result<ContractDetail, VenueError> {
    serde_json::from_value::<ContractShape>(body.clone())
        .map_err(|e| VenueError::Decode(format!("contract detail: {e}")))?
        .find(symbol)
        .ok_or_else(|| VenueError::Decode(format!("no contract detail for {symbol}")))
}

#[derive(Debug, Deserialize)]
struct FeeFields {
    #[serde(default, alias = "commission", alias = "feeAmount")]
    fee: Option<NumOrStr>,
}

#[derive(Debug, Deserialize)]
struct OrderDetailShape {
    #[serde(default)]
    data: Option<FeeFields>,
    #[serde(flatten)]
    top: FeeFields,
}

pub fn decode_fee(body: &serde_json::Value) -> f64 {
    serde_json::from_value::<OrderDetailShape>(body.clone())
        .ok()
        .and_then(|d| d.data.and_then(|f| f.fee).or(d.top.fee))
        .map(|v| v.value())
        .unwrap_or(0.0)
}

// ---- REST client ----

fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Contract-API signature: HMAC-SHA256 over access_key + req_time + params.
fn sign_request(secret: &str, access_key: &str, req_time: u64, params: &str) -> String {
    let payload = format!("{access_key}{req_time}{params}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub struct MexcClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    api_secret: String,
}

impl MexcClient {
    pub fn new(base: String, api_key: String, api_secret: String) -> Self {
        Self { http: reqwest::Client::new(), base, api_key, api_secret }
    }

    /// Envelope check shared by all private calls: `{success, code, ...}`.
    fn check_envelope(body: &serde_json::Value) -> Result<(), VenueError> {
        let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let success = body.get("success").and_then(|s| s.as_bool()).unwrap_or(true);
        if code == RATE_LIMIT_CODE {
            return Err(VenueError::RateLimited);
        }
        if !success || code != 0 {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message")
                .to_string();
            return Err(VenueError::Rejected { code, message });
        }
        Ok(())
    }

    async fn signed_get(&self, path: &str, query: &[(&str, String)]) -> Result<serde_json::Value, VenueError> {
        let param_str = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let req_time = timestamp_ms();
        let sig = sign_request(&self.api_secret, &self.api_key, req_time, &param_str);
        let url = if param_str.is_empty() {
            format!("{}{}", self.base, path)
        } else {
            format!("{}{}?{}", self.base, path, param_str)
        };
        let body: serde_json::Value = self
            .http
            .get(url)
            .header("ApiKey", &self.api_key)
            .header("Request-Time", req_time.to_string())
            .header("Signature", sig)
            .send()
            .await?
            .json()
            .await?;
        Ok(body)
    }
}

#[async_trait]
impl VenueApi for MexcClient {
    async fn submit_order(&self, req: &OrderRequest) -> Result<OrderAck, VenueError> {
        let mut payload = serde_json::json!({
            "symbol": req.symbol,
            "price": req.price,
            "vol": req.vol,
            "side": req.intent.code(),
            "type": 5,       // market
            "openType": 2,   // cross margin
            "externalOid": req.external_oid,
        });
        if let Some(lev) = req.leverage {
            payload["leverage"] = serde_json::json!(lev);
        }

        let param_str = payload.to_string();
        let req_time = timestamp_ms();
        let sig = sign_request(&self.api_secret, &self.api_key, req_time, &param_str);

        let body: serde_json::Value = self
            .http
            .post(format!("{}/api/v1/private/order/submit", self.base))
            .header("ApiKey", &self.api_key)
            .header("Request-Time", req_time.to_string())
            .header("Signature", sig)
            .header("Content-Type", "application/json")
            .body(param_str)
            .send()
            .await?
            .json()
            .await?;

        Self::check_envelope(&body)?;
        match extract_order_id(&body) {
            Some(order_id) => Ok(OrderAck { order_id }),
            None => Err(VenueError::MissingOrderId(body.to_string())),
        }
    }

    async fn open_positions(&self, symbol: &str) -> Result<Vec<VenuePosition>, VenueError> {
        let body = self
            .signed_get(
                "/api/v1/private/position/open_positions",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        Self::check_envelope(&body)?;
        decode_positions(&body)
    }

    async fn contract_detail(&self, symbol: &str) -> Result<ContractDetail, VenueError> {
        let body: serde_json::Value = self
            .http
            .get(format!("{}/api/v1/contract/detail", self.base))
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .json()
            .await?;
        decode_contract(&body, symbol)
    }

    async fn order_fee(&self, order_id: u64, symbol: &str) -> Result<f64, VenueError> {
        let body = self
            .signed_get(
                &format!("/api/v1/private/order/get/{order_id}"),
                &[("symbol", symbol.to_string())],
            )
            .await?;
        Self::check_envelope(&body)?;
        Ok(decode_fee(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_id_from_all_observed_shapes() {
        assert_eq!(extract_order_id(&json!(12345)), Some(12345));
        assert_eq!(extract_order_id(&json!({"orderId": 7})), Some(7));
        assert_eq!(extract_order_id(&json!({"id": "42"})), Some(42));
        assert_eq!(extract_order_id(&json!({"data": 9})), Some(9));
        assert_eq!(
            extract_order_id(&json!({"data": {"data": {"orderId": "314"}}})),
            Some(314)
        );
        assert_eq!(extract_order_id(&json!({"success": true})), None);
    }

    #[test]
    fn positions_from_all_nesting_levels() {
        let pos = json!({
            "positionId": 1, "symbol": "BTC_USDT", "holdVol": 61.0,
            "positionType": 1, "leverage": 20, "openAvgPrice": 100.0
        });
        for body in [
            json!([pos]),
            json!({"success": true, "code": 0, "data": [pos]}),
            json!({"data": {"data": [pos]}}),
        ] {
            let decoded = decode_positions(&body).unwrap();
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].position_id, 1);
            assert_eq!(decoded[0].side(), Some(crate::domain::PositionSide::Long));
            assert_eq!(decoded[0].leverage, Some(20));
        }
    }

    #[test]
    fn contract_detail_filters_arrays_by_symbol() {
        let body = json!({"data": [
            {"symbol": "ETH_USDT", "priceScale": 2, "volScale": 0, "contractSize": 10.0, "volUnit": 1.0},
            {"symbol": "BTC_USDT", "priceScale": 1, "volScale": 0, "contractSize": 100.0, "volUnit": 1.0},
        ]});
        let d = decode_contract(&body, "BTC_USDT").unwrap();
        assert_eq!(d.contract_size, 100.0);
        assert!(decode_contract(&body, "SOL_USDT").is_err());
    }

    #[test]
    fn fee_aliases_and_absence() {
        assert_eq!(decode_fee(&json!({"data": {"fee": 0.12}})), 0.12);
        assert_eq!(decode_fee(&json!({"data": {"commission": "0.5"}})), 0.5);
        assert_eq!(decode_fee(&json!({"data": {"feeAmount": 1.25}})), 1.25);
        assert_eq!(decode_fee(&json!({"data": {}})), 0.0);
        assert_eq!(decode_fee(&json!({})), 0.0);
    }

    #[test]
    fn intent_codes_match_contract_api() {
        assert_eq!(OrderIntent::open(PositionSide::Long).code(), 1);
        assert_eq!(OrderIntent::open(PositionSide::Short).code(), 3);
        assert_eq!(OrderIntent::close(PositionSide::Long).code(), 4);
        assert_eq!(OrderIntent::close(PositionSide::Short).code(), 2);
    }
}
