// ─────────────────────────────────────────────────────────────────────────────
// rest.rs — Signed REST Client
//
// One-shot request/response against the lagger venue, HMAC-signed, with
// retry/backoff and the batch-cancel/list/positions/leverage/cancel-on-
// disconnect helpers the rest of the engine needs.
// ─────────────────────────────────────────────────────────────────────────────
use crate::signing;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited,
    #[error("exchange rejected request: {code}: {message}")]
    Exchange { code: String, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

// ─── Wire types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    fn wire(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    PostOnly,
}

impl TimeInForce {
    fn wire(self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::PostOnly => "POST_ONLY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMethod {
    LastTrade,
    Mark,
}

impl TriggerMethod {
    fn wire(self) -> &'static str {
        match self {
            TriggerMethod::LastTrade => "last_traded_price",
            TriggerMethod::Mark => "mark_price",
        }
    }
}

/// An order type and its price parameters.
#[derive(Debug, Clone, Copy)]
pub enum OrderType {
    Market,
    Limit(f64),
    StopMarket(f64),
    /// Trailing stop. Sign convention: negative for a buy-side trailing stop
    /// (trails below the market), positive for sell-side (trails above) —
    /// confirm empirically against the venue.
    TrailingStop(f64),
}

#[derive(Debug, Clone)]
pub struct BracketSpec {
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub trail_amount: Option<f64>,
    pub trigger: TriggerMethod,
}

/// Constructed by a Strategy, consumed by the Dispatcher and translated here
/// into the venue's `/orders` JSON body.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub product_id: u64,
    pub side: Side,
    pub size: f64,
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub client_order_id: String,
    pub bracket: Option<BracketSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub id: u64,
    pub client_order_id: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub id: u64,
    pub client_order_id: Option<String>,
    pub product_id: u64,
    pub state: String,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub parent_client_order_id: Option<String>,
    #[serde(default)]
    pub stop_order_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionSnapshot {
    #[serde(default)]
    pub product_id: u64,
    #[serde(default)]
    pub product_symbol: Option<String>,
    pub size: f64,
    #[serde(default)]
    pub entry_price: f64,
}

/// Venue envelope: `{success, result, error}`. A non-`success` response is
/// always an error; callers must never assume `result` is present.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct SignedRestClient {
    base_url: String,
    api_key: String,
    api_secret: String,
    http: reqwest::Client,
}

const MAX_ATTEMPTS: u32 = 3;
const BATCH_CHUNK_SIZE: usize = 20;

impl SignedRestClient {
    pub fn new(base_url: String, api_key: String, api_secret: String) -> Self {
        Self {
            base_url,
            api_key,
            api_secret,
            http: reqwest::Client::new(),
        }
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Signs and sends one request, retrying on 5xx/406 with exponential
    /// backoff (500ms × 2^(attempt-1), up to 3 attempts total). All other
    /// errors are surfaced immediately with the server's JSON error body
    /// attached.
    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: Option<&[(String, String)]>,
        body: Option<&str>,
    ) -> Result<T, RestError> {
        let mut attempt = 1u32;
        loop {
            let ts = Self::now_secs();
            let sig = signing::sign_request(
                method.as_str(),
                ts,
                path,
                query,
                body,
                &self.api_secret,
            );

            let url = format!("{}{}", self.base_url, path);
            let mut req = self.http.request(method.clone(), &url);
            if let Some(q) = query {
                req = req.query(q);
            }
            if let Some(b) = body {
                req = req.header("Content-Type", "application/json").body(b.to_string());
            }
            req = req
                .header("api-key", &self.api_key)
                .header("timestamp", ts.to_string())
                .header("signature", sig);

            let resp = req.send().await.map_err(|e| RestError::Network(e.to_string()))?;
            let status = resp.status();

            if status.as_u16() == 429 {
                return Err(RestError::RateLimited);
            }
            if (status.is_server_error() || status.as_u16() == 406) && attempt < MAX_ATTEMPTS {
                let delay_ms = 500u64 * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                attempt += 1;
                continue;
            }

            let text = resp.text().await.map_err(|e| RestError::Network(e.to_string()))?;
            let envelope: Envelope<T> = serde_json::from_str(&text)
                .map_err(|e| RestError::Malformed(format!("{}: {}", e, text)))?;

            if !envelope.success {
                let err = envelope.error.unwrap_or(EnvelopeError {
                    code: "unknown".to_string(),
                    message: text,
                });
                return Err(RestError::Exchange {
                    code: err.code,
                    message: err.message,
                });
            }

            return envelope
                .result
                .ok_or_else(|| RestError::Malformed("success with no result".to_string()));
        }
    }

    pub async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, RestError> {
        let body = build_order_body(intent);
        let body_str = serde_json::to_string(&body).map_err(|e| RestError::Malformed(e.to_string()))?;
        self.send(reqwest::Method::POST, "/orders", None, Some(&body_str)).await
    }

    /// DELETE `/orders/batch`, chunked in groups of 20.
    pub async fn cancel_orders_batch(&self, product_id: u64, exchange_ids: &[u64]) -> Result<(), RestError> {
        for chunk in exchange_ids.chunks(BATCH_CHUNK_SIZE) {
            let body = serde_json::json!({
                "product_id": product_id,
                "orders": chunk.iter().map(|id| serde_json::json!({"id": id})).collect::<Vec<_>>(),
            });
            let body_str = serde_json::to_string(&body).map_err(|e| RestError::Malformed(e.to_string()))?;
            match self
                .send::<serde_json::Value>(reqwest::Method::DELETE, "/orders/batch", None, Some(&body_str))
                .await
            {
                Ok(_) => {}
                Err(RestError::Exchange { code, .. }) if code == "open_order_not_found" => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Default states = {open, pending} when `states` is not given.
    pub async fn list_live_orders(
        &self,
        product_id: u64,
        states: Option<&[&str]>,
    ) -> Result<Vec<Order>, RestError> {
        let states_joined = states.unwrap_or(&["open", "pending"]).join(",");
        let query = vec![
            ("product_id".to_string(), product_id.to_string()),
            ("states".to_string(), states_joined),
        ];
        self.send(reqwest::Method::GET, "/orders", Some(&query), None).await
    }

    /// Composed of `list_live_orders` + `cancel_orders_batch`; idempotent —
    /// an empty live-orders list is a successful no-op, and a race where an
    /// order is already gone (`open_order_not_found`) is swallowed as
    /// success.
    pub async fn cancel_all(&self, product_id: u64) -> Result<(), RestError> {
        let live = self.list_live_orders(product_id, None).await?;
        if live.is_empty() {
            return Ok(());
        }
        let ids: Vec<u64> = live.iter().map(|o| o.id).collect();
        self.cancel_orders_batch(product_id, &ids).await
    }

    pub async fn get_positions(&self, product_id: Option<u64>) -> Result<Vec<PositionSnapshot>, RestError> {
        let query = product_id.map(|p| vec![("product_id".to_string(), p.to_string())]);
        self.send(reqwest::Method::GET, "/positions/margined", query.as_deref(), None)
            .await
    }

    pub async fn set_leverage(&self, product_id: u64, leverage: f64) -> Result<(), RestError> {
        let body = serde_json::json!({ "leverage": leverage });
        let body_str = serde_json::to_string(&body).map_err(|e| RestError::Malformed(e.to_string()))?;
        let path = format!("/products/{}/orders/leverage", product_id);
        self.send::<serde_json::Value>(reqwest::Method::POST, &path, None, Some(&body_str))
            .await?;
        Ok(())
    }

    pub async fn set_cancel_on_disconnect(&self, timeout_secs: u64) -> Result<(), RestError> {
        let body = serde_json::json!({ "cancel_after": timeout_secs });
        let body_str = serde_json::to_string(&body).map_err(|e| RestError::Malformed(e.to_string()))?;
        self.send::<serde_json::Value>(reqwest::Method::POST, "/orders/cancel_after", None, Some(&body_str))
            .await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct OrderBody {
    product_id: u64,
    size: String,
    side: &'static str,
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_order_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trail_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_trigger_method: Option<&'static str>,
    reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_in_force: Option<&'static str>,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket_take_profit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket_stop_loss_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket_trail_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bracket_stop_trigger_method: Option<&'static str>,
}

fn build_order_body(intent: &OrderIntent) -> OrderBody {
    let (order_type, limit_price, stop_price) = match intent.order_type {
        OrderType::Market => ("market_order", None, None),
        OrderType::Limit(p) => ("limit_order", Some(p.to_string()), None),
        OrderType::StopMarket(p) => ("stop_order", None, Some(p.to_string())),
        OrderType::TrailingStop(_) => ("stop_order", None, None),
    };
    let trail_amount = match intent.order_type {
        OrderType::TrailingStop(a) => Some(a.to_string()),
        _ => None,
    };
    let post_only = intent
        .time_in_force
        .map(|tif| matches!(tif, TimeInForce::PostOnly));

    OrderBody {
        product_id: intent.product_id,
        size: intent.size.to_string(),
        side: intent.side.wire(),
        order_type,
        limit_price,
        stop_price,
        stop_order_type: None,
        trail_amount,
        stop_trigger_method: None,
        reduce_only: intent.reduce_only,
        post_only,
        time_in_force: intent.time_in_force.map(|tif| tif.wire()),
        client_order_id: intent.client_order_id.clone(),
        bracket_take_profit_price: intent.bracket.as_ref().and_then(|b| b.tp_price).map(|p| p.to_string()),
        bracket_stop_loss_price: intent.bracket.as_ref().and_then(|b| b.sl_price).map(|p| p.to_string()),
        bracket_trail_amount: intent.bracket.as_ref().and_then(|b| b.trail_amount).map(|a| a.to_string()),
        bracket_stop_trigger_method: intent.bracket.as_ref().map(|b| b.trigger.wire()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_orders_query_matches_the_bytes_reqwest_actually_sends() {
        // `states` must be joined with a literal comma, not a pre-escaped
        // "%2C" — reqwest's own query encoder percent-encodes whatever raw
        // value it's handed, so a literal comma becomes %2C on the wire and
        // a pre-escaped %2C becomes %252C. The signed canonical string only
        // matches the wire bytes in the first case.
        let states_joined = ["open", "pending"].join(",");
        let query = vec![("states".to_string(), states_joined)];

        let mut url = url::Url::parse("https://example.invalid/orders").unwrap();
        url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        assert_eq!(url.query(), Some("states=open%2Cpending"));

        let canonical = signing::canonical_query(&query);
        assert_eq!(canonical, "states=open,pending");
    }

    #[test]
    fn batch_cancel_chunks_into_groups_of_20() {
        // 45 ids -> ceil(45/20) = 3 chunks of sizes 20, 20, 5.
        let ids: Vec<u64> = (0..45).collect();
        let chunks: Vec<&[u64]> = ids.chunks(BATCH_CHUNK_SIZE).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 20);
        assert_eq!(chunks[1].len(), 20);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn market_order_has_no_limit_price() {
        let intent = OrderIntent {
            product_id: 27,
            side: Side::Buy,
            size: 1.0,
            order_type: OrderType::Market,
            time_in_force: None,
            reduce_only: false,
            client_order_id: "cid-1".to_string(),
            bracket: None,
        };
        let body = build_order_body(&intent);
        assert_eq!(body.order_type, "market_order");
        assert!(body.limit_price.is_none());
    }

    #[test]
    fn limit_order_carries_price_and_bracket_fields() {
        let intent = OrderIntent {
            product_id: 27,
            side: Side::Buy,
            size: 1.0,
            order_type: OrderType::Limit(102.5),
            time_in_force: Some(TimeInForce::PostOnly),
            reduce_only: false,
            client_order_id: "cid-2".to_string(),
            bracket: Some(BracketSpec {
                tp_price: Some(202.5),
                sl_price: Some(52.5),
                trail_amount: None,
                trigger: TriggerMethod::LastTrade,
            }),
        };
        let body = build_order_body(&intent);
        assert_eq!(body.order_type, "limit_order");
        assert_eq!(body.limit_price.as_deref(), Some("102.5"));
        assert_eq!(body.post_only, Some(true));
        assert_eq!(body.bracket_take_profit_price.as_deref(), Some("202.5"));
        assert_eq!(body.bracket_stop_loss_price.as_deref(), Some("52.5"));
    }
}
