// ─────────────────────────────────────────────────────────────────────────────
// session.rs — Exchange Session Manager for the lagger venue.
//
// Exactly one authenticated, subscribed, heartbeated WebSocket connection.
// Reconnect-on-any-error, same discipline as the reference's leader-venue WS
// client, generalized to HMAC auth and to surfacing typed private events
// instead of updating a shared buffer directly.
// ─────────────────────────────────────────────────────────────────────────────
use crate::signing;
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    AuthOk,
    BookL1 {
        symbol: String,
        best_bid: f64,
        bid_qty: f64,
        best_ask: f64,
        ask_qty: f64,
    },
    OrderUpdate(crate::rest::Order),
    PositionUpdate(crate::rest::PositionSnapshot),
    PositionSnapshot(Vec<crate::rest::PositionSnapshot>),
    Heartbeat,
    Disconnected,
}

/// Connection-derived flags.
/// `in_flight_intent`/`cooling_down`/anchor bookkeeping live in the
/// Dispatcher's gating state (`strategy::GatingState`) — those are per-asset
/// strategy concerns, not connection concerns.
#[derive(Debug)]
pub struct SessionState {
    pub authenticated: AtomicBool,
    pub book_ready: AtomicBool,
    pub state_synced: AtomicBool,
}

impl SessionState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            authenticated: AtomicBool::new(false),
            book_ready: AtomicBool::new(false),
            state_synced: AtomicBool::new(false),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
            && self.book_ready.load(Ordering::SeqCst)
            && self.state_synced.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
        self.book_ready.store(false, Ordering::SeqCst);
        self.state_synced.store(false, Ordering::SeqCst);
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Runs forever: connect, auth, subscribe, pump events, reconnect on any
/// error with `reconnect_interval` between attempts.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    ws_url: String,
    api_key: String,
    api_secret: String,
    product_symbol: String,
    reconnect_interval_secs: u64,
    ping_interval_secs: u64,
    heartbeat_timeout_secs: u64,
    state: Arc<SessionState>,
    events_tx: mpsc::Sender<SessionEvent>,
) {
    loop {
        info!("session: connecting to {}", ws_url);
        match run_once(
            &ws_url,
            &api_key,
            &api_secret,
            &product_symbol,
            ping_interval_secs,
            heartbeat_timeout_secs,
            &state,
            &events_tx,
        )
        .await
        {
            Ok(()) => {}
            Err(e) => error!("session: connection ended: {}", e),
        }
        state.invalidate();
        let _ = events_tx.send(SessionEvent::Disconnected).await;
        tokio::time::sleep(std::time::Duration::from_secs(reconnect_interval_secs)).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    ws_url: &str,
    api_key: &str,
    api_secret: &str,
    product_symbol: &str,
    ping_interval_secs: u64,
    heartbeat_timeout_secs: u64,
    state: &Arc<SessionState>,
    events_tx: &mpsc::Sender<SessionEvent>,
) -> Result<(), String> {
    let url = Url::parse(ws_url).map_err(|e| e.to_string())?;
    let (ws_stream, _) = connect_async(url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws_stream.split();

    // Authentication frame: signature = HMAC_SHA256(secret, "GET" || ts || "/live").
    let ts = now_secs();
    let sig = signing::sign_request("GET", ts, "/live", None, None, api_secret);
    let auth_frame = serde_json::json!({
        "type": "auth",
        "payload": { "api_key": api_key, "timestamp_seconds": ts, "signature": sig },
    });
    write
        .send(Message::Text(auth_frame.to_string()))
        .await
        .map_err(|e| e.to_string())?;

    let mut last_pong = std::time::Instant::now();
    let mut ping_ticker = tokio::time::interval(std::time::Duration::from_secs(ping_interval_secs));

    loop {
        tokio::select! {
            _ = ping_ticker.tick() => {
                if write.send(Message::Text(serde_json::json!({"type":"ping"}).to_string())).await.is_err() {
                    return Err("ping send failed".to_string());
                }
                if last_pong.elapsed().as_secs() > heartbeat_timeout_secs {
                    warn!("session: heartbeat watchdog expired, terminating socket");
                    return Err("heartbeat timeout".to_string());
                }
            }
            msg = read.next() => {
                let msg = match msg {
                    Some(m) => m,
                    None => return Err("stream ended".to_string()),
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        last_pong = std::time::Instant::now();
                        if let Some(after_auth) = handle_text(&text, product_symbol, state, events_tx).await {
                            if after_auth {
                                subscribe_private_channels(&mut write, product_symbol).await?;
                            }
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        last_pong = std::time::Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = std::time::Instant::now();
                    }
                    Ok(Message::Close(_)) => return Err("closed by server".to_string()),
                    Err(e) => return Err(e.to_string()),
                    _ => {}
                }
            }
        }
    }
}

async fn subscribe_private_channels(
    write: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    product_symbol: &str,
) -> Result<(), String> {
    let frame = serde_json::json!({
        "type": "subscribe",
        "payload": {
            "channels": [
                {"name": "orders", "symbols": []},
                {"name": "positions", "symbols": []},
                {"name": "l1_orderbook", "symbols": [product_symbol]},
            ]
        }
    });
    write.send(Message::Text(frame.to_string())).await.map_err(|e| e.to_string())
}

/// Parses one inbound frame, updates `state`, forwards typed events. Returns
/// `Some(true)` when this frame is the auth success that should trigger
/// subscription, otherwise `None`/`Some(false)`.
async fn handle_text(
    text: &str,
    product_symbol: &str,
    state: &Arc<SessionState>,
    events_tx: &mpsc::Sender<SessionEvent>,
) -> Option<bool> {
    let parsed: Value = serde_json::from_str(text).ok()?;
    let msg_type = parsed["type"].as_str().unwrap_or("");

    match msg_type {
        "success" if parsed["message"].as_str() == Some("Authenticated") => {
            state.authenticated.store(true, Ordering::SeqCst);
            let _ = events_tx.send(SessionEvent::AuthOk).await;
            return Some(true);
        }
        "heartbeat" | "pong" => {
            let _ = events_tx.send(SessionEvent::Heartbeat).await;
        }
        "l1_orderbook" => {
            if let (Some(bid), Some(bid_qty), Some(ask), Some(ask_qty)) = (
                parsed["best_bid"].as_f64(),
                parsed["bid_qty"].as_f64(),
                parsed["best_ask"].as_f64(),
                parsed["ask_qty"].as_f64(),
            ) {
                let symbol = parsed["symbol"].as_str().unwrap_or(product_symbol).to_string();
                state.book_ready.store(true, Ordering::SeqCst);
                let _ = events_tx
                    .send(SessionEvent::BookL1 { symbol, best_bid: bid, bid_qty, best_ask: ask, ask_qty })
                    .await;
            }
        }
        "orders" => {
            if let Some(arr) = parsed["data"].as_array() {
                for o in arr {
                    if let Ok(order) = serde_json::from_value::<crate::rest::Order>(o.clone()) {
                        let _ = events_tx.send(SessionEvent::OrderUpdate(order)).await;
                    }
                }
            }
        }
        "positions" => {
            if let Ok(position) = serde_json::from_value::<crate::rest::PositionSnapshot>(parsed.clone()) {
                state.state_synced.store(true, Ordering::SeqCst);
                let _ = events_tx.send(SessionEvent::PositionUpdate(position)).await;
            }
        }
        _ => {}
    }
    None
}
