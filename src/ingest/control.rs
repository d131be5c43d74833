// ─────────────────────────────────────────────────────────────────────────────
// ingest/control.rs — local control-plane WS listener.
//
// Lets a separate price-ingestion process stream ticks into this engine over
// a plain local WebSocket instead of an outbound venue connection. Frames
// that don't match `{type:"S", p, s?, x?}` are ignored, never torn down.
// ─────────────────────────────────────────────────────────────────────────────
use super::{coalesce, CoalescingMap, TickEvent};
use futures_util::StreamExt;
use log::{info, warn};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

const DEFAULT_SOURCE: &str = "control";
const DEFAULT_ASSET: &str = "*";

pub async fn run_control_plane(port: u16, map: CoalescingMap) {
    let addr = format!("127.0.0.1:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("ingest(control): failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("ingest(control): listening on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("ingest(control): accept failed: {}", e);
                continue;
            }
        };
        let map = map.clone();
        tokio::spawn(async move {
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("ingest(control): handshake with {} failed: {}", peer, e);
                    return;
                }
            };
            let (_write, mut read) = ws.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => handle_frame(&text, &map).await,
                    Ok(Message::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
        });
    }
}

async fn handle_frame(text: &str, map: &CoalescingMap) {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };
    if parsed["type"].as_str() != Some("S") {
        return;
    }
    let price = match parsed["p"].as_f64() {
        Some(p) => p,
        None => return,
    };
    let asset = parsed["s"].as_str().unwrap_or(DEFAULT_ASSET).to_string();
    let source = parsed["x"].as_str().unwrap_or(DEFAULT_SOURCE).to_string();

    coalesce(map, TickEvent::trade(&asset, &source, price, 0.0, None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::new_coalescing_map;

    #[tokio::test]
    async fn malformed_frame_is_ignored() {
        let map = new_coalescing_map();
        handle_frame("not json", &map).await;
        handle_frame(r#"{"type":"other"}"#, &map).await;
        assert!(map.lock().await.is_empty());
    }

    #[tokio::test]
    async fn valid_frame_is_coalesced() {
        let map = new_coalescing_map();
        handle_frame(r#"{"type":"S","p":100.5,"s":"BTC","x":"custom"}"#, &map).await;
        let guard = map.lock().await;
        assert_eq!(guard.len(), 1);
        let event = guard.get(&("BTC".to_string(), "custom".to_string())).unwrap();
        assert_eq!(event.price, Some(100.5));
    }
}
