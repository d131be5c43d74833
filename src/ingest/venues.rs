// ─────────────────────────────────────────────────────────────────────────────
// ingest/venues.rs — per-venue leader adapters.
//
// Each venue gets its own reconnect loop with the same bounded exponential
// backoff (base 5s, cap 60s), the same dialect-specific subscribe frame, and
// the same responsibility: translate wire messages into TickEvents and write
// them into the shared coalescing map. A venue flapping never touches the
// others — each runs as an independent task with its own socket.
// ─────────────────────────────────────────────────────────────────────────────
use super::{coalesce, AggressorSide, CoalescingMap, TickEvent};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

const BACKOFF_BASE_SECS: u64 = 5;
const BACKOFF_CAP_SECS: u64 = 60;

/// Incremental Gate.io-style book with `U/u` sequence gap detection.
/// A gap beyond `last_u+1` invalidates the book until a fresh snapshot is
/// absorbed; ticks are suppressed in the meantime.
struct GateioBook {
    bids: BTreeMap<u64, f64>, // price bits -> qty, keyed descending via Reverse at read time
    asks: BTreeMap<u64, f64>,
    last_u: Option<u64>,
    ready: bool,
}

impl GateioBook {
    fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_u: None,
            ready: false,
        }
    }

    fn price_key(p: f64) -> u64 {
        p.to_bits()
    }

    fn apply_snapshot(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)], u: u64) {
        self.bids.clear();
        self.asks.clear();
        for (p, q) in bids {
            self.bids.insert(Self::price_key(*p), *q);
        }
        for (p, q) in asks {
            self.asks.insert(Self::price_key(*p), *q);
        }
        self.last_u = Some(u);
        self.ready = true;
    }

    /// Returns false (and invalidates) on a detected gap.
    fn apply_delta(&mut self, bids: &[(f64, f64)], asks: &[(f64, f64)], u: u64, prev_u: u64) -> bool {
        match self.last_u {
            Some(last) if prev_u != last + 1 && prev_u != last => {
                self.ready = false;
                self.last_u = None;
                return false;
            }
            None => {
                self.ready = false;
                return false;
            }
            _ => {}
        }
        for (p, q) in bids {
            if *q == 0.0 {
                self.bids.remove(&Self::price_key(*p));
            } else {
                self.bids.insert(Self::price_key(*p), *q);
            }
        }
        for (p, q) in asks {
            if *q == 0.0 {
                self.asks.remove(&Self::price_key(*p));
            } else {
                self.asks.insert(Self::price_key(*p), *q);
            }
        }
        self.last_u = Some(u);
        true
    }

    fn top_n(&self, n: usize) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
        let bids: Vec<(f64, f64)> = self
            .bids
            .iter()
            .rev()
            .take(n)
            .map(|(k, q)| (f64::from_bits(*k), *q))
            .collect();
        let asks: Vec<(f64, f64)> = self
            .asks
            .iter()
            .take(n)
            .map(|(k, q)| (f64::from_bits(*k), *q))
            .collect();
        (bids, asks)
    }
}

fn subscribe_frame(venue: &str, assets: &[String]) -> Value {
    match venue {
        "bybit" => serde_json::json!({
            "op": "subscribe",
            "args": assets.iter().flat_map(|a| vec![
                format!("publicTrade.{}", a),
                format!("orderbook.1.{}", a),
            ]).collect::<Vec<_>>(),
        }),
        "binance" => serde_json::json!({
            "method": "SUBSCRIBE",
            "params": assets.iter().map(|a| format!("{}@aggTrade", a.to_lowercase())).collect::<Vec<_>>(),
            "id": 1,
        }),
        "okx" => serde_json::json!({
            "op": "subscribe",
            "args": assets.iter().map(|a| serde_json::json!({"channel": "tickers", "instId": a})).collect::<Vec<_>>(),
        }),
        "gateio" => serde_json::json!({
            "time": chrono::Utc::now().timestamp(),
            "channel": "futures.order_book_update",
            "event": "subscribe",
            "payload": assets,
        }),
        "bitget" => serde_json::json!({
            "op": "subscribe",
            "args": assets.iter().map(|a| serde_json::json!({"instType": "mc", "channel": "ticker", "instId": a})).collect::<Vec<_>>(),
        }),
        _ => serde_json::json!({}),
    }
}

fn parse_f64(v: &Value) -> Option<f64> {
    v.as_str().and_then(|s| s.parse().ok()).or_else(|| v.as_f64())
}

fn parse_level_pairs(arr: &[Value]) -> Vec<(f64, f64)> {
    arr.iter()
        .filter_map(|lvl| {
            let a = lvl.as_array()?;
            let p = parse_f64(a.get(0)?)?;
            let q = parse_f64(a.get(1)?)?;
            Some((p, q))
        })
        .collect()
}

/// Returns `Some(contract)` when a Gate.io sequence gap was just detected
/// and that contract needs a fresh subscribe + snapshot.
async fn handle_text(
    venue: &str,
    text: &str,
    map: &CoalescingMap,
    gateio_books: &mut std::collections::HashMap<String, GateioBook>,
) -> Option<String> {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return None,
    };

    match venue {
        "bybit" => {
            let topic = parsed["topic"].as_str().unwrap_or("");
            if topic.starts_with("publicTrade.") {
                let asset = topic.trim_start_matches("publicTrade.").to_string();
                if let Some(arr) = parsed["data"].as_array() {
                    for t in arr {
                        if let (Some(price), Some(size)) = (parse_f64(&t["p"]), parse_f64(&t["v"])) {
                            let side = match t["S"].as_str() {
                                Some("Buy") => Some(AggressorSide::Buy),
                                Some("Sell") => Some(AggressorSide::Sell),
                                _ => None,
                            };
                            coalesce(map, TickEvent::trade(&asset, "bybit", price, size, side)).await;
                        }
                    }
                }
            } else if topic.starts_with("orderbook.1.") {
                let asset = topic.trim_start_matches("orderbook.1.").to_string();
                let data = &parsed["data"];
                let bids = data["b"].as_array().map(|a| parse_level_pairs(a)).unwrap_or_default();
                let asks = data["a"].as_array().map(|a| parse_level_pairs(a)).unwrap_or_default();
                if let (Some((bp, bq)), Some((ap, aq))) = (bids.first(), asks.first()) {
                    coalesce(map, TickEvent::depth_l1(&asset, "bybit", *bp, *bq, *ap, *aq)).await;
                }
            }
        }
        "binance" => {
            if parsed["e"].as_str() == Some("aggTrade") {
                if let (Some(sym), Some(price), Some(size)) =
                    (parsed["s"].as_str(), parse_f64(&parsed["p"]), parse_f64(&parsed["q"]))
                {
                    let aggressor = parsed["m"].as_bool().map(|maker_is_seller| {
                        if maker_is_seller { AggressorSide::Buy } else { AggressorSide::Sell }
                    });
                    coalesce(map, TickEvent::trade(sym, "binance", price, size, aggressor)).await;
                }
            }
        }
        "okx" => {
            if let Some(arr) = parsed["data"].as_array() {
                for t in arr {
                    if let (Some(inst), Some(bid), Some(bid_qty), Some(ask), Some(ask_qty)) = (
                        t["instId"].as_str(),
                        parse_f64(&t["bidPx"]),
                        parse_f64(&t["bidSz"]),
                        parse_f64(&t["askPx"]),
                        parse_f64(&t["askSz"]),
                    ) {
                        coalesce(map, TickEvent::depth_l1(inst, "okx", bid, bid_qty, ask, ask_qty)).await;
                    }
                }
            }
        }
        "gateio" => {
            let event = parsed["event"].as_str().unwrap_or("");
            if event == "update" || event == "all" {
                let result = &parsed["result"];
                let contract = result["s"].as_str().or_else(|| result["contract"].as_str()).unwrap_or("").to_string();
                if contract.is_empty() {
                    return None;
                }
                let book = gateio_books.entry(contract.clone()).or_insert_with(GateioBook::new);
                let bids = result["b"].as_array().or_else(|| result["bids"].as_array()).map(|a| parse_level_pairs(a)).unwrap_or_default();
                let asks = result["a"].as_array().or_else(|| result["asks"].as_array()).map(|a| parse_level_pairs(a)).unwrap_or_default();
                let u = result["u"].as_u64().unwrap_or(0);

                let applied = if event == "all" {
                    book.apply_snapshot(&bids, &asks, u);
                    true
                } else {
                    let prev_u = result["U"].as_u64().unwrap_or(0);
                    book.apply_delta(&bids, &asks, u, prev_u)
                };

                if !applied {
                    warn!("ingest(gateio): sequence gap on {}, resubscribing", contract);
                    return Some(contract);
                }
                if book.ready {
                    let (top_bids, top_asks) = book.top_n(20);
                    coalesce(map, TickEvent::depth_ln(&contract, "gateio", top_bids, top_asks)).await;
                }
            }
        }
        "bitget" => {
            if let Some(arr) = parsed["data"].as_array() {
                for t in arr {
                    if let (Some(inst), Some(bid), Some(bid_qty), Some(ask), Some(ask_qty)) = (
                        t["instId"].as_str(),
                        parse_f64(&t["bestBid"]),
                        parse_f64(&t["bidSz"]),
                        parse_f64(&t["bestAsk"]),
                        parse_f64(&t["askSz"]),
                    ) {
                        coalesce(map, TickEvent::depth_l1(inst, "bitget", bid, bid_qty, ask, ask_qty)).await;
                    }
                }
            }
        }
        _ => {}
    }
    None
}

/// Per-venue sub-state machine: `Disconnected -> Connecting ->
/// Subscribing -> Live -> {Disconnected}`, looping forever with bounded
/// exponential backoff between attempts.
pub async fn run_leader_venue(venue: &str, ws_url: &str, assets: &[String], map: CoalescingMap) {
    let mut backoff = BACKOFF_BASE_SECS;
    let mut gateio_books: std::collections::HashMap<String, GateioBook> = std::collections::HashMap::new();

    loop {
        info!("ingest({}): connecting to {}", venue, ws_url);
        let url = match Url::parse(ws_url) {
            Ok(u) => u,
            Err(e) => {
                error!("ingest({}): invalid ws url: {}", venue, e);
                return;
            }
        };

        match connect_async(url).await {
            Ok((ws_stream, _)) => {
                info!("ingest({}): connected", venue);
                backoff = BACKOFF_BASE_SECS;
                let (mut write, mut read) = ws_stream.split();

                let sub = subscribe_frame(venue, assets);
                if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                    error!("ingest({}): subscribe failed: {}", venue, e);
                }

                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Some(contract) = handle_text(venue, &text, &map, &mut gateio_books).await {
                                let resub = subscribe_frame(venue, &[contract]);
                                if let Err(e) = write.send(Message::Text(resub.to_string())).await {
                                    error!("ingest({}): resubscribe failed: {}", venue, e);
                                }
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            warn!("ingest({}): closed by server, reconnecting", venue);
                            break;
                        }
                        Err(e) => {
                            error!("ingest({}): ws error: {}, reconnecting", venue, e);
                            break;
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => {
                error!("ingest({}): connect failed: {}, retrying in {}s", venue, e, backoff);
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
        backoff = std::cmp::min(backoff * 2, BACKOFF_CAP_SECS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateio_book_rejects_gap_and_requires_resnapshot() {
        let mut book = GateioBook::new();
        book.apply_snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], 10);
        assert!(book.ready);

        // prev_u should equal last_u (10) or last_u+1; 12 is a gap.
        let ok = book.apply_delta(&[(100.5, 2.0)], &[], 13, 12);
        assert!(!ok);
        assert!(!book.ready);
    }

    #[test]
    fn gateio_book_accepts_contiguous_delta() {
        let mut book = GateioBook::new();
        book.apply_snapshot(&[(100.0, 1.0)], &[(101.0, 1.0)], 10);
        let ok = book.apply_delta(&[(100.5, 2.0)], &[], 11, 10);
        assert!(ok);
        assert!(book.ready);
        let (bids, _) = book.top_n(10);
        assert!(bids.iter().any(|(p, q)| *p == 100.5 && *q == 2.0));
    }

    #[tokio::test]
    async fn handle_text_signals_resubscribe_on_gateio_gap() {
        let map = super::super::new_coalescing_map();
        let mut books: std::collections::HashMap<String, GateioBook> = std::collections::HashMap::new();

        let snapshot = serde_json::json!({
            "event": "all",
            "result": {"s": "BTC_USDT", "b": [["100.0", "1.0"]], "a": [["101.0", "1.0"]], "u": 10}
        });
        let out = handle_text("gateio", &snapshot.to_string(), &map, &mut books).await;
        assert_eq!(out, None);

        let gapped_delta = serde_json::json!({
            "event": "update",
            "result": {"s": "BTC_USDT", "b": [], "a": [], "u": 13, "U": 12}
        });
        let out = handle_text("gateio", &gapped_delta.to_string(), &map, &mut books).await;
        assert_eq!(out, Some("BTC_USDT".to_string()));
        assert!(!books.get("BTC_USDT").unwrap().ready);
    }

    #[test]
    fn gateio_book_zero_qty_delta_removes_level() {
        let mut book = GateioBook::new();
        book.apply_snapshot(&[(100.0, 1.0), (99.5, 3.0)], &[], 10);
        book.apply_delta(&[(100.0, 0.0)], &[], 11, 10);
        let (bids, _) = book.top_n(10);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].0, 99.5);
    }
}
