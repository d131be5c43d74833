// ─────────────────────────────────────────────────────────────────────────────
// strategy/mod.rs — Signal Dispatcher / Strategy Host.
//
// Gates every TickEvent against session invariants and cooldowns, then calls
// into a pluggable Strategy, then translates Strategy intents into
// OrderIntents dispatched via the Signed REST Client. The strategy only ever
// sees the narrow EngineFacade.
// ─────────────────────────────────────────────────────────────────────────────
pub mod momentum;
pub mod overlay;

use crate::config::EngineConfig;
use crate::ingest::{AggressorSide, TickEvent};
use crate::monitor::{FeedbackAction, MonitorConfig, PerformanceMonitor};
use crate::rest::{BracketSpec, OrderIntent, OrderType, Side, SignedRestClient, TimeInForce, TriggerMethod};
use crate::risk::{RiskConfig, RiskManager};
use crate::session::{SessionEvent, SessionState};
use crate::state::{OrderRole, OrderStore, Position, PositionBook, StateEffect};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use overlay::{OfiCalculator, SessionStats};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct L1Book {
    pub best_bid: f64,
    pub bid_qty: f64,
    pub best_ask: f64,
    pub ask_qty: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TradeSample {
    pub price: f64,
    pub size: f64,
}

/// Per-asset state machine fields: urgency-window anchor, in-flight/cooldown locks.
#[derive(Debug, Default)]
struct GatingState {
    anchor_price: Option<f64>,
    /// When `anchor_price` was (re)established. The urgency window is
    /// measured from here, not from whenever a breach happens to be
    /// observed — otherwise a tick that jumps straight past the threshold
    /// with no smaller intermediate tick would always measure ~0 elapsed
    /// and trigger no matter how stale the anchor actually is.
    anchor_set_at: Option<Instant>,
    in_flight_intent: bool,
    cooling_down: bool,
    cooldown_deadline: Option<Instant>,
}

/// The only surface a Strategy may use to affect the world. Never exposes
/// the session, the transport, or other assets' state. The risk overlay
/// (`risk`/`monitor`/`ofi`/`session_stats`) is read-only here — Dispatcher
/// is the sole writer, fed directly from ticks and order events.
pub struct EngineFacade<'a> {
    rest: &'a SignedRestClient,
    order_store: &'a mut OrderStore,
    position_book: &'a PositionBook,
    l1_books: &'a HashMap<String, L1Book>,
    product_id: u64,
    gating: &'a mut GatingState,
    risk: &'a RiskManager,
    monitor: &'a PerformanceMonitor,
    ofi: &'a OfiCalculator,
    session_stats: &'a SessionStats,
}

impl<'a> EngineFacade<'a> {
    pub fn get_l1_book(&self, asset: &str) -> Option<L1Book> {
        self.l1_books.get(asset).copied()
    }

    pub fn has_open_position(&self, asset: &str) -> bool {
        self.position_book.has_open_position(asset)
    }

    pub fn register_pending(&mut self, client_order_id: &str, role: OrderRole) {
        self.order_store.register_pending(client_order_id, role);
    }

    pub fn start_cooldown(&mut self, cooldown_secs: u64) {
        self.gating.cooling_down = true;
        self.gating.cooldown_deadline = Some(Instant::now() + std::time::Duration::from_secs(cooldown_secs));
    }

    /// Circuit-breaker check: kill switch, consecutive-loss halt, daily
    /// drawdown halt. A strategy should call this before any new entry.
    pub fn can_trade(&self) -> Result<(), String> {
        self.risk.can_trade()
    }

    /// True when recent taker flow is lopsided beyond `threshold` (fraction,
    /// e.g. 0.6), suggesting an entry here would be adverse-selected.
    pub fn should_suppress_entry(&self, threshold: f64) -> bool {
        self.ofi.should_suppress_entry(threshold)
    }

    /// Win-rate/profit-factor feedback over the trailing trade window.
    pub fn suggested_action(&self) -> FeedbackAction {
        self.monitor.get_metrics().suggested_action
    }

    pub fn cancel_fill_ratio(&self) -> f64 {
        self.session_stats.cancel_fill_ratio()
    }

    /// Intent translation: sets in_flight, registers the pending
    /// client_order_id, places the order, clears in_flight on either path.
    pub async fn place_order(&mut self, mut intent: OrderIntent) -> Result<String, String> {
        intent.product_id = self.product_id;
        let cid = intent.client_order_id.clone();
        self.gating.in_flight_intent = true;
        self.order_store.register_pending(&cid, role_of(&intent));

        match self.rest.place_order(&intent).await {
            Ok(ack) => {
                self.gating.in_flight_intent = false;
                info!("strategy: order placed cid={} exchange_id={}", cid, ack.id);
                Ok(cid)
            }
            Err(e) => {
                self.order_store.cancel_pending(&cid);
                self.gating.in_flight_intent = false;
                warn!("strategy: place_order failed for {}: {}", cid, e);
                Err(e.to_string())
            }
        }
    }
}

fn role_of(intent: &OrderIntent) -> OrderRole {
    if intent.bracket.is_some() {
        OrderRole::Main
    } else {
        OrderRole::Reduce
    }
}

#[async_trait]
pub trait Strategy: Send {
    async fn on_depth_update(&mut self, asset: &str, book: L1Book, facade: &mut EngineFacade<'_>);
    async fn on_trade(&mut self, asset: &str, trade: TradeSample, facade: &mut EngineFacade<'_>);
    /// Urgency-window entry signal: fired once the gating
    /// rules have already confirmed a qualifying, timely price move.
    async fn on_price_update(&mut self, asset: &str, price: f64, price_diff: f64, facade: &mut EngineFacade<'_>);
    async fn on_position_update(&mut self, asset: &str, position: &Position);
    async fn on_order_update(&mut self, client_order_id: &str, state: &str);
    fn name(&self) -> &str;
}

fn new_client_order_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct Dispatcher {
    config: EngineConfig,
    rest: SignedRestClient,
    session_state: Arc<SessionState>,
    order_store: OrderStore,
    position_book: PositionBook,
    l1_books: HashMap<String, L1Book>,
    gating: HashMap<String, GatingState>,
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    monitor: PerformanceMonitor,
    ofi: OfiCalculator,
    session_stats: SessionStats,
    running_balance: f64,
}

impl Dispatcher {
    pub fn new(
        config: EngineConfig,
        rest: SignedRestClient,
        session_state: Arc<SessionState>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        let risk_config = RiskConfig {
            max_daily_drawdown_percent: config.max_daily_drawdown_percent,
            max_consecutive_losses: config.max_consecutive_losses,
            trading_halt_duration_secs: config.trading_halt_duration_secs,
        };
        let monitor_config = MonitorConfig {
            window_size: config.monitor_window_size,
            min_trades_for_action: config.monitor_min_trades_for_action,
            pf_threshold_warning: config.pf_threshold_warning,
            pf_threshold_critical: config.pf_threshold_critical,
        };
        let starting_balance = config.starting_balance;
        Self {
            risk: RiskManager::new(risk_config, starting_balance),
            monitor: PerformanceMonitor::new(monitor_config),
            ofi: OfiCalculator::new(config.ofi_window_size),
            session_stats: SessionStats { starting_balance, ..Default::default() },
            running_balance: starting_balance,
            config,
            rest,
            session_state,
            order_store: OrderStore::new(),
            position_book: PositionBook::new(),
            l1_books: HashMap::new(),
            gating: HashMap::new(),
            strategy,
        }
    }

    fn is_target_asset(&self, asset: &str) -> bool {
        asset == self.config.product_symbol
    }

    /// Gating rules applied in order.
    pub async fn handle_tick(&mut self, tick: TickEvent) {
        // Rule 1: session invariants.
        if !self.session_state.is_ready() {
            debug!("dispatcher: dropping tick for {} — session not ready", tick.asset);
            return;
        }
        // Rule 2: configured target only.
        if !self.is_target_asset(&tick.asset) {
            return;
        }

        if let (Some(bid), Some(ask)) = (tick.bid, tick.ask) {
            self.l1_books.insert(
                tick.asset.clone(),
                L1Book { best_bid: bid, bid_qty: tick.bid_qty.unwrap_or(0.0), best_ask: ask, ask_qty: tick.ask_qty.unwrap_or(0.0) },
            );
        }

        let price = match tick.price.or(tick.bid).or(tick.ask) {
            Some(p) => p,
            None => return,
        };

        if let (Some(size), Some(aggressor)) = (tick.size, tick.aggressor_side) {
            self.ofi.record(aggressor == AggressorSide::Buy, price * size);
        }

        let asset = tick.asset.clone();
        let has_position = self.position_book.has_open_position(&asset);

        // Rule 3: initialize anchor on first admitted tick.
        let anchor_is_new = {
            let gating = self.gating.entry(asset.clone()).or_insert_with(GatingState::default);
            if gating.anchor_price.is_none() {
                gating.anchor_price = Some(price);
                gating.anchor_set_at = Some(Instant::now());
                true
            } else {
                false
            }
        };
        if anchor_is_new {
            return;
        }

        // Rule 4: forward directly when holding a position, skip entry logic.
        if has_position {
            let book = self.l1_books.get(&asset).copied();
            if let Some(book) = book {
                let gating = self.gating.entry(asset.clone()).or_insert_with(GatingState::default);
                let mut facade = EngineFacade {
                    rest: &self.rest,
                    order_store: &mut self.order_store,
                    position_book: &self.position_book,
                    l1_books: &self.l1_books,
                    product_id: self.config.product_id,
                    gating,
                    risk: &self.risk,
                    monitor: &self.monitor,
                    ofi: &self.ofi,
                    session_stats: &self.session_stats,
                };
                self.strategy.on_depth_update(&asset, book, &mut facade).await;
            }
            if let Some(size) = tick.size {
                let gating = self.gating.entry(asset.clone()).or_insert_with(GatingState::default);
                let mut facade = EngineFacade {
                    rest: &self.rest,
                    order_store: &mut self.order_store,
                    position_book: &self.position_book,
                    l1_books: &self.l1_books,
                    product_id: self.config.product_id,
                    gating,
                    risk: &self.risk,
                    monitor: &self.monitor,
                    ofi: &self.ofi,
                    session_stats: &self.session_stats,
                };
                self.strategy.on_trade(&asset, TradeSample { price, size }, &mut facade).await;
            }
            return;
        }

        // Rule 5: in-flight/cooldown lock.
        {
            let gating = self.gating.get_mut(&asset).unwrap();
            if let Some(deadline) = gating.cooldown_deadline {
                if Instant::now() >= deadline {
                    gating.cooling_down = false;
                    gating.cooldown_deadline = None;
                    gating.anchor_price = None; // re-anchor on cooldown end
                    gating.anchor_set_at = None;
                }
            }
            if gating.in_flight_intent || gating.cooling_down {
                return;
            }
        }

        // Rule 6: urgency window, measured from when the anchor was
        // established — not from whenever a breach is first observed, so a
        // price move that jumps straight past the threshold on the very
        // first tick after the anchor is still correctly judged against
        // how long the anchor has been standing.
        let urgency_window = std::time::Duration::from_millis(self.config.urgency_window_ms);
        let threshold = self.config.price_threshold;
        let dispatch = {
            let gating = self.gating.get_mut(&asset).unwrap();
            let anchor = gating.anchor_price.unwrap_or(price);
            let anchor_age = gating.anchor_set_at.map(|t| t.elapsed()).unwrap_or_default();
            let diff = (price - anchor).abs();

            if anchor_age > urgency_window {
                // Anchor is stale: re-anchor to the current price instead of
                // firing, regardless of how large `diff` is.
                gating.anchor_price = Some(price);
                gating.anchor_set_at = Some(Instant::now());
                None
            } else if diff >= threshold {
                Some(diff)
            } else {
                None
            }
        };

        if let Some(diff) = dispatch {
            let gating = self.gating.entry(asset.clone()).or_insert_with(GatingState::default);
            let mut facade = EngineFacade {
                rest: &self.rest,
                order_store: &mut self.order_store,
                position_book: &self.position_book,
                l1_books: &self.l1_books,
                product_id: self.config.product_id,
                gating,
                risk: &self.risk,
                monitor: &self.monitor,
                ofi: &self.ofi,
                session_stats: &self.session_stats,
            };
            self.strategy.on_price_update(&asset, price, diff, &mut facade).await;
        }
    }

    pub async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AuthOk => {
                info!("dispatcher: authenticated");
            }
            SessionEvent::BookL1 { symbol, best_bid, bid_qty, best_ask, ask_qty } => {
                self.l1_books.insert(symbol, L1Book { best_bid, bid_qty, best_ask, ask_qty });
            }
            SessionEvent::OrderUpdate(order) => {
                self.record_order_stats(&order);
                let effects = self.order_store.apply_order_update(&order);
                if let Some(cid) = &order.client_order_id {
                    self.strategy.on_order_update(cid, &order.state).await;
                }
                self.apply_effects(effects).await;
            }
            SessionEvent::PositionUpdate(snapshot) => {
                let asset = snapshot.product_symbol.clone().unwrap_or_else(|| snapshot.product_id.to_string());
                let effects = self.position_book.apply_ws_update(&asset, &snapshot);
                let position = self.position_book.get(&asset);
                self.strategy.on_position_update(&asset, &position).await;
                self.apply_effects(effects).await;
            }
            SessionEvent::PositionSnapshot(snapshots) => {
                let effects = self.position_book.apply_rest_snapshot(&snapshots);
                self.apply_effects(effects).await;
            }
            SessionEvent::Heartbeat => {}
            SessionEvent::Disconnected => {
                warn!("dispatcher: session disconnected, invalidating caches");
                self.l1_books.clear();
                // Every asset returns to un-anchored on disconnect so the
                // first post-reconnect tick re-anchors, same as boot.
                self.gating.clear();
            }
        }
    }

    /// Feeds the risk overlay from a fill/cancel: cancel/fill ratio always,
    /// and realized pnl when the fill closes (part of) a position — read off
    /// the position book before the matching `PositionUpdate` zeroes it.
    fn record_order_stats(&mut self, order: &crate::rest::Order) {
        match order.state.as_str() {
            "filled" => self.session_stats.total_fills += 1,
            "cancelled" => self.session_stats.total_cancels += 1,
            _ => return,
        }
        if order.state.as_str() != "filled" {
            return;
        }
        let is_exit = order
            .client_order_id
            .as_deref()
            .and_then(|cid| self.order_store.get(cid))
            .map(|o| matches!(o.role, OrderRole::TakeProfit | OrderRole::StopLoss | OrderRole::Reduce))
            .unwrap_or(false);
        if !is_exit {
            return;
        }
        let exit_price = match order.avg_fill_price {
            Some(p) => p,
            None => return,
        };
        let position = self.position_book.get(&self.config.product_symbol);
        if position.size == 0.0 {
            return;
        }
        let pnl = (exit_price - position.avg_entry_price) * position.size;
        self.running_balance += pnl;
        self.risk.update_trade_result(pnl, self.running_balance);
        self.monitor.record_trade(pnl);
    }

    async fn apply_effects(&mut self, effects: Vec<StateEffect>) {
        for effect in effects {
            match effect {
                StateEffect::ScheduleSiblingCancel { exchange_id, client_order_id } => {
                    let rest = self.rest.clone();
                    let product_id = self.config.product_id;
                    let debounce = std::time::Duration::from_millis(OrderStore::debounce_ms());
                    tokio::spawn(async move {
                        tokio::time::sleep(debounce).await;
                        if let Err(e) = rest.cancel_orders_batch(product_id, &[exchange_id]).await {
                            error!("dispatcher: sibling cancel for {} failed: {}", client_order_id, e);
                        }
                    });
                }
                StateEffect::PositionClosed => {
                    for gating in self.gating.values_mut() {
                        gating.cooling_down = true;
                        gating.cooldown_deadline =
                            Some(Instant::now() + std::time::Duration::from_secs(self.config.cooldown_secs));
                    }
                }
                StateEffect::PositionOpened => {}
                StateEffect::PlaceBrackets { main_client_order_id } => {
                    debug!("dispatcher: main order {} filled, brackets are strategy-initiated", main_client_order_id);
                }
            }
        }
    }
}

pub fn default_bracket(config: &EngineConfig, entry_price: f64, side: Side) -> BracketSpec {
    let (tp, sl) = match side {
        Side::Buy => (entry_price + config.take_profit_offset, entry_price - config.stop_loss_offset),
        Side::Sell => (entry_price - config.take_profit_offset, entry_price + config.stop_loss_offset),
    };
    BracketSpec {
        tp_price: Some(tp),
        sl_price: Some(sl),
        trail_amount: if config.trailing_amount != 0.0 { Some(config.trailing_amount) } else { None },
        trigger: TriggerMethod::LastTrade,
    }
}

pub fn market_entry_intent(config: &EngineConfig, side: Side, entry_price: f64) -> OrderIntent {
    OrderIntent {
        product_id: config.product_id,
        side,
        size: config.order_size,
        order_type: OrderType::Market,
        time_in_force: Some(TimeInForce::Ioc),
        reduce_only: false,
        client_order_id: new_client_order_id(),
        bracket: Some(default_bracket(config, entry_price, side)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    /// Counts `on_price_update` calls; everything else is a no-op.
    #[derive(Default)]
    struct CountingStrategy {
        price_updates: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Strategy for CountingStrategy {
        async fn on_depth_update(&mut self, _asset: &str, _book: L1Book, _facade: &mut EngineFacade<'_>) {}
        async fn on_trade(&mut self, _asset: &str, _trade: TradeSample, _facade: &mut EngineFacade<'_>) {}
        async fn on_price_update(&mut self, _asset: &str, _price: f64, _diff: f64, _facade: &mut EngineFacade<'_>) {
            self.price_updates.fetch_add(1, AtomicOrdering::SeqCst);
        }
        async fn on_position_update(&mut self, _asset: &str, _position: &Position) {}
        async fn on_order_update(&mut self, _client_order_id: &str, _state: &str) {}
        fn name(&self) -> &str {
            "counting"
        }
    }

    /// Records whatever the facade's risk-overlay accessors report on the
    /// next `on_price_update` call.
    #[derive(Default)]
    struct ProbeStrategy {
        suppressed: Arc<std::sync::atomic::AtomicBool>,
        can_trade: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Strategy for ProbeStrategy {
        async fn on_depth_update(&mut self, _asset: &str, _book: L1Book, _facade: &mut EngineFacade<'_>) {}
        async fn on_trade(&mut self, _asset: &str, _trade: TradeSample, _facade: &mut EngineFacade<'_>) {}
        async fn on_price_update(&mut self, _asset: &str, _price: f64, _diff: f64, facade: &mut EngineFacade<'_>) {
            self.suppressed.store(facade.should_suppress_entry(0.5), AtomicOrdering::SeqCst);
            self.can_trade.store(facade.can_trade().is_ok(), AtomicOrdering::SeqCst);
        }
        async fn on_position_update(&mut self, _asset: &str, _position: &Position) {}
        async fn on_order_update(&mut self, _client_order_id: &str, _state: &str) {}
        fn name(&self) -> &str {
            "probe"
        }
    }

    fn ready_session_state() -> Arc<SessionState> {
        let state = SessionState::new();
        state.authenticated.store(true, AtomicOrdering::SeqCst);
        state.book_ready.store(true, AtomicOrdering::SeqCst);
        state.state_synced.store(true, AtomicOrdering::SeqCst);
        state
    }

    fn new_dispatcher(counter: Arc<AtomicU32>) -> Dispatcher {
        let rest = SignedRestClient::new("https://example.invalid".into(), "k".into(), "s".into());
        let strategy = Box::new(CountingStrategy { price_updates: counter });
        Dispatcher::new(test_config(), rest, ready_session_state(), strategy)
    }

    fn depth_tick(price: f64) -> TickEvent {
        TickEvent::depth_l1("BTC", "test", price, 1.0, price, 1.0)
    }

    #[tokio::test]
    async fn urgency_window_is_measured_from_anchor_not_from_breach_detection() {
        // threshold=2.0, urgency_window_ms=1000 (see test_config). A price
        // that jumps straight past threshold on the very first post-anchor
        // tick must still fire, since the anchor was just set.
        let counter = Arc::new(AtomicU32::new(0));
        let mut dispatcher = new_dispatcher(counter.clone());

        dispatcher.handle_tick(depth_tick(100.0)).await; // rule 3: sets anchor, returns
        dispatcher.handle_tick(depth_tick(105.0)).await; // diff=5 >= 2, anchor is fresh
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_anchor_re_anchors_instead_of_firing() {
        // Manually age the anchor past the urgency window to simulate the
        // boundary case where a qualifying move arrives long after the
        // anchor was established — it must re-anchor, not fire.
        let counter = Arc::new(AtomicU32::new(0));
        let mut dispatcher = new_dispatcher(counter.clone());

        dispatcher.handle_tick(depth_tick(100.0)).await; // sets anchor
        {
            let gating = dispatcher.gating.get_mut("BTC").unwrap();
            gating.anchor_set_at = Some(Instant::now() - std::time::Duration::from_millis(5000));
        }
        dispatcher.handle_tick(depth_tick(105.0)).await;
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
        // Re-anchored to 105.0, so an immediate repeat at the same price no
        // longer looks like a breach.
        let gating = dispatcher.gating.get("BTC").unwrap();
        assert_eq!(gating.anchor_price, Some(105.0));
    }

    #[tokio::test]
    async fn disconnect_resets_per_asset_gating_state() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut dispatcher = new_dispatcher(counter.clone());

        dispatcher.handle_tick(depth_tick(100.0)).await;
        assert!(dispatcher.gating.contains_key("BTC"));

        dispatcher.handle_session_event(SessionEvent::Disconnected).await;
        assert!(dispatcher.gating.is_empty());

        // First tick after reconnect re-anchors rather than evaluating
        // against the stale pre-disconnect anchor.
        dispatcher.handle_tick(depth_tick(200.0)).await;
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(dispatcher.gating.get("BTC").unwrap().anchor_price, Some(200.0));
    }

    #[tokio::test]
    async fn facade_surfaces_lopsided_flow_from_the_overlay() {
        // 25 one-sided taker-sell trades build up enough OFI sample/volume to
        // flag the flow as lopsided; a subsequent qualifying price move must
        // see that through the facade, not just internally in overlay.rs.
        let suppressed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let can_trade = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let rest = SignedRestClient::new("https://example.invalid".into(), "k".into(), "s".into());
        let strategy = Box::new(ProbeStrategy { suppressed: suppressed.clone(), can_trade: can_trade.clone() });
        let mut dispatcher = Dispatcher::new(test_config(), rest, ready_session_state(), strategy);

        dispatcher.handle_tick(depth_tick(100.0)).await; // sets anchor
        for _ in 0..25 {
            dispatcher
                .handle_tick(TickEvent::trade("BTC", "test", 100.0, 300.0, Some(AggressorSide::Sell)))
                .await;
        }
        dispatcher.handle_tick(depth_tick(105.0)).await; // qualifying move -> on_price_update

        assert!(suppressed.load(AtomicOrdering::SeqCst));
        assert!(can_trade.load(AtomicOrdering::SeqCst));
    }

    #[tokio::test]
    async fn exit_fill_feeds_realized_pnl_into_risk_and_monitor() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut dispatcher = new_dispatcher(counter);

        // Position opened long 1.0 @ 100.
        dispatcher
            .handle_session_event(SessionEvent::PositionUpdate(crate::rest::PositionSnapshot {
                product_id: 27,
                product_symbol: Some("BTC".to_string()),
                size: 1.0,
                entry_price: 100.0,
            }))
            .await;
        assert!(dispatcher.position_book.has_open_position("BTC"));

        // Take-profit leg fills at 110 -> +10 realized pnl.
        dispatcher.order_store.register_pending("tp-1", OrderRole::TakeProfit);
        dispatcher
            .handle_session_event(SessionEvent::OrderUpdate(crate::rest::Order {
                id: 1,
                client_order_id: Some("tp-1".to_string()),
                product_id: 27,
                state: "filled".to_string(),
                avg_fill_price: Some(110.0),
                side: None,
                parent_client_order_id: None,
                stop_order_type: None,
            }))
            .await;

        assert_eq!(dispatcher.session_stats.total_fills, 1);
        assert_eq!(dispatcher.running_balance, dispatcher.config.starting_balance + 10.0);
    }

    #[test]
    fn bracket_offsets_mirror_for_buy_and_sell() {
        let config = test_config();
        let buy = default_bracket(&config, 100.0, Side::Buy);
        assert_eq!(buy.tp_price, Some(110.0));
        assert_eq!(buy.sl_price, Some(95.0));

        let sell = default_bracket(&config, 100.0, Side::Sell);
        assert_eq!(sell.tp_price, Some(90.0));
        assert_eq!(sell.sl_price, Some(105.0));
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            api_key: "k".into(),
            api_secret: "s".into(),
            rest_base_url: "https://example.invalid".into(),
            ws_url: "wss://example.invalid".into(),
            product_id: 27,
            product_symbol: "BTC".into(),
            leverage: 1.0,
            order_size: 1.0,
            price_threshold: 2.0,
            urgency_window_ms: 1000,
            cooldown_secs: 30,
            take_profit_offset: 10.0,
            stop_loss_offset: 5.0,
            trailing_amount: 0.0,
            slippage_protection_offset: 0.0,
            price_aggression_offset: 0.0,
            time_in_force: "GTC".into(),
            reconnect_interval_secs: 5,
            ping_interval_secs: 30,
            heartbeat_timeout_secs: 40,
            cancel_on_disconnect_timeout_secs: 60,
            leader_venues: Vec::new(),
            control_plane_port: 8082,
            max_daily_drawdown_percent: 0.10,
            max_consecutive_losses: 5,
            trading_halt_duration_secs: 3600,
            monitor_window_size: 100,
            monitor_min_trades_for_action: 20,
            pf_threshold_warning: 1.0,
            pf_threshold_critical: 0.8,
            ofi_window_size: 50,
            ofi_suppress_threshold: 0.6,
            starting_balance: 10_000.0,
        }
    }
}
