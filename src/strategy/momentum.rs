// ─────────────────────────────────────────────────────────────────────────────
// strategy/momentum.rs — reference Strategy: momentum-follow entry.
//
// On a qualifying, timely price move the strategy follows direction (price
// rose -> buy, price fell -> sell), attaching a take-profit/stop-loss
// bracket. Once in a position it does not add to it; it simply watches for
// the WS-driven exit.
// ─────────────────────────────────────────────────────────────────────────────
use super::{market_entry_intent, EngineFacade, L1Book, Strategy, TradeSample};
use crate::config::EngineConfig;
use crate::monitor::FeedbackAction;
use crate::rest::Side;
use crate::state::Position;
use async_trait::async_trait;
use log::info;

pub struct MomentumFollowStrategy {
    config: EngineConfig,
}

impl MomentumFollowStrategy {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for MomentumFollowStrategy {
    async fn on_depth_update(&mut self, _asset: &str, _book: L1Book, _facade: &mut EngineFacade<'_>) {
        // Already in a position: this strategy manages exits purely via the
        // venue's bracket orders, so book updates while holding are a no-op.
    }

    async fn on_trade(&mut self, _asset: &str, _trade: TradeSample, _facade: &mut EngineFacade<'_>) {}

    async fn on_price_update(&mut self, asset: &str, price: f64, price_diff: f64, facade: &mut EngineFacade<'_>) {
        if facade.has_open_position(asset) {
            return;
        }
        if let Err(reason) = facade.can_trade() {
            info!("momentum: entry for {} blocked by risk overlay: {}", asset, reason);
            return;
        }
        if facade.should_suppress_entry(self.config.ofi_suppress_threshold) {
            info!("momentum: entry for {} suppressed by lopsided order flow", asset);
            return;
        }
        let size_multiplier = match facade.suggested_action() {
            FeedbackAction::HaltTrading => {
                info!("momentum: entry for {} blocked by performance monitor halt", asset);
                return;
            }
            FeedbackAction::ReduceSize(m) => m,
            FeedbackAction::None => 1.0,
        };
        let side = if price_diff >= 0.0 { Side::Buy } else { Side::Sell };
        let mut intent = market_entry_intent(&self.config, side, price);
        intent.size *= size_multiplier;
        info!("momentum: dispatching entry for {} side={:?} price={} diff={}", asset, side, price, price_diff);
        if let Err(e) = facade.place_order(intent).await {
            info!("momentum: entry for {} failed: {}", asset, e);
        }
    }

    async fn on_position_update(&mut self, asset: &str, position: &Position) {
        if position.is_flat() {
            info!("momentum: {} flat, awaiting cooldown", asset);
        } else {
            info!("momentum: {} holding size={}", asset, position.size);
        }
    }

    async fn on_order_update(&mut self, client_order_id: &str, state: &str) {
        info!("momentum: order {} -> {}", client_order_id, state);
    }

    fn name(&self) -> &str {
        "momentum-follow"
    }
}
