// ─────────────────────────────────────────────────────────────────────────────
// strategy/overlay.rs — optional risk overlay a Strategy may consult.
//
// Order-flow imbalance and rolling session stats, generalized into a
// per-asset overlay any Strategy can read through the facade rather than
// being baked into one grid-maker's decision loop.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::VecDeque;

/// Rolling-window Order Flow Imbalance: tracks taker buy vs. taker sell
/// volume to flag lopsided flow before it becomes an adverse fill.
#[derive(Debug, Default)]
pub struct OfiCalculator {
    window: VecDeque<(bool, f64)>,
    window_size: usize,
}

impl OfiCalculator {
    pub fn new(window_size: usize) -> Self {
        Self { window: VecDeque::new(), window_size }
    }

    pub fn record(&mut self, is_buy: bool, size_usd: f64) {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((is_buy, size_usd));
    }

    /// +1.0 = pure taker buy pressure, -1.0 = pure taker sell pressure.
    pub fn ofi_fraction(&self) -> f64 {
        if self.window.len() < 20 {
            return 0.0;
        }
        let buy_vol: f64 = self.window.iter().filter(|(b, _)| *b).map(|(_, s)| s).sum();
        let sell_vol: f64 = self.window.iter().filter(|(b, _)| !b).map(|(_, s)| s).sum();
        let total = buy_vol + sell_vol;
        if total <= 5_000.0 {
            return 0.0;
        }
        (buy_vol - sell_vol) / total
    }

    pub fn should_suppress_entry(&self, threshold: f64) -> bool {
        self.ofi_fraction().abs() > threshold
    }
}

/// Sliding-window session stats: cancel/fill ratio and daily drawdown, used
/// to decide whether a strategy should widen thresholds or pause.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub total_cancels: u64,
    pub total_fills: u64,
    pub daily_pnl_usd: f64,
    pub starting_balance: f64,
}

impl SessionStats {
    pub fn cancel_fill_ratio(&self) -> f64 {
        if self.total_fills == 0 {
            return self.total_cancels as f64;
        }
        self.total_cancels as f64 / self.total_fills as f64
    }

    pub fn daily_drawdown_pct(&self) -> f64 {
        if self.starting_balance <= 0.0 {
            return 0.0;
        }
        let loss = -self.daily_pnl_usd.min(0.0);
        loss / self.starting_balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ofi_is_neutral_below_sample_floor() {
        let mut ofi = OfiCalculator::new(50);
        for _ in 0..10 {
            ofi.record(true, 1_000.0);
        }
        assert_eq!(ofi.ofi_fraction(), 0.0);
    }

    #[test]
    fn ofi_flags_sell_dominance() {
        let mut ofi = OfiCalculator::new(50);
        for _ in 0..25 {
            ofi.record(false, 1_000.0);
        }
        assert!(ofi.ofi_fraction() < -0.9);
        assert!(ofi.should_suppress_entry(0.5));
    }

    #[test]
    fn drawdown_ignores_gains() {
        let stats = SessionStats { daily_pnl_usd: 500.0, starting_balance: 10_000.0, ..Default::default() };
        assert_eq!(stats.daily_drawdown_pct(), 0.0);
    }
}
