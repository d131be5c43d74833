// ─────────────────────────────────────────────────────────────────────────────
// config.rs — Environment configuration surface.
//
// Values load once at process start; there is no hot-reload. Anything the
// engine cannot safely run without is a fatal-at-startup error:
// the process exits nonzero with a plain message rather than guessing.
// ─────────────────────────────────────────────────────────────────────────────
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("invalid value for env var {0}: {1}")]
    Invalid(&'static str, String),
}

/// One configured leader (source) venue: a name the ingest adapter registry
/// dispatches on, a WebSocket endpoint, and the asset list to subscribe.
#[derive(Debug, Clone)]
pub struct LeaderVenueConfig {
    pub name: String,
    pub ws_url: String,
    pub assets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Credentials
    pub api_key: String,
    pub api_secret: String,

    // Endpoints
    pub rest_base_url: String,
    pub ws_url: String,

    // Instrument
    pub product_id: u64,
    pub product_symbol: String,
    pub leverage: f64,
    pub order_size: f64,

    // Thresholds
    pub price_threshold: f64,
    pub urgency_window_ms: u64,
    pub cooldown_secs: u64,
    pub take_profit_offset: f64,
    pub stop_loss_offset: f64,
    pub trailing_amount: f64,
    pub slippage_protection_offset: f64,
    pub price_aggression_offset: f64,
    pub time_in_force: String,

    // Connection
    pub reconnect_interval_secs: u64,
    pub ping_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub cancel_on_disconnect_timeout_secs: u64,

    // Leader venues
    pub leader_venues: Vec<LeaderVenueConfig>,

    // Local control-plane WS listener
    pub control_plane_port: u16,

    // Risk overlay (risk.rs / monitor.rs / strategy/overlay.rs)
    pub max_daily_drawdown_percent: f64,
    pub max_consecutive_losses: usize,
    pub trading_halt_duration_secs: i64,
    pub monitor_window_size: usize,
    pub monitor_min_trades_for_action: usize,
    pub pf_threshold_warning: f64,
    pub pf_threshold_critical: f64,
    pub ofi_window_size: usize,
    pub ofi_suppress_threshold: f64,
    pub starting_balance: f64,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional_parse<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|_| ConfigError::Invalid(key, v)),
        Err(_) => Ok(default),
    }
}

fn required_parse<T: std::str::FromStr>(key: &'static str) -> Result<T, ConfigError> {
    let v = required(key)?;
    v.parse::<T>().map_err(|_| ConfigError::Invalid(key, v))
}

impl EngineConfig {
    /// Loads `.env` (silently ignored if missing) then reads the process
    /// environment. Mirrors the reference binary's `dotenvy::dotenv().ok()`
    /// followed by `std::env::var` startup sequence.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let leader_venues = parse_leader_venues()?;

        Ok(Self {
            api_key: required("API_KEY")?,
            api_secret: required("API_SECRET")?,

            rest_base_url: required("REST_BASE_URL")?,
            ws_url: required("LAGGER_WS_URL")?,

            product_id: required_parse("PRODUCT_ID")?,
            product_symbol: required("PRODUCT_SYMBOL")?,
            leverage: optional_parse("LEVERAGE", 1.0)?,
            order_size: required_parse("ORDER_SIZE")?,

            price_threshold: required_parse("PRICE_THRESHOLD")?,
            urgency_window_ms: required_parse("URGENCY_WINDOW_MS")?,
            cooldown_secs: required_parse("COOLDOWN_SECS")?,
            take_profit_offset: optional_parse("TAKE_PROFIT_OFFSET", 0.0)?,
            stop_loss_offset: optional_parse("STOP_LOSS_OFFSET", 0.0)?,
            trailing_amount: optional_parse("TRAILING_AMOUNT", 0.0)?,
            slippage_protection_offset: optional_parse("SLIPPAGE_PROTECTION_OFFSET", 0.0)?,
            price_aggression_offset: optional_parse("PRICE_AGGRESSION_OFFSET", 0.0)?,
            time_in_force: optional_parse("TIME_IN_FORCE", "GTC".to_string())?,

            reconnect_interval_secs: optional_parse("RECONNECT_INTERVAL_SECS", 5)?,
            ping_interval_secs: optional_parse("PING_INTERVAL_SECS", 30)?,
            heartbeat_timeout_secs: optional_parse("HEARTBEAT_TIMEOUT_SECS", 40)?,
            cancel_on_disconnect_timeout_secs: optional_parse("CANCEL_ON_DISCONNECT_TIMEOUT_SECS", 60)?,

            leader_venues,

            control_plane_port: optional_parse("CONTROL_PLANE_PORT", 8082)?,

            max_daily_drawdown_percent: optional_parse("MAX_DAILY_DRAWDOWN_PERCENT", 0.10)?,
            max_consecutive_losses: optional_parse("MAX_CONSECUTIVE_LOSSES", 5)?,
            trading_halt_duration_secs: optional_parse("TRADING_HALT_DURATION_SECS", 3600)?,
            monitor_window_size: optional_parse("MONITOR_WINDOW_SIZE", 100)?,
            monitor_min_trades_for_action: optional_parse("MONITOR_MIN_TRADES_FOR_ACTION", 20)?,
            pf_threshold_warning: optional_parse("PF_THRESHOLD_WARNING", 1.0)?,
            pf_threshold_critical: optional_parse("PF_THRESHOLD_CRITICAL", 0.8)?,
            ofi_window_size: optional_parse("OFI_WINDOW_SIZE", 50)?,
            ofi_suppress_threshold: optional_parse("OFI_SUPPRESS_THRESHOLD", 0.6)?,
            starting_balance: optional_parse("STARTING_BALANCE", 10_000.0)?,
        })
    }
}

/// `LEADER_VENUES` is a comma-separated list of `name:ws_url:asset1|asset2|...`
/// triples, e.g. `bybit:wss://stream.bybit.com/v5/public/linear:BTC|ETH,okx:wss://ws.okx.com:8443/ws/v5/public:BTC`.
fn parse_leader_venues() -> Result<Vec<LeaderVenueConfig>, ConfigError> {
    let raw = required("LEADER_VENUES")?;
    let mut out = Vec::new();
    for entry in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let name = parts
            .next()
            .ok_or_else(|| ConfigError::Invalid("LEADER_VENUES", entry.to_string()))?;
        let ws_url = parts
            .next()
            .ok_or_else(|| ConfigError::Invalid("LEADER_VENUES", entry.to_string()))?;
        let assets_raw = parts
            .next()
            .ok_or_else(|| ConfigError::Invalid("LEADER_VENUES", entry.to_string()))?;
        let assets = assets_raw.split('|').map(|s| s.to_string()).collect();
        out.push(LeaderVenueConfig {
            name: name.to_string(),
            ws_url: ws_url.to_string(),
            assets,
        });
    }
    if out.is_empty() {
        return Err(ConfigError::Invalid("LEADER_VENUES", raw));
    }
    Ok(out)
}
