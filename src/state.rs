// ─────────────────────────────────────────────────────────────────────────────
// state.rs — Position & Order State.
//
// Single source of truth within the process: reconciles the startup REST
// snapshot, the WS position snapshot, and WS order/position deltas into one
// authoritative view. Orders live in an arena indexed by client_order_id:
// no strong mutual ownership between siblings, only index links, so
// cancellation walks the index set rather than a pointer graph.
// ─────────────────────────────────────────────────────────────────────────────
use crate::rest::{Order, PositionSnapshot};
use log::{error, info, warn};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRole {
    Main,
    TakeProfit,
    StopLoss,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderLifecycle {
    Pending,
    Accepted,
    Working,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ManagedOrder {
    pub exchange_id: Option<u64>,
    pub client_order_id: String,
    pub role: OrderRole,
    pub state: OrderLifecycle,
    /// client_order_id of the Main order this bracket leg belongs to, if any.
    /// Informational only — cancellation walks `linked`, not `parent`, so a
    /// leg fill never schedules a cancel of its own Main order.
    pub parent: Option<String>,
    /// client_order_ids of OCO siblings (the other bracket leg). Never
    /// includes `parent`.
    pub linked: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Position {
    pub size: f64,
    pub avg_entry_price: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }
}

/// One thing D asks E/main to do in response to a reconciled state change.
#[derive(Debug, Clone)]
pub enum StateEffect {
    /// A sibling of a just-filled bracket leg should be cancelled, debounced.
    ScheduleSiblingCancel { exchange_id: u64, client_order_id: String },
    /// Position just went to zero: start the cooldown.
    PositionClosed,
    /// Position just went from zero to nonzero: strategy should treat as "opened".
    PositionOpened,
    /// Main order filled and the strategy asked for brackets.
    PlaceBrackets { main_client_order_id: String },
}

const SIBLING_CANCEL_DEBOUNCE_MS: u64 = 250;

/// Arena-indexed order store, keyed by `client_order_id` (stable across the
/// REST-ack/WS-event race — `exchange_id` only becomes known after ack).
pub struct OrderStore {
    orders: HashMap<String, ManagedOrder>,
    pending: HashMap<String, ()>, // register_pending / cancel_pending registry
    by_exchange_id: HashMap<u64, String>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            pending: HashMap::new(),
            by_exchange_id: HashMap::new(),
        }
    }

    /// Strategies may mint `client_order_id` before the REST ack returns; D
    /// registers it so a WS event that races ahead of the REST response is
    /// not dropped.
    pub fn register_pending(&mut self, client_order_id: &str, role: OrderRole) {
        self.pending.insert(client_order_id.to_string(), ());
        self.orders.entry(client_order_id.to_string()).or_insert(ManagedOrder {
            exchange_id: None,
            client_order_id: client_order_id.to_string(),
            role,
            state: OrderLifecycle::Pending,
            parent: None,
            linked: Vec::new(),
        });
    }

    pub fn cancel_pending(&mut self, client_order_id: &str) {
        self.pending.remove(client_order_id);
        self.orders.remove(client_order_id);
    }

    pub fn link(&mut self, a: &str, b: &str) {
        if let Some(order) = self.orders.get_mut(a) {
            if !order.linked.contains(&b.to_string()) {
                order.linked.push(b.to_string());
            }
        }
        if let Some(order) = self.orders.get_mut(b) {
            if !order.linked.contains(&a.to_string()) {
                order.linked.push(a.to_string());
            }
        }
    }

    pub fn get(&self, client_order_id: &str) -> Option<&ManagedOrder> {
        self.orders.get(client_order_id)
    }

    /// Applies a WS order update, matched via `client_order_id`. Returns the
    /// effects the caller (E / main) should schedule.
    pub fn apply_order_update(&mut self, wire: &Order) -> Vec<StateEffect> {
        let cid = match &wire.client_order_id {
            Some(c) => c.clone(),
            None => {
                warn!("state: order update with no client_order_id, ignoring");
                return Vec::new();
            }
        };

        let new_state = match wire.state.as_str() {
            "open" | "working" | "partially_filled" => OrderLifecycle::Working,
            "filled" => OrderLifecycle::Filled,
            "cancelled" => OrderLifecycle::Cancelled,
            "rejected" => OrderLifecycle::Rejected,
            "pending" => OrderLifecycle::Pending,
            other => {
                error!("state: unknown order state '{}', ignoring frame", other);
                return Vec::new();
            }
        };

        if !self.orders.contains_key(&cid) {
            // Bracket children are created venue-side, not registered via
            // register_pending; admit them here, linked to the parent (and
            // to any sibling already admitted), inferring role from
            // `stop_order_type`.
            match &wire.parent_client_order_id {
                Some(parent) if self.orders.contains_key(parent) => {
                    let role = match wire.stop_order_type.as_deref() {
                        Some("take_profit_order") => OrderRole::TakeProfit,
                        Some("stop_loss_order") => OrderRole::StopLoss,
                        _ => OrderRole::Reduce,
                    };
                    // Find an already-admitted sibling by scanning for any
                    // other child of this same parent — not via `parent`'s
                    // own `linked`, which never includes its children.
                    let sibling = self.orders.values().find_map(|o| {
                        if o.parent.as_deref() == Some(parent.as_str())
                            && matches!(o.role, OrderRole::TakeProfit | OrderRole::StopLoss)
                        {
                            Some(o.client_order_id.clone())
                        } else {
                            None
                        }
                    });

                    self.orders.insert(
                        cid.clone(),
                        ManagedOrder {
                            exchange_id: None,
                            client_order_id: cid.clone(),
                            role,
                            state: OrderLifecycle::Pending,
                            parent: Some(parent.clone()),
                            linked: Vec::new(),
                        },
                    );
                    if let Some(sib) = sibling {
                        self.link(&sib, &cid);
                    }
                    info!("state: admitted bracket child {} (role={:?}) parent={}", cid, role, parent);
                }
                _ => {
                    error!("state: order update for unregistered client_order_id {}, ignoring", cid);
                    return Vec::new();
                }
            }
        }

        let order = match self.orders.get_mut(&cid) {
            Some(o) => o,
            None => unreachable!("just inserted or previously registered"),
        };

        order.exchange_id = Some(wire.id);
        self.by_exchange_id.insert(wire.id, cid.clone());
        let prev_state = order.state;
        order.state = new_state;
        let role = order.role;
        let linked = order.linked.clone();

        let mut effects = Vec::new();

        if prev_state != OrderLifecycle::Filled && new_state == OrderLifecycle::Filled {
            match role {
                OrderRole::Main => {
                    effects.push(StateEffect::PlaceBrackets { main_client_order_id: cid.clone() });
                }
                OrderRole::TakeProfit | OrderRole::StopLoss => {
                    for sib_cid in &linked {
                        if let Some(sib) = self.orders.get(sib_cid) {
                            if sib.state == OrderLifecycle::Working {
                                if let Some(exchange_id) = sib.exchange_id {
                                    effects.push(StateEffect::ScheduleSiblingCancel {
                                        exchange_id,
                                        client_order_id: sib_cid.clone(),
                                    });
                                }
                            }
                        }
                    }
                }
                OrderRole::Reduce => {}
            }
        }

        if matches!(new_state, OrderLifecycle::Cancelled | OrderLifecycle::Rejected | OrderLifecycle::Filled) {
            self.pending.remove(&cid);
        }

        effects
    }

    pub fn debounce_ms() -> u64 {
        SIBLING_CANCEL_DEBOUNCE_MS
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-asset position cache plus the reconciliation entry points.
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self { positions: HashMap::new() }
    }

    pub fn get(&self, asset: &str) -> Position {
        self.positions.get(asset).cloned().unwrap_or_default()
    }

    pub fn has_open_position(&self, asset: &str) -> bool {
        !self.get(asset).is_flat()
    }

    /// REST snapshot at startup, or after a forced resync. Never "guesses":
    /// only called with a fresh venue response.
    pub fn apply_rest_snapshot(&mut self, snapshots: &[PositionSnapshot]) -> Vec<StateEffect> {
        let mut effects = Vec::new();
        for snap in snapshots {
            let key = snap.product_symbol.clone().unwrap_or_else(|| snap.product_id.to_string());
            effects.extend(self.set(&key, snap.size, snap.entry_price));
        }
        effects
    }

    /// WS PositionUpdate for the traded asset.
    pub fn apply_ws_update(&mut self, asset: &str, snap: &PositionSnapshot) -> Vec<StateEffect> {
        self.set(asset, snap.size, snap.entry_price)
    }

    fn set(&mut self, asset: &str, size: f64, entry_price: f64) -> Vec<StateEffect> {
        let prev = self.get(asset);
        self.positions.insert(asset.to_string(), Position { size, avg_entry_price: entry_price });

        let mut effects = Vec::new();
        if prev.size != 0.0 && size == 0.0 {
            info!("state: {} position closed, starting cooldown", asset);
            effects.push(StateEffect::PositionClosed);
        } else if prev.size == 0.0 && size != 0.0 {
            info!("state: {} position opened (size={})", asset, size);
            effects.push(StateEffect::PositionOpened);
        }
        effects
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(cid: &str, id: u64, state: &str, _role: OrderRole) -> Order {
        Order {
            id,
            client_order_id: Some(cid.to_string()),
            product_id: 27,
            state: state.to_string(),
            avg_fill_price: None,
            side: None,
            parent_client_order_id: None,
            stop_order_type: None,
        }
    }

    #[test]
    fn oco_sibling_scheduled_for_cancel_on_fill() {
        let mut store = OrderStore::new();
        store.register_pending("tp-1", OrderRole::TakeProfit);
        store.register_pending("sl-1", OrderRole::StopLoss);
        store.link("tp-1", "sl-1");

        store.apply_order_update(&order("tp-1", 100, "open", OrderRole::TakeProfit));
        store.apply_order_update(&order("sl-1", 101, "open", OrderRole::StopLoss));

        let effects = store.apply_order_update(&order("tp-1", 100, "filled", OrderRole::TakeProfit));
        assert!(matches!(effects[0], StateEffect::ScheduleSiblingCancel { exchange_id: 101, .. }));
    }

    #[test]
    fn main_fill_requests_brackets() {
        let mut store = OrderStore::new();
        store.register_pending("main-1", OrderRole::Main);
        store.apply_order_update(&order("main-1", 1, "open", OrderRole::Main));
        let effects = store.apply_order_update(&order("main-1", 1, "filled", OrderRole::Main));
        assert!(matches!(&effects[0], StateEffect::PlaceBrackets { main_client_order_id } if main_client_order_id == "main-1"));
    }

    #[test]
    fn bracket_children_are_admitted_via_parent_linkage_and_form_an_oco_pair() {
        let mut store = OrderStore::new();
        store.register_pending("main-1", OrderRole::Main);
        store.apply_order_update(&order("main-1", 1, "working", OrderRole::Main));

        let mut tp = order("tp-child", 2, "working", OrderRole::TakeProfit);
        tp.parent_client_order_id = Some("main-1".to_string());
        tp.stop_order_type = Some("take_profit_order".to_string());
        store.apply_order_update(&tp);

        let mut sl = order("sl-child", 3, "working", OrderRole::StopLoss);
        sl.parent_client_order_id = Some("main-1".to_string());
        sl.stop_order_type = Some("stop_loss_order".to_string());
        store.apply_order_update(&sl);

        assert_eq!(store.get("tp-child").unwrap().role, OrderRole::TakeProfit);
        assert_eq!(store.get("sl-child").unwrap().role, OrderRole::StopLoss);

        tp.state = "filled".to_string();
        let effects = store.apply_order_update(&tp);
        assert!(matches!(effects[0], StateEffect::ScheduleSiblingCancel { exchange_id: 3, .. }));
    }

    #[test]
    fn unregistered_client_order_id_is_ignored_not_panicking() {
        let mut store = OrderStore::new();
        let effects = store.apply_order_update(&order("unknown", 5, "filled", OrderRole::Main));
        assert!(effects.is_empty());
    }

    #[test]
    fn position_close_then_reopen_emits_closed_then_opened() {
        let mut book = PositionBook::new();
        book.set("BTC", 1.0, 100.0);
        let closed = book.set("BTC", 0.0, 0.0);
        assert!(matches!(closed[0], StateEffect::PositionClosed));
        let opened = book.set("BTC", -1.0, 105.0);
        assert!(matches!(opened[0], StateEffect::PositionOpened));
    }

    #[test]
    fn has_open_position_defaults_to_flat_for_unknown_asset() {
        let book = PositionBook::new();
        assert!(!book.has_open_position("ETH"));
    }
}
