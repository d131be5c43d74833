// ─────────────────────────────────────────────────────────────────────────────
// trading-execution-core: low-latency momentum-arbitrage execution engine.
//
// Composition root. Owns every task and hands out explicit handles rather
// than relying on a global singleton — signal handlers register against
// this root's REST client for the best-effort cancel_all on shutdown.
// ─────────────────────────────────────────────────────────────────────────────
mod config;
mod ingest;
mod monitor;
mod rest;
mod risk;
mod session;
mod signing;
mod state;
mod strategy;

use config::EngineConfig;
use session::SessionState;
use std::sync::Arc;
use strategy::momentum::MomentumFollowStrategy;
use strategy::Dispatcher;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let session_id = uuid::Uuid::new_v4().to_string();
    log::info!("trading-execution-core starting (session={})", session_id);

    let config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            log::error!("fatal: configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let rest_client = rest::SignedRestClient::new(
        config.rest_base_url.clone(),
        config.api_key.clone(),
        config.api_secret.clone(),
    );

    // ─── Startup fast-fail sequence ───────────────────────────
    if let Err(e) = rest_client.set_leverage(config.product_id, config.leverage).await {
        log::error!("fatal: set_leverage failed at startup: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = rest_client.set_cancel_on_disconnect(config.cancel_on_disconnect_timeout_secs).await {
        log::error!("fatal: set_cancel_on_disconnect failed at startup: {}", e);
        std::process::exit(1);
    }

    let session_state = SessionState::new();
    let (session_events_tx, mut session_events_rx) = mpsc::channel(1024);

    {
        let ws_url = config.ws_url.clone();
        let api_key = config.api_key.clone();
        let api_secret = config.api_secret.clone();
        let product_symbol = config.product_symbol.clone();
        let reconnect_interval_secs = config.reconnect_interval_secs;
        let ping_interval_secs = config.ping_interval_secs;
        let heartbeat_timeout_secs = config.heartbeat_timeout_secs;
        let state = session_state.clone();
        let tx = session_events_tx.clone();
        tokio::spawn(async move {
            session::run(
                ws_url,
                api_key,
                api_secret,
                product_symbol,
                reconnect_interval_secs,
                ping_interval_secs,
                heartbeat_timeout_secs,
                state,
                tx,
            )
            .await;
        });
    }

    // Refresh the venue-side cancel-on-disconnect timeout periodically while
    // connected.
    {
        let rest = rest_client.clone();
        let timeout = config.cancel_on_disconnect_timeout_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
            loop {
                ticker.tick().await;
                if let Err(e) = rest.set_cancel_on_disconnect(timeout).await {
                    log::warn!("cancel_on_disconnect refresh failed: {}", e);
                }
            }
        });
    }

    let mut tick_rx = ingest::spawn_all(&config.leader_venues, config.control_plane_port);

    let strategy = Box::new(MomentumFollowStrategy::new(config.clone()));
    let mut dispatcher = Dispatcher::new(config.clone(), rest_client.clone(), session_state.clone(), strategy);

    // Startup REST sync: fetch positions once before any trading begins.
    // Published as a synthetic snapshot through the same path a WS-sourced
    // snapshot would take.
    match rest_client.get_positions(Some(config.product_id)).await {
        Ok(snapshot) => {
            dispatcher
                .handle_session_event(session::SessionEvent::PositionSnapshot(snapshot))
                .await;
        }
        Err(e) => {
            log::error!("fatal: startup get_positions failed: {}", e);
            std::process::exit(1);
        }
    }

    log::info!("all systems active, entering dispatch loop");

    let shutdown_rest = rest_client.clone();
    let shutdown_product_id = config.product_id;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("shutdown signal received, cancelling all open orders");
            if let Err(e) = shutdown_rest.cancel_all(shutdown_product_id).await {
                log::error!("shutdown cancel_all failed: {}", e);
            }
            std::process::exit(0);
        }
    });

    loop {
        tokio::select! {
            tick = tick_rx.recv() => {
                match tick {
                    Ok(event) => dispatcher.handle_tick(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("dispatch loop lagged, dropped {} tick events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        log::error!("ingest bus closed unexpectedly");
                        break;
                    }
                }
            }
            event = session_events_rx.recv() => {
                match event {
                    Some(event) => dispatcher.handle_session_event(event).await,
                    None => {
                        log::error!("session event channel closed unexpectedly");
                        break;
                    }
                }
            }
        }
    }
}
