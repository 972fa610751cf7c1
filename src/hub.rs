// =============================================================================
// Subscriber Hub — WebSocket fan-out to UI clients
// =============================================================================
//
// Clients connect to `/ws`, receive a full status snapshot, then opt into
// topics with `subscribe:<topic>` and pull state with `request:portfolio`,
// `request:positions`, or `request:strategies`.
//
// Each subscriber gets an isolated forwarding task and a bounded outbound
// queue. A subscriber that cannot drain 1000 pending messages is dropped
// with a log line; the pipeline never waits for a socket. Delivery is
// best-effort within a session — a reconnecting client re-requests the
// snapshot instead of replaying missed messages.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::events::EngineEvent;

/// Outbound messages queued per subscriber before it is dropped.
const QUEUE_HIGH_WATER: usize = 1_000;

// =============================================================================
// Topics
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Ticks,
    Candles,
    Signals,
    Positions,
    Portfolio,
}

impl Topic {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ticks" => Some(Self::Ticks),
            "candles" => Some(Self::Candles),
            "signals" => Some(Self::Signals),
            "positions" => Some(Self::Positions),
            "portfolio" => Some(Self::Portfolio),
            _ => None,
        }
    }
}

/// Wire envelope: `{ "type": ..., "data": ... }`.
#[derive(Debug, Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: T,
}

fn envelope<T: Serialize>(kind: &str, data: T) -> Option<String> {
    serde_json::to_string(&Envelope { kind, data }).ok()
}

/// Map a bus event onto its hub message. `None` topic means the message goes
/// to every subscriber regardless of subscriptions; `None` result means the
/// event is not fanned out at all.
fn event_to_message(event: &EngineEvent) -> Option<(Option<Topic>, String)> {
    match event {
        EngineEvent::Tick(tick) => Some((Some(Topic::Ticks), envelope("tick", tick)?)),
        EngineEvent::CandleUpdate(candle) => {
            Some((Some(Topic::Candles), envelope("candle:update", candle)?))
        }
        EngineEvent::CandleClose(candle) => {
            Some((Some(Topic::Candles), envelope("candle", candle)?))
        }
        EngineEvent::Signal(signal) => Some((Some(Topic::Signals), envelope("signal", signal)?)),
        EngineEvent::StrategiesStatus(statuses) => Some((
            Some(Topic::Signals),
            envelope("strategies:status", statuses)?,
        )),
        EngineEvent::AccumulationReport(report) => Some((
            Some(Topic::Signals),
            envelope("accumulation:report", report)?,
        )),
        EngineEvent::PositionUpdate(position) => Some((
            Some(Topic::Positions),
            envelope("position:update", position)?,
        )),
        EngineEvent::PositionClosed(position) => Some((
            Some(Topic::Positions),
            envelope("position:closed", position)?,
        )),
        EngineEvent::PortfolioUpdate(portfolio) => Some((
            Some(Topic::Portfolio),
            envelope("portfolio:update", portfolio)?,
        )),
        EngineEvent::ConnectionStatus(status) => {
            Some((None, envelope("connection:status", status)?))
        }
        // Depth analytics stay internal to the strategy layer.
        EngineEvent::DepthAnalytics(_) => None,
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

// =============================================================================
// Subscriber session
// =============================================================================

async fn handle_subscriber(socket: WebSocket, state: Arc<AppState>) {
    info!("hub subscriber connected");
    let (mut sender, mut receiver) = socket.split();

    // Initial status snapshot.
    if let Some(json) = envelope("status", state.build_status_snapshot()) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    let topics: Arc<RwLock<HashSet<Topic>>> = Arc::new(RwLock::new(HashSet::new()));
    let (out_tx, mut out_rx) = mpsc::channel::<String>(QUEUE_HIGH_WATER);

    // Forwarding task: bus -> bounded queue, filtered by topic.
    let forward = {
        let topics = Arc::clone(&topics);
        let out_tx = out_tx.clone();
        let mut bus_rx = state.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match bus_rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "subscriber lagged the bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some((topic, json)) = event_to_message(&event) else {
                    continue;
                };
                if let Some(topic) = topic {
                    if !topics.read().contains(&topic) {
                        continue;
                    }
                }
                match out_tx.try_send(json) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("subscriber queue overflow — dropping subscriber");
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        })
    };

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // Forwarder gone: either overflow-drop or bus closed.
                    None => break,
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(text.trim(), &state, &topics, &out_tx);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "subscriber receive error");
                        break;
                    }
                }
            }
        }
    }

    forward.abort();
    info!("hub subscriber disconnected");
}

/// Inbound protocol: `subscribe:<topic>` and `request:<state>`.
fn handle_command(
    command: &str,
    state: &Arc<AppState>,
    topics: &Arc<RwLock<HashSet<Topic>>>,
    out_tx: &mpsc::Sender<String>,
) {
    let reply = |json: Option<String>| {
        if let Some(json) = json {
            // Replies share the bounded queue; an overflowing subscriber is
            // about to be dropped anyway.
            let _ = out_tx.try_send(json);
        }
    };

    if let Some(topic_raw) = command.strip_prefix("subscribe:") {
        match Topic::parse(topic_raw) {
            Some(topic) => {
                topics.write().insert(topic);
                debug!(topic = topic_raw, "topic subscribed");
            }
            None => warn!(topic = topic_raw, "unknown topic ignored"),
        }
        return;
    }

    match command {
        "request:portfolio" => {
            reply(envelope("portfolio:update", state.executor.portfolio_snapshot()));
        }
        "request:positions" => {
            reply(envelope("positions:list", state.executor.open_positions()));
        }
        "request:strategies" => {
            reply(envelope("strategies:status", state.engine.lock().statuses()));
        }
        other => {
            debug!(command = other, "unknown hub command ignored");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::{ConnectionStatus, EventBus};
    use crate::executor::PaperExecutor;
    use crate::portfolio::Portfolio;
    use crate::storage::Storage;
    use crate::strategies::StrategyEngine;

    fn state() -> Arc<AppState> {
        let config = EngineConfig::default();
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let executor = Arc::new(PaperExecutor::new(
            Portfolio::new(&config.user_id, config.total_capital, config.max_daily_loss()),
            config.lot_size,
            true,
        ));
        Arc::new(AppState::new(
            config,
            storage,
            executor,
            StrategyEngine::with_default_strategies(),
            EventBus::new(),
        ))
    }

    #[test]
    fn topic_parsing() {
        assert_eq!(Topic::parse("ticks"), Some(Topic::Ticks));
        assert_eq!(Topic::parse("portfolio"), Some(Topic::Portfolio));
        assert_eq!(Topic::parse("nonsense"), None);
    }

    #[test]
    fn events_map_to_tagged_messages() {
        let portfolio = Portfolio::new("paper", 20_000.0, 600.0);
        let (topic, json) =
            event_to_message(&EngineEvent::PortfolioUpdate(portfolio)).unwrap();
        assert_eq!(topic, Some(Topic::Portfolio));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "portfolio:update");
        assert_eq!(value["data"]["user_id"], "paper");
    }

    #[test]
    fn connection_status_bypasses_topics() {
        let event = EngineEvent::ConnectionStatus(ConnectionStatus {
            connected: true,
            subscribed_instruments: 1,
            last_packet_age_ms: None,
        });
        let (topic, json) = event_to_message(&event).unwrap();
        assert_eq!(topic, None);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "connection:status");
        assert_eq!(value["data"]["connected"], true);
    }

    #[test]
    fn depth_analytics_stay_internal() {
        let analytics = crate::market_data::DepthAnalytics {
            security_id: 13,
            total_bid_qty: 0,
            total_ask_qty: 0,
            imbalance: 1.0,
            absorption_side: None,
            absorption_strength_pct: 0.0,
            strongest_bid: None,
            strongest_ask: None,
        };
        assert!(event_to_message(&EngineEvent::DepthAnalytics(analytics)).is_none());
    }

    #[test]
    fn request_commands_reply_through_queue() {
        let state = state();
        let topics = Arc::new(RwLock::new(HashSet::new()));
        let (tx, mut rx) = mpsc::channel(16);

        handle_command("request:portfolio", &state, &topics, &tx);
        let json = rx.try_recv().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "portfolio:update");

        handle_command("request:positions", &state, &topics, &tx);
        let value: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "positions:list");

        handle_command("request:strategies", &state, &topics, &tx);
        let value: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "strategies:status");
        assert_eq!(value["data"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn subscribe_command_updates_topic_set() {
        let state = state();
        let topics = Arc::new(RwLock::new(HashSet::new()));
        let (tx, _rx) = mpsc::channel(16);

        handle_command("subscribe:ticks", &state, &topics, &tx);
        handle_command("subscribe:positions", &state, &topics, &tx);
        handle_command("subscribe:bogus", &state, &topics, &tx);

        let set = topics.read();
        assert!(set.contains(&Topic::Ticks));
        assert!(set.contains(&Topic::Positions));
        assert_eq!(set.len(), 2);
    }
}
