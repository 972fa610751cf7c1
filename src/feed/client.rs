// =============================================================================
// Feed Client — vendor market-feed transport
// =============================================================================
//
// State machine:
//
//   Disconnected -> Connecting -> Connected -> Subscribed -> (Degraded)
//                                                         -> Closing -> Disconnected
//
// The client owns the socket and the keepalive timer. Parsed packets are
// pushed, in arrival order, into an mpsc channel the pipeline consumes.
// Unexpected closes degrade the session and reconnect with exponential
// backoff, resubscribing the guarded set; a packet-50 disconnection with an
// auth-class reason is terminal and never reconnects.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::frame::{self, FeedError, FeedPacket};
use crate::config::EngineConfig;
use crate::events::{ConnectionStatus, EngineEvent, EventBus};
use crate::types::SubscriptionEntry;

/// Connection life-cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Degraded,
    Closing,
}

/// Which packet family this connection subscribes to. The vendor serves the
/// 20-level ladders on a separate connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    Quote,
    Depth,
}

/// Shared connection health, read by the status snapshot.
#[derive(Debug)]
pub struct FeedStatus {
    state: RwLock<FeedState>,
    last_packet_ms: RwLock<Option<i64>>,
    pub malformed_frames: AtomicU64,
}

impl FeedStatus {
    fn new() -> Self {
        Self {
            state: RwLock::new(FeedState::Disconnected),
            last_packet_ms: RwLock::new(None),
            malformed_frames: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), FeedState::Connected | FeedState::Subscribed)
    }

    pub fn last_packet_age_ms(&self) -> Option<u64> {
        self.last_packet_ms
            .read()
            .map(|at| (Utc::now().timestamp_millis() - at).max(0) as u64)
    }
}

/// How one socket session ended.
enum SessionEnd {
    /// Shutdown was requested; the unsubscribe message has been sent.
    Shutdown,
    /// The stream ended or a transient error occurred; caller reconnects.
    Degraded,
    /// The server tore the session down for a non-auth reason.
    ServerDisconnect(frame::DisconnectReason),
}

pub struct FeedClient {
    endpoint: String,
    token: String,
    client_id: String,
    mode: FeedMode,
    keepalive: Duration,
    reconnect_initial: Duration,
    max_attempts: u32,
    subscriptions: RwLock<HashSet<SubscriptionEntry>>,
    status: Arc<FeedStatus>,
    bus: EventBus,
}

impl FeedClient {
    pub fn new(config: &EngineConfig, mode: FeedMode, bus: EventBus) -> Self {
        Self {
            endpoint: config.feed_endpoint.clone(),
            token: config.feed_token.clone(),
            client_id: config.client_id.clone(),
            mode,
            keepalive: Duration::from_secs(config.keepalive_interval_secs),
            reconnect_initial: Duration::from_millis(config.reconnect_initial_delay_ms),
            max_attempts: config.reconnect_max_attempts,
            subscriptions: RwLock::new(config.subscription_set.iter().copied().collect()),
            status: Arc::new(FeedStatus::new()),
            bus,
        }
    }

    pub fn status(&self) -> Arc<FeedStatus> {
        Arc::clone(&self.status)
    }

    /// The current subscription set, ordered for stable control messages.
    pub fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        let mut entries: Vec<SubscriptionEntry> =
            self.subscriptions.read().iter().copied().collect();
        entries.sort_by_key(|e| (e.segment.code(), e.security_id));
        entries
    }

    /// Add instruments; the set keeps resubscription duplicate-free.
    pub fn add_subscriptions(&self, entries: &[SubscriptionEntry]) {
        let mut set = self.subscriptions.write();
        for entry in entries {
            set.insert(*entry);
        }
    }

    pub fn remove_subscriptions(&self, entries: &[SubscriptionEntry]) {
        let mut set = self.subscriptions.write();
        for entry in entries {
            set.remove(entry);
        }
    }

    fn set_state(&self, state: FeedState) {
        *self.status.state.write() = state;
    }

    fn publish_status(&self, connected: bool) {
        self.bus.publish(EngineEvent::ConnectionStatus(ConnectionStatus {
            connected,
            subscribed_instruments: self.subscriptions.read().len(),
            last_packet_age_ms: self.status.last_packet_age_ms(),
        }));
    }

    fn stream_url(&self) -> String {
        format!(
            "{}?version=2&token={}&clientID={}&authType=2",
            self.endpoint, self.token, self.client_id
        )
    }

    /// Delay before reconnect attempt `attempt` (1-based): initial * 2^(n-1).
    fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
        initial.saturating_mul(1u32 << (attempt - 1).min(16))
    }

    /// Run the connect/stream/reconnect loop until shutdown or a fatal error.
    pub async fn run(
        &self,
        tx: mpsc::Sender<FeedPacket>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FeedError> {
        let mut attempts: u32 = 0;

        loop {
            if *shutdown.borrow() {
                self.set_state(FeedState::Disconnected);
                return Ok(());
            }

            self.set_state(FeedState::Connecting);
            match self.run_session(&tx, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => {
                    self.set_state(FeedState::Disconnected);
                    self.publish_status(false);
                    info!(mode = ?self.mode, "feed client shut down cleanly");
                    return Ok(());
                }
                Ok(SessionEnd::ServerDisconnect(reason)) => {
                    warn!(mode = ?self.mode, reason = %reason, "server disconnected; will retry");
                    // The session was live; this outage gets a fresh budget.
                    attempts = 0;
                    self.set_state(FeedState::Degraded);
                    self.publish_status(false);
                }
                Ok(SessionEnd::Degraded) => {
                    attempts = 0;
                    self.set_state(FeedState::Degraded);
                    self.publish_status(false);
                }
                Err(e) if e.is_fatal_auth() => {
                    self.set_state(FeedState::Disconnected);
                    self.publish_status(false);
                    error!(mode = ?self.mode, error = %e, "fatal auth disconnect — not reconnecting");
                    return Err(e);
                }
                Err(e) => {
                    warn!(mode = ?self.mode, error = %e, "feed session error");
                    self.set_state(FeedState::Degraded);
                    self.publish_status(false);
                }
            }

            attempts += 1;
            if attempts > self.max_attempts {
                error!(
                    mode = ?self.mode,
                    attempts = self.max_attempts,
                    "feed unavailable — reconnect attempts exhausted"
                );
                return Err(FeedError::Unavailable {
                    attempts: self.max_attempts,
                });
            }

            let delay = Self::backoff_delay(self.reconnect_initial, attempts);
            info!(mode = ?self.mode, attempt = attempts, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One socket session: connect, subscribe, stream until it ends.
    async fn run_session(
        &self,
        tx: &mpsc::Sender<FeedPacket>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, FeedError> {
        let url = self.stream_url();
        debug!(mode = ?self.mode, endpoint = %self.endpoint, "connecting to market feed");

        let (ws_stream, _response) = connect_async(&url).await?;
        self.set_state(FeedState::Connected);
        info!(mode = ?self.mode, "feed connected");

        let (mut write, mut read) = ws_stream.split();

        // Subscribe the full set; the vendor caps instruments per request.
        let entries = self.subscriptions();
        let messages = match self.mode {
            FeedMode::Quote => frame::subscribe_messages(&entries)?,
            FeedMode::Depth => frame::depth_subscribe_messages(&entries)?,
        };
        for message in messages {
            write.send(Message::Text(message)).await?;
        }
        self.set_state(FeedState::Subscribed);
        self.publish_status(true);
        info!(mode = ?self.mode, instruments = entries.len(), "subscription sent");

        let mut keepalive = tokio::time::interval(self.keepalive);
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if !*shutdown.borrow() {
                        continue;
                    }
                    self.set_state(FeedState::Closing);
                    for message in frame::unsubscribe_messages(&self.subscriptions()) {
                        let _ = write.send(Message::Text(message)).await;
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }

                _ = keepalive.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "keepalive ping failed");
                        return Ok(SessionEnd::Degraded);
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let (packets, dropped) = frame::split_frames(&data);
                            if dropped > 0 {
                                self.status
                                    .malformed_frames
                                    .fetch_add(dropped as u64, Ordering::Relaxed);
                                warn!(dropped, "malformed frames dropped");
                            }
                            for packet in packets {
                                if let FeedPacket::Disconnect { reason, .. } = &packet {
                                    let reason = *reason;
                                    if reason.is_auth_class() {
                                        return Err(FeedError::ServerDisconnect(reason));
                                    }
                                    return Ok(SessionEnd::ServerDisconnect(reason));
                                }
                                *self.status.last_packet_ms.write() =
                                    Some(Utc::now().timestamp_millis());
                                if tx.send(packet).await.is_err() {
                                    // Pipeline is gone; treat as shutdown.
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                warn!(error = %e, "pong failed");
                                return Ok(SessionEnd::Degraded);
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("keepalive pong received");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "feed close frame received");
                            return Ok(SessionEnd::Degraded);
                        }
                        Some(Ok(_)) => {
                            // Text frames from the vendor are ignored.
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            warn!(mode = ?self.mode, "feed stream ended");
                            return Ok(SessionEnd::Degraded);
                        }
                    }
                }
            }
        }
    }
}
