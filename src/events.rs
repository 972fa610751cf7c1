// =============================================================================
// Engine Event Bus — one-way fan-out from the pipeline to its consumers
// =============================================================================
//
// Every state change the UI cares about is published as an `EngineEvent` on a
// tokio broadcast channel. Publishing never blocks and never fails: with no
// subscribers the event is simply dropped, and a slow subscriber lags on its
// own receiver without back-pressuring the pipeline.
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::executor::Position;
use crate::market_data::{Candle, DepthAnalytics, EnrichedTick};
use crate::portfolio::Portfolio;
use crate::strategies::{AccumulationReport, Signal, StrategyStatus};

/// Buffered events per subscriber before lag kicks in.
const BUS_CAPACITY: usize = 2_048;

/// Feed connectivity snapshot, published on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub subscribed_instruments: usize,
    /// Age of the last parsed packet in milliseconds, if any was seen.
    pub last_packet_age_ms: Option<u64>,
}

/// Everything the pipeline tells the world.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick(EnrichedTick),
    CandleUpdate(Candle),
    CandleClose(Candle),
    Signal(Signal),
    PositionUpdate(Position),
    PositionClosed(Position),
    PortfolioUpdate(Portfolio),
    DepthAnalytics(DepthAnalytics),
    AccumulationReport(AccumulationReport),
    StrategiesStatus(Vec<StrategyStatus>),
    ConnectionStatus(ConnectionStatus),
}

/// Cheap-to-clone handle over the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. A send with no live receivers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::Portfolio;

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EngineEvent::PortfolioUpdate(Portfolio::new(
            "paper", 20_000.0, 600.0,
        )));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            EngineEvent::PortfolioUpdate(_)
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            EngineEvent::PortfolioUpdate(_)
        ));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::ConnectionStatus(ConnectionStatus {
            connected: true,
            subscribed_instruments: 1,
            last_packet_age_ms: None,
        }));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
