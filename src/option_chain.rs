// =============================================================================
// Option-Chain Poller — optional sentiment input for the confluence strategy
// =============================================================================
//
// Polls a REST endpoint for per-instrument option-chain aggregates on a
// five-minute cadence with a minimum three-second gap between instruments.
// The derived sentiment is cached per security; consumers treat a missing
// entry as "no opinion", never as a rejection.
//
// The poller only runs when an endpoint is configured.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{Side, SubscriptionEntry};

/// Poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(300);
/// Minimum spacing between per-instrument requests.
const PER_INSTRUMENT_GAP: Duration = Duration::from_secs(3);

/// Derived option-chain sentiment for one security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSentiment {
    pub security_id: u32,
    pub direction: Side,
    /// Conviction in [0, 100].
    pub strength_pct: f64,
    /// Put/call open-interest ratio the sentiment was derived from.
    pub pcr: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Shared cache of the latest sentiment per security.
pub type OptionSentimentCache = Arc<RwLock<HashMap<u32, OptionSentiment>>>;

pub fn new_cache() -> OptionSentimentCache {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Payload shape of the option-chain endpoint.
#[derive(Debug, Deserialize)]
struct OptionChainResponse {
    #[serde(rename = "putOpenInterest")]
    put_oi: f64,
    #[serde(rename = "callOpenInterest")]
    call_oi: f64,
}

/// Derive a directional sentiment from the put/call open-interest ratio.
///
/// A high PCR means heavy put writing, read as support below price (bullish);
/// a low PCR is the mirror. Strength grows with the distance from parity.
pub fn sentiment_from_pcr(security_id: u32, pcr: f64, fetched_at: DateTime<Utc>) -> OptionSentiment {
    let direction = if pcr >= 1.0 { Side::Buy } else { Side::Sell };
    let strength_pct = ((pcr - 1.0).abs() * 200.0).min(100.0);
    OptionSentiment {
        security_id,
        direction,
        strength_pct,
        pcr,
        fetched_at,
    }
}

async fn fetch_one(
    client: &reqwest::Client,
    endpoint: &str,
    security_id: u32,
) -> Result<OptionSentiment> {
    let url = format!("{endpoint}/option-chain?securityId={security_id}");
    let response: OptionChainResponse = client
        .get(&url)
        .send()
        .await
        .context("option-chain request failed")?
        .error_for_status()
        .context("option-chain request rejected")?
        .json()
        .await
        .context("option-chain payload did not parse")?;

    let pcr = if response.call_oi > 0.0 {
        response.put_oi / response.call_oi
    } else {
        1.0
    };
    Ok(sentiment_from_pcr(security_id, pcr, Utc::now()))
}

/// Run the poller until shutdown. Errors are logged and the cadence continues.
pub async fn run_poller(
    endpoint: String,
    subscriptions: Vec<SubscriptionEntry>,
    cache: OptionSentimentCache,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let client = reqwest::Client::new();
    info!(endpoint = %endpoint, instruments = subscriptions.len(), "option-chain poller started");

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("option-chain poller stopping");
                    return;
                }
                continue;
            }
        }

        for entry in &subscriptions {
            match fetch_one(&client, &endpoint, entry.security_id).await {
                Ok(sentiment) => {
                    debug!(
                        security_id = entry.security_id,
                        pcr = sentiment.pcr,
                        direction = %sentiment.direction,
                        strength = sentiment.strength_pct,
                        "option-chain sentiment updated"
                    );
                    cache.write().insert(entry.security_id, sentiment);
                }
                Err(e) => {
                    warn!(security_id = entry.security_id, error = %e, "option-chain poll failed");
                }
            }
            tokio::time::sleep(PER_INSTRUMENT_GAP).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_pcr_is_bullish() {
        let s = sentiment_from_pcr(13, 1.4, Utc::now());
        assert_eq!(s.direction, Side::Buy);
        assert!((s.strength_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn low_pcr_is_bearish() {
        let s = sentiment_from_pcr(13, 0.6, Utc::now());
        assert_eq!(s.direction, Side::Sell);
        assert!((s.strength_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn strength_is_capped() {
        let s = sentiment_from_pcr(13, 3.0, Utc::now());
        assert_eq!(s.strength_pct, 100.0);
    }

    #[test]
    fn parity_is_weak() {
        let s = sentiment_from_pcr(13, 1.0, Utc::now());
        assert_eq!(s.strength_pct, 0.0);
    }
}
