// =============================================================================
// CandleStore — thread-safe ring of closed candles per (security, interval)
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use super::candle::{Candle, CandleKey};

/// Thread-safe ring buffer that retains the most recent closed candles per
/// `(security, interval)` key. The aggregator appends on every bar close; the
/// multi-timeframe confirmer and the strategies read history from here.
pub struct CandleStore {
    rings: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleStore {
    /// Create a store that retains at most `max_candles` closed candles per
    /// key.
    pub fn new(max_candles: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Append a closed candle. Re-pushing the same bar (same timestamp)
    /// replaces the stored copy so upserts stay idempotent.
    pub fn push_closed(&self, candle: Candle) {
        debug_assert!(candle.is_closed);
        let mut map = self.rings.write();
        let ring = map
            .entry(candle.key())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if let Some(last) = ring.back_mut() {
            if last.timestamp == candle.timestamp {
                *last = candle;
                return;
            }
        }
        ring.push_back(candle);
        while ring.len() > self.max_candles {
            ring.pop_front();
        }
    }

    /// The most recent `count` closed candles, oldest first.
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.rings.read();
        match map.get(key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// The most recent `count` close prices, oldest first.
    pub fn get_closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.get_closed(key, count).iter().map(|c| c.close).collect()
    }

    /// The most recent closed candle, if any.
    pub fn last(&self, key: &CandleKey) -> Option<Candle> {
        self.rings.read().get(key).and_then(|r| r.back().cloned())
    }

    /// Number of closed candles stored for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        self.rings.read().get(key).map_or(0, VecDeque::len)
    }

    /// Total candles across all keys, for the status snapshot.
    pub fn total_count(&self) -> usize {
        self.rings.read().values().map(VecDeque::len).sum()
    }
}
