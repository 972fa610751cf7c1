// =============================================================================
// Shared types used across the tickforge engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Exchange segment of an instrument, as the vendor feed encodes it.
///
/// The numeric value is the byte carried in the binary frame header; the
/// string form is what the JSON control messages expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeSegment {
    /// Index feed (e.g. NIFTY 50).
    #[serde(rename = "IDX_I")]
    Index,
    /// NSE equity.
    #[serde(rename = "NSE_EQ")]
    NseEquity,
    /// NSE futures & options.
    #[serde(rename = "NSE_FNO")]
    NseDerivatives,
    /// BSE equity.
    #[serde(rename = "BSE_EQ")]
    BseEquity,
}

impl ExchangeSegment {
    /// Wire byte used in the binary frame header.
    pub fn code(self) -> u8 {
        match self {
            Self::Index => 0,
            Self::NseEquity => 1,
            Self::NseDerivatives => 2,
            Self::BseEquity => 4,
        }
    }

    /// Decode the header byte. Unknown segments map to `None` so malformed
    /// frames can be counted and dropped instead of crashing the pipeline.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Index),
            1 => Some(Self::NseEquity),
            2 => Some(Self::NseDerivatives),
            4 => Some(Self::BseEquity),
            _ => None,
        }
    }

    /// String form used by the JSON subscription messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "IDX_I",
            Self::NseEquity => "NSE_EQ",
            Self::NseDerivatives => "NSE_FNO",
            Self::BseEquity => "BSE_EQ",
        }
    }
}

impl std::fmt::Display for ExchangeSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a trade signal or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1.0 for Buy, -1.0 for Sell. Used in PnL math.
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// The entry side that produces this position direction.
    pub fn from_entry(side: Side) -> Self {
        match side {
            Side::Buy => Self::Long,
            Side::Sell => Self::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Immutable instrument configuration, seeded via `seed-instruments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub security_id: u32,
    pub symbol: String,
    pub exchange_segment: ExchangeSegment,
    pub lot_size: u32,
    pub tick_size: f64,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One entry in the feed subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub segment: ExchangeSegment,
    pub security_id: u32,
}

impl std::fmt::Display for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment, self.security_id)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_code_roundtrip() {
        for seg in [
            ExchangeSegment::Index,
            ExchangeSegment::NseEquity,
            ExchangeSegment::NseDerivatives,
            ExchangeSegment::BseEquity,
        ] {
            assert_eq!(ExchangeSegment::from_code(seg.code()), Some(seg));
        }
    }

    #[test]
    fn unknown_segment_code_is_none() {
        assert_eq!(ExchangeSegment::from_code(99), None);
    }

    #[test]
    fn segment_serde_uses_wire_strings() {
        let json = serde_json::to_string(&ExchangeSegment::Index).unwrap();
        assert_eq!(json, "\"IDX_I\"");
        let seg: ExchangeSegment = serde_json::from_str("\"NSE_FNO\"").unwrap();
        assert_eq!(seg, ExchangeSegment::NseDerivatives);
    }

    #[test]
    fn side_signs() {
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(PositionSide::from_entry(Side::Sell), PositionSide::Short);
    }
}
