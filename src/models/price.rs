use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported commodity symbols
///
/// Closed enumeration; every other layer (simulator, hub, gRPC, AMQP
/// routing keys) works in terms of this type and rejects anything else
/// at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    Gold,
    Silver,
    Platinum,
    Palladium,
}

impl Symbol {
    /// String form used on every wire (JSON, routing keys, gRPC)
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Gold => "GOLD",
            Symbol::Silver => "SILVER",
            Symbol::Platinum => "PLATINUM",
            Symbol::Palladium => "PALLADIUM",
        }
    }

    /// Parse the wire string back to the enum
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOLD" => Some(Symbol::Gold),
            "SILVER" => Some(Symbol::Silver),
            "PLATINUM" => Some(Symbol::Platinum),
            "PALLADIUM" => Some(Symbol::Palladium),
            _ => None,
        }
    }

    /// All supported symbols
    pub fn all() -> Vec<Self> {
        vec![
            Symbol::Gold,
            Symbol::Silver,
            Symbol::Platinum,
            Symbol::Palladium,
        ]
    }

    /// Reference price the simulator starts from and clamps around
    pub fn initial_price(&self) -> f64 {
        match self {
            Symbol::Gold => 1850.0,
            Symbol::Silver => 24.0,
            Symbol::Platinum => 950.0,
            Symbol::Palladium => 1280.0,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One price observation for one symbol at one instant
///
/// Immutable once created. The serde field names are the wire encoding
/// shared by the AMQP payload and the per-second cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub symbol: Symbol,
    pub price: f64,
    /// Milliseconds since epoch
    pub timestamp: i64,
    pub change: f64,
    pub change_percent: f64,
}

impl Price {
    /// Whole second this tick falls into
    pub fn window_second(&self) -> i64 {
        self.timestamp / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_round_trip() {
        for symbol in Symbol::all() {
            assert_eq!(Symbol::parse(symbol.as_str()), Some(symbol));
        }
        assert_eq!(Symbol::parse("COPPER"), None);
        assert_eq!(Symbol::parse("gold"), None);
    }

    #[test]
    fn test_symbol_serde_as_upper_string() {
        let json = serde_json::to_string(&Symbol::Gold).unwrap();
        assert_eq!(json, "\"GOLD\"");

        let back: Symbol = serde_json::from_str("\"PALLADIUM\"").unwrap();
        assert_eq!(back, Symbol::Palladium);
    }

    #[test]
    fn test_initial_prices_are_positive() {
        for symbol in Symbol::all() {
            assert!(symbol.initial_price() > 0.0);
        }
    }

    #[test]
    fn test_price_wire_encoding() {
        let price = Price {
            symbol: Symbol::Gold,
            price: 1850.5,
            timestamp: 1_700_000_000_123,
            change: 0.5,
            change_percent: 0.027,
        };

        let json = serde_json::to_value(&price).unwrap();
        assert_eq!(json["symbol"], "GOLD");
        assert_eq!(json["price"], 1850.5);
        assert_eq!(json["timestamp"], 1_700_000_000_123_i64);
        assert_eq!(json["change_percent"], 0.027);
    }

    #[test]
    fn test_window_second_truncates() {
        let price = Price {
            symbol: Symbol::Silver,
            price: 24.0,
            timestamp: 1_700_000_000_999,
            change: 0.0,
            change_percent: 0.0,
        };
        assert_eq!(price.window_second(), 1_700_000_000);
    }
}
