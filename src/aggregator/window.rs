use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Price, Symbol};

/// Rule selecting one representative tick from a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Lowest price in the window (best for the buyer)
    Best,
    /// Highest price in the window
    Worst,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Best => "best",
            Strategy::Worst => "worst",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "best" => Some(Strategy::Best),
            "worst" => Some(Strategy::Worst),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// All ticks for one symbol within one whole-second bucket
///
/// At most one live window exists per symbol; the aggregator replaces
/// it (after flushing) when a tick for a different second arrives.
#[derive(Debug, Clone)]
pub struct SecondWindow {
    pub symbol: Symbol,
    /// Timestamp truncated to whole seconds
    pub window_second: i64,
    prices: Vec<Price>,
}

impl SecondWindow {
    pub fn new(symbol: Symbol, window_second: i64) -> Self {
        Self {
            symbol,
            window_second,
            // Generator cadence is 3 ticks/second.
            prices: Vec::with_capacity(3),
        }
    }

    pub fn push(&mut self, price: Price) {
        self.prices.push(price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Select the representative tick; ties resolve to the first seen
    pub fn select(&self, strategy: Strategy) -> Option<&Price> {
        let mut selected: Option<&Price> = None;
        for price in &self.prices {
            selected = match selected {
                None => Some(price),
                Some(current) => {
                    let replace = match strategy {
                        Strategy::Best => price.price < current.price,
                        Strategy::Worst => price.price > current.price,
                    };
                    if replace {
                        Some(price)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, timestamp: i64) -> Price {
        Price {
            symbol: Symbol::Gold,
            price,
            timestamp,
            change: 0.0,
            change_percent: 0.0,
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(Strategy::parse("best"), Some(Strategy::Best));
        assert_eq!(Strategy::parse("worst"), Some(Strategy::Worst));
        assert_eq!(Strategy::parse("BEST"), None);
        assert_eq!(Strategy::parse("median"), None);
    }

    #[test]
    fn test_best_selects_minimum_worst_selects_maximum() {
        let mut window = SecondWindow::new(Symbol::Gold, 100);
        window.push(tick(10.0, 100_000));
        window.push(tick(12.0, 100_300));
        window.push(tick(8.0, 100_600));

        assert_eq!(window.select(Strategy::Best).unwrap().price, 8.0);
        assert_eq!(window.select(Strategy::Worst).unwrap().price, 12.0);
    }

    #[test]
    fn test_ties_resolve_to_first_seen() {
        let mut window = SecondWindow::new(Symbol::Gold, 100);
        window.push(tick(10.0, 100_000));
        window.push(tick(10.0, 100_300));
        window.push(tick(10.0, 100_600));

        assert_eq!(window.select(Strategy::Best).unwrap().timestamp, 100_000);
        assert_eq!(window.select(Strategy::Worst).unwrap().timestamp, 100_000);
    }

    #[test]
    fn test_empty_window_selects_nothing() {
        let window = SecondWindow::new(Symbol::Gold, 100);
        assert!(window.select(Strategy::Best).is_none());
        assert!(window.is_empty());
    }
}
