use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::models::{Price, Symbol};

/// TTL of the latest-tick entry per symbol
const LATEST_TTL: Duration = Duration::from_secs(60);

/// TTL of a per-second tick list
const SECOND_TTL: Duration = Duration::from_secs(600);

/// Maximum ticks retained per (symbol, second) entry
const SECOND_CAPACITY: usize = 3;

/// Rolling in-process tick cache
///
/// Two surfaces: a single-entry-per-symbol latest-tick cache with a
/// short TTL, and a per-(symbol, second) list of the most recent ticks
/// of that second, bounded in length and expiry. Expired entries are
/// ignored on read and reaped by `purge_expired`.
pub struct PriceCache {
    latest: DashMap<Symbol, (Price, Instant)>,
    seconds: DashMap<(Symbol, i64), (Vec<Price>, Instant)>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            latest: DashMap::new(),
            seconds: DashMap::new(),
        }
    }

    /// Store the latest tick for its symbol
    pub fn set_latest(&self, price: &Price) {
        self.latest
            .insert(price.symbol, (price.clone(), Instant::now()));
    }

    /// Latest tick for a symbol, if present and not expired
    pub fn latest(&self, symbol: Symbol) -> Option<Price> {
        let entry = self.latest.get(&symbol)?;
        let (price, stored_at) = entry.value();
        if stored_at.elapsed() > LATEST_TTL {
            return None;
        }
        Some(price.clone())
    }

    /// Append a tick to its second's rolling list
    ///
    /// Keeps only the most recent [`SECOND_CAPACITY`] ticks per second.
    pub fn push_second(&self, price: &Price) {
        let key = (price.symbol, price.window_second());
        let mut entry = self
            .seconds
            .entry(key)
            .or_insert_with(|| (Vec::with_capacity(SECOND_CAPACITY), Instant::now()));

        let (ticks, _) = entry.value_mut();
        ticks.push(price.clone());
        if ticks.len() > SECOND_CAPACITY {
            let excess = ticks.len() - SECOND_CAPACITY;
            ticks.drain(..excess);
        }
    }

    /// All retained ticks for one (symbol, second) bucket
    pub fn second_prices(&self, symbol: Symbol, second: i64) -> Vec<Price> {
        match self.seconds.get(&(symbol, second)) {
            Some(entry) => {
                let (ticks, stored_at) = entry.value();
                if stored_at.elapsed() > SECOND_TTL {
                    Vec::new()
                } else {
                    ticks.clone()
                }
            }
            None => Vec::new(),
        }
    }

    /// Drop expired entries from both surfaces
    pub fn purge_expired(&self) {
        self.latest
            .retain(|_, (_, stored_at)| stored_at.elapsed() <= LATEST_TTL);
        self.seconds
            .retain(|_, (_, stored_at)| stored_at.elapsed() <= SECOND_TTL);
    }

    pub fn len(&self) -> usize {
        self.latest.len() + self.seconds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty() && self.seconds.is_empty()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: Symbol, price: f64, timestamp: i64) -> Price {
        Price {
            symbol,
            price,
            timestamp,
            change: 0.0,
            change_percent: 0.0,
        }
    }

    #[test]
    fn test_latest_round_trip() {
        let cache = PriceCache::new();
        assert!(cache.latest(Symbol::Gold).is_none());

        cache.set_latest(&tick(Symbol::Gold, 1850.0, 100_000));
        assert_eq!(cache.latest(Symbol::Gold).unwrap().price, 1850.0);
        assert!(cache.latest(Symbol::Silver).is_none());
    }

    #[test]
    fn test_latest_overwrites() {
        let cache = PriceCache::new();
        cache.set_latest(&tick(Symbol::Gold, 1850.0, 100_000));
        cache.set_latest(&tick(Symbol::Gold, 1851.0, 100_333));

        assert_eq!(cache.latest(Symbol::Gold).unwrap().price, 1851.0);
    }

    #[test]
    fn test_second_list_keeps_most_recent_three() {
        let cache = PriceCache::new();
        for i in 0..5 {
            cache.push_second(&tick(Symbol::Gold, i as f64, 100_000 + i * 100));
        }

        let ticks = cache.second_prices(Symbol::Gold, 100);
        assert_eq!(ticks.len(), 3);
        // Oldest two were trimmed.
        assert_eq!(ticks[0].price, 2.0);
        assert_eq!(ticks[2].price, 4.0);
    }

    #[test]
    fn test_second_buckets_are_independent() {
        let cache = PriceCache::new();
        cache.push_second(&tick(Symbol::Gold, 1.0, 100_000));
        cache.push_second(&tick(Symbol::Gold, 2.0, 101_000));
        cache.push_second(&tick(Symbol::Silver, 3.0, 100_000));

        assert_eq!(cache.second_prices(Symbol::Gold, 100).len(), 1);
        assert_eq!(cache.second_prices(Symbol::Gold, 101).len(), 1);
        assert_eq!(cache.second_prices(Symbol::Silver, 100).len(), 1);
        assert!(cache.second_prices(Symbol::Silver, 101).is_empty());
    }

    #[test]
    fn test_purge_keeps_fresh_entries() {
        let cache = PriceCache::new();
        cache.set_latest(&tick(Symbol::Gold, 1850.0, 100_000));
        cache.push_second(&tick(Symbol::Gold, 1850.0, 100_000));

        cache.purge_expired();
        assert_eq!(cache.len(), 2);
    }
}
