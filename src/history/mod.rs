//! Historical price storage
//!
//! Every raw simulator tick lands here on ingest so point queries can
//! fall back to durable-ish state and kline queries have a full tick
//! series to bucket from. The storage seam is a trait so the
//! in-memory backend can be swapped for a real database without
//! touching the query surface.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{Interval, Kline, Price, Symbol};

/// Per-symbol retention for the in-memory backend, in stored prices
const MEMORY_RETENTION: usize = 100_000;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Storage seam for selected prices and derived klines
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Append one selected price to the symbol's series
    async fn write_price(&self, price: &Price) -> Result<()>;

    /// Most recently written price for the symbol, if any
    async fn latest_price(&self, symbol: Symbol) -> Result<Option<Price>>;

    /// OHLC buckets over `[start_ms, end_ms]`, oldest first, at most
    /// `limit` buckets counted back from the end of the range
    async fn klines(
        &self,
        symbol: Symbol,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Kline>>;
}

/// In-memory history with bounded per-symbol retention
///
/// Prices are appended in arrival order, which for this pipeline is
/// also timestamp order. Kline buckets are aligned to interval
/// boundaries in epoch time and volume counts the ticks in the bucket.
pub struct MemoryHistory {
    series: RwLock<HashMap<Symbol, Vec<Price>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self, symbol: Symbol) -> usize {
        self.series
            .read()
            .get(&symbol)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, symbol: Symbol) -> bool {
        self.len(symbol) == 0
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryRepository for MemoryHistory {
    async fn write_price(&self, price: &Price) -> Result<()> {
        let mut series = self.series.write();
        let entry = series.entry(price.symbol).or_default();
        entry.push(price.clone());
        if entry.len() > MEMORY_RETENTION {
            let excess = entry.len() - MEMORY_RETENTION;
            entry.drain(..excess);
        }
        Ok(())
    }

    async fn latest_price(&self, symbol: Symbol) -> Result<Option<Price>> {
        Ok(self.series.read().get(&symbol).and_then(|s| s.last().cloned()))
    }

    async fn klines(
        &self,
        symbol: Symbol,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Kline>> {
        if start_ms > end_ms {
            return Err(HistoryError::InvalidRange {
                start: start_ms,
                end: end_ms,
            });
        }

        let series = self.series.read();
        let Some(prices) = series.get(&symbol) else {
            return Ok(Vec::new());
        };

        let bucket_ms = interval.duration_millis();
        let mut klines: Vec<Kline> = Vec::new();

        for price in prices {
            if price.timestamp < start_ms || price.timestamp > end_ms {
                continue;
            }
            let bucket_start = price.timestamp - price.timestamp.rem_euclid(bucket_ms);

            match klines.last_mut() {
                Some(kline) if kline.timestamp == bucket_start => {
                    kline.high = kline.high.max(price.price);
                    kline.low = kline.low.min(price.price);
                    kline.close = price.price;
                    kline.volume += 1.0;
                }
                _ => {
                    klines.push(Kline {
                        timestamp: bucket_start,
                        open: price.price,
                        high: price.price,
                        low: price.price,
                        close: price.price,
                        volume: 1.0,
                    });
                }
            }
        }

        if klines.len() > limit {
            let excess = klines.len() - limit;
            klines.drain(..excess);
        }
        Ok(klines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_at(symbol: Symbol, price: f64, timestamp: i64) -> Price {
        Price {
            symbol,
            price,
            timestamp,
            change: 0.0,
            change_percent: 0.0,
        }
    }

    #[tokio::test]
    async fn test_latest_price_tracks_writes() {
        let history = MemoryHistory::new();
        assert!(history
            .latest_price(Symbol::Gold)
            .await
            .unwrap()
            .is_none());

        history
            .write_price(&price_at(Symbol::Gold, 1850.0, 1_000))
            .await
            .unwrap();
        history
            .write_price(&price_at(Symbol::Gold, 1851.5, 2_000))
            .await
            .unwrap();

        let latest = history.latest_price(Symbol::Gold).await.unwrap().unwrap();
        assert_eq!(latest.price, 1851.5);
        assert_eq!(latest.timestamp, 2_000);
    }

    #[tokio::test]
    async fn test_symbols_are_independent() {
        let history = MemoryHistory::new();
        history
            .write_price(&price_at(Symbol::Gold, 1850.0, 1_000))
            .await
            .unwrap();

        assert!(history
            .latest_price(Symbol::Silver)
            .await
            .unwrap()
            .is_none());
        assert_eq!(history.len(Symbol::Gold), 1);
        assert!(history.is_empty(Symbol::Silver));
    }

    #[tokio::test]
    async fn test_klines_bucket_ohlc() {
        let history = MemoryHistory::new();
        // Two prices in the first minute, one in the second.
        for (price, ts) in [(100.0, 0), (105.0, 30_000), (102.0, 60_000)] {
            history
                .write_price(&price_at(Symbol::Gold, price, ts))
                .await
                .unwrap();
        }

        let klines = history
            .klines(Symbol::Gold, Interval::OneMinute, 0, 120_000, 100)
            .await
            .unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].timestamp, 0);
        assert_eq!(klines[0].open, 100.0);
        assert_eq!(klines[0].high, 105.0);
        assert_eq!(klines[0].low, 100.0);
        assert_eq!(klines[0].close, 105.0);
        assert_eq!(klines[0].volume, 2.0);
        assert_eq!(klines[1].timestamp, 60_000);
        assert_eq!(klines[1].volume, 1.0);
    }

    #[tokio::test]
    async fn test_klines_respect_range_and_limit() {
        let history = MemoryHistory::new();
        for i in 0..10 {
            history
                .write_price(&price_at(Symbol::Gold, 100.0 + i as f64, i * 60_000))
                .await
                .unwrap();
        }

        // Range excludes the first two minutes.
        let klines = history
            .klines(Symbol::Gold, Interval::OneMinute, 120_000, 600_000, 100)
            .await
            .unwrap();
        assert_eq!(klines.len(), 8);
        assert_eq!(klines[0].timestamp, 120_000);

        // Limit keeps the newest buckets.
        let klines = history
            .klines(Symbol::Gold, Interval::OneMinute, 0, 600_000, 3)
            .await
            .unwrap();
        assert_eq!(klines.len(), 3);
        assert_eq!(klines.last().unwrap().timestamp, 540_000);
    }

    #[tokio::test]
    async fn test_klines_empty_symbol_returns_empty() {
        let history = MemoryHistory::new();
        let klines = history
            .klines(Symbol::Palladium, Interval::OneHour, 0, 1_000_000, 100)
            .await
            .unwrap();
        assert!(klines.is_empty());
    }

    #[tokio::test]
    async fn test_klines_inverted_range_rejected() {
        let history = MemoryHistory::new();
        let err = history
            .klines(Symbol::Gold, Interval::OneMinute, 2_000, 1_000, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRange { .. }));
    }
}
