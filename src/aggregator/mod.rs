pub mod window;

pub use window::{SecondWindow, Strategy};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::models::{Price, Symbol};

/// Statistics for the second-window aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorStats {
    pub ticks_ingested: u64,
    pub windows_emitted: u64,
    pub windows_discarded: u64,
    pub emissions_dropped: u64,
    pub live_windows: usize,
}

/// Second-window aggregator
///
/// Buckets the raw tick stream into 1-second windows per symbol and
/// emits exactly one selected tick per non-empty window once the window
/// has closed. The window map is owned here and only mutated through
/// `ingest` and `flush_stale`.
///
/// When a tick arrives for a different second than the live window, the
/// live window is flushed first and then replaced, so a closed window's
/// data is never silently discarded on overwrite. The once-per-second
/// flush timer remains the path for windows that stop receiving ticks.
pub struct SecondAggregator {
    windows: Mutex<HashMap<Symbol, SecondWindow>>,
    strategy: Strategy,
    selected_tx: mpsc::Sender<Price>,
    ticks_ingested: AtomicU64,
    windows_emitted: AtomicU64,
    windows_discarded: AtomicU64,
    emissions_dropped: AtomicU64,
}

impl SecondAggregator {
    /// Create an aggregator emitting selected ticks into `selected_tx`
    pub fn new(strategy: Strategy, selected_tx: mpsc::Sender<Price>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            strategy,
            selected_tx,
            ticks_ingested: AtomicU64::new(0),
            windows_emitted: AtomicU64::new(0),
            windows_discarded: AtomicU64::new(0),
            emissions_dropped: AtomicU64::new(0),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Add one tick to its symbol's live window
    ///
    /// A tick whose second differs from the live window's closes that
    /// window (flush-then-replace) before the new window is installed.
    pub fn ingest(&self, price: Price) {
        self.ticks_ingested.fetch_add(1, Ordering::Relaxed);
        let second = price.window_second();
        let symbol = price.symbol;

        let mut windows = self.windows.lock();
        match windows.get_mut(&symbol) {
            Some(window) if window.window_second == second => {
                window.push(price);
            }
            Some(_) => {
                let closed = windows
                    .remove(&symbol)
                    .expect("window present in this branch");
                self.emit(closed);

                let mut window = SecondWindow::new(symbol, second);
                window.push(price);
                windows.insert(symbol, window);
            }
            None => {
                let mut window = SecondWindow::new(symbol, second);
                window.push(price);
                windows.insert(symbol, window);
                tracing::trace!(%symbol, second, "new second window");
            }
        }
    }

    /// Flush every window at least one full second behind `now_second`
    ///
    /// Windows exactly one second behind are emitted; older windows are
    /// unrecoverable backlog and are discarded without emission; the
    /// current second keeps collecting.
    pub fn flush_stale(&self, now_second: i64) {
        let mut windows = self.windows.lock();
        let closed: Vec<Symbol> = windows
            .values()
            .filter(|w| w.window_second < now_second)
            .map(|w| w.symbol)
            .collect();

        for symbol in closed {
            let window = windows.remove(&symbol).expect("collected above");
            if window.window_second == now_second - 1 {
                self.emit(window);
            } else {
                self.windows_discarded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %symbol,
                    window_second = window.window_second,
                    now_second,
                    ticks = window.len(),
                    "stale window discarded"
                );
            }
        }
    }

    /// Run the once-per-second flush loop until cancelled
    pub async fn run_flush_timer(&self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(1));
        tracing::info!(strategy = %self.strategy, "aggregator flush timer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("aggregator flush timer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let now_second = chrono::Utc::now().timestamp();
                    self.flush_stale(now_second);
                }
            }
        }
    }

    /// Apply the strategy and hand the selected tick downstream
    ///
    /// Non-blocking: a full downstream queue drops this emission rather
    /// than stalling ingest or the flush timer.
    fn emit(&self, window: SecondWindow) {
        let Some(selected) = window.select(self.strategy).cloned() else {
            return;
        };

        tracing::debug!(
            symbol = %selected.symbol,
            strategy = %self.strategy,
            price = selected.price,
            ticks = window.len(),
            "window flushed"
        );

        match self.selected_tx.try_send(selected) {
            Ok(()) => {
                self.windows_emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(price)) => {
                self.emissions_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(symbol = %price.symbol, "selected-tick queue full, emission dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("selected-tick queue closed");
            }
        }
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            ticks_ingested: self.ticks_ingested.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            windows_discarded: self.windows_discarded.load(Ordering::Relaxed),
            emissions_dropped: self.emissions_dropped.load(Ordering::Relaxed),
            live_windows: self.windows.lock().len(),
        }
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

    fn aggregator(strategy: Strategy) -> (SecondAggregator, mpsc::Receiver<Price>) {
        let (tx, rx) = mpsc::channel(16);
        (SecondAggregator::new(strategy, tx), rx)
    }

    #[tokio::test]
    async fn test_best_strategy_emits_minimum() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_000));
        agg.ingest(tick(Symbol::Gold, 12.0, 100_300));
        agg.ingest(tick(Symbol::Gold, 8.0, 100_600));

        agg.flush_stale(101);

        let emitted = rx.recv().await.unwrap();
        assert_eq!(emitted.price, 8.0);
        assert_eq!(emitted.symbol, Symbol::Gold);
    }

    #[tokio::test]
    async fn test_worst_strategy_emits_maximum() {
        let (agg, mut rx) = aggregator(Strategy::Worst);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_000));
        agg.ingest(tick(Symbol::Gold, 12.0, 100_300));
        agg.ingest(tick(Symbol::Gold, 8.0, 100_600));

        agg.flush_stale(101);

        assert_eq!(rx.recv().await.unwrap().price, 12.0);
    }

    #[tokio::test]
    async fn test_exactly_one_emission_per_window() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_100));
        agg.ingest(tick(Symbol::Gold, 11.0, 100_200));

        agg.flush_stale(101);
        agg.flush_stale(101);
        agg.flush_stale(102);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
        assert_eq!(agg.stats().windows_emitted, 1);
    }

    #[tokio::test]
    async fn test_window_mismatch_flushes_before_replacing() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_000));
        // Next second arrives before the flush timer ran.
        agg.ingest(tick(Symbol::Gold, 20.0, 101_000));

        // The displaced window was emitted, not discarded.
        assert_eq!(rx.try_recv().unwrap().price, 10.0);

        agg.flush_stale(102);
        assert_eq!(rx.try_recv().unwrap().price, 20.0);
    }

    #[tokio::test]
    async fn test_stale_window_discarded_without_emission() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_000));

        // Flush timer fires far in the future; the window is backlog.
        agg.flush_stale(105);

        assert!(rx.try_recv().is_err());
        assert_eq!(agg.stats().windows_discarded, 1);
        assert_eq!(agg.stats().windows_emitted, 0);
    }

    #[tokio::test]
    async fn test_current_second_keeps_collecting() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 10.0, 100_000));
        agg.flush_stale(100); // window is the current second

        assert!(rx.try_recv().is_err());
        assert_eq!(agg.stats().live_windows, 1);
    }

    #[tokio::test]
    async fn test_symbols_are_windowed_independently() {
        let (agg, mut rx) = aggregator(Strategy::Best);

        agg.ingest(tick(Symbol::Gold, 1850.0, 100_000));
        agg.ingest(tick(Symbol::Silver, 24.0, 100_500));

        agg.flush_stale(101);

        let mut symbols = vec![
            rx.recv().await.unwrap().symbol,
            rx.recv().await.unwrap().symbol,
        ];
        symbols.sort_by_key(|s| s.as_str());
        assert_eq!(symbols, vec![Symbol::Gold, Symbol::Silver]);
    }
}
