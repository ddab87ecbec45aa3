//! Pipeline orchestration and the query surface
//!
//! [`PriceService`] sits between the generating side and the serving
//! side. Its ingest loop drains raw simulator ticks into history, the
//! cache, and the broker; its selected loop drains aggregated
//! per-second prices into the WebSocket hub. Point queries resolve
//! through a fallback chain so a cold cache never turns into a hard
//! miss while the simulator is alive.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::amqp::TickPublisher;
use crate::cache::PriceCache;
use crate::history::{HistoryRepository, Result as HistoryResult};
use crate::models::{Interval, Kline, Price, Symbol};
use crate::simulator::PriceSimulator;
use crate::websocket::Hub;

/// Broker publish attempts per tick before the tick is dropped.
const PUBLISH_MAX_RETRIES: u32 = 3;

pub struct PriceService {
    simulator: Arc<PriceSimulator>,
    cache: Arc<PriceCache>,
    history: Arc<dyn HistoryRepository>,
    publisher: Option<Arc<TickPublisher>>,
}

impl PriceService {
    pub fn new(
        simulator: Arc<PriceSimulator>,
        cache: Arc<PriceCache>,
        history: Arc<dyn HistoryRepository>,
        publisher: Option<Arc<TickPublisher>>,
    ) -> Self {
        Self {
            simulator,
            cache,
            history,
            publisher,
        }
    }

    /// Drain raw simulator ticks into history, the cache, and the
    /// broker
    ///
    /// History failures are logged and skipped. Publishing retries
    /// with backoff a bounded number of times, then drops the tick;
    /// neither a storage hiccup nor a broker outage may stall tick
    /// generation or cache freshness.
    pub async fn run_ingest(&self, mut tick_rx: mpsc::Receiver<Price>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ingest loop stopping");
                    break;
                }
                tick = tick_rx.recv() => {
                    let Some(tick) = tick else {
                        debug!("tick feed closed, ingest loop stopping");
                        break;
                    };
                    if let Err(e) = self.history.write_price(&tick).await {
                        warn!(symbol = %tick.symbol, error = %e, "history write failed");
                    }
                    self.cache.set_latest(&tick);
                    self.cache.push_second(&tick);
                    if let Some(publisher) = &self.publisher {
                        if let Err(e) =
                            publisher.publish_with_retry(&tick, PUBLISH_MAX_RETRIES).await
                        {
                            warn!(symbol = %tick.symbol, error = %e, "tick publish dropped");
                        }
                    }
                }
            }
        }
    }

    /// Drain selected per-second prices into the WebSocket hub
    pub async fn run_selected(
        &self,
        mut selected_rx: mpsc::Receiver<Price>,
        hub: Hub,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("selected loop stopping");
                    break;
                }
                price = selected_rx.recv() => {
                    let Some(price) = price else {
                        debug!("selected feed closed, loop stopping");
                        break;
                    };
                    hub.deliver(&price);
                }
            }
        }
    }

    /// Latest price with fallback: live simulator state, then cache,
    /// then history
    pub async fn current_price(&self, symbol: Symbol) -> Option<Price> {
        if let Some(price) = self.simulator.current_price(symbol) {
            return Some(price);
        }
        if let Some(price) = self.cache.latest(symbol) {
            return Some(price);
        }
        self.history.latest_price(symbol).await.ok().flatten()
    }

    /// Latest prices for several symbols; unknown state yields a gap,
    /// not an error
    ///
    /// An empty request means "everything" and snapshots the whole
    /// simulator board in one pass.
    pub async fn current_prices(&self, symbols: &[Symbol]) -> Vec<Price> {
        if symbols.is_empty() {
            return self.simulator.all_prices();
        }
        let mut out = Vec::with_capacity(symbols.len());
        for &symbol in symbols {
            if let Some(price) = self.current_price(symbol).await {
                out.push(price);
            }
        }
        out
    }

    pub async fn klines(
        &self,
        symbol: Symbol,
        interval: Interval,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> HistoryResult<Vec<Kline>> {
        self.history
            .klines(symbol, interval, start_ms, end_ms, limit)
            .await
    }

    /// Raw ticks cached for one epoch second
    pub fn second_prices(&self, symbol: Symbol, second: i64) -> Vec<Price> {
        self.cache.second_prices(symbol, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::market_data::TickDistributor;
    use std::time::Duration;

    fn tick(symbol: Symbol, price: f64, timestamp: i64) -> Price {
        Price {
            symbol,
            price,
            timestamp,
            change: 0.0,
            change_percent: 0.0,
        }
    }

    fn service() -> Arc<PriceService> {
        let distributor = Arc::new(TickDistributor::new());
        let simulator = Arc::new(PriceSimulator::new(
            distributor,
            0.01,
            Duration::from_millis(333),
        ));
        Arc::new(PriceService::new(
            simulator,
            Arc::new(PriceCache::new()),
            Arc::new(MemoryHistory::new()),
            None,
        ))
    }

    #[tokio::test]
    async fn test_ingest_populates_cache_and_history() {
        let service = service();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let runner = Arc::clone(&service);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            runner.run_ingest(rx, loop_cancel).await;
        });

        tx.send(tick(Symbol::Gold, 1850.0, 1_700_000_000_000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(service.cache.latest(Symbol::Gold).unwrap().price, 1850.0);
        assert_eq!(
            service.second_prices(Symbol::Gold, 1_700_000_000).len(),
            1
        );
        let stored = service
            .history
            .latest_price(Symbol::Gold)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.price, 1850.0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_selected_reaches_hub_subscriber() {
        use crate::websocket::{hub::ClientHandle, WsMessage};
        use uuid::Uuid;

        let service = service();
        let hub = Hub::new();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let client_id = Uuid::new_v4();
        let (client_tx, mut client_rx) = mpsc::channel(16);
        hub.register(client_id, ClientHandle::new(client_tx, CancellationToken::new()))
            .await;
        hub.subscribe(client_id, Symbol::Silver).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let runner = Arc::clone(&service);
        let loop_cancel = cancel.clone();
        let loop_hub = hub.clone();
        let handle = tokio::spawn(async move {
            runner.run_selected(rx, loop_hub, loop_cancel).await;
        });

        tx.send(tick(Symbol::Silver, 24.5, 1_700_000_001_000))
            .await
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match client_rx.recv().await {
                    Some(WsMessage::PriceUpdate { symbol, price, .. }) => break (symbol, price),
                    Some(_) => continue,
                    None => panic!("client queue closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(delivered, (Symbol::Silver, 24.5));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_current_price_served_from_live_state() {
        let service = service();
        let live = service.current_price(Symbol::Gold).await.unwrap();
        assert_eq!(live.price, Symbol::Gold.initial_price());
    }

    #[tokio::test]
    async fn test_current_prices_skips_missing() {
        let service = service();
        let prices = service
            .current_prices(&[Symbol::Gold, Symbol::Palladium])
            .await;
        assert_eq!(prices.len(), 2);
    }

    #[tokio::test]
    async fn test_current_prices_empty_request_snapshots_all() {
        let service = service();
        let prices = service.current_prices(&[]).await;
        assert_eq!(prices.len(), Symbol::all().len());
    }

    #[tokio::test]
    async fn test_ingest_retries_publish_then_drops_tick() {
        use crate::amqp::{AmqpConfig, ReconnectConfig, TickPublisher};

        // Nothing listens on port 1, so publish and reconnect both
        // fail; delays are shrunk to keep the retries inside the test.
        let mut config = AmqpConfig::with_uri("amqp://127.0.0.1:1");
        config.reconnect = ReconnectConfig {
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        };
        let publisher = Arc::new(TickPublisher::new(config));

        let distributor = Arc::new(TickDistributor::new());
        let simulator = Arc::new(PriceSimulator::new(
            distributor,
            0.01,
            Duration::from_millis(333),
        ));
        let service = Arc::new(PriceService::new(
            simulator,
            Arc::new(PriceCache::new()),
            Arc::new(MemoryHistory::new()),
            Some(Arc::clone(&publisher)),
        ));

        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let runner = Arc::clone(&service);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            runner.run_ingest(rx, loop_cancel).await;
        });

        tx.send(tick(Symbol::Gold, 1850.0, 1_700_000_000_000))
            .await
            .unwrap();

        // The tick is given up on after the retry budget, and the
        // caches are populated regardless of the broker outage.
        tokio::time::timeout(Duration::from_secs(5), async {
            while publisher.stats().ticks_failed == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("publish never gave up");
        assert_eq!(service.cache.latest(Symbol::Gold).unwrap().price, 1850.0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
