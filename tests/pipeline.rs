//! End-to-end pipeline test: simulator ticks → distributor → aggregator
//! → selected loop → hub client queues and the selected-price feed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use price_stream::cache::PriceCache;
use price_stream::history::{HistoryRepository, MemoryHistory};
use price_stream::websocket::{hub::ClientHandle, WsMessage};
use price_stream::{
    Hub, PriceService, PriceSimulator, SecondAggregator, Strategy, Symbol, TickDistributor,
};

#[tokio::test]
async fn simulator_ticks_reach_subscribed_client() {
    let cancel = CancellationToken::new();

    let distributor = Arc::new(TickDistributor::new());
    let simulator = Arc::new(PriceSimulator::new(
        Arc::clone(&distributor),
        0.01,
        Duration::from_millis(20),
    ));

    let (selected_tx, selected_rx) = mpsc::channel(256);
    let aggregator = Arc::new(SecondAggregator::new(Strategy::Best, selected_tx));

    // In-process link from the distributor into the aggregator.
    let (_link_id, mut link_rx) = distributor.subscribe(256);
    tokio::spawn({
        let aggregator = Arc::clone(&aggregator);
        async move {
            while let Some(tick) = link_rx.recv().await {
                aggregator.ingest(tick);
            }
        }
    });

    let service = Arc::new(PriceService::new(
        Arc::clone(&simulator),
        Arc::new(PriceCache::new()),
        Arc::new(MemoryHistory::new()),
        None,
    ));

    let hub = Hub::new();
    tokio::spawn({
        let service = Arc::clone(&service);
        let hub = hub.clone();
        let cancel = cancel.clone();
        async move {
            service.run_selected(selected_rx, hub, cancel).await;
        }
    });
    tokio::spawn({
        let aggregator = Arc::clone(&aggregator);
        let cancel = cancel.clone();
        async move {
            aggregator.run_flush_timer(cancel).await;
        }
    });
    tokio::spawn({
        let simulator = Arc::clone(&simulator);
        let cancel = cancel.clone();
        async move {
            simulator.run(cancel).await;
        }
    });

    // A hub client subscribed to GOLD.
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(64);
    hub.register(client_id, ClientHandle::new(tx, CancellationToken::new()))
        .await;
    hub.subscribe(client_id, Symbol::Gold).await;

    // Windows flush one second after they fill, so allow a few seconds.
    let update = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(WsMessage::PriceUpdate {
                    symbol, price, ..
                }) => break (symbol, price),
                Some(_) => continue,
                None => panic!("client queue closed before a price arrived"),
            }
        }
    })
    .await
    .expect("no price update within 5s");

    assert_eq!(update.0, Symbol::Gold);
    assert!(update.1 > 0.0);

    // The same selected price is queryable through the cache-backed
    // point API.
    let current = service.current_price(Symbol::Gold).await.unwrap();
    assert!(current.price >= Symbol::Gold.initial_price() * 0.5);
    assert!(current.price <= Symbol::Gold.initial_price() * 2.0);

    cancel.cancel();
}

#[tokio::test]
async fn generated_ticks_land_in_history() {
    let cancel = CancellationToken::new();

    let distributor = Arc::new(TickDistributor::new());
    let simulator = Arc::new(PriceSimulator::new(
        Arc::clone(&distributor),
        0.01,
        Duration::from_millis(20),
    ));

    let history = Arc::new(MemoryHistory::new());
    let history_repo: Arc<dyn HistoryRepository> = history.clone();
    let service = Arc::new(PriceService::new(
        Arc::clone(&simulator),
        Arc::new(PriceCache::new()),
        history_repo,
        None,
    ));

    let (_ingest_id, ingest_rx) = distributor.subscribe(256);
    tokio::spawn({
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        async move {
            service.run_ingest(ingest_rx, cancel).await;
        }
    });
    tokio::spawn({
        let simulator = Arc::clone(&simulator);
        let cancel = cancel.clone();
        async move {
            simulator.run(cancel).await;
        }
    });

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if history.len(Symbol::Platinum) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("history write did not happen");

    cancel.cancel();
}
