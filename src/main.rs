use price_stream::amqp::{TickConsumer, TickPublisher};
use price_stream::grpc::pb::price_feed_server::PriceFeedServer;
use price_stream::grpc::PriceFeedService;
use price_stream::websocket::{websocket_handler, WsState};
use price_stream::{
    AppConfig, Hub, MemoryHistory, PriceCache, PriceService, PriceSimulator, SecondAggregator,
    TickDistributor,
};

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Depth of the channels linking pipeline stages
const STAGE_QUEUE_CAPACITY: usize = 1024;

/// Delay before reattaching a failed broker consumer
const CONSUMER_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "price_stream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let cancel = CancellationToken::new();

    // Ctrl-C flips the shared token; every loop selects on it.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    // Generating side: simulator ticks fan out through the distributor.
    let distributor = Arc::new(TickDistributor::new());
    let simulator = Arc::new(PriceSimulator::new(
        Arc::clone(&distributor),
        config.volatility,
        config.tick_interval,
    ));

    let cache = Arc::new(PriceCache::new());
    let history = Arc::new(MemoryHistory::new());

    // Aggregation side: ticks arrive over the broker (or the in-process
    // link when no broker is configured) and one price per symbol per
    // second comes out.
    let (selected_tx, selected_rx) = mpsc::channel(STAGE_QUEUE_CAPACITY);
    let aggregator = Arc::new(SecondAggregator::new(config.strategy, selected_tx));
    tracing::info!(strategy = %aggregator.strategy(), "aggregator created");

    let publisher = match &config.amqp {
        Some(amqp_config) => {
            let publisher = Arc::new(TickPublisher::new(amqp_config.clone()));
            // A configured but unreachable broker is a boot failure.
            if let Err(e) = publisher.connect().await {
                tracing::error!(uri = %amqp_config.uri, error = %e, "broker connect failed");
                return;
            }
            tracing::info!(exchange = %amqp_config.exchange, "broker publisher connected");

            // Consumer side of the broker loop, reattached on failure.
            let consumer_config = amqp_config.clone();
            let consumer_aggregator = Arc::clone(&aggregator);
            let consumer_cancel = cancel.clone();
            tokio::spawn(async move {
                let consumer = TickConsumer::new(consumer_config);
                while !consumer_cancel.is_cancelled() {
                    match consumer
                        .run(Arc::clone(&consumer_aggregator), consumer_cancel.clone())
                        .await
                    {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "broker consumer stopped, retrying");
                            tokio::select! {
                                _ = consumer_cancel.cancelled() => break,
                                _ = tokio::time::sleep(CONSUMER_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            });

            Some(publisher)
        }
        None => {
            // No broker configured: feed the aggregator straight from
            // the distributor.
            tracing::info!("no AMQP_URI set, using in-process tick link");
            let (_link_id, mut link_rx) = distributor.subscribe(STAGE_QUEUE_CAPACITY);
            let link_aggregator = Arc::clone(&aggregator);
            let link_cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = link_cancel.cancelled() => break,
                        tick = link_rx.recv() => {
                            match tick {
                                Some(tick) => link_aggregator.ingest(tick),
                                None => break,
                            }
                        }
                    }
                }
            });
            None
        }
    };

    let service = Arc::new(PriceService::new(
        Arc::clone(&simulator),
        Arc::clone(&cache),
        history,
        publisher,
    ));

    // Ingest loop: cache and broker publication of raw ticks.
    let (_ingest_id, ingest_rx) = distributor.subscribe(STAGE_QUEUE_CAPACITY);
    {
        let service = Arc::clone(&service);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            service.run_ingest(ingest_rx, cancel).await;
        });
    }

    // Serving side: WebSocket hub fed by the selected-price loop.
    let hub = Hub::new();
    {
        let service = Arc::clone(&service);
        let hub = hub.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            service.run_selected(selected_rx, hub, cancel).await;
        });
    }

    // Aggregator window flushes.
    {
        let aggregator = Arc::clone(&aggregator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            aggregator.run_flush_timer(cancel).await;
        });
    }

    // Periodic cache expiry sweep.
    {
        let cache = Arc::clone(&cache);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => cache.purge_expired(),
                }
            }
        });
    }

    // Tick generation.
    {
        let simulator = Arc::clone(&simulator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            simulator.run(cancel).await;
        });
    }

    // gRPC server.
    let grpc_service = PriceFeedService::new(Arc::clone(&service), Arc::clone(&distributor));
    let grpc_addr = config.grpc_addr;
    let grpc_cancel = cancel.clone();
    let grpc_handle = tokio::spawn(async move {
        tracing::info!("gRPC server listening on {}", grpc_addr);
        if let Err(e) = tonic::transport::Server::builder()
            .add_service(PriceFeedServer::new(grpc_service))
            .serve_with_shutdown(grpc_addr, grpc_cancel.cancelled())
            .await
        {
            tracing::error!(error = %e, "gRPC server failed");
        }
    });

    // WebSocket server.
    let ws_state = Arc::new(WsState { hub });
    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(ws_state);

    let listener = match tokio::net::TcpListener::bind(config.ws_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.ws_addr, error = %e, "failed to bind WebSocket listener");
            cancel.cancel();
            return;
        }
    };
    tracing::info!("WebSocket server listening on ws://{}/ws", config.ws_addr);

    let shutdown = cancel.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "WebSocket server failed");
    }

    cancel.cancel();
    let _ = grpc_handle.await;
    tracing::info!("shutdown complete");
}
