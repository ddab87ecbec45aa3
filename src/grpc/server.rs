use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use super::pb;
use super::pb::price_feed_server::PriceFeed;
use crate::history::HistoryError;
use crate::market_data::TickDistributor;
use crate::models::{Interval, Price, Symbol};
use crate::service::PriceService;

/// Klines returned when the request leaves `limit` unset
const DEFAULT_KLINE_LIMIT: u32 = 100;
/// Hard cap on klines per response
const MAX_KLINE_LIMIT: u32 = 1000;
/// Default lookback when the request leaves the range unset
const DEFAULT_KLINE_RANGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Queue depth for one streaming subscriber
const STREAM_QUEUE_CAPACITY: usize = 64;

pub struct PriceFeedService {
    service: Arc<PriceService>,
    feed: Arc<TickDistributor>,
}

impl PriceFeedService {
    /// `feed` is the raw tick fan-out the streaming RPC subscribes to
    pub fn new(service: Arc<PriceService>, feed: Arc<TickDistributor>) -> Self {
        Self { service, feed }
    }

    /// Resolve requested symbol names; empty means every symbol
    fn resolve_symbols(raw: &[String]) -> Result<Vec<Symbol>, Status> {
        if raw.is_empty() {
            return Ok(Symbol::all());
        }
        let resolved: Vec<Symbol> = raw.iter().filter_map(|s| Symbol::parse(s)).collect();
        if resolved.is_empty() {
            return Err(Status::invalid_argument(format!(
                "no valid symbols in {raw:?}"
            )));
        }
        Ok(resolved)
    }
}

fn to_price_update(price: &Price) -> pb::PriceUpdate {
    pb::PriceUpdate {
        symbol: price.symbol.as_str().to_string(),
        price: price.price,
        timestamp: price.timestamp,
        change: price.change,
        change_percent: price.change_percent,
    }
}

fn to_price_response(price: &Price) -> pb::PriceResponse {
    pb::PriceResponse {
        symbol: price.symbol.as_str().to_string(),
        price: price.price,
        timestamp: price.timestamp,
        change: price.change,
        change_percent: price.change_percent,
    }
}

#[tonic::async_trait]
impl PriceFeed for PriceFeedService {
    type SubscribePricesStream = ReceiverStream<Result<pb::PriceUpdate, Status>>;

    async fn subscribe_prices(
        &self,
        request: Request<pb::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribePricesStream>, Status> {
        let symbols = Self::resolve_symbols(&request.into_inner().symbols)?;
        let wanted: HashSet<Symbol> = symbols.iter().copied().collect();
        info!(symbols = ?symbols, "grpc price subscription opened");

        let feed = Arc::clone(&self.feed);
        let (sub_id, mut feed_rx) = feed.subscribe(STREAM_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(price) = feed_rx.recv().await {
                if !wanted.contains(&price.symbol) {
                    continue;
                }
                if tx.send(Ok(to_price_update(&price))).await.is_err() {
                    break;
                }
            }
            feed.unsubscribe(sub_id);
            debug!("grpc price subscription closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_price(
        &self,
        request: Request<pb::GetPriceRequest>,
    ) -> Result<Response<pb::PriceResponse>, Status> {
        let raw = request.into_inner().symbol;
        let symbol = Symbol::parse(&raw)
            .ok_or_else(|| Status::invalid_argument(format!("unknown symbol: {raw}")))?;

        match self.service.current_price(symbol).await {
            Some(price) => Ok(Response::new(to_price_response(&price))),
            None => Err(Status::not_found(format!("no price for {symbol}"))),
        }
    }

    async fn get_prices(
        &self,
        request: Request<pb::GetPricesRequest>,
    ) -> Result<Response<pb::PricesResponse>, Status> {
        let symbols = Self::resolve_symbols(&request.into_inner().symbols)?;
        let prices = self.service.current_prices(&symbols).await;
        Ok(Response::new(pb::PricesResponse {
            prices: prices.iter().map(to_price_response).collect(),
        }))
    }

    async fn get_klines(
        &self,
        request: Request<pb::GetKlinesRequest>,
    ) -> Result<Response<pb::KlinesResponse>, Status> {
        let req = request.into_inner();
        let symbol = Symbol::parse(&req.symbol)
            .ok_or_else(|| Status::invalid_argument(format!("unknown symbol: {}", req.symbol)))?;
        let interval = Interval::parse(&req.interval).ok_or_else(|| {
            Status::invalid_argument(format!("unknown interval: {}", req.interval))
        })?;

        let limit = match req.limit {
            0 => DEFAULT_KLINE_LIMIT,
            n => n.min(MAX_KLINE_LIMIT),
        };

        let end_ms = if req.end_time > 0 {
            req.end_time
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        let start_ms = if req.start_time > 0 {
            req.start_time
        } else {
            end_ms - DEFAULT_KLINE_RANGE_MS
        };

        let klines = self
            .service
            .klines(symbol, interval, start_ms, end_ms, limit as usize)
            .await
            .map_err(|e| match e {
                HistoryError::InvalidRange { .. } => Status::invalid_argument(e.to_string()),
                HistoryError::Storage(_) => Status::internal(e.to_string()),
            })?;

        let total = klines.len() as u32;
        Ok(Response::new(pb::KlinesResponse {
            symbol: symbol.as_str().to_string(),
            interval: interval.as_str().to_string(),
            klines: klines
                .iter()
                .map(|k| pb::Kline {
                    timestamp: k.timestamp,
                    open: k.open,
                    high: k.high,
                    low: k.low,
                    close: k.close,
                    volume: k.volume,
                })
                .collect(),
            total,
        }))
    }
}
