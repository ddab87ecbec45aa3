// Library Crate Root
// lib.rs

pub mod aggregator;
pub mod amqp;
pub mod cache;
pub mod config;
pub mod grpc;
pub mod history;
pub mod market_data;
pub mod models;
pub mod service;
pub mod simulator;
pub mod websocket;

// Re-export the pipeline building blocks at the crate root
pub use aggregator::{SecondAggregator, Strategy};
pub use cache::PriceCache;
pub use config::AppConfig;
pub use history::{HistoryRepository, MemoryHistory};
pub use market_data::TickDistributor;
pub use models::{Interval, Kline, Price, Symbol};
pub use service::PriceService;
pub use simulator::PriceSimulator;
pub use websocket::Hub;
