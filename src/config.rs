//! Process configuration from environment variables
//!
//! Every knob has a working default so the pipeline runs with no
//! environment at all. Unparseable values fall back to the default
//! with a warning instead of aborting startup.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

use crate::aggregator::Strategy;
use crate::amqp::AmqpConfig;

/// Default cadence between simulated ticks
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 333;
/// Default per-tick volatility for the price walk
pub const DEFAULT_VOLATILITY: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// WebSocket listen address
    pub ws_addr: SocketAddr,
    /// gRPC listen address
    pub grpc_addr: SocketAddr,
    /// Broker settings, absent when no AMQP_URI is configured
    pub amqp: Option<AmqpConfig>,
    /// Per-second selection strategy
    pub strategy: Strategy,
    /// Volatility of the simulated walk
    pub volatility: f64,
    /// Cadence between simulated ticks
    pub tick_interval: Duration,
}

impl AppConfig {
    /// Load configuration from the environment
    pub fn from_env() -> Self {
        let ws_addr = parse_env("WS_ADDR", "127.0.0.1:3000".parse().unwrap());
        let grpc_addr = parse_env("GRPC_ADDR", "127.0.0.1:50051".parse().unwrap());

        let amqp = std::env::var("AMQP_URI").ok().map(|uri| {
            let mut config = AmqpConfig::with_uri(uri);
            if let Ok(exchange) = std::env::var("AMQP_EXCHANGE") {
                config.exchange = exchange;
            }
            config
        });

        let strategy = match std::env::var("PRICE_STRATEGY") {
            Ok(raw) => Strategy::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "unknown PRICE_STRATEGY, using best");
                Strategy::Best
            }),
            Err(_) => Strategy::Best,
        };

        let volatility = parse_env("PRICE_VOLATILITY", DEFAULT_VOLATILITY);
        let tick_interval_ms: u64 = parse_env("TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS);

        Self {
            ws_addr,
            grpc_addr,
            amqp,
            strategy,
            volatility,
            tick_interval: Duration::from_millis(tick_interval_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr + std::fmt::Debug>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var = name, value = %raw, default = ?default, "unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; each uses its own variable
    // names to stay independent of test ordering.

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_env();
        assert_eq!(config.volatility, DEFAULT_VOLATILITY);
        assert_eq!(
            config.tick_interval,
            Duration::from_millis(DEFAULT_TICK_INTERVAL_MS)
        );
        assert_eq!(config.strategy, Strategy::Best);
    }

    #[test]
    fn test_parse_env_fallback_on_garbage() {
        std::env::set_var("TEST_PARSE_ENV_GARBAGE", "not-a-number");
        let value: u64 = parse_env("TEST_PARSE_ENV_GARBAGE", 42);
        assert_eq!(value, 42);
        std::env::remove_var("TEST_PARSE_ENV_GARBAGE");
    }

    #[test]
    fn test_parse_env_reads_value() {
        std::env::set_var("TEST_PARSE_ENV_VALID", "250");
        let value: u64 = parse_env("TEST_PARSE_ENV_VALID", 42);
        assert_eq!(value, 250);
        std::env::remove_var("TEST_PARSE_ENV_VALID");
    }
}
