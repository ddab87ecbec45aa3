/// AMQP transport between the tick producer and the aggregating consumer
///
/// Ticks go out on a topic exchange keyed `tick.{SYMBOL}` and come back
/// in over an exclusive queue bound with `tick.#`.
pub mod config;
pub mod consumer;
pub mod publisher;

pub use config::{all_ticks_binding, tick_routing_key, AmqpConfig, ReconnectConfig};
pub use consumer::TickConsumer;
pub use publisher::{AmqpError, PublisherStats, TickPublisher};
