/// Local fan-out registry
///
/// Distributes ticks from the generator to any number of independent
/// in-process consumers (the gRPC streaming bridge and the price
/// service) over bounded per-subscriber queues.
pub mod tick_distributor;

pub use tick_distributor::{SubscriptionId, TickDistributor, TickDistributorStats};
