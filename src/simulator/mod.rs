use parking_lot::RwLock;
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::market_data::TickDistributor;
use crate::models::{Price, Symbol};

/// Per-symbol generator state
///
/// Mutated only by the simulator on each step; everything else reads
/// snapshots via [`PriceSimulator::current_price`].
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub current_price: f64,
    pub previous_price: f64,
    /// Milliseconds since epoch of the last step
    pub last_update: i64,
}

/// Synthetic tick generator
///
/// Steps every symbol with geometric Brownian motion on a fixed cadence
/// (3 ticks/second by default) and pushes each tick into the local
/// fan-out registry. Prices are clamped to [0.5x, 2x] of the symbol's
/// initial price so long runs stay bounded.
pub struct PriceSimulator {
    states: RwLock<HashMap<Symbol, SymbolState>>,
    distributor: Arc<TickDistributor>,
    volatility: f64,
    tick_interval: Duration,
}

impl PriceSimulator {
    pub fn new(
        distributor: Arc<TickDistributor>,
        volatility: f64,
        tick_interval: Duration,
    ) -> Self {
        let mut states = HashMap::new();
        for symbol in Symbol::all() {
            // Initial prices are clamped away from zero so the
            // change_percent division is always defined; the GBM clamp
            // range keeps them positive afterwards.
            let initial = symbol.initial_price().max(f64::MIN_POSITIVE);
            states.insert(
                symbol,
                SymbolState {
                    current_price: initial,
                    previous_price: initial,
                    last_update: chrono::Utc::now().timestamp_millis(),
                },
            );
        }

        Self {
            states: RwLock::new(states),
            distributor,
            volatility,
            tick_interval,
        }
    }

    /// Run the generation loop until the token is cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.tick_interval);
        tracing::info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            volatility = self.volatility,
            "price simulator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("price simulator stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    for price in self.step(now_ms) {
                        self.distributor.publish(&price);
                    }
                }
            }
        }
    }

    /// Advance every symbol one GBM step and return the generated ticks
    pub fn step(&self, now_ms: i64) -> Vec<Price> {
        let mut states = self.states.write();
        let mut prices = Vec::with_capacity(states.len());
        let mut rng = rand::rng();

        for symbol in Symbol::all() {
            let state = states.get_mut(&symbol).expect("state for every symbol");

            // S(t+dt) = S(t) * exp((mu - sigma^2/2) dt + sigma sqrt(dt) Z)
            let dt = 1.0;
            let drift = 0.0;
            let sigma = self.volatility;
            let z: f64 = rng.sample(StandardNormal);
            let exponent = (drift - 0.5 * sigma * sigma) * dt + sigma * dt.sqrt() * z;
            let mut new_price = state.current_price * exponent.exp();

            let initial = symbol.initial_price();
            new_price = new_price.clamp(initial * 0.5, initial * 2.0);

            let previous = state.current_price;
            let change = new_price - previous;
            let change_percent = change / previous * 100.0;

            state.previous_price = previous;
            state.current_price = new_price;
            state.last_update = now_ms;

            prices.push(Price {
                symbol,
                price: new_price,
                timestamp: now_ms,
                change,
                change_percent,
            });
        }

        prices
    }

    /// Snapshot of one symbol's latest price
    pub fn current_price(&self, symbol: Symbol) -> Option<Price> {
        let states = self.states.read();
        states.get(&symbol).map(|state| Price {
            symbol,
            price: state.current_price,
            timestamp: state.last_update,
            change: state.current_price - state.previous_price,
            change_percent: (state.current_price - state.previous_price)
                / state.previous_price
                * 100.0,
        })
    }

    /// Snapshot of every symbol's latest price
    pub fn all_prices(&self) -> Vec<Price> {
        Symbol::all()
            .into_iter()
            .filter_map(|symbol| self.current_price(symbol))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(volatility: f64) -> PriceSimulator {
        let distributor = Arc::new(TickDistributor::new());
        PriceSimulator::new(distributor, volatility, Duration::from_millis(333))
    }

    #[test]
    fn test_prices_stay_within_clamp_bounds() {
        let sim = simulator(0.5); // absurdly volatile on purpose

        for i in 0..1000 {
            for price in sim.step(i) {
                let initial = price.symbol.initial_price();
                assert!(
                    price.price >= initial * 0.5 && price.price <= initial * 2.0,
                    "{} out of bounds: {}",
                    price.symbol,
                    price.price
                );
            }
        }
    }

    #[test]
    fn test_zero_volatility_is_flat() {
        let sim = simulator(0.0);

        for i in 0..10 {
            for price in sim.step(i) {
                assert_eq!(price.price, price.symbol.initial_price());
                assert_eq!(price.change, 0.0);
                assert_eq!(price.change_percent, 0.0);
            }
        }

        let gold = sim.current_price(Symbol::Gold).unwrap();
        assert_eq!(gold.price, 1850.0);
    }

    #[test]
    fn test_step_updates_state_snapshot() {
        let sim = simulator(0.01);
        let stepped: Vec<Price> = sim.step(42);

        for price in &stepped {
            let snapshot = sim.current_price(price.symbol).unwrap();
            assert_eq!(snapshot.price, price.price);
            assert_eq!(snapshot.timestamp, 42);
        }
        assert_eq!(stepped.len(), Symbol::all().len());
    }

    #[tokio::test]
    async fn test_run_publishes_to_distributor() {
        let distributor = Arc::new(TickDistributor::new());
        let (_id, mut rx) = distributor.subscribe(64);
        let sim = Arc::new(PriceSimulator::new(
            distributor,
            0.01,
            Duration::from_millis(5),
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let sim = Arc::clone(&sim);
            let cancel = cancel.clone();
            tokio::spawn(async move { sim.run(cancel).await })
        };

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("tick within a second")
            .expect("channel open");
        assert!(first.price > 0.0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
