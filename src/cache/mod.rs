/// Rolling tick caches
///
/// Short-lived in-process caches fed by the price service: the latest
/// tick per symbol (fallback read path for point queries) and the last
/// few ticks of each second (debugging/inspection).
pub mod price_cache;

pub use price_cache::PriceCache;
