pub mod kline;
pub mod price;

pub use kline::{Interval, Kline};
pub use price::{Price, Symbol};
