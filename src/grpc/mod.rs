//! gRPC surface for streaming and point queries
//!
//! Proto types are checked in under [`pb`]; regenerate with the
//! `codegen` feature after editing `proto/pricefeed.proto`.

pub mod pb;
pub mod server;

pub use server::PriceFeedService;
