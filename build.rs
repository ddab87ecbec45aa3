//! Regenerates proto types when the `codegen` feature is enabled.
//!
//! By default the checked-in `src/grpc/pb.rs` is used directly, so no
//! protoc or build-time codegen is needed. To regenerate after editing
//! `proto/pricefeed.proto`:
//!
//! ```bash
//! cargo build --features codegen
//! cp target/*/build/price-stream-*/out/pricefeed.rs src/grpc/pb.rs
//! ```

fn main() {
    #[cfg(feature = "codegen")]
    tonic_build::compile_protos("proto/pricefeed.proto").expect("failed to compile protos");
}
