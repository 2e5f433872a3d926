//! Generated protobuf/tonic stubs. All seven `.proto` files share a single
//! `devnetd.v1` package, so `build.rs` emits one module to include here.

pub mod devnetd {
    pub mod v1 {
        tonic::include_proto!("devnetd.v1");
    }
}

pub use devnetd::v1::*;
