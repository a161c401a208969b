//! Generated wire types for the `remotekv` service, compiled from
//! `proto/kv.proto` by `build.rs`. Kept in its own module so the rest of
//! the crate can depend on stable, hand-written names (`Op`, `CursorRequest`,
//! `Pair`, ...) without every file reaching through `tonic::include_proto!`.

tonic::include_proto!("remotekv");

pub use kv_client::KvClient;
pub use kv_server::{Kv, KvServer};
