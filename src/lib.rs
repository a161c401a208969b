//! A client for an ordered, DupSort-capable key/value store that lives
//! behind a bidirectional streaming RPC channel rather than on local disk.
//!
//! The public surface mirrors an embedded store's cursor API —
//! [`DatabaseHandle`], [`Transaction`], [`Cursor`] — so code written
//! against a local store ports over with the same shapes, even though every
//! operation here is a network round trip. See [`Builder`] for how to
//! obtain a [`DatabaseHandle`], and [`DatabaseHandle::view`] /
//! [`DatabaseHandle::begin_ro`] for how to get a [`Transaction`] from one.
//!
//! This is a read-only client: every write-style method panics rather than
//! returning an error, since silently swallowing a write on a store that
//! cannot perform it would be worse than an abrupt failure.

mod builder;
mod channel;
mod cursor;
mod database;
mod error;
mod logging;
mod pb;
mod table;
mod transaction;
mod transport;
mod version;

pub use builder::Builder;
pub use cursor::{Cursor, KeyValue};
pub use database::{Context, DatabaseHandle};
pub use error::{Error, Result};
pub use logging::init as init_logging;
pub use table::{TableConfig, TableConfigFn, TableInfo, DEFAULT_TABLES};
pub use transaction::Transaction;
pub use version::{same_major, Version};

/// Pieces needed only to stand up an in-process mock server for tests:
/// the generated `Kv` service trait/server, and the in-memory duplex
/// transport `Builder::in_mem` dials into.
pub mod testing {
    pub use crate::pb::{
        CursorRequest, Kv, KvServer, Op, Pair, VersionReply, VersionRequest,
    };
    pub use crate::transport::InProcessListener;
}
