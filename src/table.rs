//! Table configuration: the bucket-name → flags map the handle validates
//! cursor operations against. Carries only the one flag this client cares
//! about — whether a table is DupSort — since keys and values here are
//! opaque bytes relayed from the wire rather than statically typed table
//! objects.

use maplit::hashmap;
use once_cell::sync::Lazy;
use std::{collections::HashMap, sync::Arc};

/// Per-table configuration known to a [`crate::DatabaseHandle`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TableInfo {
    /// Whether this table stores multiple sorted values per key.
    pub dup_sort: bool,
}

/// The effective table name → configuration map. Shared (`Arc`) because it
/// is deep-copied once at `Builder::open` time and then handed to every
/// transaction and cursor the handle mints.
pub type TableConfig = Arc<HashMap<String, TableInfo>>;

/// A caller-supplied transform from the default chaindata table map to the
/// effective one, as accepted by `Builder::with_tables_config`.
pub type TableConfigFn = Arc<dyn Fn(TableConfig) -> TableConfig + Send + Sync>;

/// The default chaindata table map, named after the same buckets the
/// embedded store this client stands in for would expose. Callers running
/// against a differently configured remote pass their own transform to
/// `Builder::with_tables_config`.
pub static DEFAULT_TABLES: Lazy<TableConfig> = Lazy::new(|| {
    Arc::new(hashmap! {
        "PlainState".to_string() => TableInfo { dup_sort: true },
        "PlainCodeHash".to_string() => TableInfo::default(),
        "AccountChangeSet".to_string() => TableInfo { dup_sort: true },
        "StorageChangeSet".to_string() => TableInfo { dup_sort: true },
        "HashedAccount".to_string() => TableInfo::default(),
        "HashedStorage".to_string() => TableInfo { dup_sort: true },
        "AccountHistory".to_string() => TableInfo::default(),
        "StorageHistory".to_string() => TableInfo::default(),
        "Code".to_string() => TableInfo::default(),
        "HashedCodeHash".to_string() => TableInfo::default(),
        "TrieAccount".to_string() => TableInfo::default(),
        "TrieStorage".to_string() => TableInfo::default(),
        "DbInfo".to_string() => TableInfo::default(),
        "HeaderNumber".to_string() => TableInfo::default(),
        "CanonicalHeader".to_string() => TableInfo::default(),
        "Headers".to_string() => TableInfo::default(),
        "HeadersTotalDifficulty".to_string() => TableInfo::default(),
        "BlockBody".to_string() => TableInfo::default(),
        "BlockTransaction".to_string() => TableInfo::default(),
        "Receipt".to_string() => TableInfo::default(),
        "CallTraceSet".to_string() => TableInfo { dup_sort: true },
        "Config".to_string() => TableInfo::default(),
        "SyncStage".to_string() => TableInfo::default(),
        "TxSender".to_string() => TableInfo::default(),
        "LastBlock".to_string() => TableInfo::default(),
        "Sequence".to_string() => TableInfo::default(),
        "LastHeader".to_string() => TableInfo::default(),
        "Issuance".to_string() => TableInfo::default(),
    })
});
