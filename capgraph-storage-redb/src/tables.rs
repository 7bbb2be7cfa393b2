//! Table definitions for the redb-backed persisted state.

use redb::TableDefinition;

/// Tool and capability nodes, keyed by their string id (`tool_id` or the
/// capability's UUID rendered as a string).
pub(crate) const NODES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Execution traces, keyed by `trace_id` rendered as a string.
pub(crate) const TRACES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("traces");

/// Episodic events, keyed by `event_id` rendered as a string. Queried by
/// linear scan (see `episodic.rs`); at this store's scale a secondary
/// index would cost more to maintain than it saves.
pub(crate) const EVENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("episodic_events");

/// SHGAT parameter checkpoint, a single opaque blob under a fixed key.
pub(crate) const PARAMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("params");
pub(crate) const PARAMS_KEY: &str = "shgat";

/// Maximum size accepted when deserializing a single stored value (10 MB).
/// Guards against a corrupted or maliciously large payload causing an OOM.
pub(crate) const MAX_VALUE_SIZE: usize = 10_000_000;
