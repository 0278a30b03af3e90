pub mod aggregator;
pub mod backend;
pub mod external;
pub mod label_filter;
pub mod observe;
pub mod query;
pub mod query_config;
pub mod snapshot_store;
pub mod types;

pub use aggregator::MetricsAggregator;
pub use types::{MetricRecord, NodeIdentity, Snapshot, SnapshotScope};
