use futures::future::join_all;
use std::{path::PathBuf, sync::Arc, time::Duration};

use super::{
    backend::{MetricsBackend, QueryValue},
    external::{to_records, ExternalSource},
    label_filter::filter_labels,
    observe::{PollOutcome, RelayMetrics},
    query_config::QueryConfigCell,
    snapshot_store::SnapshotStore,
    types::{MetricRecord, NodeIdentity, Snapshot, SnapshotScope},
};
use crate::result::{RelayFormatErr, RelayQueryErr, RelayReadErr, RelayResult};

/// Upper bound of a single backend query.
pub const BACKEND_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How the startup poll retries the backend call.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep between two attempts. No sleep follows the last one.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Polls the backend and sibling applications and owns the snapshot files.
///
/// Backend polls only ever write the self-scoped file and external polls or
/// pushes only the external one, so the two cadences never overwrite each
/// other. [`MetricsAggregator::get_latest`] is the only place they meet.
pub struct MetricsAggregator {
    backend: Arc<dyn MetricsBackend>,
    query_config: QueryConfigCell,
    node_id: NodeIdentity,
    store: SnapshotStore,
    metrics: RelayMetrics,
    retry: RetryPolicy,
    backend_timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        query_config: QueryConfigCell,
        node_id: NodeIdentity,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            query_config,
            node_id,
            store: SnapshotStore::new(data_dir),
            metrics: RelayMetrics::new(),
            retry: RetryPolicy::default(),
            backend_timeout: BACKEND_QUERY_TIMEOUT,
        }
    }

    pub fn query_config(&self) -> &QueryConfigCell {
        &self.query_config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    async fn query_backend(&self) -> RelayResult<QueryValue> {
        let query = self.query_config.query();
        tracing::debug!("querying backend: {}", query);
        match tokio::time::timeout(self.backend_timeout, self.backend.instant_query(&query)).await
        {
            Ok(res) => res,
            Err(_elapsed) => Err(RelayQueryErr::Timeout {
                after: self.backend_timeout,
            }
            .into()),
        }
    }

    /// One backend poll cycle. Returns the number of records written.
    pub async fn poll_backend(&self) -> RelayResult<usize> {
        let res = self.query_backend().await;
        self.finish_backend_poll(res).await
    }

    /// Same as [`Self::poll_backend`] but a failed backend query is retried
    /// according to the retry policy. A malformed response is not retried.
    /// Used once at startup.
    pub async fn bootstrap_poll(&self) -> RelayResult<usize> {
        let mut attempt = 1;
        loop {
            match self.query_backend().await {
                Ok(value) => return self.finish_backend_poll(Ok(value)).await,
                Err(err) if err.is_query_err() && attempt < self.retry.attempts => {
                    tracing::warn!(
                        "bootstrap poll attempt {}/{} failed: {}, retrying in {:?}",
                        attempt,
                        self.retry.attempts,
                        err,
                        self.retry.delay
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(err) => {
                    tracing::error!("bootstrap poll gave up after attempt {}", attempt);
                    return self.finish_backend_poll(Err(err)).await;
                }
            }
        }
    }

    async fn finish_backend_poll(&self, res: RelayResult<QueryValue>) -> RelayResult<usize> {
        let value = match res {
            Ok(value) => value,
            Err(err) => {
                if err.is_query_err() {
                    self.metrics
                        .record_poll(SnapshotScope::SelfScoped, PollOutcome::QueryFailed);
                    self.reset_selectors_after_failure();
                } else {
                    self.metrics
                        .record_poll(SnapshotScope::SelfScoped, PollOutcome::FormatFailed);
                }
                return Err(err);
            }
        };
        let samples = match value {
            QueryValue::Vector(samples) => samples,
            QueryValue::Other { result_type } => {
                self.metrics
                    .record_poll(SnapshotScope::SelfScoped, PollOutcome::FormatFailed);
                return Err(RelayFormatErr::NotAVector {
                    actual: result_type,
                }
                .into());
            }
        };
        let records = samples
            .into_iter()
            .map(|sample| {
                let name = sample.metric.get("__name__").cloned().unwrap_or_default();
                MetricRecord::new(
                    name,
                    filter_labels(&sample.metric),
                    sample.value,
                    sample.timestamp_ms,
                )
            })
            .collect();
        self.write_snapshot(SnapshotScope::SelfScoped, records).await
    }

    fn reset_selectors_after_failure(&self) {
        if self.query_config.reset_after_failure() {
            self.metrics.record_selector_reset();
            tracing::warn!("backend query failed, selectors reset to the preset list");
        }
    }

    async fn write_snapshot(
        &self,
        scope: SnapshotScope,
        records: Vec<MetricRecord>,
    ) -> RelayResult<usize> {
        let count = records.len();
        let res = match Snapshot::new(&self.node_id, records).to_pretty_json() {
            Ok(bytes) => self.store.write(scope, bytes).await,
            Err(err) => Err(err),
        };
        match res {
            Ok(()) => {
                self.metrics.record_poll(scope, PollOutcome::Ok);
                self.metrics.record_written(scope, count);
                tracing::debug!("{:?} snapshot written with {} records", scope, count);
                Ok(count)
            }
            Err(err) => {
                self.metrics.record_poll(scope, PollOutcome::PersistFailed);
                Err(err)
            }
        }
    }

    /// Pulls every source concurrently and replaces the external snapshot
    /// with whatever succeeded. No sources means nothing is written.
    pub async fn poll_external_apps(
        &self,
        sources: &[Arc<dyn ExternalSource>],
    ) -> RelayResult<usize> {
        if sources.is_empty() {
            tracing::debug!("no external apps registered, skipping external poll");
            return Ok(0);
        }
        let results = join_all(sources.iter().map(|s| s.fetch_latest())).await;
        let mut pushed = Vec::new();
        for (source, res) in sources.iter().zip(results) {
            match res {
                Ok(mut metrics) => pushed.append(&mut metrics),
                Err(err) => {
                    tracing::warn!("skipping external app {}: {}", source.name(), err);
                }
            }
        }
        self.write_snapshot(SnapshotScope::External, to_records(pushed))
            .await
    }

    /// Replaces the external snapshot with records pushed by a sibling.
    pub async fn write_external(&self, records: Vec<MetricRecord>) -> RelayResult<usize> {
        self.write_snapshot(SnapshotScope::External, records).await
    }

    async fn read_snapshot(&self, scope: SnapshotScope) -> RelayResult<Snapshot> {
        let bytes = self.store.read(scope).await?;
        let snapshot = Snapshot::from_json(&bytes).map_err(|err| RelayReadErr::Decode {
            path: self.store.path(scope),
            err,
        })?;
        Ok(snapshot)
    }

    /// The unified view: self records then external records, stamped with
    /// the current node identity.
    pub async fn get_latest(&self) -> RelayResult<Snapshot> {
        let own = self.read_snapshot(SnapshotScope::SelfScoped).await?;
        let external = match self.read_snapshot(SnapshotScope::External).await {
            Ok(external) => external.records,
            Err(err) => {
                tracing::debug!("no external records served: {}", err);
                vec![]
            }
        };
        let mut records = own.records;
        records.extend(external);
        Ok(Snapshot::new(&self.node_id, records))
    }

    /// Swaps the selectors and polls right away with the new query.
    pub async fn reload_selectors(&self, selectors: Vec<String>) -> RelayResult<usize> {
        let query = self.query_config.replace_selectors(selectors);
        tracing::info!("selectors reloaded, new query: {}", query);
        self.poll_backend().await
    }
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("node_id", &self.node_id)
            .field("data_dir", &self.store.data_dir())
            .finish()
    }
}
