use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

use super::types::SnapshotScope;
use crate::result::{RelayResult, RelayRuntimeErr};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum PollScope {
    Backend,
    External,
}

impl From<SnapshotScope> for PollScope {
    fn from(scope: SnapshotScope) -> Self {
        match scope {
            SnapshotScope::SelfScoped => PollScope::Backend,
            SnapshotScope::External => PollScope::External,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum PollOutcome {
    Ok,
    QueryFailed,
    FormatFailed,
    PersistFailed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PollLabels {
    pub scope: PollScope,
    pub outcome: PollOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ScopeLabels {
    pub scope: PollScope,
}

/// The relay's own counters, served on `/metrics`.
pub struct RelayMetrics {
    registry: Registry,
    polls: Family<PollLabels, Counter>,
    snapshot_records: Family<ScopeLabels, Gauge>,
    selector_resets: Counter,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("metrics_relay");
        let polls = Family::<PollLabels, Counter>::default();
        let snapshot_records = Family::<ScopeLabels, Gauge>::default();
        let selector_resets = Counter::default();
        registry.register("polls", "Poll cycles by scope and outcome", polls.clone());
        registry.register(
            "snapshot_records",
            "Records in the last written snapshot",
            snapshot_records.clone(),
        );
        registry.register(
            "selector_resets",
            "Times the selectors fell back to the preset after a failed query",
            selector_resets.clone(),
        );
        Self {
            registry,
            polls,
            snapshot_records,
            selector_resets,
        }
    }

    pub fn record_poll(&self, scope: SnapshotScope, outcome: PollOutcome) {
        let _ = self
            .polls
            .get_or_create(&PollLabels {
                scope: scope.into(),
                outcome,
            })
            .inc();
    }

    pub fn record_written(&self, scope: SnapshotScope, records: usize) {
        let _ = self
            .snapshot_records
            .get_or_create(&ScopeLabels {
                scope: scope.into(),
            })
            .set(records as i64);
    }

    pub fn record_selector_reset(&self) {
        let _ = self.selector_resets.inc();
    }

    #[cfg(test)]
    pub fn poll_count(&self, scope: SnapshotScope, outcome: PollOutcome) -> u64 {
        self.polls
            .get_or_create(&PollLabels {
                scope: scope.into(),
                outcome,
            })
            .get()
    }

    #[cfg(test)]
    pub fn selector_reset_count(&self) -> u64 {
        self.selector_resets.get()
    }

    /// OpenMetrics text exposition.
    pub fn encode(&self) -> RelayResult<String> {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).map_err(|e| RelayRuntimeErr::Serve {
            what: "self metrics",
            detail: e.to_string(),
        })?;
        Ok(buf)
    }
}
