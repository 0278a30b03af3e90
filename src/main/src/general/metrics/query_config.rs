use parking_lot::RwLock;
use serde::Serialize;
use std::{sync::Arc, time::Duration};

use super::query::{format_query, preset_selectors};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(45);
pub const DEFAULT_EXTERNAL_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What happens to the selectors when a backend query fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorResetPolicy {
    /// Drop custom selectors and go back to the preset list.
    #[default]
    ResetToPreset,
    LeaveUnchanged,
}

impl SelectorResetPolicy {
    pub fn from_flag(reset_on_failure: bool) -> Self {
        if reset_on_failure {
            SelectorResetPolicy::ResetToPreset
        } else {
            SelectorResetPolicy::LeaveUnchanged
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryConfig {
    pub selectors: Vec<String>,
    pub poll_interval: Duration,
    pub external_poll_interval: Duration,
    pub reset_policy: SelectorResetPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            selectors: preset_selectors(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            external_poll_interval: DEFAULT_EXTERNAL_POLL_INTERVAL,
            reset_policy: SelectorResetPolicy::default(),
        }
    }
}

/// Read-only copy of the cell, as served by the config endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct QueryConfigView {
    pub selectors: Vec<String>,
    pub query: String,
    pub poll_interval_secs: f64,
    pub external_poll_interval_secs: f64,
    pub reset_policy: SelectorResetPolicy,
}

struct Inner {
    config: QueryConfig,
    // formatted once per selector change, not per poll
    query: String,
}

/// Shared handle to the live query configuration.
///
/// Selector updates are last-write-wins. A poll that already read the query
/// keeps running with it even if a reload lands in between.
#[derive(Clone)]
pub struct QueryConfigCell {
    inner: Arc<RwLock<Inner>>,
}

impl QueryConfigCell {
    pub fn new(config: QueryConfig) -> Self {
        let query = format_query(&config.selectors);
        Self {
            inner: Arc::new(RwLock::new(Inner { config, query })),
        }
    }

    pub fn query(&self) -> String {
        self.inner.read().query.clone()
    }

    pub fn selectors(&self) -> Vec<String> {
        self.inner.read().config.selectors.clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.read().config.poll_interval
    }

    pub fn external_poll_interval(&self) -> Duration {
        self.inner.read().config.external_poll_interval
    }

    pub fn reset_policy(&self) -> SelectorResetPolicy {
        self.inner.read().config.reset_policy
    }

    pub fn view(&self) -> QueryConfigView {
        let inner = self.inner.read();
        QueryConfigView {
            selectors: inner.config.selectors.clone(),
            query: inner.query.clone(),
            poll_interval_secs: inner.config.poll_interval.as_secs_f64(),
            external_poll_interval_secs: inner.config.external_poll_interval.as_secs_f64(),
            reset_policy: inner.config.reset_policy,
        }
    }

    /// Replaces the selectors and returns the newly formatted query.
    pub fn replace_selectors(&self, selectors: Vec<String>) -> String {
        let query = format_query(&selectors);
        let mut inner = self.inner.write();
        inner.config.selectors = selectors;
        inner.query = query.clone();
        query
    }

    /// Applies the reset policy after a failed backend query. Returns whether
    /// the selectors were changed.
    pub fn reset_after_failure(&self) -> bool {
        match self.reset_policy() {
            SelectorResetPolicy::LeaveUnchanged => false,
            SelectorResetPolicy::ResetToPreset => {
                let preset = preset_selectors();
                if self.selectors() == preset {
                    return false;
                }
                let _ = self.replace_selectors(preset);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::general::metrics::query::PRESET_SELECTORS;

    fn custom() -> QueryConfig {
        QueryConfig {
            selectors: vec!["node_load1".to_owned(), "up".to_owned()],
            ..Default::default()
        }
    }

    #[test]
    fn test_query_follows_selectors() {
        let cell = QueryConfigCell::new(custom());
        assert_eq!(cell.query(), "node_load1 or up");
        assert_eq!(cell.replace_selectors(vec!["a".to_owned()]), "a");
        assert_eq!(cell.query(), "a");
        assert_eq!(cell.selectors(), vec!["a"]);
    }

    #[test]
    fn test_reset_restores_preset_and_query() {
        let cell = QueryConfigCell::new(custom());
        assert!(cell.reset_after_failure());
        assert_eq!(cell.selectors().len(), PRESET_SELECTORS.len());
        assert_eq!(cell.query(), format_query(PRESET_SELECTORS));
        // already preset, nothing to change
        assert!(!cell.reset_after_failure());
    }

    #[test]
    fn test_leave_unchanged_policy() {
        let cell = QueryConfigCell::new(QueryConfig {
            reset_policy: SelectorResetPolicy::LeaveUnchanged,
            ..custom()
        });
        assert!(!cell.reset_after_failure());
        assert_eq!(cell.query(), "node_load1 or up");
    }

    #[test]
    fn test_clones_share_state() {
        let cell = QueryConfigCell::new(QueryConfig::default());
        let other = cell.clone();
        let _ = other.replace_selectors(vec!["x".to_owned()]);
        assert_eq!(cell.query(), "x");
        assert_eq!(cell.view().poll_interval_secs, 45.0);
        assert_eq!(cell.external_poll_interval(), Duration::from_secs(30));
    }
}
