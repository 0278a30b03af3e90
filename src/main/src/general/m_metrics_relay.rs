use async_trait::async_trait;
use relay_derive::LogicalModule;
use std::sync::Arc;

use super::metrics::{
    external::{ExternalAppEntry, ExternalAppRegistry},
    query_config::QueryConfigCell,
    MetricsAggregator,
};
use crate::{
    result::{RelayResult, RelayResultExt},
    sys::{LogicalModule, LogicalModuleNewArgs},
    util::JoinHandleWrapper,
};

/// Owns the aggregation pipeline and the sibling application registry that
/// every serving module reads from.
#[derive(LogicalModule)]
pub struct MetricsRelay {
    aggregator: Arc<MetricsAggregator>,
    registry: Arc<ExternalAppRegistry>,
    static_apps: Vec<ExternalAppEntry>,
}

#[async_trait]
impl LogicalModule for MetricsRelay {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        let aggregator = MetricsAggregator::new(
            args.backend.clone(),
            QueryConfigCell::new(args.config.query.clone()),
            args.node_id.clone(),
            args.config.data_dir.clone(),
        );
        Self {
            aggregator: Arc::new(aggregator),
            registry: Arc::new(ExternalAppRegistry::new()),
            static_apps: args.config.external_apps.clone(),
        }
    }

    async fn init(&self) -> RelayResult<()> {
        self.aggregator.store().ensure_dir().await?;
        self.registry.register_entries(&self.static_apps)?;
        tracing::info!(
            "metrics relay ready, query: {}",
            self.aggregator.query_config().query()
        );
        Ok(())
    }

    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>> {
        // the periodic triggers only fire one period after start
        let res = self.aggregator.bootstrap_poll().await;
        res.log_err("bootstrap poll");
        if let Ok(count) = res {
            tracing::info!("bootstrap poll wrote {} records", count);
        }
        Ok(vec![])
    }
}

impl MetricsRelay {
    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn registry(&self) -> &Arc<ExternalAppRegistry> {
        &self.registry
    }
}
