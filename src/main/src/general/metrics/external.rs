use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tonic::transport::{Channel, Endpoint};

use super::types::MetricRecord;
use crate::{
    general::network::proto::metric::{
        external_metrics_client::ExternalMetricsClient, ExternalLatestMetricsReq,
        ExternalMetricData,
    },
    result::{RelayExternalErr, RelayResult},
};

const EXTERNAL_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A sibling application that exposes its latest metrics.
#[async_trait]
pub trait ExternalSource: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn fetch_latest(&self) -> RelayResult<Vec<ExternalMetricData>>;
}

/// Structural mapping from the sibling wire shape, nothing is filtered.
pub fn to_records(pushed: Vec<ExternalMetricData>) -> Vec<MetricRecord> {
    pushed
        .into_iter()
        .map(|m| MetricRecord::new(m.name, m.labels, m.value, m.timestamp))
        .collect()
}

pub struct GrpcExternalSource {
    name: String,
    client: ExternalMetricsClient<Channel>,
}

impl GrpcExternalSource {
    /// The channel connects on first use, so registering an application that
    /// is not up yet is fine.
    pub fn connect_lazy(name: &str, address: &str) -> RelayResult<Self> {
        let uri = if address.contains("://") {
            address.to_owned()
        } else {
            format!("http://{}", address)
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|_| RelayExternalErr::InvalidAddress {
                app: name.to_owned(),
                address: address.to_owned(),
            })?
            .timeout(EXTERNAL_FETCH_TIMEOUT)
            .connect_timeout(EXTERNAL_FETCH_TIMEOUT);
        Ok(Self {
            name: name.to_owned(),
            client: ExternalMetricsClient::new(endpoint.connect_lazy()),
        })
    }
}

#[async_trait]
impl ExternalSource for GrpcExternalSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_latest(&self) -> RelayResult<Vec<ExternalMetricData>> {
        let resp = self
            .client
            .clone()
            .external_latest_metrics(ExternalLatestMetricsReq {})
            .await
            .map_err(|status| RelayExternalErr::Status {
                app: self.name.clone(),
                status,
            })?;
        Ok(resp.into_inner().metrics)
    }
}

/// Entry of the static application list file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExternalAppEntry {
    pub name: String,
    pub address: String,
}

/// Applications currently polled by the external trigger.
#[derive(Default)]
pub struct ExternalAppRegistry {
    apps: DashMap<String, Arc<dyn ExternalSource>>,
}

impl ExternalAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any entry with the same name.
    pub fn register(&self, source: Arc<dyn ExternalSource>) {
        let name = source.name().to_owned();
        if self.apps.insert(name.clone(), source).is_some() {
            tracing::info!("external app {} re-registered", name);
        } else {
            tracing::info!("external app {} registered, {} in total", name, self.len());
        }
    }

    pub fn register_grpc(&self, name: &str, address: &str) -> RelayResult<()> {
        let source = GrpcExternalSource::connect_lazy(name, address)?;
        self.register(Arc::new(source));
        Ok(())
    }

    pub fn register_entries(&self, entries: &[ExternalAppEntry]) -> RelayResult<()> {
        for entry in entries {
            self.register_grpc(&entry.name, &entry.address)?;
        }
        Ok(())
    }

    pub fn deregister(&self, name: &str) -> bool {
        let existed = self.apps.remove(name).is_some();
        if existed {
            tracing::info!("external app {} deregistered", name);
        }
        existed
    }

    /// Current sources, ordered by name.
    pub fn sources(&self) -> Vec<Arc<dyn ExternalSource>> {
        let mut sources: Vec<_> = self.apps.iter().map(|e| e.value().clone()).collect();
        sources.sort_by(|a, b| a.name().cmp(b.name()));
        sources
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }
}
