use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;

use crate::{
    general::{
        metrics::{
            aggregator::MetricsAggregator,
            backend::{MetricsBackend, QueryValue, VectorSample},
            external::ExternalSource,
            query_config::{QueryConfig, QueryConfigCell},
            types::NodeIdentity,
        },
        network::proto::metric::ExternalMetricData,
    },
    result::{RelayExternalErr, RelayFormatErr, RelayQueryErr, RelayResult},
};

fn label_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn sample(pairs: &[(&str, &str)], value: f64, timestamp_ms: i64) -> VectorSample {
    VectorSample {
        metric: label_map(pairs),
        value,
        timestamp_ms,
    }
}

pub fn ext_metric(name: &str, pairs: &[(&str, &str)], value: f64, ts: i64) -> ExternalMetricData {
    ExternalMetricData {
        name: name.to_owned(),
        labels: label_map(pairs),
        value,
        timestamp: ts,
    }
}

#[derive(Clone, Debug)]
pub enum MockReply {
    Vector(Vec<VectorSample>),
    NonVector,
    /// Backend answers with a body that cannot be decoded.
    Malformed(String),
    /// Backend rejects the query with the given message.
    Fail(String),
    /// Never answers in a reasonable time.
    Hang,
    /// Answers with the vector after the delay.
    Slow(Duration, Vec<VectorSample>),
}

/// Scripted backend: replies are consumed in order, then `fallback` repeats.
pub struct MockBackend {
    script: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    calls: Mutex<Vec<(Instant, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new(fallback: MockReply) -> Arc<Self> {
        Self::scripted(vec![], fallback)
    }

    pub fn scripted(script: Vec<MockReply>, fallback: MockReply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(vec![]),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, q)| q.clone()).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsBackend for MockBackend {
    async fn instant_query(&self, query: &str) -> RelayResult<QueryValue> {
        self.calls.lock().push((Instant::now(), query.to_owned()));
        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let res = match reply {
            MockReply::Vector(samples) => Ok(QueryValue::Vector(samples)),
            MockReply::NonVector => Ok(QueryValue::Other {
                result_type: "scalar".to_owned(),
            }),
            MockReply::Malformed(detail) => Err(RelayFormatErr::MalformedResponse { detail }.into()),
            MockReply::Fail(msg) => Err(RelayQueryErr::Rejected {
                status: 503,
                error_type: "unavailable".to_owned(),
                error: msg,
            }
            .into()),
            MockReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(QueryValue::Vector(vec![]))
            }
            MockReply::Slow(delay, samples) => {
                tokio::time::sleep(delay).await;
                Ok(QueryValue::Vector(samples))
            }
        };
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        res
    }
}

pub struct MockSource {
    name: String,
    reply: Option<Vec<ExternalMetricData>>,
}

impl MockSource {
    pub fn ok(name: &str, metrics: Vec<ExternalMetricData>) -> Arc<dyn ExternalSource> {
        Arc::new(Self {
            name: name.to_owned(),
            reply: Some(metrics),
        })
    }

    pub fn failing(name: &str) -> Arc<dyn ExternalSource> {
        Arc::new(Self {
            name: name.to_owned(),
            reply: None,
        })
    }
}

#[async_trait]
impl ExternalSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_latest(&self) -> RelayResult<Vec<ExternalMetricData>> {
        match &self.reply {
            Some(metrics) => Ok(metrics.clone()),
            None => Err(RelayExternalErr::Status {
                app: self.name.clone(),
                status: tonic::Status::unavailable("connection refused"),
            }
            .into()),
        }
    }
}

pub fn test_aggregator(
    backend: Arc<MockBackend>,
    config: QueryConfig,
    data_dir: &std::path::Path,
) -> Arc<MetricsAggregator> {
    Arc::new(MetricsAggregator::new(
        backend,
        QueryConfigCell::new(config),
        NodeIdentity::new("node-test"),
        data_dir,
    ))
}
