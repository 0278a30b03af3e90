use async_trait::async_trait;
use futures::StreamExt;
use relay_derive::LogicalModule;
use std::{fmt::Display, future::Future, sync::Arc};
use tokio::task::JoinHandle;

use crate::{
    general::{m_metrics_relay::MetricsRelay, metrics::MetricsAggregator},
    logical_module_view_impl,
    result::{RelayResult, RelayRuntimeErr},
    sys::{BroadcastSender, LogicalModule, LogicalModuleNewArgs, LogicalModulesRef},
    util::JoinHandleWrapper,
};

pub const GET_METRICS_SUBJECT: &str = "getMetrics";

logical_module_view_impl!(NatsSubscriberView);
logical_module_view_impl!(NatsSubscriberView, metrics_relay, MetricsRelay);

/// Reply to a `getMetrics` request: the unified snapshot as JSON, or an
/// empty body when it cannot be read.
pub async fn reply_body(aggregator: &MetricsAggregator) -> Vec<u8> {
    match aggregator.get_latest().await.and_then(|s| s.to_json()) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!("replying empty to {}: {}", GET_METRICS_SUBJECT, err);
            vec![]
        }
    }
}

/// Builds and publishes one reply on its own task, so a slow reader or
/// publish never holds up the next request.
pub fn spawn_reply<P, Fut, E>(aggregator: Arc<MetricsAggregator>, publish: P) -> JoinHandle<()>
where
    P: FnOnce(Vec<u8>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    tokio::spawn(async move {
        let body = reply_body(&aggregator).await;
        if let Err(err) = publish(body).await {
            tracing::warn!("failed to reply on {}: {}", GET_METRICS_SUBJECT, err);
        }
    })
}

/// Answers `getMetrics` requests on the messaging channel.
///
/// The relay keeps running without it when the server is unreachable at
/// startup.
#[derive(LogicalModule)]
pub struct NatsSubscriber {
    view: NatsSubscriberView,
    btx: BroadcastSender,
    addr: String,
}

#[async_trait]
impl LogicalModule for NatsSubscriber {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            view: NatsSubscriberView::new(args.logical_modules_ref.clone()),
            btx: args.btx.clone(),
            addr: args.config.nats_addr(),
        }
    }

    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>> {
        match self.subscribe().await {
            Ok(handle) => Ok(vec![handle]),
            Err(err) => {
                tracing::error!("messaging channel disabled: {}", err);
                Ok(vec![])
            }
        }
    }
}

impl NatsSubscriber {
    async fn subscribe(&self) -> RelayResult<JoinHandleWrapper> {
        let client = async_nats::connect(self.addr.as_str())
            .await
            .map_err(|e| RelayRuntimeErr::NatsConnect {
                addr: self.addr.clone(),
                detail: e.to_string(),
            })?;
        tracing::info!("nats connected on {}", self.addr);
        let mut sub = client
            .subscribe(GET_METRICS_SUBJECT.to_owned())
            .await
            .map_err(|e| RelayRuntimeErr::NatsSubscribe {
                subject: GET_METRICS_SUBJECT.to_owned(),
                detail: e.to_string(),
            })?;

        let aggregator = self.view.metrics_relay().aggregator().clone();
        let mut end_rx = self.btx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = sub.next() => {
                        let Some(msg) = msg else {
                            tracing::warn!("{} subscription closed", GET_METRICS_SUBJECT);
                            break;
                        };
                        let Some(reply) = msg.reply.clone() else {
                            tracing::debug!("{} request without reply subject", GET_METRICS_SUBJECT);
                            continue;
                        };
                        let client = client.clone();
                        drop(spawn_reply(aggregator.clone(), move |body| async move {
                            client.publish(reply, body.into()).await
                        }));
                    }
                    _ = end_rx.recv() => {
                        if let Err(err) = sub.unsubscribe().await {
                            tracing::debug!("unsubscribe failed: {}", err);
                        }
                        tracing::info!("nats subscriber stopped");
                        break;
                    }
                }
            }
        });
        Ok(JoinHandleWrapper::new("nats subscriber", handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::general::{
        metrics::{query_config::QueryConfig, Snapshot},
        test_utils::{sample, test_aggregator, MockBackend, MockReply},
    };

    #[tokio::test]
    async fn test_reply_is_empty_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let agg = test_aggregator(
            MockBackend::new(MockReply::NonVector),
            QueryConfig::default(),
            dir.path(),
        );
        assert!(reply_body(&agg).await.is_empty());
    }

    #[tokio::test]
    async fn test_reply_carries_unified_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let agg = test_aggregator(
            MockBackend::new(MockReply::Vector(vec![sample(
                &[("__name__", "node_load1"), ("job", "node")],
                0.25,
                1000,
            )])),
            QueryConfig::default(),
            dir.path(),
        );
        let _ = agg.poll_backend().await.unwrap();
        let snapshot = Snapshot::from_json(&reply_body(&agg).await).unwrap();
        assert_eq!(snapshot.node_id, "node-test");
        assert_eq!(snapshot.records[0].name, "node_load1");
        assert!(snapshot.records[0].labels.is_empty());
    }

    #[tokio::test]
    async fn test_slow_reply_does_not_block_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let agg = test_aggregator(
            MockBackend::new(MockReply::Vector(vec![sample(
                &[("__name__", "node_load1")],
                1.0,
                1000,
            )])),
            QueryConfig::default(),
            dir.path(),
        );
        let _ = agg.poll_backend().await.unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let slow_done = done_tx.clone();
        let slow = spawn_reply(agg.clone(), move |body| async move {
            let _ = release_rx.await;
            slow_done.send(("slow", body)).map_err(|e| e.to_string())
        });
        let fast = spawn_reply(agg.clone(), move |body| async move {
            done_tx.send(("fast", body)).map_err(|e| e.to_string())
        });

        let (first, body) = done_rx.recv().await.unwrap();
        assert_eq!(first, "fast");
        assert_eq!(Snapshot::from_json(&body).unwrap().records.len(), 1);
        fast.await.unwrap();

        release_tx.send(()).unwrap();
        slow.await.unwrap();
        assert_eq!(done_rx.recv().await.unwrap().0, "slow");
    }
}
