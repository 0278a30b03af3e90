use async_trait::async_trait;
use relay_derive::LogicalModule;
use std::{future::Future, time::Duration};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use super::m_metrics_relay::MetricsRelay;
use crate::{
    logical_module_view_impl,
    result::RelayResult,
    sys::{BroadcastMsg, BroadcastSender, LogicalModule, LogicalModuleNewArgs, LogicalModulesRef},
    util::JoinHandleWrapper,
};

logical_module_view_impl!(PollSchedulerView);
logical_module_view_impl!(PollSchedulerView, metrics_relay, MetricsRelay);

/// Runs `job` every `period` until the end signal arrives. The first run is
/// one period after the call. Each run is spawned on its own, so a slow run
/// does not delay the next one and two runs may overlap.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut end_rx: broadcast::Receiver<BroadcastMsg>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("{} trigger every {:?}", name, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    drop(tokio::spawn(job()));
                }
                _ = end_rx.recv() => {
                    tracing::info!("{} trigger stopped", name);
                    break;
                }
            }
        }
    })
}

/// Binds the two periodic triggers to the aggregator.
#[derive(LogicalModule)]
pub struct PollScheduler {
    view: PollSchedulerView,
    btx: BroadcastSender,
}

#[async_trait]
impl LogicalModule for PollScheduler {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            view: PollSchedulerView::new(args.logical_modules_ref.clone()),
            btx: args.btx.clone(),
        }
    }

    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>> {
        let relay = self.view.metrics_relay();
        let config = relay.aggregator().query_config();

        let aggregator = relay.aggregator().clone();
        let backend_trigger = spawn_periodic(
            "backend poll",
            config.poll_interval(),
            self.btx.subscribe(),
            move || {
                let aggregator = aggregator.clone();
                async move {
                    match aggregator.poll_backend().await {
                        Ok(count) => tracing::debug!("backend poll wrote {} records", count),
                        Err(err) if err.is_query_err() => {
                            tracing::warn!("backend poll failed: {}", err)
                        }
                        Err(err) => tracing::error!("backend poll failed: {}", err),
                    }
                }
            },
        );

        let aggregator = relay.aggregator().clone();
        let registry = relay.registry().clone();
        let external_trigger = spawn_periodic(
            "external poll",
            config.external_poll_interval(),
            self.btx.subscribe(),
            move || {
                let aggregator = aggregator.clone();
                let registry = registry.clone();
                async move {
                    let sources = registry.sources();
                    if let Err(err) = aggregator.poll_external_apps(&sources).await {
                        tracing::warn!("external poll failed: {}", err);
                    }
                }
            },
        );

        Ok(vec![
            JoinHandleWrapper::new("backend poll trigger", backend_trigger),
            JoinHandleWrapper::new("external poll trigger", external_trigger),
        ])
    }
}
