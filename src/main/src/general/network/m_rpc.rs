use async_trait::async_trait;
use relay_derive::LogicalModule;
use std::{net::SocketAddr, sync::Arc};
use tonic::{Request, Response, Status};

use super::{
    proto::metric::{
        metrics_server::{Metrics, MetricsServer},
        DeregisterExternalApplicationReq, DeregisterExternalApplicationResp, GetLatestMetricsReq,
        GetLatestMetricsResp, ReceiveExternalMetricsReq, ReceiveExternalMetricsResp,
        RegisterExternalApplicationReq, RegisterExternalApplicationResp,
    },
    proto_ext::{ProtoExtMetricData, ProtoExtSnapshot},
};
use crate::{
    general::{
        m_metrics_relay::MetricsRelay,
        metrics::{external::ExternalAppRegistry, MetricsAggregator},
    },
    logical_module_view_impl,
    result::{RelayError, RelayResult, RelayRuntimeErr},
    sys::{BroadcastSender, LogicalModule, LogicalModuleNewArgs, LogicalModulesRef},
    util::JoinHandleWrapper,
};

logical_module_view_impl!(RpcServerView);
logical_module_view_impl!(RpcServerView, metrics_relay, MetricsRelay);

fn to_status(err: RelayError) -> Status {
    if err.is_read_err() {
        Status::unavailable(err.to_string())
    } else {
        Status::internal(err.to_string())
    }
}

/// The `Metrics` service handed to tonic.
pub struct MetricsRpcService {
    aggregator: Arc<MetricsAggregator>,
    registry: Arc<ExternalAppRegistry>,
}

impl MetricsRpcService {
    pub fn new(aggregator: Arc<MetricsAggregator>, registry: Arc<ExternalAppRegistry>) -> Self {
        Self {
            aggregator,
            registry,
        }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsRpcService {
    async fn get_latest_metrics(
        &self,
        _request: Request<GetLatestMetricsReq>,
    ) -> Result<Response<GetLatestMetricsResp>, Status> {
        let snapshot = self.aggregator.get_latest().await.map_err(to_status)?;
        Ok(Response::new(GetLatestMetricsResp {
            snapshot: Some(snapshot.into_proto()),
        }))
    }

    async fn receive_external_metrics(
        &self,
        request: Request<ReceiveExternalMetricsReq>,
    ) -> Result<Response<ReceiveExternalMetricsResp>, Status> {
        let req = request.into_inner();
        #[cfg(feature = "rpc-log")]
        tracing::debug!("received {} external metrics", req.metrics.len());
        let records = req.metrics.into_iter().map(|m| m.into_record()).collect();
        let _ = self.aggregator.write_external(records).await.map_err(to_status)?;
        Ok(Response::new(ReceiveExternalMetricsResp {}))
    }

    async fn register_external_application(
        &self,
        request: Request<RegisterExternalApplicationReq>,
    ) -> Result<Response<RegisterExternalApplicationResp>, Status> {
        let req = request.into_inner();
        if req.name.is_empty() {
            return Err(Status::invalid_argument("application name is empty"));
        }
        self.registry
            .register_grpc(&req.name, &req.address)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        Ok(Response::new(RegisterExternalApplicationResp {}))
    }

    async fn deregister_external_application(
        &self,
        request: Request<DeregisterExternalApplicationReq>,
    ) -> Result<Response<DeregisterExternalApplicationResp>, Status> {
        let existed = self.registry.deregister(&request.into_inner().name);
        Ok(Response::new(DeregisterExternalApplicationResp { existed }))
    }
}

/// Serves the `Metrics` gRPC service until the end signal.
#[derive(LogicalModule)]
pub struct RpcServer {
    view: RpcServerView,
    btx: BroadcastSender,
    addr: SocketAddr,
}

#[async_trait]
impl LogicalModule for RpcServer {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            view: RpcServerView::new(args.logical_modules_ref.clone()),
            btx: args.btx.clone(),
            addr: SocketAddr::from(([0, 0, 0, 0], args.config.grpc_port)),
        }
    }

    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>> {
        let relay = self.view.metrics_relay();
        let service =
            MetricsRpcService::new(relay.aggregator().clone(), relay.registry().clone());
        let addr = self.addr;
        let mut end_rx = self.btx.subscribe();
        tracing::info!("grpc server listening at {}", addr);
        let handle = tokio::spawn(async move {
            let res = tonic::transport::Server::builder()
                .add_service(MetricsServer::new(service))
                .serve_with_shutdown(addr, async move {
                    let _ = end_rx.recv().await;
                })
                .await
                .map_err(|e| RelayRuntimeErr::Serve {
                    what: "grpc",
                    detail: e.to_string(),
                });
            match res {
                Ok(()) => tracing::info!("grpc server stopped"),
                Err(err) => tracing::error!("grpc server failed: {:?}", err),
            }
        });
        Ok(vec![JoinHandleWrapper::new("grpc server", handle)])
    }
}
