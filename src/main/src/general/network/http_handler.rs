use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use relay_derive::LogicalModule;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    general::{m_metrics_relay::MetricsRelay, metrics::MetricsAggregator},
    logical_module_view_impl,
    result::{RelayResult, RelayRuntimeErr},
    sys::{BroadcastSender, LogicalModule, LogicalModuleNewArgs, LogicalModulesRef},
    util::JoinHandleWrapper,
};

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

logical_module_view_impl!(HttpHandlerView);
logical_module_view_impl!(HttpHandlerView, metrics_relay, MetricsRelay);

#[derive(Debug, Deserialize)]
pub struct ReloadReq {
    pub queries: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReloadResp {
    written: usize,
}

#[derive(Debug, Serialize)]
struct ErrResp {
    err_msg: String,
}

fn err_response(status: StatusCode, err_msg: String) -> Response {
    (status, Json(ErrResp { err_msg })).into_response()
}

pub fn router(aggregator: Arc<MetricsAggregator>) -> Router {
    Router::new()
        .route("/metrics/latest", get(handle_latest))
        .route("/metrics/reload", post(handle_reload))
        .route("/metrics/config", get(handle_config))
        .route("/metrics", get(handle_self_metrics))
        .with_state(aggregator)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn handle_latest(State(aggregator): State<Arc<MetricsAggregator>>) -> Response {
    match aggregator.get_latest().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => err_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn handle_reload(
    State(aggregator): State<Arc<MetricsAggregator>>,
    Json(req): Json<ReloadReq>,
) -> Response {
    let queries: Vec<String> = req
        .queries
        .into_iter()
        .map(|q| q.trim().to_owned())
        .filter(|q| !q.is_empty())
        .collect();
    if queries.is_empty() {
        return err_response(StatusCode::BAD_REQUEST, "queries is empty".to_owned());
    }
    match aggregator.reload_selectors(queries).await {
        Ok(written) => Json(ReloadResp { written }).into_response(),
        Err(err) => err_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn handle_config(State(aggregator): State<Arc<MetricsAggregator>>) -> Response {
    Json(aggregator.query_config().view()).into_response()
}

async fn handle_self_metrics(State(aggregator): State<Arc<MetricsAggregator>>) -> Response {
    match aggregator.metrics().encode() {
        Ok(text) => ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], text).into_response(),
        Err(err) => err_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// HTTP surface on `APP_PORT`.
#[derive(LogicalModule)]
pub struct HttpHandler {
    view: HttpHandlerView,
    btx: BroadcastSender,
    addr: SocketAddr,
}

#[async_trait]
impl LogicalModule for HttpHandler {
    fn inner_new(args: LogicalModuleNewArgs) -> Self
    where
        Self: Sized,
    {
        Self {
            view: HttpHandlerView::new(args.logical_modules_ref.clone()),
            btx: args.btx.clone(),
            addr: SocketAddr::from(([0, 0, 0, 0], args.config.http_port)),
        }
    }

    async fn start(&self) -> RelayResult<Vec<JoinHandleWrapper>> {
        let app = router(self.view.metrics_relay().aggregator().clone());
        let server = axum::Server::try_bind(&self.addr).map_err(|e| RelayRuntimeErr::Serve {
            what: "http",
            detail: format!("bind {}: {}", self.addr, e),
        })?;
        tracing::info!("http start on {}", self.addr);
        let mut end_rx = self.btx.subscribe();
        let handle = tokio::spawn(async move {
            let res = server
                .serve(app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = end_rx.recv().await;
                })
                .await;
            match res {
                Ok(()) => tracing::info!("http server stopped"),
                Err(err) => tracing::error!("http server failed: {}", err),
            }
        });
        Ok(vec![JoinHandleWrapper::new("http server", handle)])
    }
}
