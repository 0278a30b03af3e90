#![allow(clippy::all)]
#![deny(
    unused_variables,
    unused_mut,
    unused_attributes,
    dead_code,
    clippy::unnecessary_mut_passed,
    unused_results,
    clippy::let_underscore_future,
    unused_must_use,
    unconditional_recursion
)]

use clap::Parser;
use cmd_arg::CmdArgs;
use std::sync::Arc;

use general::metrics::{backend::PrometheusBackend, NodeIdentity};
use result::RelayResult;
use sys::Sys;
use tracing::Level;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

pub mod general;

pub mod cmd_arg;
pub mod config;
pub mod result;
pub mod sys;
pub mod util;

#[tokio::main]
async fn main() {
    start_tracing();
    if let Err(err) = run(CmdArgs::parse()).await {
        tracing::error!("relay stopped: {}", err);
        std::process::exit(1);
    }
}

async fn run(args: CmdArgs) -> RelayResult<()> {
    let config = config::read_config(args)?;
    tracing::info!("config: {:?}", config);
    let node_id = NodeIdentity::read_from(&config.node_id_path)?;
    let backend = PrometheusBackend::new(&config.prometheus_host, config.prometheus_port)?;
    let sys = Sys::new(config, node_id, Arc::new(backend));
    sys.wait_for_end().await
}

pub fn start_tracing() {
    let my_filter = tracing_subscriber::filter::filter_fn(|v| {
        if let Some(mp) = v.module_path() {
            if mp.contains("hyper") || mp.contains("h2") {
                return false;
            }
            if *v.level() == Level::DEBUG {
                if mp.contains("tower") || mp.contains("async_nats") || mp.contains("rustls") {
                    return false;
                }
            }
        }
        v.level() != &tracing::Level::TRACE
    });
    let my_layer = tracing_subscriber::fmt::layer();
    let _ = tracing_subscriber::registry()
        .with(my_layer.with_filter(my_filter))
        .try_init();
}
