use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Per-node metrics relay. Every flag can also be set through the
/// environment variable named next to it.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CmdArgs {
    /// HTTP port
    #[arg(long, env = "APP_PORT", default_value_t = 8000)]
    pub app_port: u16,
    #[arg(long, env = "PROMETHEUS_URL", default_value = "localhost")]
    pub prometheus_url: String,
    #[arg(long, env = "PROMETHEUS_PORT", default_value_t = 9090)]
    pub prometheus_port: u16,
    #[arg(long, env = "NATS_URL", default_value = "localhost")]
    pub nats_url: String,
    #[arg(long, env = "NATS_PORT", default_value_t = 4222)]
    pub nats_port: u16,
    #[arg(long, env = "GRPC_PORT", default_value_t = 50051)]
    pub grpc_port: u16,

    /// Comma separated selectors polled from the backend
    #[arg(long, env = "APP_METRICS_CONFIG")]
    pub metrics_config: Option<String>,
    /// Backend poll interval, e.g. `45s` or `1m30s`
    #[arg(long, env = "APP_METRICS_CRON_TIMER")]
    pub metrics_cron_timer: Option<String>,
    /// External application poll interval
    #[arg(long, env = "APP_METRICS_EXTERNAL_CRON_TIMER")]
    pub metrics_external_cron_timer: Option<String>,
    /// Fall back to the preset selectors when a backend query fails
    #[arg(long, env = "APP_METRICS_RESET_ON_FAILURE", default_value_t = true, action = ArgAction::Set)]
    pub metrics_reset_on_failure: bool,

    #[arg(long, env = "APP_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,
    #[arg(long, env = "APP_NODE_ID_PATH", default_value = "/etc/c12s/nodeid")]
    pub node_id_path: PathBuf,
    /// YAML file listing sibling applications to poll from startup
    #[arg(long, env = "APP_EXTERNAL_APPS_CONFIG")]
    pub external_apps_config: Option<PathBuf>,
}
