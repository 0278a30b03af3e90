use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    cmd_arg::CmdArgs,
    general::metrics::{
        external::ExternalAppEntry,
        query::{parse_selector_csv, preset_selectors},
        query_config::{
            QueryConfig, SelectorResetPolicy, DEFAULT_EXTERNAL_POLL_INTERVAL,
            DEFAULT_POLL_INTERVAL,
        },
    },
    result::{RelayConfigErr, RelayResult},
};

pub const ENV_METRICS_CRON_TIMER: &str = "APP_METRICS_CRON_TIMER";
pub const ENV_METRICS_EXTERNAL_CRON_TIMER: &str = "APP_METRICS_EXTERNAL_CRON_TIMER";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub http_port: u16,
    pub grpc_port: u16,
    pub prometheus_host: String,
    pub prometheus_port: u16,
    pub nats_host: String,
    pub nats_port: u16,
    pub data_dir: PathBuf,
    pub node_id_path: PathBuf,
    pub query: QueryConfig,
    pub external_apps: Vec<ExternalAppEntry>,
}

impl RelayConfig {
    pub fn nats_addr(&self) -> String {
        if self.nats_host.contains("://") {
            format!("{}:{}", self.nats_host, self.nats_port)
        } else {
            format!("nats://{}:{}", self.nats_host, self.nats_port)
        }
    }
}

pub fn read_config(args: CmdArgs) -> RelayResult<RelayConfig> {
    let query = load_metrics_config(
        args.metrics_config.as_deref(),
        args.metrics_cron_timer.as_deref(),
        args.metrics_external_cron_timer.as_deref(),
        SelectorResetPolicy::from_flag(args.metrics_reset_on_failure),
    );
    let external_apps = match &args.external_apps_config {
        Some(path) => read_external_apps(path)?,
        None => vec![],
    };
    Ok(RelayConfig {
        http_port: args.app_port,
        grpc_port: args.grpc_port,
        prometheus_host: args.prometheus_url,
        prometheus_port: args.prometheus_port,
        nats_host: args.nats_url,
        nats_port: args.nats_port,
        data_dir: args.data_dir,
        node_id_path: args.node_id_path,
        query,
        external_apps,
    })
}

/// Builds the query configuration from the three optional metrics settings.
///
/// With none of them set the preset is used as a whole. Otherwise each
/// missing one falls back on its own. An interval that does not parse is
/// logged and replaced by its default.
pub fn load_metrics_config(
    selectors_csv: Option<&str>,
    poll_interval: Option<&str>,
    external_poll_interval: Option<&str>,
    reset_policy: SelectorResetPolicy,
) -> QueryConfig {
    let set = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned);
    let (selectors_csv, poll_interval, external_poll_interval) = (
        set(selectors_csv),
        set(poll_interval),
        set(external_poll_interval),
    );
    if selectors_csv.is_none() && poll_interval.is_none() && external_poll_interval.is_none() {
        tracing::info!("no metrics overrides set, using the preset configuration");
        return QueryConfig {
            reset_policy,
            ..Default::default()
        };
    }

    let selectors = match selectors_csv.map(|csv| parse_selector_csv(&csv)) {
        Some(selectors) if !selectors.is_empty() => selectors,
        _ => preset_selectors(),
    };
    QueryConfig {
        selectors,
        poll_interval: interval_or_default(ENV_METRICS_CRON_TIMER, poll_interval, DEFAULT_POLL_INTERVAL),
        external_poll_interval: interval_or_default(
            ENV_METRICS_EXTERNAL_CRON_TIMER,
            external_poll_interval,
            DEFAULT_EXTERNAL_POLL_INTERVAL,
        ),
        reset_policy,
    }
}

fn interval_or_default(var: &'static str, value: Option<String>, default: Duration) -> Duration {
    let Some(value) = value else {
        return default;
    };
    match parse_duration(var, &value) {
        Ok(d) => d,
        Err(err) => {
            tracing::warn!("{}, using the default {:?}", err, default);
            default
        }
    }
}

lazy_static! {
    static ref DURATION_RE: Regex =
        Regex::new(r"^(?:\d+(?:\.\d+)?(?:ns|us|µs|ms|h|m|s))+$").unwrap();
    static ref DURATION_PART_RE: Regex =
        Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|h|m|s)").unwrap();
}

/// Parses Go style durations such as `45s`, `1m30s`, `1.5h` or `500ms`.
/// Zero is rejected since it cannot drive a periodic job.
pub fn parse_duration(var: &'static str, value: &str) -> RelayResult<Duration> {
    let invalid = || RelayConfigErr::InvalidInterval {
        var,
        value: value.to_owned(),
    };
    let value = value.trim();
    if !DURATION_RE.is_match(value) {
        return Err(invalid().into());
    }
    let mut secs = 0.0_f64;
    for cap in DURATION_PART_RE.captures_iter(value) {
        let amount: f64 = cap[1].parse().map_err(|_| invalid())?;
        let unit = match &cap[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid().into()),
        };
        secs += amount * unit;
    }
    let duration = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
    if duration.is_zero() {
        return Err(invalid().into());
    }
    Ok(duration)
}

#[derive(Debug, Deserialize)]
struct ExternalAppsFile {
    #[serde(default)]
    apps: Vec<ExternalAppEntry>,
}

pub fn read_external_apps(path: impl AsRef<Path>) -> RelayResult<Vec<ExternalAppEntry>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|err| RelayConfigErr::ExternalAppsUnreadable {
        path: path.to_owned(),
        err,
    })?;
    let file: ExternalAppsFile =
        serde_yaml::from_str(&text).map_err(|err| RelayConfigErr::ExternalAppsDecode {
            path: path.to_owned(),
            err,
        })?;
    tracing::info!("{} static external apps in {:?}", file.apps.len(), path);
    Ok(file.apps)
}
