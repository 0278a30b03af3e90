use std::{fmt::Debug, path::PathBuf, time::Duration};

use camelpaste::paste;
use thiserror::Error;
use tokio::task::JoinError;

pub type RelayResult<T> = Result<T, RelayError>;

/// Backend unreachable, timed out or rejected the query.
#[derive(Error, Debug)]
pub enum RelayQueryErr {
    #[error("backend request failed: {0}")]
    Request(reqwest::Error),
    #[error("backend did not answer within {after:?}")]
    Timeout { after: Duration },
    #[error("backend rejected the query with status {status}, {error_type}: {error}")]
    Rejected {
        status: u16,
        error_type: String,
        error: String,
    },
    #[error("invalid backend address {addr:?}")]
    InvalidBackendAddr { addr: String },
}

/// The backend answered, but not with anything we can turn into records.
#[derive(Error, Debug)]
pub enum RelayFormatErr {
    #[error("expecting vector type from backend response, got {actual}")]
    NotAVector { actual: String },
    #[error("backend response envelope is malformed: {detail}")]
    MalformedResponse { detail: String },
    #[error("sample value {raw:?} of series {series:?} is not a float")]
    InvalidSampleValue { series: String, raw: String },
}

#[derive(Error, Debug)]
pub enum RelayPersistErr {
    #[error("snapshot encoding failed: {0}")]
    Encode(serde_json::Error),
    #[error("cannot create data dir {path:?}: {err}")]
    CreateDataDir { path: PathBuf, err: std::io::Error },
    #[error("cannot write snapshot for {path:?}: {err}")]
    Write { path: PathBuf, err: std::io::Error },
    #[error("cannot replace snapshot {path:?}: {err}")]
    Replace {
        path: PathBuf,
        err: tempfile::PersistError,
    },
}

#[derive(Error, Debug)]
pub enum RelayReadErr {
    #[error("cannot read snapshot {path:?}: {err}")]
    Read { path: PathBuf, err: std::io::Error },
    #[error("snapshot {path:?} is not valid json: {err}")]
    Decode {
        path: PathBuf,
        err: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum RelayExternalErr {
    #[error("external app {app} has an invalid address {address:?}")]
    InvalidAddress { app: String, address: String },
    #[error("external app {app} answered {status}")]
    Status { app: String, status: tonic::Status },
}

#[derive(Error, Debug)]
pub enum RelayConfigErr {
    #[error("{var} has an invalid interval {value:?}")]
    InvalidInterval { var: &'static str, value: String },
    #[error("cannot read node id from {path:?}: {err}")]
    NodeIdUnreadable { path: PathBuf, err: std::io::Error },
    #[error("cannot read external apps file {path:?}: {err}")]
    ExternalAppsUnreadable { path: PathBuf, err: std::io::Error },
    #[error("external apps file {path:?} is malformed: {err}")]
    ExternalAppsDecode {
        path: PathBuf,
        err: serde_yaml::Error,
    },
}

#[derive(Error, Debug)]
pub enum RelayRuntimeErr {
    #[error("task {context} failed to join: {err}")]
    TokioJoin { err: JoinError, context: String },
    #[error("cannot connect to nats at {addr}: {detail}")]
    NatsConnect { addr: String, detail: String },
    #[error("cannot subscribe to {subject}: {detail}")]
    NatsSubscribe { subject: String, detail: String },
    #[error("{what} server failed: {detail}")]
    Serve { what: &'static str, detail: String },
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Query error: {0}")]
    RelayQueryErr(RelayQueryErr),

    #[error("Format error: {0}")]
    RelayFormatErr(RelayFormatErr),

    #[error("Persist error: {0}")]
    RelayPersistErr(RelayPersistErr),

    #[error("Read error: {0}")]
    RelayReadErr(RelayReadErr),

    #[error("External fetch error: {0}")]
    RelayExternalErr(RelayExternalErr),

    #[error("Config error: {0}")]
    RelayConfigErr(RelayConfigErr),

    #[error("Runtime error: {0}")]
    RelayRuntimeErr(RelayRuntimeErr),
}

impl RelayError {
    /// Whether this error came from the backend call itself, which is what
    /// the selector reset policy reacts to.
    pub fn is_query_err(&self) -> bool {
        matches!(self, RelayError::RelayQueryErr(_))
    }

    #[cfg(test)]
    pub fn is_format_err(&self) -> bool {
        matches!(self, RelayError::RelayFormatErr(_))
    }

    pub fn is_read_err(&self) -> bool {
        matches!(self, RelayError::RelayReadErr(_))
    }
}

impl From<RelayQueryErr> for RelayError {
    fn from(e: RelayQueryErr) -> Self {
        RelayError::RelayQueryErr(e)
    }
}

impl From<RelayFormatErr> for RelayError {
    fn from(e: RelayFormatErr) -> Self {
        RelayError::RelayFormatErr(e)
    }
}

impl From<RelayPersistErr> for RelayError {
    fn from(e: RelayPersistErr) -> Self {
        RelayError::RelayPersistErr(e)
    }
}

impl From<RelayReadErr> for RelayError {
    fn from(e: RelayReadErr) -> Self {
        RelayError::RelayReadErr(e)
    }
}

impl From<RelayExternalErr> for RelayError {
    fn from(e: RelayExternalErr) -> Self {
        RelayError::RelayExternalErr(e)
    }
}

impl From<RelayConfigErr> for RelayError {
    fn from(e: RelayConfigErr) -> Self {
        RelayError::RelayConfigErr(e)
    }
}

impl From<RelayRuntimeErr> for RelayError {
    fn from(e: RelayRuntimeErr) -> Self {
        RelayError::RelayRuntimeErr(e)
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::RelayQueryErr(RelayQueryErr::Request(e))
    }
}

pub struct ErrCvt<T>(pub T);

macro_rules! impl_err_convertor {
    ($t:ty,$sub_t:ident,$sub_tt:ident) => {
        paste! {
            impl ErrCvt<$t> {
                pub fn [<to_ $sub_t:snake>](self) -> RelayError {
                    RelayError::$sub_t($sub_t::$sub_tt(self.0))
                }
            }
        }
    };
}

impl_err_convertor!(reqwest::Error, RelayQueryErr, Request);
impl_err_convertor!(serde_json::Error, RelayPersistErr, Encode);

pub trait RelayResultExt {
    /// Log the error and carry on; used where a failure must never escalate,
    /// e.g. a scheduled cycle.
    fn log_err(&self, context: &str);
}

impl<T: Debug> RelayResultExt for RelayResult<T> {
    #[inline]
    fn log_err(&self, context: &str) {
        match self {
            Ok(_ok) => {}
            Err(err) => {
                tracing::warn!("{} failed: {}", context, err);
            }
        }
    }
}
