use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use super::types::parse_sample_value;
use crate::result::{ErrCvt, RelayFormatErr, RelayQueryErr, RelayResult};

/// One series of an instant vector, labels still unfiltered.
#[derive(Clone, Debug, PartialEq)]
pub struct VectorSample {
    pub metric: BTreeMap<String, String>,
    pub value: f64,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    Vector(Vec<VectorSample>),
    /// Scalar, string or matrix results, which the relay does not persist.
    Other { result_type: String },
}

/// Instant-query capability of a monitoring backend.
#[async_trait]
pub trait MetricsBackend: Send + Sync + 'static {
    async fn instant_query(&self, query: &str) -> RelayResult<QueryValue>;
}

/// Prometheus HTTP API client.
pub struct PrometheusBackend {
    client: reqwest::Client,
    query_url: reqwest::Url,
}

impl PrometheusBackend {
    /// `host` may carry a scheme; plain hosts are reached over http.
    pub fn new(host: &str, port: u16) -> RelayResult<Self> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host.trim_end_matches('/'), port)
        } else {
            format!("http://{}:{}", host, port)
        };
        let query_url = reqwest::Url::parse(&format!("{}/api/v1/query", base))
            .map_err(|_| RelayQueryErr::InvalidBackendAddr { addr: base.clone() })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ErrCvt(e).to_relay_query_err())?;
        tracing::info!("prometheus backend at {}", query_url);
        Ok(Self { client, query_url })
    }
}

#[async_trait]
impl MetricsBackend for PrometheusBackend {
    async fn instant_query(&self, query: &str) -> RelayResult<QueryValue> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let resp = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query.to_owned()), ("time", format!("{:.3}", now))])
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        decode_response(status, &body)
    }
}

#[derive(Deserialize)]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct ApiData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct RawVectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

/// Decodes a `/api/v1/query` response body.
pub fn decode_response(http_status: u16, body: &[u8]) -> RelayResult<QueryValue> {
    let envelope: ApiEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            if !(200..300).contains(&http_status) {
                return Err(RelayQueryErr::Rejected {
                    status: http_status,
                    error_type: String::new(),
                    error: String::from_utf8_lossy(body).into_owned(),
                }
                .into());
            }
            return Err(RelayFormatErr::MalformedResponse {
                detail: err.to_string(),
            }
            .into());
        }
    };

    for warning in &envelope.warnings {
        tracing::warn!("backend warning: {}", warning);
    }

    if envelope.status != "success" || !(200..300).contains(&http_status) {
        return Err(RelayQueryErr::Rejected {
            status: http_status,
            error_type: envelope.error_type.unwrap_or_default(),
            error: envelope.error.unwrap_or_default(),
        }
        .into());
    }

    let Some(data) = envelope.data else {
        return Err(RelayFormatErr::MalformedResponse {
            detail: "success response without data".to_owned(),
        }
        .into());
    };
    if data.result_type != "vector" {
        return Ok(QueryValue::Other {
            result_type: data.result_type,
        });
    }

    let raw: Vec<RawVectorSample> =
        serde_json::from_value(data.result).map_err(|err| RelayFormatErr::MalformedResponse {
            detail: err.to_string(),
        })?;
    let mut samples = Vec::with_capacity(raw.len());
    for RawVectorSample {
        metric,
        value: (ts_secs, raw_value),
    } in raw
    {
        let Some(value) = parse_sample_value(&raw_value) else {
            return Err(RelayFormatErr::InvalidSampleValue {
                series: metric.get("__name__").cloned().unwrap_or_default(),
                raw: raw_value,
            }
            .into());
        };
        samples.push(VectorSample {
            metric,
            value,
            timestamp_ms: (ts_secs * 1000.0).round() as i64,
        });
    }
    Ok(QueryValue::Vector(samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::RelayError;

    #[test]
    fn test_decode_vector() {
        let body = br#"{
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"__name__": "node_load1", "instance": "x", "job": "y"}, "value": [1.0, "0.5"]},
                    {"metric": {"__name__": "up"}, "value": [1700000000.123, "NaN"]}
                ]
            }
        }"#;
        let QueryValue::Vector(samples) = decode_response(200, body).unwrap() else {
            panic!("expected vector");
        };
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 0.5);
        assert_eq!(samples[0].timestamp_ms, 1000);
        assert_eq!(samples[0].metric.get("job").map(String::as_str), Some("y"));
        assert!(samples[1].value.is_nan());
        assert_eq!(samples[1].timestamp_ms, 1_700_000_000_123);
    }

    #[test]
    fn test_decode_non_vector() {
        let body = br#"{"status":"success","data":{"resultType":"scalar","result":[1.0,"2"]}}"#;
        assert_eq!(
            decode_response(200, body).unwrap(),
            QueryValue::Other {
                result_type: "scalar".to_owned()
            }
        );
    }

    #[test]
    fn test_decode_rejected_query() {
        let body = br#"{"status":"error","errorType":"bad_data","error":"parse error at char 3"}"#;
        let err = decode_response(400, body).unwrap_err();
        match err {
            RelayError::RelayQueryErr(RelayQueryErr::Rejected {
                status,
                error_type,
                error,
            }) => {
                assert_eq!(status, 400);
                assert_eq!(error_type, "bad_data");
                assert!(error.contains("parse error"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_response(200, b"<html>").unwrap_err().is_format_err());
        assert!(decode_response(502, b"bad gateway").unwrap_err().is_query_err());
    }

    #[test]
    fn test_decode_invalid_sample_value() {
        let body = br#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"__name__":"m"},"value":[1,"abc"]}]}}"#;
        let err = decode_response(200, body).unwrap_err();
        assert!(matches!(
            err,
            RelayError::RelayFormatErr(RelayFormatErr::InvalidSampleValue { .. })
        ));
    }

    #[test]
    fn test_backend_addr() {
        assert!(PrometheusBackend::new("localhost", 9090).is_ok());
        assert!(PrometheusBackend::new("http://prom/", 9090).is_ok());
        assert!(PrometheusBackend::new("bad host", 9090)
            .err()
            .map(|e| e.is_query_err())
            .unwrap_or(false));
    }
}
