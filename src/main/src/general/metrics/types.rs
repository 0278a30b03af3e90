use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::result::{ErrCvt, RelayConfigErr, RelayResult};

/// One sample as it is persisted and served.
///
/// `timestamp` keeps the backend-native unit (milliseconds since epoch for
/// Prometheus). Records are never mutated once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    #[serde(rename = "metricName")]
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "sample_value")]
    pub value: f64,
    pub timestamp: i64,
}

impl MetricRecord {
    pub fn new(
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        value: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            name: name.into(),
            labels,
            value,
            timestamp,
        }
    }
}

/// The on-disk and on-wire snapshot shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "nodeId", default)]
    pub node_id: String,
    #[serde(rename = "metrics", default)]
    pub records: Vec<MetricRecord>,
}

impl Snapshot {
    pub fn new(node_id: &NodeIdentity, records: Vec<MetricRecord>) -> Self {
        Self {
            node_id: node_id.to_string(),
            records,
        }
    }

    /// Pretty JSON with 4-space indentation, the format of the snapshot files.
    pub fn to_pretty_json(&self) -> RelayResult<Vec<u8>> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|e| ErrCvt(e).to_relay_persist_err())?;
        Ok(buf)
    }

    pub fn to_json(&self) -> RelayResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ErrCvt(e).to_relay_persist_err())
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Which of the two independently written snapshot files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SnapshotScope {
    /// Built from backend polls.
    SelfScoped,
    /// Built from sibling application pushes and pulls.
    External,
}

impl SnapshotScope {
    pub fn file_name(&self) -> &'static str {
        match self {
            SnapshotScope::SelfScoped => "scraped-metrics.json",
            SnapshotScope::External => "scraped-metrics-external.json",
        }
    }
}

/// Identity of this node, read once at startup.
///
/// An empty identity is allowed: metric collection keeps working, only the
/// downstream consumers lose the ability to tell nodes apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity(Arc<str>);

impl NodeIdentity {
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id.trim()))
    }

    pub fn read_from(path: impl AsRef<Path>) -> RelayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| RelayConfigErr::NodeIdUnreadable {
            path: PathBuf::from(path),
            err,
        })?;
        let id = Self::new(&raw);
        if id.is_empty() {
            tracing::warn!(
                "node id file {:?} is empty, operating with an empty identity",
                path
            );
        } else {
            tracing::info!("node id: {}", id);
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a sample value the way the Prometheus API renders them.
pub fn parse_sample_value(raw: &str) -> Option<f64> {
    match raw {
        "NaN" => Some(f64::NAN),
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// JSON has no NaN or Inf; those are written as the Prometheus strings.
mod sample_value {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            s.serialize_f64(*value)
        } else if value.is_nan() {
            s.serialize_str("NaN")
        } else if value.is_sign_positive() {
            s.serialize_str("+Inf")
        } else {
            s.serialize_str("-Inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Number(v) => Ok(v),
            Raw::Text(text) => super::parse_sample_value(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid sample value {:?}", text))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, labels: &[(&str, &str)], value: f64, ts: i64) -> MetricRecord {
        MetricRecord::new(
            name,
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            ts,
        )
    }

    #[test]
    fn test_snapshot_file_format() {
        let snapshot = Snapshot::new(
            &NodeIdentity::new("node-a"),
            vec![record("node_load1", &[("cpu", "0")], 0.5, 1000)],
        );
        let text = String::from_utf8(snapshot.to_pretty_json().unwrap()).unwrap();
        let expected = r#"{
    "nodeId": "node-a",
    "metrics": [
        {
            "metricName": "node_load1",
            "labels": {
                "cpu": "0"
            },
            "value": 0.5,
            "timestamp": 1000
        }
    ]
}"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn test_snapshot_preserves_order_and_duplicates() {
        let records = vec![
            record("b", &[], 2.0, 2),
            record("a", &[], 1.0, 1),
            record("b", &[], 2.0, 2),
        ];
        let snapshot = Snapshot::new(&NodeIdentity::new("n"), records.clone());
        let back = Snapshot::from_json(&snapshot.to_pretty_json().unwrap()).unwrap();
        assert_eq!(back.records, records);
        assert_eq!(back.node_id, "n");
    }

    #[test]
    fn test_non_finite_values_survive_the_file() {
        let snapshot = Snapshot::new(
            &NodeIdentity::new("n"),
            vec![
                record("nan", &[], f64::NAN, 1),
                record("inf", &[], f64::INFINITY, 1),
                record("ninf", &[], f64::NEG_INFINITY, 1),
            ],
        );
        let bytes = snapshot.to_pretty_json().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("\"NaN\""));
        assert!(text.contains("\"+Inf\""));
        assert!(text.contains("\"-Inf\""));

        let back = Snapshot::from_json(&bytes).unwrap();
        assert!(back.records[0].value.is_nan());
        assert_eq!(back.records[1].value, f64::INFINITY);
        assert_eq!(back.records[2].value, f64::NEG_INFINITY);
    }

    #[test]
    fn test_node_identity_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodeid");
        std::fs::write(&path, "  node-7\n").unwrap();
        assert_eq!(NodeIdentity::read_from(&path).unwrap().as_str(), "node-7");

        std::fs::write(&path, "\n").unwrap();
        assert!(NodeIdentity::read_from(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_node_identity_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NodeIdentity::read_from(dir.path().join("absent")).unwrap_err();
        assert!(matches!(
            err,
            crate::result::RelayError::RelayConfigErr(RelayConfigErr::NodeIdUnreadable { .. })
        ));
    }

    #[test]
    fn test_parse_sample_value() {
        assert_eq!(parse_sample_value("0.5"), Some(0.5));
        assert_eq!(parse_sample_value("+Inf"), Some(f64::INFINITY));
        assert!(parse_sample_value("NaN").unwrap().is_nan());
        assert_eq!(parse_sample_value("abc"), None);
    }
}
