use super::proto::metric::{MetricData, MetricSnapshot};
use crate::general::metrics::{MetricRecord, Snapshot};

pub trait ProtoExtMetricData {
    fn into_record(self) -> MetricRecord;
}

impl ProtoExtMetricData for MetricData {
    fn into_record(self) -> MetricRecord {
        MetricRecord::new(self.metric_name, self.labels, self.value, self.timestamp)
    }
}

pub trait ProtoExtSnapshot {
    fn into_proto(self) -> MetricSnapshot;
}

impl ProtoExtSnapshot for Snapshot {
    fn into_proto(self) -> MetricSnapshot {
        MetricSnapshot {
            node_id: self.node_id,
            metrics: self
                .records
                .into_iter()
                .map(|r| MetricData {
                    metric_name: r.name,
                    labels: r.labels,
                    value: r.value,
                    timestamp: r.timestamp,
                })
                .collect(),
        }
    }
}
