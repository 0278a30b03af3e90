/// Selectors polled when nothing else is configured, and the set a failing
/// custom query falls back to.
pub const PRESET_SELECTORS: &[&str] = &[
    "container_cpu_usage_seconds_total",
    "container_memory_usage_bytes",
    "container_network_receive_bytes_total",
    "container_network_transmit_bytes_total",
    "container_fs_usage_bytes",
    "container_fs_writes_bytes_total",
    "container_fs_reads_bytes_total",
    "container_start_time_seconds",
    "container_tasks_state",
    "node_cpu_seconds_total",
    "node_memory_MemAvailable_bytes",
    "node_disk_io_time_seconds_total",
    "node_disk_read_bytes_total",
    "node_disk_written_bytes_total",
    "node_network_receive_bytes_total",
    "node_network_transmit_bytes_total",
    "node_filesystem_avail_bytes",
    "node_filesystem_size_bytes",
    "node_load1",
    "node_load5",
    "node_load15",
];

/// PromQL set union, accepted between any two instant vectors.
const OR_COMBINATOR: &str = " or ";

pub fn preset_selectors() -> Vec<String> {
    PRESET_SELECTORS.iter().map(|s| s.to_string()).collect()
}

/// Joins selectors into one backend expression. Selector syntax is not
/// checked here; a malformed selector is the backend's to reject.
pub fn format_query<S: AsRef<str>>(selectors: &[S]) -> String {
    selectors
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(OR_COMBINATOR)
}

/// Splits a comma separated selector list, trimming entries and dropping
/// empty ones.
pub fn parse_selector_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_query_joins_with_or() {
        assert_eq!(format_query(&["node_load1"]), "node_load1");
        assert_eq!(
            format_query(&["node_load1", "node_load5", "up{job=\"x\"}"]),
            "node_load1 or node_load5 or up{job=\"x\"}"
        );
    }

    #[test]
    fn test_format_query_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(format_query(&empty), "");
    }

    #[test]
    fn test_format_query_does_not_validate() {
        assert_eq!(format_query(&["{{broken", ""]), "{{broken or ");
    }

    #[test]
    fn test_parse_selector_csv() {
        assert_eq!(
            parse_selector_csv("node_load1, node_load5,,container_tasks_state "),
            vec!["node_load1", "node_load5", "container_tasks_state"]
        );
        assert!(parse_selector_csv(" , ").is_empty());
    }

    #[test]
    fn test_preset_has_every_selector() {
        let preset = preset_selectors();
        assert_eq!(preset.len(), 21);
        assert_eq!(preset.first().map(String::as_str), Some("container_cpu_usage_seconds_total"));
        assert_eq!(preset.last().map(String::as_str), Some("node_load15"));
    }
}
