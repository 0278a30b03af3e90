use std::collections::BTreeMap;

/// Labels that duplicate the record name or only describe the scrape setup.
const ALWAYS_DROPPED: [&str; 3] = ["__name__", "job", "instance"];

/// Substring carried by every label cAdvisor derives from a compose file.
const COMPOSE_LABEL_MARKER: &str = "container_label_com_docker_compose";

/// Compose labels that are low-cardinality and useful for grouping.
const COMPOSE_LABEL_ALLOW_LIST: [&str; 3] = [
    "container_label_com_docker_compose_service",
    "container_label_com_docker_compose_version",
    "container_label_com_docker_compose_project",
];

/// Whether a raw backend label makes it into the persisted record.
pub fn keep_label(key: &str) -> bool {
    if ALWAYS_DROPPED.contains(&key) {
        return false;
    }
    !key.contains(COMPOSE_LABEL_MARKER) || COMPOSE_LABEL_ALLOW_LIST.contains(&key)
}

/// Applies [`keep_label`] to a whole label set. Values are never touched.
pub fn filter_labels<'a, I>(raw: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    raw.into_iter()
        .filter(|(k, _)| keep_label(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
