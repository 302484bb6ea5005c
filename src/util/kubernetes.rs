//! Kubernetes object-name and metadata helpers.

use std::collections::BTreeMap;

use super::hash::hash_bytes;

const MAX_K8S_NAME_LEN: usize = 63;

/// Concatenate name parts with `-`, hashing the tail when the result would
/// exceed the 63-char object-name limit.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let joined = parts.join("-");
    if joined.len() <= MAX_K8S_NAME_LEN {
        return joined;
    }

    let suffix = &hash_bytes(joined.as_bytes())[..8];
    format!("{}-{}", &joined[..MAX_K8S_NAME_LEN - 1 - suffix.len()], suffix)
}

/// Force a string into DNS-label shape: lowercase alphanumerics and dashes,
/// starting and ending alphanumeric.
pub fn enforce_dns_label_convention(name: &str) -> String {
    let lowered: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    lowered
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Volume name for a file projected out of a ConfigMap.
pub fn config_map_volume_name(config_map_name: &str, config_map_path: &str) -> String {
    enforce_dns_label_convention(&safe_concat_name(&[config_map_name, config_map_path]))
}

/// True iff every expected key/value pair is present in the existing map.
/// Extra keys on the existing side are fine (other controllers annotate too).
pub fn map_contains_all_expected(
    existing: Option<&BTreeMap<String, String>>,
    expected: Option<&BTreeMap<String, String>>,
) -> bool {
    let expected = match expected {
        Some(expected) if !expected.is_empty() => expected,
        _ => return true,
    };

    let Some(existing) = existing else {
        return false;
    };

    expected
        .iter()
        .all(|(k, v)| existing.get(k).map(|have| have == v).unwrap_or(false))
}
