//! Annotation keys with Helm compatibility
//!
//! Charts may use either `rudder.io/*` or `helm.sh/*` keys; the native key
//! wins when both are present.

use std::collections::BTreeMap;
use std::time::Duration;

/// Native annotations
pub mod rudder {
    /// Hook events, comma separated
    pub const HOOK: &str = "rudder.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "rudder.io/hook-weight";
    /// Hook timeout, e.g. `90s` or `5m`
    pub const HOOK_TIMEOUT: &str = "rudder.io/hook-timeout";
    /// Hook delete policies, comma separated
    pub const HOOK_DELETE_POLICY: &str = "rudder.io/hook-delete-policy";
    /// `fail` (default) or `allow-failure`
    pub const HOOK_FAILURE_POLICY: &str = "rudder.io/hook-failure-policy";
    /// Install ordering weight within a chart
    pub const WEIGHT: &str = "rudder.io/weight";
    /// `keep` leaves the resource behind on uninstall
    pub const RESOURCE_POLICY: &str = "rudder.io/resource-policy";
}

/// Helm-compatible annotations
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
    pub const WEIGHT: &str = "helm.sh/resource-weight";
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Get annotation value, preferring the native key over Helm's
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    native_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(native_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Split a comma-separated annotation value
pub fn parse_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an integer weight (default: 0)
pub fn parse_weight(
    annotations: &BTreeMap<String, String>,
    native_key: &str,
    helm_key: &str,
) -> i32 {
    get_annotation(annotations, native_key, helm_key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Whether the resource must survive uninstall
pub fn is_kept(annotations: &BTreeMap<String, String>) -> bool {
    get_annotation(annotations, rudder::RESOURCE_POLICY, helm::RESOURCE_POLICY)
        .is_some_and(|p| p.trim() == "keep")
}

/// Parse a duration such as `500ms`, `30s`, `5m` or `1h`; bare numbers are seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (num_str, unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped, "h")
    } else {
        (value, "s")
    };

    let num: u64 = num_str.parse().ok()?;

    Some(match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_native_key_wins() {
        let a = annotations(&[(rudder::HOOK, "pre-install"), (helm::HOOK, "post-install")]);
        assert_eq!(get_annotation(&a, rudder::HOOK, helm::HOOK), Some("pre-install"));

        let a = annotations(&[(helm::HOOK, "post-install")]);
        assert_eq!(get_annotation(&a, rudder::HOOK, helm::HOOK), Some("post-install"));
    }

    #[test]
    fn test_parse_weight() {
        let a = annotations(&[(helm::HOOK_WEIGHT, "-5")]);
        assert_eq!(parse_weight(&a, rudder::HOOK_WEIGHT, helm::HOOK_WEIGHT), -5);

        let a = annotations(&[(rudder::WEIGHT, "heavy")]);
        assert_eq!(parse_weight(&a, rudder::WEIGHT, helm::WEIGHT), 0);
    }

    #[test]
    fn test_is_kept() {
        assert!(is_kept(&annotations(&[(helm::RESOURCE_POLICY, "keep")])));
        assert!(!is_kept(&annotations(&[(rudder::RESOURCE_POLICY, "delete")])));
        assert!(!is_kept(&BTreeMap::new()));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("pre-install, post-upgrade,,"),
            vec!["pre-install", "post-upgrade"]
        );
    }
}
