//! MQTT topic-filter matching.
//!
//! Filters use `/`-separated levels with two wildcards: `+` matches
//! exactly one level, `#` matches all remaining levels (including the
//! parent level itself) and must be the last level of the filter.
//! Filters starting with a wildcard never match topics whose first level
//! starts with `$`, so `#` does not leak the `$SYS` namespace.

/// Reserved namespace for broker and cluster metadata.
pub const SYS_PREFIX: &str = "$SYS";

/// Check whether `filter` matches the concrete topic name `topic`.
pub fn matches(filter: &str, topic: &str) -> bool {
    // Wildcard-first filters are blind to the $-namespace.
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(level)) if expected == level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Check whether `filter` is a well-formed subscription filter:
/// non-empty, `#` only as the final level, `+` and `#` only as whole
/// levels.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        match *level {
            "#" => {
                if index != levels.len() - 1 {
                    return false;
                }
            }
            "+" => {}
            other => {
                if other.contains('#') || other.contains('+') {
                    return false;
                }
            }
        }
    }
    true
}

/// Check whether `topic` is legal as a publish topic: non-empty and free
/// of wildcard characters.
pub fn valid_publish_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains('#') && !topic.contains('+')
}

/// Check whether `topic` lives in the reserved `$SYS` namespace.
pub fn is_system(topic: &str) -> bool {
    topic.starts_with(SYS_PREFIX)
}
