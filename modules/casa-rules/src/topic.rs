//! MQTT topic filter matching.
//!
//! `+` matches exactly one level, `#` matches the rest of the topic (including
//! the parent level itself) and is only valid as the last level. Anything else
//! must match level by level.

/// Does `filter` select `topic`?
pub fn matches(filter: &str, topic: &str) -> bool {
    // Wildcards never match topics starting with `$` (broker-internal).
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// True when `filter` is a syntactically valid MQTT topic filter.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    levels.iter().enumerate().all(|(i, level)| match *level {
        "#" => i == last,
        "+" => true,
        other => !other.contains('#') && !other.contains('+'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filter_matches_only_same_topic() {
        assert!(matches("test/test", "test/test"));
        assert!(!matches("test/test", "test/test2"));
        assert!(!matches("test/test", "test"));
        assert!(!matches("test", "test/test"));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(matches("home/+/temp", "home/kitchen/temp"));
        assert!(!matches("home/+/temp", "home/kitchen/sink/temp"));
        assert!(!matches("home/+", "home"));
        assert!(matches("home/+", "home/"));
    }

    #[test]
    fn multi_level_wildcard_includes_parent() {
        assert!(matches("home/#", "home"));
        assert!(matches("home/#", "home/kitchen/temp"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("home/#", "garage/door"));
    }

    #[test]
    fn wildcards_skip_system_topics() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn filter_validation() {
        assert!(is_valid_filter("a/b/c"));
        assert!(is_valid_filter("a/+/c"));
        assert!(is_valid_filter("a/#"));
        assert!(!is_valid_filter("a/#/c"));
        assert!(!is_valid_filter("a/b#"));
        assert!(!is_valid_filter("a+/b"));
        assert!(!is_valid_filter(""));
    }
}
