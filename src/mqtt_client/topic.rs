//! Topic names, topic filters and matching between them (MQTT v3.1.1 section 4.7).

/// Matches a publish topic against a subscription filter.
///
/// `+` matches exactly one level, `#` matches the parent level and any number
/// of levels below it. Topics starting with `$` are not matched by a filter
/// starting with a wildcard.
///
/// ```
/// use mqtt311_engine::mqtt_client::topic::matches;
/// assert!(matches("a/b/c", "a/+/c"));
/// assert!(matches("sport", "sport/#"));
/// assert!(!matches("a/b/c/d", "a/+/c"));
/// assert!(!matches("$SYS/uptime", "#"));
/// ```
#[must_use]
pub fn matches(topic: &str, filter: &str) -> bool {
    if topic.is_empty() || filter.is_empty() {
        return false;
    }
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    if topic == filter {
        return true;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.peek().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validates a topic name used in PUBLISH: non-empty, no wildcards, no NUL.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains(&['+', '#', '\0'][..])
}

/// Validates a subscription filter: `#` only as a whole last level, `+` only
/// as a whole level.
#[must_use]
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => return false,
            "#" | "+" => {}
            _ if level.contains(&['+', '#'][..]) => return false,
            _ => {}
        }
    }
    true
}
