// src/topic.rs

/// Subscribe-all wildcard, the topic every session starts on.
pub const WILDCARD_ALL: &str = "#";

/// Checks that `filter` is a well-formed subscription filter: non-empty,
/// `#` only as the last level, and wildcards never mixed with other
/// characters inside a level.
pub fn valid_filter(filter: &str) -> bool {
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

/// Checks if a subscription filter matches a concrete topic.
/// Supports `+` (single level) and `#` (multi level). Wildcards in the first
/// level do not match topics starting with `$`.
pub fn matches(filter: &str, topic: &str) -> bool {
    if !valid_filter(filter) {
        return false;
    }
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    if topic.starts_with('$') && (filter_parts[0] == "#" || filter_parts[0] == "+") {
        return false;
    }

    let mut t_idx = 0;
    for part in &filter_parts {
        if *part == "#" {
            return true;
        }
        if t_idx >= topic_parts.len() {
            return false;
        }
        if *part != "+" && *part != topic_parts[t_idx] {
            return false;
        }
        t_idx += 1;
    }

    t_idx == topic_parts.len()
}
