//! Topic and topic-filter rules.
//!
//! Topics are `/`-separated levels. Filters may use `+` (exactly one level)
//! and a trailing `#` (zero or more remaining levels).
use crate::BusError;

/// Check that a concrete topic is publishable.
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Check that a subscription filter is well formed.
pub fn validate_filter(filter: &str) -> Result<(), BusError> {
    if filter.is_empty() || filter.contains('\0') {
        return Err(BusError::InvalidFilter(filter.to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let is_last = i + 1 == levels.len();
        match *level {
            "#" if !is_last => return Err(BusError::InvalidFilter(filter.to_string())),
            "#" | "+" => {}
            other if other.contains(['+', '#']) => {
                return Err(BusError::InvalidFilter(filter.to_string()))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Whether `topic` is matched by `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(topic_matches("GROUPS", "GROUPS"));
        assert!(!topic_matches("GROUPS", "GROUPS/x"));
        assert!(!topic_matches("GROUPS", "USERS"));
    }

    #[test]
    fn hash_matches_remaining_levels() {
        assert!(topic_matches("USERS/#", "USERS/alice"));
        assert!(topic_matches("USERS/#", "USERS/a/b"));
        assert!(topic_matches("USERS/#", "USERS"));
        assert!(!topic_matches("USERS/#", "GROUPS"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn plus_matches_one_level() {
        assert!(topic_matches("USERS/+", "USERS/alice"));
        assert!(!topic_matches("USERS/+", "USERS"));
        assert!(!topic_matches("USERS/+", "USERS/a/b"));
        assert!(topic_matches("+/status", "alice/status"));
    }

    #[test]
    fn validate_topic_rejects_wildcards() {
        assert!(validate_topic("alice_Control").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("USERS/#").is_err());
        assert!(validate_topic("a/+/b").is_err());
    }

    #[test]
    fn validate_filter_rules() {
        assert!(validate_filter("USERS/#").is_ok());
        assert!(validate_filter("+/x/+").is_ok());
        assert!(validate_filter("#").is_ok());
        assert!(validate_filter("a/#/b").is_err());
        assert!(validate_filter("a#").is_err());
        assert!(validate_filter("a/b+").is_err());
        assert!(validate_filter("").is_err());
    }
}
