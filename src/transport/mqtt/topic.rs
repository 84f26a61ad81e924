//! MQTT topic validation and filter matching

use thiserror::Error;

/// Longest topic the protocol can encode
const MAX_TOPIC_LEN: usize = 65535;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic must not be empty")]
    Empty,
    #[error("topic is longer than {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("topic contains a null character")]
    NullCharacter,
    #[error("wildcards are not allowed in a topic name")]
    WildcardInName,
    #[error("'#' must be the last level of a topic filter")]
    MisplacedMultiLevelWildcard,
    #[error("wildcards must occupy an entire topic level")]
    PartialLevelWildcard,
    #[error("shared subscription must have the form $share/<group>/<filter>")]
    InvalidSharedSubscription,
}

/// Prefix of a shared subscription filter
const SHARED_PREFIX: &str = "$share/";

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    Ok(())
}

/// Validate a topic used for publishing
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName);
    }
    Ok(())
}

/// Split a `$share/<group>/<filter>` subscription into group and filter
///
/// Returns `None` for ordinary filters and for malformed shared ones.
pub fn parse_shared_filter(filter: &str) -> Option<(&str, &str)> {
    let rest = filter.strip_prefix(SHARED_PREFIX)?;
    let (group, actual) = rest.split_once('/')?;
    if group.is_empty() || actual.is_empty() {
        return None;
    }
    Some((group, actual))
}

/// Validate a topic filter used for subscribing
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let filter = if filter.starts_with(SHARED_PREFIX) {
        match parse_shared_filter(filter) {
            Some((group, actual)) if !group.contains(['+', '#']) => actual,
            _ => return Err(TopicError::InvalidSharedSubscription),
        }
    } else {
        filter
    };

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => {
                return Err(TopicError::MisplacedMultiLevelWildcard);
            }
            "#" | "+" => {}
            other if other.contains(['+', '#']) => {
                return Err(TopicError::PartialLevelWildcard);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Whether `topic` is matched by subscription `filter`
///
/// Topics starting with `$` are never matched by a leading wildcard. A shared
/// subscription matches the topics of its inner filter, since the broker
/// delivers under the plain topic name.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter = parse_shared_filter(filter).map_or(filter, |(_, actual)| actual);
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("bar", "bar"));
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("sensors/+/temp", "sensors/kitchen/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/kitchen/hall/temp"));
        assert!(topic_matches("+", "bar"));
        assert!(topic_matches("a/+", "a/"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("sport/#", "sport"));
        assert!(topic_matches("sport/#", "sport/tennis/player1"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("sport/#", "sports"));
    }

    #[test]
    fn test_system_topics_not_matched_by_leading_wildcard() {
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_topic_filter("bar").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert_eq!(
            validate_topic_filter("a/#/c"),
            Err(TopicError::MisplacedMultiLevelWildcard)
        );
        assert_eq!(
            validate_topic_filter("a/b#"),
            Err(TopicError::PartialLevelWildcard)
        );
        assert_eq!(
            validate_topic_filter("a+/b"),
            Err(TopicError::PartialLevelWildcard)
        );
    }

    #[test]
    fn test_shared_subscription_matches_plain_topic() {
        assert!(topic_matches("$share/g/bar", "bar"));
        assert!(topic_matches("$share/workers/sensors/+", "sensors/kitchen"));
        assert!(!topic_matches("$share/g/bar", "$share/g/bar/x"));
        assert!(!topic_matches("$share/g/bar", "baz"));
        assert!(!topic_matches("$share/g/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn test_parse_shared_filter() {
        assert_eq!(parse_shared_filter("$share/g/bar"), Some(("g", "bar")));
        assert_eq!(parse_shared_filter("$share/g/a/b"), Some(("g", "a/b")));
        assert_eq!(parse_shared_filter("$share//bar"), None);
        assert_eq!(parse_shared_filter("$share/g/"), None);
        assert_eq!(parse_shared_filter("$share/g"), None);
        assert_eq!(parse_shared_filter("bar"), None);
    }

    #[test]
    fn test_shared_filter_validation() {
        assert!(validate_topic_filter("$share/g/bar").is_ok());
        assert!(validate_topic_filter("$share/g/a/#").is_ok());
        for filter in ["$share/g", "$share//bar", "$share/g+/bar", "$share/g/"] {
            assert_eq!(
                validate_topic_filter(filter),
                Err(TopicError::InvalidSharedSubscription),
                "{filter}"
            );
        }
        assert_eq!(
            validate_topic_filter("$share/g/a/#/b"),
            Err(TopicError::MisplacedMultiLevelWildcard)
        );
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_topic_name("foo").is_ok());
        assert!(validate_topic_name("foo/bar baz").is_ok());
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert_eq!(validate_topic_name("foo/+"), Err(TopicError::WildcardInName));
        assert_eq!(validate_topic_name("foo/#"), Err(TopicError::WildcardInName));
        assert_eq!(
            validate_topic_name("foo\0bar"),
            Err(TopicError::NullCharacter)
        );
        assert_eq!(
            validate_topic_name(&"x".repeat(MAX_TOPIC_LEN + 1)),
            Err(TopicError::TooLong)
        );
    }

    proptest! {
        #[test]
        fn valid_topic_names_match_themselves(topic in "[a-zA-Z0-9 _/-]{1,64}") {
            prop_assert!(validate_topic_name(&topic).is_ok());
            prop_assert!(validate_topic_filter(&topic).is_ok());
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn hash_filter_matches_every_plain_topic(topic in "[a-zA-Z0-9_/-]{1,64}") {
            prop_assert!(topic_matches("#", &topic));
        }
    }
}
