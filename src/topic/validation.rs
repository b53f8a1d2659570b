//! Topic name and filter validation
//!
//! Key rules:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Topic filters MAY contain wildcards
//! - Multi-level wildcard (#) must occupy the last level on its own
//! - Single-level wildcard (+) must occupy an entire level
//! - Topics starting with $ are not matched by filters starting with a wildcard

use thiserror::Error;

/// Maximum encoded length of a topic name or filter
pub const MAX_TOPIC_LENGTH: usize = 65535;

/// Reasons a topic name or filter is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,
    #[error("topic exceeds maximum length of {MAX_TOPIC_LENGTH} bytes")]
    TooLong,
    #[error("topic cannot contain null character")]
    NullCharacter,
    #[error("topic name cannot contain wildcards")]
    WildcardInName,
    #[error("multi-level wildcard must occupy the last level on its own")]
    MisplacedMultiWildcard,
    #[error("single-level wildcard must occupy entire level")]
    MisplacedSingleWildcard,
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NullCharacter);
    }
    Ok(())
}

/// Validate a concrete topic name (what a PUBLISH carries)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInName);
    }
    Ok(())
}

/// Validate a topic filter (subscription filters and exclude lists)
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err(TopicError::MisplacedMultiWildcard);
        }
        if level.contains('+') && level != "+" {
            return Err(TopicError::MisplacedSingleWildcard);
        }
    }
    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// - `+` matches exactly one level
/// - `#` matches zero or more remaining levels
/// - `$`-topics don't match filters starting with `+` or `#`
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(level) if filter_level == "+" || filter_level == level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
