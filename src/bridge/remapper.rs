//! Destination topic rewriting for bridge forwarding
//!
//! A destination pattern is a template over the original topic:
//! - `{#}` expands to the whole original topic
//! - `{N}` expands to the N-th level (1-based) of the original topic
//! - `{name}` expands to the substitution registered under `name`
//!
//! The pattern `{#}` on its own is the pass-through sentinel.

use crate::config::DEFAULT_DESTINATION_PATTERN;
use crate::error::TransformError;
use crate::topic::validate_topic_name;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    WholeTopic,
    Level(usize),
    Token(String),
}

/// A compiled destination pattern
#[derive(Debug, Clone)]
pub struct TopicRemapper {
    pattern: String,
    segments: Vec<Segment>,
}

impl TopicRemapper {
    /// Compile a destination pattern, rejecting malformed placeholders
    pub fn new(pattern: &str) -> Result<Self, TransformError> {
        Ok(Self {
            pattern: pattern.to_string(),
            segments: parse(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_passthrough(&self) -> bool {
        self.pattern == DEFAULT_DESTINATION_PATTERN
    }

    /// Rewrite `topic` into a concrete destination topic
    pub fn apply(&self, topic: &str, substitutions: &[(&str, &str)]) -> Result<String, TransformError> {
        if self.is_passthrough() {
            return Ok(topic.to_string());
        }

        let mut result = String::with_capacity(self.pattern.len() + topic.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => result.push_str(text),
                Segment::WholeTopic => result.push_str(topic),
                Segment::Level(n) => {
                    let level = topic.split('/').nth(n - 1).ok_or_else(|| {
                        TransformError::InvalidPattern {
                            pattern: self.pattern.clone(),
                            reason: format!("topic '{}' has no level {}", topic, n),
                        }
                    })?;
                    result.push_str(level);
                }
                Segment::Token(name) => {
                    let value = substitutions
                        .iter()
                        .find(|(key, _)| *key == name.as_str())
                        .map(|(_, value)| *value)
                        .ok_or_else(|| TransformError::InvalidPattern {
                            pattern: self.pattern.clone(),
                            reason: format!("unknown token '{{{}}}'", name),
                        })?;
                    result.push_str(value);
                }
            }
        }

        validate_topic_name(&result).map_err(|reason| TransformError::InvalidTopic {
            topic: result.clone(),
            reason,
        })?;
        Ok(result)
    }
}

/// One-shot remap without keeping the compiled pattern
pub fn remap(
    pattern: &str,
    topic: &str,
    substitutions: &[(&str, &str)],
) -> Result<String, TransformError> {
    TopicRemapper::new(pattern)?.apply(topic, substitutions)
}

fn parse(pattern: &str) -> Result<Vec<Segment>, TransformError> {
    let invalid = |reason: &str| TransformError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut rest = pattern;
    while !rest.is_empty() {
        match rest.find(['{', '}']) {
            None => {
                segments.push(Segment::Literal(rest.to_string()));
                break;
            }
            Some(pos) if rest.as_bytes()[pos] == b'}' => {
                return Err(invalid("unmatched '}'"));
            }
            Some(pos) => {
                if pos > 0 {
                    segments.push(Segment::Literal(rest[..pos].to_string()));
                }
                let after = &rest[pos + 1..];
                let end = after.find('}').ok_or_else(|| invalid("unterminated '{'"))?;
                let token = &after[..end];
                if token.is_empty() || token.contains('{') {
                    return Err(invalid("empty or nested placeholder"));
                }
                segments.push(placeholder(token).ok_or_else(|| invalid("level index starts at 1"))?);
                rest = &after[end + 1..];
            }
        }
    }
    Ok(segments)
}

fn placeholder(token: &str) -> Option<Segment> {
    if token == "#" {
        return Some(Segment::WholeTopic);
    }
    match token.parse::<usize>() {
        Ok(0) => None,
        Ok(n) => Some(Segment::Level(n)),
        Err(_) => Some(Segment::Token(token.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BRIDGE_NAME_TOKEN;
    use proptest::prelude::*;

    #[test]
    fn test_passthrough_keeps_topic() {
        assert_eq!(remap("{#}", "sensors/temp", &[]).unwrap(), "sensors/temp");
    }

    #[test]
    fn test_prefix_with_bridge_name() {
        let subs = [(BRIDGE_NAME_TOKEN, "b1")];
        assert_eq!(
            remap("edge/{bridge.name}/{#}", "sensors/temp", &subs).unwrap(),
            "edge/b1/sensors/temp"
        );
    }

    #[test]
    fn test_level_placeholders() {
        assert_eq!(
            remap("site/{2}/{1}", "plant/line-4/temp", &[]).unwrap(),
            "site/line-4/plant"
        );
    }

    #[test]
    fn test_literal_pattern() {
        assert_eq!(remap("fixed/topic", "anything", &[]).unwrap(), "fixed/topic");
    }

    #[test]
    fn test_unknown_token_fails() {
        let err = remap("{region}/{#}", "a/b", &[]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidPattern { .. }));
    }

    #[test]
    fn test_level_out_of_range_fails() {
        assert!(remap("{3}", "a/b", &[]).is_err());
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        assert!(TopicRemapper::new("a/{#").is_err());
        assert!(TopicRemapper::new("a/}").is_err());
        assert!(TopicRemapper::new("a/{}").is_err());
        assert!(TopicRemapper::new("{0}").is_err());
    }

    #[test]
    fn test_wildcard_result_rejected() {
        let err = remap("out/+/{#}", "a/b", &[]).unwrap_err();
        assert!(matches!(err, TransformError::InvalidTopic { .. }));
    }

    #[test]
    fn test_substitution_cannot_inject_wildcard() {
        let subs = [(BRIDGE_NAME_TOKEN, "#")];
        assert!(remap("{bridge.name}/x", "a", &subs).is_err());
    }

    proptest! {
        #[test]
        fn prop_passthrough_is_identity(topic in "[a-zA-Z0-9_$/ .-]{0,64}") {
            prop_assert_eq!(remap("{#}", &topic, &[]).unwrap(), topic);
        }
    }
}
