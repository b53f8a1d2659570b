//! Topic names and filters
//!
//! Validation and wildcard matching used by bridge subscriptions, exclude
//! lists and the topic remapper.

pub mod validation;

pub use validation::{
    topic_matches_filter, validate_topic_filter, validate_topic_name, TopicError,
    MAX_TOPIC_LENGTH,
};
