//! Message identity service.

use uuid::Uuid;

/// Generate a new message id: a random v4 UUID, lowercase and hyphenated.
///
/// Uniqueness is probabilistic; nothing checks the store for collisions.
pub fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether `value` is a hyphenated UUID as produced by [`new_message_id`].
pub fn is_message_id(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}
