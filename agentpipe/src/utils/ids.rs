//! Run id generation.

use uuid::Uuid;

/// Generates a new run id.
///
/// Ids are UUID v7 so that lexical order roughly follows creation time, which
/// keeps state directories listable in start order.
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}

/// Returns true if `id` can be used as a storage key.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted so an id can never
/// escape the state directory.
#[must_use]
pub fn is_valid_run_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
