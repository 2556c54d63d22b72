//! Sender identity handles.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, comparable identity of a notice-emitting object.
///
/// A producer mints one `SenderId` per emitting object and attaches it to
/// every envelope that object emits. The dispatcher never owns or inspects
/// the producer itself, only compares identities, so a `SenderId` stays
/// valid for comparison after the underlying object is gone. A destroyed
/// sender simply never appears on a future envelope again.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(Uuid);

impl SenderId {
    /// Create a new random sender id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::new()
    }
}
