//! Notice envelopes.

use std::any::Any;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::registry::NoticeKind;
use crate::sender::SenderId;

/// An emitted notice: kind, opaque payload, and optional sender identity.
///
/// Built once per emission by a producer and consumed by
/// [`Dispatcher::notify`](crate::dispatcher::Dispatcher::notify). The
/// envelope is immutable for the duration of the dispatch and dropped when
/// `notify` returns; callbacks that need payload data past that point must
/// copy it out.
pub struct NoticeEnvelope {
    kind: NoticeKind,
    sender: Option<SenderId>,
    emitted_at: DateTime<Utc>,
    payload: Box<dyn Any + Send + Sync>,
}

impl NoticeEnvelope {
    /// Wraps `payload` as a notice of the given kind, with no sender.
    #[must_use]
    pub fn new(kind: NoticeKind, payload: impl Any + Send + Sync) -> Self {
        Self {
            kind,
            sender: None,
            emitted_at: Utc::now(),
            payload: Box::new(payload),
        }
    }

    /// Attaches the emitting object's identity.
    #[must_use]
    pub fn with_sender(mut self, sender: SenderId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// The notice's actual kind.
    #[must_use]
    pub const fn kind(&self) -> NoticeKind {
        self.kind
    }

    /// Identity of the emitting object, if any.
    #[must_use]
    pub const fn sender(&self) -> Option<SenderId> {
        self.sender
    }

    /// When the envelope was built.
    #[must_use]
    pub const fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }

    /// Borrows the payload as `T`, if that is its concrete type.
    #[must_use]
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for NoticeEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticeEnvelope")
            .field("kind", &self.kind)
            .field("sender", &self.sender)
            .field("emitted_at", &self.emitted_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct ContentsChanged {
        paths: Vec<String>,
    }

    #[test]
    fn envelope_exposes_kind_and_payload() {
        let env = NoticeEnvelope::new(
            NoticeKind::ROOT,
            ContentsChanged {
                paths: vec!["/root/a".to_string()],
            },
        );

        assert_eq!(env.kind(), NoticeKind::ROOT);
        assert_eq!(env.sender(), None);
        let payload = env.payload_ref::<ContentsChanged>().unwrap();
        assert_eq!(payload.paths, vec!["/root/a".to_string()]);
    }

    #[test]
    fn envelope_payload_downcast_mismatch_is_none() {
        let env = NoticeEnvelope::new(NoticeKind::ROOT, 42_u32);
        assert!(env.payload_ref::<String>().is_none());
        assert_eq!(env.payload_ref::<u32>(), Some(&42));
    }

    #[test]
    fn envelope_with_sender() {
        let sender = SenderId::new();
        let env = NoticeEnvelope::new(NoticeKind::ROOT, ()).with_sender(sender);
        assert_eq!(env.sender(), Some(sender));
    }
}
