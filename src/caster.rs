//! Call-scoped downcast capability.

use std::any::Any;

use crate::envelope::NoticeEnvelope;
use crate::registry::{KindRegistry, NoticeKind};
use crate::sender::SenderId;

/// A borrowed capability for reinterpreting the dispatched notice.
///
/// The dispatcher constructs one `Caster` per callback invocation, bound to
/// the envelope being delivered. It borrows from the dispatch call, so it
/// cannot be stored or returned past the callback; the borrow checker
/// enforces what the source system needed a noncopyable type for.
#[derive(Debug)]
pub struct Caster<'a> {
    registry: &'a KindRegistry,
    envelope: &'a NoticeEnvelope,
}

impl<'a> Caster<'a> {
    pub(crate) fn new(registry: &'a KindRegistry, envelope: &'a NoticeEnvelope) -> Self {
        Self { registry, envelope }
    }

    /// Attempts to view the notice as `requested`.
    ///
    /// Succeeds iff `requested` is the notice's actual kind or one of its
    /// ancestors; casting to a sibling or a strictly more-derived kind
    /// returns `None`. Repeated attempts are independent and side-effect
    /// free.
    #[must_use]
    pub fn attempt(&self, requested: NoticeKind) -> Option<NoticeView<'a>> {
        if self
            .registry
            .is_ancestor_or_self(requested, self.envelope.kind())
        {
            Some(NoticeView {
                kind: requested,
                envelope: self.envelope,
            })
        } else {
            None
        }
    }
}

/// A typed view of the dispatched notice, produced by [`Caster::attempt`].
///
/// Borrows the envelope; the payload is untouched by casting.
#[derive(Debug, Clone, Copy)]
pub struct NoticeView<'a> {
    kind: NoticeKind,
    envelope: &'a NoticeEnvelope,
}

impl<'a> NoticeView<'a> {
    /// The kind this view was requested as.
    #[must_use]
    pub const fn kind(&self) -> NoticeKind {
        self.kind
    }

    /// The notice's actual (most-derived) kind.
    #[must_use]
    pub const fn actual_kind(&self) -> NoticeKind {
        self.envelope.kind()
    }

    /// Identity of the emitting object, if any.
    #[must_use]
    pub const fn sender(&self) -> Option<SenderId> {
        self.envelope.sender()
    }

    /// Borrows the payload as `T`, if that is its concrete type.
    #[must_use]
    pub fn payload_ref<T: Any>(&self) -> Option<&'a T> {
        self.envelope.payload_ref::<T>()
    }
}
