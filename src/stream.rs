//! Pull-based notice streams.
//!
//! A [`NoticeStream`] adapts a subscription into a bounded channel so a
//! consumer can poll for notices instead of handling them inside the
//! dispatch critical section. Delivery never blocks the dispatcher: when
//! the consumer falls behind, notices are dropped and counted.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, NoticeResult, RegistryError};
use crate::registry::NoticeKind;
use crate::sender::SenderId;
use crate::subscription::{RevocationKey, SubscriptionTable};

/// A notice as delivered through a [`NoticeStream`]: the payload is cloned
/// out of the envelope so it outlives the dispatch call.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedNotice<T> {
    /// The notice's actual (most-derived) kind.
    pub kind: NoticeKind,
    pub sender: Option<SenderId>,
    pub emitted_at: DateTime<Utc>,
    pub payload: T,
}

/// A subscription delivering matching notices to a bounded channel.
///
/// Opened against a subscribed kind; matches that kind and all its
/// descendants, provided the payload's concrete type is `T`. Dropping the
/// stream attempts best-effort revocation of the backing subscription.
#[derive(Debug)]
pub struct NoticeStream<T> {
    key: RevocationKey,
    rx: Receiver<StreamedNotice<T>>,
    table: Arc<SubscriptionTable>,
    dropped: Arc<AtomicU64>,
    unregistered: AtomicBool,
}

impl<T> NoticeStream<T>
where
    T: Any + Clone + Send + Sync,
{
    /// Opens a stream over `kind` (and descendants) on the given
    /// dispatcher, buffering up to `capacity` undelivered notices.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] if `kind` was not minted by
    /// the dispatcher's registry.
    pub fn open(dispatcher: &Dispatcher, kind: NoticeKind, capacity: usize) -> NoticeResult<Self> {
        let registry = dispatcher.registry();
        if registry.name_of(kind).is_none() {
            return Err(RegistryError::UnknownKind { kind }.into());
        }

        let (tx, rx) = bounded::<StreamedNotice<T>>(capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let table = dispatcher.subscriptions();

        let dropped_cb = Arc::clone(&dropped);
        let key = table.register(kind, move |env| {
            if let Some(payload) = env.payload_ref::<T>() {
                let notice = StreamedNotice {
                    kind: env.kind(),
                    sender: env.sender(),
                    emitted_at: env.emitted_at(),
                    payload: payload.clone(),
                };
                // Never block dispatch: drop if the consumer is slow.
                match tx.try_send(notice) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                        dropped_cb.fetch_add(1, Ordering::Relaxed);
                    }
                }
            } else {
                // Matching kind but a different concrete payload type.
                dropped_cb.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        });

        Ok(Self {
            key,
            rx,
            table,
            dropped,
            unregistered: AtomicBool::new(false),
        })
    }

    /// The revocation key of the backing subscription.
    #[must_use]
    pub const fn revocation_key(&self) -> RevocationKey {
        self.key
    }

    /// Number of notices dropped due to a full buffer or a payload type
    /// other than `T`.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Explicitly revokes the backing subscription.
    ///
    /// Idempotent and non-blocking. Once the buffer drains, receive calls
    /// report the stream as disconnected.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        self.table.revoke(self.key);
    }

    /// Receives the next notice (blocking).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] once the stream is
    /// unsubscribed and drained.
    pub fn recv(&self) -> NoticeResult<StreamedNotice<T>> {
        self.rx.recv().map_err(|_| {
            DispatchError::Disconnected {
                path: "notice_stream".to_string(),
            }
            .into()
        })
    }

    /// Receives the next notice, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Timeout`] if nothing arrives in time and
    /// [`DispatchError::Disconnected`] once the stream is unsubscribed and
    /// drained.
    pub fn recv_timeout(&self, timeout: Duration) -> NoticeResult<StreamedNotice<T>> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => DispatchError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }
            .into(),
            RecvTimeoutError::Disconnected => DispatchError::Disconnected {
                path: "notice_stream".to_string(),
            }
            .into(),
        })
    }

    /// Receives the next notice if one is already buffered.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Disconnected`] once the stream is
    /// unsubscribed and drained.
    pub fn try_recv(&self) -> NoticeResult<Option<StreamedNotice<T>>> {
        match self.rx.try_recv() {
            Ok(notice) => Ok(Some(notice)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(DispatchError::Disconnected {
                path: "notice_stream".to_string(),
            }
            .into()),
        }
    }
}

impl<T> Drop for NoticeStream<T> {
    fn drop(&mut self) {
        // Best-effort: do not block on shutdown.
        if !self.unregistered.swap(true, Ordering::AcqRel) {
            self.table.revoke(self.key);
        }
    }
}
