//! Notice dispatcher.
//!
//! `notify` walks the envelope kind's ancestor chain and invokes every
//! matching subscription synchronously on the calling thread. Callback
//! execution is serialized through a single process-wide critical section:
//! producers may emit from any number of threads, but at most one callback
//! body executes at any instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::caster::Caster;
use crate::envelope::NoticeEnvelope;
use crate::error::NoticeResult;
use crate::registry::KindRegistry;
use crate::subscription::SubscriptionTable;

/// Routes notice envelopes to registered subscriptions.
///
/// The dispatcher owns the [`SubscriptionTable`] consumers register with
/// (see [`subscriptions`](Self::subscriptions)) and consults the
/// [`KindRegistry`] it was built over for hierarchy queries.
///
/// # Panics
///
/// Methods panic if the internal execution lock has been poisoned (a
/// callback panicked mid-dispatch).
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<KindRegistry>,
    table: Arc<SubscriptionTable>,
    exec_lock: Mutex<()>,
    notices_dispatched: AtomicU64,
    callbacks_invoked: AtomicU64,
}

#[allow(clippy::missing_panics_doc)] // panics only on poisoned locks
impl Dispatcher {
    /// Creates a dispatcher over the given kind hierarchy, with an empty
    /// subscription table.
    #[must_use]
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self {
            registry,
            table: Arc::new(SubscriptionTable::new()),
            exec_lock: Mutex::new(()),
            notices_dispatched: AtomicU64::new(0),
            callbacks_invoked: AtomicU64::new(0),
        }
    }

    /// The kind hierarchy this dispatcher routes over.
    #[must_use]
    pub fn registry(&self) -> Arc<KindRegistry> {
        Arc::clone(&self.registry)
    }

    /// The subscription table consumers register with.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionTable> {
        Arc::clone(&self.table)
    }

    /// Dispatches one envelope to every matching subscription.
    ///
    /// Matching subscriptions are found by walking the envelope kind's
    /// ancestor chain from most-derived to root. Per chain level, global
    /// subscriptions run first in registration order, then subscriptions
    /// scoped to the envelope's sender in registration order. Each matching
    /// subscription is invoked at most once per `notify` call.
    ///
    /// The set of matching subscriptions is fixed when the dispatch enters
    /// the critical section: registrations made by a callback do not
    /// receive the in-flight notice but are visible to the next `notify`;
    /// subscriptions revoked by an earlier callback are skipped.
    ///
    /// Blocks until every matching callback has returned. Must not be
    /// called from within a callback: the execution lock is not reentrant
    /// and a nested call deadlocks.
    ///
    /// Returns the number of callbacks invoked.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`](crate::error::RegistryError::UnknownKind)
    /// if the envelope's kind was not minted by this dispatcher's registry.
    /// A callback returning `Err` aborts the remainder of the walk and the
    /// error propagates unchanged; subsequent subscriptions in the chain
    /// are not invoked.
    pub fn notify(&self, envelope: NoticeEnvelope) -> NoticeResult<usize> {
        let chain = self.registry.ancestor_chain(envelope.kind())?;

        let _exec = self.exec_lock.lock().unwrap();
        let snapshot = self.table.snapshot(&chain, envelope.sender());
        let caster = Caster::new(self.registry.as_ref(), &envelope);

        let mut invoked = 0_usize;
        for entry in &snapshot {
            if entry.is_revoked() {
                continue;
            }
            let _running = entry.begin_execution();
            entry.invoke(&envelope, &caster)?;
            invoked += 1;
        }

        self.notices_dispatched.fetch_add(1, Ordering::Relaxed);
        self.callbacks_invoked
            .fetch_add(invoked as u64, Ordering::Relaxed);
        Ok(invoked)
    }

    /// Total envelopes fully dispatched.
    #[must_use]
    pub fn notices_dispatched(&self) -> u64 {
        self.notices_dispatched.load(Ordering::Relaxed)
    }

    /// Total callback invocations across all dispatches.
    #[must_use]
    pub fn callbacks_invoked(&self) -> u64 {
        self.callbacks_invoked.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::error::NoticeError;
    use crate::registry::NoticeKind;
    use crate::sender::SenderId;
    use crate::subscription::RevocationKey;

    struct Fixture {
        dispatcher: Dispatcher,
        stage: NoticeKind,
        contents: NoticeKind,
        objects: NoticeKind,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(KindRegistry::new());
        let stage = registry.declare("stage_notice", NoticeKind::ROOT).unwrap();
        let contents = registry.declare("stage_contents_changed", stage).unwrap();
        let objects = registry.declare("objects_changed", stage).unwrap();
        Fixture {
            dispatcher: Dispatcher::new(registry),
            stage,
            contents,
            objects,
        }
    }

    #[test]
    fn notify_invokes_exact_kind_subscription() {
        let fx = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let table = fx.dispatcher.subscriptions();

        let counter = Arc::clone(&count);
        table.register(fx.contents, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let invoked = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(invoked, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_base_subscription_fires_once_per_derived_emission() {
        let fx = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let table = fx.dispatcher.subscriptions();

        let counter = Arc::clone(&count);
        table.register(fx.stage, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // One derived emission: the ancestor walk visits several levels but
        // the base subscription fires exactly once.
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // A second emission of a sibling kind fires it again.
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.objects, ()))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notify_sibling_subscription_does_not_fire() {
        let fx = fixture();
        let count = Arc::new(AtomicUsize::new(0));
        let table = fx.dispatcher.subscriptions();

        let counter = Arc::clone(&count);
        table.register(fx.objects, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let invoked = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(invoked, 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notify_scoped_subscription_filters_by_sender() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let sender_a = SenderId::new();
        let sender_b = SenderId::new();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        table.register_scoped(sender_a, fx.stage, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Wrong sender, no sender, right sender.
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()).with_sender(sender_b))
            .unwrap();
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()).with_sender(sender_a))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_order_is_level_then_registration() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let sender = SenderId::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let push = |tag: &'static str| {
            let order = Arc::clone(&order);
            move |_: &NoticeEnvelope| {
                order.lock().unwrap().push(tag);
                Ok(())
            }
        };

        // Registered out of order on purpose.
        table.register(fx.stage, push("stage_global"));
        table.register_scoped(sender, fx.contents, push("contents_scoped"));
        table.register(fx.contents, push("contents_global"));
        table.register_scoped(sender, fx.stage, push("stage_scoped"));

        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()).with_sender(sender))
            .unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "contents_global",
                "contents_scoped",
                "stage_global",
                "stage_scoped"
            ]
        );
    }

    #[test]
    fn notify_passes_working_caster() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let saw = Arc::new(AtomicUsize::new(0));

        let saw_clone = Arc::clone(&saw);
        let stage = fx.stage;
        let objects = fx.objects;
        table.register_with_caster(fx.stage, move |env, caster| {
            // Upcast succeeds, sibling cast fails, payload is intact.
            let view = caster.attempt(stage).expect("upcast must succeed");
            assert_eq!(view.actual_kind(), env.kind());
            assert_eq!(view.payload_ref::<String>().map(String::as_str), Some("p"));
            assert!(caster.attempt(objects).is_none());
            saw_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, "p".to_string()))
            .unwrap();
        assert_eq!(saw.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_registration_during_callback_waits_for_next_notice() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let late_count = Arc::new(AtomicUsize::new(0));

        let table_clone = Arc::clone(&table);
        let late_clone = Arc::clone(&late_count);
        let stage = fx.stage;
        table.register(fx.stage, move |_| {
            let late = Arc::clone(&late_clone);
            table_clone.register(stage, move |_| {
                late.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        });

        // First notify: only the outer callback runs; the subscription it
        // registers must not see the in-flight notice.
        let invoked = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(invoked, 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        // Second notify: one late subscription from the first dispatch now
        // fires (and the outer callback registers another).
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_revocation_by_earlier_callback_skips_later_entry() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let second_count = Arc::new(AtomicUsize::new(0));

        // The second subscription's key is revoked by the first callback.
        let second_counter = Arc::clone(&second_count);
        let victim: Arc<Mutex<Option<RevocationKey>>> = Arc::new(Mutex::new(None));

        let table_clone = Arc::clone(&table);
        let victim_clone = Arc::clone(&victim);
        table.register(fx.stage, move |_| {
            if let Some(key) = *victim_clone.lock().unwrap() {
                table_clone.revoke(key);
            }
            Ok(())
        });
        let key = table.register(fx.stage, move |_| {
            second_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        *victim.lock().unwrap() = Some(key);

        let invoked = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.stage, ()))
            .unwrap();
        assert_eq!(invoked, 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 0);
        assert!(!table.contains(key));
    }

    #[test]
    fn notify_callback_error_aborts_rest_of_chain() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        let later_count = Arc::new(AtomicUsize::new(0));

        table.register(fx.contents, |_| Err(NoticeError::internal("boom")));
        let later_counter = Arc::clone(&later_count);
        table.register(fx.stage, move |_| {
            later_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(later_count.load(Ordering::SeqCst), 0);

        // The failed dispatch leaves the engine usable.
        let invoked = fx
            .dispatcher
            .notify(NoticeEnvelope::new(fx.stage, ()))
            .unwrap();
        assert_eq!(invoked, 1);
        assert_eq!(later_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_foreign_kind_is_registry_error() {
        let fx = fixture();
        let foreign = {
            let other = KindRegistry::new();
            other.declare("elsewhere", NoticeKind::ROOT).unwrap()
        };
        let err = fx
            .dispatcher
            .notify(NoticeEnvelope::new(foreign, ()))
            .unwrap_err();
        assert!(err.is_registry());
    }

    #[test]
    fn notify_counters_track_dispatches_and_invocations() {
        let fx = fixture();
        let table = fx.dispatcher.subscriptions();
        table.register(fx.stage, |_| Ok(()));
        table.register(fx.contents, |_| Ok(()));

        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.contents, ()))
            .unwrap();
        fx.dispatcher
            .notify(NoticeEnvelope::new(fx.objects, ()))
            .unwrap();

        assert_eq!(fx.dispatcher.notices_dispatched(), 2);
        assert_eq!(fx.dispatcher.callbacks_invoked(), 3);
    }
}
