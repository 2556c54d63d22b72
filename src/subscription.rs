//! Subscription table and revocation keys.
//!
//! The table is the only mutable shared state in the engine. It holds two
//! indices: one keyed by notice kind (global subscriptions) and one keyed
//! by (kind, sender) pair (scoped subscriptions). Registration order is
//! preserved per bucket so dispatch is deterministic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::caster::Caster;
use crate::envelope::NoticeEnvelope;
use crate::error::NoticeResult;
use crate::registry::NoticeKind;
use crate::sender::SenderId;

/// Opaque handle identifying one live subscription.
///
/// Keys have value semantics: copyable, comparable, and serializable, so a
/// key produced in one calling context (or serialized across a runtime
/// boundary) still identifies the same subscription slot when handed to a
/// revoke call elsewhere. A key identifies at most one live subscription;
/// once revoked it never becomes live again.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevocationKey(Uuid);

impl RevocationKey {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// An ordered collection of revocation keys with bulk-revoke semantics.
///
/// Bulk revocation revokes every contained key and empties the set; keys
/// that are already revoked are skipped. Revoking an empty set is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySet {
    keys: Vec<RevocationKey>,
}

impl KeySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key. Duplicates are ignored.
    pub fn insert(&mut self, key: RevocationKey) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    /// Returns true if `key` is in the set.
    #[must_use]
    pub fn contains(&self, key: RevocationKey) -> bool {
        self.keys.contains(&key)
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = RevocationKey> + '_ {
        self.keys.iter().copied()
    }

    /// Removes all keys without revoking anything.
    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

impl FromIterator<RevocationKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = RevocationKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

/// Canonical internal callback shape. The public registration signatures
/// all adapt into this.
type BoxedCallback =
    Box<dyn for<'a> Fn(&'a NoticeEnvelope, &'a Caster<'a>) -> NoticeResult<()> + Send + Sync>;

#[derive(Debug, Default)]
struct ExecState {
    running_on: Mutex<Option<ThreadId>>,
    done: Condvar,
}

/// One registered subscription. Owned by the table from registration until
/// revocation; dispatch snapshots hold it briefly via `Arc`.
pub(crate) struct SubscriptionEntry {
    key: RevocationKey,
    kind: NoticeKind,
    sender: Option<SenderId>,
    callback: BoxedCallback,
    revoked: AtomicBool,
    exec: ExecState,
}

#[allow(clippy::missing_panics_doc)] // panics only on poisoned locks
impl SubscriptionEntry {
    pub(crate) fn key(&self) -> RevocationKey {
        self.key
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub(crate) fn invoke(&self, envelope: &NoticeEnvelope, caster: &Caster<'_>) -> NoticeResult<()> {
        (self.callback)(envelope, caster)
    }

    /// Marks this entry as executing on the current thread. The returned
    /// guard clears the mark and wakes `revoke_and_wait` callers when
    /// dropped, including on unwind.
    pub(crate) fn begin_execution(&self) -> ExecutionGuard<'_> {
        *self.exec.running_on.lock().unwrap() = Some(thread::current().id());
        ExecutionGuard { entry: self }
    }

    /// Blocks until no callback invocation of this entry is executing on
    /// another thread. Returns immediately when called from within the
    /// entry's own callback, so self-revocation cannot deadlock.
    fn await_idle(&self) {
        let current = thread::current().id();
        let mut running = self.exec.running_on.lock().unwrap();
        while let Some(tid) = *running {
            if tid == current {
                break;
            }
            running = self.exec.done.wait(running).unwrap();
        }
    }
}

pub(crate) struct ExecutionGuard<'a> {
    entry: &'a SubscriptionEntry,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        *self.entry.exec.running_on.lock().unwrap() = None;
        self.entry.exec.done.notify_all();
    }
}

#[derive(Default)]
struct TableInner {
    entries: HashMap<RevocationKey, Arc<SubscriptionEntry>>,
    global_index: HashMap<NoticeKind, Vec<RevocationKey>>,
    scoped_index: HashMap<(NoticeKind, SenderId), Vec<RevocationKey>>,
}

/// The central subscription registry.
///
/// Two indices provide the dispatcher's lookups:
/// - `global_index`: by subscribed kind — matches any sender,
/// - `scoped_index`: by (kind, sender) pair — matches one sender only.
///
/// Registration and revocation are safe to call concurrently with an
/// in-progress dispatch and from inside callbacks: the table's lock is
/// never held while a callback runs.
///
/// # Panics
///
/// All methods on this type panic if an internal lock has been poisoned
/// (i.e., a thread panicked while holding the lock). This should not occur
/// under normal operation.
pub struct SubscriptionTable {
    inner: RwLock<TableInner>,
}

#[allow(clippy::missing_panics_doc)] // All methods panic only on poisoned locks
impl SubscriptionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TableInner::default()),
        }
    }

    fn insert(
        &self,
        kind: NoticeKind,
        sender: Option<SenderId>,
        callback: BoxedCallback,
    ) -> RevocationKey {
        let key = RevocationKey::new();
        let entry = Arc::new(SubscriptionEntry {
            key,
            kind,
            sender,
            callback,
            revoked: AtomicBool::new(false),
            exec: ExecState::default(),
        });

        let mut inner = self.inner.write().unwrap();
        inner.entries.insert(key, entry);
        match sender {
            None => inner.global_index.entry(kind).or_default().push(key),
            Some(s) => inner.scoped_index.entry((kind, s)).or_default().push(key),
        }
        key
    }

    /// Registers a global subscription on `kind` and its descendants.
    pub fn register<F>(&self, kind: NoticeKind, callback: F) -> RevocationKey
    where
        F: Fn(&NoticeEnvelope) -> NoticeResult<()> + Send + Sync + 'static,
    {
        self.insert(kind, None, Box::new(move |env, _| callback(env)))
    }

    /// Registers a global subscription whose callback also receives the
    /// envelope's sender identity.
    pub fn register_with_sender<F>(&self, kind: NoticeKind, callback: F) -> RevocationKey
    where
        F: Fn(&NoticeEnvelope, Option<SenderId>) -> NoticeResult<()> + Send + Sync + 'static,
    {
        self.insert(
            kind,
            None,
            Box::new(move |env, _| callback(env, env.sender())),
        )
    }

    /// Registers a global subscription whose callback receives a
    /// call-scoped [`Caster`].
    pub fn register_with_caster<F>(&self, kind: NoticeKind, callback: F) -> RevocationKey
    where
        F: for<'a> Fn(&'a NoticeEnvelope, &'a Caster<'a>) -> NoticeResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.insert(kind, None, Box::new(callback))
    }

    /// Registers a subscription scoped to one sender.
    ///
    /// The sender does not need to outlive the subscription: once the
    /// producer object is gone, the subscription simply never matches
    /// again.
    pub fn register_scoped<F>(
        &self,
        sender: SenderId,
        kind: NoticeKind,
        callback: F,
    ) -> RevocationKey
    where
        F: Fn(&NoticeEnvelope) -> NoticeResult<()> + Send + Sync + 'static,
    {
        self.insert(kind, Some(sender), Box::new(move |env, _| callback(env)))
    }

    /// Registers a sender-scoped subscription whose callback receives a
    /// call-scoped [`Caster`].
    pub fn register_scoped_with_caster<F>(
        &self,
        sender: SenderId,
        kind: NoticeKind,
        callback: F,
    ) -> RevocationKey
    where
        F: for<'a> Fn(&'a NoticeEnvelope, &'a Caster<'a>) -> NoticeResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.insert(kind, Some(sender), Box::new(callback))
    }

    /// Registers a sender-scoped subscription whose callback receives both
    /// the sender identity and a call-scoped [`Caster`].
    pub fn register_scoped_full<F>(
        &self,
        sender: SenderId,
        kind: NoticeKind,
        callback: F,
    ) -> RevocationKey
    where
        F: for<'a> Fn(&'a NoticeEnvelope, SenderId, &'a Caster<'a>) -> NoticeResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.insert(
            kind,
            Some(sender),
            Box::new(move |env, caster| callback(env, sender, caster)),
        )
    }

    fn remove_entry(&self, key: RevocationKey) -> Option<Arc<SubscriptionEntry>> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.entries.remove(&key)?;
        entry.revoked.store(true, Ordering::Release);

        match entry.sender {
            None => {
                if let Some(keys) = inner.global_index.get_mut(&entry.kind) {
                    keys.retain(|k| *k != key);
                    if keys.is_empty() {
                        inner.global_index.remove(&entry.kind);
                    }
                }
            }
            Some(s) => {
                if let Some(keys) = inner.scoped_index.get_mut(&(entry.kind, s)) {
                    keys.retain(|k| *k != key);
                    if keys.is_empty() {
                        inner.scoped_index.remove(&(entry.kind, s));
                    }
                }
            }
        }
        Some(entry)
    }

    /// Revokes the subscription identified by `key`.
    ///
    /// Returns whether a live subscription was removed. Revoking an
    /// already-revoked or never-registered key is a no-op returning
    /// `false`. Safe to call from inside a callback.
    pub fn revoke(&self, key: RevocationKey) -> bool {
        self.remove_entry(key).is_some()
    }

    /// As [`revoke`](Self::revoke), additionally blocking until any
    /// currently-executing invocation of the subscription's callback on
    /// another thread has returned.
    ///
    /// Calling this from within the very callback being revoked is
    /// permitted and completes without waiting on itself.
    pub fn revoke_and_wait(&self, key: RevocationKey) -> bool {
        match self.remove_entry(key) {
            Some(entry) => {
                entry.await_idle();
                true
            }
            None => false,
        }
    }

    /// Revokes every key in `set`, then empties it.
    ///
    /// Already-revoked keys are skipped. Returns the number of live
    /// subscriptions removed.
    pub fn revoke_set(&self, set: &mut KeySet) -> usize {
        let mut revoked = 0;
        for key in set.keys.drain(..) {
            if self.revoke(key) {
                revoked += 1;
            }
        }
        revoked
    }

    /// As [`revoke_set`](Self::revoke_set), additionally waiting for
    /// in-flight invocations of each revoked subscription.
    ///
    /// All entries are removed from the table before any waiting starts,
    /// so no revoked callback can begin a new invocation while earlier
    /// waits are in progress.
    pub fn revoke_set_and_wait(&self, set: &mut KeySet) -> usize {
        let entries: Vec<_> = set
            .keys
            .drain(..)
            .filter_map(|key| self.remove_entry(key))
            .collect();
        for entry in &entries {
            entry.await_idle();
        }
        entries.len()
    }

    /// Returns true if `key` identifies a live subscription.
    #[must_use]
    pub fn contains(&self, key: RevocationKey) -> bool {
        self.inner.read().unwrap().entries.contains_key(&key)
    }

    /// Total number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    /// Number of live global subscriptions registered for exactly `kind`.
    #[must_use]
    pub fn global_count_for(&self, kind: NoticeKind) -> usize {
        self.inner
            .read()
            .unwrap()
            .global_index
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Number of live subscriptions scoped to exactly `(kind, sender)`.
    #[must_use]
    pub fn scoped_count_for(&self, kind: NoticeKind, sender: SenderId) -> usize {
        self.inner
            .read()
            .unwrap()
            .scoped_index
            .get(&(kind, sender))
            .map_or(0, Vec::len)
    }

    /// Collects the subscriptions matching one dispatch, in invocation
    /// order: per chain level, globals first (registration order), then
    /// subscriptions scoped to the envelope's sender (registration order).
    ///
    /// The snapshot is taken before any callback runs; registrations made
    /// during the dispatch are not part of it.
    pub(crate) fn snapshot(
        &self,
        chain: &[NoticeKind],
        sender: Option<SenderId>,
    ) -> Vec<Arc<SubscriptionEntry>> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for &kind in chain {
            if let Some(keys) = inner.global_index.get(&kind) {
                out.extend(keys.iter().filter_map(|k| inner.entries.get(k)).cloned());
            }
            if let Some(s) = sender {
                if let Some(keys) = inner.scoped_index.get(&(kind, s)) {
                    out.extend(keys.iter().filter_map(|k| inner.entries.get(k)).cloned());
                }
            }
        }
        out
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}
