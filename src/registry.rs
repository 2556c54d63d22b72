//! Notice kind hierarchy registry.
//!
//! Kinds form a single-rooted tree: every kind except [`NoticeKind::ROOT`]
//! has exactly one parent. Declarations are process-wide and permanent;
//! there is no removal operation, mirroring static type declarations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{NoticeResult, RegistryError};

/// Identifier for a notice kind.
///
/// A `NoticeKind` is an index into the [`KindRegistry`] that minted it and
/// is only meaningful together with that registry. Kinds are cheap to copy
/// and compare; hierarchy queries go through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoticeKind(u32);

impl NoticeKind {
    /// The implicit root of the hierarchy, pre-declared as `"notice"`.
    pub const ROOT: Self = Self(0);

    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Declarative form of a kind registration.
///
/// Serializable so a host can load a whole notice hierarchy from a JSON
/// document instead of issuing individual `declare` calls. Parents are
/// referenced by name; the root is `"notice"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindDecl {
    /// Name of the new kind.
    pub name: String,
    /// Name of the parent kind, which must already be declared (or appear
    /// earlier in the same batch).
    pub parent: String,
}

#[derive(Debug)]
struct KindEntry {
    name: Arc<str>,
    parent: Option<NoticeKind>,
}

#[derive(Debug)]
struct RegistryInner {
    entries: Vec<KindEntry>,
    by_name: HashMap<Arc<str>, NoticeKind>,
}

/// The notice kind hierarchy: a parent-pointer table with ancestor queries.
///
/// Thread-safe via an internal [`RwLock`]; hierarchy walks take a read lock
/// and can proceed concurrently with each other. Declarations take a write
/// lock but are rare startup-time operations.
///
/// # Panics
///
/// All methods on this type panic if the internal `RwLock` has been
/// poisoned (i.e., a thread panicked while holding the lock). This should
/// not occur under normal operation.
#[derive(Debug)]
pub struct KindRegistry {
    inner: RwLock<RegistryInner>,
}

#[allow(clippy::missing_panics_doc)] // All methods panic only on poisoned RwLock
impl KindRegistry {
    /// Creates a registry holding only the root kind.
    #[must_use]
    pub fn new() -> Self {
        let root: Arc<str> = Arc::from("notice");
        let mut by_name = HashMap::new();
        by_name.insert(Arc::clone(&root), NoticeKind::ROOT);

        Self {
            inner: RwLock::new(RegistryInner {
                entries: vec![KindEntry {
                    name: root,
                    parent: None,
                }],
                by_name,
            }),
        }
    }

    /// Declares a new kind under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownParentKind`] if `parent` was not
    /// minted by this registry and [`RegistryError::DuplicateKind`] if
    /// `name` is already declared. A failed declaration leaves the registry
    /// unchanged.
    pub fn declare(&self, name: &str, parent: NoticeKind) -> NoticeResult<NoticeKind> {
        let mut inner = self.inner.write().unwrap();

        if parent.index() >= inner.entries.len() {
            return Err(RegistryError::UnknownParentKind {
                name: name.to_string(),
                parent,
            }
            .into());
        }
        if inner.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateKind {
                name: name.to_string(),
            }
            .into());
        }

        // Children always carry a higher index than their parent, so every
        // parent walk terminates without cycle checks.
        let kind = NoticeKind(u32::try_from(inner.entries.len()).map_err(|_| {
            crate::error::NoticeError::internal("kind registry exhausted u32 index space")
        })?);
        let interned: Arc<str> = Arc::from(name);
        inner.entries.push(KindEntry {
            name: Arc::clone(&interned),
            parent: Some(parent),
        });
        inner.by_name.insert(interned, kind);

        Ok(kind)
    }

    /// Declares a batch of kinds in order, resolving parents by name.
    ///
    /// Later declarations in the batch may reference earlier ones.
    ///
    /// # Errors
    ///
    /// Returns the first declaration error; declarations preceding the
    /// failed one remain in effect.
    pub fn declare_all(&self, decls: &[KindDecl]) -> NoticeResult<Vec<NoticeKind>> {
        let mut kinds = Vec::with_capacity(decls.len());
        for decl in decls {
            let parent =
                self.resolve(&decl.parent)
                    .ok_or_else(|| RegistryError::UnknownParentName {
                        name: decl.name.clone(),
                        parent: decl.parent.clone(),
                    })?;
            kinds.push(self.declare(&decl.name, parent)?);
        }
        Ok(kinds)
    }

    /// Declares kinds from a JSON array of [`KindDecl`] objects.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDeclaration`] if the document does
    /// not parse, otherwise as [`declare_all`](Self::declare_all).
    pub fn declare_from_json(&self, json: &str) -> NoticeResult<Vec<NoticeKind>> {
        let decls: Vec<KindDecl> =
            serde_json::from_str(json).map_err(|e| RegistryError::InvalidDeclaration {
                reason: e.to_string(),
            })?;
        self.declare_all(&decls)
    }

    /// Looks up a kind by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<NoticeKind> {
        self.inner.read().unwrap().by_name.get(name).copied()
    }

    /// Returns the name of a kind, if it belongs to this registry.
    #[must_use]
    pub fn name_of(&self, kind: NoticeKind) -> Option<Arc<str>> {
        self.inner
            .read()
            .unwrap()
            .entries
            .get(kind.index())
            .map(|e| Arc::clone(&e.name))
    }

    /// Returns the parent of a kind. `None` for the root or foreign kinds.
    #[must_use]
    pub fn parent_of(&self, kind: NoticeKind) -> Option<NoticeKind> {
        self.inner
            .read()
            .unwrap()
            .entries
            .get(kind.index())
            .and_then(|e| e.parent)
    }

    /// Returns the ancestor chain of `kind`, ordered from the kind itself
    /// up to the root.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] if `kind` was not minted by
    /// this registry.
    pub fn ancestor_chain(&self, kind: NoticeKind) -> NoticeResult<Vec<NoticeKind>> {
        let inner = self.inner.read().unwrap();
        if kind.index() >= inner.entries.len() {
            return Err(RegistryError::UnknownKind { kind }.into());
        }

        let mut chain = Vec::with_capacity(4);
        let mut current = Some(kind);
        while let Some(k) = current {
            chain.push(k);
            current = inner.entries[k.index()].parent;
        }
        Ok(chain)
    }

    /// Returns true if `candidate` is `of` itself or one of its ancestors.
    ///
    /// Foreign kinds are never related to anything.
    #[must_use]
    pub fn is_ancestor_or_self(&self, candidate: NoticeKind, of: NoticeKind) -> bool {
        let inner = self.inner.read().unwrap();
        if candidate.index() >= inner.entries.len() || of.index() >= inner.entries.len() {
            return false;
        }

        let mut current = Some(of);
        while let Some(k) = current {
            if k == candidate {
                return true;
            }
            current = inner.entries[k.index()].parent;
        }
        false
    }

    /// Number of declared kinds, including the root.
    #[must_use]
    pub fn kind_count(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}
