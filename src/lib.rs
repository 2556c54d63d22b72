//! # noticebus - Embedded Typed Notice Dispatch
//!
//! noticebus is an in-process publish/subscribe engine for typed notices.
//! Notice kinds form a single-rooted hierarchy; observers subscribe to a
//! kind (matching it and all descendants), optionally scoped to one
//! sending object, and receive notifications synchronously in a strict,
//! globally serialized order.
//!
//! ## Core Concepts
//!
//! - **Notice kind**: a node in the kind hierarchy, declared in a [`KindRegistry`]
//! - **Envelope**: one emitted notice — kind, opaque payload, optional sender
//! - **Subscription**: a registered callback awaiting matching notices
//! - **Caster**: a call-scoped capability for safe downcast attempts
//! - **Revocation key**: an opaque, serializable handle that cancels a subscription
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use noticebus::{Dispatcher, KindRegistry, NoticeEnvelope, NoticeKind, SenderId};
//!
//! let registry = Arc::new(KindRegistry::new());
//! let stage = registry.declare("stage_notice", NoticeKind::ROOT)?;
//! let changed = registry.declare("stage_contents_changed", stage)?;
//!
//! let dispatcher = Dispatcher::new(Arc::clone(&registry));
//! let subscriptions = dispatcher.subscriptions();
//!
//! // Fires for `stage` and every descendant kind.
//! let key = subscriptions.register(stage, |env| {
//!     println!("stage notice: {:?}", env.kind());
//!     Ok(())
//! });
//!
//! let sender = SenderId::new();
//! dispatcher.notify(NoticeEnvelope::new(changed, "payload").with_sender(sender))?;
//!
//! subscriptions.revoke(key);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod caster;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod sender;
pub mod stream;
pub mod subscription;

// Re-export primary types at crate root for convenience
pub use caster::{Caster, NoticeView};
pub use dispatcher::Dispatcher;
pub use envelope::NoticeEnvelope;
pub use error::{DispatchError, NoticeError, NoticeResult, RegistryError};
pub use registry::{KindDecl, KindRegistry, NoticeKind};
pub use sender::SenderId;
pub use stream::{NoticeStream, StreamedNotice};
pub use subscription::{KeySet, RevocationKey, SubscriptionTable};
