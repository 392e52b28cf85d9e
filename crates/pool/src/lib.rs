//! # pagepool
//!
//! Bounded async pool for expensive page handles.
//!
//! A [`Session`] launches one resource source (a browser) and runs a
//! [`Pool`] of resources (pages) minted from it. Callers borrow through
//! [`Session::process`], which acquires a page, runs a handler on it and
//! always releases it again. Lifecycle hooks customise creation, validation
//! and teardown; every failure is turned into a [`PoolEvent`] on the
//! session's [`EventSink`] instead of escaping to the caller.
//!
//! The lower-level [`Pool`] and [`Factory`] types are usable on their own
//! for any resource implementing [`Resource`].

pub mod error;
pub mod events;
pub mod factory;
pub mod guard;
pub mod hooks;
pub mod pool;
pub mod resource;
pub mod session;
pub mod testing;

pub use error::{Error, Result};
pub use events::{DestroyReason, EventBus, EventSink, Fanout, PoolEvent, SharedSink, TracingSink};
pub use factory::{Factory, PageFactory};
pub use guard::Pooled;
pub use hooks::{HookContext, HookFuture, HookKind, HookOutcome, Hooks};
pub use pool::{Maintenance, Pool, PoolConfig, PoolStats};
pub use resource::{Launcher, Resource, ResourceOf, Source};
pub use session::{DEFAULT_ARGS, LaunchOptions, Session, SessionConfig, SessionPool};
