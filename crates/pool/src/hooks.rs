//! Optional user callbacks attached to the factory.
//!
//! Three slots exist: `on_create`, `on_destroy` and `on_validate`. Every slot
//! is optional and every invocation goes through [`Hooks::invoke`], which
//! runs the hook if present and converts errors and panics into a
//! [`PoolEvent::HookFailed`] diagnostic. A hook can therefore never abort the
//! operation it is attached to.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::events::{PoolEvent, SharedSink};
use crate::resource::{Resource, Source};

/// Future returned by a hook.
pub type HookFuture<'a, T> = BoxFuture<'a, anyhow::Result<T>>;

type HookFn<S, T> = Arc<
    dyn for<'a> Fn(&'a HookContext<S>, &'a <S as Source>::Resource) -> HookFuture<'a, T>
        + Send
        + Sync,
>;

// ---------------------------------------------------------------------------
// HookKind
// ---------------------------------------------------------------------------

/// Identifies a hook slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs after a resource was minted.
    Create,
    /// Runs before a resource is closed.
    Destroy,
    /// Decides whether an idle resource may be handed out.
    Validate,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "on_create"),
            Self::Destroy => write!(f, "on_destroy"),
            Self::Validate => write!(f, "on_validate"),
        }
    }
}

// ---------------------------------------------------------------------------
// HookContext
// ---------------------------------------------------------------------------

/// Session state handed to every hook.
///
/// Hooks get the source the resource came from, the session's diagnostics
/// sink and the session id, so they can act on sibling state without any
/// implicit receiver.
pub struct HookContext<S: Source> {
    session_id: Uuid,
    source: Arc<S>,
    events: SharedSink,
}

impl<S: Source> HookContext<S> {
    /// Create a context bound to `source`.
    pub fn new(session_id: Uuid, source: Arc<S>, events: SharedSink) -> Self {
        Self {
            session_id,
            source,
            events,
        }
    }

    /// Identifier of the owning session.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The resource source of the owning session.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Emit a diagnostic through the session's sink.
    pub fn emit(&self, event: PoolEvent) {
        self.events.emit(event);
    }
}

impl<S: Source> Clone for HookContext<S> {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id,
            source: Arc::clone(&self.source),
            events: Arc::clone(&self.events),
        }
    }
}

impl<S: Source> fmt::Debug for HookContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("session_id", &self.session_id)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// HookOutcome
// ---------------------------------------------------------------------------

/// What happened when a hook slot was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome<T> {
    /// The slot is empty.
    Absent,
    /// The hook ran and returned a value.
    Completed(T),
    /// The hook returned an error or panicked. Already reported.
    Failed,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// The set of optional factory hooks.
///
/// ```ignore
/// let hooks = Hooks::new()
///     .on_create(|_ctx, page| Box::pin(async move {
///         page.set_viewport(1280, 720).await?;
///         Ok(())
///     }))
///     .on_validate(|_ctx, page| Box::pin(async move { Ok(page.is_open()) }));
/// ```
pub struct Hooks<S: Source> {
    on_create: Option<HookFn<S, ()>>,
    on_destroy: Option<HookFn<S, ()>>,
    on_validate: Option<HookFn<S, bool>>,
}

impl<S: Source> Hooks<S> {
    /// No hooks configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_create: None,
            on_destroy: None,
            on_validate: None,
        }
    }

    /// Run `hook` after every successful mint.
    pub fn on_create<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a HookContext<S>, &'a S::Resource) -> HookFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.on_create = Some(Arc::new(hook));
        self
    }

    /// Run `hook` before a resource is closed.
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a HookContext<S>, &'a S::Resource) -> HookFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.on_destroy = Some(Arc::new(hook));
        self
    }

    /// Let `hook` decide whether an idle resource may be reused.
    pub fn on_validate<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a HookContext<S>, &'a S::Resource) -> HookFuture<'a, bool>
            + Send
            + Sync
            + 'static,
    {
        self.on_validate = Some(Arc::new(hook));
        self
    }

    /// Whether the given slot is filled.
    #[must_use]
    pub fn has(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Create => self.on_create.is_some(),
            HookKind::Destroy => self.on_destroy.is_some(),
            HookKind::Validate => self.on_validate.is_some(),
        }
    }

    /// Run the create or destroy hook, if configured.
    pub async fn run(
        &self,
        kind: HookKind,
        ctx: &HookContext<S>,
        resource: &S::Resource,
    ) -> HookOutcome<()> {
        let slot = match kind {
            HookKind::Create => self.on_create.as_ref(),
            HookKind::Destroy => self.on_destroy.as_ref(),
            HookKind::Validate => {
                return match self.validate(ctx, resource).await {
                    HookOutcome::Absent => HookOutcome::Absent,
                    HookOutcome::Completed(_) => HookOutcome::Completed(()),
                    HookOutcome::Failed => HookOutcome::Failed,
                };
            }
        };
        Self::invoke(slot, kind, ctx, resource).await
    }

    /// Run the validate hook, if configured.
    pub async fn validate(
        &self,
        ctx: &HookContext<S>,
        resource: &S::Resource,
    ) -> HookOutcome<bool> {
        Self::invoke(self.on_validate.as_ref(), HookKind::Validate, ctx, resource).await
    }

    /// Call-if-present, catch-and-report.
    async fn invoke<T>(
        slot: Option<&HookFn<S, T>>,
        kind: HookKind,
        ctx: &HookContext<S>,
        resource: &S::Resource,
    ) -> HookOutcome<T> {
        let Some(hook) = slot else {
            return HookOutcome::Absent;
        };

        let error = match AssertUnwindSafe(hook(ctx, resource)).catch_unwind().await {
            Ok(Ok(value)) => return HookOutcome::Completed(value),
            Ok(Err(err)) => format!("{err:#}"),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };

        tracing::warn!(hook = %kind, resource_id = resource.id(), %error, "hook failed");
        ctx.emit(PoolEvent::HookFailed {
            hook: kind,
            resource_id: resource.id().to_string(),
            error,
        });
        HookOutcome::Failed
    }
}

impl<S: Source> Default for Hooks<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Source> Clone for Hooks<S> {
    fn clone(&self) -> Self {
        Self {
            on_create: self.on_create.clone(),
            on_destroy: self.on_destroy.clone(),
            on_validate: self.on_validate.clone(),
        }
    }
}

impl<S: Source> fmt::Debug for Hooks<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_create", &self.on_create.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .field("on_validate", &self.on_validate.is_some())
            .finish()
    }
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
