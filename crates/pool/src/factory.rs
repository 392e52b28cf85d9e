//! Resource factory: create / validate / destroy.
//!
//! [`Factory`] is the strategy the pool engine drives. [`PageFactory`] is the
//! standard implementation: it mints resources from a [`Source`] and runs the
//! session's [`Hooks`] around each operation, isolating every failure.

use async_trait::async_trait;

use crate::events::{DestroyReason, PoolEvent};
use crate::hooks::{HookContext, HookKind, HookOutcome, Hooks};
use crate::resource::{Resource, Source};

/// Lifecycle strategy invoked by [`Pool`](crate::Pool).
///
/// None of the operations return errors: failures are reported by the
/// factory itself and folded into the return value, so the pool never has
/// to unwind half-finished lifecycle steps.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// The resource type this factory manages.
    type Resource: Resource;

    /// Mint a resource. `None` means nothing was produced.
    async fn create(&self) -> Option<Self::Resource>;

    /// Tear a resource down. Does nothing for `None`.
    async fn destroy(&self, resource: Option<Self::Resource>, reason: DestroyReason);

    /// Whether a resource may be handed out. `None` is never eligible.
    async fn validate(&self, resource: Option<&Self::Resource>) -> bool;
}

/// Factory bound to a session's source and hooks.
pub struct PageFactory<S: Source> {
    ctx: HookContext<S>,
    hooks: Hooks<S>,
}

impl<S: Source> PageFactory<S> {
    /// Create a factory minting from the source in `ctx`.
    pub fn new(ctx: HookContext<S>, hooks: Hooks<S>) -> Self {
        Self { ctx, hooks }
    }

    /// The context passed to every hook.
    #[must_use]
    pub fn context(&self) -> &HookContext<S> {
        &self.ctx
    }
}

impl<S: Source> std::fmt::Debug for PageFactory<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFactory")
            .field("ctx", &self.ctx)
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[async_trait]
impl<S: Source> Factory for PageFactory<S> {
    type Resource = S::Resource;

    async fn create(&self) -> Option<S::Resource> {
        let resource = match self.ctx.source().create_resource().await {
            Ok(resource) => resource,
            Err(err) => {
                tracing::warn!(error = %err, "resource source failed to create a resource");
                self.ctx.emit(PoolEvent::CreateFailed {
                    error: err.to_string(),
                });
                return None;
            }
        };

        // A failed on_create hook leaves the resource usable.
        let _ = self.hooks.run(HookKind::Create, &self.ctx, &resource).await;

        tracing::debug!(resource_id = resource.id(), "resource created");
        self.ctx.emit(PoolEvent::ResourceCreated {
            resource_id: resource.id().to_string(),
        });
        Some(resource)
    }

    async fn destroy(&self, resource: Option<S::Resource>, reason: DestroyReason) {
        let Some(resource) = resource else {
            return;
        };

        let _ = self.hooks.run(HookKind::Destroy, &self.ctx, &resource).await;

        if resource.is_open() {
            if let Err(err) = resource.close().await {
                tracing::warn!(resource_id = resource.id(), error = %err, "resource close failed");
                self.ctx.emit(PoolEvent::CloseFailed {
                    resource_id: resource.id().to_string(),
                    error: err.to_string(),
                });
            }
        }

        tracing::debug!(resource_id = resource.id(), %reason, "resource destroyed");
        self.ctx.emit(PoolEvent::ResourceDestroyed {
            resource_id: resource.id().to_string(),
            reason,
        });
    }

    async fn validate(&self, resource: Option<&S::Resource>) -> bool {
        let Some(resource) = resource else {
            return false;
        };

        match self.hooks.validate(&self.ctx, resource).await {
            HookOutcome::Absent => true,
            HookOutcome::Completed(eligible) => eligible,
            HookOutcome::Failed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use super::*;
    use crate::testing::{MemoryBrowser, MemorySource, RecordingSink};

    fn factory(
        browser: &MemoryBrowser,
        hooks: Hooks<MemorySource>,
    ) -> (PageFactory<MemorySource>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let ctx = HookContext::new(Uuid::new_v4(), Arc::new(browser.start()), sink.clone());
        (PageFactory::new(ctx, hooks), sink)
    }

    #[tokio::test]
    async fn create_returns_resource_and_reports_it() {
        let browser = MemoryBrowser::new();
        let (factory, sink) = factory(&browser, Hooks::new());

        let page = factory.create().await.expect("page should be created");
        assert!(page.is_open());
        assert_eq!(browser.open_pages(), 1);
        assert_eq!(sink.count("resource-created"), 1);
    }

    #[tokio::test]
    async fn create_survives_failing_hook() {
        let browser = MemoryBrowser::new();
        let hooks = Hooks::<MemorySource>::new()
            .on_create(|_ctx, _page| Box::pin(async { anyhow::bail!("could not set viewport") }));
        let (factory, sink) = factory(&browser, hooks);

        let page = factory.create().await;
        assert!(page.is_some(), "hook failure must not invalidate the resource");
        assert_eq!(sink.count("hook-failed"), 1);
        assert_eq!(sink.count("resource-created"), 1);
    }

    #[tokio::test]
    async fn create_failure_yields_none() {
        let browser = MemoryBrowser::new();
        browser.fail_next_creates(1);
        let (factory, sink) = factory(&browser, Hooks::new());

        assert!(factory.create().await.is_none());
        assert_eq!(sink.count("create-failed"), 1);
        assert!(factory.create().await.is_some(), "next attempt succeeds");
    }

    #[tokio::test]
    async fn destroy_absent_is_noop() {
        let browser = MemoryBrowser::new();
        let (factory, sink) = factory(&browser, Hooks::new());

        factory.destroy(None, DestroyReason::Shutdown).await;
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn destroy_runs_hook_then_closes() {
        let browser = MemoryBrowser::new();
        let seen_open = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&seen_open);
        let hooks = Hooks::<MemorySource>::new().on_destroy(move |_ctx, page| {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                if page.is_open() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
        });
        let (factory, sink) = factory(&browser, hooks);

        let page = factory.create().await;
        factory.destroy(page, DestroyReason::Shutdown).await;

        assert_eq!(seen_open.load(Ordering::SeqCst), 1, "hook runs before close");
        assert_eq!(browser.open_pages(), 0);
        assert_eq!(sink.count("resource-destroyed"), 1);
    }

    #[tokio::test]
    async fn destroy_reports_destroyed_despite_hook_failure() {
        let browser = MemoryBrowser::new();
        let hooks = Hooks::<MemorySource>::new()
            .on_destroy(|_ctx, _page| Box::pin(async { anyhow::bail!("cleanup script failed") }));
        let (factory, sink) = factory(&browser, hooks);

        let page = factory.create().await;
        factory.destroy(page, DestroyReason::Invalid).await;

        assert_eq!(browser.open_pages(), 0, "page is closed anyway");
        assert_eq!(sink.count("hook-failed"), 1);
        assert_eq!(sink.count("resource-destroyed"), 1);
    }

    #[tokio::test]
    async fn destroy_skips_close_for_closed_resource() {
        let browser = MemoryBrowser::new();
        let (factory, sink) = factory(&browser, Hooks::new());

        let page = factory.create().await.expect("page");
        page.crash();
        factory.destroy(Some(page), DestroyReason::Closed).await;

        assert_eq!(browser.close_calls(), 0);
        assert_eq!(sink.count("resource-destroyed"), 1);
    }

    #[tokio::test]
    async fn destroy_reports_destroyed_when_close_fails() {
        let browser = MemoryBrowser::new();
        let (factory, sink) = factory(&browser, Hooks::new());

        let page = factory.create().await.expect("page");
        browser.fail_close(true);
        factory.destroy(Some(page), DestroyReason::Shutdown).await;

        assert_eq!(sink.count("close-failed"), 1);
        assert_eq!(sink.count("resource-destroyed"), 1);
        assert_eq!(browser.close_calls(), 0);
    }

    #[tokio::test]
    async fn validate_defaults() {
        let browser = MemoryBrowser::new();
        let (factory, _sink) = factory(&browser, Hooks::new());

        assert!(!factory.validate(None).await, "absent is ineligible");
        let page = factory.create().await.expect("page");
        assert!(factory.validate(Some(&page)).await, "no hook is fail-open");
    }

    #[tokio::test]
    async fn validate_hook_is_authoritative() {
        let browser = MemoryBrowser::new();
        let hooks = Hooks::<MemorySource>::new().on_validate(|_ctx, _page| Box::pin(async { Ok(false) }));
        let (factory, sink) = factory(&browser, hooks);

        let page = factory.create().await.expect("page");
        assert!(!factory.validate(Some(&page)).await);
        assert!(sink.count("hook-failed") == 0);
    }

    #[tokio::test]
    async fn validate_hook_failure_is_fail_closed() {
        let browser = MemoryBrowser::new();
        let hooks = Hooks::<MemorySource>::new()
            .on_validate(|_ctx, _page| Box::pin(async { anyhow::bail!("health check timed out") }));
        let (factory, sink) = factory(&browser, hooks);

        let page = factory.create().await.expect("page");
        assert!(!factory.validate(Some(&page)).await);
        assert_eq!(sink.count("hook-failed"), 1);
    }
}
