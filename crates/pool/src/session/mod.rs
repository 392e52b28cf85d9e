//! Session orchestrator.
//!
//! A [`Session`] owns one resource source and one pool bound to it. It is
//! fail-soft: `process` and `destroy` never return errors. Anything that goes
//! wrong inside them is reported through the session's [`EventSink`] and the
//! call degrades to a no-op.

pub mod config;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{Fanout, PoolEvent, SharedSink, TracingSink};
use crate::factory::PageFactory;
use crate::hooks::{HookContext, Hooks, panic_message};
use crate::pool::{Pool, PoolStats};
use crate::resource::{Launcher, Resource, ResourceOf, Source};

pub use config::{DEFAULT_ARGS, LaunchOptions, SessionConfig};

/// The pool type a session over launcher `L` runs.
pub type SessionPool<L> = Pool<PageFactory<<L as Launcher>::Source>>;

struct Running<S: Source> {
    source: Arc<S>,
    pool: Pool<PageFactory<S>>,
    maintenance: Option<JoinHandle<()>>,
}

/// Launch / process / destroy coordinator.
///
/// ```ignore
/// let session = Session::new(browser, SessionConfig::default())
///     .with_hooks(Hooks::new().on_validate(|_ctx, page| Box::pin(async move { Ok(page.is_open()) })));
/// session.launch().await?;
///
/// let title = session
///     .process(|page, _pool| Box::pin(async move { page.title().await }))
///     .await;
///
/// session.destroy().await;
/// ```
pub struct Session<L: Launcher> {
    id: Uuid,
    launcher: L,
    config: SessionConfig,
    hooks: Hooks<L::Source>,
    events: SharedSink,
    state: RwLock<Option<Running<L::Source>>>,
    /// Serializes `launch` and `destroy`.
    lifecycle: tokio::sync::Mutex<()>,
}

impl<L: Launcher> Session<L> {
    /// Create a session that is not launched yet.
    pub fn new(launcher: L, config: SessionConfig) -> Self {
        let events: SharedSink = Arc::new(TracingSink::new(config.pool.verbose));
        Self {
            id: Uuid::new_v4(),
            launcher,
            config,
            hooks: Hooks::new(),
            events,
            state: RwLock::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Install factory hooks. Takes effect at the next `launch`.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Hooks<L::Source>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Send diagnostics to `sink` in addition to `tracing`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        let logs: SharedSink = Arc::new(TracingSink::new(self.config.pool.verbose));
        self.events = Arc::new(Fanout::new(vec![logs, sink]));
        self
    }

    /// Session identifier, also handed to hooks.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The launcher this session starts its source with.
    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Whether a source and pool currently exist.
    #[must_use]
    pub fn is_launched(&self) -> bool {
        self.state.read().is_some()
    }

    /// Handle to the running pool, if launched.
    #[must_use]
    pub fn pool(&self) -> Option<SessionPool<L>> {
        self.state.read().as_ref().map(|running| running.pool.clone())
    }

    /// Pool statistics, if launched.
    #[must_use]
    pub fn stats(&self) -> Option<PoolStats> {
        self.state.read().as_ref().map(|running| running.pool.stats())
    }

    /// Start the source and build the pool around it.
    ///
    /// The pool is pre-warmed to `min_size` and, when `idle_check_interval`
    /// is set, background maintenance is started.
    ///
    /// # Errors
    /// - [`Error::AlreadyLaunched`] if the session is running; the running
    ///   pool is left untouched.
    /// - [`Error::Configuration`] if the pool settings are invalid.
    /// - Whatever the launcher returned if the source failed to start. The
    ///   session stays not launched.
    pub async fn launch(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_launched() {
            return Err(Error::AlreadyLaunched);
        }

        if let Err(err) = self.config.validate() {
            self.events.emit(PoolEvent::PoolNotCreated {
                reason: err.to_string(),
            });
            return Err(err);
        }

        let options = self.config.launch.resolved();
        let source = match self.launcher.launch(&options).await {
            Ok(source) => Arc::new(source),
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "source launch failed");
                self.events.emit(PoolEvent::PoolNotCreated {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let ctx = HookContext::new(self.id, Arc::clone(&source), Arc::clone(&self.events));
        let factory = PageFactory::new(ctx, self.hooks.clone());
        let pool = Pool::new(factory, self.config.pool.clone(), Arc::clone(&self.events))?;

        let warmed = pool.maintain().await;
        let maintenance = pool.spawn_maintenance();

        let config = pool.config();
        tracing::info!(
            session_id = %self.id,
            min_size = config.min_size,
            max_size = config.max_size,
            warmed = warmed.created,
            "session launched"
        );
        self.events.emit(PoolEvent::PoolCreated {
            min_size: config.min_size,
            max_size: config.max_size,
        });

        *self.state.write() = Some(Running {
            source,
            pool,
            maintenance,
        });
        Ok(())
    }

    /// Borrow a resource, run `handler` on it, and give it back.
    ///
    /// Returns the handler's value, or `None` when the session is not
    /// launched, no resource could be borrowed, or the handler failed or
    /// panicked. Each of those cases emits one diagnostic. The resource is
    /// released after the handler finishes, whatever its outcome.
    pub async fn process<T, H>(&self, handler: H) -> Option<T>
    where
        H: for<'a> FnOnce(
            &'a ResourceOf<L>,
            &'a SessionPool<L>,
        ) -> BoxFuture<'a, anyhow::Result<T>>,
    {
        let Some(pool) = self.pool() else {
            tracing::warn!(session_id = %self.id, "process called on a session that is not launched");
            self.events.emit(PoolEvent::PoolMissing {
                operation: "process",
            });
            return None;
        };

        let resource = match pool.acquire().await {
            Ok(resource) => resource,
            Err(err) => {
                self.events.emit(PoolEvent::AcquireFailed {
                    error: err.to_string(),
                });
                return None;
            }
        };

        let page: &ResourceOf<L> = &resource;
        let outcome = AssertUnwindSafe(handler(page, &pool))
            .catch_unwind()
            .await;
        let error = match outcome {
            Ok(Ok(value)) => {
                pool.release(resource).await;
                return Some(value);
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };

        tracing::warn!(session_id = %self.id, resource_id = resource.id(), %error, "handler failed");
        self.events.emit(PoolEvent::ProcessFailed {
            resource_id: resource.id().to_string(),
            error,
        });
        pool.release(resource).await;
        None
    }

    /// Drain and clear the pool, then shut the source down.
    ///
    /// Waits for in-flight `process` calls to release their resources. Does
    /// nothing if the session is not launched. Afterwards the session can be
    /// launched again.
    pub async fn destroy(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(running) = self.state.write().take() else {
            return;
        };
        let Running {
            source,
            pool,
            maintenance,
        } = running;

        pool.drain().await;
        if let Some(handle) = maintenance {
            if let Err(err) = handle.await {
                tracing::warn!(session_id = %self.id, error = %err, "maintenance task failed");
            }
        }
        let cleared = pool.clear().await;

        match source.shutdown().await {
            Ok(()) => self.events.emit(PoolEvent::SourceClosed),
            Err(err) => {
                tracing::warn!(session_id = %self.id, error = %err, "source shutdown failed");
                self.events.emit(PoolEvent::SourceShutdownFailed {
                    error: err.to_string(),
                });
            }
        }
        tracing::info!(session_id = %self.id, cleared, "session destroyed");
    }
}

impl<L: Launcher + std::fmt::Debug> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("launcher", &self.launcher)
            .field("launched", &self.is_launched())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
