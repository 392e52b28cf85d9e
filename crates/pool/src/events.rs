//! Diagnostics channel for pool and session lifecycle events.
//!
//! Every observable transition is described by a [`PoolEvent`] and handed to
//! an [`EventSink`]. Sinks are passive: emitting never fails and never blocks
//! the pool. Three sinks ship with the crate:
//!
//! - [`TracingSink`] turns events into `tracing` records (the default),
//! - [`EventBus`] fans events out to `tokio::sync::broadcast` subscribers,
//! - [`Fanout`] forwards each event to several other sinks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::hooks::HookKind;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted by the factory, the pool engine and the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// The session launched its source and built a pool.
    PoolCreated {
        /// Configured minimum size.
        min_size: usize,
        /// Configured maximum size.
        max_size: usize,
    },
    /// `launch` failed; no pool exists.
    PoolNotCreated {
        /// Why the pool could not be built.
        reason: String,
    },
    /// An operation needed the pool but the session is not launched.
    PoolMissing {
        /// The operation that was skipped.
        operation: &'static str,
    },
    /// The source minted a new resource.
    ResourceCreated {
        /// The resource identifier.
        resource_id: String,
    },
    /// A resource left the pool for good.
    ResourceDestroyed {
        /// The resource identifier.
        resource_id: String,
        /// Why it was destroyed.
        reason: DestroyReason,
    },
    /// The source failed to mint a resource.
    CreateFailed {
        /// Human-readable error description.
        error: String,
    },
    /// Closing a resource failed. It is still considered destroyed.
    CloseFailed {
        /// The resource identifier.
        resource_id: String,
        /// Human-readable error description.
        error: String,
    },
    /// A user hook returned an error or panicked.
    HookFailed {
        /// Which hook failed.
        hook: HookKind,
        /// The resource the hook ran against.
        resource_id: String,
        /// Human-readable error description.
        error: String,
    },
    /// A resource was handed to a borrower.
    Acquired {
        /// The resource identifier.
        resource_id: String,
    },
    /// A borrower gave a resource back.
    Released {
        /// The resource identifier.
        resource_id: String,
        /// How long the resource was borrowed.
        usage_duration: Duration,
    },
    /// A borrow request waited longer than the acquire timeout.
    PoolExhausted {
        /// Callers still waiting when this one gave up.
        waiters: usize,
        /// The acquire timeout in milliseconds.
        timeout_ms: u64,
    },
    /// `process` could not borrow a resource.
    AcquireFailed {
        /// Human-readable error description.
        error: String,
    },
    /// The handler given to `process` failed or panicked.
    ProcessFailed {
        /// The resource the handler was using.
        resource_id: String,
        /// Human-readable error description.
        error: String,
    },
    /// The resource source was shut down by `destroy`.
    SourceClosed,
    /// Shutting the resource source down failed.
    SourceShutdownFailed {
        /// Human-readable error description.
        error: String,
    },
}

impl PoolEvent {
    /// Stable, machine-friendly category name.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::PoolCreated { .. } => "pool-created",
            Self::PoolNotCreated { .. } => "pool-not-created",
            Self::PoolMissing { .. } => "pool-missing",
            Self::ResourceCreated { .. } => "resource-created",
            Self::ResourceDestroyed { .. } => "resource-destroyed",
            Self::CreateFailed { .. } => "create-failed",
            Self::CloseFailed { .. } => "close-failed",
            Self::HookFailed { .. } => "hook-failed",
            Self::Acquired { .. } => "acquired",
            Self::Released { .. } => "released",
            Self::PoolExhausted { .. } => "pool-exhausted",
            Self::AcquireFailed { .. } => "acquire-failed",
            Self::ProcessFailed { .. } => "process-failed",
            Self::SourceClosed => "source-closed",
            Self::SourceShutdownFailed { .. } => "source-shutdown-failed",
        }
    }

    /// Human-readable detail text.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::PoolCreated { min_size, max_size } => {
                format!("pool created (min {min_size}, max {max_size})")
            }
            Self::PoolNotCreated { reason } => format!("pool not created: {reason}"),
            Self::PoolMissing { operation } => {
                format!("pool not found, call launch() before {operation}()")
            }
            Self::ResourceCreated { resource_id } => format!("resource {resource_id} created"),
            Self::ResourceDestroyed {
                resource_id,
                reason,
            } => format!("resource {resource_id} destroyed ({reason})"),
            Self::CreateFailed { error } => format!("could not create resource: {error}"),
            Self::CloseFailed { resource_id, error } => {
                format!("could not close resource {resource_id}: {error}")
            }
            Self::HookFailed {
                hook,
                resource_id,
                error,
            } => format!("{hook} hook failed for resource {resource_id}: {error}"),
            Self::Acquired { resource_id } => format!("resource {resource_id} acquired"),
            Self::Released {
                resource_id,
                usage_duration,
            } => format!(
                "resource {resource_id} released after {}ms",
                usage_duration.as_millis()
            ),
            Self::PoolExhausted {
                waiters,
                timeout_ms,
            } => format!("no resource available after {timeout_ms}ms ({waiters} still waiting)"),
            Self::AcquireFailed { error } => format!("could not acquire resource: {error}"),
            Self::ProcessFailed { resource_id, error } => {
                format!("handler failed on resource {resource_id}: {error}")
            }
            Self::SourceClosed => "resource source closed".to_string(),
            Self::SourceShutdownFailed { error } => {
                format!("could not shut down resource source: {error}")
            }
        }
    }

    /// Whether the event reports a failure (as opposed to a lifecycle step).
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::PoolNotCreated { .. }
                | Self::PoolMissing { .. }
                | Self::CreateFailed { .. }
                | Self::CloseFailed { .. }
                | Self::HookFailed { .. }
                | Self::PoolExhausted { .. }
                | Self::AcquireFailed { .. }
                | Self::ProcessFailed { .. }
                | Self::SourceShutdownFailed { .. }
        )
    }
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category(), self.detail())
    }
}

// ---------------------------------------------------------------------------
// DestroyReason
// ---------------------------------------------------------------------------

/// Reason a resource was permanently removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Validation rejected the resource on checkout.
    Invalid,
    /// The resource was returned already closed.
    Closed,
    /// The resource outlived `max_lifetime`.
    Expired,
    /// The resource sat idle longer than `idle_timeout`.
    IdleTimeout,
    /// The resource was returned while the pool was draining.
    Draining,
    /// The pool was cleared.
    Shutdown,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Invalid => "invalid",
            Self::Closed => "closed",
            Self::Expired => "expired",
            Self::IdleTimeout => "idle timeout",
            Self::Draining => "draining",
            Self::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receiver of diagnostics events.
///
/// Implementations must not block and must not panic; the pool calls
/// `emit` inline on its hot paths.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: PoolEvent);
}

/// Shared handle to a sink, as stored by pools and sessions.
pub type SharedSink = Arc<dyn EventSink>;

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Sink that writes every event as a `tracing` record.
///
/// Failures are logged at `WARN`. Lifecycle events go to `DEBUG`, or to
/// `INFO` when `verbose` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    verbose: bool,
}

impl TracingSink {
    /// Create a tracing sink.
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: PoolEvent) {
        let category = event.category();
        if event.is_failure() {
            tracing::warn!(category, detail = %event.detail(), "pool diagnostic");
        } else if self.verbose {
            tracing::info!(category, detail = %event.detail(), "pool event");
        } else {
            tracing::debug!(category, detail = %event.detail(), "pool event");
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` under the hood. Emission is fire-and-forget:
/// if no subscribers are listening or the channel is full, events are silently
/// dropped (no backpressure on the emitter).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// The buffer size determines how many events can be queued before
    /// slow subscribers start lagging (and losing events).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: PoolEvent) {
        // No active receivers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Fanout
// ---------------------------------------------------------------------------

/// Sink that forwards every event to each of its targets in order.
#[derive(Clone, Default)]
pub struct Fanout {
    targets: Vec<SharedSink>,
}

impl Fanout {
    /// Create a fanout over the given sinks.
    #[must_use]
    pub fn new(targets: Vec<SharedSink>) -> Self {
        Self { targets }
    }

    /// Add another target.
    pub fn push(&mut self, target: SharedSink) {
        self.targets.push(target);
    }
}

impl EventSink for Fanout {
    fn emit(&self, event: PoolEvent) {
        if let Some((last, rest)) = self.targets.split_last() {
            for target in rest {
                target.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("targets", &self.targets.len())
            .finish()
    }
}
