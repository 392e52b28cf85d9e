//! RAII guard for borrowed resources

use std::time::Duration;

use tokio::time::Instant;

use crate::factory::Factory;
use crate::pool::{Entry, Slot};
use crate::resource::Resource;

/// A resource borrowed from a [`Pool`](crate::Pool).
///
/// Derefs to the resource. Hand it back with
/// [`Pool::release`](crate::Pool::release); a guard that is simply dropped
/// is returned on a spawned task instead.
pub struct Pooled<F: Factory> {
    entry: Option<Entry<F::Resource>>,
    slot: Option<Slot<F>>,
    acquired_at: Instant,
}

impl<F: Factory> Pooled<F> {
    pub(crate) fn new(entry: Entry<F::Resource>, slot: Slot<F>) -> Self {
        Self {
            entry: Some(entry),
            slot: Some(slot),
            acquired_at: Instant::now(),
        }
    }

    /// How long this borrow has been held.
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Time since the underlying resource was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.entry.as_ref().map_or(Duration::ZERO, Entry::age)
    }

    pub(crate) async fn release(mut self) {
        if let Some((entry, slot)) = self.take() {
            let held = self.acquired_at.elapsed();
            slot.pool().give_back(entry, slot, held).await;
        }
    }

    fn take(&mut self) -> Option<(Entry<F::Resource>, Slot<F>)> {
        Some((self.entry.take()?, self.slot.take()?))
    }
}

impl<F: Factory> std::ops::Deref for Pooled<F> {
    type Target = F::Resource;

    fn deref(&self) -> &F::Resource {
        &self.entry.as_ref().expect("guard used after release").resource
    }
}

impl<F: Factory> Drop for Pooled<F> {
    fn drop(&mut self) {
        let Some((entry, slot)) = self.take() else {
            return;
        };
        let held = self.acquired_at.elapsed();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    slot.pool().give_back(entry, slot, held).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    resource_id = entry.resource.id(),
                    "borrow dropped outside a runtime, discarding without close"
                );
                slot.pool().abandon();
                drop(entry);
            }
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("resource_id", &self.entry.as_ref().map(|e| e.resource.id()))
            .field("held_for", &self.held_for())
            .finish()
    }
}
