//! Contracts for the things being pooled.
//!
//! A [`Launcher`] starts a [`Source`] (a browser, typically); the source
//! mints [`Resource`]s (pages). The pool only ever sees these traits, so any
//! handle that can report whether it is open and close itself can be pooled.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::LaunchOptions;

/// A pooled handle.
///
/// `close` takes `&self`: implementations track their open state with
/// interior mutability, the same way remote page handles do.
#[async_trait]
pub trait Resource: Send + Sync + 'static {
    /// Stable identifier, used in diagnostics.
    fn id(&self) -> &str;

    /// Whether the handle is still usable.
    fn is_open(&self) -> bool;

    /// Close the handle.
    async fn close(&self) -> Result<()>;
}

/// The long-lived provider resources are minted from.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    /// The resource type this source produces.
    type Resource: Resource;

    /// Mint one new resource.
    async fn create_resource(&self) -> Result<Self::Resource>;

    /// Shut the source down. Resources minted from it become unusable.
    async fn shutdown(&self) -> Result<()>;
}

/// Starts a [`Source`] from launch options.
///
/// Options the launcher does not recognize are available through
/// [`LaunchOptions::extra`] untouched.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// The source type this launcher starts.
    type Source: Source;

    /// Start a new source.
    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Source>;
}

/// Resource type produced by a launcher's source.
pub type ResourceOf<L> = <<L as Launcher>::Source as Source>::Resource;
