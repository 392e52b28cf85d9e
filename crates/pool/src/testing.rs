//! Testing utilities: an in-memory browser and a recording sink.
//!
//! [`MemoryBrowser`] implements [`Launcher`] without spawning anything. Its
//! pages are counters and flags, and failures can be injected on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::{EventSink, PoolEvent};
use crate::factory::PageFactory;
use crate::hooks::{HookContext, Hooks};
use crate::pool::{Pool, PoolConfig};
use crate::resource::{Launcher, Resource, Source};
use crate::session::LaunchOptions;

// ---------------------------------------------------------------------------
// MemoryBrowser
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BrowserState {
    next_seq: AtomicU64,
    open_pages: AtomicUsize,
    close_calls: AtomicUsize,
    launches: AtomicUsize,
    shutdowns: AtomicUsize,
    fail_creates: AtomicUsize,
    fail_launch: AtomicBool,
    fail_close: AtomicBool,
    fail_shutdown: AtomicBool,
    last_options: Mutex<Option<LaunchOptions>>,
}

/// In-memory [`Launcher`]. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryBrowser {
    state: Arc<BrowserState>,
}

impl MemoryBrowser {
    /// A browser that launches and mints pages successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A browser whose every launch fails.
    #[must_use]
    pub fn failing() -> Self {
        let browser = Self::new();
        browser.state.fail_launch.store(true, Ordering::SeqCst);
        browser
    }

    /// Start a source directly, bypassing [`Launcher::launch`].
    #[must_use]
    pub fn start(&self) -> MemorySource {
        MemorySource {
            state: Arc::clone(&self.state),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make the next `n` page creations fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.state.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Make page close calls fail (or succeed again).
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Make source shutdown fail (or succeed again).
    pub fn fail_shutdown(&self, fail: bool) {
        self.state.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Pages currently open.
    #[must_use]
    pub fn open_pages(&self) -> usize {
        self.state.open_pages.load(Ordering::SeqCst)
    }

    /// Pages ever created.
    #[must_use]
    pub fn created_pages(&self) -> u64 {
        self.state.next_seq.load(Ordering::SeqCst)
    }

    /// Successful page close calls.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Launch attempts, successful or not.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.state.launches.load(Ordering::SeqCst)
    }

    /// Successful source shutdowns.
    #[must_use]
    pub fn shutdowns(&self) -> usize {
        self.state.shutdowns.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent launch.
    #[must_use]
    pub fn last_options(&self) -> Option<LaunchOptions> {
        self.state.last_options.lock().clone()
    }
}

#[async_trait]
impl Launcher for MemoryBrowser {
    type Source = MemorySource;

    async fn launch(&self, options: &LaunchOptions) -> Result<MemorySource> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        *self.state.last_options.lock() = Some(options.clone());

        let requested_failure = options
            .get("fail_launch")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if requested_failure || self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(Error::launch("browser executable not found"));
        }
        Ok(self.start())
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// In-memory [`Source`] started by a [`MemoryBrowser`].
#[derive(Debug)]
pub struct MemorySource {
    state: Arc<BrowserState>,
    running: Arc<AtomicBool>,
}

impl MemorySource {
    /// Whether [`Source::shutdown`] has not been called yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open a page synchronously.
    pub fn open_page(&self) -> Result<MemoryPage> {
        if !self.is_running() {
            return Err(Error::creation("browser has been shut down"));
        }
        let injected = self
            .state
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(Error::creation("target closed while opening page"));
        }

        let seq = self.state.next_seq.fetch_add(1, Ordering::SeqCst);
        self.state.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPage {
            id: format!("page-{seq}"),
            seq,
            open: AtomicBool::new(true),
            browser_running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl Source for MemorySource {
    type Resource = MemoryPage;

    async fn create_resource(&self) -> Result<MemoryPage> {
        self.open_page()
    }

    async fn shutdown(&self) -> Result<()> {
        if self.state.fail_shutdown.load(Ordering::SeqCst) {
            return Err(Error::close("source", "browser process did not exit"));
        }
        self.running.store(false, Ordering::SeqCst);
        self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryPage
// ---------------------------------------------------------------------------

/// In-memory page handle.
#[derive(Debug)]
pub struct MemoryPage {
    id: String,
    seq: u64,
    open: AtomicBool,
    browser_running: Arc<AtomicBool>,
    state: Arc<BrowserState>,
}

impl MemoryPage {
    /// Creation order across the whole browser, starting at 0.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Simulate the page dying on its own.
    pub fn crash(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Resource for MemoryPage {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.browser_running.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(Error::close(&self.id, "protocol error: session closed"));
        }
        if self.open.swap(false, Ordering::SeqCst) {
            self.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Sink that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PoolEvent>>,
}

impl RecordingSink {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of recorded events with the given [`PoolEvent::category`].
    #[must_use]
    pub fn count(&self, category: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.category() == category)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PoolEvent) {
        self.events.lock().push(event);
    }
}

/// A pool over a fresh [`MemoryBrowser`] source, recording its events.
///
/// # Panics
/// If `config` is invalid.
pub fn memory_pool(
    browser: &MemoryBrowser,
    hooks: Hooks<MemorySource>,
    config: PoolConfig,
) -> (Pool<PageFactory<MemorySource>>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let ctx = HookContext::new(uuid::Uuid::new_v4(), Arc::new(browser.start()), sink.clone());
    let pool = Pool::new(PageFactory::new(ctx, hooks), config, sink.clone())
        .expect("memory_pool called with invalid config");
    (pool, sink)
}
