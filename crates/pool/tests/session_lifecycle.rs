//! End-to-end tests for the launch / process / destroy lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use pagepool::testing::{MemoryBrowser, MemorySource, RecordingSink};
use pagepool::{DestroyReason, Hooks, PoolConfig, PoolEvent, Resource, Session, SessionConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session_with(
    browser: &MemoryBrowser,
    pool: PoolConfig,
    hooks: Hooks<MemorySource>,
) -> (Session<MemoryBrowser>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let config = SessionConfig {
        pool,
        ..Default::default()
    };
    let session = Session::new(browser.clone(), config)
        .with_hooks(hooks)
        .with_sink(sink.clone());
    (session, sink)
}

fn pool_config(min_size: usize, max_size: usize) -> PoolConfig {
    PoolConfig {
        min_size,
        max_size,
        acquire_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

#[tokio::test]
async fn destroy_without_launch_has_no_side_effects() {
    let browser = MemoryBrowser::new();
    let (session, sink) = session_with(&browser, pool_config(1, 2), Hooks::new());

    let () = session.destroy().await;
    assert!(sink.is_empty());
    assert_eq!(browser.launches(), 0);
    assert_eq!(browser.shutdowns(), 0);
}

#[tokio::test]
async fn process_before_launch_reports_exactly_once() {
    let browser = MemoryBrowser::new();
    let (session, sink) = session_with(&browser, pool_config(1, 2), Hooks::new());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let result = session
        .process(move |_page, _pool| {
            seen.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        })
        .await;

    assert_eq!(result, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0, "handler must not run");
    assert_eq!(sink.len(), 1);
    let event = &sink.events()[0];
    assert_eq!(event.category(), "pool-missing");
    assert!(event.detail().contains("pool not found"));
}

#[tokio::test]
async fn five_concurrent_processes_share_three_pages() {
    init_tracing();
    let browser = MemoryBrowser::new();
    let (session, sink) = session_with(&browser, pool_config(1, 3), Hooks::new());
    session.launch().await.unwrap();

    let borrowed = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let calls = (0..5).map(|n| {
        let borrowed = Arc::clone(&borrowed);
        let peak = Arc::clone(&peak);
        session.process(move |page, _pool| {
            Box::pin(async move {
                let now = borrowed.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                borrowed.fetch_sub(1, Ordering::SeqCst);
                assert!(page.is_open());
                Ok(n)
            })
        })
    });
    let results = join_all(calls).await;

    assert_eq!(results, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    assert!(peak.load(Ordering::SeqCst) <= 3, "at most three borrowed at once");
    assert_eq!(peak.load(Ordering::SeqCst), 3, "the pool is fully used");

    let stats = session.stats().unwrap();
    assert_eq!(stats.active, 0);
    assert!(stats.idle <= 3);
    assert_eq!(sink.count("process-failed"), 0);
}

#[tokio::test]
async fn destroy_after_launch_closes_everything() {
    let browser = MemoryBrowser::new();
    let (session, sink) = session_with(&browser, pool_config(2, 4), Hooks::new());
    session.launch().await.unwrap();
    assert_eq!(browser.open_pages(), 2);

    session.process(|_page, _pool| Box::pin(async { Ok(()) })).await;
    session.destroy().await;

    assert!(!session.is_launched());
    assert_eq!(browser.open_pages(), 0);
    assert_eq!(browser.shutdowns(), 1);
    assert_eq!(sink.count("source-closed"), 1);

    // A destroyed session behaves like one that was never launched.
    assert_eq!(session.process(|_, _| Box::pin(async { Ok(()) })).await, None);
    assert_eq!(sink.count("pool-missing"), 1);
}

#[tokio::test]
async fn destroy_waits_for_in_flight_process() {
    let browser = MemoryBrowser::new();
    let (session, _sink) = session_with(&browser, pool_config(0, 1), Hooks::new());
    session.launch().await.unwrap();

    let finished = Arc::new(AtomicUsize::new(0));
    let done = Arc::clone(&finished);
    let work = session.process(move |_page, _pool| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });
    let teardown = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.destroy().await;
    };

    let (result, ()) = tokio::join!(work, teardown);
    assert_eq!(result, Some(()));
    assert_eq!(finished.load(Ordering::SeqCst), 1, "handler was not cancelled");
    assert_eq!(browser.open_pages(), 0);
}

#[tokio::test]
async fn throwing_create_hook_still_yields_the_page() {
    let browser = MemoryBrowser::new();
    let hooks = Hooks::<MemorySource>::new()
        .on_create(|_ctx, _page| Box::pin(async { anyhow::bail!("could not inject script") }));
    let (session, sink) = session_with(&browser, pool_config(0, 1), hooks);
    session.launch().await.unwrap();

    let seq = session
        .process(|page, _pool| Box::pin(async move { Ok(page.seq()) }))
        .await;

    assert_eq!(seq, Some(0));
    assert_eq!(sink.count("hook-failed"), 1);
    assert_eq!(sink.count("resource-created"), 1);
}

#[tokio::test]
async fn rejected_page_is_destroyed_and_never_handed_out_again() {
    let browser = MemoryBrowser::new();
    let rejected = Arc::new(AtomicUsize::new(usize::MAX));
    let target = Arc::clone(&rejected);
    let hooks = Hooks::<MemorySource>::new().on_validate(move |_ctx, page| {
        let target = Arc::clone(&target);
        Box::pin(async move { Ok(page.seq() as usize != target.load(Ordering::SeqCst)) })
    });
    let (session, sink) = session_with(&browser, pool_config(1, 1), hooks);
    session.launch().await.unwrap();

    // Page 0 was pre-warmed; reject it from now on.
    rejected.store(0, Ordering::SeqCst);
    for _ in 0..3 {
        let seq = session
            .process(|page, _pool| Box::pin(async move { Ok(page.seq()) }))
            .await;
        assert_eq!(seq, Some(1));
    }

    let destroyed: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            PoolEvent::ResourceDestroyed { resource_id, reason } => Some((resource_id, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(destroyed, vec![("page-0".to_string(), DestroyReason::Invalid)]);
    assert_eq!(browser.open_pages(), 1);
}

#[tokio::test]
async fn failing_handler_is_reported_and_page_released() {
    init_tracing();
    let browser = MemoryBrowser::new();
    let (session, sink) = session_with(&browser, pool_config(0, 1), Hooks::new());
    session.launch().await.unwrap();

    let result: Option<()> = session
        .process(|_page, _pool| Box::pin(async { anyhow::bail!("navigation timeout") }))
        .await;
    assert_eq!(result, None);

    let result: Option<()> = session
        .process(|_page, _pool| Box::pin(async { panic!("selector exploded") }))
        .await;
    assert_eq!(result, None);

    assert_eq!(sink.count("process-failed"), 2);
    let details: Vec<_> = sink.events().iter().map(PoolEvent::detail).collect();
    assert!(details.iter().any(|d| d.contains("navigation timeout")));
    assert!(details.iter().any(|d| d.contains("selector exploded")));

    let stats = session.stats().unwrap();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1, "the page survives handler failures");
}

#[tokio::test]
async fn handler_can_use_the_pool() {
    let browser = MemoryBrowser::new();
    let (session, _sink) = session_with(&browser, pool_config(0, 2), Hooks::new());
    session.launch().await.unwrap();

    let pair = session
        .process(|page, pool| {
            Box::pin(async move {
                let second = pool.acquire().await?;
                let pair = (page.seq(), second.seq());
                pool.release(second).await;
                Ok(pair)
            })
        })
        .await;

    assert_eq!(pair, Some((0, 1)));
}

#[tokio::test]
async fn exhausted_pool_is_reported_by_process() {
    let browser = MemoryBrowser::new();
    let config = PoolConfig {
        acquire_timeout: Duration::from_millis(20),
        ..pool_config(0, 1)
    };
    let (session, sink) = session_with(&browser, config, Hooks::new());
    session.launch().await.unwrap();

    let pool = session.pool().unwrap();
    let held = pool.acquire().await.unwrap();

    let result = session.process(|_, _| Box::pin(async { Ok(()) })).await;
    assert_eq!(result, None);
    assert_eq!(sink.count("pool-exhausted"), 1);
    assert_eq!(sink.count("acquire-failed"), 1);

    pool.release(held).await;
    assert_eq!(session.process(|_, _| Box::pin(async { Ok(()) })).await, Some(()));
}

#[tokio::test]
async fn launch_options_reach_the_launcher() {
    let browser = MemoryBrowser::new();
    let config = SessionConfig::from_json(
        r#"{ "launch": { "args": ["--mute-audio"], "headless": false, "user_data_dir": "/tmp/profile" } }"#,
    )
    .unwrap();
    let session = Session::new(browser.clone(), config);
    session.launch().await.unwrap();

    let options = browser.last_options().unwrap();
    assert_eq!(options.args, vec!["--mute-audio".to_string()]);
    assert!(!options.headless);
    assert_eq!(
        options.get("user_data_dir").and_then(|v| v.as_str()),
        Some("/tmp/profile")
    );
    session.destroy().await;
}
