// Pool throughput benchmarks.
//
// Measures acquire/release and process overhead against the in-memory
// browser (no I/O, instant create/close).

use std::hint::black_box;
use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use pagepool::testing::{MemoryBrowser, memory_pool};
use pagepool::{Hooks, PoolConfig, Session, SessionConfig};

fn pool_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        min_size: 0,
        max_size,
        acquire_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(3600),
        max_lifetime: Duration::from_secs(3600),
        idle_check_interval: None,
        ..Default::default()
    }
}

fn acquire_release(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let browser = MemoryBrowser::new();
    let (pool, _sink) = rt.block_on(async { memory_pool(&browser, Hooks::new(), pool_config(64)) });

    // Warm up so every iteration reuses the same page.
    rt.block_on(async {
        let page = pool.acquire().await.unwrap();
        pool.release(page).await;
    });

    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let page = pool.acquire().await.unwrap();
                pool.release(black_box(page)).await;
            });
        });
    });
}

fn contended_acquire_release(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let browser = MemoryBrowser::new();
    let (pool, _sink) = rt.block_on(async { memory_pool(&browser, Hooks::new(), pool_config(8)) });

    c.bench_function("contended_acquire_release_32_tasks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut set = tokio::task::JoinSet::new();
                for _ in 0..32 {
                    let pool = pool.clone();
                    set.spawn(async move {
                        let page = pool.acquire().await.unwrap();
                        pool.release(page).await;
                    });
                }
                while let Some(result) = set.join_next().await {
                    result.unwrap();
                }
            });
        });
    });
}

fn session_process(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let config = SessionConfig {
        pool: pool_config(4),
        ..Default::default()
    };
    let session = Session::new(MemoryBrowser::new(), config);
    rt.block_on(session.launch()).expect("launch should succeed");

    c.bench_function("session_process", |b| {
        b.iter(|| {
            rt.block_on(async {
                let seq = session
                    .process(|page, _pool| Box::pin(async move { Ok(page.seq()) }))
                    .await;
                black_box(seq)
            })
        });
    });

    rt.block_on(session.destroy());
}

criterion_group!(benches, acquire_release, contended_acquire_release, session_process);
criterion_main!(benches);
