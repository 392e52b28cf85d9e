//! Launch a session over the in-memory browser, run a few handlers
//! concurrently and tear everything down.
//!
//! Run with `RUST_LOG=pagepool=debug cargo run --example basic_session`.

use std::time::Duration;

use futures::future::join_all;
use pagepool::testing::{MemoryBrowser, MemorySource};
use pagepool::{Hooks, Resource, Session, SessionConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = SessionConfig::from_json(r#"{ "pool": { "min_size": 1, "max_size": 2, "verbose": true } }"#)?;
    let hooks = Hooks::<MemorySource>::new()
        .on_create(|ctx, page| {
            Box::pin(async move {
                tracing::info!(session = %ctx.session_id(), page = page.id(), "page ready");
                Ok(())
            })
        })
        .on_validate(|_ctx, page| Box::pin(async move { Ok(page.is_open()) }));

    let session = Session::new(MemoryBrowser::new(), config).with_hooks(hooks);
    session.launch().await?;

    let jobs = (0..4).map(|job| {
        session.process(move |page, _pool| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(format!("job {job} ran on {}", page.id()))
            })
        })
    });
    for line in join_all(jobs).await.into_iter().flatten() {
        println!("{line}");
    }

    if let Some(stats) = session.stats() {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    session.destroy().await;
    Ok(())
}
