// Watches: registration at commit, firing, limits and cancellation

mod common;

use fluxkv_core::{DatabaseOption, FluxError, FluxFuture, FluxResult};
use std::time::Duration;

async fn fired(watch: FluxFuture<()>) -> FluxResult<()> {
    tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .map_err(|_| FluxError::Internal("watch did not fire".into()))?
}

#[tokio::test]
async fn test_watch_fires_after_concurrent_change() -> FluxResult<()> {
    let fx = common::start()?;
    common::seed(&fx.db, &[("w", "1")]).await?;

    let mut tx = fx.db.create_transaction()?;
    let watch = tx.watch(b"w")?;
    tx.commit()?.await?;
    assert!(!watch.is_ready());

    common::seed(&fx.db, &[("unrelated", "x")]).await?;
    assert!(!watch.is_ready());

    common::seed(&fx.db, &[("w", "2")]).await?;
    fired(watch).await
}

#[tokio::test]
async fn test_watch_outlives_transaction_handle() -> FluxResult<()> {
    let fx = common::start()?;

    let mut tx = fx.db.create_transaction()?;
    let watch = tx.watch(b"absent")?;
    tx.commit()?.await?;
    drop(tx);

    common::seed(&fx.db, &[("absent", "now present")]).await?;
    fired(watch).await
}

#[tokio::test]
async fn test_stale_watch_fires_at_commit() -> FluxResult<()> {
    let fx = common::start()?;
    common::seed(&fx.db, &[("w", "1")]).await?;

    let mut tx = fx.db.create_transaction()?;
    tx.get_read_version()?.await?;
    let watch = tx.watch(b"w")?;

    // The key moves on after the read version was taken.
    common::seed(&fx.db, &[("w", "2")]).await?;
    tx.commit()?.await?;
    fired(watch).await
}

#[tokio::test]
async fn test_watch_on_own_write_waits_for_next_change() -> FluxResult<()> {
    let fx = common::start()?;

    let mut tx = fx.db.create_transaction()?;
    tx.set(b"w", b"mine")?;
    let watch = tx.watch(b"w")?;
    tx.commit()?.await?;
    assert!(!watch.is_ready());

    common::seed(&fx.db, &[("w", "theirs")]).await?;
    fired(watch).await
}

#[tokio::test]
async fn test_uncommitted_watches_are_cancelled() -> FluxResult<()> {
    let fx = common::start()?;
    let mut tx = fx.db.create_transaction()?;

    let before_reset = tx.watch(b"a")?;
    tx.reset();
    assert_eq!(before_reset.await.unwrap_err(), FluxError::Cancelled);

    let before_cancel = tx.watch(b"a")?;
    tx.cancel();
    assert_eq!(before_cancel.await.unwrap_err(), FluxError::Cancelled);

    tx.reset();
    let before_drop = tx.watch(b"a")?;
    drop(tx);
    assert_eq!(before_drop.await.unwrap_err(), FluxError::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_watch_limit_per_database() -> FluxResult<()> {
    let fx = common::start()?;
    fx.db.set_option(DatabaseOption::MaxWatches(1))?;

    let mut tx = fx.db.create_transaction()?;
    let first = tx.watch(b"a")?;
    let second = tx.watch(b"b")?;
    tx.commit()?.await?;

    assert_eq!(second.await.unwrap_err(), FluxError::TooManyWatches { limit: 1 });
    assert!(!first.is_ready());

    common::seed(&fx.db, &[("a", "changed")]).await?;
    fired(first).await
}

#[tokio::test]
async fn test_failed_commit_fails_its_watches() -> FluxResult<()> {
    let fx = common::start()?;
    common::seed(&fx.db, &[("x", "0")]).await?;

    let mut tx = fx.db.create_transaction()?;
    tx.get(b"x", false)?.await?;
    tx.set(b"y", b"1")?;
    let watch = tx.watch(b"x")?;
    common::seed(&fx.db, &[("x", "1")]).await?;

    assert_eq!(tx.commit()?.await.unwrap_err(), FluxError::NotCommitted);
    assert_eq!(watch.await.unwrap_err(), FluxError::NotCommitted);
    Ok(())
}
