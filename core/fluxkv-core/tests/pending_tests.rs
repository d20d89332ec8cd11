// Transactions whose futures never resolve: the network is set up but its
// loop never runs, so everything issued stays pending until cancelled.

mod common;

use fluxkv_core::{FluxError, FluxResult, GetRangeLimits, KeyRange, TransactionPhase};

#[tokio::test]
async fn test_operations_refused_while_committing() -> FluxResult<()> {
    let fx = common::idle()?;
    let mut tx = fx.db.create_transaction()?;
    assert_eq!(tx.phase(), TransactionPhase::Created);
    tx.set(b"k", b"v")?;
    assert_eq!(tx.phase(), TransactionPhase::Active);

    let _commit = tx.commit()?;
    assert_eq!(tx.phase(), TransactionPhase::Committing);
    assert_eq!(tx.set(b"k", b"w").unwrap_err(), FluxError::UsedDuringCommit);
    assert_eq!(tx.get_read_version().unwrap_err(), FluxError::UsedDuringCommit);
    assert_eq!(tx.get_committed_version().unwrap_err(), FluxError::NoCommitVersion);
    Ok(())
}

#[tokio::test]
async fn test_cancel_resolves_pending_futures_once() -> FluxResult<()> {
    let fx = common::idle()?;
    let mut tx = fx.db.create_transaction()?;

    let read = tx.get(b"k", false)?;
    let range = tx.get_range_of(&KeyRange::all(), GetRangeLimits::unlimited(), false)?;
    let stamp = tx.get_versionstamp()?;
    assert!(!read.is_ready());

    tx.cancel();
    tx.cancel();
    assert_eq!(tx.phase(), TransactionPhase::Cancelled);
    assert_eq!(read.await.unwrap_err(), FluxError::Cancelled);
    assert_eq!(range.await.unwrap_err(), FluxError::Cancelled);
    assert_eq!(stamp.await.unwrap_err(), FluxError::Cancelled);

    assert_eq!(tx.set(b"k", b"v").unwrap_err(), FluxError::TransactionCancelled);
    assert_eq!(tx.get(b"k", false).unwrap_err(), FluxError::TransactionCancelled);
    assert_eq!(
        tx.on_error(&FluxError::NotCommitted).unwrap_err(),
        FluxError::TransactionCancelled
    );

    tx.reset();
    assert_eq!(tx.phase(), TransactionPhase::Created);
    tx.set(b"k", b"v")?;
    Ok(())
}

#[tokio::test]
async fn test_future_cancel_is_idempotent() -> FluxResult<()> {
    let fx = common::idle()?;
    let mut tx = fx.db.create_transaction()?;
    let read = tx.get(b"k", false)?;
    read.cancel();
    read.cancel();
    assert!(read.is_ready());
    assert_eq!(read.await.unwrap_err(), FluxError::Cancelled);
    Ok(())
}

#[tokio::test]
async fn test_dropping_transaction_cancels_commit() -> FluxResult<()> {
    let fx = common::idle()?;
    let mut tx = fx.db.create_transaction()?;
    tx.set(b"k", b"v")?;
    let commit = tx.commit()?;
    drop(tx);
    assert_eq!(commit.await.unwrap_err(), FluxError::Cancelled);
    Ok(())
}
