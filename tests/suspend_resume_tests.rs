/// Suspend / resume tests
///
/// Tests for releasing and reclaiming the substrate connection: queued
/// operations, writer contention between engines and close racing resume
/// Run with: cargo test --test suspend_resume_tests

use rustmemokv::{DbError, EngineConfig, MemorySubstrate, Phase, StateEvent, StorageEngine};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_err;
use uuid::Uuid;

fn unique_path() -> String {
    format!("suspend-test-{}", Uuid::new_v4())
}

fn engine_on(substrate: &MemorySubstrate, path: &str) -> StorageEngine {
    StorageEngine::open(path, EngineConfig::new().substrate(substrate.clone())).unwrap()
}

#[tokio::test]
async fn test_suspend_releases_connection() -> anyhow::Result<()> {
    let substrate = MemorySubstrate::new();
    let path = unique_path();
    let engine = engine_on(&substrate, &path);

    engine.put(b"k", b"v", None).await?;
    assert_eq!(substrate.open_connections(&path)?, 1);

    engine.suspend().await?;
    assert_eq!(engine.phase()?, Phase::Suspended);
    assert!(engine.is_suspended());
    assert_eq!(substrate.open_connections(&path)?, 0);

    // Suspending twice is a no-op
    engine.suspend().await?;

    engine.resume().await?;
    assert_eq!(engine.phase()?, Phase::Opened);
    assert_eq!(substrate.open_connections(&path)?, 1);
    assert_eq!(engine.get(b"k", None).await?, Some(b"v".to_vec()));
    Ok(())
}

#[tokio::test]
async fn test_suspend_unopened_opens_first() -> anyhow::Result<()> {
    let substrate = MemorySubstrate::new();
    let path = unique_path();
    let engine = engine_on(&substrate, &path);

    engine.suspend().await?;
    assert_eq!(engine.phase()?, Phase::Suspended);
    assert!(substrate.database_version(&path)?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_resume_when_not_suspended_is_noop() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.resume().await?;
    engine.ready().await?;
    engine.resume().await?;
    assert_eq!(engine.phase()?, Phase::Opened);
    Ok(())
}

#[tokio::test]
async fn test_operations_queue_while_suspended() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.put(b"before", b"1", None).await?;
    engine.suspend().await?;

    let worker = engine.clone();
    let queued = tokio::spawn(async move {
        worker.put(b"during", b"2", None).await?;
        worker.get(b"before", None).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!queued.is_finished(), "operation must wait for resume");

    engine.resume().await?;
    let value = tokio::time::timeout(Duration::from_secs(1), queued).await???;
    assert_eq!(value, Some(b"1".to_vec()));
    assert_eq!(engine.get(b"during", None).await?, Some(b"2".to_vec()));
    Ok(())
}

#[tokio::test]
async fn test_queued_writes_apply_in_issue_order() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.ready().await?;
    engine.suspend().await?;

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for i in 0..3u8 {
        let worker = engine.clone();
        let order = Arc::clone(&order);
        tasks.push(tokio::spawn(async move {
            worker.put(b"k", [i], None).await?;
            order.lock().unwrap().push(i);
            Ok::<_, DbError>(())
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    engine.resume().await?;
    for task in tasks {
        task.await??;
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(engine.get(b"k", None).await?, Some(vec![2]));
    Ok(())
}

#[tokio::test]
async fn test_flush_settles_only_after_resume() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.ready().await?;
    engine.flush(None).await?;

    engine.suspend().await?;
    let worker = engine.clone();
    let flush = tokio::spawn(async move { worker.flush(None).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!flush.is_finished());

    engine.resume().await?;
    flush.await??;
    Ok(())
}

#[tokio::test]
async fn test_second_writer_blocks_resume() -> anyhow::Result<()> {
    let substrate = MemorySubstrate::new();
    let path = unique_path();

    let first = engine_on(&substrate, &path);
    first.put(b"k", b"first", None).await?;
    first.suspend().await?;

    let second = engine_on(&substrate, &path);
    second.put(b"k", b"second", None).await?;

    let err = assert_err!(first.resume().await);
    assert!(err.is_contention(), "expected contention, got {err}");
    assert_eq!(first.phase()?, Phase::Suspended);

    second.close().await?;
    first.resume().await?;
    assert_eq!(first.get(b"k", None).await?, Some(b"second".to_vec()));
    Ok(())
}

#[tokio::test]
async fn test_second_writer_refused_while_first_open() -> anyhow::Result<()> {
    let substrate = MemorySubstrate::new();
    let path = unique_path();

    let first = engine_on(&substrate, &path);
    first.ready().await?;

    let second = engine_on(&substrate, &path);
    let err = assert_err!(second.ready().await);
    assert!(err.is_contention());
    assert_eq!(second.phase()?, Phase::Unopened);
    Ok(())
}

#[tokio::test]
async fn test_close_wins_over_resume() -> anyhow::Result<()> {
    let substrate = MemorySubstrate::new();
    let path = unique_path();
    let engine = engine_on(&substrate, &path);
    engine.ready().await?;
    engine.suspend().await?;

    let worker = engine.clone();
    let resume = tokio::spawn(async move { worker.resume().await });
    tokio::task::yield_now().await;

    engine.close().await?;
    let err = assert_err!(resume.await?);
    assert!(matches!(err, DbError::Cancelled(_)), "expected cancellation, got {err}");

    assert_eq!(engine.phase()?, Phase::Closed);
    assert_eq!(substrate.open_connections(&path)?, 0);
    Ok(())
}

#[tokio::test]
async fn test_close_while_suspended_fails_queued_operations() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.ready().await?;
    engine.suspend().await?;

    let worker = engine.clone();
    let queued = tokio::spawn(async move { worker.get(b"k", None).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    engine.close().await?;
    let err = assert_err!(queued.await?);
    assert!(err.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_suspend_waits_for_in_flight_operations() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.ready().await?;

    let worker = engine.clone();
    let write = tokio::spawn(async move { worker.put(b"k", b"v", None).await });
    tokio::task::yield_now().await;

    engine.suspend().await?;
    assert!(engine.is_idle());
    engine.resume().await?;

    write.await??;
    assert_eq!(engine.get(b"k", None).await?, Some(b"v".to_vec()));
    Ok(())
}

#[tokio::test]
async fn test_suspend_resume_events() -> anyhow::Result<()> {
    let engine = engine_on(&MemorySubstrate::new(), &unique_path());
    engine.ready().await?;
    let mut events = engine.subscribe();

    engine.suspend().await?;
    engine.resume().await?;

    assert_eq!(events.recv().await?, StateEvent::Suspended);
    assert_eq!(events.recv().await?, StateEvent::Resumed);
    Ok(())
}
